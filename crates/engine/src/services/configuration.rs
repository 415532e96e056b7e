//! Configuration proposals
//!
//! Runs on the leader: a proposal is validated as a whole, compared against the active
//! revision and, when accepted, written to the log as a configuration entry.

use std::sync::Arc;

use tracing::{debug, info};
use vigil_consensus::ConsensusLog;

use crate::error::{EngineResult, Error};
use crate::foundation::{AppConfiguration, LogEntry};
use crate::store::ReplicatedStateStore;

/// Result of a proposal that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// Written to the log and active from now on
    Accepted {
        /// Active revision
        revision: u64,
    },
    /// Not written; the active configuration stays in place
    Dismissed {
        /// Why the proposal was dismissed
        reason: String,
    },
}

/// Validates proposals and commits accepted configurations
pub struct ConfigurationService {
    store: Arc<ReplicatedStateStore>,
    consensus: Arc<dyn ConsensusLog>,
}

impl ConfigurationService {
    /// Create the service
    pub fn new(store: Arc<ReplicatedStateStore>, consensus: Arc<dyn ConsensusLog>) -> Self {
        Self { store, consensus }
    }

    /// Propose `config` as the new active configuration
    ///
    /// An invalid configuration is rejected with a validation error. A lower revision
    /// than the active one is dismissed, as is an equal revision unless
    /// `force_on_equal_revision` is set.
    pub async fn propose(
        &self,
        config: AppConfiguration,
        force_on_equal_revision: bool,
    ) -> EngineResult<ProposalOutcome> {
        if !self.consensus.is_leader() {
            return Err(Error::not_leader(
                "Configuration proposals are handled by the leader",
                self.consensus.leader(),
            ));
        }

        config.validate()?;

        let active = self.store.snapshot().configuration().revision;
        if config.revision < active {
            debug!(
                "Dismissed configuration revision {} (active revision {})",
                config.revision, active
            );
            return Ok(ProposalOutcome::Dismissed {
                reason: format!(
                    "revision {} is older than active revision {}",
                    config.revision, active
                ),
            });
        }
        if config.revision == active && !force_on_equal_revision {
            debug!("Dismissed configuration with active revision {}", active);
            return Ok(ProposalOutcome::Dismissed {
                reason: format!("revision {active} is already active"),
            });
        }

        let revision = config.revision;
        let entry = LogEntry::Config(Box::new(config));
        if !self.consensus.write(entry.encode()?).await? {
            return Err(Error::not_leader(
                "Lost leadership while writing configuration",
                self.consensus.leader(),
            ));
        }

        info!("Configuration revision {} is now active", revision);
        Ok(ProposalOutcome::Accepted { revision })
    }
}

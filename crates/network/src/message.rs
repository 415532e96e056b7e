//! Typed service messages

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use vigil_topology::NodeId;

use crate::error::{NetworkError, NetworkResult};

/// A request type bound to its response type and the service that handles it
pub trait ServiceMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Response returned by the handling service
    type Response: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Service ID used to route the request
    fn service_id() -> &'static str;
}

/// Wire envelope carried through the hub
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub sender: NodeId,
    pub service_id: &'static str,
    pub payload: Bytes,
    /// Execute only on the leader; non-leaders forward
    pub to_leader: bool,
    /// Number of times the request has been forwarded
    pub hops: u8,
}

pub(crate) fn encode<T: Serialize>(value: &T) -> NetworkResult<Bytes> {
    let mut buffer = Vec::new();
    ciborium::into_writer(value, &mut buffer)
        .map_err(|e| NetworkError::Serialization(format!("Failed to serialize message: {e}")))?;
    Ok(Bytes::from(buffer))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> NetworkResult<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| NetworkError::Serialization(format!("Failed to deserialize message: {e}")))
}

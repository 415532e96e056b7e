//! Materialized application state

mod application;

pub use application::{ApplicationState, ApplyOutcome};

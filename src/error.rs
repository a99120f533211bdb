// src/error.rs
//! Error taxonomy for the pipeline.
//!
//! Only `ConfigError` is allowed to stop the process. Everything else is
//! contained inside the processing loop and ends up as a log line and a counter.

use thiserror::Error;

/// Connectivity / availability failure of the document store.
/// Always treated as transient: the current cycle is abandoned and retried on the next tick.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store i/o failed: {0}")]
    Io(String),
    #[error("store document could not be (de)serialized: {0}")]
    Serde(String),
    #[error("no raw record with key {0}")]
    MissingRaw(u64),
}

/// A single record could not be turned into a processed product.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransformError {
    #[error("sentiment score {0} is not a finite value in [-1, 1]")]
    InvalidScore(f64),
}

/// The processed upsert succeeded but the raw record could not be flagged as consumed.
/// The record stays eligible and will be selected again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to mark raw record {key} consumed: {source}")]
pub struct ConsumptionMarkError {
    pub key: u64,
    #[source]
    pub source: StoreError,
}

/// Missing or invalid configuration detected at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("config file {path}: {reason}")]
    File { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumption_error_keeps_store_cause() {
        let e = ConsumptionMarkError {
            key: 7,
            source: StoreError::Unavailable("timeout".into()),
        };
        let msg = e.to_string();
        assert!(msg.contains("raw record 7"));
        assert!(msg.contains("timeout"));
        assert!(std::error::Error::source(&e).is_some());
    }
}

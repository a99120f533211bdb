// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod sentiment;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::PipelineConfig;
pub use crate::pipeline::{CycleReport, Processor};
pub use crate::sentiment::{SentimentAnalyzer, SentimentLabel, SentimentScorer};
pub use crate::store::{MemoryStore, ProcessedStore, RawStore};

// src/store/mod.rs
//! Document store capabilities the pipeline depends on.
//!
//! The pipeline never talks to a concrete backend; it gets trait objects at
//! construction time. [`memory::MemoryStore`] implements both sides and can be
//! snapshot-persisted to a JSON file.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{CollectionNames, StoreLocation};
use crate::error::StoreError;
use crate::model::{InsightsSnapshot, NewRawRecord, ProcessedProduct, RawKey, RawRecord};

pub use memory::MemoryStore;

/// Sort key for reading the processed collection (always newest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductSort {
    #[default]
    LastProcessed,
    ProcessedAtMs,
}

/// Append-mostly collection of ingested listings.
#[async_trait]
pub trait RawStore: Send + Sync {
    /// Append a record; the store assigns the key and a non-decreasing `ingested_at`.
    async fn append(&self, rec: NewRawRecord, now_ms: i64) -> Result<RawKey, StoreError>;

    /// Replace the record with the same `product_id` (or append when none exists),
    /// refreshing `ingested_at` and clearing the consumed flag.
    async fn upsert_by_product_id(
        &self,
        product_id: i64,
        rec: NewRawRecord,
        now_ms: i64,
    ) -> Result<RawKey, StoreError>;

    /// Up to `limit` unconsumed records, oldest `ingested_at` first.
    async fn find_unconsumed(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError>;

    async fn mark_consumed(&self, key: RawKey, at_ms: i64) -> Result<(), StoreError>;

    /// Newest records first.
    async fn latest(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError>;

    async fn ingested_since(&self, since_ms: i64) -> Result<Vec<RawRecord>, StoreError>;

    /// Delete consumed records whose `consumed_at` is older than `before_ms`.
    async fn purge_consumed_before(&self, before_ms: i64) -> Result<usize, StoreError>;
}

/// Processed view plus the insights singleton.
#[async_trait]
pub trait ProcessedStore: Send + Sync {
    /// Full replacement of the document keyed by `product_id`.
    async fn upsert_product(&self, product: &ProcessedProduct) -> Result<(), StoreError>;

    async fn get_product(&self, product_id: i64) -> Result<Option<ProcessedProduct>, StoreError>;

    async fn list_products(&self, sort: ProductSort) -> Result<Vec<ProcessedProduct>, StoreError>;

    /// Atomic wholesale replacement of the snapshot.
    async fn replace_insights(&self, snapshot: &InsightsSnapshot) -> Result<(), StoreError>;

    async fn latest_insights(&self) -> Result<Option<InsightsSnapshot>, StoreError>;
}

/// Open the backend named by the configured location.
pub fn open(
    location: &StoreLocation,
    names: &CollectionNames,
) -> Result<Arc<MemoryStore>, StoreError> {
    let store = match location {
        StoreLocation::Memory => MemoryStore::new(names.clone()),
        StoreLocation::File(path) => MemoryStore::open_file(path, names.clone())?,
    };
    Ok(Arc::new(store))
}

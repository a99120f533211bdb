// tests/common/mod.rs
//
// Shared doubles: a store wrapper with switchable faults and a scorer that reads
// the compound score straight out of the listing title.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

use catalog_sentiment_pipeline::config::CollectionNames;
use catalog_sentiment_pipeline::error::StoreError;
use catalog_sentiment_pipeline::model::{
    InsightsSnapshot, NewRawRecord, ProcessedProduct, RawKey, RawRecord,
};
use catalog_sentiment_pipeline::store::ProductSort;
use catalog_sentiment_pipeline::{
    MemoryStore, ProcessedStore, Processor, RawStore, SentimentScorer,
};

#[derive(Default)]
pub struct Faults {
    pub fail_select: bool,
    /// Raw keys whose consumption mark fails once, then succeeds.
    pub fail_mark_once: HashSet<RawKey>,
    /// Product ids whose processed upsert always fails.
    pub fail_upsert: HashSet<i64>,
    pub fail_reads: bool,
    pub fail_insights: bool,
}

pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    pub faults: Mutex<Faults>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(MemoryStore::new(CollectionNames::default())),
            faults: Mutex::new(Faults::default()),
        })
    }
}

fn down() -> StoreError {
    StoreError::Unavailable("injected".into())
}

#[async_trait]
impl RawStore for FlakyStore {
    async fn append(&self, rec: NewRawRecord, now_ms: i64) -> Result<RawKey, StoreError> {
        self.inner.append(rec, now_ms).await
    }

    async fn upsert_by_product_id(
        &self,
        product_id: i64,
        rec: NewRawRecord,
        now_ms: i64,
    ) -> Result<RawKey, StoreError> {
        self.inner.upsert_by_product_id(product_id, rec, now_ms).await
    }

    async fn find_unconsumed(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError> {
        if self.faults.lock().fail_select {
            return Err(down());
        }
        self.inner.find_unconsumed(limit).await
    }

    async fn mark_consumed(&self, key: RawKey, at_ms: i64) -> Result<(), StoreError> {
        if self.faults.lock().fail_mark_once.remove(&key) {
            return Err(down());
        }
        self.inner.mark_consumed(key, at_ms).await
    }

    async fn latest(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError> {
        if self.faults.lock().fail_reads {
            return Err(down());
        }
        self.inner.latest(limit).await
    }

    async fn ingested_since(&self, since_ms: i64) -> Result<Vec<RawRecord>, StoreError> {
        if self.faults.lock().fail_reads {
            return Err(down());
        }
        self.inner.ingested_since(since_ms).await
    }

    async fn purge_consumed_before(&self, before_ms: i64) -> Result<usize, StoreError> {
        self.inner.purge_consumed_before(before_ms).await
    }
}

#[async_trait]
impl ProcessedStore for FlakyStore {
    async fn upsert_product(&self, product: &ProcessedProduct) -> Result<(), StoreError> {
        if self.faults.lock().fail_upsert.contains(&product.product_id) {
            return Err(down());
        }
        self.inner.upsert_product(product).await
    }

    async fn get_product(&self, product_id: i64) -> Result<Option<ProcessedProduct>, StoreError> {
        self.inner.get_product(product_id).await
    }

    async fn list_products(&self, sort: ProductSort) -> Result<Vec<ProcessedProduct>, StoreError> {
        if self.faults.lock().fail_reads {
            return Err(down());
        }
        self.inner.list_products(sort).await
    }

    async fn replace_insights(&self, snapshot: &InsightsSnapshot) -> Result<(), StoreError> {
        if self.faults.lock().fail_insights {
            return Err(down());
        }
        self.inner.replace_insights(snapshot).await
    }

    async fn latest_insights(&self) -> Result<Option<InsightsSnapshot>, StoreError> {
        if self.faults.lock().fail_reads {
            return Err(down());
        }
        self.inner.latest_insights().await
    }
}

/// Compound score = the listing title parsed as a float; anything else is NaN.
/// A listing titled `panic` makes the scorer panic.
pub struct TitleScorer;

impl SentimentScorer for TitleScorer {
    fn compound(&self, text: &str) -> f64 {
        let title = text.split_once(". ").map(|(t, _)| t).unwrap_or(text).trim();
        if title == "panic" {
            panic!("scorer failure for test listing");
        }
        title.parse::<f64>().unwrap_or(f64::NAN)
    }
}

pub fn listing(id: Value, title: &str) -> NewRawRecord {
    NewRawRecord::from_payload(json!({
        "id": id,
        "title": title,
        "description": "",
        "category": "test",
        "price": 10.0,
        "rating": {"rate": 4.0, "count": 10}
    }))
}

/// Append listings `(id, title)` with strictly increasing ingestion times.
pub async fn seed(store: &FlakyStore, items: &[(i64, &str)]) -> Vec<RawKey> {
    let mut keys = Vec::new();
    for (i, (id, title)) in items.iter().enumerate() {
        let k = store
            .append(listing(json!(id), title), 1_000 + i as i64)
            .await
            .expect("seed append");
        keys.push(k);
    }
    keys
}

pub fn processor(store: &Arc<FlakyStore>, workers: usize) -> Processor {
    let raw: Arc<dyn RawStore> = store.clone();
    let processed: Arc<dyn ProcessedStore> = store.clone();
    Processor::new(raw, processed, Arc::new(TitleScorer)).with_workers(workers)
}

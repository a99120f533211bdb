// src/store/memory.rs
//! In-process document store, optionally mirrored to a JSON snapshot file.
//!
//! Every mutation rewrites the whole snapshot through a temp file + rename, so a
//! crash never leaves a half-written file behind. For file stores a mutation is
//! staged on a copy and only becomes visible once its flush succeeded; a failed
//! flush leaves memory and disk as they were.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{ProcessedStore, ProductSort, RawStore};
use crate::config::CollectionNames;
use crate::error::StoreError;
use crate::model::{InsightsSnapshot, NewRawRecord, ProcessedProduct, RawKey, RawRecord};
use crate::pipeline::transform::parse_id_value;

#[derive(Debug, Clone, Default)]
struct Collections {
    /// BTreeMap keeps insertion order, keys are handed out increasing.
    raw: BTreeMap<RawKey, RawRecord>,
    next_key: RawKey,
    last_ingested_at: i64,
    products: HashMap<i64, ProcessedProduct>,
    insights: Option<InsightsSnapshot>,
}

impl Collections {
    fn next_ingested_at(&mut self, now_ms: i64) -> i64 {
        let ts = now_ms.max(self.last_ingested_at);
        self.last_ingested_at = ts;
        ts
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
    names: CollectionNames,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(names: CollectionNames) -> Self {
        Self {
            inner: Mutex::new(Collections::default()),
            names,
            path: None,
        }
    }

    /// Open (or create on first flush) a snapshot-backed store at `path`.
    pub fn open_file(path: &Path, names: CollectionNames) -> Result<Self, StoreError> {
        let collections = if path.exists() {
            let s = fs::read_to_string(path)
                .map_err(|e| StoreError::Io(format!("reading {}: {e}", path.display())))?;
            load_snapshot(&s, &names)?
        } else {
            Collections::default()
        };
        tracing::info!(
            target: "store",
            path = %path.display(),
            raw = collections.raw.len(),
            products = collections.products.len(),
            "opened file store"
        );
        Ok(Self {
            inner: Mutex::new(collections),
            names,
            path: Some(path.to_path_buf()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".into()))
    }

    /// Run `f` against the collections and persist the result. Nothing is
    /// committed when `f` or the flush fails.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Collections) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut c = self.lock()?;
        if self.path.is_none() {
            return f(&mut c);
        }
        let mut staged = c.clone();
        let out = f(&mut staged)?;
        self.flush(&staged)?;
        *c = staged;
        Ok(out)
    }

    fn flush(&self, c: &Collections) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let body = dump_snapshot(c, &self.names)?;
        let tmp = path.with_extension("tmp");
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| StoreError::Io(format!("creating {}: {e}", dir.display())))?;
        }
        fs::write(&tmp, body)
            .map_err(|e| StoreError::Io(format!("writing {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| StoreError::Io(format!("renaming to {}: {e}", path.display())))
    }

    /// Number of raw records currently held (consumed ones included).
    pub fn raw_len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.raw.len())
    }

    /// Copy of one raw record, mostly for diagnostics and tests.
    pub fn raw_record(&self, key: RawKey) -> Result<Option<RawRecord>, StoreError> {
        Ok(self.lock()?.raw.get(&key).cloned())
    }
}

fn dump_snapshot(c: &Collections, names: &CollectionNames) -> Result<String, StoreError> {
    let to_values = |it: Vec<Value>| Value::Array(it);
    let ser = |e: serde_json::Error| StoreError::Serde(e.to_string());

    let raw = c
        .raw
        .values()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ser)?;
    let mut products: Vec<&ProcessedProduct> = c.products.values().collect();
    products.sort_by_key(|p| p.product_id);
    let products = products
        .into_iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ser)?;
    let insights = c
        .insights
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ser)?;

    let mut doc = serde_json::Map::new();
    doc.insert(names.raw_namespace(), to_values(raw));
    doc.insert(names.processed_namespace(), to_values(products));
    doc.insert(names.insights_namespace(), to_values(insights));
    serde_json::to_string_pretty(&Value::Object(doc)).map_err(ser)
}

fn load_snapshot(s: &str, names: &CollectionNames) -> Result<Collections, StoreError> {
    let ser = |e: serde_json::Error| StoreError::Serde(e.to_string());
    let mut doc: serde_json::Map<String, Value> = serde_json::from_str(s).map_err(ser)?;
    let mut take = |ns: String| match doc.remove(&ns) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    let mut c = Collections::default();
    for v in take(names.raw_namespace()) {
        let rec: RawRecord = serde_json::from_value(v).map_err(ser)?;
        c.next_key = c.next_key.max(rec.key + 1);
        c.last_ingested_at = c.last_ingested_at.max(rec.ingested_at);
        c.raw.insert(rec.key, rec);
    }
    for v in take(names.processed_namespace()) {
        let p: ProcessedProduct = serde_json::from_value(v).map_err(ser)?;
        c.products.insert(p.product_id, p);
    }
    if let Some(v) = take(names.insights_namespace()).into_iter().next() {
        c.insights = Some(serde_json::from_value(v).map_err(ser)?);
    }
    Ok(c)
}

#[async_trait]
impl RawStore for MemoryStore {
    async fn append(&self, rec: NewRawRecord, now_ms: i64) -> Result<RawKey, StoreError> {
        self.mutate(|c| {
            let key = c.next_key;
            c.next_key += 1;
            let ts = c.next_ingested_at(now_ms);
            c.raw.insert(key, rec.into_record(key, ts));
            Ok(key)
        })
    }

    async fn upsert_by_product_id(
        &self,
        product_id: i64,
        rec: NewRawRecord,
        now_ms: i64,
    ) -> Result<RawKey, StoreError> {
        self.mutate(|c| {
            let existing = c
                .raw
                .values()
                .find(|r| r.product_id.as_ref().and_then(parse_id_value) == Some(product_id))
                .map(|r| r.key);
            let key = match existing {
                Some(k) => k,
                None => {
                    let k = c.next_key;
                    c.next_key += 1;
                    k
                }
            };
            let ts = c.next_ingested_at(now_ms);
            c.raw.insert(key, rec.into_record(key, ts));
            Ok(key)
        })
    }

    async fn find_unconsumed(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError> {
        let c = self.lock()?;
        let mut out: Vec<RawRecord> = c.raw.values().filter(|r| !r.consumed).cloned().collect();
        out.sort_by_key(|r| (r.ingested_at, r.key));
        out.truncate(limit);
        Ok(out)
    }

    async fn mark_consumed(&self, key: RawKey, at_ms: i64) -> Result<(), StoreError> {
        self.mutate(|c| {
            let rec = c.raw.get_mut(&key).ok_or(StoreError::MissingRaw(key))?;
            rec.consumed = true;
            rec.consumed_at = Some(at_ms);
            Ok(())
        })
    }

    async fn latest(&self, limit: usize) -> Result<Vec<RawRecord>, StoreError> {
        let c = self.lock()?;
        let mut out: Vec<RawRecord> = c.raw.values().cloned().collect();
        out.sort_by(|a, b| (b.ingested_at, b.key).cmp(&(a.ingested_at, a.key)));
        out.truncate(limit);
        Ok(out)
    }

    async fn ingested_since(&self, since_ms: i64) -> Result<Vec<RawRecord>, StoreError> {
        let c = self.lock()?;
        Ok(c.raw
            .values()
            .filter(|r| r.ingested_at >= since_ms)
            .cloned()
            .collect())
    }

    async fn purge_consumed_before(&self, before_ms: i64) -> Result<usize, StoreError> {
        let expired = |r: &RawRecord| r.consumed && r.consumed_at.is_some_and(|t| t < before_ms);
        if !self.lock()?.raw.values().any(expired) {
            return Ok(0);
        }
        self.mutate(|c| {
            let before = c.raw.len();
            c.raw.retain(|_, r| !expired(r));
            Ok(before - c.raw.len())
        })
    }
}

#[async_trait]
impl ProcessedStore for MemoryStore {
    async fn upsert_product(&self, product: &ProcessedProduct) -> Result<(), StoreError> {
        self.mutate(|c| {
            c.products.insert(product.product_id, product.clone());
            Ok(())
        })
    }

    async fn get_product(&self, product_id: i64) -> Result<Option<ProcessedProduct>, StoreError> {
        Ok(self.lock()?.products.get(&product_id).cloned())
    }

    async fn list_products(&self, sort: ProductSort) -> Result<Vec<ProcessedProduct>, StoreError> {
        let c = self.lock()?;
        let mut out: Vec<ProcessedProduct> = c.products.values().cloned().collect();
        match sort {
            ProductSort::LastProcessed => out.sort_by(|a, b| {
                b.last_processed
                    .cmp(&a.last_processed)
                    .then(a.product_id.cmp(&b.product_id))
            }),
            ProductSort::ProcessedAtMs => out.sort_by(|a, b| {
                b.processed_at_ms
                    .cmp(&a.processed_at_ms)
                    .then(a.product_id.cmp(&b.product_id))
            }),
        }
        Ok(out)
    }

    async fn replace_insights(&self, snapshot: &InsightsSnapshot) -> Result<(), StoreError> {
        self.mutate(|c| {
            c.insights = Some(snapshot.clone());
            Ok(())
        })
    }

    async fn latest_insights(&self) -> Result<Option<InsightsSnapshot>, StoreError> {
        Ok(self.lock()?.insights.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing(id: i64, title: &str) -> NewRawRecord {
        NewRawRecord::from_payload(json!({"id": id, "title": title}))
    }

    #[tokio::test]
    async fn ingested_at_never_goes_backwards() {
        let store = MemoryStore::new(CollectionNames::default());
        store.append(listing(1, "a"), 1_000).await.unwrap();
        store.append(listing(2, "b"), 900).await.unwrap();
        let all = store.find_unconsumed(10).await.unwrap();
        assert_eq!(all[0].ingested_at, 1_000);
        assert_eq!(all[1].ingested_at, 1_000);
        assert!(all[0].key < all[1].key);
    }

    #[tokio::test]
    async fn consumed_records_are_not_selected() {
        let store = MemoryStore::new(CollectionNames::default());
        let k1 = store.append(listing(1, "a"), 1).await.unwrap();
        store.append(listing(2, "b"), 2).await.unwrap();
        store.mark_consumed(k1, 3).await.unwrap();
        let left = store.find_unconsumed(10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].title.as_deref(), Some("b"));
        assert_eq!(store.raw_record(k1).unwrap().unwrap().consumed_at, Some(3));
    }

    #[tokio::test]
    async fn upsert_by_product_id_reopens_record() {
        let store = MemoryStore::new(CollectionNames::default());
        let k = store.upsert_by_product_id(5, listing(5, "v1"), 10).await.unwrap();
        store.mark_consumed(k, 11).await.unwrap();
        let k2 = store.upsert_by_product_id(5, listing(5, "v2"), 12).await.unwrap();
        assert_eq!(k, k2);
        assert_eq!(store.raw_len().unwrap(), 1);
        let left = store.find_unconsumed(10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].title.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn purge_only_touches_old_consumed_records() {
        let store = MemoryStore::new(CollectionNames::default());
        let k1 = store.append(listing(1, "a"), 1).await.unwrap();
        let k2 = store.append(listing(2, "b"), 2).await.unwrap();
        store.append(listing(3, "c"), 3).await.unwrap();
        store.mark_consumed(k1, 100).await.unwrap();
        store.mark_consumed(k2, 500).await.unwrap();
        assert_eq!(store.purge_consumed_before(200).await.unwrap(), 1);
        assert_eq!(store.raw_len().unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_flush_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = MemoryStore::open_file(&path, CollectionNames::default()).unwrap();
        let k = store.append(listing(1, "a"), 5).await.unwrap();

        // a directory where the temp file goes makes every flush fail
        fs::create_dir(path.with_extension("tmp")).unwrap();

        assert!(matches!(store.mark_consumed(k, 6).await, Err(StoreError::Io(_))));
        assert!(!store.raw_record(k).unwrap().unwrap().consumed);
        assert_eq!(store.find_unconsumed(10).await.unwrap().len(), 1);

        let product: ProcessedProduct = serde_json::from_value(json!({
            "product_id": 1, "title": "a", "category": null, "price": 1.0,
            "avg_rating": null, "rating_count": null, "sentiment_score": 0.2,
            "sentiment_label": "positive", "last_processed": "2026-01-01T00:00:00Z",
            "processed_at_ms": 0
        }))
        .unwrap();
        assert!(store.upsert_product(&product).await.is_err());
        assert!(store.get_product(1).await.unwrap().is_none());

        assert!(store.append(listing(2, "b"), 7).await.is_err());
        assert_eq!(store.raw_len().unwrap(), 1);

        // disk recovers: the next write goes through with the old state intact
        fs::remove_dir(path.with_extension("tmp")).unwrap();
        store.mark_consumed(k, 8).await.unwrap();
        let reopened = MemoryStore::open_file(&path, CollectionNames::default()).unwrap();
        assert_eq!(reopened.raw_len().unwrap(), 1);
        assert!(reopened.find_unconsumed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");
        let names = CollectionNames::default();
        {
            let store = MemoryStore::open_file(&path, names.clone()).unwrap();
            store.append(listing(1, "a"), 5).await.unwrap();
            store.append(listing(2, "b"), 6).await.unwrap();
        }
        let reopened = MemoryStore::open_file(&path, names).unwrap();
        assert_eq!(reopened.raw_len().unwrap(), 2);
        // keys keep increasing after reopen
        let k = reopened.append(listing(3, "c"), 1).await.unwrap();
        assert_eq!(k, 2);
        let all = reopened.find_unconsumed(10).await.unwrap();
        assert_eq!(all.last().unwrap().ingested_at, 6);
    }
}

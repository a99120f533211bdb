// tests/end_to_end.rs
//
// Fetch -> raw store -> processing loop -> processed view, with the real scorer.

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use catalog_sentiment_pipeline::config::{CollectionNames, FetchStrategy};
use catalog_sentiment_pipeline::fetch::{run_once, spawn_fetch_loop, ListingSource};
use catalog_sentiment_pipeline::pipeline::scheduler::{
    spawn_processing_loop, spawn_retention_task,
};
use catalog_sentiment_pipeline::store::ProductSort;
use catalog_sentiment_pipeline::{
    MemoryStore, ProcessedStore, Processor, RawStore, SentimentAnalyzer, SentimentLabel,
};

struct Catalog(Vec<Value>);

#[async_trait::async_trait]
impl ListingSource for Catalog {
    async fn fetch_listings(&self) -> Result<Vec<Value>> {
        Ok(self.0.clone())
    }
    fn name(&self) -> &str {
        "catalog"
    }
}

fn catalog() -> Catalog {
    Catalog(vec![
        json!({"id": 1, "title": "Excellent rain jacket", "description": "Great fit, love it!",
               "price": 59.99, "rating": {"rate": 4.7, "count": 300}}),
        json!({"id": 2, "title": "Plain cotton shirt", "description": "Two pockets.",
               "price": 15.0}),
        json!({"id": 3, "title": "Cheap headphones", "description": "Terrible sound, broke in a week",
               "price": "9.50", "rating": {"rate": 1.2, "count": 88}}),
    ])
}

fn wire(store: &Arc<MemoryStore>, workers: usize) -> Processor {
    let raw: Arc<dyn RawStore> = store.clone();
    let processed: Arc<dyn ProcessedStore> = store.clone();
    Processor::new(raw, processed, Arc::new(SentimentAnalyzer::new())).with_workers(workers)
}

#[tokio::test]
async fn listings_become_labelled_products() {
    let store = Arc::new(MemoryStore::new(CollectionNames::default()));
    run_once(&catalog(), store.as_ref(), FetchStrategy::Insert)
        .await
        .unwrap();

    let report = wire(&store, 2).run_cycle().await.unwrap();
    assert_eq!(report.upserted, 3);

    let get = |id| {
        let store = store.clone();
        async move { store.get_product(id).await.unwrap().unwrap() }
    };
    let jacket = get(1).await;
    assert_eq!(jacket.sentiment_label, SentimentLabel::Positive);
    assert_eq!(jacket.avg_rating, Some(4.7));
    assert_eq!(jacket.rating_count, Some(300));
    assert_eq!(get(2).await.sentiment_label, SentimentLabel::Neutral);
    let phones = get(3).await;
    assert_eq!(phones.sentiment_label, SentimentLabel::Negative);
    assert_eq!(phones.price, 9.5);

    let snap = store.latest_insights().await.unwrap().unwrap();
    assert_eq!(snap.top_positive[0].product_id, 1);
    assert_eq!(snap.top_negative[0].product_id, 3);
}

#[tokio::test]
async fn background_loops_process_and_stop_cleanly() {
    let store = Arc::new(MemoryStore::new(CollectionNames::default()));
    let raw: Arc<dyn RawStore> = store.clone();
    let (stop_tx, stop_rx) = watch::channel(false);

    let tasks = vec![
        spawn_fetch_loop(
            Arc::new(catalog()),
            raw.clone(),
            FetchStrategy::Upsert,
            Duration::from_millis(20),
            stop_rx.clone(),
        ),
        spawn_processing_loop(
            Arc::new(wire(&store, 1)),
            Duration::from_millis(10),
            stop_rx.clone(),
        ),
        spawn_retention_task(
            raw,
            Duration::from_secs(3600),
            Duration::from_millis(10),
            stop_rx,
        ),
    ];

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let n = store
            .list_products(ProductSort::default())
            .await
            .unwrap()
            .len();
        if n == 3 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "loops never caught up");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    stop_tx.send(true).unwrap();
    for t in tasks {
        tokio::time::timeout(Duration::from_secs(2), t)
            .await
            .expect("loop exits after stop")
            .unwrap();
    }
    // upsert strategy: one raw record per listing no matter how many scrapes ran
    assert_eq!(store.raw_len().unwrap(), 3);
}

// src/fetch/mod.rs
//! Fetcher: pulls listings from the catalog source and appends them to the raw store.

pub mod http;

use anyhow::Result;
use metrics::{counter, describe_counter, gauge};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::FetchStrategy;
use crate::model::NewRawRecord;
use crate::pipeline::transform::parse_id_value;
use crate::store::RawStore;

pub use self::http::HttpListingSource;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_listings_total", "Listings written to the raw store.");
        describe_counter!("fetch_errors_total", "Failed fetch runs (source or store).");
    });
}

/// Anything that can hand over the current list of catalog listings.
#[async_trait::async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listings(&self) -> Result<Vec<Value>>;
    fn name(&self) -> &str;
}

/// Fetch once and store every listing. Returns how many records were written.
pub async fn run_once(
    source: &dyn ListingSource,
    raw: &dyn RawStore,
    strategy: FetchStrategy,
) -> Result<usize> {
    ensure_metrics_described();
    let listings = source.fetch_listings().await?;
    let now = chrono::Utc::now().timestamp_millis();

    let mut stored = 0usize;
    for item in listings {
        let rec = NewRawRecord::from_payload(item);
        match strategy {
            FetchStrategy::Insert => {
                raw.append(rec, now).await?;
            }
            FetchStrategy::Upsert => {
                let pid = rec.product_id.as_ref().and_then(parse_id_value).unwrap_or(0);
                raw.upsert_by_product_id(pid, rec, now).await?;
            }
        }
        stored += 1;
    }

    counter!("fetch_listings_total").increment(stored as u64);
    gauge!("fetch_last_run_ts").set((now / 1000) as f64);
    Ok(stored)
}

/// Fetch on a fixed interval until `stop` flips. Failures are logged and the
/// next tick tries again.
pub fn spawn_fetch_loop(
    source: Arc<dyn ListingSource>,
    raw: Arc<dyn RawStore>,
    strategy: FetchStrategy,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            target: "fetch",
            source = source.name(),
            interval_secs = interval.as_secs(),
            ?strategy,
            "fetcher started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *stop.borrow() {
                break;
            }
            match run_once(source.as_ref(), raw.as_ref(), strategy).await {
                Ok(n) => tracing::info!(target: "fetch", stored = n, ?strategy, "stored listings"),
                Err(e) => {
                    counter!("fetch_errors_total").increment(1);
                    tracing::warn!(target: "fetch", "fetch failed: {e:#}");
                }
            }
        }
        tracing::info!(target: "fetch", "fetcher stopped");
    })
}

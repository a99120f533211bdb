// src/pipeline/mod.rs
//! Ingestion-to-insight processing.
//!
//! One cycle: select → (score → transform → upsert) per record → aggregate.
//! Records are spread over lanes by product id, so two raw records for the same
//! product are always written in selection order by the same lane.

pub mod insights;
pub mod scheduler;
pub mod select;
pub mod transform;
pub mod upsert;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use crate::error::{StoreError, TransformError};
use crate::model::{ProcessedProduct, RawRecord};
use crate::sentiment::SentimentScorer;
use crate::store::{ProcessedStore, RawStore};

use self::upsert::UpsertOutcome;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_cycles_total", "Processing cycles that selected a batch.");
        describe_counter!(
            "pipeline_records_attempted_total",
            "Raw records picked up by a cycle."
        );
        describe_counter!(
            "pipeline_records_upserted_total",
            "Processed products written."
        );
        describe_counter!(
            "pipeline_transform_errors_total",
            "Records skipped because they could not be transformed."
        );
        describe_counter!(
            "pipeline_upsert_errors_total",
            "Records whose processed write failed."
        );
        describe_counter!(
            "pipeline_consume_errors_total",
            "Raw records left unconsumed after a successful write."
        );
        describe_counter!(
            "pipeline_id_fallback_total",
            "Records processed under the fallback product id 0."
        );
        describe_counter!(
            "pipeline_store_errors_total",
            "Cycles aborted by a store failure during selection."
        );
        describe_histogram!("pipeline_cycle_ms", "Cycle duration in milliseconds.");
        describe_gauge!("pipeline_last_cycle_ts", "Unix ts of the last finished cycle.");
        describe_gauge!(
            "insights_avg_sentiment",
            "Average sentiment of the latest snapshot."
        );
    });
}

/// Per-record result, kept in selection order for aggregation.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Upserted {
        product: ProcessedProduct,
        consumed: bool,
    },
    TransformFailed(TransformError),
    UpsertFailed(StoreError),
    /// Shutdown was requested before this record was picked up.
    Skipped,
}

/// Counts for one cycle, logged at the end of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub selected: usize,
    pub upserted: usize,
    pub transform_failures: usize,
    pub upsert_failures: usize,
    pub consume_failures: usize,
    pub id_fallbacks: usize,
    pub skipped: usize,
    pub lane_failures: usize,
    pub insights_written: bool,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.selected == 0
    }
}

/// Shared handles every lane needs. Cheap to clone.
#[derive(Clone)]
struct Deps {
    raw: Arc<dyn RawStore>,
    processed: Arc<dyn ProcessedStore>,
    scorer: Arc<dyn SentimentScorer>,
}

impl Deps {
    async fn process_record(&self, rec: &RawRecord) -> (RecordOutcome, bool) {
        let sentiment = self.scorer.score(
            rec.title.as_deref().unwrap_or_default(),
            rec.description.as_deref().unwrap_or_default(),
        );
        let now = Utc::now();
        let out = match transform::transform(rec, sentiment, now) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(target: "pipeline", raw_key = rec.key, error = %e, "record skipped");
                return (RecordOutcome::TransformFailed(e), false);
            }
        };
        if out.id_defaulted {
            tracing::warn!(
                target: "pipeline",
                raw_key = rec.key,
                "no usable product id; processing under id 0"
            );
        }
        if out.price_defaulted {
            tracing::debug!(target: "pipeline", raw_key = rec.key, "price unparsable; using 0.0");
        }

        tracing::debug!(
            target: "pipeline",
            raw_key = rec.key,
            product_id = out.product.product_id,
            score = out.product.sentiment_score,
            label = out.product.sentiment_label.as_str(),
            "record scored"
        );

        let outcome = match upsert::upsert_and_consume(
            self.processed.as_ref(),
            self.raw.as_ref(),
            rec.key,
            &out.product,
            now.timestamp_millis(),
        )
        .await
        {
            Ok(UpsertOutcome::Consumed) => RecordOutcome::Upserted {
                product: out.product,
                consumed: true,
            },
            Ok(UpsertOutcome::Unconsumed(_)) => RecordOutcome::Upserted {
                product: out.product,
                consumed: false,
            },
            Err(e) => {
                tracing::warn!(
                    target: "pipeline",
                    raw_key = rec.key,
                    product_id = out.product.product_id,
                    error = %e,
                    "processed upsert failed; continuing with batch"
                );
                RecordOutcome::UpsertFailed(e)
            }
        };
        (outcome, out.id_defaulted)
    }

    /// Records of one lane, strictly sequential.
    async fn run_lane(
        self,
        records: Vec<(usize, RawRecord)>,
        stop: Option<watch::Receiver<bool>>,
    ) -> Vec<(usize, RecordOutcome, bool)> {
        let mut out = Vec::with_capacity(records.len());
        for (idx, rec) in records {
            if stop.as_ref().is_some_and(|s| *s.borrow()) {
                out.push((idx, RecordOutcome::Skipped, false));
                continue;
            }
            let (outcome, id_fallback) = self.process_record(&rec).await;
            out.push((idx, outcome, id_fallback));
        }
        out
    }
}

/// Batch processor with injected store and scorer.
///
/// Cycles are serialized by an internal lock; calling [`Processor::run_cycle`]
/// concurrently simply queues the second call behind the first.
pub struct Processor {
    deps: Deps,
    batch_limit: usize,
    batch_cap: usize,
    workers: usize,
    cycle_lock: Mutex<()>,
}

impl Processor {
    pub fn new(
        raw: Arc<dyn RawStore>,
        processed: Arc<dyn ProcessedStore>,
        scorer: Arc<dyn SentimentScorer>,
    ) -> Self {
        Self {
            deps: Deps {
                raw,
                processed,
                scorer,
            },
            batch_limit: crate::config::DEFAULT_BATCH_CAP,
            batch_cap: crate::config::DEFAULT_BATCH_CAP,
            workers: 1,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_batch_limit(mut self, limit: usize, cap: usize) -> Self {
        self.batch_limit = limit.max(1);
        self.batch_cap = cap.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Run one full cycle. `Err` only when the batch could not be selected;
    /// in that case nothing was changed.
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        self.run_cycle_with_stop(None).await
    }

    /// Like [`run_cycle`](Self::run_cycle), but lanes stop picking up records once
    /// `stop` turns true. Unstarted records stay unconsumed.
    pub async fn run_cycle_with_stop(
        &self,
        stop: Option<watch::Receiver<bool>>,
    ) -> Result<CycleReport, StoreError> {
        ensure_metrics_described();
        let _running = self.cycle_lock.lock().await;
        let started = Instant::now();

        let batch = match select::select_batch(
            self.deps.raw.as_ref(),
            self.batch_limit,
            self.batch_cap,
        )
        .await
        {
            Ok(b) => b,
            Err(e) => {
                counter!("pipeline_store_errors_total").increment(1);
                return Err(e);
            }
        };
        if batch.is_empty() {
            tracing::debug!(target: "pipeline", "no unconsumed records");
            return Ok(CycleReport::default());
        }

        let mut report = CycleReport {
            selected: batch.len(),
            ..CycleReport::default()
        };
        counter!("pipeline_cycles_total").increment(1);
        counter!("pipeline_records_attempted_total").increment(batch.len() as u64);

        let mut results = self.process_lanes(batch, stop, &mut report).await;
        results.sort_by_key(|(idx, _, _)| *idx);

        let mut products = Vec::with_capacity(results.len());
        for (_, outcome, id_fallback) in results {
            if id_fallback {
                report.id_fallbacks += 1;
            }
            match outcome {
                RecordOutcome::Upserted { product, consumed } => {
                    report.upserted += 1;
                    if !consumed {
                        report.consume_failures += 1;
                    }
                    products.push(product);
                }
                RecordOutcome::TransformFailed(_) => report.transform_failures += 1,
                RecordOutcome::UpsertFailed(_) => report.upsert_failures += 1,
                RecordOutcome::Skipped => report.skipped += 1,
            }
        }

        if let Some(snapshot) = insights::build_snapshot(&products, Utc::now()) {
            match self.deps.processed.replace_insights(&snapshot).await {
                Ok(()) => {
                    report.insights_written = true;
                    gauge!("insights_avg_sentiment").set(snapshot.avg_sentiment);
                }
                Err(e) => {
                    tracing::warn!(target: "pipeline", error = %e, "insights snapshot not replaced");
                }
            }
        }

        counter!("pipeline_records_upserted_total").increment(report.upserted as u64);
        counter!("pipeline_transform_errors_total").increment(report.transform_failures as u64);
        counter!("pipeline_upsert_errors_total").increment(report.upsert_failures as u64);
        counter!("pipeline_consume_errors_total").increment(report.consume_failures as u64);
        counter!("pipeline_id_fallback_total").increment(report.id_fallbacks as u64);
        histogram!("pipeline_cycle_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        gauge!("pipeline_last_cycle_ts").set(Utc::now().timestamp() as f64);

        tracing::info!(
            target: "pipeline",
            attempted = report.selected,
            upserted = report.upserted,
            transform_failures = report.transform_failures,
            upsert_failures = report.upsert_failures,
            consume_failures = report.consume_failures,
            skipped = report.skipped,
            lane_failures = report.lane_failures,
            insights = report.insights_written,
            "cycle finished"
        );
        Ok(report)
    }

    async fn process_lanes(
        &self,
        batch: Vec<RawRecord>,
        stop: Option<watch::Receiver<bool>>,
        report: &mut CycleReport,
    ) -> Vec<(usize, RecordOutcome, bool)> {
        // one task per lane, a single lane included: a panic must come back as a JoinError
        let mut set = JoinSet::new();
        for lane in partition(batch, self.workers) {
            let deps = self.deps.clone();
            let stop = stop.clone();
            set.spawn(deps.run_lane(lane, stop));
        }
        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(mut part) => results.append(&mut part),
                Err(e) => {
                    // records past the crash point stay unconsumed and are retried
                    report.lane_failures += 1;
                    tracing::error!(target: "pipeline", error = %e, "processing lane aborted");
                }
            }
        }
        results
    }
}

/// Split the batch into at most `lanes` non-empty lanes keyed by product id.
/// Selection order is preserved inside each lane.
fn partition(batch: Vec<RawRecord>, lanes: usize) -> Vec<Vec<(usize, RawRecord)>> {
    let lanes = lanes.max(1);
    let mut out: Vec<Vec<(usize, RawRecord)>> = (0..lanes).map(|_| Vec::new()).collect();
    for (idx, rec) in batch.into_iter().enumerate() {
        let id = transform::parse_source_id(&rec).value;
        let lane = id.rem_euclid(lanes as i64) as usize;
        out[lane].push((idx, rec));
    }
    out.retain(|l| !l.is_empty());
    if out.is_empty() {
        out.push(Vec::new());
    }
    out
}

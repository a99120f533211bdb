// src/pipeline/scheduler.rs
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{CycleReport, Processor};
use crate::store::RawStore;

/// Drive the processor on a fixed interval until `stop` turns true (or its
/// sender goes away).
///
/// The cycle is awaited inside the loop, so cycles never overlap; ticks missed
/// while a long cycle runs are delayed rather than fired in a burst. On stop the
/// current cycle finishes the record each lane is working on and returns.
pub fn spawn_processing_loop(
    processor: Arc<Processor>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(target: "pipeline", interval_secs = interval.as_secs(), "processor started");
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
            match processor.run_cycle_with_stop(Some(stop.clone())).await {
                Ok(report) if report.is_empty() => {}
                Ok(CycleReport { skipped, .. }) if skipped > 0 => {
                    tracing::info!(target: "pipeline", skipped, "cycle cut short by shutdown");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "pipeline", error = %e, "cycle aborted; retrying next tick");
                }
            }
        }
        tracing::info!(target: "pipeline", "processor stopped");
    })
}

/// Periodically drop consumed raw records older than `retention`.
/// Unconsumed records are never touched.
pub fn spawn_retention_task(
    raw: Arc<dyn RawStore>,
    retention: Duration,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
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
            let Some(cutoff) = retention_cutoff(chrono::Utc::now().timestamp_millis(), retention)
            else {
                tracing::warn!(
                    target: "store",
                    retention_secs = retention.as_secs(),
                    "retention window out of range; nothing purged"
                );
                continue;
            };
            match raw.purge_consumed_before(cutoff).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(target: "store", purged = n, "raw retention pass"),
                Err(e) => tracing::warn!(target: "store", error = %e, "raw retention pass failed"),
            }
        }
    })
}

/// `now_ms - retention`, or `None` when the window does not fit the clock range.
pub(crate) fn retention_cutoff(now_ms: i64, retention: Duration) -> Option<i64> {
    let window = i64::try_from(retention.as_millis()).ok()?;
    now_ms.checked_sub(window)
}

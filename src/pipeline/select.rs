// src/pipeline/select.rs
use crate::error::StoreError;
use crate::model::RawRecord;
use crate::store::RawStore;

/// Next batch of unconsumed raw records, oldest first, never more than the cap.
///
/// Read-only. An empty vector is the normal "nothing to do" answer.
pub async fn select_batch(
    raw: &dyn RawStore,
    limit: usize,
    cap: usize,
) -> Result<Vec<RawRecord>, StoreError> {
    let limit = limit.min(cap.max(1));
    let mut batch = raw.find_unconsumed(limit).await?;
    // backends are asked for this order; enforce it so aggregation tie-breaks stay deterministic
    batch.retain(|r| !r.consumed);
    batch.sort_by_key(|r| (r.ingested_at, r.key));
    batch.truncate(limit);
    Ok(batch)
}

// src/pipeline/upsert.rs
use crate::error::{ConsumptionMarkError, StoreError};
use crate::model::{ProcessedProduct, RawKey};
use crate::store::{ProcessedStore, RawStore};

/// What happened after the processed document was written.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// Both steps done; the raw record will not be selected again.
    Consumed,
    /// Product written, raw record still eligible. Reprocessing it later yields
    /// the same document modulo timestamps.
    Unconsumed(ConsumptionMarkError),
}

/// Write `product` (full replacement by product id), then flag the originating
/// raw record consumed. The mark is only attempted once the upsert succeeded.
///
/// An `Err` means the product write failed and nothing was changed for this record.
pub async fn upsert_and_consume(
    processed: &dyn ProcessedStore,
    raw: &dyn RawStore,
    raw_key: RawKey,
    product: &ProcessedProduct,
    consumed_at_ms: i64,
) -> Result<UpsertOutcome, StoreError> {
    processed.upsert_product(product).await?;

    match raw.mark_consumed(raw_key, consumed_at_ms).await {
        Ok(()) => Ok(UpsertOutcome::Consumed),
        Err(source) => {
            let err = ConsumptionMarkError {
                key: raw_key,
                source,
            };
            tracing::warn!(
                target: "pipeline",
                raw_key,
                product_id = product.product_id,
                error = %err,
                "raw record left unconsumed; it will be reprocessed"
            );
            Ok(UpsertOutcome::Unconsumed(err))
        }
    }
}

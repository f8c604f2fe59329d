//! Sequential batched upserts.

use super::types::UpsertError;
use crate::pinecone::{VectorIndex, VectorRecord};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Write `records` in consecutive batches of at most `batch_size`, one call per batch.
///
/// Returns the sum of the counts the store reports. The first failing batch stops the loop;
/// earlier batches stay committed and the error carries the failing batch's offset.
pub async fn upsert_in_batches(
    index: &dyn VectorIndex,
    records: &[VectorRecord],
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<usize, UpsertError> {
    if batch_size == 0 {
        return Err(UpsertError::InvalidBatchSize);
    }

    let mut committed = 0;
    for (batch_number, batch) in records.chunks(batch_size).enumerate() {
        let offset = batch_number * batch_size;
        if cancel.is_cancelled() {
            return Err(UpsertError::Cancelled { offset, committed });
        }

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(UpsertError::Cancelled { offset, committed });
            }
            result = index.upsert(batch) => result,
        };
        let count = result.map_err(|source| {
            tracing::warn!(offset, committed, size = batch.len(), error = %source, "Batch upsert failed");
            UpsertError::Batch {
                offset,
                committed,
                source,
            }
        })?;

        committed += count;
        tracing::info!(
            offset,
            size = batch.len(),
            upserted = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch upserted"
        );
    }

    Ok(committed)
}

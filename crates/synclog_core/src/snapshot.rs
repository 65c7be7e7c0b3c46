//! Asynchronous pool compaction.
//!
//! Compaction is a pure optimization: every failure here is logged and
//! swallowed, because the raw log always remains authoritative and the
//! build can be triggered again later.

use crate::error::{CoreError, CoreResult};
use crate::record::SnapshotData;
use crate::storage::SyncStorage;
use std::sync::Arc;
use tracing::{debug, error};

/// Reads the snapshot covering everything before `pool_index`, which
/// lives on the preceding pool. Pool 0 has no predecessor.
pub(crate) fn last_snapshot_data(
    store: &Arc<dyn SyncStorage>,
    pool_index: u64,
) -> CoreResult<Option<SnapshotData>> {
    if pool_index == 0 {
        return Ok(None);
    }

    store.read_log_pool(pool_index - 1)?.get_snapshot()
}

/// Builds and persists the snapshot of the closed pool `pool_index`.
///
/// Idempotent: an already-compacted pool is left alone. Logs the
/// reducer rejects are skipped; their effects simply never reach the
/// compacted state, exactly as a client replaying the raw log would
/// conclude.
pub(crate) fn build_pool_snapshot(store: &Arc<dyn SyncStorage>, pool_index: u64) {
    match try_build(store, pool_index) {
        Ok(()) => {}
        Err(CoreError::Aborted(_)) => {
            debug!(pool = pool_index, "snapshot already built");
        }
        Err(err) => {
            error!(pool = pool_index, %err, "snapshot build failed");
        }
    }
}

fn try_build(store: &Arc<dyn SyncStorage>, pool_index: u64) -> CoreResult<()> {
    // Closed pools only ever get read here; the snapshot slot is this
    // builder's to write.
    let pool = store.read_log_pool(pool_index)?;

    if pool.get_snapshot()?.is_some() {
        return Err(CoreError::aborted("snapshot already built"));
    }

    let logs = pool.get_record_logs(0, 0)?;
    let last = last_snapshot_data(store, pool_index)?;
    let mut reducer = store.new_reducer(last.as_ref())?;

    for (index, log) in logs.iter().enumerate() {
        if let Err(err) = reducer.apply_log(log) {
            error!(pool = pool_index, index, %err, "log rejected during compaction");
        }
    }

    pool.set_snapshot(&reducer.snapshot_data()?)?;
    debug!(pool = pool_index, "snapshot built");
    Ok(())
}

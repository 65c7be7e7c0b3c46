//! In-memory log pool for testing and ephemeral stores.

use crate::error::{CoreError, CoreResult};
use crate::log::Log;
use crate::pool::LogPool;
use crate::record::SnapshotData;
use crate::seq::SeqId;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared state behind every handle opened onto one in-memory pool.
///
/// The storage hands the same state to each `new_log_pool(i)` call, so
/// the writer, the snapshot builder, and readers all see one pool.
#[derive(Debug, Default)]
pub(crate) struct MemoryPoolState {
    logs: RwLock<Vec<Log>>,
    snapshot: RwLock<Option<SnapshotData>>,
}

/// A handle onto an in-memory log pool.
#[derive(Debug)]
pub struct MemoryLogPool {
    id: u64,
    state: Arc<MemoryPoolState>,
}

impl MemoryLogPool {
    /// Creates a standalone in-memory pool.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: Arc::new(MemoryPoolState::default()),
        }
    }

    pub(crate) fn with_state(id: u64, state: Arc<MemoryPoolState>) -> Self {
        Self { id, state }
    }
}

impl LogPool for MemoryLogPool {
    fn id(&self) -> u64 {
        self.id
    }

    fn add_record_log(&self, index: u64, mut log: Log) -> CoreResult<()> {
        let mut logs = self.state.logs.write();

        if logs.len() as u64 != index {
            return Err(CoreError::logic(format!(
                "pool {} append at index {index}, expected {}",
                self.id,
                logs.len()
            )));
        }

        log.seq_id = SeqId::new(index);
        logs.push(log);
        Ok(())
    }

    fn get_record_log(&self, index: u64) -> CoreResult<Option<Log>> {
        Ok(self.state.logs.read().get(index as usize).cloned())
    }

    fn get_last_record_log(&self) -> CoreResult<Option<(u64, Log)>> {
        let logs = self.state.logs.read();
        Ok(logs
            .last()
            .map(|log| ((logs.len() - 1) as u64, log.clone())))
    }

    fn get_record_logs(&self, start: u64, end: u64) -> CoreResult<Vec<Log>> {
        let logs = self.state.logs.read();
        let len = logs.len() as u64;

        let end = if end == 0 || end > len { len } else { end };
        if end <= start {
            return Ok(Vec::new());
        }

        Ok(logs[start as usize..end as usize].to_vec())
    }

    fn set_snapshot(&self, data: &SnapshotData) -> CoreResult<()> {
        *self.state.snapshot.write() = Some(data.clone());
        Ok(())
    }

    fn get_snapshot(&self) -> CoreResult<Option<SnapshotData>> {
        Ok(self.state.snapshot.read().clone())
    }

    fn close(&self) {}
}

//! Log pools: bounded, ordered, crash-safe containers of log entries.

mod file;
mod memory;

pub use file::FileLogPool;
pub use memory::MemoryLogPool;

pub(crate) use memory::MemoryPoolState;

use crate::error::CoreResult;
use crate::log::Log;
use crate::record::SnapshotData;

/// An ordered, append-only container of logs, identified by a
/// zero-based pool index.
///
/// Logs within a pool are addressed by a contiguous zero-based index;
/// appends must supply the exact next index. Each pool owns one
/// snapshot slot holding its compacted state once the pool has been
/// rolled away from.
///
/// Implementations use interior mutability: the syncer appends through
/// a shared handle while the snapshot builder and readers open their
/// own handles onto the same pool.
pub trait LogPool: Send + Sync {
    /// The pool's index.
    fn id(&self) -> u64;

    /// Appends `log` at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Logic`] if `index` is not the pool's
    /// current length: gaps and reordering are programming errors, not
    /// retryable conditions.
    fn add_record_log(&self, index: u64, log: Log) -> CoreResult<()>;

    /// Reads the log at `index`, if present.
    fn get_record_log(&self, index: u64) -> CoreResult<Option<Log>>;

    /// Reads the last log and its index, if the pool is non-empty.
    fn get_last_record_log(&self) -> CoreResult<Option<(u64, Log)>>;

    /// Reads the range `[start, end)`.
    ///
    /// `end == 0` means "through the last entry"; an `end` beyond the
    /// pool length is clamped; `end < start` yields an empty vector,
    /// not an error.
    fn get_record_logs(&self, start: u64, end: u64) -> CoreResult<Vec<Log>>;

    /// Persists the pool's compacted state.
    fn set_snapshot(&self, data: &SnapshotData) -> CoreResult<()>;

    /// Retrieves the pool's compacted state.
    ///
    /// Absence is not an error: `None` means "not yet compacted".
    fn get_snapshot(&self) -> CoreResult<Option<SnapshotData>>;

    /// Releases resources. Does not delete data.
    fn close(&self);
}

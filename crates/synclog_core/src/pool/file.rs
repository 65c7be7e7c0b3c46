//! File-backed log pool built on framed appends.

use crate::error::{CoreError, CoreResult};
use crate::frame::{encode_frame, FrameScan};
use crate::log::Log;
use crate::pool::LogPool;
use crate::record::SnapshotData;
use crate::seq::SeqId;
use parking_lot::Mutex;
use synclog_storage::StorageBackend;

struct LogFile {
    backend: Box<dyn StorageBackend>,
    // Decoded view of every intact frame; the file stays authoritative.
    logs: Vec<Log>,
}

/// A log pool persisted as a frame-per-log append-only file plus a
/// sibling snapshot slot.
///
/// On open the log file is scanned frame by frame, stopping at the
/// first torn or missing frame, so the pool always presents a prefix
/// of fully committed logs. Only a writer-side [`FileLogPool::open`]
/// truncates the torn tail away; [`FileLogPool::open_reader`] leaves
/// the file untouched, because the tail it sees may be another
/// handle's append in flight rather than crash residue. Every append
/// is a single framed write followed by a flush, which is what lets
/// readers never observe a partial log.
pub struct FileLogPool {
    id: u64,
    read_only: bool,
    log: Mutex<LogFile>,
    snapshot: Mutex<Box<dyn StorageBackend>>,
}

impl FileLogPool {
    /// Opens a pool for writing, repairing any torn tail.
    ///
    /// Exactly one writer handle may exist per pool file.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing frames cannot be scanned or a
    /// torn tail cannot be truncated.
    pub fn open(
        id: u64,
        log_backend: Box<dyn StorageBackend>,
        snapshot_backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        Self::open_inner(id, log_backend, snapshot_backend, false)
    }

    /// Opens a pool for reading only.
    ///
    /// The log file is never modified through this handle: a torn tail
    /// is skipped, not repaired, and appends are refused. The snapshot
    /// slot stays writable; it is a separate file owned by the
    /// compactor.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing frames cannot be scanned.
    pub fn open_reader(
        id: u64,
        log_backend: Box<dyn StorageBackend>,
        snapshot_backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        Self::open_inner(id, log_backend, snapshot_backend, true)
    }

    fn open_inner(
        id: u64,
        log_backend: Box<dyn StorageBackend>,
        snapshot_backend: Box<dyn StorageBackend>,
        read_only: bool,
    ) -> CoreResult<Self> {
        let mut backend = log_backend;
        let mut logs = Vec::new();

        let valid_end = {
            let mut scan = FrameScan::new(backend.as_ref())?;
            while let Some(log) = scan.next_frame()? {
                logs.push(log);
            }
            scan.valid_end()
        };

        if !read_only && valid_end < backend.size()? {
            backend.truncate(valid_end)?;
        }

        Ok(Self {
            id,
            read_only,
            log: Mutex::new(LogFile { backend, logs }),
            snapshot: Mutex::new(snapshot_backend),
        })
    }
}

impl LogPool for FileLogPool {
    fn id(&self) -> u64 {
        self.id
    }

    fn add_record_log(&self, index: u64, mut log: Log) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::logic(format!(
                "pool {} opened read-only",
                self.id
            )));
        }

        let mut file = self.log.lock();

        if file.logs.len() as u64 != index {
            return Err(CoreError::logic(format!(
                "pool {} append at index {index}, expected {}",
                self.id,
                file.logs.len()
            )));
        }

        log.seq_id = SeqId::new(index);

        let frame = encode_frame(&log)?;
        file.backend.append(&frame)?;
        file.backend.flush()?;

        file.logs.push(log);
        Ok(())
    }

    fn get_record_log(&self, index: u64) -> CoreResult<Option<Log>> {
        Ok(self.log.lock().logs.get(index as usize).cloned())
    }

    fn get_last_record_log(&self) -> CoreResult<Option<(u64, Log)>> {
        let file = self.log.lock();
        Ok(file
            .logs
            .last()
            .map(|log| ((file.logs.len() - 1) as u64, log.clone())))
    }

    fn get_record_logs(&self, start: u64, end: u64) -> CoreResult<Vec<Log>> {
        let file = self.log.lock();
        let len = file.logs.len() as u64;

        let end = if end == 0 || end > len { len } else { end };
        if end <= start {
            return Ok(Vec::new());
        }

        Ok(file.logs[start as usize..end as usize].to_vec())
    }

    fn set_snapshot(&self, data: &SnapshotData) -> CoreResult<()> {
        let bytes = serde_json::to_vec(data)?;

        let mut backend = self.snapshot.lock();
        backend.truncate(0)?;
        backend.append(&bytes)?;
        backend.sync()?;
        Ok(())
    }

    fn get_snapshot(&self) -> CoreResult<Option<SnapshotData>> {
        let backend = self.snapshot.lock();
        let size = backend.size()?;
        if size == 0 {
            return Ok(None);
        }

        let bytes = backend.read_at(0, size as usize)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn close(&self) {
        // Appends flush eagerly; nothing buffered to lose.
        let _ = self.log.lock().backend.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synclog_storage::FileBackend;
    use tempfile::tempdir;

    fn open_pool(dir: &std::path::Path, id: u64) -> FileLogPool {
        let log = FileBackend::open(&dir.join(format!("pool-{id}.log"))).unwrap();
        let snap = FileBackend::open(&dir.join(format!("pool-{id}.snapshot"))).unwrap();
        FileLogPool::open(id, Box::new(log), Box::new(snap)).unwrap()
    }

    #[test]
    fn logs_survive_reopen() {
        let dir = tempdir().unwrap();

        {
            let pool = open_pool(dir.path(), 0);
            pool.add_record_log(0, Log::add("a", b"1", "v1".to_string()))
                .unwrap();
            pool.add_record_log(1, Log::change("a", "v1", b"2", "v2".to_string()))
                .unwrap();
            pool.close();
        }

        let pool = open_pool(dir.path(), 0);
        let logs = pool.get_record_logs(0, 0).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].record_id, "a");
        assert_eq!(logs[1].version_id, "v1");
    }

    #[test]
    fn contiguity_enforced_across_reopen() {
        let dir = tempdir().unwrap();

        {
            let pool = open_pool(dir.path(), 0);
            pool.add_record_log(0, Log::add("a", b"1", "v1".to_string()))
                .unwrap();
        }

        let pool = open_pool(dir.path(), 0);
        assert!(pool
            .add_record_log(0, Log::add("b", b"2", "v2".to_string()))
            .is_err());
        pool.add_record_log(1, Log::add("b", b"2", "v2".to_string()))
            .unwrap();
    }

    #[test]
    fn torn_tail_truncated_on_open() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("pool-0.log");

        {
            let pool = open_pool(dir.path(), 0);
            pool.add_record_log(0, Log::add("a", b"1", "v1".to_string()))
                .unwrap();
        }

        // Simulate a crash mid-append by writing half a frame.
        let good_len = std::fs::metadata(&log_path).unwrap().len();
        let frame = encode_frame(&Log::add("b", b"2", "v2".to_string())).unwrap();
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&log_path)
                .unwrap();
            f.write_all(&frame[..frame.len() / 2]).unwrap();
        }

        let pool = open_pool(dir.path(), 0);
        assert_eq!(pool.get_record_logs(0, 0).unwrap().len(), 1);
        assert_eq!(std::fs::metadata(&log_path).unwrap().len(), good_len);

        // The pool accepts the next append at the recovered index.
        pool.add_record_log(1, Log::add("b", b"2", "v2".to_string()))
            .unwrap();
    }

    #[test]
    fn reader_leaves_a_torn_tail_in_place() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("pool-0.log");

        {
            let pool = open_pool(dir.path(), 0);
            pool.add_record_log(0, Log::add("a", b"1", "v1".to_string()))
                .unwrap();
        }

        // Half a frame at the tail, as an in-flight append would leave.
        let frame = encode_frame(&Log::add("b", b"2", "v2".to_string())).unwrap();
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&log_path)
                .unwrap();
            f.write_all(&frame[..frame.len() / 2]).unwrap();
        }
        let torn_len = std::fs::metadata(&log_path).unwrap().len();

        let log = FileBackend::open(&log_path).unwrap();
        let snap = FileBackend::open(&dir.path().join("pool-0.snapshot")).unwrap();
        let reader = FileLogPool::open_reader(0, Box::new(log), Box::new(snap)).unwrap();

        // The committed prefix is visible, the file is untouched, and
        // the handle refuses to append.
        assert_eq!(reader.get_record_logs(0, 0).unwrap().len(), 1);
        assert_eq!(std::fs::metadata(&log_path).unwrap().len(), torn_len);
        assert!(reader
            .add_record_log(1, Log::add("c", b"3", "v3".to_string()))
            .is_err());
    }

    #[test]
    fn snapshot_slot_roundtrip() {
        let dir = tempdir().unwrap();

        let pool = open_pool(dir.path(), 0);
        assert!(pool.get_snapshot().unwrap().is_none());

        pool.set_snapshot(&SnapshotData::default()).unwrap();
        drop(pool);

        let pool = open_pool(dir.path(), 0);
        assert_eq!(pool.get_snapshot().unwrap().unwrap(), SnapshotData::default());
    }
}

//! Storage composition root: pools, kv bookkeeping and reducers behind
//! one trait.
//!
//! The syncer is written against [`SyncStorage`] only; swapping the
//! in-memory store for the file-backed one changes durability, not
//! behavior.

use crate::error::CoreResult;
use crate::kv::{get_json, set_json, FileKv, KvStore, MemoryKv};
use crate::log::{InterruptedLog, Log};
use crate::plugin::PluginRegistry;
use crate::pool::{FileLogPool, LogPool, MemoryLogPool, MemoryPoolState};
use crate::record::SnapshotData;
use crate::reducer::{Reducer, SnapshotReducer};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synclog_storage::FileBackend;

/// Kv key holding the write-ahead intent marker.
pub(crate) const RECOVER_LOG_KEY: &str = ":recover-log";

/// Everything the syncer needs from its environment.
pub trait SyncStorage: Send + Sync {
    /// Opens the writer handle onto pool `index`, creating it if
    /// absent.
    ///
    /// Repeated calls for the same index must observe the same pool.
    /// Only the syncer's writer path may call this on the active pool;
    /// a file-backed implementation repairs crash residue here.
    fn new_log_pool(&self, index: u64) -> CoreResult<Box<dyn LogPool>>;

    /// Opens a handle onto pool `index` for reading.
    ///
    /// Must never modify the pool's durable state: the writer may be
    /// mid-append on the same file, and what looks like a torn tail is
    /// its bytes in flight.
    fn read_log_pool(&self, index: u64) -> CoreResult<Box<dyn LogPool>> {
        self.new_log_pool(index)
    }

    /// The bookkeeping kv store.
    fn kv(&self) -> &dyn KvStore;

    /// Creates a reducer seeded from `last`, the previous pool's
    /// export.
    fn new_reducer(&self, last: Option<&SnapshotData>) -> CoreResult<Box<dyn Reducer>>;

    /// Persists the intent marker before a log is appended.
    fn pre_log(&self, log: &Log, pool_index: u64, index_on_pool: u64) -> CoreResult<()> {
        set_json(
            self.kv(),
            RECOVER_LOG_KEY,
            &InterruptedLog {
                log: log.clone(),
                pool_index,
                index_on_pool,
            },
        )
    }

    /// Removes the intent marker once bookkeeping has landed.
    fn after_log(&self) -> CoreResult<()> {
        self.kv().del(RECOVER_LOG_KEY)
    }

    /// Reads the intent marker left by a crashed append, if any.
    fn interrupted_log(&self) -> CoreResult<Option<InterruptedLog>> {
        get_json(self.kv(), RECOVER_LOG_KEY)
    }
}

/// Fully in-memory storage, for tests and ephemeral engines.
pub struct MemoryStorage {
    pools: RwLock<HashMap<u64, Arc<MemoryPoolState>>>,
    kv: MemoryKv,
    registry: Arc<PluginRegistry>,
}

impl MemoryStorage {
    /// Creates an empty in-memory storage with the given plugins.
    #[must_use]
    pub fn new(registry: PluginRegistry) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            kv: MemoryKv::new(),
            registry: Arc::new(registry),
        }
    }
}

impl SyncStorage for MemoryStorage {
    fn new_log_pool(&self, index: u64) -> CoreResult<Box<dyn LogPool>> {
        let state = Arc::clone(
            self.pools
                .write()
                .entry(index)
                .or_insert_with(|| Arc::new(MemoryPoolState::default())),
        );
        Ok(Box::new(MemoryLogPool::with_state(index, state)))
    }

    fn kv(&self) -> &dyn KvStore {
        &self.kv
    }

    fn new_reducer(&self, last: Option<&SnapshotData>) -> CoreResult<Box<dyn Reducer>> {
        Ok(Box::new(SnapshotReducer::new(
            Arc::clone(&self.registry),
            last,
        )?))
    }
}

/// Directory-backed storage.
///
/// Layout under the root: `pool-{i}.log`, `pool-{i}.snapshot` and
/// `kv.json`. Two instances opened on the same root observe the same
/// durable state, which is what the crash tests exercise.
pub struct FileStorage {
    root: PathBuf,
    kv: FileKv,
    registry: Arc<PluginRegistry>,
}

impl FileStorage {
    /// Opens (or initializes) storage rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the kv
    /// file cannot be read.
    pub fn open(root: &Path, registry: PluginRegistry) -> CoreResult<Self> {
        std::fs::create_dir_all(root)?;

        Ok(Self {
            root: root.to_path_buf(),
            kv: FileKv::open(&root.join("kv.json"))?,
            registry: Arc::new(registry),
        })
    }
}

impl SyncStorage for FileStorage {
    fn new_log_pool(&self, index: u64) -> CoreResult<Box<dyn LogPool>> {
        let log = FileBackend::open(&self.root.join(format!("pool-{index}.log")))?;
        let snapshot = FileBackend::open(&self.root.join(format!("pool-{index}.snapshot")))?;
        Ok(Box::new(FileLogPool::open(
            index,
            Box::new(log),
            Box::new(snapshot),
        )?))
    }

    fn read_log_pool(&self, index: u64) -> CoreResult<Box<dyn LogPool>> {
        let log = FileBackend::open(&self.root.join(format!("pool-{index}.log")))?;
        let snapshot = FileBackend::open(&self.root.join(format!("pool-{index}.snapshot")))?;
        Ok(Box::new(FileLogPool::open_reader(
            index,
            Box::new(log),
            Box::new(snapshot),
        )?))
    }

    fn kv(&self) -> &dyn KvStore {
        &self.kv
    }

    fn new_reducer(&self, last: Option<&SnapshotData>) -> CoreResult<Box<dyn Reducer>> {
        Ok(Box::new(SnapshotReducer::new(
            Arc::clone(&self.registry),
            last,
        )?))
    }
}

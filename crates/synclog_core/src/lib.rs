//! # synclog core
//!
//! An append-only, crash-recoverable operation log with asynchronous
//! compaction.
//!
//! The log is partitioned into bounded **pools**. A single writer
//! appends through the [`Syncer`]; when a pool fills up the writer
//! rolls over to the next one and a background thread folds the closed
//! pool into a **snapshot** via a [`Reducer`]. Readers catch up with
//! [`Syncer::get_all_logs`], which serves either the raw log or a
//! synthetic snapshot entry followed by the logs it does not subsume.
//!
//! ## Crash safety
//!
//! Every append is bracketed by a write-ahead intent marker in the kv
//! store. A marker that survives a restart is resolved before the next
//! append: if the log it describes landed as the pool's tail, the
//! counters are advanced past it; otherwise it is discarded. Either
//! way no log is lost and none is duplicated.
//!
//! ## Plugins
//!
//! Logs carrying a `plugin_id` are opaque to the engine and routed to
//! a [`PluginReducer`] from the [`PluginRegistry`] during compaction.
//! The bundled [`typetable`] plugin keeps a two-level label hierarchy
//! in the log.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod kv;
mod log;
mod plugin;
mod pool;
mod record;
mod reducer;
mod seq;
mod snapshot;
mod storage;
mod syncer;

pub mod typetable;

pub use error::{CoreError, CoreResult};
pub use kv::{get_json, set_json, FileKv, KvStore, MemoryKv};
pub use log::{new_version_id, InterruptedLog, Log, OpType};
pub use plugin::{PluginConstructor, PluginReducer, PluginRegistry};
pub use pool::{FileLogPool, LogPool, MemoryLogPool};
pub use record::{PluginSnapshotData, RecordRow, SnapshotData, UpdateFlag};
pub use reducer::{Reducer, SnapshotReducer};
pub use seq::SeqId;
pub use storage::{FileStorage, MemoryStorage, SyncStorage};
pub use syncer::Syncer;

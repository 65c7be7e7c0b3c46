//! # synclog storage
//!
//! Byte-store backends for the synclog engine.
//!
//! This crate provides the lowest-level storage abstraction used by the
//! log pools and snapshot slots. Backends are **opaque byte stores**:
//! they move bytes, and nothing else. Frame layout, log records, and
//! snapshot encodings are owned entirely by `synclog_core`.
//!
//! ## Design
//!
//! - Backends expose read, append, flush, sync, and truncate
//! - No knowledge of pools, frames, or snapshots
//! - `Send + Sync` so a pool handle can be shared across threads
//!
//! ## Available backends
//!
//! - [`InMemoryBackend`] - testing and ephemeral stores
//! - [`FileBackend`] - persistent storage on top of OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use synclog_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

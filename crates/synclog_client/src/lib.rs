//! # synclog client
//!
//! An offline-first record mirror on top of the `synclog_core` engine.
//!
//! A [`Mirror`] accepts local edits immediately, uploads them to the
//! log in batches, and reconciles by pulling the log back, including
//! its own echoes. Concurrency is optimistic: every mutation names the
//! version it was based on, and a stale mutation pulled from the log
//! is skipped rather than applied.
//!
//! ## Flow
//!
//! ```text
//! edit -> WaitSync -> upload -> SyncToServer -> pull echo -> SyncDone
//! ```
//!
//! Two mirrors pulling the same log prefix always converge to the same
//! record state, regardless of how their uploads interleaved.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod mirror;

pub use error::{ClientError, ClientResult};
pub use mirror::{LocalRow, Mirror};

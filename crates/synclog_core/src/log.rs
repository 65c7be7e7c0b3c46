//! Log entries and the write-ahead intent marker.

use crate::seq::SeqId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of mutation a log entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OpType {
    /// Create a record.
    Add,
    /// Tombstone a record.
    Del,
    /// Replace a record's value.
    Change,
    /// Synthetic compacted-state entry, emitted only in catch-up
    /// responses. Never persisted in a pool.
    Snapshot,
}

impl From<OpType> for u8 {
    fn from(op: OpType) -> Self {
        match op {
            OpType::Add => 0,
            OpType::Del => 1,
            OpType::Change => 2,
            OpType::Snapshot => 3,
        }
    }
}

impl TryFrom<u8> for OpType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(OpType::Add),
            1 => Ok(OpType::Del),
            2 => Ok(OpType::Change),
            3 => Ok(OpType::Snapshot),
            other => Err(format!("invalid op type code {other}")),
        }
    }
}

/// An immutable, append-only operation log entry.
///
/// Exactly one of core-record semantics or plugin semantics applies,
/// selected by whether `plugin_id` is empty. For core records the
/// payload is the record's opaque value; for plugin logs its
/// interpretation belongs to the named plugin reducer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Global sequence number. Assigned on read paths from the pool
    /// layout; within a pool the persisted value is the local index.
    #[serde(default)]
    pub seq_id: SeqId,
    /// Operation kind.
    pub op_type: OpType,
    /// The logical entity being mutated.
    #[serde(default)]
    pub record_id: String,
    /// Opaque value bytes; empty for `Del`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    /// The version the writer believed was current. Required for
    /// `Change` and `Del`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version_id: String,
    /// The version assigned by this operation. Required for `Add` and
    /// `Change`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub new_version_id: String,
    /// Routes the log to a named plugin reducer when non-empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin_id: String,
}

impl Log {
    /// Builds an `Add` log for a core record.
    #[must_use]
    pub fn add(record_id: &str, payload: &[u8], new_version_id: String) -> Self {
        Self {
            seq_id: SeqId::default(),
            op_type: OpType::Add,
            record_id: record_id.to_string(),
            payload: payload.to_vec(),
            version_id: String::new(),
            new_version_id,
            plugin_id: String::new(),
        }
    }

    /// Builds a `Del` log for a core record.
    #[must_use]
    pub fn del(record_id: &str, version_id: &str) -> Self {
        Self {
            seq_id: SeqId::default(),
            op_type: OpType::Del,
            record_id: record_id.to_string(),
            payload: Vec::new(),
            version_id: version_id.to_string(),
            new_version_id: String::new(),
            plugin_id: String::new(),
        }
    }

    /// Builds a `Change` log for a core record.
    #[must_use]
    pub fn change(
        record_id: &str,
        version_id: &str,
        payload: &[u8],
        new_version_id: String,
    ) -> Self {
        Self {
            seq_id: SeqId::default(),
            op_type: OpType::Change,
            record_id: record_id.to_string(),
            payload: payload.to_vec(),
            version_id: version_id.to_string(),
            new_version_id,
            plugin_id: String::new(),
        }
    }

    /// Builds the synthetic `Snapshot` log carried in catch-up
    /// responses.
    #[must_use]
    pub fn snapshot(seq_id: SeqId, payload: Vec<u8>) -> Self {
        Self {
            seq_id,
            op_type: OpType::Snapshot,
            record_id: String::new(),
            payload,
            version_id: String::new(),
            new_version_id: String::new(),
            plugin_id: String::new(),
        }
    }

    /// Returns true when this log routes to a plugin reducer.
    #[must_use]
    pub fn is_plugin(&self) -> bool {
        !self.plugin_id.is_empty()
    }

    /// Compares two logs as operations, ignoring `seq_id`.
    ///
    /// Pools renumber sequence IDs on read, so recovery compares the
    /// durable tail against the intent marker field-by-field without
    /// the sequence.
    #[must_use]
    pub fn same_operation(&self, other: &Log) -> bool {
        self.op_type == other.op_type
            && self.record_id == other.record_id
            && self.payload == other.payload
            && self.version_id == other.version_id
            && self.new_version_id == other.new_version_id
            && self.plugin_id == other.plugin_id
    }
}

/// The write-ahead intent marker.
///
/// Persisted immediately before a log is appended to its pool and
/// removed once the post-append bookkeeping lands. Its presence across
/// a restart is the crash-recovery signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptedLog {
    /// The log that was about to be appended.
    pub log: Log,
    /// The pool the append targeted.
    pub pool_index: u64,
    /// The in-pool index the append targeted.
    pub index_on_pool: u64,
}

/// Generates a fresh, globally unique version token.
#[must_use]
pub fn new_version_id() -> String {
    Uuid::new_v4().simple().to_string()
}

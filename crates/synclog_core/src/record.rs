//! Materialized record state and snapshot exports.

use serde::{Deserialize, Serialize};

/// Upload state of a record relative to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum UpdateFlag {
    /// A local mutation exists that has not been uploaded yet.
    WaitSync,
    /// The mutation has been sent; awaiting its echo from the log.
    SyncToServer,
    /// The record matches the durable log.
    SyncDone,
}

impl From<UpdateFlag> for u8 {
    fn from(flag: UpdateFlag) -> Self {
        match flag {
            UpdateFlag::WaitSync => 0,
            UpdateFlag::SyncToServer => 1,
            UpdateFlag::SyncDone => 2,
        }
    }
}

impl TryFrom<u8> for UpdateFlag {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(UpdateFlag::WaitSync),
            1 => Ok(UpdateFlag::SyncToServer),
            2 => Ok(UpdateFlag::SyncDone),
            other => Err(format!("invalid update flag code {other}")),
        }
    }
}

/// Canonical state of one core record.
///
/// Created by the first `Add` observed for an ID, mutated by `Change`,
/// removed by `Del`. `updated_at` is a logical apply-order clock, not
/// wall time, so independent replays of the same log prefix produce
/// identical rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRow {
    /// Record ID, unique within the core reducer's namespace.
    pub id: String,
    /// Current version token.
    pub version: String,
    /// Upload state.
    pub update_flag: UpdateFlag,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
    /// Opaque value bytes.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Logical clock of the last mutation that touched this row.
    #[serde(default)]
    pub updated_at: u64,
}

/// Compacted state of one plugin reducer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSnapshotData {
    /// The plugin's registry ID.
    pub id: String,
    /// Plugin-defined compacted state.
    #[serde(default)]
    pub records: serde_json::Value,
}

/// The materialized state as of the end of a closed pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotData {
    /// Core record rows, in deterministic `(updated_at, id)` order.
    #[serde(default)]
    pub records: Vec<RecordRow>,
    /// Per-plugin compacted state, ordered by plugin ID.
    #[serde(default)]
    pub plugin_records: Vec<PluginSnapshotData>,
}

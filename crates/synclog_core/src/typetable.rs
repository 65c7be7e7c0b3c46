//! Type-table plugin: a two-level label hierarchy kept in the log.
//!
//! Rows form a forest of depth two: roots and their children. A row is
//! never removed; deletion transfers it to another live row and leaves
//! a `moved_to` tombstone so old references stay resolvable.

use crate::error::{CoreError, CoreResult};
use crate::log::{Log, OpType};
use crate::plugin::{PluginReducer, PluginRegistry};
use crate::seq::SeqId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registry ID of the type-table plugin.
pub const TYPE_TABLE_PLUGIN_ID: &str = "type-table";

/// One row of the type table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRow {
    /// Display label, unique across the table.
    pub label: String,
    /// Parent row ID; empty for roots.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_id: String,
    /// Transfer target once the row is deleted; empty while live.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub moved_to: String,
    /// Opaque application bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
}

/// A type-table operation, carried as the JSON payload of a plugin
/// log. The row ID rides in the log's `record_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TypeTableOp {
    /// Creates a row.
    Add {
        /// Display label.
        label: String,
        /// Parent row ID; empty for a root.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        parent_id: String,
        /// Opaque application bytes.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        data: Vec<u8>,
    },
    /// Rewrites a row's label, parent and data.
    Change {
        /// New display label.
        label: String,
        /// New parent row ID; empty detaches to root.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        parent_id: String,
        /// New opaque bytes.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        data: Vec<u8>,
    },
    /// Transfers the row to `to_id` and tombstones it.
    Del {
        /// The row that absorbs this one.
        to_id: String,
    },
}

impl TypeTableOp {
    /// Wraps the operation into a plugin log for `record_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation cannot be encoded.
    pub fn into_log(self, record_id: &str) -> CoreResult<Log> {
        let op_type = match self {
            TypeTableOp::Add { .. } => OpType::Add,
            TypeTableOp::Change { .. } => OpType::Change,
            TypeTableOp::Del { .. } => OpType::Del,
        };

        Ok(Log {
            seq_id: SeqId::default(),
            op_type,
            record_id: record_id.to_string(),
            payload: serde_json::to_vec(&self)?,
            version_id: String::new(),
            new_version_id: String::new(),
            plugin_id: TYPE_TABLE_PLUGIN_ID.to_string(),
        })
    }
}

/// The type-table reducer.
#[derive(Debug, Default)]
pub struct TypeTableReducer {
    rows: BTreeMap<String, TypeRow>,
}

impl TypeTableReducer {
    /// Creates a reducer, seeded from prior snapshot records if given.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed cannot be decoded.
    pub fn new(seed: Option<&serde_json::Value>) -> CoreResult<Self> {
        let rows = match seed {
            Some(value) => serde_json::from_value(value.clone())?,
            None => BTreeMap::new(),
        };
        Ok(Self { rows })
    }

    /// Read access to the current rows.
    #[must_use]
    pub fn rows(&self) -> &BTreeMap<String, TypeRow> {
        &self.rows
    }

    fn has_live_children(&self, id: &str) -> bool {
        self.rows
            .iter()
            .any(|(rid, row)| rid != id && row.parent_id == id && row.moved_to.is_empty())
    }

    fn check_parent(&self, id: &str, parent_id: &str) -> CoreResult<&TypeRow> {
        if parent_id == id {
            return Err(CoreError::conflict(format!(
                "type {id:?} cannot be its own parent"
            )));
        }

        let parent = self
            .rows
            .get(parent_id)
            .ok_or_else(|| CoreError::not_exists(format!("parent type {parent_id:?} not found")))?;

        if !parent.moved_to.is_empty() {
            return Err(CoreError::conflict(format!(
                "parent type {parent_id:?} was transferred"
            )));
        }
        if !parent.parent_id.is_empty() {
            return Err(CoreError::conflict(format!(
                "parent type {parent_id:?} is itself a child"
            )));
        }

        Ok(parent)
    }

    fn check_label(&self, id: &str, label: &str) -> CoreResult<()> {
        for (rid, row) in &self.rows {
            if rid != id && row.label == label {
                return Err(CoreError::already_exists(format!(
                    "type label {label:?} already used by {rid:?}"
                )));
            }
        }
        Ok(())
    }

    fn add(&mut self, id: &str, label: String, parent_id: String, data: Vec<u8>) -> CoreResult<()> {
        if self.rows.contains_key(id) {
            return Err(CoreError::already_exists(format!(
                "type {id:?} already exists"
            )));
        }
        if !parent_id.is_empty() {
            self.check_parent(id, &parent_id)?;
        }
        self.check_label(id, &label)?;

        self.rows.insert(
            id.to_string(),
            TypeRow {
                label,
                parent_id,
                moved_to: String::new(),
                data,
            },
        );
        Ok(())
    }

    fn change(
        &mut self,
        id: &str,
        label: String,
        parent_id: String,
        data: Vec<u8>,
    ) -> CoreResult<()> {
        if !self.rows.contains_key(id) {
            return Err(CoreError::not_exists(format!("type {id:?} not found")));
        }

        if !parent_id.is_empty() {
            // A node with live children stays a root; anything else
            // would let the forest grow past depth two.
            if self.has_live_children(id) {
                return Err(CoreError::conflict(format!(
                    "type {id:?} has children and cannot get a parent"
                )));
            }
            self.check_parent(id, &parent_id)?;
        }
        self.check_label(id, &label)?;

        // Checked above.
        let row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| CoreError::logic("type row vanished"))?;
        row.label = label;
        row.parent_id = parent_id;
        row.data = data;
        Ok(())
    }

    fn del(&mut self, id: &str, to_id: &str) -> CoreResult<()> {
        if id == to_id {
            return Err(CoreError::conflict(format!(
                "type {id:?} cannot transfer to itself"
            )));
        }
        if !self.rows.contains_key(id) {
            return Err(CoreError::not_exists(format!("type {id:?} not found")));
        }

        let target = self
            .rows
            .get(to_id)
            .ok_or_else(|| CoreError::not_exists(format!("transfer target {to_id:?} not found")))?;
        if !target.moved_to.is_empty() {
            return Err(CoreError::conflict(format!(
                "transfer target {to_id:?} was itself transferred"
            )));
        }

        if self.has_live_children(id) {
            return Err(CoreError::conflict(format!(
                "type {id:?} still has children"
            )));
        }

        // Checked above.
        let row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| CoreError::logic("type row vanished"))?;
        row.moved_to = to_id.to_string();
        Ok(())
    }
}

impl PluginReducer for TypeTableReducer {
    fn id(&self) -> &str {
        TYPE_TABLE_PLUGIN_ID
    }

    fn apply_log(&mut self, log: &Log) -> CoreResult<()> {
        let op: TypeTableOp = serde_json::from_slice(&log.payload)?;
        match op {
            TypeTableOp::Add {
                label,
                parent_id,
                data,
            } => self.add(&log.record_id, label, parent_id, data),
            TypeTableOp::Change {
                label,
                parent_id,
                data,
            } => self.change(&log.record_id, label, parent_id, data),
            TypeTableOp::Del { to_id } => self.del(&log.record_id, &to_id),
        }
    }

    fn snapshot_data(&self) -> CoreResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.rows)?)
    }
}

/// Registers the type-table plugin in `registry`.
pub fn register_type_table(registry: &mut PluginRegistry) {
    registry.register(
        TYPE_TABLE_PLUGIN_ID,
        Box::new(|seed| Ok(Box::new(TypeTableReducer::new(seed)?))),
    );
}

//! The client-side record mirror.
//!
//! A mirror holds a local copy of the core records plus a catch-up
//! cursor. Edits happen locally first, get uploaded as logs, and come
//! back as their own echo on the next pull, which is when a row is
//! finally marked in sync. Version checks on pulled logs implement the
//! optimistic half of the concurrency story: a stale remote mutation
//! is simply skipped.

use crate::error::{ClientError, ClientResult};
use std::collections::BTreeMap;
use synclog_core::{Log, OpType, SnapshotData, Syncer, UpdateFlag};
use tracing::{debug, warn};
use uuid::Uuid;

/// One record as the mirror sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRow {
    /// Record ID.
    pub id: String,
    /// Last version confirmed by the log; empty for rows never
    /// uploaded.
    pub version: String,
    /// Where the row stands relative to the log.
    pub update_flag: UpdateFlag,
    /// Local tombstone awaiting upload.
    pub deleted: bool,
    /// Opaque value bytes.
    pub data: Vec<u8>,
}

/// A local mirror of the record set, synchronized through a [`Syncer`].
#[derive(Debug, Default)]
pub struct Mirror {
    rows: BTreeMap<String, LocalRow>,
    cursor: String,
    rejected: u64,
}

impl Mirror {
    /// Creates an empty mirror with no cursor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record locally and returns its fresh ID.
    ///
    /// The row starts as `WaitSync` with no version; it becomes
    /// durable on the next [`Mirror::upload`].
    pub fn add_record(&mut self, data: &[u8]) -> String {
        let id = Uuid::new_v4().simple().to_string();
        self.rows.insert(
            id.clone(),
            LocalRow {
                id: id.clone(),
                version: String::new(),
                update_flag: UpdateFlag::WaitSync,
                deleted: false,
                data: data.to_vec(),
            },
        );
        id
    }

    /// Replaces a record's value locally.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`], [`ClientError::AlreadyDeleted`],
    /// or [`ClientError::PendingUpload`] when the edit is inadmissible.
    pub fn modify_record(&mut self, id: &str, data: &[u8]) -> ClientResult<()> {
        let row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(id.to_string()))?;

        if row.deleted {
            return Err(ClientError::AlreadyDeleted(id.to_string()));
        }
        if row.update_flag == UpdateFlag::SyncToServer {
            return Err(ClientError::PendingUpload(id.to_string()));
        }

        row.update_flag = UpdateFlag::WaitSync;
        row.data = data.to_vec();
        Ok(())
    }

    /// Deletes a record locally.
    ///
    /// A row that never reached the log is removed outright; a durable
    /// one is tombstoned and uploaded as a `Del`.
    ///
    /// # Errors
    ///
    /// Same admissibility errors as [`Mirror::modify_record`].
    pub fn delete_record(&mut self, id: &str) -> ClientResult<()> {
        let row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(id.to_string()))?;

        if row.deleted {
            return Err(ClientError::AlreadyDeleted(id.to_string()));
        }
        if row.update_flag == UpdateFlag::SyncToServer {
            return Err(ClientError::PendingUpload(id.to_string()));
        }

        if row.version.is_empty() {
            self.rows.remove(id);
            return Ok(());
        }

        row.deleted = true;
        row.update_flag = UpdateFlag::WaitSync;
        Ok(())
    }

    /// Pushes every `WaitSync` row to the log and marks it
    /// `SyncToServer`. Returns the number of logs appended.
    ///
    /// The rows stay provisional until their echo arrives through
    /// [`Mirror::pull`].
    ///
    /// # Errors
    ///
    /// Returns the first append error; rows already pushed stay
    /// `SyncToServer` and are not re-sent.
    pub fn upload(&mut self, syncer: &Syncer) -> ClientResult<usize> {
        let pending: Vec<String> = self
            .rows
            .values()
            .filter(|row| row.update_flag == UpdateFlag::WaitSync)
            .map(|row| row.id.clone())
            .collect();

        let mut pushed = 0;
        for id in pending {
            // Still present; filtered above.
            let row = self
                .rows
                .get_mut(&id)
                .ok_or_else(|| ClientError::NotFound(id.clone()))?;

            if row.deleted {
                syncer.append_del_record_log(&row.id, &row.version)?;
            } else if row.version.is_empty() {
                syncer.append_add_record_log(&row.id, &row.data)?;
            } else {
                syncer.append_change_record_log(&row.id, &row.version, &row.data)?;
            }

            row.update_flag = UpdateFlag::SyncToServer;
            pushed += 1;
        }

        Ok(pushed)
    }

    /// Pulls every log after the cursor and applies it. Returns the
    /// number of logs consumed.
    ///
    /// The cursor advances over every consumed log, including skipped
    /// stale mutations and plugin logs the record mirror ignores.
    ///
    /// # Errors
    ///
    /// Returns an error if the catch-up read fails or a snapshot
    /// payload cannot be decoded.
    pub fn pull(&mut self, syncer: &Syncer) -> ClientResult<usize> {
        let logs = syncer.get_all_logs(&self.cursor)?;
        let consumed = logs.len();

        for log in logs {
            if log.is_plugin() {
                debug!(plugin = %log.plugin_id, "skipping plugin log");
            } else {
                self.apply(&log)?;
            }
            self.cursor = log.seq_id.encode();
        }

        Ok(consumed)
    }

    fn apply(&mut self, log: &Log) -> ClientResult<()> {
        match log.op_type {
            OpType::Snapshot => self.apply_snapshot(&log.payload)?,
            OpType::Add => self.apply_add(log),
            OpType::Change => self.apply_change(log),
            OpType::Del => self.apply_del(log),
        }
        Ok(())
    }

    /// Wholesale state replacement: the snapshot subsumes everything
    /// before it, local rows included.
    fn apply_snapshot(&mut self, payload: &[u8]) -> ClientResult<()> {
        let data: SnapshotData =
            serde_json::from_slice(payload).map_err(synclog_core::CoreError::from)?;

        self.rows = data
            .records
            .into_iter()
            .map(|record| {
                (
                    record.id.clone(),
                    LocalRow {
                        id: record.id,
                        version: record.version,
                        update_flag: record.update_flag,
                        deleted: record.deleted,
                        data: record.data,
                    },
                )
            })
            .collect();
        Ok(())
    }

    fn apply_add(&mut self, log: &Log) {
        if let Some(row) = self.rows.get(&log.record_id) {
            if row.update_flag == UpdateFlag::SyncDone {
                warn!(id = %log.record_id, "add echo for a record already in sync, skipping");
                self.rejected += 1;
                return;
            }
        }

        self.rows.insert(
            log.record_id.clone(),
            LocalRow {
                id: log.record_id.clone(),
                version: log.new_version_id.clone(),
                update_flag: UpdateFlag::SyncDone,
                deleted: false,
                data: log.payload.clone(),
            },
        );
    }

    fn apply_change(&mut self, log: &Log) {
        let Some(row) = self.rows.get_mut(&log.record_id) else {
            warn!(id = %log.record_id, "change for an unknown record, skipping");
            self.rejected += 1;
            return;
        };

        if row.update_flag == UpdateFlag::SyncDone && row.version != log.version_id {
            debug!(id = %log.record_id, "stale change, skipping");
            self.rejected += 1;
            return;
        }

        row.version = log.new_version_id.clone();
        row.update_flag = UpdateFlag::SyncDone;
        row.deleted = false;
        row.data = log.payload.clone();
    }

    fn apply_del(&mut self, log: &Log) {
        let Some(row) = self.rows.get(&log.record_id) else {
            warn!(id = %log.record_id, "delete for an unknown record, skipping");
            self.rejected += 1;
            return;
        };

        if row.update_flag == UpdateFlag::SyncDone && row.version != log.version_id {
            debug!(id = %log.record_id, "stale delete, skipping");
            self.rejected += 1;
            return;
        }

        self.rows.remove(&log.record_id);
    }

    /// The rows as currently mirrored.
    #[must_use]
    pub fn rows(&self) -> &BTreeMap<String, LocalRow> {
        &self.rows
    }

    /// One row by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&LocalRow> {
        self.rows.get(id)
    }

    /// The catch-up cursor: the sequence ID of the last consumed log,
    /// or empty before the first pull.
    #[must_use]
    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    /// Number of pulled logs skipped as conflicting or stale.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Whether two mirrors converged to the same record state.
    #[must_use]
    pub fn same_state(&self, other: &Mirror) -> bool {
        self.rows == other.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use synclog_core::{MemoryStorage, PluginRegistry, SyncStorage};

    fn syncer(capacity: u64) -> Syncer {
        let store = Arc::new(MemoryStorage::new(PluginRegistry::new()));
        Syncer::new(store as Arc<dyn SyncStorage>, capacity).unwrap()
    }

    #[test]
    fn local_lifecycle_before_any_upload() {
        let mut mirror = Mirror::new();

        let id = mirror.add_record(b"v0");
        assert_eq!(mirror.get(&id).unwrap().update_flag, UpdateFlag::WaitSync);

        mirror.modify_record(&id, b"v1").unwrap();
        assert_eq!(mirror.get(&id).unwrap().data, b"v1");

        // A never-uploaded row disappears on delete.
        mirror.delete_record(&id).unwrap();
        assert!(mirror.get(&id).is_none());

        assert!(matches!(
            mirror.modify_record(&id, b"x").unwrap_err(),
            ClientError::NotFound(_)
        ));
    }

    #[test]
    fn upload_then_pull_confirms_rows() {
        let s = syncer(10);
        let mut mirror = Mirror::new();

        let id = mirror.add_record(b"hello");
        assert_eq!(mirror.upload(&s).unwrap(), 1);
        assert_eq!(mirror.get(&id).unwrap().update_flag, UpdateFlag::SyncToServer);

        assert_eq!(mirror.pull(&s).unwrap(), 1);
        let row = mirror.get(&id).unwrap();
        assert_eq!(row.update_flag, UpdateFlag::SyncDone);
        assert!(!row.version.is_empty());
    }

    #[test]
    fn edits_blocked_while_upload_in_flight() {
        let s = syncer(10);
        let mut mirror = Mirror::new();

        let id = mirror.add_record(b"hello");
        mirror.upload(&s).unwrap();

        assert!(matches!(
            mirror.modify_record(&id, b"x").unwrap_err(),
            ClientError::PendingUpload(_)
        ));
        assert!(matches!(
            mirror.delete_record(&id).unwrap_err(),
            ClientError::PendingUpload(_)
        ));

        mirror.pull(&s).unwrap();
        mirror.modify_record(&id, b"x").unwrap();
    }

    #[test]
    fn delete_round_trip_removes_the_row() {
        let s = syncer(10);
        let mut mirror = Mirror::new();

        let id = mirror.add_record(b"hello");
        mirror.upload(&s).unwrap();
        mirror.pull(&s).unwrap();

        mirror.delete_record(&id).unwrap();
        assert!(mirror.get(&id).unwrap().deleted);

        mirror.upload(&s).unwrap();
        mirror.pull(&s).unwrap();
        assert!(mirror.get(&id).is_none());

        assert!(matches!(
            mirror.delete_record(&id).unwrap_err(),
            ClientError::NotFound(_)
        ));
    }

    #[test]
    fn stale_remote_change_is_skipped() {
        let s = syncer(10);
        let mut alice = Mirror::new();
        let mut bob = Mirror::new();

        let id = alice.add_record(b"base");
        alice.upload(&s).unwrap();
        alice.pull(&s).unwrap();
        bob.pull(&s).unwrap();
        assert!(alice.same_state(&bob));

        // Both edit from the same version; Alice wins the upload race.
        let stale_version = bob.get(&id).unwrap().version.clone();
        alice.modify_record(&id, b"alice").unwrap();
        alice.upload(&s).unwrap();
        alice.pull(&s).unwrap();

        // Bob's change carries the outdated version.
        s.append_change_record_log(&id, &stale_version, b"bob")
            .unwrap();

        // Alice pulled her own echo already; Bob's stale change does
        // not displace it.
        let before = alice.get(&id).unwrap().clone();
        alice.pull(&s).unwrap();
        assert_eq!(alice.get(&id).unwrap().data, before.data);
        assert_eq!(alice.rejected(), 1);
    }

    #[test]
    fn cursor_advances_over_plugin_logs() {
        let s = syncer(10);
        let mut mirror = Mirror::new();

        s.append_plugin_log(|| {
            Ok(Log {
                seq_id: synclog_core::SeqId::default(),
                op_type: OpType::Add,
                record_id: "t1".to_string(),
                payload: b"{}".to_vec(),
                version_id: String::new(),
                new_version_id: String::new(),
                plugin_id: "some-plugin".to_string(),
            })
        })
        .unwrap();

        assert_eq!(mirror.pull(&s).unwrap(), 1);
        assert!(mirror.rows().is_empty());

        // Nothing new: the plugin log is not refetched.
        assert_eq!(mirror.pull(&s).unwrap(), 0);
    }
}

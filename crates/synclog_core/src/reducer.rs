//! Reducers fold a log prefix into materialized state.
//!
//! The snapshot builder replays every log of a closed pool (on top of
//! the previous pool's export) through a reducer, then asks it for a
//! [`SnapshotData`] export. The engine appends logs without running
//! them through a reducer first; writers are expected to apply the
//! same rules against their own mirror, and a log the reducer rejects
//! during replay is skipped with its error recorded.

use crate::error::{CoreError, CoreResult};
use crate::log::{Log, OpType};
use crate::plugin::{PluginManager, PluginRegistry};
use crate::record::{RecordRow, SnapshotData, UpdateFlag};
use std::collections::HashMap;
use std::sync::Arc;

/// A fold over the operation log.
pub trait Reducer: Send {
    /// Applies an `Add` for a core record.
    fn apply_add(&mut self, record_id: &str, data: &[u8], new_version: &str) -> CoreResult<()>;

    /// Applies a `Change` for a core record.
    fn apply_change(
        &mut self,
        record_id: &str,
        version: &str,
        data: &[u8],
        new_version: &str,
    ) -> CoreResult<()>;

    /// Applies a `Del` for a core record.
    fn apply_del(&mut self, record_id: &str, version: &str) -> CoreResult<()>;

    /// Routes a plugin log to its plugin reducer.
    fn apply_plugin(&mut self, log: &Log) -> CoreResult<()>;

    /// Applies any log by dispatching on its kind.
    fn apply_log(&mut self, log: &Log) -> CoreResult<()> {
        if log.is_plugin() {
            return self.apply_plugin(log);
        }
        match log.op_type {
            OpType::Add => self.apply_add(&log.record_id, &log.payload, &log.new_version_id),
            OpType::Change => self.apply_change(
                &log.record_id,
                &log.version_id,
                &log.payload,
                &log.new_version_id,
            ),
            OpType::Del => self.apply_del(&log.record_id, &log.version_id),
            OpType::Snapshot => Err(CoreError::logic(
                "snapshot logs are synthetic and never replayed",
            )),
        }
    }

    /// Exports the materialized state.
    fn snapshot_data(&self) -> CoreResult<SnapshotData>;
}

/// The standard reducer: last-writer-wins rows keyed by record ID,
/// guarded by optimistic version checks, plus registry-routed plugins.
pub struct SnapshotReducer {
    records: HashMap<String, RecordRow>,
    // Logical apply-order clock; replay of the same prefix always
    // yields the same values.
    clock: u64,
    plugins: PluginManager,
}

impl SnapshotReducer {
    /// Creates a reducer seeded from `last`, the previous pool's
    /// export, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a seeded plugin constructor fails.
    pub fn new(registry: Arc<PluginRegistry>, last: Option<&SnapshotData>) -> CoreResult<Self> {
        let mut records = HashMap::new();
        let mut clock = 0;

        if let Some(data) = last {
            for row in &data.records {
                clock = clock.max(row.updated_at);
                records.insert(row.id.clone(), row.clone());
            }
        }

        let plugins = PluginManager::new(
            registry,
            last.map(|d| d.plugin_records.as_slice()).unwrap_or(&[]),
        )?;

        Ok(Self {
            records,
            clock,
            plugins,
        })
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

impl Reducer for SnapshotReducer {
    fn apply_add(&mut self, record_id: &str, data: &[u8], new_version: &str) -> CoreResult<()> {
        if let Some(row) = self.records.get(record_id) {
            if row.update_flag == UpdateFlag::SyncDone {
                return Err(CoreError::already_exists(format!(
                    "record {record_id:?} already exists"
                )));
            }
        }

        let updated_at = self.tick();
        self.records.insert(
            record_id.to_string(),
            RecordRow {
                id: record_id.to_string(),
                version: new_version.to_string(),
                update_flag: UpdateFlag::SyncDone,
                deleted: false,
                data: data.to_vec(),
                updated_at,
            },
        );
        Ok(())
    }

    fn apply_change(
        &mut self,
        record_id: &str,
        version: &str,
        data: &[u8],
        new_version: &str,
    ) -> CoreResult<()> {
        let current = self
            .records
            .get(record_id)
            .ok_or_else(|| CoreError::not_exists(format!("record {record_id:?} not found")))?;

        if current.update_flag == UpdateFlag::SyncDone && current.version != version {
            return Err(CoreError::conflict(format!(
                "record {record_id:?}: change against version {version:?}, current is {:?}",
                current.version
            )));
        }

        let updated_at = self.tick();
        let row = self
            .records
            .get_mut(record_id)
            .ok_or_else(|| CoreError::logic("record vanished during change"))?;

        row.version = new_version.to_string();
        row.update_flag = UpdateFlag::SyncDone;
        row.data = data.to_vec();
        row.updated_at = updated_at;
        Ok(())
    }

    fn apply_del(&mut self, record_id: &str, version: &str) -> CoreResult<()> {
        let row = self
            .records
            .get(record_id)
            .ok_or_else(|| CoreError::not_exists(format!("record {record_id:?} not found")))?;

        if row.update_flag == UpdateFlag::SyncDone && row.version != version {
            return Err(CoreError::conflict(format!(
                "record {record_id:?}: delete against version {version:?}, current is {:?}",
                row.version
            )));
        }

        self.records.remove(record_id);
        Ok(())
    }

    fn apply_plugin(&mut self, log: &Log) -> CoreResult<()> {
        self.plugins.apply(log)
    }

    fn snapshot_data(&self) -> CoreResult<SnapshotData> {
        let mut records: Vec<RecordRow> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));

        Ok(SnapshotData {
            records,
            plugin_records: self.plugins.snapshot_data()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reducer() -> SnapshotReducer {
        SnapshotReducer::new(Arc::new(PluginRegistry::new()), None).unwrap()
    }

    #[test]
    fn add_change_del_lifecycle() {
        let mut r = reducer();

        r.apply_add("a", b"1", "v1").unwrap();
        r.apply_change("a", "v1", b"2", "v2").unwrap();

        let data = r.snapshot_data().unwrap();
        assert_eq!(data.records.len(), 1);
        assert_eq!(data.records[0].version, "v2");
        assert_eq!(data.records[0].data, b"2");

        r.apply_del("a", "v2").unwrap();
        assert!(r.snapshot_data().unwrap().records.is_empty());
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut r = reducer();
        r.apply_add("a", b"1", "v1").unwrap();

        let err = r.apply_add("a", b"2", "v2").unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[test]
    fn change_missing_record_is_not_exists() {
        let mut r = reducer();
        assert!(r.apply_change("ghost", "v1", b"x", "v2").unwrap_err().is_not_exists());
        assert!(r.apply_del("ghost", "v1").unwrap_err().is_not_exists());
    }

    #[test]
    fn stale_version_is_conflict() {
        let mut r = reducer();
        r.apply_add("a", b"1", "v1").unwrap();
        r.apply_change("a", "v1", b"2", "v2").unwrap();

        assert!(r.apply_change("a", "v1", b"3", "v3").unwrap_err().is_conflict());
        assert!(r.apply_del("a", "v1").unwrap_err().is_conflict());

        // The current version still works.
        r.apply_del("a", "v2").unwrap();
    }

    #[test]
    fn export_is_deterministic_over_replay() {
        let logs = vec![
            Log::add("b", b"1", "v1".to_string()),
            Log::add("a", b"2", "v2".to_string()),
            Log::change("b", "v1", b"3", "v3".to_string()),
        ];

        let mut r1 = reducer();
        let mut r2 = reducer();
        for log in &logs {
            r1.apply_log(log).unwrap();
            r2.apply_log(log).unwrap();
        }

        let d1 = r1.snapshot_data().unwrap();
        let d2 = r2.snapshot_data().unwrap();
        assert_eq!(d1, d2);

        // Apply order, not ID order: "a" was touched before "b"'s change.
        assert_eq!(d1.records[0].id, "a");
        assert_eq!(d1.records[1].id, "b");
    }

    #[test]
    fn seeding_resumes_the_clock() {
        let mut r = reducer();
        r.apply_add("a", b"1", "v1").unwrap();
        r.apply_add("b", b"2", "v2").unwrap();
        let first = r.snapshot_data().unwrap();

        let mut seeded =
            SnapshotReducer::new(Arc::new(PluginRegistry::new()), Some(&first)).unwrap();
        seeded.apply_change("a", "v1", b"3", "v3").unwrap();

        let data = seeded.snapshot_data().unwrap();
        // "a" now sorts after "b": its change happened later.
        assert_eq!(data.records[0].id, "b");
        assert_eq!(data.records[1].id, "a");
        assert!(data.records[1].updated_at > data.records[0].updated_at);
    }

    #[test]
    fn snapshot_log_never_replays() {
        let mut r = reducer();
        let log = Log::snapshot(crate::seq::SeqId::new(5), Vec::new());
        assert!(matches!(r.apply_log(&log).unwrap_err(), CoreError::Logic(_)));
    }
}

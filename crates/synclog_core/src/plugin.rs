//! Plugin reducers: open, registry-driven log interpretation.
//!
//! A plugin reducer owns the materialized state for one named log
//! namespace. The engine routes logs to it by `plugin_id` and never
//! inspects the payload; plugins define their own operations and their
//! own compacted representation.

use crate::error::{CoreError, CoreResult};
use crate::log::Log;
use crate::record::PluginSnapshotData;
use std::collections::HashMap;
use std::sync::Arc;

/// A replay target for one plugin's logs.
pub trait PluginReducer: Send {
    /// The plugin's registry ID.
    fn id(&self) -> &str;

    /// Applies one log to the plugin's state.
    fn apply_log(&mut self, log: &Log) -> CoreResult<()>;

    /// Exports the plugin's compacted state.
    fn snapshot_data(&self) -> CoreResult<serde_json::Value>;
}

/// Constructor for a plugin reducer, given the plugin's records from
/// the previous snapshot (if any).
pub type PluginConstructor =
    Box<dyn Fn(Option<&serde_json::Value>) -> CoreResult<Box<dyn PluginReducer>> + Send + Sync>;

/// A mapping from plugin ID to reducer constructor, supplied at
/// startup.
///
/// Lookup is always by string key; the engine never inspects plugin
/// state or payloads.
#[derive(Default)]
pub struct PluginRegistry {
    constructors: HashMap<String, PluginConstructor>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under `id`, replacing any previous one.
    pub fn register(&mut self, id: impl Into<String>, constructor: PluginConstructor) {
        self.constructors.insert(id.into(), constructor);
    }

    /// Returns true if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    fn construct(
        &self,
        id: &str,
        seed: Option<&serde_json::Value>,
    ) -> CoreResult<Box<dyn PluginReducer>> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| CoreError::not_exists(format!("plugin {id:?} is not registered")))?;
        constructor(seed)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Live plugin instances for one reducer pass.
///
/// Every registered plugin that carried state in the previous snapshot
/// is instantiated up front so its state survives into the next export
/// even if no new log touches it. Plugins first seen through a log are
/// created on demand.
pub(crate) struct PluginManager {
    registry: Arc<PluginRegistry>,
    active: HashMap<String, Box<dyn PluginReducer>>,
}

impl PluginManager {
    pub(crate) fn new(
        registry: Arc<PluginRegistry>,
        last: &[PluginSnapshotData],
    ) -> CoreResult<Self> {
        let mut active = HashMap::new();

        for data in last {
            if !registry.contains(&data.id) {
                // State for a plugin this process doesn't know; it is
                // carried in the raw log, so skipping here loses
                // nothing durable.
                tracing::warn!(plugin = %data.id, "dropping snapshot state of unregistered plugin");
                continue;
            }
            let reducer = registry.construct(&data.id, Some(&data.records))?;
            active.insert(data.id.clone(), reducer);
        }

        Ok(Self { registry, active })
    }

    pub(crate) fn apply(&mut self, log: &Log) -> CoreResult<()> {
        if !self.active.contains_key(&log.plugin_id) {
            let reducer = self.registry.construct(&log.plugin_id, None)?;
            self.active.insert(log.plugin_id.clone(), reducer);
        }

        // Just inserted above when absent.
        let reducer = self
            .active
            .get_mut(&log.plugin_id)
            .ok_or_else(|| CoreError::logic("plugin vanished from manager"))?;
        reducer.apply_log(log)
    }

    pub(crate) fn snapshot_data(&self) -> CoreResult<Vec<PluginSnapshotData>> {
        let mut records: Vec<PluginSnapshotData> = Vec::with_capacity(self.active.len());
        for reducer in self.active.values() {
            records.push(PluginSnapshotData {
                id: reducer.id().to_string(),
                records: reducer.snapshot_data()?,
            });
        }

        // Deterministic export order.
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::OpType;
    use crate::seq::SeqId;

    /// Counts the logs it sees; snapshot is the count.
    struct CountingPlugin {
        id: String,
        count: u64,
    }

    impl PluginReducer for CountingPlugin {
        fn id(&self) -> &str {
            &self.id
        }

        fn apply_log(&mut self, _log: &Log) -> CoreResult<()> {
            self.count += 1;
            Ok(())
        }

        fn snapshot_data(&self) -> CoreResult<serde_json::Value> {
            Ok(serde_json::json!(self.count))
        }
    }

    fn counting_registry(id: &str) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        let plugin_id = id.to_string();
        registry.register(
            id,
            Box::new(move |seed| {
                let count = seed.and_then(|v| v.as_u64()).unwrap_or(0);
                Ok(Box::new(CountingPlugin {
                    id: plugin_id.clone(),
                    count,
                }))
            }),
        );
        registry
    }

    fn plugin_log(plugin_id: &str) -> Log {
        Log {
            seq_id: SeqId::default(),
            op_type: OpType::Add,
            record_id: "r".to_string(),
            payload: Vec::new(),
            version_id: String::new(),
            new_version_id: String::new(),
            plugin_id: plugin_id.to_string(),
        }
    }

    #[test]
    fn unknown_plugin_is_not_exists() {
        let registry = Arc::new(PluginRegistry::new());
        let mut manager = PluginManager::new(registry, &[]).unwrap();

        let err = manager.apply(&plugin_log("ghost")).unwrap_err();
        assert!(err.is_not_exists());
    }

    #[test]
    fn lazy_instantiation_and_export() {
        let registry = Arc::new(counting_registry("counter"));
        let mut manager = PluginManager::new(registry, &[]).unwrap();

        manager.apply(&plugin_log("counter")).unwrap();
        manager.apply(&plugin_log("counter")).unwrap();

        let records = manager.snapshot_data().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "counter");
        assert_eq!(records[0].records, serde_json::json!(2));
    }

    #[test]
    fn seeded_state_survives_without_new_logs() {
        let registry = Arc::new(counting_registry("counter"));
        let last = vec![PluginSnapshotData {
            id: "counter".to_string(),
            records: serde_json::json!(7),
        }];
        let manager = PluginManager::new(registry, &last).unwrap();

        let records = manager.snapshot_data().unwrap();
        assert_eq!(records[0].records, serde_json::json!(7));
    }

    #[test]
    fn unregistered_seed_is_skipped() {
        let registry = Arc::new(counting_registry("counter"));
        let last = vec![PluginSnapshotData {
            id: "ghost".to_string(),
            records: serde_json::json!({"x": 1}),
        }];
        let manager = PluginManager::new(registry, &last).unwrap();
        assert!(manager.snapshot_data().unwrap().is_empty());
    }
}

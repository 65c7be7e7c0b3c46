//! Two mirrors syncing through one engine converge to the same state,
//! whatever their upload and pull cadences.

use std::sync::Arc;

use synclog_client::{ClientError, Mirror};
use synclog_core::{FileStorage, MemoryStorage, PluginRegistry, SyncStorage, Syncer};
use tempfile::tempdir;

fn memory_syncer(capacity: u64) -> Syncer {
    let store = Arc::new(MemoryStorage::new(PluginRegistry::new()));
    Syncer::new(store as Arc<dyn SyncStorage>, capacity).unwrap()
}

#[test]
fn two_mirrors_converge_with_different_cadences() {
    let s = memory_syncer(3);

    let mut c1 = Mirror::new();
    let mut c2 = Mirror::new();

    // c1 uploads eagerly, pulling after every batch.
    let r1 = c1.add_record(b"100");
    let r2 = c1.add_record(b"200");
    c1.upload(&s).unwrap();
    c1.pull(&s).unwrap();

    // c2 has seen nothing yet; one pull catches it up.
    c2.pull(&s).unwrap();
    assert!(c1.same_state(&c2));

    // c2 batches several edits before uploading.
    let r3 = c2.add_record(b"300");
    c2.modify_record(&r1, b"101").unwrap();
    c2.upload(&s).unwrap();
    c2.pull(&s).unwrap();

    c1.pull(&s).unwrap();
    assert!(c1.same_state(&c2));

    assert_eq!(c1.get(&r1).unwrap().data, b"101");
    assert_eq!(c1.get(&r2).unwrap().data, b"200");
    assert_eq!(c1.get(&r3).unwrap().data, b"300");

    // A delete from c1 reaches c2 the same way.
    c1.delete_record(&r2).unwrap();
    c1.upload(&s).unwrap();
    c1.pull(&s).unwrap();
    c2.pull(&s).unwrap();

    assert!(c1.same_state(&c2));
    assert!(c2.get(&r2).is_none());
}

#[test]
fn concurrent_modify_resolves_first_writer_wins() {
    let s = memory_syncer(3);

    let mut c1 = Mirror::new();
    let mut c2 = Mirror::new();

    let id = c1.add_record(b"base");
    c1.upload(&s).unwrap();
    c1.pull(&s).unwrap();
    c2.pull(&s).unwrap();

    // Both edit the same version; c1 uploads first.
    c1.modify_record(&id, b"from-c1").unwrap();
    c2.modify_record(&id, b"from-c2").unwrap();

    c1.upload(&s).unwrap();
    c2.upload(&s).unwrap();

    c1.pull(&s).unwrap();
    c2.pull(&s).unwrap();

    // c1's change won; c2's carried a stale version and was skipped
    // everywhere, its own mirror included.
    assert!(c1.same_state(&c2));
    assert_eq!(c1.get(&id).unwrap().data, b"from-c1");
    assert_eq!(c2.rejected(), 1);

    // c2 can retry from the now-current version.
    c2.modify_record(&id, b"from-c2-retry").unwrap();
    c2.upload(&s).unwrap();
    c2.pull(&s).unwrap();
    c1.pull(&s).unwrap();

    assert!(c1.same_state(&c2));
    assert_eq!(c1.get(&id).unwrap().data, b"from-c2-retry");
}

#[test]
fn late_mirror_bootstraps_from_the_snapshot() {
    let s = memory_syncer(3);

    let mut c1 = Mirror::new();
    for i in 0..4 {
        c1.add_record(format!("value-{i}").as_bytes());
    }
    c1.upload(&s).unwrap();
    c1.pull(&s).unwrap();

    // Pool 0 is closed; compact it so the newcomer starts from the
    // snapshot instead of replaying every log.
    s.build_snapshot(0);

    let mut c2 = Mirror::new();
    // Snapshot head plus the one raw log after it.
    assert_eq!(c2.pull(&s).unwrap(), 2);

    assert!(c1.same_state(&c2));
    assert_eq!(c2.rows().len(), 4);
}

#[test]
fn rejected_local_edits_do_not_mutate_state() {
    let s = memory_syncer(3);
    let mut c = Mirror::new();

    let id = c.add_record(b"v0");
    c.upload(&s).unwrap();

    // Upload in flight: edits are refused and nothing changes.
    let before = c.get(&id).unwrap().clone();
    assert!(matches!(
        c.modify_record(&id, b"v1").unwrap_err(),
        ClientError::PendingUpload(_)
    ));
    assert_eq!(c.get(&id).unwrap(), &before);
}

#[test]
fn mirrors_converge_across_engine_restart() {
    let dir = tempdir().unwrap();

    let id;
    {
        let store = Arc::new(FileStorage::open(dir.path(), PluginRegistry::new()).unwrap());
        let s = Syncer::new(store as Arc<dyn SyncStorage>, 3).unwrap();

        let mut c1 = Mirror::new();
        id = c1.add_record(b"persisted");
        c1.upload(&s).unwrap();
        c1.pull(&s).unwrap();
    }

    let store = Arc::new(FileStorage::open(dir.path(), PluginRegistry::new()).unwrap());
    let s = Syncer::new(store as Arc<dyn SyncStorage>, 3).unwrap();

    let mut c2 = Mirror::new();
    c2.pull(&s).unwrap();
    assert_eq!(c2.get(&id).unwrap().data, b"persisted");
}

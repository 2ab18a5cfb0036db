//! End-to-end tests against a real store instance in a temp directory.

use localstore::{Engine, EngineConfig, EngineError, EngineState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        data_root: dir.join("store"),
        checkpoint_root: dir.join("checkpoints"),
        ..EngineConfig::default()
    }
}

fn open_engine(dir: &Path) -> Engine {
    open_engine_with(test_config(dir), None)
}

fn open_engine_with(config: EngineConfig, override_identity: Option<&str>) -> Engine {
    let _ = tracing_subscriber::fmt::try_init();
    let engine = Engine::open(config, &["m"], override_identity, Box::new(|_| true)).unwrap();
    engine.start().unwrap();
    engine
}

#[test]
fn test_put_get_and_missing_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    engine.do_put(&range, b"foo", b"bar").unwrap();
    assert_eq!(engine.get("m", b"foo").unwrap().as_deref(), Some(&b"bar"[..]));
    assert!(engine.exist("m", b"foo").unwrap());
    assert!(!engine.has_checkpoint("cp1").unwrap());

    engine.stop();
}

#[test]
fn test_checkpoint_isolation() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    engine.do_put(&range, b"k", b"v1").unwrap();
    engine.checkpoint("cp1").unwrap();
    assert!(engine.has_checkpoint("cp1").unwrap());

    engine.do_put(&range, b"k", b"v2").unwrap();
    engine.do_delete(&range, b"k").unwrap();
    engine.do_put(&range, b"k", b"v3").unwrap();

    // the live store moves on, the checkpoint stays frozen
    assert_eq!(engine.get("m", b"k").unwrap().as_deref(), Some(&b"v3"[..]));
    assert_eq!(
        engine.checkpoint_get("cp1", "m", b"k").unwrap().as_deref(),
        Some(&b"v1"[..])
    );

    engine.stop();
}

#[test]
fn test_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    engine.do_insert(&range, b"a", b"1").unwrap();
    assert_eq!(engine.get("m", b"a").unwrap().as_deref(), Some(&b"1"[..]));

    engine.do_put(&range, b"a", b"2").unwrap();
    engine.do_put(&range, b"a", b"3").unwrap();
    assert_eq!(engine.get("m", b"a").unwrap().as_deref(), Some(&b"3"[..]));

    engine.do_delete(&range, b"a").unwrap();
    assert_eq!(engine.get("m", b"a").unwrap(), None);

    for key in [&b"b1"[..], b"b2", b"b3", b"c1"] {
        engine.do_put(&range, key, b"x").unwrap();
    }
    engine
        .do_clear_sub_range(&range, Some(b"b"), Some(b"c"))
        .unwrap();
    assert_eq!(engine.get("m", b"b1").unwrap(), None);
    assert_eq!(engine.get("m", b"b2").unwrap(), None);
    assert_eq!(engine.get("m", b"b3").unwrap(), None);
    assert_eq!(engine.get("m", b"c1").unwrap().as_deref(), Some(&b"x"[..]));

    engine.stop();
}

#[test]
fn test_clear_range_open_ended() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    for key in [&b"a"[..], b"m", b"z"] {
        engine.do_put(&range, key, b"v").unwrap();
    }
    // both endpoints resolved from the store content; the last key is
    // covered through its upper bound
    engine.do_clear_sub_range(&range, None, None).unwrap();
    for key in [&b"a"[..], b"m", b"z"] {
        assert_eq!(engine.get("m", key).unwrap(), None);
    }

    // clearing an empty namespace is a no-op
    engine.do_clear_sub_range(&range, None, None).unwrap();

    engine.stop();
}

#[test]
fn test_batch_atomicity_and_abort() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    let batch = engine.start_batch().unwrap();
    engine.put(batch, &range, b"x", b"1").unwrap();
    engine.put(batch, &range, b"y", b"2").unwrap();
    // nothing visible until commit
    assert_eq!(engine.get("m", b"x").unwrap(), None);
    engine.end_batch(batch).unwrap();
    assert_eq!(engine.get("m", b"x").unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(engine.get("m", b"y").unwrap().as_deref(), Some(&b"2"[..]));

    let aborted = engine.start_batch().unwrap();
    engine.put(aborted, &range, b"z", b"3").unwrap();
    engine.abort_batch(aborted).unwrap();
    assert_eq!(engine.get("m", b"z").unwrap(), None);

    // the aborted batch id is gone for good
    assert!(matches!(
        engine.end_batch(aborted),
        Err(EngineError::UnknownBatch(_))
    ));

    engine.stop();
}

#[test]
fn test_empty_batch_commit_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    let batch = engine.start_batch().unwrap();
    // clearing an empty range records no mutation, so the batch stays empty
    engine.clear_sub_range(batch, &range, None, None).unwrap();
    engine.end_batch(batch).unwrap();
    assert_eq!(range.key_count(), 0);
    assert_eq!(range.tombstone_count(), 0);
    assert_eq!(range.delete_range_count(), 0);

    engine.stop();
}

#[test]
fn test_counter_accuracy() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    let batch = engine.start_batch().unwrap();
    engine.insert(batch, &range, b"i1", b"v").unwrap();
    engine.insert(batch, &range, b"i2", b"v").unwrap();
    engine.put(batch, &range, b"p1", b"v").unwrap();
    engine.delete(batch, &range, b"i1").unwrap();
    engine.end_batch(batch).unwrap();

    // inserts and puts count as keys; puts and deletes count as tombstones
    assert_eq!(range.key_count(), 3);
    assert_eq!(range.tombstone_count(), 2);
    assert_eq!(range.delete_range_count(), 0);

    engine.stop();
}

#[test]
fn test_trigger_fires_and_resets_counters() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        compact_min_tombstone_keys: 2,
        compact_tombstone_percent: 0.5,
        ..test_config(dir.path())
    };
    let engine = open_engine_with(config, None);
    let range = engine.new_key_range("m", None, None).unwrap();

    let batch = engine.start_batch().unwrap();
    for key in [&b"a"[..], b"b", b"c"] {
        engine.insert(batch, &range, key, b"v").unwrap();
    }
    engine.end_batch(batch).unwrap();
    assert_eq!(range.key_count(), 3);

    let batch = engine.start_batch().unwrap();
    for key in [&b"a"[..], b"b", b"c"] {
        engine.delete(batch, &range, key).unwrap();
    }
    engine.end_batch(batch).unwrap();

    // 3 tombstones > 2 and 3/(3+3) >= 0.5: the trigger fired and reset
    // every counter, and it stays quiet until new batches accrue
    assert_eq!(range.key_count(), 0);
    assert_eq!(range.tombstone_count(), 0);
    assert_eq!(range.delete_range_count(), 0);

    engine.stop();
}

#[test]
fn test_iterator_respects_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    for key in [&b"a"[..], b"b", b"c", b"d"] {
        engine.do_put(&range, key, b"v").unwrap();
    }

    let mut it = engine.iterator("m", Some(b"b"), Some(b"d")).unwrap();
    it.seek_to_first();
    let mut keys = Vec::new();
    while it.is_valid() {
        keys.push(it.key().unwrap().to_vec());
        it.next();
    }
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);

    it.seek_to_last();
    assert_eq!(it.key(), Some(&b"c"[..]));
    it.seek(b"bb");
    assert_eq!(it.key(), Some(&b"c"[..]));
    it.seek_for_prev(b"bb");
    assert_eq!(it.key(), Some(&b"b"[..]));

    engine.stop();
}

#[test]
fn test_iterator_refresh_sees_new_writes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    engine.do_put(&range, b"a", b"v").unwrap();
    let mut it = engine.iterator("m", None, None).unwrap();
    it.seek_to_first();
    assert!(it.is_valid());

    engine.do_put(&range, b"b", b"v").unwrap();
    it.refresh();
    it.seek_to_last();
    assert_eq!(it.key(), Some(&b"b"[..]));

    engine.stop();
}

#[test]
fn test_checkpoint_iterator_and_size() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    engine.do_put(&range, b"k1", b"v1").unwrap();
    engine.do_put(&range, b"k2", b"v2").unwrap();
    engine.checkpoint("cp").unwrap();
    engine.do_delete(&range, b"k1").unwrap();

    let view = engine.checkpoint_view("cp").unwrap();
    let mut it = view.iterator("m", None, None).unwrap();
    it.seek_to_first();
    let mut keys = Vec::new();
    while it.is_valid() {
        keys.push(it.key().unwrap().to_vec());
        it.next();
    }
    assert_eq!(keys, vec![b"k1".to_vec(), b"k2".to_vec()]);

    assert!(engine.checkpoint_exist("cp", "m", b"k1").unwrap());
    // size estimation works against the frozen view (the estimate itself is
    // block-granular, so no lower bound is asserted for two tiny keys)
    engine
        .checkpoint_approximate_size("cp", "m", None, None)
        .unwrap();

    engine.stop();
}

#[test]
fn test_approximate_size() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        // with the WAL off, flush() forces memtables to disk so the size
        // estimate has files to look at
        disable_wal: Some(true),
        ..test_config(dir.path())
    };
    let engine = open_engine_with(config, None);
    let range = engine.new_key_range("m", None, None).unwrap();

    let batch = engine.start_batch().unwrap();
    let value = vec![7u8; 128];
    for i in 0..2000u32 {
        let key = format!("key{i:05}");
        engine.insert(batch, &range, key.as_bytes(), &value).unwrap();
    }
    engine.end_batch(batch).unwrap();
    engine.flush().unwrap();

    assert!(engine.approximate_size("m", None, None).unwrap() > 0);
    // degenerate and empty slices report zero
    assert_eq!(
        engine
            .approximate_size("m", Some(b"key"), Some(b"key"))
            .unwrap(),
        0
    );

    engine.stop();
}

#[test]
fn test_skip_lands_near_count() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    let batch = engine.start_batch().unwrap();
    for i in 0..500u32 {
        let key = format!("key{i:03}");
        engine.insert(batch, &range, key.as_bytes(), b"v").unwrap();
    }
    engine.end_batch(batch).unwrap();

    let split = engine.skip(&range, 250).unwrap();
    assert_eq!(&split[..], b"key250");

    // skipping past the end returns the last key seen
    let tail = engine.skip(&range, 10_000).unwrap();
    assert!(tail.starts_with(b"key"));

    engine.stop();
}

#[test]
fn test_identity_stable_across_restart() {
    let dir = tempfile::tempdir().unwrap();

    let engine = open_engine_with(test_config(dir.path()), Some("node-42"));
    assert_eq!(engine.id(), "node-42");
    engine.stop();
    drop(engine);

    // reopening without an override keeps the persisted identity
    let engine = open_engine_with(test_config(dir.path()), None);
    assert_eq!(engine.id(), "node-42");
    engine.stop();
}

#[test]
fn test_native_identity_stable_across_restart() {
    let dir = tempfile::tempdir().unwrap();

    let engine = open_engine(dir.path());
    let id = engine.id().to_string();
    assert!(!id.is_empty());
    engine.stop();
    drop(engine);

    let engine = open_engine(dir.path());
    assert_eq!(engine.id(), id);
    engine.stop();
}

#[test]
fn test_not_started_and_stopped_errors() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(test_config(dir.path()), &["m"], None, Box::new(|_| true)).unwrap();
    assert!(matches!(
        engine.get("m", b"k"),
        Err(EngineError::NotStarted)
    ));

    engine.start().unwrap();
    let range = engine.new_key_range("m", None, None).unwrap();
    engine.do_put(&range, b"k", b"v").unwrap();

    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(matches!(
        engine.get("m", b"k"),
        Err(EngineError::NotStarted)
    ));
    assert!(matches!(
        engine.checkpoint("cp"),
        Err(EngineError::NotStarted)
    ));
}

#[test]
fn test_unknown_namespace_and_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    assert!(matches!(
        engine.new_key_range("nope", None, None),
        Err(EngineError::UnknownNamespace(_))
    ));
    assert!(matches!(
        engine.checkpoint_get("missing", "m", b"k"),
        Err(EngineError::CheckpointNotFound(_))
    ));

    engine.stop();
}

#[test]
fn test_stop_drains_pending_compactions() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let range = engine.new_key_range("m", None, None).unwrap();

    let batch = engine.start_batch().unwrap();
    for i in 0..1000u32 {
        let key = format!("key{i:04}");
        engine.insert(batch, &range, key.as_bytes(), b"v").unwrap();
    }
    engine.end_batch(batch).unwrap();

    // a range delete always arms the trigger, queueing a compaction
    engine.do_clear_sub_range(&range, None, None).unwrap();
    assert_eq!(range.delete_range_count(), 0, "trigger fired and reset");

    // stop must wait for the in-flight compaction to settle
    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn test_checkpoint_gc_removes_unreferenced() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        gc_interval_secs: 2, // minimum deletion age of one second
        ..test_config(dir.path())
    };
    let _ = tracing_subscriber::fmt::try_init();
    let engine = Engine::open(
        config,
        &["m"],
        None,
        Box::new(|id: &str| id != "cp-drop"),
    )
    .unwrap();
    engine.start().unwrap();
    let range = engine.new_key_range("m", None, None).unwrap();

    engine.do_put(&range, b"k", b"v").unwrap();
    engine.checkpoint("cp-keep").unwrap();
    engine.checkpoint("cp-drop").unwrap();

    // wait past the minimum age and at least one GC pass
    std::thread::sleep(Duration::from_millis(4500));

    assert!(engine.has_checkpoint("cp-keep").unwrap());
    assert!(!engine.has_checkpoint("cp-drop").unwrap());

    engine.stop();
}

#[test]
fn test_concurrent_batches_from_multiple_threads() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(open_engine(dir.path()));

    let mut handles = Vec::new();
    for t in 0..4u32 {
        let engine = engine.clone();
        handles.push(std::thread::spawn(move || {
            let range = engine.new_key_range("m", None, None).unwrap();
            for i in 0..50u32 {
                let key = format!("t{t}-{i:03}");
                engine.do_put(&range, key.as_bytes(), b"v").unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4u32 {
        for i in 0..50u32 {
            let key = format!("t{t}-{i:03}");
            assert!(engine.get("m", key.as_bytes()).unwrap().is_some());
        }
    }

    engine.stop();
}

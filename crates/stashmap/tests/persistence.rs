//! Round-trip, compression, and background persistence tests against real
//! files in a temp directory.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use stashmap::{FormatError, Json, OrderedMap, SaveOptions, StoreError, SyncMap, FORMAT_VERSION, STORE_MAGIC};

fn compressed(level: u32) -> SaveOptions {
    SaveOptions {
        compress: true,
        compress_level: level,
    }
}

#[test]
fn test_round_trip_preserves_order_values_and_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ordered.bin");

    let original: OrderedMap<String, i64> = OrderedMap::with_limit_mb(1);
    original.set("one".to_string(), 1).unwrap();
    original.set("two".to_string(), 2).unwrap();
    original.set("three".to_string(), 3).unwrap();
    original.save(&path, SaveOptions::default()).unwrap();

    let restored: OrderedMap<String, i64> = OrderedMap::new();
    restored.load(&path).unwrap();

    assert_eq!(restored.len(), original.len());
    assert_eq!(restored.keys(), original.keys());
    assert_eq!(restored.values(), original.values());
    assert_eq!(restored.limit(), 1024 * 1024);
    assert_eq!(restored.total_size(), original.total_size());
}

#[test]
fn test_round_trip_empty_map() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.bin");

    let original: OrderedMap<String, String> = OrderedMap::new();
    original.save(&path, SaveOptions::default()).unwrap();

    let restored: OrderedMap<String, String> = OrderedMap::new();
    restored.set("leftover".to_string(), "gone".to_string()).unwrap();
    restored.load(&path).unwrap();
    assert!(restored.is_empty());
    assert_eq!(restored.keys(), Vec::<String>::new());
}

#[test]
fn test_round_trip_reproduces_update_in_place_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("updated.bin");

    let original: OrderedMap<String, i64> = OrderedMap::new();
    original.set("a".to_string(), 1).unwrap();
    original.set("b".to_string(), 2).unwrap();
    original.set("a".to_string(), 3).unwrap();
    assert_eq!(original.keys(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(original.get(&"a".to_string()), Some(3));

    original.save(&path, SaveOptions::default()).unwrap();
    let restored: OrderedMap<String, i64> = OrderedMap::new();
    restored.load(&path).unwrap();

    assert_eq!(restored.keys(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(restored.get(&"a".to_string()), Some(3));
    assert_eq!(restored.get(&"b".to_string()), Some(2));
}

#[test]
fn test_round_trip_many_entries_keeps_exact_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("many.bin");

    let original: OrderedMap<String, u64> = OrderedMap::new();
    for i in 0..500u64 {
        original.set(format!("key{}", i), i).unwrap();
    }
    // punch some holes so the arena has vacant slots at save time
    for i in (0..500u64).step_by(7) {
        original.delete(&format!("key{}", i));
    }
    original.save(&path, SaveOptions::default()).unwrap();

    let restored: OrderedMap<String, u64> = OrderedMap::new();
    restored.load(&path).unwrap();
    assert_eq!(restored.keys(), original.keys());
    assert_eq!(restored.values(), original.values());
}

#[test]
fn test_file_starts_with_magic_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("header.bin");

    let map: OrderedMap<String, i64> = OrderedMap::new();
    map.set("k".to_string(), 1).unwrap();
    map.save(&path, SaveOptions::default()).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], STORE_MAGIC);
    assert_eq!(
        u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        FORMAT_VERSION
    );
}

#[test]
fn test_save_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deep/nested/dir/map.bin");

    let map: OrderedMap<String, i64> = OrderedMap::new();
    map.set("k".to_string(), 1).unwrap();
    map.save(&path, SaveOptions::default()).unwrap();
    assert!(path.exists());
}

// ── Compression ──────────────────────────────────────────────────────────

#[test]
fn test_compressed_file_is_smaller_and_loads_transparently() {
    let dir = tempfile::tempdir().unwrap();
    let plain_path = dir.path().join("plain.bin");
    let gz_path = dir.path().join("compressed.bin");

    let map: OrderedMap<String, String> = OrderedMap::new();
    let value = "test data that should compress well ".repeat(1000);
    for i in 0..100 {
        map.set(format!("{}", i), value.clone()).unwrap();
    }

    map.save(&plain_path, SaveOptions::default()).unwrap();
    map.save(&gz_path, compressed(9)).unwrap();

    let plain_len = std::fs::metadata(&plain_path).unwrap().len();
    let gz_len = std::fs::metadata(&gz_path).unwrap().len();
    assert!(
        gz_len < plain_len,
        "compressed ({}) not smaller than plain ({})",
        gz_len,
        plain_len
    );

    // loader sniffs the gzip signature, no flag needed
    let restored: OrderedMap<String, String> = OrderedMap::new();
    restored.load(&gz_path).unwrap();
    assert_eq!(restored.len(), map.len());
    assert_eq!(restored.keys(), map.keys());
    assert_eq!(restored.get(&"0".to_string()), Some(value));
}

#[test]
fn test_higher_compression_level_shrinks_repetitive_data_more() {
    let dir = tempfile::tempdir().unwrap();
    let map: OrderedMap<String, String> = OrderedMap::new();
    let value = "test data that should compress well ".repeat(1000);
    for i in 0..100 {
        map.set(format!("{}", i), value.clone()).unwrap();
    }

    let fast = dir.path().join("level1.bin");
    let best = dir.path().join("level9.bin");
    map.save(&fast, compressed(1)).unwrap();
    map.save(&best, compressed(9)).unwrap();

    let fast_len = std::fs::metadata(&fast).unwrap().len();
    let best_len = std::fs::metadata(&best).unwrap().len();
    assert!(best_len <= fast_len);
}

#[test]
fn test_compress_level_zero_uses_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default_level.bin");

    let map: OrderedMap<String, String> = OrderedMap::new();
    map.set("k".to_string(), "v".repeat(4096)).unwrap();
    map.save(&path, compressed(0)).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    let restored: OrderedMap<String, String> = OrderedMap::new();
    restored.load(&path).unwrap();
    assert_eq!(restored.get(&"k".to_string()), Some("v".repeat(4096)));
}

// ── Failure paths ────────────────────────────────────────────────────────

#[test]
fn test_load_nonexistent_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let map: OrderedMap<String, i64> = OrderedMap::new();
    let err = map.load(dir.path().join("missing.bin")).unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
}

#[test]
fn test_load_bad_magic_keeps_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.bin");
    std::fs::write(&path, b"not a stash file at all").unwrap();

    let map: OrderedMap<String, i64> = OrderedMap::new();
    map.set("keep".to_string(), 1).unwrap();
    let err = map.load(&path).unwrap_err();
    assert!(matches!(err, StoreError::Format(FormatError::BadMagic)));
    assert_eq!(map.get(&"keep".to_string()), Some(1));
}

#[test]
fn test_load_unsupported_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.bin");
    let mut bytes = STORE_MAGIC.to_vec();
    bytes.extend_from_slice(&99u32.to_le_bytes());
    std::fs::write(&path, &bytes).unwrap();

    let map: OrderedMap<String, i64> = OrderedMap::new();
    let err = map.load(&path).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Format(FormatError::UnsupportedVersion(99))
    ));
}

#[test]
fn test_load_truncated_file_keeps_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.bin");

    let source: OrderedMap<String, String> = OrderedMap::new();
    for i in 0..20 {
        source.set(format!("key{}", i), "value".repeat(50)).unwrap();
    }
    source.save(&path, SaveOptions::default()).unwrap();

    let full = std::fs::read(&path).unwrap();
    std::fs::write(&path, &full[..full.len() / 2]).unwrap();

    let map: OrderedMap<String, String> = OrderedMap::new();
    map.set("keep".to_string(), "me".to_string()).unwrap();
    let err = map.load(&path).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Format(FormatError::Truncated { .. })
    ));
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&"keep".to_string()), Some("me".to_string()));
}

// ── Async persistence ────────────────────────────────────────────────────

#[test]
fn test_async_save_then_async_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("async.bin");

    let original: Arc<OrderedMap<String, i64>> = Arc::new(OrderedMap::with_limit_mb(1));
    original.set("one".to_string(), 1).unwrap();
    original.set("two".to_string(), 2).unwrap();
    original.set("three".to_string(), 3).unwrap();

    let save = original.save_async(&path, SaveOptions::default());
    save.wait().unwrap();

    let restored: Arc<OrderedMap<String, i64>> = Arc::new(OrderedMap::new());
    let load = restored.load_async(&path);
    load.wait().unwrap();

    assert_eq!(restored.keys(), original.keys());
    assert_eq!(restored.get(&"two".to_string()), Some(2));
    assert_eq!(restored.limit(), original.limit());
}

#[test]
fn test_async_task_reports_completion_and_progress() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.bin");

    let map: Arc<OrderedMap<String, String>> = Arc::new(OrderedMap::new());
    for i in 0..50 {
        map.set(format!("key{}", i), "payload".repeat(100)).unwrap();
    }

    let task = map.save_async(&path, compressed(0));
    while !task.is_done() {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(task.progress(), 100);
    task.wait().unwrap();
    assert!(path.exists());
}

#[test]
fn test_async_load_failure_lands_in_error_slot() {
    let dir = tempfile::tempdir().unwrap();
    let map: Arc<OrderedMap<String, i64>> = Arc::new(OrderedMap::new());
    let task = map.load_async(dir.path().join("missing.bin"));
    let err = task.wait().unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
}

#[test]
fn test_async_compressed_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("async_gz.bin");

    let original: Arc<OrderedMap<String, String>> = Arc::new(OrderedMap::new());
    let value = "test data that should compress well ".repeat(1000);
    for i in 0..100 {
        original.set(format!("{}", i), value.clone()).unwrap();
    }
    original.save_async(&path, compressed(9)).wait().unwrap();

    let restored: Arc<OrderedMap<String, String>> = Arc::new(OrderedMap::new());
    restored.load_async(&path).wait().unwrap();
    assert_eq!(restored.len(), original.len());
    assert_eq!(restored.get(&"0".to_string()), Some(value));
}

// ── SyncMap persistence ──────────────────────────────────────────────────

#[test]
fn test_sync_map_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.bin");

    let original: SyncMap<String, i64> = SyncMap::with_limit_mb(1);
    original.set("one".to_string(), 1).unwrap();
    original.set("two".to_string(), 2).unwrap();
    original.set("three".to_string(), 3).unwrap();
    original.save(&path, SaveOptions::default()).unwrap();

    let restored: SyncMap<String, i64> = SyncMap::new();
    restored.load(&path).unwrap();
    assert_eq!(restored.len(), 3);
    assert_eq!(restored.get(&"one".to_string()), Some(1));
    assert_eq!(restored.get(&"two".to_string()), Some(2));
    assert_eq!(restored.get(&"three".to_string()), Some(3));
    assert_eq!(restored.limit(), 1024 * 1024);
    assert_eq!(restored.total_size(), original.total_size());
}

#[test]
fn test_sync_map_async_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync_async.bin");

    let original: Arc<SyncMap<String, String>> = Arc::new(SyncMap::new());
    original.set("k".to_string(), "v".to_string()).unwrap();
    original.save_async(&path, SaveOptions::default()).wait().unwrap();

    let restored: Arc<SyncMap<String, String>> = Arc::new(SyncMap::new());
    restored.load_async(&path).wait().unwrap();
    assert_eq!(restored.get(&"k".to_string()), Some("v".to_string()));
}

// ── Structured values ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Endpoint {
    host: String,
    port: u16,
    retries: u32,
}

#[test]
fn test_json_values_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("endpoints.bin");

    let original: OrderedMap<String, Json<Endpoint>> = OrderedMap::with_limit_mb(1);
    original
        .set(
            "primary".to_string(),
            Json(Endpoint {
                host: "db-1.internal".to_string(),
                port: 5432,
                retries: 3,
            }),
        )
        .unwrap();
    original
        .set(
            "replica".to_string(),
            Json(Endpoint {
                host: "db-2.internal".to_string(),
                port: 5433,
                retries: 1,
            }),
        )
        .unwrap();
    original.save(&path, SaveOptions::default()).unwrap();

    let restored: OrderedMap<String, Json<Endpoint>> = OrderedMap::new();
    restored.load(&path).unwrap();
    assert_eq!(restored.keys(), vec!["primary".to_string(), "replica".to_string()]);
    let endpoint = restored.get(&"primary".to_string()).unwrap();
    assert_eq!(endpoint.0.host, "db-1.internal");
    assert_eq!(endpoint.0.port, 5432);
    assert_eq!(restored.total_size(), original.total_size());
}

#[test]
fn test_numeric_keys_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("numeric.bin");

    let original: OrderedMap<u64, String> = OrderedMap::new();
    for i in [9u64, 3, 7, 1] {
        original.set(i, format!("v{}", i)).unwrap();
    }
    original.save(&path, SaveOptions::default()).unwrap();

    let restored: OrderedMap<u64, String> = OrderedMap::new();
    restored.load(&path).unwrap();
    assert_eq!(restored.keys(), vec![9, 3, 7, 1]);
    assert_eq!(restored.get(&7), Some("v7".to_string()));
}

//! Tests for the storage backend.

use tempfile::TempDir;

use super::*;

/// Helper to create a temporary on-disk backend for testing.
fn temp_backend() -> (SqliteBackend, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("test_backend.db");
    let backend = SqliteBackend::open(&path).expect("failed to open backend");
    (backend, dir)
}

/// Big-endian key helper so ranges enumerate numerically.
fn key(n: u64) -> Vec<u8> {
    n.to_be_bytes().to_vec()
}

#[test]
fn test_create_backend() {
    let (backend, _dir) = temp_backend();

    let tx = backend.batch_tx();
    let (keys, values) = tx.range(b"missing", &key(0), &key(u64::MAX), 0).unwrap();
    assert!(keys.is_empty());
    assert!(values.is_empty());
}

#[test]
fn test_in_memory_backend() {
    let backend = SqliteBackend::in_memory().expect("failed to create in-memory backend");

    let mut tx = backend.batch_tx();
    tx.create_bucket(b"b").unwrap();
    tx.put(b"b", &key(1), b"one").unwrap();
    let (keys, values) = tx.range(b"b", &key(0), &key(u64::MAX), 0).unwrap();
    assert_eq!(keys, vec![key(1)]);
    assert_eq!(values, vec![b"one".to_vec()]);
}

#[test]
fn test_create_bucket_is_idempotent() {
    let (backend, _dir) = temp_backend();

    let mut tx = backend.batch_tx();
    tx.create_bucket(b"b").unwrap();
    tx.create_bucket(b"b").unwrap();
}

#[test]
fn test_put_overwrites() {
    let (backend, _dir) = temp_backend();

    let mut tx = backend.batch_tx();
    tx.create_bucket(b"b").unwrap();
    tx.put(b"b", &key(7), b"first").unwrap();
    tx.put(b"b", &key(7), b"second").unwrap();

    let (keys, values) = tx.range(b"b", &key(7), &key(7), 0).unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(values, vec![b"second".to_vec()]);
}

#[test]
fn test_range_is_ordered_and_inclusive() {
    let (backend, _dir) = temp_backend();

    let mut tx = backend.batch_tx();
    tx.create_bucket(b"b").unwrap();
    // Insert out of order; the scan must come back sorted.
    for n in [5u64, 1, 9, 3, 7] {
        tx.put(b"b", &key(n), format!("v{n}").as_bytes()).unwrap();
    }

    let (keys, values) = tx.range(b"b", &key(3), &key(7), 0).unwrap();
    assert_eq!(keys, vec![key(3), key(5), key(7)]);
    assert_eq!(
        values,
        vec![b"v3".to_vec(), b"v5".to_vec(), b"v7".to_vec()]
    );
}

#[test]
fn test_range_respects_limit() {
    let (backend, _dir) = temp_backend();

    let mut tx = backend.batch_tx();
    tx.create_bucket(b"b").unwrap();
    for n in 0u64..10 {
        tx.put(b"b", &key(n), b"v").unwrap();
    }

    let (keys, _) = tx.range(b"b", &key(0), &key(u64::MAX), 4).unwrap();
    assert_eq!(keys, vec![key(0), key(1), key(2), key(3)]);
}

#[test]
fn test_buckets_are_isolated() {
    let (backend, _dir) = temp_backend();

    let mut tx = backend.batch_tx();
    tx.create_bucket(b"a").unwrap();
    tx.create_bucket(b"b").unwrap();
    tx.put(b"a", &key(1), b"in-a").unwrap();
    tx.put(b"b", &key(1), b"in-b").unwrap();
    tx.delete(b"a", &key(1)).unwrap();

    let (keys_a, _) = tx.range(b"a", &key(0), &key(u64::MAX), 0).unwrap();
    let (keys_b, values_b) = tx.range(b"b", &key(0), &key(u64::MAX), 0).unwrap();
    assert!(keys_a.is_empty());
    assert_eq!(keys_b, vec![key(1)]);
    assert_eq!(values_b, vec![b"in-b".to_vec()]);
}

#[test]
fn test_delete_missing_key_is_noop() {
    let (backend, _dir) = temp_backend();

    let mut tx = backend.batch_tx();
    tx.create_bucket(b"b").unwrap();
    tx.delete(b"b", &key(42)).unwrap();
}

#[test]
fn test_writes_survive_reopen() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("test_backend.db");

    {
        let backend = SqliteBackend::open(&path).unwrap();
        let mut tx = backend.batch_tx();
        tx.create_bucket(b"b").unwrap();
        tx.put(b"b", &key(1), b"durable").unwrap();
        drop(tx);
        backend.force_commit().unwrap();
    }

    let backend = SqliteBackend::open(&path).unwrap();
    let tx = backend.batch_tx();
    let (keys, values) = tx.range(b"b", &key(0), &key(u64::MAX), 0).unwrap();
    assert_eq!(keys, vec![key(1)]);
    assert_eq!(values, vec![b"durable".to_vec()]);
}

#[test]
fn test_writes_visible_across_guards() {
    let (backend, _dir) = temp_backend();

    {
        let mut tx = backend.batch_tx();
        tx.create_bucket(b"b").unwrap();
        tx.put(b"b", &key(1), b"v").unwrap();
    }

    let tx = backend.batch_tx();
    let (keys, _) = tx.range(b"b", &key(0), &key(u64::MAX), 0).unwrap();
    assert_eq!(keys, vec![key(1)]);
}

#[test]
fn test_backend_is_shareable_across_threads() {
    use std::sync::Arc;
    use std::thread;

    let (backend, _dir) = temp_backend();
    let backend = Arc::new(backend);

    {
        let mut tx = backend.batch_tx();
        tx.create_bucket(b"b").unwrap();
    }

    let mut handles = Vec::new();
    for t in 0u64..4 {
        let backend = Arc::clone(&backend);
        handles.push(thread::spawn(move || {
            let mut tx = backend.batch_tx();
            tx.put(b"b", &key(t), b"v").unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let tx = backend.batch_tx();
    let (keys, _) = tx.range(b"b", &key(0), &key(u64::MAX), 0).unwrap();
    assert_eq!(keys.len(), 4);
}

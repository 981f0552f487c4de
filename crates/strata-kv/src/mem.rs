//! Ordered in-memory store.
//!
//! `MemStore` is the reference implementation of the [`KvStore`] contract.
//! It indexes synchronously, so `wait_for_indexing` is already satisfied by
//! the time a write call returns.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::{Cursor, KvStore};
use crate::types::{Key, KeyValue, WriteRef};

/// Maximum key size accepted by the in-memory store (16 KB).
pub const MAX_KEY_SIZE: usize = 16 * 1024;

/// An ordered in-memory key-value store.
#[derive(Debug)]
pub struct MemStore {
    entries: RwLock<BTreeMap<Key, Vec<u8>>>,
    next_ref: AtomicU64,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            next_ref: AtomicU64::new(1),
        }
    }

    /// Returns the number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_key(key: &Key) -> StoreResult<()> {
        if key.len() > MAX_KEY_SIZE {
            return Err(StoreError::KeyTooLarge(key.len()));
        }
        Ok(())
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let entries = self.entries.read();
        Ok(entries.get(&Key::from_bytes(key)).cloned())
    }

    fn set(&self, entry: KeyValue, wait_for_indexing: bool) -> StoreResult<WriteRef> {
        self.bulk_set(vec![entry], wait_for_indexing)
    }

    fn bulk_set(&self, batch: Vec<KeyValue>, _wait_for_indexing: bool) -> StoreResult<WriteRef> {
        for entry in &batch {
            Self::check_key(&entry.key)?;
        }
        let mut entries = self.entries.write();
        for entry in batch {
            entries.insert(entry.key, entry.value);
        }
        Ok(WriteRef(self.next_ref.fetch_add(1, Ordering::SeqCst)))
    }

    fn scan(&self, from: Key, to: Key, descending: bool) -> StoreResult<Box<dyn Cursor>> {
        if from >= to {
            return Err(StoreError::InvalidRange);
        }

        // Snapshot the range up front: the cursor sees every write that was
        // acknowledged before it was opened and none that follow.
        let entries = self.entries.read();
        let mut snapshot: Vec<(Key, Vec<u8>)> = entries
            .range((Bound::Included(from), Bound::Excluded(to)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        drop(entries);

        if descending {
            snapshot.reverse();
        }

        Ok(Box::new(MemCursor {
            snapshot,
            pos: 0,
            closed: false,
        }))
    }
}

/// Cursor over a snapshot of a `MemStore` range.
struct MemCursor {
    snapshot: Vec<(Key, Vec<u8>)>,
    pos: usize,
    closed: bool,
}

impl Cursor for MemCursor {
    fn next(&mut self) -> StoreResult<Option<(Key, Vec<u8>)>> {
        if self.closed || self.pos >= self.snapshot.len() {
            return Ok(None);
        }
        let entry = self.snapshot[self.pos].clone();
        self.pos += 1;
        Ok(Some(entry))
    }

    fn close(&mut self) {
        self.closed = true;
        self.snapshot.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &[u8], value: &[u8]) -> KeyValue {
        KeyValue::new(Key::from_bytes(key), value.to_vec())
    }

    #[test]
    fn test_set_get() {
        let store = MemStore::new();
        store.set(kv(b"a", b"1"), true).unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);
    }

    #[test]
    fn test_overwrite() {
        let store = MemStore::new();
        store.set(kv(b"a", b"1"), true).unwrap();
        store.set(kv(b"a", b"2"), true).unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_write_refs_monotonic() {
        let store = MemStore::new();
        let r1 = store.set(kv(b"a", b"1"), true).unwrap();
        let r2 = store
            .bulk_set(vec![kv(b"b", b"2"), kv(b"c", b"3")], true)
            .unwrap();
        assert!(r1 < r2);
    }

    #[test]
    fn test_scan_ascending() {
        let store = MemStore::new();
        for key in [b"b", b"d", b"a", b"c"] {
            store.set(kv(key, key), true).unwrap();
        }

        let mut cursor = store
            .scan(Key::from_bytes(b"a"), Key::from_bytes(b"d"), false)
            .unwrap();

        let mut keys = Vec::new();
        while let Some((k, _)) = cursor.next().unwrap() {
            keys.push(k.as_bytes().to_vec());
        }
        // Upper bound is exclusive
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_scan_descending() {
        let store = MemStore::new();
        for key in [b"a", b"b", b"c"] {
            store.set(kv(key, key), true).unwrap();
        }

        let mut cursor = store
            .scan(Key::from_bytes(b"a"), Key::from_bytes(b"z"), true)
            .unwrap();

        let mut keys = Vec::new();
        while let Some((k, _)) = cursor.next().unwrap() {
            keys.push(k.as_bytes().to_vec());
        }
        assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_scan_snapshot_isolation() {
        let store = MemStore::new();
        store.set(kv(b"a", b"1"), true).unwrap();

        let mut cursor = store
            .scan(Key::from_bytes(b"a"), Key::from_bytes(b"z"), false)
            .unwrap();

        // A write after the cursor was opened is not observed by it.
        store.set(kv(b"b", b"2"), true).unwrap();

        assert!(cursor.next().unwrap().is_some());
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn test_scan_invalid_range() {
        let store = MemStore::new();
        let result = store.scan(Key::from_bytes(b"z"), Key::from_bytes(b"a"), false);
        assert!(matches!(result, Err(StoreError::InvalidRange)));
    }

    #[test]
    fn test_cursor_close_idempotent() {
        let store = MemStore::new();
        store.set(kv(b"a", b"1"), true).unwrap();

        let mut cursor = store
            .scan(Key::from_bytes(b"a"), Key::from_bytes(b"z"), false)
            .unwrap();
        cursor.close();
        cursor.close();
        assert!(cursor.next().unwrap().is_none());
    }
}

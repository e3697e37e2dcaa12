//! The replicated log: entries applied by one replica.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One applied value.
///
/// `id` is allocated by the applying replica at first application. It
/// orders entries on that replica; it is not a cross-replica key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub value: String,
}

impl Entry {
    pub fn new(id: u64, value: impl Into<String>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {:?}", self.id, self.value)
    }
}

/// A replica's local log.
#[derive(Debug, Clone, Default)]
pub struct Board {
    indexed_entries: BTreeMap<u64, Entry>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, replacing any entry with the same id.
    pub fn add_entry(&mut self, entry: Entry) {
        self.indexed_entries.insert(entry.id, entry);
    }

    /// Entries sorted by id ascending.
    pub fn get_ordered_entries(&self) -> Vec<Entry> {
        self.indexed_entries.values().cloned().collect()
    }

    /// Values in id order.
    pub fn values(&self) -> Vec<String> {
        self.indexed_entries.values().map(|e| e.value.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.indexed_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed_entries.is_empty()
    }

    /// Hex SHA-256 of the canonical JSON array of ordered entries.
    ///
    /// Two replicas with the same ordered content report the same hash.
    pub fn content_hash(&self) -> String {
        let entries: Vec<&Entry> = self.indexed_entries.values().collect();
        // Serializing plain structs of u64/String cannot fail.
        let canonical = serde_json::to_vec(&entries).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_by_id_regardless_of_insertion() {
        let mut board = Board::new();
        board.add_entry(Entry::new(3, "c"));
        board.add_entry(Entry::new(1, "a"));
        board.add_entry(Entry::new(2, "b"));

        let ids: Vec<u64> = board.get_ordered_entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(board.values(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_hash_tracks_content() {
        let mut a = Board::new();
        let mut b = Board::new();
        assert_eq!(a.content_hash(), b.content_hash());

        a.add_entry(Entry::new(1, "x"));
        assert_ne!(a.content_hash(), b.content_hash());

        b.add_entry(Entry::new(1, "x"));
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }
}

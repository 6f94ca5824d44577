//! In-memory index of the data files backing one queue.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::ItemId;

/// Summary of one data file: the contiguous id range it covers plus item and
/// byte counts.
///
/// The active writer file is represented too; immediately after a rotation it
/// is empty, encoded as `tail_id == head_id - 1` with zero items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    /// Smallest item id in the file.
    pub head_id: ItemId,
    /// Largest item id in the file.
    pub tail_id: ItemId,
    /// Number of put records in the file.
    pub items: u64,
    /// Total payload bytes across the file's put records.
    pub bytes: u64,
}

/// Ordered map from a file's head id to its [`FileInfo`].
///
/// Adjacent entries tile the id space with no gaps and no overlap: each
/// file's head id is the previous file's tail id plus one.
#[derive(Debug, Default)]
pub struct FileIndex {
    entries: BTreeMap<ItemId, FileInfo>,
}

impl FileIndex {
    /// The file whose range contains `id`: the entry with the largest head
    /// id at or below `id`, or `None` when the index is empty or `id`
    /// precedes every file.
    pub fn file_for_id(&self, id: ItemId) -> Option<&FileInfo> {
        self.entries.range(..=id).next_back().map(|(_, info)| info)
    }

    /// All entries whose head id is at or after `id`, in id order.
    pub fn files_from(&self, id: ItemId) -> impl Iterator<Item = &FileInfo> {
        self.entries.range(id..).map(|(_, info)| info)
    }

    /// Smallest head id in the index, or zero when empty.
    pub fn earliest_head(&self) -> ItemId {
        self.entries
            .keys()
            .next()
            .copied()
            .unwrap_or(ItemId::ZERO)
    }

    pub fn insert(&mut self, info: FileInfo) {
        self.entries.insert(info.head_id, info);
    }

    pub fn remove(&mut self, head_id: ItemId) -> Option<FileInfo> {
        self.entries.remove(&head_id)
    }

    pub fn first(&self) -> Option<&FileInfo> {
        self.entries.values().next()
    }

    pub fn last(&self) -> Option<&FileInfo> {
        self.entries.values().next_back()
    }

    /// Mutable access to the active writer file's entry.
    pub fn last_mut(&mut self) -> Option<&mut FileInfo> {
        self.entries.values_mut().next_back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileInfo> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<FileInfo> {
        self.entries.values().cloned().collect()
    }
}

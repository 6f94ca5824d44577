//! Read-behind: a forward-only cursor that feeds a lagging reader from disk.

use tracing::debug;

use crate::config::ItemId;
use crate::error::{JournalError, JournalResult};
use crate::file::JournalFileReader;
use crate::index::FileIndex;
use crate::record::{QueueItem, Record};

/// Forward cursor over put records, crossing file boundaries as it goes.
///
/// The scanner opens its own file handles, separate from the active writer,
/// and never holds a lock between calls. Files it is reading can be archived
/// (renamed) underneath it; on POSIX the open handle stays valid. It stops
/// yielding once it has caught up with the journal tail.
pub(crate) struct Scanner {
    /// Id of the last item consumed by the scanner.
    id: ItemId,
    /// An item read during positioning that the first `next` call must
    /// yield.
    pending: Option<QueueItem>,
    file: Option<JournalFileReader>,
}

impl Scanner {
    /// Positions a scanner so that `next` yields the first item with an id
    /// greater than `from`.
    ///
    /// Falls back to the earliest file when `from` precedes the index, and
    /// comes up already exhausted when the covering file ends before any
    /// such item.
    pub fn start(from: ItemId, index: &FileIndex, tail: ItemId) -> JournalResult<Scanner> {
        let info = index
            .file_for_id(from)
            .or_else(|| index.first())
            .cloned();
        let Some(info) = info else {
            return Ok(Scanner::exhausted(tail));
        };
        let mut reader = JournalFileReader::open(&info.path)?;
        loop {
            match reader.next_record()? {
                Some((Record::Put(item), _)) if item.id >= from => {
                    debug!(
                        from = from.as_u64(),
                        path = %info.path.display(),
                        offset = reader.position(),
                        "read-behind positioned"
                    );
                    // an overshooting put is held back for the first `next`
                    // call; a put at exactly `from` is already consumed
                    let pending = (item.id != from).then_some(item);
                    return Ok(Scanner {
                        id: from,
                        pending,
                        file: Some(reader),
                    });
                }
                Some(_) => continue,
                None => return Ok(Scanner::exhausted(tail)),
            }
        }
    }

    fn exhausted(tail: ItemId) -> Scanner {
        Scanner {
            id: tail,
            pending: None,
            file: None,
        }
    }

    /// Yields the next put item, or `None` once the scanner has caught up
    /// with `tail`.
    ///
    /// An id the index no longer covers means a data file disappeared out
    /// from under the queue; that surfaces as [`JournalError::IdGap`] and is
    /// fatal for the owning reader's read-behind.
    pub fn next(&mut self, index: &FileIndex, tail: ItemId) -> JournalResult<Option<QueueItem>> {
        if let Some(item) = self.pending.take() {
            self.id = item.id;
            return Ok(Some(item));
        }
        loop {
            if self.id >= tail {
                self.file = None;
                return Ok(None);
            }
            let Some(reader) = self.file.as_mut() else {
                return Ok(None);
            };
            match reader.next_record()? {
                Some((Record::Put(item), _)) => {
                    self.id = item.id;
                    return Ok(Some(item));
                }
                Some(_) => continue,
                None => {
                    let next_id = self.id.next();
                    let Some(info) = index.file_for_id(next_id).cloned() else {
                        self.file = None;
                        return Err(JournalError::IdGap(next_id));
                    };
                    if info.tail_id < next_id {
                        self.file = None;
                        return Err(JournalError::IdGap(next_id));
                    }
                    if info.path == *reader.path() {
                        // the active file may have grown since this handle
                        // captured its length
                        if !reader.refresh_len()? {
                            self.file = None;
                            return Ok(None);
                        }
                    } else {
                        self.file = Some(JournalFileReader::open(&info.path)?);
                    }
                }
            }
        }
    }

    /// Id of the last item the scanner consumed.
    pub fn position(&self) -> ItemId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::JournalFileWriter;
    use crate::index::FileInfo;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, ids: std::ops::RangeInclusive<u64>) -> FileInfo {
        let path = dir.join(name);
        let mut writer = JournalFileWriter::create_new(&path).expect("create");
        let mut items = 0;
        let mut bytes = 0;
        for id in ids.clone() {
            let data = format!("item-{id}").into_bytes();
            bytes += data.len() as u64;
            writer
                .append_record(&Record::Put(QueueItem {
                    id: ItemId::new(id),
                    add_time_ms: id as i64,
                    expire_time_ms: None,
                    data,
                }))
                .expect("append");
            items += 1;
        }
        FileInfo {
            path,
            head_id: ItemId::new(*ids.start()),
            tail_id: ItemId::new(*ids.end()),
            items,
            bytes,
        }
    }

    #[test]
    fn scans_across_file_boundaries() {
        let tmp = TempDir::new().expect("tempdir");
        let mut index = FileIndex::default();
        index.insert(write_file(tmp.path(), "q.100", 1..=3));
        index.insert(write_file(tmp.path(), "q.200", 4..=6));
        let tail = ItemId::new(6);

        let mut scanner = Scanner::start(ItemId::new(2), &index, tail).expect("start");
        let mut seen = Vec::new();
        while let Some(item) = scanner.next(&index, tail).expect("next") {
            seen.push(item.id.as_u64());
        }
        assert_eq!(seen, [3, 4, 5, 6]);
        assert_eq!(scanner.position(), tail);
    }

    #[test]
    fn start_before_earliest_file_yields_everything() {
        let tmp = TempDir::new().expect("tempdir");
        let mut index = FileIndex::default();
        index.insert(write_file(tmp.path(), "q.100", 1..=2));
        let tail = ItemId::new(2);

        let mut scanner = Scanner::start(ItemId::ZERO, &index, tail).expect("start");
        let first = scanner.next(&index, tail).expect("next").expect("item");
        assert_eq!(first.id, ItemId::new(1));
        let second = scanner.next(&index, tail).expect("next").expect("item");
        assert_eq!(second.id, ItemId::new(2));
        assert!(scanner.next(&index, tail).expect("next").is_none());
    }

    #[test]
    fn start_past_tail_is_exhausted() {
        let tmp = TempDir::new().expect("tempdir");
        let mut index = FileIndex::default();
        index.insert(write_file(tmp.path(), "q.100", 1..=2));
        let tail = ItemId::new(2);

        let mut scanner = Scanner::start(ItemId::new(2), &index, tail).expect("start");
        assert!(scanner.next(&index, tail).expect("next").is_none());
    }

    #[test]
    fn id_gap_is_fatal() {
        let tmp = TempDir::new().expect("tempdir");
        let mut index = FileIndex::default();
        index.insert(write_file(tmp.path(), "q.100", 1..=3));
        // ids 4..=9 are missing: the next file starts at 10
        index.insert(write_file(tmp.path(), "q.200", 10..=12));
        let tail = ItemId::new(12);

        let mut scanner = Scanner::start(ItemId::new(1), &index, tail).expect("start");
        scanner.next(&index, tail).expect("next").expect("item 2");
        scanner.next(&index, tail).expect("next").expect("item 3");
        let err = scanner.next(&index, tail).unwrap_err();
        assert!(matches!(err, JournalError::IdGap(id) if id == ItemId::new(4)));
    }

    #[test]
    fn empty_index_is_exhausted() {
        let index = FileIndex::default();
        let mut scanner = Scanner::start(ItemId::ZERO, &index, ItemId::ZERO).expect("start");
        assert!(scanner.next(&index, ItemId::ZERO).expect("next").is_none());
    }
}

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::time::Duration;

/// Minimum data file size before rotation is considered (64 KiB).
///
/// Smaller files lead to excessive per-file metadata and frequent rotation.
const FILE_SIZE_MIN_LIMIT: u64 = 64 * 1024;

/// Default maximum data file size.
const DEFAULT_MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Default coalescing window for the fsync scheduler (milliseconds).
const DEFAULT_SYNC_DELAY_MS: u64 = 5;

/// Logical identifier for an item in the queue.
///
/// Item ids are assigned by the journal, start at 1, and increase by exactly
/// one per append. They are stable across restarts and recovery, and they
/// order items on disk.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl ItemId {
    /// The id below the first item ever appended.
    pub const ZERO: ItemId = ItemId(0);

    /// Creates a new item id from a raw u64 value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the item id as a u64.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next item id in sequence.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for ItemId {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ItemId> for u64 {
    #[inline]
    fn from(value: ItemId) -> Self {
        value.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Controls when appended records are fsynced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Fsync after every appended record.
    Always,
    /// Coalesce: one fsync is scheduled `delay_ms` after the first unsynced
    /// write and covers every write pending at that point.
    Coalesce { delay_ms: u64 },
    /// Never fsync explicitly; durability is left to the operating system.
    Never,
}

impl SyncPolicy {
    /// Maps a sync interval to a policy: zero means fsync on every write,
    /// `Duration::MAX` disables explicit fsyncs, anything else coalesces.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            SyncPolicy::Always
        } else if interval == Duration::MAX {
            SyncPolicy::Never
        } else {
            SyncPolicy::Coalesce {
                delay_ms: interval.as_millis().min(u64::MAX as u128) as u64,
            }
        }
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::Coalesce {
            delay_ms: DEFAULT_SYNC_DELAY_MS,
        }
    }
}

/// Primary configuration surface for one queue's journal.
///
/// `queue_dir` holds the rolling set of data files plus one small state file
/// per reader. `queue_name` prefixes every file the journal owns, so several
/// journals can share a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory holding the data and reader files for this queue.
    pub queue_dir: PathBuf,
    /// Queue name; used as the file name prefix.
    pub queue_name: String,
    /// Rotate the active data file once its size reaches this many bytes.
    pub max_file_size: u64,
    /// Fsync scheduling for appended records.
    pub sync: SyncPolicy,
    /// When set, fully consumed data files are moved here instead of deleted.
    pub archive_dir: Option<PathBuf>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            queue_dir: PathBuf::from("./data/journal"),
            queue_name: "queue".to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            sync: SyncPolicy::default(),
            archive_dir: None,
        }
    }
}

impl JournalConfig {
    /// Returns a copy of the configuration with out-of-range values clamped.
    ///
    /// A zero `max_file_size` falls back to the default, sizes below the
    /// floor are raised to it, and a zero-delay coalescing policy collapses
    /// to [`SyncPolicy::Always`].
    pub fn normalized(mut self) -> Self {
        if self.max_file_size == 0 {
            self.max_file_size = DEFAULT_MAX_FILE_SIZE;
        }
        self.max_file_size = self.max_file_size.max(FILE_SIZE_MIN_LIMIT);

        if let SyncPolicy::Coalesce { delay_ms: 0 } = self.sync {
            self.sync = SyncPolicy::Always;
        }

        self
    }
}

impl Display for JournalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JournalConfig(queue_dir={:?}, queue_name={}, max_file_size={}, sync={:?}, archive_dir={:?})",
            self.queue_dir, self.queue_name, self.max_file_size, self.sync, self.archive_dir
        )
    }
}

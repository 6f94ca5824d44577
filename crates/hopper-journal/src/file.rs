//! File handles over a single journal file, plus the durability cursor that
//! resolves append futures once an fsync has covered them.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::ItemId;
use crate::error::{JournalError, JournalResult};
use crate::record::Record;

const SYNC_RETRY_MAX_ATTEMPTS: u32 = 5;
const SYNC_RETRY_BASE_DELAY_MS: u64 = 5;
const SYNC_RETRY_MAX_DELAY_MS: u64 = 250;

/// Append handle over one journal file.
///
/// Writes go straight to the file in position order; the caller decides when
/// to fsync. The handle tracks its own byte position so rotation decisions
/// never have to stat the file.
pub(crate) struct JournalFileWriter {
    file: File,
    path: PathBuf,
    position: u64,
}

impl JournalFileWriter {
    /// Creates the file, failing if it already exists.
    pub fn create_new(path: &Path) -> JournalResult<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            position: 0,
        })
    }

    /// Opens an existing file and positions the handle at its end.
    pub fn open_append(path: &Path) -> JournalResult<Self> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let position = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            position,
        })
    }

    /// Appends one encoded record and returns the new end position.
    pub fn append_record(&mut self, record: &Record) -> JournalResult<u64> {
        let frame = record.encode()?;
        self.file.write_all(&frame)?;
        self.position += frame.len() as u64;
        Ok(self.position)
    }

    /// Fsyncs file contents without retrying.
    pub fn sync(&self) -> JournalResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Fsyncs file contents, retrying transient failures with a bounded
    /// backoff before giving up.
    pub fn sync_with_retry(&self) -> JournalResult<()> {
        let mut retries = 0u32;
        loop {
            match self.file.sync_data() {
                Ok(()) => {
                    if retries > 0 {
                        debug!(path = %self.path.display(), retries, "fsync succeeded after retries");
                    }
                    return Ok(());
                }
                Err(err) if retries < SYNC_RETRY_MAX_ATTEMPTS && is_retryable_io_error(&err) => {
                    retries += 1;
                    debug!(path = %self.path.display(), attempt = retries, error = %err, "retrying fsync");
                    thread::sleep(retry_backoff_delay(retries));
                }
                Err(err) => {
                    warn!(path = %self.path.display(), retries, error = %err, "fsync failed");
                    return Err(err.into());
                }
            }
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

fn retry_backoff_delay(retries: u32) -> Duration {
    let shift = retries.saturating_sub(1).min(6);
    let delay = SYNC_RETRY_BASE_DELAY_MS.saturating_mul(1u64 << shift);
    Duration::from_millis(delay.min(SYNC_RETRY_MAX_DELAY_MS))
}

fn is_retryable_io_error(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            return true;
        }
        _ => {}
    }
    if let Some(code) = err.raw_os_error() {
        if matches!(
            code,
            libc::EINTR | libc::EAGAIN | libc::EBUSY | libc::ETIMEDOUT
        ) {
            return true;
        }
    }
    false
}

/// One raw frame pulled off a journal file: tag, payload, and the byte
/// position of the frame start.
pub(crate) struct RawFrame {
    pub tag: u8,
    pub payload: Vec<u8>,
    pub start: u64,
}

/// Sequential read handle over one journal file.
///
/// The file length is captured at open so a partially written record at the
/// live tail is never mistaken for corruption; [`refresh_len`] picks up bytes
/// appended since.
///
/// [`refresh_len`]: JournalFileReader::refresh_len
pub(crate) struct JournalFileReader {
    reader: BufReader<File>,
    path: PathBuf,
    position: u64,
    file_len: u64,
}

impl JournalFileReader {
    pub fn open(path: &Path) -> JournalResult<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            position: 0,
            file_len,
        })
    }

    /// Reads the next frame, or `None` at a clean end of file. A length
    /// prefix that runs past the end of the file is corruption anchored at
    /// the frame start.
    pub fn next_frame(&mut self) -> JournalResult<Option<RawFrame>> {
        let start = self.position;
        if self.position >= self.file_len {
            return Ok(None);
        }
        if self.file_len - self.position < 4 {
            return Err(JournalError::corruption(
                start,
                "record length prefix truncated",
            ));
        }
        let length = self.reader.read_u32::<LittleEndian>()? as u64;
        if length < 1 {
            return Err(JournalError::corruption(
                start,
                "record length smaller than tag byte",
            ));
        }
        if length > self.file_len - self.position - 4 {
            return Err(JournalError::corruption(
                start,
                "record length extends past end of file",
            ));
        }
        let tag = self.reader.read_u8()?;
        let mut payload = vec![0u8; (length - 1) as usize];
        self.reader.read_exact(&mut payload)?;
        self.position += 4 + length;
        Ok(Some(RawFrame {
            tag,
            payload,
            start,
        }))
    }

    /// Reads and decodes the next record, returning it with its frame start
    /// position.
    pub fn next_record(&mut self) -> JournalResult<Option<(Record, u64)>> {
        match self.next_frame()? {
            Some(frame) => {
                let record = Record::decode(frame.tag, &frame.payload, frame.start)?;
                Ok(Some((record, frame.start)))
            }
            None => Ok(None),
        }
    }

    /// Re-stats the file; returns true if it grew since the length was last
    /// captured.
    pub fn refresh_len(&mut self) -> JournalResult<bool> {
        let len = self.reader.get_ref().metadata()?.len();
        let grew = len > self.file_len;
        self.file_len = len;
        Ok(grew)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Tracks the highest item id covered by a completed fsync.
///
/// There is one cursor per journal. Appends register their id with a
/// [`DurabilityTicket`]; the writer advances the cursor after each fsync
/// (or immediately, when explicit syncing is disabled), waking every ticket
/// the fsync covered. Because ids only grow, earlier tickets always resolve
/// no later than later ones.
pub struct DurabilityCursor {
    durable: AtomicU64,
    failure: Mutex<Option<String>>,
    notify: Notify,
}

impl DurabilityCursor {
    pub(crate) fn new(initial: ItemId) -> Self {
        Self {
            durable: AtomicU64::new(initial.as_u64()),
            failure: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Highest item id known to be durable.
    pub fn durable_id(&self) -> ItemId {
        ItemId::new(self.durable.load(Ordering::Acquire))
    }

    /// Records a write failure; every waiting ticket resolves with an error.
    pub(crate) fn mark_failed(&self, detail: String) {
        *self.failure.lock() = Some(detail);
        self.notify.notify_waiters();
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub(crate) fn mark_durable(&self, id: ItemId) {
        let previous = store_max(&self.durable, id.as_u64());
        if previous < id.as_u64() {
            self.notify.notify_waiters();
        }
    }
}

fn store_max(cell: &AtomicU64, value: u64) -> u64 {
    let mut current = cell.load(Ordering::Acquire);
    while current < value {
        match cell.compare_exchange(current, value, Ordering::AcqRel, Ordering::Acquire) {
            Ok(prev) => return prev,
            Err(observed) => current = observed,
        }
    }
    current
}

/// Completion handle for one appended item.
///
/// Resolves once an fsync covering the item's record has returned, per the
/// journal's sync policy. Dropping the ticket does not cancel the write.
#[derive(Clone)]
pub struct DurabilityTicket {
    cursor: Arc<DurabilityCursor>,
    id: ItemId,
}

impl DurabilityTicket {
    pub(crate) fn new(cursor: Arc<DurabilityCursor>, id: ItemId) -> Self {
        Self { cursor, id }
    }

    pub fn item_id(&self) -> ItemId {
        self.id
    }

    pub fn is_durable(&self) -> bool {
        self.cursor.durable_id() >= self.id
    }

    /// Waits until the item is durable, or fails if the journal hit a write
    /// error first.
    pub async fn wait(&self) -> JournalResult<()> {
        loop {
            let mut notified = pin!(self.cursor.notify.notified());
            notified.as_mut().enable();
            if self.cursor.durable_id() >= self.id {
                return Ok(());
            }
            if let Some(detail) = self.cursor.failure() {
                return Err(JournalError::Unhealthy(detail));
            }
            notified.await;
        }
    }
}

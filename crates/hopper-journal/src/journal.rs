//! Lifecycle of the file set for one queue: recovery scan on open, appends,
//! rotation, garbage collection, and reader management.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::config::{ItemId, JournalConfig, SyncPolicy};
use crate::error::{JournalError, JournalResult};
use crate::file::{DurabilityCursor, DurabilityTicket, JournalFileReader, JournalFileWriter};
use crate::index::{FileIndex, FileInfo};
use crate::metrics::{JournalMetrics, JournalMetricsSnapshot};
use crate::reader::Reader;
use crate::record::{QueueItem, Record};

/// State published by the writer task and observed by readers and scanners.
///
/// The index is only mutated under the writer task; readers take the lock
/// briefly and always see a self-consistent snapshot.
pub(crate) struct SharedState {
    tail: AtomicU64,
    pub(crate) index: RwLock<FileIndex>,
    healthy: AtomicBool,
    pub(crate) metrics: JournalMetrics,
}

impl SharedState {
    pub(crate) fn new(tail: ItemId, index: FileIndex, metrics: JournalMetrics) -> Self {
        Self {
            tail: AtomicU64::new(tail.as_u64()),
            index: RwLock::new(index),
            healthy: AtomicBool::new(true),
            metrics,
        }
    }

    /// Largest item id ever appended.
    pub(crate) fn tail_id(&self) -> ItemId {
        ItemId::new(self.tail.load(Ordering::Acquire))
    }

    fn publish_tail(&self, id: ItemId) {
        self.tail.store(id.as_u64(), Ordering::Release);
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn set_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
    }
}

/// Work items for the serialized writer task.
pub(crate) enum Command {
    Append {
        data: Vec<u8>,
        add_time_ms: i64,
        expire_time_ms: Option<i64>,
        reply: oneshot::Sender<JournalResult<(QueueItem, DurabilityTicket)>>,
    },
    WriteCheckpoint {
        path: PathBuf,
        head: ItemId,
        done: Vec<ItemId>,
        reply: oneshot::Sender<JournalResult<()>>,
    },
    Shutdown,
}

/// The journal for one queue: a rolling set of append-only data files keyed
/// by item id, plus one durable cursor file per named reader.
///
/// All journal-mutating work (appends, rotation, garbage collection,
/// checkpoint writes) runs on a single writer task owning the active file
/// handle, which gives a total order on appends without a coarse lock.
/// Readers and read-behind scanners observe published snapshots.
pub struct Journal {
    config: JournalConfig,
    shared: Arc<SharedState>,
    durability: Arc<DurabilityCursor>,
    readers: Arc<Mutex<HashMap<String, Arc<Reader>>>>,
    command_tx: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Journal {
    /// Opens (or creates) the journal under `config.queue_dir`.
    ///
    /// Startup replays the directory: checkpoint staging leftovers are
    /// deleted, every data file is scanned, a corrupted tail is repaired by
    /// truncation, files with no items are removed, and reader cursor files
    /// are loaded. The result is equivalent to a clean shutdown followed by
    /// recovery.
    pub fn open(config: JournalConfig) -> JournalResult<Journal> {
        validate_config(&config)?;
        fs::create_dir_all(&config.queue_dir)?;

        let metrics = JournalMetrics::default();
        let (data_files, reader_files) = discover_files(&config)?;

        let mut index = FileIndex::default();
        for path in &data_files {
            match scan_data_file(path, &metrics)? {
                Some(info) => index.insert(info),
                None => {
                    debug!(path = %path.display(), "removing journal file with no items");
                    fs::remove_file(path)?;
                }
            }
        }

        let (writer, tail_id, current_items, current_bytes) = match index.last() {
            Some(last) => (
                Some(JournalFileWriter::open_append(&last.path)?),
                last.tail_id,
                last.items,
                last.bytes,
            ),
            None => (None, ItemId::ZERO, 0, 0),
        };

        let shared = Arc::new(SharedState::new(tail_id, index, metrics));
        let durability = Arc::new(DurabilityCursor::new(tail_id));
        let readers: Arc<Mutex<HashMap<String, Arc<Reader>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (command_tx, command_rx) = unbounded();

        let mut core = WriterCore {
            config: config.clone(),
            shared: shared.clone(),
            durability: durability.clone(),
            readers: readers.clone(),
            writer,
            tail_id,
            current_items,
            current_bytes,
            sync_deadline: None,
        };
        if core.writer.is_none() {
            core.rotate()?;
        }

        {
            let mut map = readers.lock();
            for (name, path) in reader_files {
                let reader = Arc::new(Reader::new(
                    name.clone(),
                    path.clone(),
                    ItemId::ZERO,
                    shared.clone(),
                    command_tx.clone(),
                ));
                match reader.read_state() {
                    Ok(()) => {
                        map.insert(name, reader);
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable reader state file");
                    }
                }
            }
            if map.is_empty() {
                let path = reader_file_path(&config, "");
                let reader = Arc::new(Reader::new(
                    String::new(),
                    path.clone(),
                    tail_id,
                    shared.clone(),
                    command_tx.clone(),
                ));
                write_reader_file(&path, tail_id, &[])?;
                shared.metrics.incr_checkpoint();
                map.insert(String::new(), reader);
                debug!(queue = %config.queue_name, head = tail_id.as_u64(), "created default reader");
            } else if map.len() >= 2 {
                // a named reader supersedes the auto-created default
                if let Some(default) = map.remove("") {
                    let path = default.path();
                    if let Err(err) = fs::remove_file(&path) {
                        if err.kind() != io::ErrorKind::NotFound {
                            warn!(path = %path.display(), error = %err, "failed to delete superseded default reader file");
                        }
                    }
                    debug!(queue = %config.queue_name, "dropped default reader superseded by named readers");
                }
            }
        }

        let worker = thread::Builder::new()
            .name(format!("journal-{}", config.queue_name))
            .spawn(move || core.run(command_rx))?;

        Ok(Journal {
            config,
            shared,
            durability,
            readers,
            command_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Appends one item and returns it together with its durability ticket.
    ///
    /// The id is assigned by the writer task, so ids, on-disk order, and the
    /// order in which durability resolves all agree.
    pub async fn append(
        &self,
        data: Vec<u8>,
        add_time_ms: i64,
        expire_time_ms: Option<i64>,
    ) -> JournalResult<(QueueItem, DurabilityTicket)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Append {
                data,
                add_time_ms,
                expire_time_ms,
                reply: reply_tx,
            })
            .map_err(|_| JournalError::Closed)?;
        reply_rx.await.map_err(|_| JournalError::Closed)?
    }

    /// Returns the reader with the given name, creating it at the current
    /// tail when it does not exist yet.
    ///
    /// The first named reader absorbs the auto-created default reader: the
    /// default's cursor is checkpointed under the new name and its old state
    /// file is deleted.
    pub fn reader(&self, name: &str) -> JournalResult<Arc<Reader>> {
        if name.contains('~') || name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
            return Err(JournalError::invalid_config(format!(
                "reader name {name:?} contains reserved characters"
            )));
        }
        let mut map = self.readers.lock();
        if let Some(existing) = map.get(name) {
            return Ok(existing.clone());
        }
        let path = reader_file_path(&self.config, name);
        if !name.is_empty() {
            if let Some(default) = map.remove("") {
                let old_path = default.path();
                default.set_identity(name.to_string(), path.clone());
                let (head, done) = default.snapshot();
                write_reader_file(&path, head, &done)?;
                self.shared.metrics.incr_checkpoint();
                if let Err(err) = fs::remove_file(&old_path) {
                    if err.kind() != io::ErrorKind::NotFound {
                        warn!(path = %old_path.display(), error = %err, "failed to delete promoted default reader file");
                    }
                }
                map.insert(name.to_string(), default.clone());
                debug!(queue = %self.config.queue_name, reader = name, "promoted default reader");
                return Ok(default);
            }
        }
        let head = self.tail();
        let reader = Arc::new(Reader::new(
            name.to_string(),
            path.clone(),
            head,
            self.shared.clone(),
            self.command_tx.clone(),
        ));
        write_reader_file(&path, head, &[])?;
        self.shared.metrics.incr_checkpoint();
        map.insert(name.to_string(), reader.clone());
        debug!(queue = %self.config.queue_name, reader = name, head = head.as_u64(), "created reader");
        Ok(reader)
    }

    /// Largest item id ever appended to this queue.
    pub fn tail(&self) -> ItemId {
        self.shared.tail_id()
    }

    /// Sum of the on-disk lengths of the queue's data files.
    pub fn journal_size(&self) -> u64 {
        let infos = self.shared.index.read().snapshot();
        infos
            .iter()
            .filter_map(|info| fs::metadata(&info.path).ok())
            .map(|meta| meta.len())
            .sum()
    }

    /// Durably checkpoints every reader's cursor file.
    pub async fn checkpoint(&self) -> JournalResult<()> {
        let readers: Vec<Arc<Reader>> = self.readers.lock().values().cloned().collect();
        for reader in readers {
            reader.checkpoint().await?;
        }
        Ok(())
    }

    /// Snapshot of the file index, oldest file first.
    pub fn file_infos(&self) -> Vec<FileInfo> {
        self.shared.index.read().snapshot()
    }

    pub fn reader_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.readers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn metrics(&self) -> JournalMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// False once a write on the active file has failed; appends are
    /// rejected until the process restarts.
    pub fn is_healthy(&self) -> bool {
        self.shared.is_healthy()
    }

    /// Stops the writer task after a final coalesced fsync. Idempotent.
    pub fn close(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = self.command_tx.send(Command::Shutdown);
            let _ = handle.join();
        }
    }

    /// Closes the journal and deletes every file it owns: data files, reader
    /// files, and checkpoint staging leftovers.
    pub fn erase(self) -> JournalResult<()> {
        self.close();
        for entry in fs::read_dir(&self.config.queue_dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.contains("~~") || classify_file(&self.config, name).is_some() {
                match fs::remove_file(&path) {
                    Ok(()) => debug!(path = %path.display(), "erased journal file"),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        self.close();
    }
}

/// Serialized mutator owning the active file handle. Runs on its own thread
/// and drains the command channel; a pending coalesced fsync is tracked as a
/// deadline on the channel receive.
struct WriterCore {
    config: JournalConfig,
    shared: Arc<SharedState>,
    durability: Arc<DurabilityCursor>,
    readers: Arc<Mutex<HashMap<String, Arc<Reader>>>>,
    writer: Option<JournalFileWriter>,
    tail_id: ItemId,
    current_items: u64,
    current_bytes: u64,
    sync_deadline: Option<Instant>,
}

impl WriterCore {
    fn run(mut self, rx: Receiver<Command>) {
        loop {
            let cmd = if let Some(deadline) = self.sync_deadline {
                match rx.recv_deadline(deadline) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => {
                        let _ = self.sync_now();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                }
            };
            match cmd {
                Command::Append {
                    data,
                    add_time_ms,
                    expire_time_ms,
                    reply,
                } => {
                    let result = self.handle_append(data, add_time_ms, expire_time_ms);
                    let _ = reply.send(result);
                }
                Command::WriteCheckpoint {
                    path,
                    head,
                    done,
                    reply,
                } => {
                    let result = self.handle_checkpoint(&path, head, &done);
                    let _ = reply.send(result);
                }
                Command::Shutdown => break,
            }
        }
        let _ = self.sync_now();
    }

    fn handle_append(
        &mut self,
        data: Vec<u8>,
        add_time_ms: i64,
        expire_time_ms: Option<i64>,
    ) -> JournalResult<(QueueItem, DurabilityTicket)> {
        if !self.shared.is_healthy() {
            let detail = self
                .durability
                .failure()
                .unwrap_or_else(|| "earlier write failure".to_string());
            return Err(JournalError::Unhealthy(detail));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(JournalError::Closed);
        };

        let id = self.tail_id.next();
        let record = Record::Put(QueueItem {
            id,
            add_time_ms,
            expire_time_ms,
            data,
        });
        if let Err(err) = writer.append_record(&record) {
            self.mark_unhealthy(&err);
            return Err(err);
        }
        let Record::Put(item) = record else {
            unreachable!()
        };

        self.tail_id = id;
        self.current_items += 1;
        self.current_bytes += item.data.len() as u64;
        self.shared.publish_tail(id);
        self.shared.metrics.record_append(item.data.len() as u64);
        {
            let mut index = self.shared.index.write();
            if let Some(last) = index.last_mut() {
                last.tail_id = id;
                last.items = self.current_items;
                last.bytes = self.current_bytes;
            }
        }

        let ticket = DurabilityTicket::new(self.durability.clone(), id);
        match self.config.sync {
            SyncPolicy::Always => self.sync_now()?,
            SyncPolicy::Coalesce { delay_ms } => {
                if self.sync_deadline.is_none() {
                    self.sync_deadline = Some(Instant::now() + Duration::from_millis(delay_ms));
                }
            }
            SyncPolicy::Never => self.durability.mark_durable(id),
        }

        let full = self
            .writer
            .as_ref()
            .is_some_and(|writer| writer.position() >= self.config.max_file_size);
        if full {
            if let Err(err) = self.rotate() {
                error!(queue = %self.config.queue_name, error = %err, "rotation failed after append");
                self.mark_unhealthy(&err);
            }
        }
        Ok((item, ticket))
    }

    /// Fsyncs the active file and resolves every ticket the sync covered.
    fn sync_now(&mut self) -> JournalResult<()> {
        self.sync_deadline = None;
        let Some(writer) = self.writer.as_ref() else {
            return Ok(());
        };
        if self.durability.durable_id() >= self.tail_id {
            return Ok(());
        }
        match writer.sync_with_retry() {
            Ok(()) => {
                self.shared.metrics.incr_fsync();
                self.durability.mark_durable(self.tail_id);
                Ok(())
            }
            Err(err) => {
                self.mark_unhealthy(&err);
                Err(err)
            }
        }
    }

    /// Closes the active file and starts a fresh one named by the current
    /// millisecond timestamp, then garbage-collects fully consumed files.
    fn rotate(&mut self) -> JournalResult<()> {
        let (path, writer) = create_new_retrying(|| data_file_path(&self.config, now_millis()))?;
        // settle pending durability on the old file before dropping its handle
        self.sync_now()?;
        self.writer = Some(writer);
        self.current_items = 0;
        self.current_bytes = 0;
        self.shared.index.write().insert(FileInfo {
            path: path.clone(),
            head_id: self.tail_id.next(),
            tail_id: self.tail_id,
            items: 0,
            bytes: 0,
        });
        self.shared.metrics.incr_rotation();
        debug!(
            queue = %self.config.queue_name,
            path = %path.display(),
            head = self.tail_id.next().as_u64(),
            "rotated to a new journal file"
        );
        self.check_old_files();
        Ok(())
    }

    /// Removes data files every reader has fully consumed.
    ///
    /// A file is removable only when its whole id range is below every
    /// reader's next unconsumed item, and the newest such file is always
    /// kept.
    fn check_old_files(&mut self) {
        let reader_min = {
            let readers = self.readers.lock();
            readers.values().map(|r| r.head().next()).min()
        };
        let mut min_head = self.tail_id;
        if let Some(m) = reader_min {
            min_head = min_head.min(m);
        }

        let mut removable: Vec<FileInfo> = {
            let index = self.shared.index.read();
            index
                .iter()
                .take_while(|info| info.head_id <= min_head)
                .cloned()
                .collect()
        };
        removable.pop();

        for info in removable {
            self.shared.index.write().remove(info.head_id);
            if let Some(dir) = &self.config.archive_dir {
                match archive_file(dir, &info.path) {
                    Ok(dest) => {
                        self.shared.metrics.incr_archived();
                        debug!(path = %info.path.display(), dest = %dest.display(), "archived consumed journal file");
                    }
                    Err(err) => {
                        warn!(path = %info.path.display(), error = %err, "failed to archive consumed journal file");
                    }
                }
            } else {
                match fs::remove_file(&info.path) {
                    Ok(()) => {
                        self.shared.metrics.incr_deleted();
                        debug!(path = %info.path.display(), "deleted consumed journal file");
                    }
                    Err(err) => {
                        warn!(path = %info.path.display(), error = %err, "failed to delete consumed journal file");
                    }
                }
            }
        }
    }

    fn handle_checkpoint(&mut self, path: &Path, head: ItemId, done: &[ItemId]) -> JournalResult<()> {
        write_reader_file(path, head, done)?;
        self.shared.metrics.incr_checkpoint();
        Ok(())
    }

    fn mark_unhealthy(&self, err: &JournalError) {
        self.shared.set_unhealthy();
        self.durability.mark_failed(err.to_string());
        error!(queue = %self.config.queue_name, error = %err, "journal marked unhealthy after write failure");
    }
}

fn validate_config(config: &JournalConfig) -> JournalResult<()> {
    if config.queue_name.is_empty() {
        return Err(JournalError::invalid_config("queue name must not be empty"));
    }
    if config.queue_name.contains('~')
        || config.queue_name.contains('/')
        || config.queue_name.contains(std::path::MAIN_SEPARATOR)
    {
        return Err(JournalError::invalid_config(format!(
            "queue name {:?} contains reserved characters",
            config.queue_name
        )));
    }
    Ok(())
}

enum OwnedFile {
    Data,
    Reader(String),
}

/// Classifies a directory entry against the queue's naming scheme, ignoring
/// anything that is not ours.
fn classify_file(config: &JournalConfig, name: &str) -> Option<OwnedFile> {
    let rest = name.strip_prefix(&format!("{}.", config.queue_name))?;
    if rest.contains('~') {
        return None;
    }
    if let Some(reader_name) = rest.strip_prefix("read.") {
        return Some(OwnedFile::Reader(reader_name.to_string()));
    }
    if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
        return Some(OwnedFile::Data);
    }
    None
}

/// Walks the queue directory, deleting checkpoint staging leftovers and
/// partitioning the rest into data files and reader files.
#[allow(clippy::type_complexity)]
fn discover_files(config: &JournalConfig) -> JournalResult<(Vec<PathBuf>, Vec<(String, PathBuf)>)> {
    let mut data_files = Vec::new();
    let mut reader_files = Vec::new();
    for entry in fs::read_dir(&config.queue_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.contains("~~") {
            debug!(path = %path.display(), "removing stale checkpoint staging file");
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "failed to remove staging file");
            }
            continue;
        }
        match classify_file(config, name) {
            Some(OwnedFile::Data) => data_files.push(path),
            Some(OwnedFile::Reader(reader_name)) => reader_files.push((reader_name, path)),
            None => {}
        }
    }
    data_files.sort();
    reader_files.sort();
    Ok((data_files, reader_files))
}

enum ScanFailure {
    Corrupt(u64),
    Io(io::Error),
}

/// Scans one data file, repairing a corrupted tail by truncation.
///
/// Returns `None` for a file with no put records. Corruption found again
/// after one truncation is mid-file damage and is fatal for the queue.
fn scan_data_file(path: &Path, metrics: &JournalMetrics) -> JournalResult<Option<FileInfo>> {
    let mut repaired = false;
    loop {
        match scan_records(path) {
            Ok(info) => return Ok(info),
            Err(ScanFailure::Corrupt(position)) => {
                if repaired {
                    return Err(JournalError::corruption(
                        position,
                        format!("{} is corrupted beyond its tail", path.display()),
                    ));
                }
                warn!(path = %path.display(), position, "truncating corrupted journal file tail");
                let file = fs::OpenOptions::new().write(true).open(path)?;
                file.set_len(position)?;
                file.sync_data()?;
                metrics.incr_truncated();
                repaired = true;
            }
            Err(ScanFailure::Io(err)) => return Err(err.into()),
        }
    }
}

fn scan_records(path: &Path) -> Result<Option<FileInfo>, ScanFailure> {
    let mut reader = match JournalFileReader::open(path) {
        Ok(reader) => reader,
        Err(JournalError::Io(err)) => return Err(ScanFailure::Io(err)),
        Err(err) => return Err(ScanFailure::Io(io::Error::other(err.to_string()))),
    };
    let mut head: Option<ItemId> = None;
    let mut tail = ItemId::ZERO;
    let mut items = 0u64;
    let mut bytes = 0u64;
    loop {
        match reader.next_record() {
            Ok(None) => break,
            Ok(Some((Record::Put(item), _))) => {
                head.get_or_insert(item.id);
                tail = item.id;
                items += 1;
                bytes += item.data.len() as u64;
            }
            Ok(Some(_)) => {}
            Err(JournalError::Corruption { position, .. }) => {
                return Err(ScanFailure::Corrupt(position));
            }
            Err(JournalError::UnknownTag { position, .. }) => {
                return Err(ScanFailure::Corrupt(position));
            }
            Err(JournalError::Io(err)) => return Err(ScanFailure::Io(err)),
            Err(err) => return Err(ScanFailure::Io(io::Error::other(err.to_string()))),
        }
    }
    Ok(head.map(|head_id| FileInfo {
        path: path.to_path_buf(),
        head_id,
        tail_id: tail,
        items,
        bytes,
    }))
}

fn data_file_path(config: &JournalConfig, millis: u64) -> PathBuf {
    config
        .queue_dir
        .join(format!("{}.{millis}", config.queue_name))
}

fn reader_file_path(config: &JournalConfig, name: &str) -> PathBuf {
    config
        .queue_dir
        .join(format!("{}.read.{name}", config.queue_name))
}

fn staging_path(path: &Path, millis: u64) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!("~~{millis}"));
    path.with_file_name(name)
}

/// Creates a brand-new file from a timestamp-derived candidate path,
/// retrying on collision until a unique millisecond suffix is found.
fn create_new_retrying<F>(mut candidate: F) -> JournalResult<(PathBuf, JournalFileWriter)>
where
    F: FnMut() -> PathBuf,
{
    loop {
        let path = candidate();
        match JournalFileWriter::create_new(&path) {
            Ok(writer) => return Ok((path, writer)),
            Err(JournalError::Io(err)) if err.kind() == io::ErrorKind::AlreadyExists => {
                thread::sleep(Duration::from_millis(1));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Atomically replaces a reader's cursor file: write a `~~` staging sibling,
/// fsync it, rename it over the canonical path.
pub(crate) fn write_reader_file(path: &Path, head: ItemId, done: &[ItemId]) -> JournalResult<()> {
    let (staging, mut writer) = create_new_retrying(|| staging_path(path, now_millis()))?;
    let write = (|| -> JournalResult<()> {
        writer.append_record(&Record::ReadHead(head))?;
        writer.append_record(&Record::ReadDone(done.to_vec()))?;
        writer.sync()
    })();
    drop(writer);
    match write {
        Ok(()) => {
            fs::rename(&staging, path)?;
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&staging);
            Err(err)
        }
    }
}

fn archive_file(dir: &Path, path: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dest = dir.join(format!("archive~{name}"));
    fs::rename(path, &dest)?;
    Ok(dest)
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

//! Per-consumer cursor state: the durable head, the out-of-order done set,
//! and the optional read-behind scanner.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::ItemId;
use crate::error::{JournalError, JournalResult};
use crate::file::JournalFileReader;
use crate::journal::{Command, SharedState};
use crate::record::{QueueItem, Record};
use crate::scanner::Scanner;

struct ReaderIdent {
    name: String,
    path: PathBuf,
}

struct CursorState {
    head: ItemId,
    done: BTreeSet<ItemId>,
}

/// One named consumer's durable cursor over the journal.
///
/// `head` is the largest id such that every id at or below it has been
/// consumed; ids consumed ahead of the head live in the done set. Cursor
/// mutation happens on the caller's thread and touches only this reader's
/// state; checkpoint writes are handed to the journal's serialized writer.
pub struct Reader {
    ident: Mutex<ReaderIdent>,
    state: Mutex<CursorState>,
    shared: Arc<SharedState>,
    command_tx: Sender<Command>,
    read_behind: Mutex<Option<Scanner>>,
}

impl Reader {
    pub(crate) fn new(
        name: String,
        path: PathBuf,
        head: ItemId,
        shared: Arc<SharedState>,
        command_tx: Sender<Command>,
    ) -> Self {
        Self {
            ident: Mutex::new(ReaderIdent { name, path }),
            state: Mutex::new(CursorState {
                head,
                done: BTreeSet::new(),
            }),
            shared,
            command_tx,
            read_behind: Mutex::new(None),
        }
    }

    pub fn name(&self) -> String {
        self.ident.lock().name.clone()
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.ident.lock().path.clone()
    }

    /// Rebinds the reader when the auto-created default reader is promoted
    /// to its first real name.
    pub(crate) fn set_identity(&self, name: String, path: PathBuf) {
        let mut ident = self.ident.lock();
        ident.name = name;
        ident.path = path;
    }

    /// Largest id with everything at or below it consumed.
    pub fn head(&self) -> ItemId {
        self.state.lock().head
    }

    /// Moves the head to `head`, dropping done-set entries it now covers.
    pub fn set_head(&self, head: ItemId) {
        let mut state = self.state.lock();
        state.head = head;
        state.done.retain(|id| *id > head);
    }

    /// Ids consumed out of order, sorted ascending. All are greater than the
    /// head.
    pub fn done_set(&self) -> Vec<ItemId> {
        self.state.lock().done.iter().copied().collect()
    }

    /// Marks one item consumed.
    ///
    /// Committing `head + 1` advances the head across any adjacent done-set
    /// entries; any other id ahead of the head is parked in the done set.
    pub fn commit(&self, id: ItemId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if id == state.head.next() {
            state.head = id;
            while state.done.remove(&state.head.next()) {
                state.head = state.head.next();
            }
        } else if id > state.head {
            state.done.insert(id);
        } else {
            debug!(id = id.as_u64(), "commit for an id at or below the head");
        }
    }

    /// Marks everything consumed: head jumps to the journal tail, the done
    /// set empties, and any read-behind ends.
    pub fn flush(&self) {
        let tail = self.shared.tail_id();
        {
            let mut state = self.state.lock();
            state.head = tail;
            state.done.clear();
        }
        *self.read_behind.lock() = None;
    }

    /// Replays this reader's state file from disk.
    ///
    /// Unknown tags are skipped with a warning; corruption is returned to
    /// the caller. After replay the head is clamped into
    /// `[earliest_head - 1, tail]`, which deliberately re-exposes items when
    /// an operator has deleted data files out from under the cursor.
    pub(crate) fn read_state(&self) -> JournalResult<()> {
        let path = self.path();
        let mut reader = JournalFileReader::open(&path)?;
        let tail = self.shared.tail_id();
        let mut head = ItemId::ZERO;
        let mut done: BTreeSet<ItemId> = BTreeSet::new();
        while let Some(frame) = reader.next_frame()? {
            match Record::decode(frame.tag, &frame.payload, frame.start) {
                Ok(Record::ReadHead(id)) => head = id,
                Ok(Record::ReadDone(ids)) => {
                    done = ids.into_iter().filter(|id| *id <= tail).collect();
                }
                Ok(Record::Reserved { .. }) => {}
                Ok(Record::Put(_)) => {
                    debug!(path = %path.display(), "ignoring put record in reader state file");
                }
                Err(JournalError::UnknownTag { tag, position }) => {
                    warn!(path = %path.display(), tag, position, "skipping unknown record in reader state file");
                }
                Err(err) => return Err(err),
            }
        }

        let earliest = self.shared.index.read().earliest_head();
        let lower = earliest.as_u64().saturating_sub(1).min(tail.as_u64());
        let clamped = ItemId::new(head.as_u64().clamp(lower, tail.as_u64()));
        if clamped != head {
            warn!(
                path = %path.display(),
                stored = head.as_u64(),
                clamped = clamped.as_u64(),
                "reader head clamped to the surviving journal range"
            );
        }

        let mut state = self.state.lock();
        state.head = clamped;
        state.done = done.into_iter().filter(|id| *id > clamped).collect();
        Ok(())
    }

    /// Snapshot of head and done set taken atomically, for checkpointing.
    pub(crate) fn snapshot(&self) -> (ItemId, Vec<ItemId>) {
        let state = self.state.lock();
        (state.head, state.done.iter().copied().collect())
    }

    /// Durably rewrites this reader's state file.
    ///
    /// The cursor is snapshotted before the write is scheduled, so commits
    /// racing with the checkpoint cannot tear it. The file replacement
    /// itself is atomic: a `~~` staging file is written, fsynced, and
    /// renamed over the canonical path by the journal's writer task.
    pub async fn checkpoint(&self) -> JournalResult<()> {
        let path = self.path();
        let (head, done) = self.snapshot();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::WriteCheckpoint {
                path,
                head,
                done,
                reply: reply_tx,
            })
            .map_err(|_| JournalError::Closed)?;
        reply_rx.await.map_err(|_| JournalError::Closed)?
    }

    /// Begins reading from disk; the next [`next_read_behind`] call yields
    /// the first item with an id greater than `from`.
    ///
    /// [`next_read_behind`]: Reader::next_read_behind
    pub fn start_read_behind(&self, from: ItemId) -> JournalResult<()> {
        let scanner = {
            let index = self.shared.index.read();
            Scanner::start(from, &index, self.shared.tail_id())?
        };
        *self.read_behind.lock() = Some(scanner);
        Ok(())
    }

    /// Yields the next item from disk, or `None` once the reader has caught
    /// up with the live tail (which also ends the read-behind).
    pub fn next_read_behind(&self) -> JournalResult<Option<QueueItem>> {
        let mut guard = self.read_behind.lock();
        let Some(scanner) = guard.as_mut() else {
            return Ok(None);
        };
        let result = {
            let index = self.shared.index.read();
            scanner.next(&index, self.shared.tail_id())
        };
        match result {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => {
                debug!(at = scanner.position().as_u64(), "read-behind caught up");
                *guard = None;
                Ok(None)
            }
            Err(err) => {
                *guard = None;
                Err(err)
            }
        }
    }

    pub fn end_read_behind(&self) {
        *self.read_behind.lock() = None;
    }

    pub fn is_read_behind(&self) -> bool {
        self.read_behind.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::test_support::{dangling_command_tx, shared_with_tail};

    fn reader(head: u64, tail: u64) -> Reader {
        Reader::new(
            "client".to_string(),
            PathBuf::from("unused.read.client"),
            ItemId::new(head),
            shared_with_tail(tail),
            dangling_command_tx(),
        )
    }

    #[test]
    fn commit_tracking() {
        let reader = reader(123, 1000);

        reader.commit(ItemId::new(124));
        assert_eq!(reader.head(), ItemId::new(124));
        assert!(reader.done_set().is_empty());

        reader.commit(ItemId::new(126));
        reader.commit(ItemId::new(127));
        reader.commit(ItemId::new(129));
        assert_eq!(reader.head(), ItemId::new(124));
        assert_eq!(
            reader.done_set(),
            vec![ItemId::new(126), ItemId::new(127), ItemId::new(129)]
        );

        reader.commit(ItemId::new(125));
        assert_eq!(reader.head(), ItemId::new(127));
        assert_eq!(reader.done_set(), vec![ItemId::new(129)]);

        reader.commit(ItemId::new(130));
        reader.commit(ItemId::new(128));
        assert_eq!(reader.head(), ItemId::new(130));
        assert!(reader.done_set().is_empty());
    }

    #[test]
    fn commit_converges_for_any_permutation() {
        // every order of committing head+1 ..= head+5 must land on the same
        // final state
        let ids: Vec<u64> = (124..=128).collect();
        for permutation in permutations(&ids) {
            let reader = reader(123, 1000);
            for id in &permutation {
                reader.commit(ItemId::new(*id));
            }
            assert_eq!(
                reader.head(),
                ItemId::new(128),
                "permutation {permutation:?}"
            );
            assert!(
                reader.done_set().is_empty(),
                "permutation {permutation:?}"
            );
        }
    }

    fn permutations(items: &[u64]) -> Vec<Vec<u64>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut all = Vec::new();
        for (i, &first) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                let mut perm = vec![first];
                perm.append(&mut tail);
                all.push(perm);
            }
        }
        all
    }

    #[test]
    fn commit_below_head_is_ignored() {
        let reader = reader(10, 100);
        reader.commit(ItemId::new(5));
        reader.commit(ItemId::new(10));
        assert_eq!(reader.head(), ItemId::new(10));
        assert!(reader.done_set().is_empty());
    }

    #[test]
    fn set_head_drops_covered_done_entries() {
        let reader = reader(10, 100);
        reader.commit(ItemId::new(15));
        reader.commit(ItemId::new(20));
        reader.set_head(ItemId::new(17));
        assert_eq!(reader.head(), ItemId::new(17));
        assert_eq!(reader.done_set(), vec![ItemId::new(20)]);
    }

    #[test]
    fn flush_jumps_to_tail() {
        let reader = reader(10, 250);
        reader.commit(ItemId::new(15));
        reader.flush();
        assert_eq!(reader.head(), ItemId::new(250));
        assert!(reader.done_set().is_empty());
        assert!(!reader.is_read_behind());
    }
}

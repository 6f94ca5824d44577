//! Journal layer for the hopper durable fanout queue.
//!
//! A producer appends opaque byte payloads; any number of named readers
//! consume them independently, each with its own durable cursor. The on-disk
//! journal is the source of truth: after a crash the queue state is rebuilt
//! by replaying files.
//!
//! ## Architecture Overview
//!
//! - **Data files**: a rolling set of append-only files, each covering a
//!   contiguous range of item ids. The active file rotates once it reaches
//!   the configured size, and files every reader has consumed are deleted or
//!   archived.
//! - **File index**: an ordered in-memory map from a file's first id to its
//!   [`FileInfo`], so any id is located in O(log n).
//! - **Writer task**: appends, rotation, garbage collection, and checkpoint
//!   writes run serialized on one task that owns the active file handle.
//! - **Readers**: per-consumer cursors tracking a `head` plus an
//!   out-of-order done set, checkpointed durably via atomic file
//!   replacement.
//! - **Read-behind**: a lagging reader streams items straight from disk
//!   through a forward-only scanner (see [`Reader::start_read_behind`])
//!   until it catches back up with the live tail.
//! - **Recovery**: opening a journal replays the directory, truncates a
//!   corrupted tail, and drops files with no items.
//!
//! ## Example Usage
//!
//! ```no_run
//! use hopper_journal::{Journal, JournalConfig};
//!
//! # async fn example() -> hopper_journal::JournalResult<()> {
//! let journal = Journal::open(JournalConfig {
//!     queue_dir: "./data/orders".into(),
//!     queue_name: "orders".to_string(),
//!     ..JournalConfig::default()
//! })?;
//!
//! let (item, durability) = journal.append(b"payload".to_vec(), 0, None).await?;
//! durability.wait().await?;
//!
//! let reader = journal.reader("billing")?;
//! reader.commit(item.id);
//! reader.checkpoint().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod record;

mod file;
mod index;
mod journal;
mod reader;
mod scanner;

pub use config::{ItemId, JournalConfig, SyncPolicy};
pub use error::{JournalError, JournalResult};
pub use file::{DurabilityCursor, DurabilityTicket};
pub use index::{FileIndex, FileInfo};
pub use journal::Journal;
pub use metrics::{JournalMetrics, JournalMetricsSnapshot};
pub use reader::Reader;
pub use record::{QueueItem, Record};

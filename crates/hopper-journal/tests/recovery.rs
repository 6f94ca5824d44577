use std::fs;
use std::path::Path;

use hopper_journal::{
    ItemId, Journal, JournalConfig, QueueItem, Record, SyncPolicy,
};
use tempfile::TempDir;

fn config(dir: &Path, name: &str) -> JournalConfig {
    JournalConfig {
        queue_dir: dir.to_path_buf(),
        queue_name: name.to_string(),
        max_file_size: 1024 * 1024,
        sync: SyncPolicy::Always,
        archive_dir: None,
    }
}

/// Byte length of one put frame with `data_len` payload bytes.
const fn frame_len(data_len: u64) -> u64 {
    4 + 1 + 24 + data_len
}

async fn drain(journal: &Journal) -> Vec<QueueItem> {
    let reader = journal.reader("drain").expect("reader");
    reader.set_head(ItemId::ZERO);
    reader.start_read_behind(ItemId::ZERO).expect("start");
    let mut items = Vec::new();
    while let Some(item) = reader.next_read_behind().expect("next") {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn round_trip_preserves_payloads_and_order() {
    let tmp = TempDir::new().expect("tempdir");
    let cfg = JournalConfig {
        max_file_size: 200,
        ..config(tmp.path(), "q")
    };

    let journal = Journal::open(cfg.clone()).expect("open");
    let mut payloads = Vec::new();
    for i in 0..25u32 {
        let data = format!("payload number {i}").into_bytes();
        payloads.push(data.clone());
        let (_, ticket) = journal.append(data, i as i64, None).await.expect("append");
        ticket.wait().await.expect("durable");
    }
    drop(journal);

    let journal = Journal::open(cfg).expect("reopen");
    let replayed = drain(&journal).await;
    assert_eq!(replayed.len(), payloads.len());
    for (i, item) in replayed.iter().enumerate() {
        assert_eq!(item.id, ItemId::new(i as u64 + 1));
        assert_eq!(item.data, payloads[i]);
    }
}

#[tokio::test]
async fn truncating_the_active_file_recovers_the_last_full_put() {
    let data_len = 8u64;
    let frame = frame_len(data_len);
    let item_count = 10u64;

    // sweep cut points across record boundaries and mid-record offsets
    let mut cuts = Vec::new();
    for k in 0..item_count {
        cuts.push(k * frame);
        cuts.push(k * frame + 1);
        cuts.push(k * frame + frame / 2);
    }
    cuts.push(item_count * frame - 1);

    for cut in cuts {
        let tmp = TempDir::new().expect("tempdir");
        let cfg = config(tmp.path(), "q");
        let journal = Journal::open(cfg.clone()).expect("open");
        for _ in 0..item_count {
            let (_, ticket) = journal
                .append(vec![0xCD; data_len as usize], 7, None)
                .await
                .expect("append");
            ticket.wait().await.expect("durable");
        }
        let active = journal
            .file_infos()
            .last()
            .expect("active file")
            .path
            .clone();
        drop(journal);

        let file = fs::OpenOptions::new()
            .write(true)
            .open(&active)
            .expect("open active");
        file.set_len(cut).expect("truncate");
        drop(file);

        let journal = Journal::open(cfg).expect("reopen after truncation");
        let expected_tail = cut / frame;
        assert_eq!(
            journal.tail(),
            ItemId::new(expected_tail),
            "cut at byte {cut}"
        );

        // the journal keeps accepting appends with dense ids
        let (item, ticket) = journal.append(b"after".to_vec(), 8, None).await.expect("append");
        ticket.wait().await.expect("durable");
        assert_eq!(item.id, ItemId::new(expected_tail + 1));
    }
}

#[tokio::test]
async fn reader_state_survives_reopen_with_out_of_order_commits() {
    let tmp = TempDir::new().expect("tempdir");
    let cfg = config(tmp.path(), "q");
    let journal = Journal::open(cfg.clone()).expect("open");
    for _ in 0..10 {
        journal.append(vec![1; 4], 0, None).await.expect("append");
    }
    let reader = journal.reader("client").expect("reader");
    reader.set_head(ItemId::new(4));
    reader.commit(ItemId::new(5));
    reader.commit(ItemId::new(7));
    reader.commit(ItemId::new(9));
    assert_eq!(reader.head(), ItemId::new(5));
    journal.checkpoint().await.expect("checkpoint");
    drop(journal);

    let journal = Journal::open(cfg).expect("reopen");
    let reader = journal.reader("client").expect("reader");
    assert_eq!(reader.head(), ItemId::new(5));
    assert_eq!(reader.done_set(), vec![ItemId::new(7), ItemId::new(9)]);
}

#[tokio::test]
async fn stored_reader_state_is_replayed_verbatim() {
    let tmp = TempDir::new().expect("tempdir");
    let dir = tmp.path();

    // data covering ids 899..=903 so the stored head needs no clamping
    let mut bytes = Vec::new();
    for id in 899..=903u64 {
        let record = Record::Put(QueueItem {
            id: ItemId::new(id),
            add_time_ms: 0,
            expire_time_ms: None,
            data: vec![9; 4],
        });
        bytes.extend_from_slice(&record.encode().expect("encode"));
    }
    fs::write(dir.join("q.500"), bytes).expect("write data");

    let mut state = Record::ReadHead(ItemId::new(900)).encode().expect("encode");
    state.extend(
        Record::ReadDone(vec![ItemId::new(902), ItemId::new(903)])
            .encode()
            .expect("encode"),
    );
    fs::write(dir.join("q.read.client"), state).expect("write reader");

    let journal = Journal::open(config(dir, "q")).expect("open");
    let reader = journal.reader("client").expect("reader");
    assert_eq!(reader.head(), ItemId::new(900));
    assert_eq!(
        reader.done_set(),
        vec![ItemId::new(902), ItemId::new(903)]
    );
}

#[tokio::test]
async fn reader_head_is_clamped_to_the_surviving_range() {
    let tmp = TempDir::new().expect("tempdir");
    let dir = tmp.path();

    let mut bytes = Vec::new();
    for id in 100..=105u64 {
        let record = Record::Put(QueueItem {
            id: ItemId::new(id),
            add_time_ms: 0,
            expire_time_ms: None,
            data: vec![9; 4],
        });
        bytes.extend_from_slice(&record.encode().expect("encode"));
    }
    fs::write(dir.join("q.500"), bytes).expect("write data");

    // an operator deleted older files out from under this cursor
    let behind = Record::ReadHead(ItemId::new(50)).encode().expect("encode");
    fs::write(dir.join("q.read.behind"), behind).expect("write reader");
    // and this one claims more than the journal ever held
    let ahead = Record::ReadHead(ItemId::new(10_000)).encode().expect("encode");
    fs::write(dir.join("q.read.ahead"), ahead).expect("write reader");

    let journal = Journal::open(config(dir, "q")).expect("open");
    assert_eq!(
        journal.reader("behind").expect("reader").head(),
        ItemId::new(99),
        "clamped up to earliest head minus one, re-exposing surviving items"
    );
    assert_eq!(
        journal.reader("ahead").expect("reader").head(),
        ItemId::new(105),
        "clamped down to the tail"
    );
}

#[tokio::test]
async fn corrupt_reader_file_is_skipped_not_fatal() {
    let tmp = TempDir::new().expect("tempdir");
    let dir = tmp.path();
    let record = Record::Put(QueueItem {
        id: ItemId::new(1),
        add_time_ms: 0,
        expire_time_ms: None,
        data: vec![1; 4],
    });
    fs::write(dir.join("q.500"), record.encode().expect("encode")).expect("write data");
    // a length prefix pointing past the end of the file
    fs::write(dir.join("q.read.mangled"), 1_000_000u32.to_le_bytes()).expect("write reader");
    let mut good = Record::ReadHead(ItemId::new(1)).encode().expect("encode");
    good.extend(Record::ReadDone(Vec::new()).encode().expect("encode"));
    fs::write(dir.join("q.read.good"), good).expect("write reader");

    let journal = Journal::open(config(dir, "q")).expect("open");
    assert_eq!(journal.reader_names(), ["good"]);
}

#[tokio::test]
async fn data_files_with_no_items_are_deleted_on_open() {
    let tmp = TempDir::new().expect("tempdir");
    let dir = tmp.path();
    let record = Record::Put(QueueItem {
        id: ItemId::new(1),
        add_time_ms: 0,
        expire_time_ms: None,
        data: vec![1; 4],
    });
    fs::write(dir.join("q.100"), record.encode().expect("encode")).expect("write data");
    fs::write(dir.join("q.200"), b"").expect("write empty");

    let journal = Journal::open(config(dir, "q")).expect("open");
    assert!(!dir.join("q.200").exists());
    assert_eq!(journal.file_infos().len(), 1);
    assert_eq!(journal.tail(), ItemId::new(1));
}

#[tokio::test]
async fn fully_truncated_journal_restarts_from_scratch() {
    let tmp = TempDir::new().expect("tempdir");
    let cfg = config(tmp.path(), "q");
    let journal = Journal::open(cfg.clone()).expect("open");
    journal.append(vec![5; 8], 0, None).await.expect("append");
    let active = journal.file_infos()[0].path.clone();
    drop(journal);

    // wipe the whole file: no puts survive, so the journal starts over
    let file = fs::OpenOptions::new()
        .write(true)
        .open(&active)
        .expect("open");
    file.set_len(0).expect("truncate");
    drop(file);

    let journal = Journal::open(cfg).expect("reopen");
    assert_eq!(journal.tail(), ItemId::ZERO);
    assert!(!active.exists(), "empty file is deleted");
    let (item, _) = journal.append(vec![6; 8], 0, None).await.expect("append");
    assert_eq!(item.id, ItemId::new(1));
}

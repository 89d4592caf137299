
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use harness::{block, fixture, ip, wait_until};
use mochimap_indexer::mempool::{FeedWatcher, MempoolTracker};
use mochimap_indexer::protocol::txentry::encode_record;
use mochimap_indexer::protocol::{TxEntry, TX_ENTRY_LEN};
use mochimap_indexer::storage::{ids, Collection, Storage};

fn record(n: u8) -> Vec<u8> {
    encode_record(&[n; 12], &[n + 1; 12], &[n + 2; 12], [1_000, 10, 500], &[n; 32])
}

fn append(path: &std::path::Path, records: &[Vec<u8>]) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for r in records {
        file.write_all(r).unwrap();
    }
    file.flush().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_feed_tracks_pending_and_respects_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let feed = dir.path().join("txclean.dat");
    let fx = fixture(false);
    let store: Arc<dyn Storage> = fx.store.clone();
    let tracker = Arc::new(MempoolTracker::new(&feed, store));
    let _watcher = FeedWatcher::new(Duration::from_millis(10)).spawn(tracker.clone());

    append(&feed, &[record(1), record(2)]);
    let mem = fx.store.clone();
    assert!(wait_until(|| mem.len(Collection::Transaction) == 2, Duration::from_secs(5)).await);

    let first = TxEntry::decode(&record(1)).unwrap();
    let id = ids::transaction_id(&first.txid);
    let pending = fx.store.find_one(Collection::Transaction, &id).unwrap().unwrap();
    assert_eq!(pending["status"], "pending");
    let received = pending["received"].clone();
    assert!(received.is_i64());

    // the first record is mined
    let mut mined = block(5, 0);
    mined.transactions.push(first.clone());
    fx.sync.process_block(&mined, ip("8.8.4.4"), false).await.unwrap();
    let confirmed = fx.store.find_one(Collection::Transaction, &id).unwrap().unwrap();
    assert_eq!(confirmed["status"], "confirmed");
    assert_eq!(confirmed["height"].as_u64(), Some(5));
    assert_eq!(confirmed["received"], received);

    // a re-broadcast of a mined transaction stays confirmed
    append(&feed, &[record(3), record(1)]);
    // records 2 and 3 pending, record 1 confirmed, plus the block reward
    assert!(wait_until(|| mem.len(Collection::Transaction) == 4, Duration::from_secs(5)).await);
    let cursor = 4 * TX_ENTRY_LEN as u64;
    for _ in 0..100 {
        if tracker.cursor().await == cursor {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tracker.cursor().await, cursor);
    let after = fx.store.find_one(Collection::Transaction, &id).unwrap().unwrap();
    assert_eq!(after["status"], "confirmed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replaced_feed_starts_over() {
    let dir = tempfile::tempdir().unwrap();
    let feed = dir.path().join("txclean.dat");
    let fx = fixture(false);
    let store: Arc<dyn Storage> = fx.store.clone();
    let tracker = Arc::new(MempoolTracker::new(&feed, store));
    let _watcher = FeedWatcher::new(Duration::from_millis(10)).spawn(tracker.clone());

    append(&feed, &[record(1), record(2), record(3)]);
    let mem = fx.store.clone();
    assert!(wait_until(|| mem.len(Collection::Transaction) == 3, Duration::from_secs(5)).await);

    std::fs::remove_file(&feed).unwrap();
    append(&feed, &[record(4)]);
    assert!(wait_until(|| mem.len(Collection::Transaction) == 4, Duration::from_secs(5)).await);
    let fourth = TxEntry::decode(&record(4)).unwrap();
    assert!(fx
        .store
        .has(Collection::Transaction, &ids::transaction_id(&fourth.txid))
        .unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_feed_renamed_over_is_read_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let feed = dir.path().join("txclean.dat");
    let fx = fixture(false);
    let store: Arc<dyn Storage> = fx.store.clone();
    let tracker = Arc::new(MempoolTracker::new(&feed, store));
    let _watcher = FeedWatcher::new(Duration::from_millis(10)).spawn(tracker.clone());

    append(&feed, &[record(1), record(2)]);
    let mem = fx.store.clone();
    assert!(wait_until(|| mem.len(Collection::Transaction) == 2, Duration::from_secs(5)).await);

    // a larger feed swapped in atomically, never missing from the path
    let staged = dir.path().join("txclean.dat.new");
    append(&staged, &[record(10), record(11), record(12)]);
    std::fs::rename(&staged, &feed).unwrap();

    assert!(wait_until(|| mem.len(Collection::Transaction) == 5, Duration::from_secs(5)).await);
    for n in [10, 11, 12] {
        let tx = TxEntry::decode(&record(n)).unwrap();
        assert!(
            fx.store
                .has(Collection::Transaction, &ids::transaction_id(&tx.txid))
                .unwrap(),
            "record {} skipped",
            n
        );
    }
    let cursor = 3 * TX_ENTRY_LEN as u64;
    for _ in 0..100 {
        if tracker.cursor().await == cursor {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tracker.cursor().await, cursor);
}

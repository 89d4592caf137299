//! Mempool Tracker
//!
//! The local node appends pending transactions to a flat feed file of
//! fixed-size records. The tracker keeps a read cursor and turns every newly
//! appended whole record into a pending transaction document. Pending records
//! are set-on-insert, so they never replace a record that already exists,
//! confirmed or not.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::documents::TransactionDocument;
use crate::error::Result;
use crate::metrics;
use crate::protocol::{TxEntry, TX_ENTRY_LEN};
use crate::storage::{Collection, Storage, UpdateMode};

pub struct MempoolTracker {
    path: PathBuf,
    store: Arc<dyn Storage>,
    cursor: Mutex<u64>,
}

impl MempoolTracker {
    pub fn new(path: impl Into<PathBuf>, store: Arc<dyn Storage>) -> Self {
        Self {
            path: path.into(),
            store,
            cursor: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn cursor(&self) -> u64 {
        *self.cursor.lock().await
    }

    /// Start over from the beginning of the feed
    pub async fn reset(&self) {
        *self.cursor.lock().await = 0;
        metrics::PENDING_CURSOR.set(0);
    }

    /// Handle a size notification. Returns the number of pending records
    /// inserted.
    pub async fn on_growth(&self, size: u64) -> Result<usize> {
        let mut cursor = self.cursor.lock().await;
        if size < *cursor {
            debug!("[MEMPOOL] feed shrank to {} bytes, resetting cursor", size);
            *cursor = 0;
        }

        let available = size - *cursor;
        let whole = available - available % TX_ENTRY_LEN as u64;
        if available % TX_ENTRY_LEN as u64 != 0 {
            warn!(
                "[MEMPOOL] {} trailing bytes at position {}, waiting for the rest",
                available % TX_ENTRY_LEN as u64,
                *cursor + whole
            );
        }
        if whole == 0 {
            return Ok(0);
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(*cursor)).await?;
        let mut buf = vec![0u8; whole as usize];
        file.read_exact(&mut buf).await?;

        let received = chrono::Utc::now().timestamp_millis();
        let mut inserted = 0;
        for tx in TxEntry::decode_all(&buf)? {
            let doc = TransactionDocument::pending(&tx, received);
            let written = self.store.update(
                Collection::Transaction,
                &doc.id(),
                &doc.to_patch()?,
                UpdateMode::SetOnInsert,
            )?;
            if written > 0 {
                debug!("[MEMPOOL] TxID {} pending", tx.txid.get(..8).unwrap_or(&tx.txid));
            }
            inserted += written;
        }

        *cursor += whole;
        metrics::PENDING_CURSOR.set(*cursor as i64);
        metrics::TRANSACTIONS_PENDING.inc_by(inserted as u64);
        Ok(inserted)
    }
}

/// Polls the feed's size and reports changes to the tracker
pub struct FeedWatcher {
    interval: Duration,
}

/// Identifies the file behind a path, so a feed renamed over the old one is
/// told apart from the old one growing
#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_identity(meta: &std::fs::Metadata) -> u64 {
    meta.created()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl FeedWatcher {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn spawn(self, tracker: Arc<MempoolTracker>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "[MEMPOOL] Watching {} (poll: {:?})",
                tracker.path().display(),
                self.interval
            );
            let mut ticker = tokio::time::interval(self.interval);
            let mut last: Option<(u64, u64)> = None;
            loop {
                ticker.tick().await;
                let (identity, size) = match tokio::fs::metadata(tracker.path()).await {
                    Ok(meta) => (file_identity(&meta), meta.len()),
                    Err(_) => {
                        // a missing feed starts over
                        if last.take().is_some() {
                            tracker.reset().await;
                        }
                        continue;
                    }
                };
                match last {
                    Some(seen) if seen == (identity, size) => continue,
                    Some((seen, _)) if seen != identity => {
                        debug!("[MEMPOOL] {} replaced, rereading", tracker.path().display());
                        tracker.reset().await;
                    }
                    _ => {}
                }
                last = Some((identity, size));
                if let Err(e) = tracker.on_growth(size).await {
                    warn!("[MEMPOOL] {}", e);
                }
            }
        })
    }
}

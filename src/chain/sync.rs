//! Chain Synchronizer
//!
//! Every advertised tip goes through the same pipeline:
//!
//! 1. dedup gate (recently seen block ids)
//! 2. existence check against storage
//! 3. download and verify height, hash and type
//! 4. queue the parent as a backward extension
//! 5. process and store documents
//! 6. integrity sweep below a new tip (never for extensions)
//!
//! Checks are queued on an unbounded worklist and run under a semaphore, so
//! a long parent walk never grows the stack and never blocks other tips.

use dashmap::DashSet;
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::documents::{block_document, reward_document, TransactionDocument};
use super::gate::RecentCache;
use super::ledger::{
    build_richlist, diff_ledger, ledger_documents, richlist_documents, snapshot_from_ledger,
    snapshot_from_richlist, AccountBalance, SnapshotOrigin,
};
use crate::economics::{is_neogenesis_height, SupplySummary, NEOGENESIS_INTERVAL};
use crate::error::{IndexerError, Result};
use crate::metrics;
use crate::p2p::PeerDirectory;
use crate::protocol::{Block, BlockType, ProtocolClient};
use crate::storage::{ids, Collection, Storage, UpdateMode};

/// One queued block check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub peer: Ipv4Addr,
    pub height: u64,
    pub hash: String,
    /// Set for parents reached by walking backward from a tip
    pub extension: bool,
}

/// Notifications for consumers of stored data
#[derive(Debug, Clone)]
pub enum IndexEvent {
    Block {
        height: u64,
        hash: String,
        block_type: BlockType,
        /// Reached by a backward walk; consumers may skip cosmetic work
        extension: bool,
    },
    Ledger {
        height: u64,
        hash: String,
        deltas: usize,
        richlist: usize,
        supply: SupplySummary,
    },
    Transactions {
        height: u64,
        hash: String,
        count: usize,
    },
    Rejected {
        peer: Ipv4Addr,
        height: u64,
        hash: String,
        reason: String,
    },
}

/// Result of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Block id was already seen recently
    Gated,
    /// Block already in storage
    Stored,
    /// Another worker is processing this block
    Busy,
    /// Downloaded, verified and stored
    Indexed,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub dedup_capacity: usize,
    pub workers: usize,
    pub integrity_sweep: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dedup_capacity: 4096,
            workers: num_cpus::get().max(1) * 2,
            integrity_sweep: true,
        }
    }
}

/// Removes the block id from the processing set when dropped
struct ProcessingGuard<'a> {
    processing: &'a DashSet<String>,
    id: String,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.processing.remove(&self.id);
    }
}

pub struct ChainSync {
    client: Arc<dyn ProtocolClient>,
    store: Arc<dyn Storage>,
    directory: Arc<PeerDirectory>,
    recent: RecentCache,
    processing: DashSet<String>,
    jobs: mpsc::UnboundedSender<SyncJob>,
    pending_jobs: Mutex<Option<mpsc::UnboundedReceiver<SyncJob>>>,
    events: broadcast::Sender<IndexEvent>,
    options: SyncOptions,
}

impl ChainSync {
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        store: Arc<dyn Storage>,
        directory: Arc<PeerDirectory>,
        options: SyncOptions,
    ) -> Arc<Self> {
        let (jobs, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            client,
            store,
            directory,
            recent: RecentCache::new(options.dedup_capacity),
            processing: DashSet::new(),
            jobs,
            pending_jobs: Mutex::new(Some(rx)),
            events,
            options,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: IndexEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Queue a check of an advertised tip
    pub fn check(&self, peer: Ipv4Addr, height: u64, hash: &str) {
        self.submit(SyncJob {
            peer,
            height,
            hash: hash.to_string(),
            extension: false,
        });
    }

    pub fn submit(&self, job: SyncJob) {
        if self.jobs.send(job).is_err() {
            warn!("[SYNC] worklist closed, dropping job");
        }
    }

    /// Start the dispatcher. Can only be called once.
    pub fn spawn(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self.pending_jobs.lock().take()?;
        let this = Arc::clone(self);
        let semaphore = Arc::new(Semaphore::new(this.options.workers.max(1)));

        Some(tokio::spawn(async move {
            info!("[SYNC] Dispatcher started with {} workers", this.options.workers);
            while let Some(job) = rx.recv().await {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let worker = Arc::clone(&this);
                tokio::spawn(async move {
                    let _permit = permit;
                    worker.run_job(job).await;
                });
            }
            info!("[SYNC] Dispatcher stopped");
        }))
    }

    /// Run one job, logging failures. Failures never affect other jobs.
    pub async fn run_job(&self, job: SyncJob) -> Option<CheckOutcome> {
        match self.check_now(&job).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                match &e {
                    IndexerError::Mismatch { .. } | IndexerError::InvalidBlock { .. } => {
                        metrics::BLOCKS_REJECTED.inc();
                        warn!("[SYNC] {}", e);
                        self.emit(IndexEvent::Rejected {
                            peer: job.peer,
                            height: job.height,
                            hash: job.hash.clone(),
                            reason: e.to_string(),
                        });
                    }
                    e if e.is_transient() => debug!(
                        "[SYNC] {}/{} from {}: {}",
                        job.height, job.hash, job.peer, e
                    ),
                    e => error!(
                        "[SYNC] {}/{} from {}: {}",
                        job.height, job.hash, job.peer, e
                    ),
                }
                None
            }
        }
    }

    /// Check a block immediately, queueing its parent on success
    pub async fn check_now(&self, job: &SyncJob) -> Result<CheckOutcome> {
        if !ids::is_hex(&job.hash) {
            return Err(IndexerError::Mismatch {
                peer: job.peer.to_string(),
                height: job.height,
                reason: format!("advertised hash {:?} is not hex", job.hash),
            });
        }
        let id = ids::block_id(job.height, &job.hash);
        if !self.recent.admit(&id) {
            return Ok(CheckOutcome::Gated);
        }
        if self.store.has(Collection::Block, &id)? {
            return Ok(CheckOutcome::Stored);
        }
        if !self.processing.insert(id.clone()) {
            return Ok(CheckOutcome::Busy);
        }
        let guard = ProcessingGuard {
            processing: &self.processing,
            id,
        };

        let block = self.download(job.peer, job.height, &job.hash).await?;
        if block.height > 0 {
            self.submit(SyncJob {
                peer: job.peer,
                height: block.height - 1,
                hash: block.parent_hash.clone(),
                extension: true,
            });
        }
        self.process_block(&block, job.peer, job.extension).await?;
        drop(guard);

        if !job.extension && self.options.integrity_sweep {
            if let Err(e) = self.verify_integrity(job.height, &job.hash).await {
                warn!("[INTEGRITY] {}", e);
            }
        }
        Ok(CheckOutcome::Indexed)
    }

    /// Download a block and verify it is what the peer advertised
    pub async fn download(&self, peer: Ipv4Addr, height: u64, hash: &str) -> Result<Block> {
        let block = self.client.download_block(peer, height).await?;
        let mismatch = |reason: String| IndexerError::Mismatch {
            peer: peer.to_string(),
            height,
            reason,
        };

        if block.height != height {
            return Err(mismatch(format!("got height {}", block.height)));
        }
        if !block.hash.eq_ignore_ascii_case(hash) {
            return Err(mismatch(format!("got hash {}", block.hash)));
        }
        if block.block_type == BlockType::Invalid {
            return Err(IndexerError::InvalidBlock {
                peer: peer.to_string(),
                height,
                hash: hash.to_string(),
            });
        }
        if block.block_type.carries_ledger() != is_neogenesis_height(height) {
            return Err(mismatch(format!(
                "{} block at height {}",
                block.block_type.as_str(),
                height
            )));
        }
        Ok(block)
    }

    /// Store every document derived from a verified block. The block document
    /// is written last so its presence means the block is fully indexed.
    pub async fn process_block(&self, block: &Block, peer: Ipv4Addr, extension: bool) -> Result<()> {
        match block.block_type {
            BlockType::Genesis | BlockType::Neogenesis => self.process_ledger(block, peer).await?,
            BlockType::Normal => self.process_transactions(block)?,
            BlockType::Pseudo | BlockType::Invalid => {}
        }

        let doc = block_document(block)?;
        if self.store.insert(Collection::Block, &[doc])? > 0 {
            metrics::BLOCKS_STORED.inc();
            info!(
                "[SYNC] Stored {} block {}/{}",
                block.block_type.as_str(),
                block.height,
                short(&block.hash)
            );
        }
        self.emit(IndexEvent::Block {
            height: block.height,
            hash: block.hash.clone(),
            block_type: block.block_type,
            extension,
        });
        Ok(())
    }

    fn process_transactions(&self, block: &Block) -> Result<()> {
        let mut count = 0;
        for tx in &block.transactions {
            let doc = TransactionDocument::confirmed(tx, block);
            count += self
                .store
                .update(Collection::Transaction, &doc.id(), &doc.to_patch()?, UpdateMode::Upsert)?;
        }
        if let Some(reward) = reward_document(block)? {
            self.store.insert(Collection::Transaction, &[reward])?;
        }
        metrics::TRANSACTIONS_CONFIRMED.inc_by(count as u64);
        self.emit(IndexEvent::Transactions {
            height: block.height,
            hash: block.hash.clone(),
            count,
        });
        Ok(())
    }

    async fn process_ledger(&self, block: &Block, peer: Ipv4Addr) -> Result<()> {
        let current = snapshot_from_ledger(&block.ledger);
        let prior = self.prior_snapshot(block.height, peer).await?;

        let height = block.height;
        let hash = block.hash.clone();
        let timestamp = block.stime;
        let (deltas, richlist) = tokio::task::spawn_blocking(move || {
            let origin = SnapshotOrigin {
                height,
                hash: &hash,
                timestamp,
            };
            let deltas = diff_ledger(origin, &current, &prior);
            let richlist = build_richlist(origin, &current);
            (deltas, richlist)
        })
        .await
        .map_err(|e| IndexerError::Corrupt(format!("ledger worker failed: {}", e)))?;

        let stored_deltas = self
            .store
            .insert(Collection::Ledger, &ledger_documents(&deltas)?)?;
        let stored_ranks = self
            .store
            .insert(Collection::Richlist, &richlist_documents(&richlist)?)?;
        metrics::LEDGER_DELTAS.inc_by(stored_deltas as u64);

        let supply = SupplySummary::compute(
            block.height,
            block.ledger_amount(),
            chrono::Utc::now().timestamp_millis().max(0) as u64,
        );
        info!(
            "[LEDGER] {}/{}: {} deltas, {} ranked accounts",
            block.height,
            short(&block.hash),
            stored_deltas,
            stored_ranks
        );
        self.emit(IndexEvent::Ledger {
            height: block.height,
            hash: block.hash.clone(),
            deltas: deltas.len(),
            richlist: richlist.len(),
            supply,
        });
        Ok(())
    }

    /// Ledger of the (neo)genesis block one epoch below `height`. Read from
    /// the stored rich-list when exactly one block is stored at that height,
    /// otherwise downloaded from `peer`.
    pub async fn prior_snapshot(&self, height: u64, peer: Ipv4Addr) -> Result<Vec<AccountBalance>> {
        if height < NEOGENESIS_INTERVAL {
            return Ok(Vec::new());
        }
        let prior_height = height - NEOGENESIS_INTERVAL;

        let stored = self
            .store
            .find(Collection::Block, &ids::height_prefix(prior_height))?;
        if let [only] = stored.as_slice() {
            let prefix = format!("{}-", only.id);
            let docs = self.store.find(Collection::Richlist, &prefix)?;
            if let Some(snapshot) = snapshot_from_richlist(&docs).filter(|s| !s.is_empty()) {
                return Ok(snapshot);
            }
        }

        debug!("[LEDGER] downloading prior ledger {} from {}", prior_height, peer);
        let prior = self.client.download_block(peer, prior_height).await?;
        if prior.height != prior_height || !prior.block_type.carries_ledger() {
            return Err(IndexerError::Mismatch {
                peer: peer.to_string(),
                height: prior_height,
                reason: format!("expected a ledger block, got {}", prior.block_type.as_str()),
            });
        }
        Ok(snapshot_from_ledger(&prior.ledger))
    }

    /// Walk parent links below a new tip and repair missing blocks from OK
    /// peers. The depth is twice the lowest set bit of `height`, capped at
    /// `height`. Returns the number of blocks repaired.
    pub async fn verify_integrity(&self, height: u64, hash: &str) -> Result<usize> {
        let mut remaining = backscan_depth(height);
        if remaining > 0xff {
            info!("[INTEGRITY] {} block backscan from {}", remaining, height);
        }

        let mut height = height;
        let mut hash = hash.to_string();
        let mut repaired = 0;
        while remaining > 0 {
            remaining -= 1;
            let id = ids::block_id(height, &hash);

            let parent_hash = match self.store.find_one(Collection::Block, &id)? {
                Some(doc) => doc
                    .get("phash")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| IndexerError::Corrupt(format!("block {} has no phash", id)))?,
                None => {
                    let block = self.repair(height, &hash).await.ok_or_else(|| {
                        IndexerError::Corrupt(format!(
                            "integrity failure at {}/{}: no peer could supply it",
                            height,
                            short(&hash)
                        ))
                    })?;
                    repaired += 1;
                    block.parent_hash
                }
            };

            if height == 0 {
                break;
            }
            height -= 1;
            hash = parent_hash;
        }

        debug!("[INTEGRITY] verified ({} repaired)", repaired);
        Ok(repaired)
    }

    /// Download a missing block from OK peers in ascending ip order. A block
    /// stored here queues its parent, the same as a block stored by a check,
    /// so a parent walk that finds it already stored is carried on from here.
    /// A block some worker is already processing is left to that worker.
    async fn repair(&self, height: u64, hash: &str) -> Option<Block> {
        for peer in self.directory.ok_peers() {
            match self.download(peer.ip, height, hash).await {
                Ok(block) => {
                    let id = ids::block_id(height, hash);
                    if self.processing.insert(id.clone()) {
                        let _guard = ProcessingGuard {
                            processing: &self.processing,
                            id,
                        };
                        if let Err(e) = self.process_block(&block, peer.ip, true).await {
                            warn!("[INTEGRITY] {}/{} from {}: {}", height, short(hash), peer.ip, e);
                            continue;
                        }
                        if height > 0 {
                            self.submit(SyncJob {
                                peer: peer.ip,
                                height: height - 1,
                                hash: block.parent_hash.clone(),
                                extension: true,
                            });
                        }
                    }
                    return Some(block);
                }
                Err(e) => debug!("[INTEGRITY] {}/{} from {}: {}", height, short(hash), peer.ip, e),
            }
        }
        None
    }
}

/// Twice the lowest set bit of `height`, capped at `height`
pub fn backscan_depth(height: u64) -> u64 {
    if height == 0 {
        return 0;
    }
    let lowest = height & height.wrapping_neg();
    lowest.saturating_mul(2).min(height)
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

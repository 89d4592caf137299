//! Crawl Scheduler
//!
//! Drives the crawl on a fixed tick. Each tick:
//! - seeds the directory when it is empty or the network has been silent
//!   for longer than the idle threshold (with a backoff after failures)
//! - evicts stale peers
//! - fires a probe for every peer outside its update window
//! - resolves the consensus tip and hands it to the chain synchronizer

use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bootstrap::Bootstrapper;
use super::consensus::{resolve, ConsensusTarget};
use super::directory::{Peer, PeerDirectory};
use crate::chain::ChainSync;
use crate::config::IndexerConfig;
use crate::error::{IndexerError, Result};
use crate::metrics;
use crate::protocol::{PeerStatus, ProtocolClient};
use crate::storage::{ids, Collection, Storage, UpdateMode};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub tick: Duration,
    pub idle_threshold_ms: i64,
    pub seed_retry_ms: i64,
}

impl SchedulerOptions {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            tick: config.tick_interval(),
            idle_threshold_ms: (config.idle_threshold_secs as i64).saturating_mul(1000),
            seed_retry_ms: (config.seed_retry_secs as i64).saturating_mul(1000),
        }
    }
}

#[derive(Debug, Default)]
struct CrawlState {
    /// When the directory last went without any OK peer
    idle_since: Option<i64>,
    /// Earliest time another seeding round may run
    next_seed_at: i64,
}

/// What a single tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub seeded: bool,
    pub evicted: usize,
    /// Probes fired this tick; dropping the handles leaves them running
    pub probes: Vec<JoinHandle<()>>,
    pub target: Option<ConsensusTarget>,
}

pub struct CrawlScheduler {
    directory: Arc<PeerDirectory>,
    client: Arc<dyn ProtocolClient>,
    bootstrap: Bootstrapper,
    sync: Arc<ChainSync>,
    store: Arc<dyn Storage>,
    state: Mutex<CrawlState>,
    options: SchedulerOptions,
}

impl CrawlScheduler {
    pub fn new(
        directory: Arc<PeerDirectory>,
        client: Arc<dyn ProtocolClient>,
        bootstrap: Bootstrapper,
        sync: Arc<ChainSync>,
        store: Arc<dyn Storage>,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            directory,
            client,
            bootstrap,
            sync,
            store,
            state: Mutex::new(CrawlState::default()),
            options,
        })
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Load peer state persisted by earlier runs into the directory, so a
    /// restart resumes the crawl instead of reseeding. Undecodable entries
    /// are skipped. Returns the number of peers restored.
    pub fn restore_peers(&self) -> Result<usize> {
        let mut restored = 0;
        for doc in self.store.find(Collection::Network, "")? {
            match serde_json::from_value::<Peer>(doc.body) {
                Ok(peer) => {
                    if self.directory.restore(peer) {
                        restored += 1;
                    }
                }
                Err(e) => warn!("[CRAWL] Skipping stored peer {}: {}", doc.id, e),
            }
        }
        info!("[CRAWL] Restored {} peers", restored);
        Ok(restored)
    }

    /// Run ticks forever
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!("[CRAWL] Starting crawl scheduler (tick: {:?})", this.options.tick);
            let mut ticker = tokio::time::interval(this.options.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now().timestamp_millis();
                this.tick(now).await;
            }
        })
    }

    pub async fn tick(self: &Arc<Self>, now: i64) -> TickReport {
        let mut report = TickReport {
            seeded: self.maybe_seed(now).await,
            ..Default::default()
        };

        let evicted = self.directory.evict_stale(now);
        metrics::PEERS_EVICTED.inc_by(evicted.len() as u64);
        report.evicted = evicted.len();

        for peer in self.directory.snapshot() {
            if let Some(handle) = self.spawn_probe(peer.ip, now) {
                report.probes.push(handle);
            }
        }

        let ok = self.directory.ok_count();
        {
            let mut state = self.state.lock();
            if ok == 0 {
                if state.idle_since.is_none() {
                    warn!("[CRAWL] No OK peers, network communication lost");
                    state.idle_since = Some(now);
                }
            } else {
                state.idle_since = None;
            }
        }

        report.target = resolve(&self.directory.ok_peers());
        if let Some(target) = &report.target {
            metrics::CONSENSUS_HEIGHT.set(target.height as i64);
            if let Some(peer) = target.peers.first() {
                self.sync.check(*peer, target.height, &target.hash);
            }
        }

        metrics::PEERS_KNOWN.set(self.directory.len() as i64);
        metrics::PEERS_OK.set(ok as i64);
        report
    }

    /// Seed when the directory is empty or idle past the threshold
    async fn maybe_seed(&self, now: i64) -> bool {
        let due = {
            let state = self.state.lock();
            let idle_expired = state
                .idle_since
                .map(|t| now.saturating_sub(t) >= self.options.idle_threshold_ms)
                .unwrap_or(false);
            (self.directory.is_empty() || idle_expired) && now >= state.next_seed_at
        };
        if !due {
            return false;
        }

        info!("[CRAWL] Seeding peer directory");
        match self.bootstrap.seed(&self.directory, now).await {
            Ok(count) => {
                let mut state = self.state.lock();
                state.idle_since = None;
                debug!("[CRAWL] Seeded with {} peers", count);
                true
            }
            Err(e) => {
                metrics::BOOTSTRAP_FAILURES.inc();
                let mut state = self.state.lock();
                state.next_seed_at = now.saturating_add(self.options.seed_retry_ms);
                warn!(
                    "[BOOTSTRAP] {}; retrying in {}s",
                    e,
                    self.options.seed_retry_ms / 1000
                );
                false
            }
        }
    }

    /// Fire a probe for `ip` unless it is in flight or inside its update
    /// window. Newly discovered peers get their own probe right away.
    pub fn spawn_probe(self: &Arc<Self>, ip: Ipv4Addr, now: i64) -> Option<JoinHandle<()>> {
        if !self.directory.due_for_probe(&ip, now) {
            return None;
        }
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let Some(outcome) = this.directory.probe(this.client.as_ref(), ip, now).await else {
                return;
            };
            let label = match outcome.status {
                PeerStatus::Ok => "ok",
                PeerStatus::Timeout => "timeout",
                PeerStatus::Error => "error",
            };
            metrics::PROBES.with_label_values(&[label]).inc();
            this.persist_peer(ip);

            for discovered in outcome.discovered {
                this.spawn_probe(discovered, now);
            }
        }))
    }

    fn persist_peer(&self, ip: Ipv4Addr) {
        let Some(peer) = self.directory.get(&ip) else {
            return;
        };
        let result = serde_json::to_value(&peer)
            .map_err(IndexerError::from)
            .and_then(|patch| {
                self.store
                    .update(Collection::Network, &ids::network_id(ip), &patch, UpdateMode::Upsert)
            });
        if let Err(e) = result {
            warn!("[CRAWL] Failed to store state of {}: {}", ip, e);
        }
    }
}

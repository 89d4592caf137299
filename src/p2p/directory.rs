//! Peer Directory
//!
//! Tracks every node discovered through seeding or gossip. A peer is created
//! on first discovery, refreshed by each probe and evicted only when it is
//! neither reachable nor OK within the staleness window.

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::{debug, info};

use super::{is_private_ipv4, routable_ipv4};
use crate::protocol::{PeerStatus, ProbeReply, ProtocolClient, DEFAULT_PORT};

/// Known state of one node. Timestamps are unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
    /// Status of the latest probe, `None` until probed
    pub status: Option<PeerStatus>,
    /// Tip height claimed by the latest OK probe
    pub height: u64,
    /// Tip hash claimed by the latest OK probe
    pub hash: Option<String>,
    /// Routable peers advertised by the latest OK probe
    pub peers: Vec<Ipv4Addr>,
    pub last_ok: Option<i64>,
    /// Start of the current run of OK probes
    pub up_since: Option<i64>,
    pub last_probe: Option<i64>,
    pub discovered_at: i64,
    /// Where the peer was first learned from (source URL/file or gossiping ip)
    pub source: String,
}

impl Peer {
    pub fn new(ip: Ipv4Addr, source: &str, now: i64) -> Self {
        Self {
            ip,
            port: DEFAULT_PORT,
            status: None,
            height: 0,
            hash: None,
            peers: Vec::new(),
            last_ok: None,
            up_since: None,
            last_probe: None,
            discovered_at: now,
            source: source.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.map(|s| s.is_ok()).unwrap_or(false)
    }

    /// Apply an OK probe reply
    pub fn mark_ok(&mut self, reply: &ProbeReply, now: i64) {
        self.status = Some(PeerStatus::Ok);
        self.port = reply.port;
        self.height = reply.height;
        self.hash = reply.hash.clone();
        self.peers = reply
            .peers
            .iter()
            .filter_map(|p| routable_ipv4(p))
            .filter(|p| *p != self.ip)
            .collect();
        self.last_ok = Some(now);
        if self.up_since.is_none() {
            self.up_since = Some(now);
        }
        self.last_probe = Some(now);
    }

    /// Apply a failed probe
    pub fn mark_failure(&mut self, status: PeerStatus, now: i64) {
        self.status = Some(status);
        self.up_since = None;
        self.last_probe = Some(now);
    }

    pub fn probed_within(&self, window_ms: i64, now: i64) -> bool {
        self.last_probe
            .map(|t| now.saturating_sub(t) < window_ms)
            .unwrap_or(false)
    }
}

/// Outcome of a completed probe
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub status: PeerStatus,
    /// Peers that were unknown before this probe
    pub discovered: Vec<Ipv4Addr>,
}

/// Removes the ip from the probing set when the probe ends, however it ends
struct ProbeGuard<'a> {
    probing: &'a DashSet<Ipv4Addr>,
    ip: Ipv4Addr,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probing.remove(&self.ip);
    }
}

pub struct PeerDirectory {
    peers: DashMap<Ipv4Addr, Peer>,
    probing: DashSet<Ipv4Addr>,
    probe_interval_ms: i64,
    stale_after_ms: i64,
}

impl PeerDirectory {
    pub fn new(probe_interval_secs: u64, stale_after_secs: u64) -> Self {
        Self {
            peers: DashMap::new(),
            probing: DashSet::new(),
            probe_interval_ms: (probe_interval_secs as i64).saturating_mul(1000),
            stale_after_ms: (stale_after_secs as i64).saturating_mul(1000),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, ip: &Ipv4Addr) -> Option<Peer> {
        self.peers.get(ip).map(|p| p.clone())
    }

    /// Admit a peer. Returns true when the peer was not known before.
    /// Private addresses are refused.
    pub fn add_or_refresh(&self, ip: Ipv4Addr, source: &str, now: i64) -> bool {
        if is_private_ipv4(&ip) {
            return false;
        }
        let mut inserted = false;
        self.peers.entry(ip).or_insert_with(|| {
            inserted = true;
            Peer::new(ip, source, now)
        });
        if inserted {
            debug!("[CRAWL] {} discovered via {}", ip, source);
        }
        inserted
    }

    /// Reload a peer persisted by an earlier run. Its last probe result is
    /// dropped so the first tick probes it again; discovery and OK history
    /// are kept for staleness. Returns false for private or known peers.
    pub fn restore(&self, mut peer: Peer) -> bool {
        if is_private_ipv4(&peer.ip) || self.peers.contains_key(&peer.ip) {
            return false;
        }
        peer.status = None;
        peer.up_since = None;
        peer.last_probe = None;
        self.peers.insert(peer.ip, peer);
        true
    }

    /// Admit many peers, returning the ones that were new
    pub fn add_all(&self, ips: &[Ipv4Addr], source: &str, now: i64) -> Vec<Ipv4Addr> {
        ips.iter()
            .copied()
            .filter(|ip| self.add_or_refresh(*ip, source, now))
            .collect()
    }

    /// Record a probe reply and merge the advertised peer list.
    /// Returns the peers that were unknown before.
    pub fn apply_probe(&self, ip: Ipv4Addr, reply: &ProbeReply, now: i64) -> Vec<Ipv4Addr> {
        let advertised = {
            let mut peer = self
                .peers
                .entry(ip)
                .or_insert_with(|| Peer::new(ip, "probe", now));
            if reply.status.is_ok() {
                peer.mark_ok(reply, now);
                peer.peers.clone()
            } else {
                peer.mark_failure(reply.status, now);
                Vec::new()
            }
        };
        self.add_all(&advertised, &ip.to_string(), now)
    }

    /// Probe a peer unless it is already being probed or was probed within the
    /// update window. Returns `None` when the probe was skipped.
    pub async fn probe(
        &self,
        client: &dyn ProtocolClient,
        ip: Ipv4Addr,
        now: i64,
    ) -> Option<ProbeOutcome> {
        if !self.due_for_probe(&ip, now) || !self.probing.insert(ip) {
            return None;
        }
        let _guard = ProbeGuard {
            probing: &self.probing,
            ip,
        };

        let reply = match client.probe(ip).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("[CRAWL] probe {} failed: {}", ip, e);
                ProbeReply::failed(PeerStatus::Error)
            }
        };
        let discovered = self.apply_probe(ip, &reply, now);
        if !discovered.is_empty() {
            debug!("[CRAWL] {} added {} peers", ip, discovered.len());
        }
        Some(ProbeOutcome {
            status: reply.status,
            discovered,
        })
    }

    pub fn is_probing(&self, ip: &Ipv4Addr) -> bool {
        self.probing.contains(ip)
    }

    /// Not in flight and not probed within the update window
    pub fn due_for_probe(&self, ip: &Ipv4Addr, now: i64) -> bool {
        !self.probing.contains(ip)
            && !self
                .peers
                .get(ip)
                .map(|p| p.probed_within(self.probe_interval_ms, now))
                .unwrap_or(false)
    }

    /// All peers in ascending ip order
    pub fn snapshot(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.iter().map(|e| e.value().clone()).collect();
        peers.sort_by_key(|p| p.ip);
        peers
    }

    /// OK peers in ascending ip order
    pub fn ok_peers(&self) -> Vec<Peer> {
        self.snapshot().into_iter().filter(|p| p.is_ok()).collect()
    }

    pub fn ok_count(&self) -> usize {
        self.peers.iter().filter(|p| p.is_ok()).count()
    }

    /// OK peers plus every routable peer they advertise
    pub fn reachable_set(&self) -> HashSet<Ipv4Addr> {
        let mut set = HashSet::new();
        for peer in self.peers.iter().filter(|p| p.is_ok()) {
            set.insert(peer.ip);
            set.extend(peer.peers.iter().copied());
        }
        set
    }

    /// Drop peers outside the reachable set that have not been OK within the
    /// staleness window. Peers never seen OK age from their discovery time.
    pub fn evict_stale(&self, now: i64) -> Vec<Ipv4Addr> {
        let reachable = self.reachable_set();
        let cutoff = now.saturating_sub(self.stale_after_ms);
        let stale: Vec<Ipv4Addr> = self
            .peers
            .iter()
            .filter(|p| {
                !p.is_ok()
                    && !reachable.contains(&p.ip)
                    && p.last_ok.unwrap_or(p.discovered_at) < cutoff
            })
            .map(|p| p.ip)
            .collect();

        for ip in &stale {
            self.peers.remove(ip);
        }
        if !stale.is_empty() {
            info!("[CRAWL] Evicted {} stale peers", stale.len());
        }
        stale
    }
}

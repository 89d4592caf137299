//! Consensus Resolver
//!
//! Plurality vote over the tips claimed by OK peers. The vote key is the
//! claimed hash; the height travels with it. Ties go to the key seen first,
//! and peers are expected in ascending ip order so the outcome is stable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

use super::directory::Peer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusTarget {
    pub height: u64,
    pub hash: String,
    /// Number of OK peers advertising this tip
    pub votes: usize,
    /// OK peers advertising this tip, in the order they were counted
    pub peers: Vec<Ipv4Addr>,
}

pub fn resolve(peers: &[Peer]) -> Option<ConsensusTarget> {
    let mut order: Vec<ConsensusTarget> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for peer in peers.iter().filter(|p| p.is_ok()) {
        let Some(hash) = peer.hash.as_deref() else {
            continue;
        };
        match index.get(hash) {
            Some(&i) => {
                order[i].votes += 1;
                order[i].peers.push(peer.ip);
            }
            None => {
                index.insert(hash, order.len());
                order.push(ConsensusTarget {
                    height: peer.height,
                    hash: hash.to_string(),
                    votes: 1,
                    peers: vec![peer.ip],
                });
            }
        }
    }

    // strict comparison keeps the earliest key on ties
    let mut best: Option<ConsensusTarget> = None;
    for candidate in order {
        if best.as_ref().map_or(true, |b| candidate.votes > b.votes) {
            best = Some(candidate);
        }
    }
    best
}

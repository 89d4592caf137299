//! Ledger Differ & Rich-list Builder
//!
//! A (neo)genesis block carries the full ledger. Instead of storing every
//! snapshot, the indexer stores the changes against the snapshot 256 heights
//! earlier, plus a rich-list of the current snapshot.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::Result;
use crate::protocol::LedgerEntry;
use crate::storage::{ids, Document};

/// One account of a ledger snapshot, keyed by tag or address hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub key: String,
    pub balance: u64,
}

pub fn snapshot_from_ledger(ledger: &[LedgerEntry]) -> Vec<AccountBalance> {
    ledger
        .iter()
        .map(|entry| AccountBalance {
            key: entry.address.key(),
            balance: entry.balance,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDelta {
    pub height: u64,
    pub hash: String,
    pub key: String,
    pub balance: u64,
    pub delta: i128,
    /// Solve time of the block
    pub timestamp: u64,
}

impl LedgerDelta {
    pub fn id(&self) -> String {
        ids::ledger_id(self.height, &self.hash, &self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichlistEntry {
    pub height: u64,
    pub hash: String,
    /// 1-based
    pub rank: u64,
    pub key: String,
    pub balance: u64,
}

impl RichlistEntry {
    pub fn id(&self) -> String {
        ids::richlist_id(self.height, &self.hash, self.rank)
    }
}

/// Block the snapshot belongs to
#[derive(Debug, Clone, Copy)]
pub struct SnapshotOrigin<'a> {
    pub height: u64,
    pub hash: &'a str,
    pub timestamp: u64,
}

/// Changes from `prior` to `current`. Accounts missing from `current` are
/// reported as spent to zero.
pub fn diff_ledger(
    origin: SnapshotOrigin<'_>,
    current: &[AccountBalance],
    prior: &[AccountBalance],
) -> Vec<LedgerDelta> {
    let mut remaining: HashMap<&str, u64> =
        prior.iter().map(|a| (a.key.as_str(), a.balance)).collect();
    let make = |key: &str, balance: u64, delta: i128| LedgerDelta {
        height: origin.height,
        hash: origin.hash.to_string(),
        key: key.to_string(),
        balance,
        delta,
        timestamp: origin.timestamp,
    };

    let mut deltas = Vec::new();
    for account in current {
        let before = remaining.remove(account.key.as_str()).unwrap_or(0);
        let delta = account.balance as i128 - before as i128;
        if delta != 0 {
            deltas.push(make(&account.key, account.balance, delta));
        }
    }

    // prior order keeps the output deterministic
    for account in prior {
        if let Some(before) = remaining.remove(account.key.as_str()) {
            deltas.push(make(&account.key, 0, -(before as i128)));
        }
    }
    deltas
}

/// Rank a snapshot by balance, highest first. Equal balances keep their
/// snapshot order.
pub fn build_richlist(origin: SnapshotOrigin<'_>, snapshot: &[AccountBalance]) -> Vec<RichlistEntry> {
    let mut sorted = snapshot.to_vec();
    sorted.par_sort_by(|a, b| b.balance.cmp(&a.balance));
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, account)| RichlistEntry {
            height: origin.height,
            hash: origin.hash.to_string(),
            rank: i as u64 + 1,
            key: account.key,
            balance: account.balance,
        })
        .collect()
}

/// Rebuild a snapshot from stored rich-list documents. Returns `None` when
/// any document fails to decode, since a partial snapshot would turn the
/// missing accounts into new ones in the next diff.
pub fn snapshot_from_richlist(docs: &[Document]) -> Option<Vec<AccountBalance>> {
    let mut entries: Vec<(u64, AccountBalance)> = Vec::with_capacity(docs.len());
    for doc in docs {
        match serde_json::from_value::<RichlistEntry>(doc.body.clone()) {
            Ok(e) => entries.push((
                e.rank,
                AccountBalance {
                    key: e.key,
                    balance: e.balance,
                },
            )),
            Err(e) => {
                warn!("[LEDGER] unreadable rich-list entry {}: {}", doc.id, e);
                return None;
            }
        }
    }
    entries.sort_by_key(|(rank, _)| *rank);
    Some(entries.into_iter().map(|(_, account)| account).collect())
}

pub fn ledger_documents(deltas: &[LedgerDelta]) -> Result<Vec<Document>> {
    deltas.iter().map(|d| Document::new(d.id(), d)).collect()
}

pub fn richlist_documents(entries: &[RichlistEntry]) -> Result<Vec<Document>> {
    entries.iter().map(|e| Document::new(e.id(), e)).collect()
}

//! Protocol client contract
//!
//! The Mochimo wire protocol (handshakes, block/trailer layouts, signatures) is
//! handled by an external client. The indexer only depends on the logical
//! contract below: probe a peer, download a block by height, and decode the
//! fixed-size transaction records of the mempool feed.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod gateway;
pub mod txentry;

pub use gateway::GatewayClient;
pub use txentry::{TxEntry, TX_ENTRY_LEN};

/// Tag carried by addresses that have never been tagged
pub const DEFAULT_TAG: &str = "420000000e00000001000000";

/// Length of an address tag in bytes
pub const TAG_LEN: usize = 12;

/// Default Mochimo node port
pub const DEFAULT_PORT: u16 = 2095;

/// Outcome of a peer handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Handshake completed (VEOK)
    Ok,
    /// Peer did not answer in time
    Timeout,
    /// Peer answered with an error or garbage
    Error,
}

impl PeerStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, PeerStatus::Ok)
    }
}

/// Result of a liveness probe with peer-list request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReply {
    pub status: PeerStatus,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Height of the peer's current tip
    #[serde(default)]
    pub height: u64,
    /// Hash of the peer's current tip (hex)
    #[serde(default)]
    pub hash: Option<String>,
    /// Peer list as advertised, unfiltered
    #[serde(default)]
    pub peers: Vec<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ProbeReply {
    /// Reply recorded when a probe could not complete
    pub fn failed(status: PeerStatus) -> Self {
        Self {
            status,
            port: DEFAULT_PORT,
            height: 0,
            hash: None,
            peers: Vec::new(),
        }
    }
}

/// Block variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Genesis,
    Neogenesis,
    Normal,
    Pseudo,
    /// Failed decode or hash verification
    Invalid,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Genesis => "genesis",
            BlockType::Neogenesis => "neogenesis",
            BlockType::Normal => "normal",
            BlockType::Pseudo => "pseudo",
            BlockType::Invalid => "invalid",
        }
    }

    /// Blocks that carry a full ledger snapshot
    pub fn carries_ledger(&self) -> bool {
        matches!(self, BlockType::Genesis | BlockType::Neogenesis)
    }
}

/// Raw account address with its optional tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Hex encoded raw address
    #[serde(default)]
    pub raw: String,
    /// Hex encoded tag, `None` when the address carries the default tag
    #[serde(default)]
    pub tag: Option<String>,
}

impl Address {
    /// Interpret raw address bytes; the tag lives in the trailing [`TAG_LEN`] bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let tag = bytes
            .len()
            .checked_sub(TAG_LEN)
            .map(|start| hex::encode(&bytes[start..]))
            .filter(|tag| tag != DEFAULT_TAG);
        Self {
            raw: hex::encode(bytes),
            tag,
        }
    }

    pub fn tagged(tag: &str) -> Self {
        Self {
            raw: String::new(),
            tag: Some(tag.to_string()),
        }
    }

    /// Account key: the tag when present, else a blake3 hash of the raw address
    pub fn key(&self) -> String {
        if let Some(tag) = &self.tag {
            return tag.clone();
        }
        match hex::decode(&self.raw) {
            Ok(bytes) => blake3::hash(&bytes).to_hex().to_string(),
            Err(_) => blake3::hash(self.raw.as_bytes()).to_hex().to_string(),
        }
    }
}

/// One account of a (neo)genesis ledger snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub address: Address,
    pub balance: u64,
}

impl LedgerEntry {
    pub fn tagged(tag: &str, balance: u64) -> Self {
        Self {
            address: Address::tagged(tag),
            balance,
        }
    }
}

/// A decoded, hash-checked block as returned by the protocol client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub parent_hash: String,
    pub block_type: BlockType,
    #[serde(default)]
    pub time0: u64,
    #[serde(default)]
    pub stime: u64,
    #[serde(default)]
    pub difficulty: u32,
    #[serde(default)]
    pub nonce: String,
    /// Miner address, normal blocks only
    #[serde(default)]
    pub miner: Option<Address>,
    #[serde(default)]
    pub mreward: u64,
    #[serde(default)]
    pub mfee: u64,
    #[serde(default)]
    pub transactions: Vec<TxEntry>,
    /// Ledger snapshot, (neo)genesis blocks only
    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
    /// Size of the raw block in bytes
    #[serde(default)]
    pub size: u64,
}

impl Block {
    /// Sum of all ledger balances (0 for blocks without a ledger)
    pub fn ledger_amount(&self) -> u128 {
        self.ledger.iter().map(|e| e.balance as u128).sum()
    }
}

/// Network operations the indexer needs from a Mochimo protocol client.
/// Timeouts are the implementation's responsibility.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Handshake with `ip` and request its peer list
    async fn probe(&self, ip: Ipv4Addr) -> Result<ProbeReply>;

    /// Download the block at `height` from `ip`
    async fn download_block(&self, ip: Ipv4Addr, height: u64) -> Result<Block>;
}

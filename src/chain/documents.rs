//! Block and transaction documents
//!
//! Builders that turn validated blocks and feed records into the JSON
//! documents written to storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::protocol::{Address, Block, BlockType, TxEntry};
use crate::storage::{ids, Document};

/// Address as stored: the account key plus whether it is a tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub key: String,
    pub tagged: bool,
}

impl From<&Address> for AccountRef {
    fn from(address: &Address) -> Self {
        Self {
            key: address.key(),
            tagged: address.tag.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDocument {
    pub height: u64,
    pub hash: String,
    pub phash: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub time0: u64,
    pub stime: u64,
    pub difficulty: u32,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maddr: Option<AccountRef>,
    pub mreward: u64,
    pub mfee: u64,
    pub tcount: usize,
    /// Ledger total, (neo)genesis blocks only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u128>,
    pub size: u64,
}

pub fn block_document(block: &Block) -> Result<Document> {
    let body = BlockDocument {
        height: block.height,
        hash: block.hash.clone(),
        phash: block.parent_hash.clone(),
        block_type: block.block_type,
        time0: block.time0,
        stime: block.stime,
        difficulty: block.difficulty,
        nonce: block.nonce.clone(),
        maddr: block.miner.as_ref().map(AccountRef::from),
        mreward: block.mreward,
        mfee: block.mfee,
        tcount: block.transactions.len(),
        amount: block
            .block_type
            .carries_ledger()
            .then(|| block.ledger_amount()),
        size: block.size,
    };
    Document::new(ids::block_id(block.height, &block.hash), &body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDocument {
    pub txid: String,
    pub status: TxStatus,
    /// Containing block, confirmed transactions only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stime: Option<u64>,
    /// Unix milliseconds the record was first read from the mempool feed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<i64>,
    pub src: AccountRef,
    pub dst: AccountRef,
    pub change: AccountRef,
    pub send_total: u64,
    pub change_total: u64,
    pub fee: u64,
}

impl TransactionDocument {
    fn from_entry(tx: &TxEntry, status: TxStatus) -> Self {
        Self {
            txid: tx.txid.clone(),
            status,
            height: None,
            hash: None,
            stime: None,
            received: None,
            src: AccountRef::from(&tx.src),
            dst: AccountRef::from(&tx.dst),
            change: AccountRef::from(&tx.change),
            send_total: tx.send_total,
            change_total: tx.change_total,
            fee: tx.fee,
        }
    }

    pub fn pending(tx: &TxEntry, received: i64) -> Self {
        Self {
            received: Some(received),
            ..Self::from_entry(tx, TxStatus::Pending)
        }
    }

    pub fn confirmed(tx: &TxEntry, block: &Block) -> Self {
        Self {
            height: Some(block.height),
            hash: Some(block.hash.clone()),
            stime: Some(block.stime),
            ..Self::from_entry(tx, TxStatus::Confirmed)
        }
    }

    pub fn id(&self) -> String {
        ids::transaction_id(&self.txid)
    }

    /// Field patch for `Storage::update`. `received` is left out of confirmed
    /// patches so a pending record keeps its first-seen time.
    pub fn to_patch(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("_id".to_string(), Value::String(self.id()));
        }
        Ok(value)
    }
}

/// Mining reward of a normal block as a pseudo-transaction
pub fn reward_document(block: &Block) -> Result<Option<Document>> {
    if block.block_type != BlockType::Normal {
        return Ok(None);
    }
    let Some(miner) = &block.miner else {
        return Ok(None);
    };
    let body = serde_json::json!({
        "height": block.height,
        "hash": block.hash,
        "stime": block.stime,
        "status": TxStatus::Confirmed,
        "dst": AccountRef::from(miner),
        "send_total": block.mreward,
    });
    Document::new(ids::reward_id(block.height, &block.hash), &body).map(Some)
}

//! Fixed-size transaction records
//!
//! Layout of a mempool transaction entry:
//!
//! | field        | bytes |
//! |--------------|-------|
//! | src address  | 2208  |
//! | dst address  | 2208  |
//! | chg address  | 2208  |
//! | send total   | 8 LE  |
//! | change total | 8 LE  |
//! | fee          | 8 LE  |
//! | signature    | 2144  |
//! | txid         | 32    |

use serde::{Deserialize, Serialize};

use super::Address;
use crate::error::{IndexerError, Result};

pub const ADDR_LEN: usize = 2208;
pub const AMOUNT_LEN: usize = 8;
pub const SIG_LEN: usize = 2144;
pub const TXID_LEN: usize = 32;

/// Total length of one record
pub const TX_ENTRY_LEN: usize = 3 * ADDR_LEN + 3 * AMOUNT_LEN + SIG_LEN + TXID_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEntry {
    /// Hex encoded transaction id
    pub txid: String,
    pub src: Address,
    pub dst: Address,
    pub change: Address,
    pub send_total: u64,
    pub change_total: u64,
    pub fee: u64,
}

impl TxEntry {
    /// Decode exactly one record
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TX_ENTRY_LEN {
            return Err(IndexerError::Corrupt(format!(
                "transaction record is {} bytes, expected {}",
                bytes.len(),
                TX_ENTRY_LEN
            )));
        }

        let (src, rest) = bytes.split_at(ADDR_LEN);
        let (dst, rest) = rest.split_at(ADDR_LEN);
        let (change, rest) = rest.split_at(ADDR_LEN);
        let (send_total, rest) = rest.split_at(AMOUNT_LEN);
        let (change_total, rest) = rest.split_at(AMOUNT_LEN);
        let (fee, rest) = rest.split_at(AMOUNT_LEN);
        let txid = &rest[SIG_LEN..];

        let src = Address::from_bytes(src);
        let dst = Address::from_bytes(dst);
        let change = Address::from_bytes(change);
        let send_total = read_amount(send_total);
        let change_total = read_amount(change_total);
        let fee = read_amount(fee);
        let txid = hex::encode(txid);

        Ok(Self {
            txid,
            src,
            dst,
            change,
            send_total,
            change_total,
            fee,
        })
    }

    /// Decode a buffer holding a whole number of records
    pub fn decode_all(bytes: &[u8]) -> Result<Vec<Self>> {
        if bytes.len() % TX_ENTRY_LEN != 0 {
            return Err(IndexerError::Corrupt(format!(
                "{} trailing bytes after {} records",
                bytes.len() % TX_ENTRY_LEN,
                bytes.len() / TX_ENTRY_LEN
            )));
        }
        bytes.chunks_exact(TX_ENTRY_LEN).map(Self::decode).collect()
    }
}

fn read_amount(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; AMOUNT_LEN];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Build a raw record; used by tests and tooling that replay feeds
pub fn encode_record(
    src: &[u8],
    dst: &[u8],
    change: &[u8],
    amounts: [u64; 3],
    txid: &[u8; TXID_LEN],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(TX_ENTRY_LEN);
    for addr in [src, dst, change] {
        let mut field = vec![0u8; ADDR_LEN];
        let n = addr.len().min(ADDR_LEN);
        field[ADDR_LEN - n..].copy_from_slice(&addr[addr.len() - n..]);
        out.extend_from_slice(&field);
    }
    for amount in amounts {
        out.extend_from_slice(&amount.to_le_bytes());
    }
    out.extend_from_slice(&[0u8; SIG_LEN]);
    out.extend_from_slice(txid);
    out
}

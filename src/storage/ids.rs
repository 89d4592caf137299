//! Deterministic document identifiers
//!
//! Heights are 16 hex digits and hashes are cut to 16 hex digits, so a block
//! id is always 33 characters and ids sort by height.

use std::net::Ipv4Addr;

fn fixed(s: &str, width: usize) -> String {
    let cut: String = s.chars().take(width).collect();
    format!("{:0>width$}", cut, width = width)
}

/// Non-empty and ASCII hex only
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// `{height:016x}-{hash16}`
pub fn block_id(height: u64, hash: &str) -> String {
    format!("{:016x}-{}", height, fixed(hash, 16))
}

/// Prefix shared by every block id at `height`
pub fn height_prefix(height: u64) -> String {
    format!("{:016x}-", height)
}

/// Ledger delta of one account at a (neo)genesis block
pub fn ledger_id(height: u64, hash: &str, account_key: &str) -> String {
    format!("{}-{}", block_id(height, hash), fixed(account_key, 64))
}

/// Rich-list position at a (neo)genesis block
pub fn richlist_id(height: u64, hash: &str, rank: u64) -> String {
    format!("{}-{:016x}", block_id(height, hash), rank)
}

/// One record per transaction id, shared by pending and confirmed states
pub fn transaction_id(txid: &str) -> String {
    fixed(txid, 64)
}

/// Mining reward pseudo-transaction of a normal block
pub fn reward_id(height: u64, hash: &str) -> String {
    format!("{}-mreward", block_id(height, hash))
}

/// Crawl state of one peer
pub fn network_id(ip: Ipv4Addr) -> String {
    ip.octets()
        .iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_is_fixed_width() {
        assert_eq!(block_id(1, "abc"), "0000000000000001-0000000000000abc");
        assert_eq!(
            block_id(0x100, "0123456789abcdef0123456789abcdef"),
            "0000000000000100-0123456789abcdef"
        );
    }

    #[test]
    fn test_ids_sort_by_height() {
        let mut ids = vec![block_id(300, "ff"), block_id(2, "aa"), block_id(256, "00")];
        ids.sort();
        assert!(ids[0].starts_with(&height_prefix(2)));
        assert!(ids[2].starts_with(&height_prefix(300)));
    }

    #[test]
    fn test_derived_ids() {
        assert!(ledger_id(512, "aa", "t1").ends_with(&format!("{:0>64}", "t1")));
        assert_eq!(transaction_id("ff").len(), 64);
        assert_eq!(network_id("1.2.3.4".parse().unwrap()), "1-2-3-4");
        assert!(reward_id(7, "bb").ends_with("-mreward"));
        assert!(richlist_id(512, "aa", 1).ends_with("-0000000000000001"));
    }

    #[test]
    fn test_multibyte_input_never_splits() {
        let id = block_id(1, "aaaaaaaaaaaaaaa\u{e9}bb");
        assert!(id.ends_with("aaaaaaaaaaaaaaa\u{e9}"));
        assert!(!is_hex("aaaaaaaaaaaaaaa\u{e9}"));
        assert!(!is_hex(""));
        assert!(is_hex("00FFab"));
    }
}

//! Peer crawling
//!
//! Discovery and tracking of Mochimo nodes through the gossip overlay:
//! - `directory`: per-peer state, probing, eviction
//! - `bootstrap`: seed peer lists from URLs or local files
//! - `consensus`: plurality vote over the tips OK peers advertise
//! - `scheduler`: the crawl cycle tying them to the chain synchronizer

use std::net::Ipv4Addr;

pub mod bootstrap;
pub mod consensus;
pub mod directory;
pub mod scheduler;

pub use consensus::ConsensusTarget;
pub use directory::{Peer, PeerDirectory};
pub use scheduler::CrawlScheduler;

/// Reserved and private ranges that are never admitted to the directory
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    match a {
        0 | 10 | 127 => true,
        172 => (16..=31).contains(&b),
        192 => b == 168,
        169 => b == 254,
        _ => false,
    }
}

/// Parse a textual IPv4 address that may be admitted to the directory
pub fn routable_ipv4(s: &str) -> Option<Ipv4Addr> {
    s.trim()
        .parse::<Ipv4Addr>()
        .ok()
        .filter(|ip| !is_private_ipv4(ip))
}

/// Extract routable addresses from a peer list: one entry per line, only the
/// leading run of word characters and dots is considered.
pub fn parse_peer_list(data: &str) -> Vec<Ipv4Addr> {
    let mut seen = std::collections::HashSet::new();
    data.lines()
        .filter_map(|line| {
            let end = line
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
                .unwrap_or(line.len());
            routable_ipv4(&line[..end])
        })
        .filter(|ip| seen.insert(*ip))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ranges() {
        for ip in ["0.1.2.3", "10.0.0.1", "127.0.0.1", "172.16.0.1", "172.31.255.255", "192.168.1.1", "169.254.3.4"] {
            assert!(is_private_ipv4(&ip.parse().unwrap()), "{} should be private", ip);
        }
        for ip in ["172.15.0.1", "172.32.0.1", "8.8.8.8", "192.169.0.1"] {
            assert!(!is_private_ipv4(&ip.parse().unwrap()), "{} should be routable", ip);
        }
    }

    #[test]
    fn test_parse_peer_list() {
        let data = "1.2.3.4\n# comment\n10.0.0.1\n5.6.7.8 trailing text\nnot-an-ip\n1.2.3.4\n\n9.9.9.9";
        let peers = parse_peer_list(data);
        let expected: Vec<Ipv4Addr> = ["1.2.3.4", "5.6.7.8", "9.9.9.9"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(peers, expected);
    }
}

//! Mochimo block-explorer indexer
//!
//! Crawls the Mochimo gossip network, follows the tip the network agrees on,
//! downloads and verifies blocks, and derives ledger history, rich-lists,
//! transactions and supply statistics into a document store.

pub mod chain;
pub mod config;
pub mod economics;
pub mod error;
pub mod mempool;
pub mod metrics;
pub mod p2p;
pub mod protocol;
pub mod storage;

pub use error::{IndexerError, Result};

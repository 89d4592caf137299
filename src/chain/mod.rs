//! Block indexing
//!
//! Verified blocks flow through [`sync::ChainSync`]; ledger blocks also feed
//! the differ and rich-list builder in [`ledger`].

pub mod documents;
pub mod gate;
pub mod ledger;
pub mod sync;

pub use sync::{ChainSync, IndexEvent, SyncJob, SyncOptions};

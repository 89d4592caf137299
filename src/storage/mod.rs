//! Document storage contract
//!
//! The indexer writes JSON documents into named collections through a small
//! set of primitives (`has`, `find_one`, `find`, `insert`, `update`). Document
//! ids are deterministic, fixed width and zero padded so that lexicographic
//! order matches height order (see [`ids`]).
//!
//! Two stores ship with the crate: [`SledStore`] for the running indexer and
//! [`MemoryStore`] for tests and dry runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub mod ids;
pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Collections written by the indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Block,
    Ledger,
    Richlist,
    Transaction,
    Network,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Block => "block",
            Collection::Ledger => "ledger",
            Collection::Richlist => "richlist",
            Collection::Transaction => "transaction",
            Collection::Network => "network",
        }
    }

    pub fn all() -> [Collection; 5] {
        [
            Collection::Block,
            Collection::Ledger,
            Collection::Richlist,
            Collection::Transaction,
            Collection::Network,
        ]
    }
}

/// A stored document and its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

impl Document {
    /// Serialize `body` into a document; the id is also written as `_id`
    pub fn new<T: Serialize>(id: String, body: &T) -> Result<Self> {
        let mut body = serde_json::to_value(body)?;
        if let Value::Object(map) = &mut body {
            map.insert("_id".to_string(), Value::String(id.clone()));
        }
        Ok(Self { id, body })
    }
}

/// How `update` treats existing and missing documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Merge fields into an existing document; missing documents are left alone
    Merge,
    /// Merge into an existing document or create it
    Upsert,
    /// Create the document only if absent; existing documents are never touched
    SetOnInsert,
}

pub trait Storage: Send + Sync {
    fn has(&self, collection: Collection, id: &str) -> Result<bool>;

    fn find_one(&self, collection: Collection, id: &str) -> Result<Option<Value>>;

    /// All documents whose id starts with `prefix`, highest id first
    fn find(&self, collection: Collection, prefix: &str) -> Result<Vec<Document>>;

    /// Insert documents; ids that already exist are skipped.
    /// Returns the number of documents written.
    fn insert(&self, collection: Collection, docs: &[Document]) -> Result<usize>;

    /// Returns the number of documents written (0 or 1)
    fn update(&self, collection: Collection, id: &str, patch: &Value, mode: UpdateMode)
        -> Result<usize>;
}

/// Shallow merge of `patch` into `target`; non-object patches replace the target
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_carries_id() {
        let doc = Document::new("abc".into(), &json!({"height": 5})).unwrap();
        assert_eq!(doc.body["_id"], "abc");
        assert_eq!(doc.body["height"], 5);
    }

    #[test]
    fn test_merge_patch_overwrites_fields() {
        let mut target = json!({"a": 1, "b": 2});
        merge_patch(&mut target, &json!({"b": 3, "c": 4}));
        assert_eq!(target, json!({"a": 1, "b": 3, "c": 4}));
    }
}

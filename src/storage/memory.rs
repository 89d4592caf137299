//! In-memory document store

use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{merge_patch, Collection, Document, Storage, UpdateMode};
use crate::error::Result;

/// Collections held as ordered maps; each collection is locked as a whole
/// while it is written so set-on-insert stays atomic.
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<Collection, BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.collections.get(&collection).map(|c| c.len()).unwrap_or(0)
    }

    pub fn ids(&self, collection: Collection) -> Vec<String> {
        self.collections
            .get(&collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Storage for MemoryStore {
    fn has(&self, collection: Collection, id: &str) -> Result<bool> {
        Ok(self
            .collections
            .get(&collection)
            .map(|c| c.contains_key(id))
            .unwrap_or(false))
    }

    fn find_one(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .get(&collection)
            .and_then(|c| c.get(id).cloned()))
    }

    fn find(&self, collection: Collection, prefix: &str) -> Result<Vec<Document>> {
        let Some(docs) = self.collections.get(&collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .range(prefix.to_string()..)
            .take_while(|(id, _)| id.starts_with(prefix))
            .map(|(id, body)| Document {
                id: id.clone(),
                body: body.clone(),
            })
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect())
    }

    fn insert(&self, collection: Collection, docs: &[Document]) -> Result<usize> {
        let mut target = self.collections.entry(collection).or_default();
        let mut inserted = 0;
        for doc in docs {
            if !target.contains_key(&doc.id) {
                target.insert(doc.id.clone(), doc.body.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: &Value,
        mode: UpdateMode,
    ) -> Result<usize> {
        let mut target = self.collections.entry(collection).or_default();
        if let Some(existing) = target.get_mut(id) {
            if mode == UpdateMode::SetOnInsert {
                return Ok(0);
            }
            merge_patch(existing, patch);
            return Ok(1);
        }
        if mode == UpdateMode::Merge {
            return Ok(0);
        }

        let mut body = serde_json::json!({ "_id": id });
        merge_patch(&mut body, patch);
        target.insert(id.to_string(), body);
        Ok(1)
    }
}

//! sled-backed document store
//!
//! One tree per collection, JSON values keyed by document id.

use serde_json::Value;
use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info};

use super::{merge_patch, Collection, Document, Storage, UpdateMode};
use crate::error::{IndexerError, Result};

pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        info!("[STORE] Opened document store at {}", path.display());
        Ok(Self { db })
    }

    pub fn from_db(db: Db) -> Self {
        Self { db }
    }

    fn tree(&self, collection: Collection) -> Result<Tree> {
        Ok(self.db.open_tree(collection.as_str())?)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Document counts per collection
    pub fn counts(&self) -> Vec<(Collection, usize)> {
        Collection::all()
            .into_iter()
            .map(|c| (c, self.tree(c).map(|t| t.len()).unwrap_or(0)))
            .collect()
    }
}

fn decode(bytes: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(bytes)?)
}

impl Storage for SledStore {
    fn has(&self, collection: Collection, id: &str) -> Result<bool> {
        Ok(self.tree(collection)?.contains_key(id.as_bytes())?)
    }

    fn find_one(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        match self.tree(collection)?.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find(&self, collection: Collection, prefix: &str) -> Result<Vec<Document>> {
        let tree = self.tree(collection)?;
        let mut docs = Vec::new();
        for item in tree.scan_prefix(prefix.as_bytes()).rev() {
            let (key, value) = item?;
            docs.push(Document {
                id: String::from_utf8_lossy(&key).into_owned(),
                body: decode(&value)?,
            });
        }
        Ok(docs)
    }

    fn insert(&self, collection: Collection, docs: &[Document]) -> Result<usize> {
        let tree = self.tree(collection)?;
        let mut inserted = 0;
        for doc in docs {
            let bytes = serde_json::to_vec(&doc.body)?;
            match tree.compare_and_swap(doc.id.as_bytes(), None::<&[u8]>, Some(bytes))? {
                Ok(()) => inserted += 1,
                Err(_) => debug!("[STORE] {} {} already exists", collection.as_str(), doc.id),
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
        let tree = self.tree(collection)?;

        if mode == UpdateMode::SetOnInsert {
            let mut body = patch.clone();
            merge_patch(&mut body, &serde_json::json!({ "_id": id }));
            let bytes = serde_json::to_vec(&body)?;
            return match tree.compare_and_swap(id.as_bytes(), None::<&[u8]>, Some(bytes))? {
                Ok(()) => Ok(1),
                Err(_) => Ok(0),
            };
        }

        // optimistic merge, retried when another writer got in between
        loop {
            let current = tree.get(id.as_bytes())?;
            let mut body = match (&current, mode) {
                (Some(bytes), _) => decode(bytes)?,
                (None, UpdateMode::Upsert) => serde_json::json!({ "_id": id }),
                (None, _) => return Ok(0),
            };
            merge_patch(&mut body, patch);
            let bytes = serde_json::to_vec(&body)?;

            match tree.compare_and_swap(id.as_bytes(), current, Some(bytes)) {
                Ok(Ok(())) => return Ok(1),
                Ok(Err(_)) => continue,
                Err(e) => return Err(IndexerError::from(e)),
            }
        }
    }
}

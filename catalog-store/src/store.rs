//! In-memory collections with whole-file JSON persistence.
//!
//! One `tokio::sync::Mutex` guards each collection for the full duration of
//! a scan and, for mutations, the subsequent full-file rewrite — reads and
//! writes within a collection are therefore mutually exclusive, matching
//! §4.2's concurrency requirement. Different collections never contend with
//! each other.
//!
//! Durability: every mutation rewrites the whole collection to
//! `<data_dir>/<Collection>.json.tmp` and renames it over the real file, so
//! a reader never observes a half-written file. If that write fails, the
//! in-memory mutation is rolled back and `CatalogError::Internal` is
//! returned instead of reporting a success the disk doesn't actually hold
//! (see SPEC_FULL.md §9 for why this implementation picked rollback over
//! "report success anyway").

use crate::error::CatalogError;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

pub type Document = Map<String, Value>;

/// The collections every Catalog instance knows about. Any other name in a
/// request is `CatalogError::InvalidRequest`.
pub const KNOWN_COLLECTIONS: &[&str] = &["User", "Game", "Version", "Review", "Room"];

struct Collection {
    docs: Mutex<HashMap<String, Document>>,
    file_path: PathBuf,
}

pub struct Catalog {
    collections: HashMap<&'static str, Collection>,
}

fn query_matches(doc: &Document, query: &Map<String, Value>) -> bool {
    query.iter().all(|(key, expected)| doc.get(key) == Some(expected))
}

impl Catalog {
    /// Loads every known collection's file (if present) from `data_dir`,
    /// creating the directory if necessary. Missing files start as empty
    /// collections.
    pub async fn load(data_dir: &std::path::Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;

        let mut collections = HashMap::new();
        for &name in KNOWN_COLLECTIONS {
            let file_path = data_dir.join(format!("{name}.json"));
            let docs = match tokio::fs::read_to_string(&file_path).await {
                Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
                Err(_) => HashMap::new(),
            };
            collections.insert(
                name,
                Collection {
                    docs: Mutex::new(docs),
                    file_path,
                },
            );
        }
        Ok(Catalog { collections })
    }

    fn collection(&self, name: &str) -> Result<&Collection, CatalogError> {
        KNOWN_COLLECTIONS
            .iter()
            .find(|&&known| known == name)
            .and_then(|&known| self.collections.get(known))
            .ok_or(CatalogError::InvalidRequest)
    }

    async fn persist(file_path: &std::path::Path, docs: &HashMap<String, Document>) -> std::io::Result<()> {
        let body = serde_json::to_vec_pretty(docs)?;
        let tmp_path = file_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, file_path).await?;
        Ok(())
    }

    pub async fn insert(&self, collection: &str, mut doc: Document) -> Result<(String, Document), CatalogError> {
        let collection = self.collection(collection)?;
        let mut guard = collection.docs.lock().await;

        let id = match doc.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                doc.insert("id".into(), Value::String(id.clone()));
                id
            }
        };
        doc.insert("created_at".into(), Value::String(Utc::now().to_rfc3339()));

        let mut candidate = guard.clone();
        candidate.insert(id.clone(), doc.clone());

        Self::persist(&collection.file_path, &candidate)
            .await
            .map_err(|e| CatalogError::Internal(e.to_string()))?;

        *guard = candidate;
        Ok((id, doc))
    }

    pub async fn find(&self, collection: &str, query: &Map<String, Value>) -> Result<Vec<Document>, CatalogError> {
        let collection = self.collection(collection)?;
        let guard = collection.docs.lock().await;
        Ok(guard
            .values()
            .filter(|doc| query_matches(doc, query))
            .cloned()
            .collect())
    }

    pub async fn find_one(&self, collection: &str, query: &Map<String, Value>) -> Result<Document, CatalogError> {
        let collection_ref = self.collection(collection)?;
        let guard = collection_ref.docs.lock().await;
        guard
            .values()
            .find(|doc| query_matches(doc, query))
            .cloned()
            .ok_or(CatalogError::NotFound)
    }

    pub async fn update(
        &self,
        collection: &str,
        query: &Map<String, Value>,
        update: &Map<String, Value>,
    ) -> Result<usize, CatalogError> {
        let collection = self.collection(collection)?;
        let mut guard = collection.docs.lock().await;

        let mut candidate = guard.clone();
        let now = Utc::now().to_rfc3339();
        let mut matched = 0usize;
        for doc in candidate.values_mut() {
            if query_matches(doc, query) {
                for (key, value) in update {
                    doc.insert(key.clone(), value.clone());
                }
                doc.insert("updated_at".into(), Value::String(now.clone()));
                matched += 1;
            }
        }

        if matched == 0 {
            return Ok(0);
        }

        Self::persist(&collection.file_path, &candidate)
            .await
            .map_err(|e| CatalogError::Internal(e.to_string()))?;

        *guard = candidate;
        Ok(matched)
    }

    pub async fn delete(&self, collection: &str, query: &Map<String, Value>) -> Result<usize, CatalogError> {
        let collection = self.collection(collection)?;
        let mut guard = collection.docs.lock().await;

        let mut candidate = guard.clone();
        let before = candidate.len();
        candidate.retain(|_, doc| !query_matches(doc, query));
        let removed = before - candidate.len();

        if removed == 0 {
            return Ok(0);
        }

        Self::persist(&collection.file_path, &candidate)
            .await
            .map_err(|e| CatalogError::Internal(e.to_string()))?;

        *guard = candidate;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[tokio::test]
    async fn insert_assigns_id_and_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(dir.path()).await.unwrap();
        let (id, stored) = catalog
            .insert("User", doc(&[("username", json!("alice"))]))
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert_eq!(stored.get("id").unwrap(), &Value::String(id));
        assert!(stored.contains_key("created_at"));
    }

    #[tokio::test]
    async fn find_one_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(dir.path()).await.unwrap();
        let err = catalog
            .find_one("User", &doc(&[("username", json!("nobody"))]))
            .await
            .unwrap_err();
        assert_eq!(err, CatalogError::NotFound);
    }

    #[tokio::test]
    async fn unknown_collection_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(dir.path()).await.unwrap();
        let err = catalog.find("Nonsense", &Map::new()).await.unwrap_err();
        assert_eq!(err, CatalogError::InvalidRequest);
    }

    #[tokio::test]
    async fn update_stamps_updated_at_only_on_matches() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(dir.path()).await.unwrap();
        catalog
            .insert("User", doc(&[("username", json!("alice"))]))
            .await
            .unwrap();
        catalog
            .insert("User", doc(&[("username", json!("bob"))]))
            .await
            .unwrap();

        let matched = catalog
            .update(
                "User",
                &doc(&[("username", json!("alice"))]),
                &doc(&[("password_hash", json!("deadbeef"))]),
            )
            .await
            .unwrap();
        assert_eq!(matched, 1);

        let alice = catalog
            .find_one("User", &doc(&[("username", json!("alice"))]))
            .await
            .unwrap();
        assert!(alice.contains_key("updated_at"));

        let bob = catalog
            .find_one("User", &doc(&[("username", json!("bob"))]))
            .await
            .unwrap();
        assert!(!bob.contains_key("updated_at"));
    }

    #[tokio::test]
    async fn mutations_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = Catalog::load(dir.path()).await.unwrap();
            catalog
                .insert("Game", doc(&[("name", json!("chat"))]))
                .await
                .unwrap();
        }
        let reloaded = Catalog::load(dir.path()).await.unwrap();
        let games = reloaded.find("Game", &Map::new()).await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].get("name").unwrap(), &json!("chat"));
    }

    #[tokio::test]
    async fn delete_removes_only_matching_docs() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(dir.path()).await.unwrap();
        catalog
            .insert("User", doc(&[("username", json!("alice"))]))
            .await
            .unwrap();
        catalog
            .insert("User", doc(&[("username", json!("bob"))]))
            .await
            .unwrap();
        let removed = catalog
            .delete("User", &doc(&[("username", json!("alice"))]))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let remaining = catalog.find("User", &Map::new()).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }
}

//! In-process [`DocumentCollection`] with the same matching rules as the
//! backend. Used for local development and tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{DocumentCollection, UpdateResult};

#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    docs: Arc<Mutex<HashMap<String, Vec<Value>>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every document in `collection`.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.lock().get(collection).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Value>>> {
        self.docs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn matches(doc: &Value, filter: &Value) -> bool {
    match filter.as_object() {
        Some(fields) => fields.iter().all(|(k, v)| doc.get(k) == Some(v)),
        None => filter.is_null(),
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>> {
        Ok(self
            .lock()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches(d, &filter))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default())
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self.lock().get(collection).and_then(|docs| {
            docs.iter()
                .find(|d| d.get("id").and_then(Value::as_str) == Some(id))
                .cloned()
        }))
    }

    async fn insert_one(&self, collection: &str, document: Value) -> Result<String> {
        let Value::Object(mut fields) = document else {
            return Err(anyhow!("document must be a JSON object"));
        };
        let id = match fields.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                fields.insert("id".into(), Value::String(id.clone()));
                id
            }
        };
        let mut guard = self.lock();
        let docs = guard.entry(collection.to_string()).or_default();
        if docs
            .iter()
            .any(|d| d.get("id").and_then(Value::as_str) == Some(id.as_str()))
        {
            return Err(anyhow!("duplicate id {} in {}", id, collection));
        }
        docs.push(Value::Object(fields));
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Value,
        set: Value,
    ) -> Result<UpdateResult> {
        let set: Map<String, Value> = match set {
            Value::Object(m) => m,
            _ => return Err(anyhow!("update must be a JSON object")),
        };
        let mut guard = self.lock();
        let Some(doc) = guard
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| matches(d, &filter)))
        else {
            return Ok(UpdateResult::default());
        };
        let Some(fields) = doc.as_object_mut() else {
            return Ok(UpdateResult::default());
        };
        let mut modified = false;
        for (k, v) in set {
            if fields.get(&k) != Some(&v) {
                fields.insert(k, v);
                modified = true;
            }
        }
        Ok(UpdateResult {
            matched_count: 1,
            modified_count: u64::from(modified),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_assigns_id_and_find_filters() {
        let coll = MemoryCollection::new();
        let id = coll
            .insert_one("articles", json!({ "title": "a", "status": "draft" }))
            .await
            .unwrap();
        coll.insert_one("articles", json!({ "id": "b", "status": "scheduled" }))
            .await
            .unwrap();

        let found = coll
            .find("articles", json!({ "status": "scheduled" }))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], "b");

        let by_id = coll.find_by_id("articles", &id).await.unwrap().unwrap();
        assert_eq!(by_id["title"], "a");
        assert!(coll.find_by_id("articles", "nope").await.unwrap().is_none());
        assert!(coll.find("missing", json!({})).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conditional_update_only_matches_current_state() {
        let coll = MemoryCollection::new();
        coll.insert_one("articles", json!({ "id": "a", "status": "scheduled" }))
            .await
            .unwrap();

        let filter = json!({ "id": "a", "status": "scheduled" });
        let first = coll
            .update_one("articles", filter.clone(), json!({ "status": "published" }))
            .await
            .unwrap();
        assert!(first.matched());
        assert_eq!(first.modified_count, 1);

        let second = coll
            .update_one("articles", filter, json!({ "status": "published" }))
            .await
            .unwrap();
        assert!(!second.matched());
    }

    #[tokio::test]
    async fn duplicate_ids_rejected() {
        let coll = MemoryCollection::new();
        coll.insert_one("s", json!({ "id": "x" })).await.unwrap();
        assert!(coll.insert_one("s", json!({ "id": "x" })).await.is_err());
        assert!(coll.insert_one("s", json!("scalar")).await.is_err());
    }
}

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use blogdesk::collection::{DocumentCollection, MemoryCollection, UpdateResult};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// MemoryCollection with switchable failures, an optional gate on reads and
/// call counters.
#[derive(Clone, Default)]
pub struct FlakyCollection {
    pub inner: MemoryCollection,
    fail_find: Arc<AtomicBool>,
    fail_updates: Arc<AtomicBool>,
    fail_update_ids: Arc<Mutex<HashSet<String>>>,
    find_gate: Arc<Mutex<Option<Arc<Notify>>>>,
    pub finds: Arc<AtomicUsize>,
    pub updates: Arc<AtomicUsize>,
}

impl FlakyCollection {
    pub fn new(inner: MemoryCollection) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn fail_find(&self, on: bool) {
        self.fail_find.store(on, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, on: bool) {
        self.fail_updates.store(on, Ordering::SeqCst);
    }

    pub fn fail_update_of(&self, id: &str) {
        self.fail_update_ids.lock().unwrap().insert(id.to_string());
    }

    /// Every later `find` waits until the returned gate is notified.
    pub fn gate_finds(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.find_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Let later `find` calls through again.
    pub fn ungate_finds(&self) {
        *self.find_gate.lock().unwrap() = None;
    }

    pub fn find_count(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentCollection for FlakyCollection {
    async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        let gate = self.find_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(anyhow!("backend unavailable"));
        }
        self.inner.find(collection, filter).await
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.inner.find_by_id(collection, id).await
    }

    async fn insert_one(&self, collection: &str, document: Value) -> Result<String> {
        self.inner.insert_one(collection, document).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Value,
        set: Value,
    ) -> Result<UpdateResult> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(anyhow!("backend write failed"));
        }
        let target = filter.get("id").and_then(Value::as_str).map(str::to_string);
        if let Some(id) = target {
            if self.fail_update_ids.lock().unwrap().contains(&id) {
                return Err(anyhow!("write to {} failed", id));
            }
        }
        self.inner.update_one(collection, filter, set).await
    }
}

//! Run-state persistence
//!
//! The engine records intents, tasks, validation verdicts and capsule
//! metadata through the narrow [`StateStore`] trait. Persistence failures
//! are logged by callers and never fail an execution. Two implementations
//! ship: an in-memory store for tests and no-persistence runs, and a
//! SQLite store over the `quantstore` crate.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quantstore::{Collection, Store};
use thiserror::Error;
use tracing::debug;

use crate::domain::{CapsuleMetadata, Intent, IntentStatus, Task};
use crate::validation::ValidationResult;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persistent run state
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn create_intent(&self, intent: &Intent) -> Result<(), StoreError>;
    async fn update_intent(&self, intent: &Intent) -> Result<(), StoreError>;
    async fn get_intent(&self, id: &str) -> Result<Option<Intent>, StoreError>;
    async fn list_intents(&self, status: Option<IntentStatus>) -> Result<Vec<Intent>, StoreError>;

    async fn save_task(&self, intent_id: &str, task: &Task) -> Result<(), StoreError>;
    async fn save_validation(&self, task_id: &str, result: &ValidationResult) -> Result<(), StoreError>;
    async fn save_capsule(&self, metadata: &CapsuleMetadata) -> Result<(), StoreError>;
}

/// No-persistence implementation
#[derive(Default)]
pub struct MemoryStore {
    intents: Mutex<HashMap<String, Intent>>,
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn create_intent(&self, intent: &Intent) -> Result<(), StoreError> {
        debug!(intent_id = %intent.id, "MemoryStore::create_intent");
        self.intents
            .lock()
            .expect("intent map poisoned")
            .insert(intent.id.clone(), intent.clone());
        Ok(())
    }

    async fn update_intent(&self, intent: &Intent) -> Result<(), StoreError> {
        self.create_intent(intent).await
    }

    async fn get_intent(&self, id: &str) -> Result<Option<Intent>, StoreError> {
        Ok(self.intents.lock().expect("intent map poisoned").get(id).cloned())
    }

    async fn list_intents(&self, status: Option<IntentStatus>) -> Result<Vec<Intent>, StoreError> {
        let intents = self.intents.lock().expect("intent map poisoned");
        let mut list: Vec<Intent> = intents
            .values()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn save_task(&self, _intent_id: &str, _task: &Task) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_validation(&self, _task_id: &str, _result: &ValidationResult) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_capsule(&self, _metadata: &CapsuleMetadata) -> Result<(), StoreError> {
        Ok(())
    }
}

/// SQLite-backed implementation over `quantstore`
pub struct SqliteStore {
    store: Arc<Mutex<Store>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        debug!(?path, "SqliteStore::open: called");
        let store = Store::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Store::open_in_memory().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
        })
    }

    /// Run a closure against the store on the blocking pool
    async fn with_store<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> eyre::Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store.lock().expect("store poisoned");
            op(&guard).map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(format!("store task join error: {}", e)))?
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn create_intent(&self, intent: &Intent) -> Result<(), StoreError> {
        let id = intent.id.clone();
        let status = intent.status.to_string();
        let doc = serde_json::to_value(intent)?;
        self.with_store(move |store| store.put(Collection::Intents, &id, None, Some(&status), &doc))
            .await
    }

    async fn update_intent(&self, intent: &Intent) -> Result<(), StoreError> {
        self.create_intent(intent).await
    }

    async fn get_intent(&self, id: &str) -> Result<Option<Intent>, StoreError> {
        let id = id.to_string();
        let doc = self.with_store(move |store| store.get(Collection::Intents, &id)).await?;
        match doc {
            Some(doc) => Ok(Some(serde_json::from_value(doc.doc)?)),
            None => Ok(None),
        }
    }

    async fn list_intents(&self, status: Option<IntentStatus>) -> Result<Vec<Intent>, StoreError> {
        let status_str = status.map(|s| s.to_string());
        let docs = self
            .with_store(move |store| store.list(Collection::Intents, status_str.as_deref(), None, None))
            .await?;
        docs.into_iter()
            .map(|d| serde_json::from_value(d.doc).map_err(StoreError::from))
            .collect()
    }

    async fn save_task(&self, intent_id: &str, task: &Task) -> Result<(), StoreError> {
        let id = task.id.clone();
        let parent = intent_id.to_string();
        let status = task.status.to_string();
        let doc = serde_json::to_value(task)?;
        self.with_store(move |store| store.put(Collection::Tasks, &id, Some(&parent), Some(&status), &doc))
            .await
    }

    async fn save_validation(&self, task_id: &str, result: &ValidationResult) -> Result<(), StoreError> {
        let id = task_id.to_string();
        let parent = task_id.to_string();
        let doc = serde_json::to_value(result)?;
        self.with_store(move |store| store.put(Collection::ValidationResults, &id, Some(&parent), None, &doc))
            .await
    }

    async fn save_capsule(&self, metadata: &CapsuleMetadata) -> Result<(), StoreError> {
        let id = metadata.capsule_id.clone();
        let parent = metadata.intent_id.clone();
        let doc = serde_json::to_value(metadata)?;
        self.with_store(move |store| store.put(Collection::Capsules, &id, Some(&parent), None, &doc))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;

    #[tokio::test]
    async fn test_memory_store_intent_lifecycle() {
        let store = MemoryStore::default();
        let mut intent = Intent::new("build it");

        store.create_intent(&intent).await.unwrap();
        assert!(store.get_intent(&intent.id).await.unwrap().is_some());

        intent.set_status(IntentStatus::Completed);
        store.update_intent(&intent).await.unwrap();
        let fetched = store.get_intent(&intent.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, IntentStatus::Completed);

        let completed = store.list_intents(Some(IntentStatus::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
        let pending = store.list_intents(Some(IntentStatus::Pending)).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_store_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut intent = Intent::new("persist me");
        intent.overall_score = 91;

        store.create_intent(&intent).await.unwrap();
        let fetched = store.get_intent(&intent.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, intent.id);
        assert_eq!(fetched.overall_score, 91);

        assert!(store.get_intent("QLI-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_list_by_status() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut a = Intent::new("a");
        a.set_status(IntentStatus::Completed);
        let b = Intent::new("b");

        store.create_intent(&a).await.unwrap();
        store.create_intent(&b).await.unwrap();

        let completed = store.list_intents(Some(IntentStatus::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, a.id);

        let all = store.list_intents(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_store_tasks_and_capsules() {
        let store = SqliteStore::open_in_memory().unwrap();
        let intent = Intent::new("parented records");
        store.create_intent(&intent).await.unwrap();

        let task = Task::new(TaskType::Codegen, "scaffold");
        store.save_task(&intent.id, &task).await.unwrap();

        let validation = crate::validation::FixedValidator::with_scores(90, 85).result;
        store.save_validation(&task.id, &validation).await.unwrap();

        let metadata = CapsuleMetadata {
            capsule_id: "QLC-test".to_string(),
            version: "0.1.0".to_string(),
            intent_id: intent.id.clone(),
            intent_text: intent.text.clone(),
            created_at: chrono::Utc::now(),
            total_tasks: 1,
            successful_tasks: 1,
            overall_score: 90,
            security_risk: crate::domain::SecurityRisk::Low,
            quality_score: 100,
            environment: Default::default(),
        };
        store.save_capsule(&metadata).await.unwrap();
    }
}

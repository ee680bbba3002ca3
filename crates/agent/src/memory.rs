use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use orderly_core::errors::ApplicationError;

/// Hierarchical key space of the memory store, e.g. `("memories", user_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(pub Vec<String>);

impl Namespace {
    pub fn memories(user_id: &str) -> Self {
        Self(vec!["memories".to_string(), user_id.to_string()])
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub namespace: Namespace,
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Up to `limit` entries of `namespace`, most recently written first.
    async fn search(
        &self,
        namespace: &Namespace,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, ApplicationError>;

    /// Writes `value` under `key`, replacing any previous value.
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: Value,
    ) -> Result<(), ApplicationError>;
}

#[derive(Default)]
pub struct InMemoryMemoryStore {
    entries: RwLock<HashMap<Namespace, Vec<MemoryEntry>>>,
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn search(
        &self,
        namespace: &Namespace,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, ApplicationError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(namespace)
            .map(|stored| stored.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: Value,
    ) -> Result<(), ApplicationError> {
        let mut entries = self.entries.write().await;
        let stored = entries.entry(namespace.clone()).or_default();
        // Entries stay in write order; a rewrite moves the key to the end.
        stored.retain(|entry| entry.key != key);
        stored.push(MemoryEntry {
            namespace: namespace.clone(),
            key: key.to_string(),
            value,
            updated_at: Utc::now(),
        });
        Ok(())
    }
}

// src/store.rs
//! Conversation persistence: list / replace / clear per conversation id.
//!
//! Conversations are independent. Concurrent writers to the same conversation
//! are not coordinated; the last `replace` wins.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::llm::{ChatMessage, Role};

pub type StoreResult<T> = std::result::Result<T, PersistenceError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages of one conversation, oldest first. Unknown ids give an empty list.
    async fn list(&self, conversation_id: &str) -> StoreResult<Vec<StoredMessage>>;

    /// Delete every stored message of the conversation, then insert `messages` in order.
    async fn replace(&self, conversation_id: &str, messages: &[ChatMessage]) -> StoreResult<()>;

    async fn clear(&self, conversation_id: &str) -> StoreResult<()>;
}

pub type DynMessageStore = Arc<dyn MessageStore>;

fn stamp(conversation_id: &str, messages: &[ChatMessage]) -> Vec<StoredMessage> {
    let now = Utc::now();
    messages
        .iter()
        .map(|m| StoredMessage {
            role: m.role,
            content: m.content.clone(),
            conversation_id: conversation_id.to_string(),
            created_at: now,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// MemoryMessageStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    inner: Mutex<HashMap<String, Vec<StoredMessage>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn list(&self, conversation_id: &str) -> StoreResult<Vec<StoredMessage>> {
        let map = self.inner.lock().map_err(|_| PersistenceError::Poisoned)?;
        Ok(map.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn replace(&self, conversation_id: &str, messages: &[ChatMessage]) -> StoreResult<()> {
        let rows = stamp(conversation_id, messages);
        let mut map = self.inner.lock().map_err(|_| PersistenceError::Poisoned)?;
        map.insert(conversation_id.to_string(), rows);
        Ok(())
    }

    async fn clear(&self, conversation_id: &str) -> StoreResult<()> {
        let mut map = self.inner.lock().map_err(|_| PersistenceError::Poisoned)?;
        map.remove(conversation_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonFileMessageStore
// ---------------------------------------------------------------------------

/// All conversations in one JSON document, rewritten via temp file + rename.
/// The mutex serializes read-modify-write cycles within this process.
#[derive(Debug)]
pub struct JsonFileMessageStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileMessageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn io_err(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn load(&self) -> StoreResult<HashMap<String, Vec<StoredMessage>>> {
        match fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => Ok(HashMap::new()),
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn save(&self, map: &HashMap<String, Vec<StoredMessage>>) -> StoreResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
        }
        let json = serde_json::to_string_pretty(map)?;
        let tmp = tmp_path(&self.path);
        let mut f = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
        f.write_all(json.as_bytes()).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }

    fn modify<F>(&self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut HashMap<String, Vec<StoredMessage>>),
    {
        let _guard = self.lock.lock().map_err(|_| PersistenceError::Poisoned)?;
        let mut map = self.load()?;
        f(&mut map);
        self.save(&map)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl MessageStore for JsonFileMessageStore {
    async fn list(&self, conversation_id: &str) -> StoreResult<Vec<StoredMessage>> {
        let _guard = self.lock.lock().map_err(|_| PersistenceError::Poisoned)?;
        let mut map = self.load()?;
        Ok(map.remove(conversation_id).unwrap_or_default())
    }

    async fn replace(&self, conversation_id: &str, messages: &[ChatMessage]) -> StoreResult<()> {
        let rows = stamp(conversation_id, messages);
        self.modify(|map| {
            map.insert(conversation_id.to_string(), rows);
        })
    }

    async fn clear(&self, conversation_id: &str) -> StoreResult<()> {
        self.modify(|map| {
            map.remove(conversation_id);
        })
    }
}

/// In-memory store unless a file path is configured.
pub fn build_store(path: Option<&Path>) -> DynMessageStore {
    match path {
        Some(p) => Arc::new(JsonFileMessageStore::new(p)),
        None => Arc::new(MemoryMessageStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convo() -> Vec<ChatMessage> {
        vec![
            ChatMessage::new(Role::User, "GITHUB_URL: x"),
            ChatMessage::new(Role::Assistant, "- [x] **LLM/AI Engine**: Llama"),
        ]
    }

    async fn exercise(store: &dyn MessageStore) {
        assert!(store.list("c1").await.unwrap().is_empty());

        store.replace("c1", &convo()).await.unwrap();
        store
            .replace("c2", &[ChatMessage::new(Role::User, "other")])
            .await
            .unwrap();

        let rows = store.list("c1").await.unwrap();
        let chat: Vec<ChatMessage> = rows.iter().map(StoredMessage::to_chat).collect();
        assert_eq!(chat, convo());
        assert!(rows.iter().all(|r| r.conversation_id == "c1"));

        // delete-then-insert, not append
        store
            .replace("c1", &[ChatMessage::new(Role::User, "fresh")])
            .await
            .unwrap();
        let rows = store.list("c1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "fresh");

        store.clear("c1").await.unwrap();
        assert!(store.list("c1").await.unwrap().is_empty());
        assert_eq!(store.list("c2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_store_contract() {
        exercise(&MemoryMessageStore::new()).await;
    }

    #[tokio::test]
    async fn file_store_contract_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("messages.json");
        let store = JsonFileMessageStore::new(&path);
        exercise(&store).await;

        // A second handle on the same file sees the same data.
        let reopened = JsonFileMessageStore::new(&path);
        assert_eq!(reopened.list("c2").await.unwrap()[0].content, "other");
    }

    #[tokio::test]
    async fn corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        fs::write(&path, "{not json").unwrap();
        let err = JsonFileMessageStore::new(&path).list("c1").await.unwrap_err();
        assert!(matches!(err, PersistenceError::Encoding(_)));
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::models::Conversation;

/// Key the chat collection is stored under.
pub const CHATS_KEY: &str = "chats";

/// Version tag written into every saved blob.
pub const SCHEMA_VERSION: u32 = 1;

/// Key-value store holding opaque string blobs that outlive the process.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write then rename so a crash mid-write never leaves a torn blob.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// In-process store, used by tests and as a scratch backend.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::default();
        store.insert(key, value);
        store
    }

    pub fn insert(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    pub fn entry(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PersistedChatsRef<'a> {
    version: u32,
    chats: &'a [Conversation],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PersistedChats {
    Versioned { version: u32, chats: Vec<Conversation> },
    Legacy(Vec<Conversation>),
}

/// Serializes the chat collection into the versioned blob layout.
pub fn encode_chats(chats: &[Conversation]) -> Result<String, StorageError> {
    let blob = PersistedChatsRef {
        version: SCHEMA_VERSION,
        chats,
    };
    Ok(serde_json::to_string(&blob)?)
}

/// Parses a stored blob. Accepts the versioned layout and the bare array
/// written before versioning existed.
pub fn decode_chats(raw: &str) -> Result<Vec<Conversation>, StorageError> {
    match serde_json::from_str::<PersistedChats>(raw)? {
        PersistedChats::Versioned { version, chats } if version == SCHEMA_VERSION => Ok(chats),
        PersistedChats::Versioned { version, .. } => Err(StorageError::Backend(format!(
            "unsupported schema version {version}"
        ))),
        PersistedChats::Legacy(chats) => Ok(chats),
    }
}

/// Durable mirror of the chat collection under a single key.
#[derive(Clone)]
pub struct PersistenceAdapter {
    backend: Arc<dyn BlobStore>,
    key: String,
}

impl PersistenceAdapter {
    pub fn new(backend: Arc<dyn BlobStore>) -> Self {
        Self {
            backend,
            key: CHATS_KEY.to_string(),
        }
    }

    /// Reads the stored collection. Missing or unreadable data yields an
    /// empty collection.
    pub async fn load(&self) -> Vec<Conversation> {
        let raw = match self.backend.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %self.key, "no stored chats");
                return Vec::new();
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "failed to read stored chats, starting empty");
                return Vec::new();
            }
        };

        match decode_chats(&raw) {
            Ok(chats) => {
                debug!(key = %self.key, count = chats.len(), "loaded chats");
                chats
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "stored chats are unreadable, starting empty");
                Vec::new()
            }
        }
    }

    /// Overwrites the stored collection with `chats`.
    pub async fn save(&self, chats: &[Conversation]) -> Result<(), StorageError> {
        let blob = encode_chats(chats)?;
        self.backend.set(&self.key, &blob).await
    }
}

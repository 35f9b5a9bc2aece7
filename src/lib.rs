pub mod models;
pub mod error;
pub mod persistence;
pub mod store;
pub mod ai_service;
pub mod pipeline;
pub mod app_config;
pub mod emergency;
pub mod ui;

pub use models::{Conversation, Message, MessageRole};
pub use error::{CompletionError, ConfigError, StorageError};
pub use persistence::{BlobStore, FileBlobStore, MemoryBlobStore, PersistenceAdapter};
pub use store::{ChatState, ChatStore};
pub use ai_service::{AIMessage, AIService, Completion, CompletionClient};
pub use pipeline::{SendOutcome, SendPipeline, TurnStart};
pub use app_config::AppConfig;

use std::path::Path;
use std::sync::Arc;

/// Opens the chat store backed by files under `data_dir`.
pub async fn open_file_store(data_dir: &Path) -> ChatStore {
    let backend = Arc::new(FileBlobStore::new(data_dir));
    ChatStore::open(PersistenceAdapter::new(backend)).await
}

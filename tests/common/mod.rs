#![allow(dead_code)]

use async_trait::async_trait;
use chat_companion::{
    AIMessage, ChatStore, Completion, CompletionClient, CompletionError, MemoryBlobStore,
    PersistenceAdapter,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const SYSTEM: &str = "test system prompt";

/// Completion client that replays queued results and records every
/// transcript it was given.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<Completion, CompletionError>>>,
    calls: Mutex<Vec<Vec<AIMessage>>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests wait for `gate.notify_one()` before answering.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn reply(self, id: &str, content: &str) -> Self {
        self.push(Ok(Completion {
            id: id.to_string(),
            content: content.to_string(),
        }))
    }

    pub fn fail(self, error: CompletionError) -> Self {
        self.push(Err(error))
    }

    fn push(self, result: Result<Completion, CompletionError>) -> Self {
        self.replies.lock().unwrap().push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<Vec<AIMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, transcript: &[AIMessage]) -> Result<Completion, CompletionError> {
        self.calls.lock().unwrap().push(transcript.to_vec());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::MalformedResponse("script exhausted".into())))
    }
}

pub async fn memory_store() -> (MemoryBlobStore, ChatStore) {
    let backend = MemoryBlobStore::new();
    let store = ChatStore::open(PersistenceAdapter::new(Arc::new(backend.clone()))).await;
    (backend, store)
}

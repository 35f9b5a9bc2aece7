use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info};

use crate::models::{now_millis, Conversation, Message};
use crate::persistence::PersistenceAdapter;

/// In-memory chat collection plus the current selection.
///
/// All mutations are plain synchronous calls; `ChatStore` wraps this with
/// locking and persistence.
#[derive(Debug, Default, Clone)]
pub struct ChatState {
    chats: Vec<Conversation>,
    current_chat_id: Option<String>,
    last_id: i64,
}

impl ChatState {
    pub fn new(chats: Vec<Conversation>) -> Self {
        let last_id = chats
            .iter()
            .flat_map(|chat| {
                std::iter::once(chat.id.as_str()).chain(chat.messages.iter().map(|m| m.id.as_str()))
            })
            .filter_map(|id| id.parse::<i64>().ok())
            .max()
            .unwrap_or(0);

        Self {
            chats,
            current_chat_id: None,
            last_id,
        }
    }

    pub fn chats(&self) -> &[Conversation] {
        &self.chats
    }

    pub fn current_chat_id(&self) -> Option<&str> {
        self.current_chat_id.as_deref()
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.chats.iter().find(|chat| chat.id == id)
    }

    /// The selected conversation, if the selection points at one that exists.
    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.current_chat_id
            .as_deref()
            .and_then(|id| self.conversation(id))
    }

    /// Time-based id, bumped past every numeric id handed out or loaded.
    pub fn next_id(&mut self) -> String {
        match self.last_id.checked_add(1) {
            Some(floor) => {
                let id = now_millis().max(floor);
                self.last_id = id;
                id.to_string()
            }
            // Numeric range exhausted by a stored id; take the first free one.
            None => (now_millis()..i64::MAX)
                .map(|n| n.to_string())
                .find(|id| !self.id_taken(id))
                .unwrap_or_else(|| format!("{}-{}", now_millis(), self.chats.len())),
        }
    }

    fn id_taken(&self, id: &str) -> bool {
        self.chats
            .iter()
            .any(|chat| chat.id == id || chat.has_message(id))
    }

    pub fn create_conversation(&mut self, first_message: Option<Message>) -> String {
        let id = self.next_id();
        self.chats.push(Conversation::new(id.clone(), first_message));
        self.current_chat_id = Some(id.clone());
        id
    }

    /// Selects `id` without checking that it exists.
    pub fn select_conversation(&mut self, id: &str) {
        self.current_chat_id = Some(id.to_string());
    }

    /// Returns false when the conversation is missing or the name is blank.
    pub fn rename_conversation(&mut self, id: &str, new_name: &str) -> bool {
        let name = new_name.trim();
        if name.is_empty() {
            return false;
        }
        match self.chats.iter_mut().find(|chat| chat.id == id) {
            Some(chat) => {
                chat.name = name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn delete_conversation(&mut self, id: &str) -> bool {
        let before = self.chats.len();
        self.chats.retain(|chat| chat.id != id);
        if self.current_chat_id.as_deref() == Some(id) {
            self.current_chat_id = None;
        }
        self.chats.len() != before
    }

    pub fn append_message(&mut self, id: &str, message: Message) -> bool {
        match self.chats.iter_mut().find(|chat| chat.id == id) {
            Some(chat) => {
                chat.messages.push(message);
                true
            }
            None => false,
        }
    }
}

enum WriteCommand {
    Save(Vec<Conversation>),
    Flush(oneshot::Sender<()>),
}

/// Single background task applying snapshot writes in the order they were
/// queued.
#[derive(Clone)]
struct PersistenceWriter {
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl PersistenceWriter {
    fn spawn(persistence: PersistenceAdapter) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    WriteCommand::Save(chats) => {
                        if let Err(e) = persistence.save(&chats).await {
                            error!("Failed to persist chats: {}", e);
                        }
                    }
                    WriteCommand::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("persistence writer stopped");
        });

        Self { tx }
    }

    fn save(&self, chats: Vec<Conversation>) {
        if self.tx.send(WriteCommand::Save(chats)).is_err() {
            error!("Persistence writer is gone, snapshot dropped");
        }
    }

    async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriteCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

/// Shared handle over the chat collection. Cloning is cheap; every clone
/// sees the same state.
#[derive(Clone)]
pub struct ChatStore {
    state: Arc<Mutex<ChatState>>,
    writer: PersistenceWriter,
}

impl ChatStore {
    /// Loads the stored collection and starts the persistence writer.
    /// Must be called inside a tokio runtime.
    pub async fn open(persistence: PersistenceAdapter) -> Self {
        let chats = persistence.load().await;
        info!("Loaded {} chats", chats.len());

        Self {
            state: Arc::new(Mutex::new(ChatState::new(chats))),
            writer: PersistenceWriter::spawn(persistence),
        }
    }

    /// Runs `f` against the state under the lock, then queues a snapshot of
    /// the result for persistence.
    pub(crate) async fn mutate<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut state = self.state.lock().await;
        let result = f(&mut *state);
        // Queued while still locked so snapshots land in mutation order.
        self.writer.save(state.chats.clone());
        result
    }

    pub async fn create_conversation(&self, first_message: Option<Message>) -> String {
        let id = self.mutate(|state| state.create_conversation(first_message)).await;
        info!(chat_id = %id, "created conversation");
        id
    }

    pub async fn select_conversation(&self, id: &str) {
        self.mutate(|state| state.select_conversation(id)).await;
    }

    pub async fn rename_conversation(&self, id: &str, new_name: &str) -> bool {
        let renamed = self
            .mutate(|state| state.rename_conversation(id, new_name))
            .await;
        if !renamed {
            debug!(chat_id = %id, "rename ignored");
        }
        renamed
    }

    pub async fn delete_conversation(&self, id: &str) -> bool {
        let deleted = self.mutate(|state| state.delete_conversation(id)).await;
        if deleted {
            info!(chat_id = %id, "deleted conversation");
        }
        deleted
    }

    pub async fn append_message(&self, id: &str, message: Message) -> bool {
        let appended = self.mutate(|state| state.append_message(id, message)).await;
        if !appended {
            debug!(chat_id = %id, "append to missing conversation ignored");
        }
        appended
    }

    pub async fn chats(&self) -> Vec<Conversation> {
        self.state.lock().await.chats.clone()
    }

    pub async fn current_chat_id(&self) -> Option<String> {
        self.state.lock().await.current_chat_id.clone()
    }

    pub async fn conversation(&self, id: &str) -> Option<Conversation> {
        self.state.lock().await.conversation(id).cloned()
    }

    pub async fn current_conversation(&self) -> Option<Conversation> {
        self.state.lock().await.current_conversation().cloned()
    }

    /// Waits until every snapshot queued so far has been written.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }
}

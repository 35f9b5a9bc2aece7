use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::ai_service::{AIMessage, CompletionClient};
use crate::error::CompletionError;
use crate::models::{Message, MessageRole};
use crate::store::ChatStore;

/// Result of one user turn.
#[derive(Debug)]
pub enum SendOutcome {
    /// Blank input; nothing was created or sent.
    Ignored,
    /// The conversation already has a reply pending.
    Busy { chat_id: String },
    /// The reply arrived. `delivered` is false when the conversation was
    /// deleted while the request was in flight.
    Replied {
        chat_id: String,
        message: Message,
        delivered: bool,
    },
    /// The request failed; only the user's message was kept.
    Failed {
        chat_id: String,
        error: CompletionError,
    },
}

/// Tracks which conversations have a request outstanding. Busy while any
/// do.
#[derive(Clone, Default)]
pub struct BusyIndicator {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl BusyIndicator {
    pub fn is_busy(&self) -> bool {
        !self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks `chat_id` busy unless it already is.
    fn try_acquire(&self, chat_id: &str) -> Option<BusyGuard> {
        if !self.lock().insert(chat_id.to_string()) {
            return None;
        }
        Some(BusyGuard {
            indicator: self.clone(),
            chat_id: chat_id.to_string(),
        })
    }
}

/// Clears the conversation's busy mark when dropped, whichever way the
/// turn ends.
pub struct BusyGuard {
    indicator: BusyIndicator,
    chat_id: String,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.indicator.lock().remove(&self.chat_id);
    }
}

type StartedTurn = (String, Vec<AIMessage>, BusyGuard);

/// How a turn got started.
pub enum TurnStart {
    Ignored,
    Busy { chat_id: String },
    Started(PendingTurn),
}

/// A turn whose user message is stored and whose request is ready to go.
pub struct PendingTurn {
    chat_id: String,
    transcript: Vec<AIMessage>,
    store: ChatStore,
    client: Arc<dyn CompletionClient>,
    _guard: BusyGuard,
}

impl PendingTurn {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn transcript(&self) -> &[AIMessage] {
        &self.transcript
    }

    /// Sends the transcript and appends the reply to the conversation the
    /// turn started in.
    pub async fn complete(self) -> SendOutcome {
        let PendingTurn {
            chat_id,
            transcript,
            store,
            client,
            _guard,
        } = self;

        match client.complete(&transcript).await {
            Ok(reply) => {
                let (message, delivered) = store
                    .mutate(|state| {
                        let taken = state
                            .conversation(&chat_id)
                            .map(|chat| chat.has_message(&reply.id))
                            .unwrap_or(false);
                        let id = if taken || reply.id.is_empty() {
                            state.next_id()
                        } else {
                            reply.id
                        };
                        let message = Message::assistant(id, reply.content);
                        let delivered = state.append_message(&chat_id, message.clone());
                        (message, delivered)
                    })
                    .await;

                if delivered {
                    info!(chat_id = %chat_id, "reply stored");
                } else {
                    warn!(chat_id = %chat_id, "conversation deleted before reply arrived, reply dropped");
                }
                SendOutcome::Replied {
                    chat_id,
                    message,
                    delivered,
                }
            }
            Err(e) => {
                error!(chat_id = %chat_id, "Completion failed: {}", e);
                SendOutcome::Failed { chat_id, error: e }
            }
        }
    }
}

/// Runs user turns against the completion endpoint.
#[derive(Clone)]
pub struct SendPipeline {
    store: ChatStore,
    client: Arc<dyn CompletionClient>,
    system_prompt: String,
    busy: BusyIndicator,
}

impl SendPipeline {
    pub fn new(store: ChatStore, client: Arc<dyn CompletionClient>, system_prompt: String) -> Self {
        Self {
            store,
            client,
            system_prompt,
            busy: BusyIndicator::default(),
        }
    }

    pub fn busy(&self) -> &BusyIndicator {
        &self.busy
    }

    /// Stores the user's message, empties `input` and prepares the request.
    ///
    /// A blank `input` is left untouched. A conversation that already has a
    /// reply pending rejects the turn and `input` is kept as well.
    pub async fn begin_turn(&self, input: &mut String) -> TurnStart {
        if input.trim().is_empty() {
            debug!("ignoring blank input");
            return TurnStart::Ignored;
        }
        let text = input.clone();

        let started = self
            .store
            .mutate(|state| -> Result<StartedTurn, String> {
                let existing = state.current_conversation().map(|chat| chat.id.clone());
                let user_message = Message::user(state.next_id(), text);

                match existing {
                    Some(chat_id) => {
                        let guard = self.busy.try_acquire(&chat_id).ok_or(chat_id.clone())?;
                        let prior = state
                            .conversation(&chat_id)
                            .map(|chat| chat.messages.clone())
                            .unwrap_or_default();
                        let transcript = self.transcript(&prior, &user_message.content);
                        state.append_message(&chat_id, user_message);
                        Ok((chat_id, transcript, guard))
                    }
                    None => {
                        let transcript = self.transcript(&[], &user_message.content);
                        let chat_id = state.create_conversation(Some(user_message));
                        let guard = self.busy.try_acquire(&chat_id).ok_or(chat_id.clone())?;
                        Ok((chat_id, transcript, guard))
                    }
                }
            })
            .await;

        match started {
            Ok((chat_id, transcript, guard)) => {
                input.clear();
                info!(chat_id = %chat_id, entries = transcript.len(), "sending user turn");
                TurnStart::Started(PendingTurn {
                    chat_id,
                    transcript,
                    store: self.store.clone(),
                    client: self.client.clone(),
                    _guard: guard,
                })
            }
            Err(chat_id) => {
                warn!(chat_id = %chat_id, "reply still pending, send rejected");
                TurnStart::Busy { chat_id }
            }
        }
    }

    /// Runs one full turn: store the user message, request, store the reply.
    pub async fn send_user_turn(&self, input: &mut String) -> SendOutcome {
        match self.begin_turn(input).await {
            TurnStart::Ignored => SendOutcome::Ignored,
            TurnStart::Busy { chat_id } => SendOutcome::Busy { chat_id },
            TurnStart::Started(turn) => turn.complete().await,
        }
    }

    /// System instruction, prior messages in order, then the new user text.
    fn transcript(&self, prior: &[Message], user_text: &str) -> Vec<AIMessage> {
        std::iter::once(AIMessage::new(MessageRole::System, self.system_prompt.clone()))
            .chain(
                prior
                    .iter()
                    .map(|m| AIMessage::new(m.role(), m.content.clone())),
            )
            .chain(std::iter::once(AIMessage::new(MessageRole::User, user_text)))
            .collect()
    }
}

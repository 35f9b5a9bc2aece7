use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::emergency::{self, DEFAULT_COUNTRY};
use crate::models::{format_millis, Conversation, Message};
use crate::pipeline::{SendOutcome, SendPipeline, TurnStart};
use crate::store::ChatStore;

const NO_CHAT_HEADER: &str = "Select or start a chat";

const HELP: &str = "\
Commands:
  <text>                 send a message to the current chat
  /new                   start a new chat
  /list                  show the sidebar
  /select <n|id>         open a chat
  /show                  print the current chat
  /rename <n|id> <name>  rename a chat
  /delete <n|id>         delete a chat (asks for confirmation)
  /sidebar               collapse or expand the sidebar
  /emergency [country]   emergency number lookup
  /help                  this text
  /quit                  exit";

/// A parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    Select(String),
    Show,
    Rename { target: String, name: String },
    Delete(String),
    ToggleSidebar,
    Emergency(Option<String>),
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Command::Send(line.to_string());
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        match (name, args) {
            ("new", _) => Command::New,
            ("list" | "ls", _) => Command::List,
            ("show", _) => Command::Show,
            ("sidebar", _) => Command::ToggleSidebar,
            ("help" | "?", _) => Command::Help,
            ("quit" | "exit" | "q", _) => Command::Quit,
            ("select" | "open", target) if !target.is_empty() => Command::Select(target.to_string()),
            ("delete" | "rm", target) if !target.is_empty() => Command::Delete(target.to_string()),
            ("rename", args) if !args.is_empty() => {
                let (target, name) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
                Command::Rename {
                    target: target.to_string(),
                    name: name.trim().to_string(),
                }
            }
            ("emergency" | "sos", "") => Command::Emergency(None),
            ("emergency" | "sos", country) => Command::Emergency(Some(country.to_string())),
            _ => Command::Unknown(trimmed.to_string()),
        }
    }
}

/// Resolves a 1-based sidebar position or a literal chat id.
pub fn resolve_target(chats: &[Conversation], token: &str) -> Option<String> {
    if let Some(chat) = chats.iter().find(|chat| chat.id == token) {
        return Some(chat.id.clone());
    }
    let index: usize = token.parse().ok()?;
    chats.get(index.checked_sub(1)?).map(|chat| chat.id.clone())
}

pub fn render_sidebar(chats: &[Conversation], current: Option<&str>, collapsed: bool) -> String {
    if collapsed {
        return format!("[{} chats] /sidebar to expand", chats.len());
    }
    if chats.is_empty() {
        return "No chats yet. Type a message or /new to start one.".to_string();
    }

    chats
        .iter()
        .enumerate()
        .map(|(i, chat)| {
            let marker = if current == Some(chat.id.as_str()) { '>' } else { ' ' };
            format!(
                "{marker} {:>2}. {}  ({} messages, {})",
                i + 1,
                chat.name,
                chat.messages.len(),
                format_millis(chat.created_at)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_header(current: Option<&Conversation>) -> String {
    match current {
        Some(chat) => format!("== {} ==", chat.name),
        None => format!("== {NO_CHAT_HEADER} =="),
    }
}

pub fn render_message(message: &Message) -> String {
    let speaker = if message.is_user { "you" } else { "assistant" };
    format!("{speaker}: {}", message.content)
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Interactive terminal front end. Holds presentation-only state and
/// forwards intents to the store and the send pipeline.
pub struct Repl<W: Write> {
    store: ChatStore,
    pipeline: SendPipeline,
    out: W,
    input: String,
    sidebar_collapsed: bool,
    pending_delete: Option<String>,
    outcomes: mpsc::UnboundedSender<SendOutcome>,
    // Turns spawned but not yet reported.
    in_flight: usize,
}

impl<W: Write> Repl<W> {
    pub fn new(
        store: ChatStore,
        pipeline: SendPipeline,
        out: W,
        outcomes: mpsc::UnboundedSender<SendOutcome>,
    ) -> Self {
        Self {
            store,
            pipeline,
            out,
            input: String::new(),
            sidebar_collapsed: false,
            pending_delete: None,
            outcomes,
            in_flight: 0,
        }
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn sidebar_collapsed(&self) -> bool {
        self.sidebar_collapsed
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        if let Some(chat_id) = self.pending_delete.take() {
            let answer = line.trim().to_lowercase();
            if answer == "y" || answer == "yes" {
                self.store.delete_conversation(&chat_id).await;
                writeln!(self.out, "Chat deleted.")?;
                self.print_header().await?;
            } else {
                writeln!(self.out, "Delete cancelled.")?;
            }
            return Ok(Flow::Continue);
        }

        match Command::parse(line) {
            Command::Send(text) => self.send(text).await?,
            Command::New => {
                self.store.create_conversation(None).await;
                self.print_header().await?;
            }
            Command::List => self.print_sidebar().await?,
            Command::Select(token) => match self.resolve(&token).await {
                Some(chat_id) => {
                    self.store.select_conversation(&chat_id).await;
                    self.print_conversation().await?;
                }
                None => writeln!(self.out, "No chat matches '{token}'.")?,
            },
            Command::Show => self.print_conversation().await?,
            Command::Rename { target, name } => match self.resolve(&target).await {
                Some(chat_id) => {
                    if self.store.rename_conversation(&chat_id, &name).await {
                        writeln!(self.out, "Renamed to '{}'.", name.trim())?;
                    } else {
                        writeln!(self.out, "A chat name cannot be empty.")?;
                    }
                }
                None => writeln!(self.out, "No chat matches '{target}'.")?,
            },
            Command::Delete(token) => match self.resolve(&token).await {
                Some(chat_id) => {
                    let name = self
                        .store
                        .conversation(&chat_id)
                        .await
                        .map(|chat| chat.name)
                        .unwrap_or_default();
                    writeln!(self.out, "Are you sure you want to delete '{name}'? [y/N]")?;
                    self.pending_delete = Some(chat_id);
                }
                None => writeln!(self.out, "No chat matches '{token}'.")?,
            },
            Command::ToggleSidebar => {
                self.sidebar_collapsed = !self.sidebar_collapsed;
                self.print_sidebar().await?;
            }
            Command::Emergency(country) => {
                let country = country.unwrap_or_else(|| DEFAULT_COUNTRY.to_string());
                match emergency::lookup(&country) {
                    Some(contact) => writeln!(
                        self.out,
                        "{} {} emergency: {}",
                        contact.flag, contact.country, contact.number
                    )?,
                    None => {
                        let known: Vec<_> = emergency::all().iter().map(|c| c.country).collect();
                        writeln!(self.out, "Unknown country. Known: {}", known.join(", "))?;
                    }
                }
            }
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Quit => return Ok(Flow::Quit),
            Command::Unknown(raw) => writeln!(self.out, "Unknown command '{raw}'. Try /help.")?,
        }

        Ok(Flow::Continue)
    }

    /// Prints the result of a finished turn.
    pub async fn report(&mut self, outcome: SendOutcome) -> Result<()> {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            SendOutcome::Replied {
                chat_id,
                message,
                delivered: true,
            } => {
                if self.store.current_chat_id().await.as_deref() != Some(chat_id.as_str()) {
                    let name = self
                        .store
                        .conversation(&chat_id)
                        .await
                        .map(|chat| chat.name)
                        .unwrap_or_default();
                    writeln!(self.out, "(reply in '{name}')")?;
                }
                writeln!(self.out, "{}", render_message(&message))?;
            }
            SendOutcome::Replied { .. } => {
                debug!("reply for a deleted chat discarded");
            }
            SendOutcome::Failed { .. } => {
                writeln!(self.out, "(no reply, the request failed; see log)")?;
            }
            SendOutcome::Ignored | SendOutcome::Busy { .. } => {}
        }
        Ok(())
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.input = text;
        match self.pipeline.begin_turn(&mut self.input).await {
            TurnStart::Ignored => {}
            TurnStart::Busy { .. } => {
                writeln!(self.out, "Still waiting for the previous reply in this chat.")?;
            }
            TurnStart::Started(turn) => {
                writeln!(self.out, "thinking...")?;
                self.in_flight += 1;
                let outcomes = self.outcomes.clone();
                tokio::spawn(async move {
                    let _ = outcomes.send(turn.complete().await);
                });
            }
        }
        Ok(())
    }

    async fn resolve(&self, token: &str) -> Option<String> {
        resolve_target(&self.store.chats().await, token)
    }

    async fn print_header(&mut self) -> Result<()> {
        let current = self.store.current_conversation().await;
        writeln!(self.out, "{}", render_header(current.as_ref()))?;
        Ok(())
    }

    async fn print_sidebar(&mut self) -> Result<()> {
        let chats = self.store.chats().await;
        let current = self.store.current_chat_id().await;
        writeln!(
            self.out,
            "{}",
            render_sidebar(&chats, current.as_deref(), self.sidebar_collapsed)
        )?;
        Ok(())
    }

    async fn print_conversation(&mut self) -> Result<()> {
        let current = self.store.current_conversation().await;
        writeln!(self.out, "{}", render_header(current.as_ref()))?;
        if let Some(chat) = current {
            for message in &chat.messages {
                writeln!(self.out, "{}", render_message(message))?;
            }
        }
        if self.pipeline.busy().is_busy() {
            writeln!(self.out, "thinking...")?;
        }
        Ok(())
    }
}

/// Reads stdin line by line until `/quit` or end of input, printing replies
/// as they arrive.
pub async fn run(store: ChatStore, pipeline: SendPipeline) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    run_with(store, pipeline, stdin, std::io::stdout()).await?;
    Ok(())
}

/// Drives a [`Repl`] over `input`. Replies still outstanding at `/quit` or
/// end of input are awaited and reported before the final flush.
pub async fn run_with<R, W>(
    store: ChatStore,
    pipeline: SendPipeline,
    input: R,
    out: W,
) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut repl = Repl::new(store.clone(), pipeline, out, tx);
    let mut lines = input.lines();

    writeln!(repl.out, "Type a message to chat, /help for commands.")?;
    repl.print_sidebar().await?;
    repl.print_header().await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if repl.handle_line(&line).await? == Flow::Quit {
                    break;
                }
            }
            Some(outcome) = rx.recv() => repl.report(outcome).await?,
        }
        repl.out.flush()?;
    }

    if repl.in_flight > 0 {
        debug!(in_flight = repl.in_flight, "waiting for outstanding replies");
    }
    while repl.in_flight > 0 {
        let Some(outcome) = rx.recv().await else { break };
        repl.report(outcome).await?;
    }
    repl.out.flush()?;

    store.flush().await;
    Ok(repl.out)
}

use anyhow::{Context, Result};
use chat_companion::app_config::{self, AppConfig};
use chat_companion::models::format_millis;
use chat_companion::ui::{self, render_message};
use chat_companion::{open_file_store, AIService, SendPipeline};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "chat-companion")]
#[command(about = "Terminal chat client for an LLM completion endpoint", long_about = None)]
struct Cli {
    /// Directory holding the saved chats (overrides CHAT_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Model name sent with each request (overrides DEEPSEEK_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,

    /// List saved chats
    List,

    /// Print one chat's messages
    Show {
        /// Chat id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            // Load + validate env ONCE
            let mut config = AppConfig::load().context("invalid configuration")?;
            if let Some(dir) = cli.data_dir {
                config.data_dir = dir;
            }
            if let Some(model) = cli.model {
                config.model = model;
            }

            let store = open_file_store(&config.data_dir).await;
            let client = Arc::new(
                AIService::from_config(&config).context("failed to build completion client")?,
            );
            info!("Chatting with {} (data in {})", client.model(), config.data_dir.display());

            let pipeline = SendPipeline::new(store.clone(), client, config.system_prompt.clone());
            ui::run(store, pipeline).await?;
        }
        Commands::List => {
            let data_dir = cli.data_dir.unwrap_or_else(app_config::data_dir_from_env);
            let store = open_file_store(&data_dir).await;
            for chat in store.chats().await {
                println!(
                    "{}\t{}\t{} messages\t{}",
                    chat.id,
                    chat.name,
                    chat.messages.len(),
                    format_millis(chat.created_at)
                );
            }
        }
        Commands::Show { id } => {
            let data_dir = cli.data_dir.unwrap_or_else(app_config::data_dir_from_env);
            let store = open_file_store(&data_dir).await;
            let chat = store
                .conversation(&id)
                .await
                .with_context(|| format!("no chat with id {id}"))?;

            println!("== {} ==", chat.name);
            for message in &chat.messages {
                println!("{}", render_message(message));
            }
        }
    }

    Ok(())
}

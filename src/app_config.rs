use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_DATA_DIR: &str = ".chat-companion";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Fixed instruction sent ahead of every transcript.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful health AI assistant. \
Answer health questions clearly and carefully, and remind the user to contact \
a medical professional or local emergency services when a situation may be urgent.";

#[derive(Debug, Clone)]
pub struct AppConfig {
    // --- Completion API ---
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub request_timeout: Duration,
    pub system_prompt: String,

    // --- Storage ---
    pub data_dir: PathBuf,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // dotenv belongs HERE, nowhere else
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("DEEPSEEK_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::Missing("DEEPSEEK_API_KEY"))?;

        let request_timeout = match lookup("CHAT_REQUEST_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "CHAT_REQUEST_TIMEOUT_SECS",
                        reason: format!("expected a positive number of seconds, got '{raw}'"),
                    })
                }
            },
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            api_key,
            api_url: lookup("DEEPSEEK_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            model: lookup("DEEPSEEK_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            request_timeout,
            system_prompt: lookup("CHAT_SYSTEM_PROMPT")
                .filter(|prompt| !prompt.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            data_dir: data_dir_from(&lookup),
        })
    }
}

/// Storage location only; needs no API key.
pub fn data_dir_from_env() -> PathBuf {
    dotenvy::dotenv().ok();
    data_dir_from(&|key: &str| env::var(key).ok())
}

fn data_dir_from(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("CHAT_DATA_DIR")
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

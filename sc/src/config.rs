//! streamchat configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::tags::DEFAULT_ALLOWED_TAGS;

/// Main streamchat configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model endpoint configuration
    pub llm: LlmConfig,

    /// Conversation and rendering configuration
    pub chat: ChatConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::search_paths() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed: a broken config file is reported properly by
    /// [`Config::load`] once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => Some(path.clone()),
            None => Self::search_paths().into_iter().find(|p| p.exists()),
        }?;
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<Self>(&content).ok()?.log_level
    }

    /// Project-local `.streamchat.yml`, then `~/.config/streamchat/streamchat.yml`
    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".streamchat.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("streamchat").join("streamchat.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Full URL of the chat completions endpoint
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// TCP connect timeout in milliseconds; the stream itself never times out
    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: Option<u64>,

    /// Sampling controls passed through to the server
    pub generation: GenerationConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/v1/chat/completions".to_string(),
            model: "qwen-32b".to_string(),
            api_key_env: "STREAMCHAT_API_KEY".to_string(),
            connect_timeout_ms: Some(10_000),
            generation: GenerationConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// Generation controls sent with every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Randomness, 0.0 to 2.0
    pub temperature: f64,

    /// Nucleus sampling threshold, 0.0 to 1.0
    #[serde(rename = "top-p")]
    pub top_p: f64,

    /// Maximum output tokens
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Stop sequences
    pub stop: Option<Vec<String>>,

    /// -2.0 to 2.0; positive values favour new topics
    #[serde(rename = "presence-penalty")]
    pub presence_penalty: f64,

    /// -2.0 to 2.0; positive values discourage verbatim repetition
    #[serde(rename = "frequency-penalty")]
    pub frequency_penalty: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 4096,
            stop: None,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

/// Conversation and rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Identifier stamped on every event this client emits
    #[serde(rename = "bot-id")]
    pub bot_id: String,

    /// Control tags extracted from assistant text
    pub tags: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bot_id: "bot-007".to_string(),
            tags: DEFAULT_ALLOWED_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

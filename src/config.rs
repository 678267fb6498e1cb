//! Crate configuration: JSON file with default fallback, API keys
//! resolvable from the environment when the field is left empty.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Top-level configuration for the agent core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API key for the chat completion endpoint.
    pub chat_openai_api_key: String,
    /// OpenAI-compatible base URL (without the `/chat/completions` suffix).
    pub chat_openai_base_url: String,
    /// Model used for the feedback and reply stages.
    pub chat_openai_model: String,
    /// API key for the SiliconFlow embedding / VLM endpoints.
    pub siliconflow_api_key: String,
    /// Group ids the agent is allowed to join. Everything else is ignored.
    pub enabled_groups: Vec<i64>,
    /// Base directory for session snapshots, long-term indexes and caches.
    pub data_dir: PathBuf,
    /// Directory holding role preset JSON files.
    pub preset_dir: PathBuf,
    /// Optional HuggingFace `tokenizer.json` used by the memory chunker.
    /// Without it the chunker falls back to a character-window approximation.
    pub tokenizer_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chat_openai_api_key: String::new(),
            chat_openai_base_url: "https://api.openai.com/v1".to_string(),
            chat_openai_model: "gpt-3.5-turbo".to_string(),
            siliconflow_api_key: String::new(),
            enabled_groups: Vec::new(),
            data_dir: PathBuf::from("."),
            preset_dir: PathBuf::from("nya_presets"),
            tokenizer_file: None,
        }
    }
}

impl Config {
    /// Load from a JSON file, resolving empty API keys from the environment
    /// (`CHAT_OPENAI_API_KEY`, `SILICONFLOW_API_KEY`).
    pub fn load(path: &Path) -> Self {
        let mut config: Config = load_json_config(path, "Config");
        if config.chat_openai_api_key.is_empty() {
            if let Some(key) = env_key("CHAT_OPENAI_API_KEY") {
                config.chat_openai_api_key = key;
            }
        }
        if config.siliconflow_api_key.is_empty() {
            if let Some(key) = env_key("SILICONFLOW_API_KEY") {
                config.siliconflow_api_key = key;
            }
        }
        config
    }
}

/// Generic load for any Serde config type with a `Default` implementation.
/// Falls back to `T::default()` if the file is missing or unparsable.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<T>(&content) {
            Ok(config) => {
                info!("[{}] loaded config from {}", label, path.display());
                config
            }
            Err(e) => {
                warn!(
                    "[{}] failed to parse config {}: {} — using defaults",
                    label,
                    path.display(),
                    e
                );
                T::default()
            }
        },
        Err(_) => {
            info!(
                "[{}] no config file at {} — using defaults",
                label,
                path.display()
            );
            T::default()
        }
    }
}

/// Generic save for any Serde config type.
pub fn save_json_config<T: Serialize>(path: &Path, config: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}

fn env_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

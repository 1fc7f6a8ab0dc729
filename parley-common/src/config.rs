//! Configuration management for Parley.
//!
//! Configuration lives in a single JSON file at `~/.parley/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `OPENAI_API_KEY` → models.openai.api_key
//! - `OPENAI_BASE_URL` → models.openai.base_url
//! - `OPENAI_MODEL_NAME` → models.openai.model
//! - `OLLAMA_BASE_URL` → models.ollama.base_url
//! - `OLLAMA_MODEL_NAME` → models.ollama.model
//! - `PARLEY_LOG_LEVEL` → logging.level
//! - `PARLEY_LOG_FORMAT` → logging.format

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error raised while loading or parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".parley"),
        |dirs| dirs.home_dir().join(".parley"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" for structured JSON, "pretty" for human-readable.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Model Backend Configuration
// ============================================================================

/// OpenAI-compatible backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OpenAiConfig {
    /// API key. Required to construct the backend.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL override (Azure, proxies, compatible APIs).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model name (default: gpt-4o-mini).
    #[serde(default)]
    pub model: Option<String>,
}

/// Ollama backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OllamaConfig {
    /// Base URL (default: http://localhost:11434).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model name. Required to construct the backend.
    #[serde(default)]
    pub model: Option<String>,
}

/// Configuration for all model backends.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,
}

// ============================================================================
// Top-level Configuration
// ============================================================================

/// Top-level Parley configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub models: ModelsConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when the file is absent. Environment variables override file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_path())
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides on top of file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.models.openai.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            if !url.is_empty() {
                self.models.openai.base_url = Some(url);
            }
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL_NAME") {
            if !model.is_empty() {
                self.models.openai.model = Some(model);
            }
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            if !url.is_empty() {
                self.models.ollama.base_url = Some(url);
            }
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL_NAME") {
            if !model.is_empty() {
                self.models.ollama.model = Some(model);
            }
        }
        if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
        if let Ok(format) = std::env::var("PARLEY_LOG_FORMAT") {
            if !format.is_empty() {
                self.logging.format = format;
            }
        }
    }
}

impl OpenAiConfig {
    /// Project this section into the free-form bag consumed by model
    /// constructors.
    pub fn to_model_config(&self) -> Map<String, Value> {
        let mut bag = Map::new();
        if let Some(ref key) = self.api_key {
            bag.insert("api_key".into(), Value::String(key.clone()));
        }
        if let Some(ref url) = self.base_url {
            bag.insert("base_url".into(), Value::String(url.clone()));
        }
        if let Some(ref model) = self.model {
            bag.insert("model".into(), Value::String(model.clone()));
        }
        bag
    }
}

impl OllamaConfig {
    /// Project this section into the free-form bag consumed by model
    /// constructors.
    pub fn to_model_config(&self) -> Map<String, Value> {
        let mut bag = Map::new();
        if let Some(ref url) = self.base_url {
            bag.insert("base_url".into(), Value::String(url.clone()));
        }
        if let Some(ref model) = self.model {
            bag.insert("model".into(), Value::String(model.clone()));
        }
        bag
    }
}

//! Parley Common - Shared configuration, logging, and error types.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - Logging setup with noise filtering
//! - The error type shared by configuration loading

#![warn(clippy::all)]

pub mod config;
pub mod logging;

pub use config::{Config, ConfigError, LoggingConfig, ModelsConfig, OllamaConfig, OpenAiConfig};
pub use logging::init_logging;

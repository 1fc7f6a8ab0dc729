//! The model factory: an open, fail-closed registry from model-type keys to
//! adapter constructors.
//!
//! The factory is an explicitly constructed object handed to whoever owns
//! session management; there is no hidden global instance. After
//! construction it is safe for concurrent reads; registration is not
//! expected to race with lookups in steady state.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{ChatModel, OllamaModel, OpenAiModel};

/// Free-form configuration bag interpreted by each registered constructor.
pub type ModelConfig = Map<String, Value>;

/// Constructor producing a backend adapter from free-form configuration.
pub type ModelCreator =
    Box<dyn Fn(&ModelConfig) -> Result<Arc<dyn ChatModel>, FactoryError> + Send + Sync>;

/// Error from model construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FactoryError {
    /// No constructor is registered for this key.
    #[error("unsupported model type: {0}")]
    UnsupportedModelType(String),

    /// A registered constructor is missing a required configuration field.
    #[error("{model_type} model requires {field}")]
    MissingConfig {
        model_type: &'static str,
        field: &'static str,
    },
}

/// Registry mapping a model-type key to an adapter constructor.
pub struct ModelFactory {
    creators: HashMap<String, ModelCreator>,
}

impl ModelFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self {
            creators: HashMap::new(),
        }
    }

    /// Create a factory with the built-in constructors registered.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();

        factory.register("openai", Box::new(create_openai));
        factory.register("ollama", Box::new(create_ollama));

        factory
    }

    /// Register a constructor for a model-type key.
    ///
    /// Re-registering a key replaces the previous constructor.
    pub fn register(&mut self, model_type: impl Into<String>, creator: ModelCreator) {
        self.creators.insert(model_type.into(), creator);
    }

    /// Construct a backend adapter for the given model type.
    ///
    /// Fails closed: an unknown key and a recognized key with insufficient
    /// configuration are both explicit errors.
    pub fn create(
        &self,
        model_type: &str,
        config: &ModelConfig,
    ) -> Result<Arc<dyn ChatModel>, FactoryError> {
        let creator = self
            .creators
            .get(model_type)
            .ok_or_else(|| FactoryError::UnsupportedModelType(model_type.to_string()))?;
        creator(config)
    }

    /// List the registered model-type keys.
    pub fn registered_types(&self) -> Vec<&str> {
        self.creators.keys().map(String::as_str).collect()
    }

    /// Construct an adapter using the matching section of loaded
    /// configuration instead of a hand-built bag.
    pub fn create_from_settings(
        &self,
        model_type: &str,
        models: &parley_common::ModelsConfig,
    ) -> Result<Arc<dyn ChatModel>, FactoryError> {
        let bag = match model_type {
            "openai" => models.openai.to_model_config(),
            "ollama" => models.ollama.to_model_config(),
            _ => ModelConfig::new(),
        };
        self.create(model_type, &bag)
    }
}

impl Default for ModelFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn config_str<'a>(config: &'a ModelConfig, field: &str) -> Option<&'a str> {
    config.get(field).and_then(Value::as_str)
}

fn create_openai(config: &ModelConfig) -> Result<Arc<dyn ChatModel>, FactoryError> {
    let api_key = config_str(config, "api_key").ok_or(FactoryError::MissingConfig {
        model_type: "openai",
        field: "api_key",
    })?;

    let mut model = match config_str(config, "base_url") {
        Some(url) => OpenAiModel::with_base_url(api_key, url),
        None => OpenAiModel::new(api_key),
    };
    if let Some(name) = config_str(config, "model") {
        model = model.with_model(name);
    }

    Ok(Arc::new(model))
}

fn create_ollama(config: &ModelConfig) -> Result<Arc<dyn ChatModel>, FactoryError> {
    let model = config_str(config, "model").ok_or(FactoryError::MissingConfig {
        model_type: "ollama",
        field: "model",
    })?;

    Ok(Arc::new(OllamaModel::new(
        config_str(config, "base_url"),
        model,
    )))
}

//! Parley Model - Backend adapters and the model factory.
//!
//! This crate provides:
//! - The `ChatModel` trait: a uniform contract over concrete LLM backends
//!   (generate, stream, identify)
//! - Concrete adapters for OpenAI-compatible APIs and Ollama
//! - Augmentation contracts (tool invocation, document retrieval) resolved
//!   by adapters when capability flags request them
//! - `ModelFactory`: an open, fail-closed registry from model-type keys to
//!   adapter constructors

#![warn(clippy::all)]

pub mod augment;
pub mod factory;
pub mod model;

pub use augment::{splice_retrieved, RetrievedDoc, Retriever, Tool, ToolResult, ToolSpec};
pub use factory::{FactoryError, ModelConfig, ModelCreator, ModelFactory};
pub use model::{
    ChatModel, ChatTurn, ChunkSink, GenerateOptions, ModelError, OllamaModel, OpenAiModel, Role,
};

//! The Model Backend Adapter contract and shared wire-level types.
//!
//! Adapters wrap one concrete LLM integration behind `ChatModel`: a one-shot
//! generate call, an incrementally streamed call, and a stable identifier.
//! Capability flags on generation select augmentation strategies that are
//! resolved before the base call.

mod ollama;
mod openai;

pub use ollama::OllamaModel;
pub use openai::OpenAiModel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Receives incremental text during streaming generation.
///
/// One sink is 1:1 with one `stream` call. Chunks are pushed in arrival
/// order, synchronously with receipt from the backend; the terminal event is
/// the call returning. The sink is never used after the call returns.
pub type ChunkSink = tokio::sync::mpsc::UnboundedSender<String>;

/// Error from a model backend adapter.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The outbound request could not be completed.
    #[error("[{provider}] request failed: {source}")]
    Request {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("[{provider}] API error ({status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// The backend answered with a body we could not interpret.
    #[error("[{provider}] failed to parse response: {message}")]
    Parse {
        provider: &'static str,
        message: String,
    },

    /// The backend returned no usable content.
    #[error("[{provider}] backend returned no usable content")]
    EmptyResponse { provider: &'static str },

    /// A flagged augmentation strategy could not be satisfied.
    #[error("[{provider}] {strategy} augmentation failed: {message}")]
    Augmentation {
        provider: &'static str,
        strategy: &'static str,
        message: String,
    },

    /// The backend reported an error mid-stream.
    #[error("[{provider}] stream error: {message}")]
    Stream {
        provider: &'static str,
        message: String,
    },

    /// The chunk receiver was dropped while the stream was in flight.
    #[error("[{provider}] stream aborted: chunk receiver dropped")]
    SinkClosed { provider: &'static str },
}

/// Role of a turn in the adapter-level conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A single turn handed to a backend adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Capability flags selecting augmentation strategies for one generate call.
///
/// With no flag set, adapters perform a plain single-turn call. A flag whose
/// strategy cannot be satisfied (no resolver bound, resolver failed) is an
/// error, not a silent downgrade to plain generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    /// Run a multi-step tool-call loop with the bound tools.
    pub web_search: bool,
    /// Fetch retrieved documents and splice them in as auxiliary context.
    pub retrieval: bool,
}

impl GenerateOptions {
    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }

    pub fn with_retrieval(mut self) -> Self {
        self.retrieval = true;
        self
    }
}

/// Uniform contract over concrete language-model backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate one reply for the given ordered history.
    ///
    /// Augmentation strategies requested via `options` are resolved before
    /// the base call.
    async fn generate(
        &self,
        history: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<ChatTurn, ModelError>;

    /// Generate a reply as a stream of text increments.
    ///
    /// Every non-empty increment is pushed into `sink` in arrival order and
    /// accumulated; the aggregate is returned once the backend signals
    /// completion. On a mid-stream error the call returns that error, no
    /// further chunks are delivered, and the partial aggregate is discarded.
    async fn stream(&self, history: &[ChatTurn], sink: &ChunkSink) -> Result<String, ModelError>;

    /// Stable identifier used for registry bookkeeping and display.
    fn model_type(&self) -> &str;
}

impl std::fmt::Debug for dyn ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModel")
            .field("model_type", &self.model_type())
            .finish()
    }
}

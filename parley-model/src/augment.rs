//! Augmentation contracts resolved by backend adapters.
//!
//! The core treats tool invocation and document retrieval as externally
//! supplied capabilities: adapters call into these traits when a capability
//! flag requests augmentation, and never otherwise.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::model::ChatTurn;

/// A document returned by a retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub id: String,
    pub content: String,
}

/// External document-retrieval capability.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve documents relevant to `query`, most relevant first.
    async fn retrieve(&self, query: &str) -> anyhow::Result<Vec<RetrievedDoc>>;
}

/// Result from executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool succeeded.
    pub success: bool,
    /// Tool output (result text).
    pub output: String,
    /// Error message if failed.
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Tool specification for LLM function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name (must match `name()`).
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// External tool-invocation capability.
///
/// Each tool provides a unique name, a description shown to the LLM, a JSON
/// Schema for its arguments, and an async executor.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Description shown to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with given arguments.
    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult>;

    /// Generate a ToolSpec for function calling.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Splice retrieved documents into a history as auxiliary context.
///
/// Documents are appended as system turns after the existing history, so the
/// backend sees them adjacent to the question it is about to answer.
pub fn splice_retrieved(history: &[ChatTurn], docs: &[RetrievedDoc]) -> Vec<ChatTurn> {
    let mut turns = history.to_vec();
    for doc in docs {
        turns.push(ChatTurn::system(format!(
            "Reference material: {}",
            doc.content
        )));
    }
    turns
}

/// Render the citation block appended to a retrieval-augmented reply.
pub fn references_block(docs: &[RetrievedDoc]) -> String {
    let mut out = String::from("## References ##\n");
    for (i, doc) in docs.iter().enumerate() {
        let _ = writeln!(out, "[{}] {}: {}", i + 1, doc.id, doc.content);
    }
    out
}

//! Ollama backend adapter.
//!
//! Talks to a local Ollama instance via `/api/chat`. Streaming responses
//! arrive as newline-delimited JSON with per-line `message.content` deltas
//! and a terminal `done` flag.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatModel, ChatTurn, ChunkSink, GenerateOptions, ModelError, Role};
use crate::augment::{references_block, splice_retrieved, Retriever};

const PROVIDER: &str = "ollama";

/// Ollama backend adapter for locally hosted models.
pub struct OllamaModel {
    base_url: String,
    model: String,
    client: Client,
    retriever: Option<Arc<dyn Retriever>>,
}

impl OllamaModel {
    /// Create a new adapter.
    ///
    /// # Arguments
    /// * `base_url` - Base URL for the Ollama API (defaults to
    ///   http://localhost:11434)
    /// * `model` - Model name to run (e.g. "llama3")
    pub fn new(base_url: Option<&str>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or("http://localhost:11434")
                .trim_end_matches('/')
                .to_string(),
            model: model.into(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(300)) // local models may be slow
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            retriever: None,
        }
    }

    /// Bind a document retriever for the retrieval capability flag.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    async fn generate_plain(&self, history: &[ChatTurn]) -> Result<ChatTurn, ModelError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: to_wire(history),
            stream: false,
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|source| ModelError::Request {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: OllamaChatResponse =
            response.json().await.map_err(|e| ModelError::Parse {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        if parsed.message.content.is_empty() {
            return Err(ModelError::EmptyResponse { provider: PROVIDER });
        }
        Ok(ChatTurn::assistant(parsed.message.content))
    }

    async fn generate_with_retrieval(&self, history: &[ChatTurn]) -> Result<ChatTurn, ModelError> {
        let retriever = self.retriever.as_ref().ok_or(ModelError::Augmentation {
            provider: PROVIDER,
            strategy: "retrieval",
            message: "no retriever bound".into(),
        })?;

        let query = history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.clone())
            .unwrap_or_default();

        let docs = retriever
            .retrieve(&query)
            .await
            .map_err(|e| ModelError::Augmentation {
                provider: PROVIDER,
                strategy: "retrieval",
                message: e.to_string(),
            })?;

        let turns = splice_retrieved(history, &docs);
        let mut reply = self.generate_plain(&turns).await?;

        reply.content.push('\n');
        reply.content.push_str(&references_block(&docs));
        Ok(reply)
    }
}

#[async_trait]
impl ChatModel for OllamaModel {
    async fn generate(
        &self,
        history: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<ChatTurn, ModelError> {
        if options.web_search {
            // No tool-call wiring for local models.
            return Err(ModelError::Augmentation {
                provider: PROVIDER,
                strategy: "tool",
                message: "tool invocation is not supported by this backend".into(),
            });
        }
        if options.retrieval {
            return self.generate_with_retrieval(history).await;
        }
        self.generate_plain(history).await
    }

    async fn stream(&self, history: &[ChatTurn], sink: &ChunkSink) -> Result<String, ModelError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: to_wire(history),
            stream: true,
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|source| ModelError::Request {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message: body,
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut aggregate = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| ModelError::Stream {
                provider: PROVIDER,
                message: e.to_string(),
            })?;
            buffer.extend_from_slice(&bytes);

            // Newline-delimited JSON; a line (or a multi-byte character) may
            // arrive split across chunks, so bytes are decoded only once a
            // complete line is buffered.
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let delta = parse_stream_line(line)?;
                if !delta.content.is_empty() {
                    aggregate.push_str(&delta.content);
                    if sink.send(delta.content).is_err() {
                        return Err(ModelError::SinkClosed { provider: PROVIDER });
                    }
                }
                if delta.done {
                    return Ok(aggregate);
                }
            }
        }

        // The body may end without a trailing newline; a complete final line
        // would otherwise be lost.
        let tail = String::from_utf8_lossy(&buffer);
        let tail = tail.trim();
        if !tail.is_empty() {
            let delta = parse_stream_line(tail)?;
            if !delta.content.is_empty() {
                aggregate.push_str(&delta.content);
                if sink.send(delta.content).is_err() {
                    return Err(ModelError::SinkClosed { provider: PROVIDER });
                }
            }
        }

        Ok(aggregate)
    }

    fn model_type(&self) -> &str {
        PROVIDER
    }
}

/// One decoded line of an Ollama streaming response.
#[derive(Debug, PartialEq)]
struct StreamDelta {
    content: String,
    done: bool,
}

fn parse_stream_line(line: &str) -> Result<StreamDelta, ModelError> {
    let parsed: OllamaStreamChunk =
        serde_json::from_str(line).map_err(|e| ModelError::Parse {
            provider: PROVIDER,
            message: format!("bad stream line: {}", e),
        })?;
    Ok(StreamDelta {
        content: parsed.message.map(|m| m.content).unwrap_or_default(),
        done: parsed.done,
    })
}

fn to_wire(history: &[ChatTurn]) -> Vec<OllamaMessage> {
    history
        .iter()
        .map(|turn| OllamaMessage {
            role: turn.role.as_str().into(),
            content: turn.content.clone(),
        })
        .collect()
}

// ============================================================================
// Ollama API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
}

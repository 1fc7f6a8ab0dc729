//! OpenAI-compatible backend adapter.
//!
//! Speaks the chat-completions API (`/v1/chat/completions`), including SSE
//! streaming, and resolves both augmentation strategies: a bounded
//! tool-call loop and document-retrieval splicing.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{ChatModel, ChatTurn, ChunkSink, GenerateOptions, ModelError, Role};
use crate::augment::{references_block, splice_retrieved, Retriever, Tool, ToolSpec};

const PROVIDER: &str = "openai";

/// Maximum number of tool-calling round trips before giving up.
const MAX_TOOL_STEPS: usize = 4;

/// OpenAI-compatible backend adapter.
pub struct OpenAiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    retriever: Option<Arc<dyn Retriever>>,
    tools: Vec<Arc<dyn Tool>>,
}

impl OpenAiModel {
    /// Create a new adapter against the public OpenAI endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com")
    }

    /// Create with a custom base URL (Azure, proxies, compatible APIs).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: "gpt-4o-mini".into(),
            retriever: None,
            tools: Vec::new(),
        }
    }

    /// Select the model name sent with every request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Bind a document retriever for the retrieval capability flag.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Bind tools for the tool-invocation capability flag.
    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// One round trip against the chat-completions endpoint.
    async fn chat_raw(
        &self,
        messages: &[OpenAiMessage],
        tools: Option<&[OpenAiToolDef]>,
    ) -> Result<OpenAiMessage, ModelError> {
        let request = OpenAiRequest {
            model: &self.model,
            messages,
            tools,
            stream: false,
        };

        let response = self
            .client
            .post(self.completions_url())
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

        let parsed: OpenAiResponse =
            response.json().await.map_err(|e| ModelError::Parse {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(ModelError::EmptyResponse { provider: PROVIDER })
    }

    async fn generate_plain(&self, history: &[ChatTurn]) -> Result<ChatTurn, ModelError> {
        let messages = to_wire(history);
        let reply = self.chat_raw(&messages, None).await?;
        let content = reply.content.unwrap_or_default();
        if content.is_empty() {
            return Err(ModelError::EmptyResponse { provider: PROVIDER });
        }
        Ok(ChatTurn::assistant(content))
    }

    /// Retrieval-augmented generation: fetch documents, splice them in as
    /// auxiliary context, and cite them in the reply.
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

    /// Tool-augmented generation: a bounded multi-step tool-call loop.
    ///
    /// If a later step fails after an assistant turn with content was
    /// already produced, that partial turn is returned and the failure
    /// logged (best-effort continuation).
    async fn generate_with_tools(&self, history: &[ChatTurn]) -> Result<ChatTurn, ModelError> {
        if self.tools.is_empty() {
            return Err(ModelError::Augmentation {
                provider: PROVIDER,
                strategy: "tool",
                message: "no tools bound".into(),
            });
        }

        let tool_defs: Vec<OpenAiToolDef> = self.tools.iter().map(|t| t.spec().into()).collect();
        let mut messages = to_wire(history);
        let mut partial: Option<String> = None;

        for step in 0..MAX_TOOL_STEPS {
            let reply = match self.chat_raw(&messages, Some(&tool_defs)).await {
                Ok(reply) => reply,
                Err(err) => {
                    if let Some(content) = partial {
                        tracing::warn!(
                            error = %err,
                            step,
                            "tool loop failed mid-run, returning partial reply"
                        );
                        return Ok(ChatTurn::assistant(content));
                    }
                    return Err(err);
                }
            };

            if let Some(content) = reply.content.clone().filter(|c| !c.is_empty()) {
                partial = Some(content);
            }

            let calls = match reply.tool_calls.clone().filter(|c| !c.is_empty()) {
                Some(calls) => calls,
                None => {
                    // No further tool work requested, this is the final reply.
                    return partial
                        .map(ChatTurn::assistant)
                        .ok_or(ModelError::EmptyResponse { provider: PROVIDER });
                }
            };

            messages.push(reply);
            for call in calls {
                let output = match self.invoke_tool(&call).await {
                    Ok(output) => output,
                    Err(err) => {
                        if let Some(content) = partial {
                            tracing::warn!(
                                error = %err,
                                tool = %call.function.name,
                                "tool invocation failed, returning partial reply"
                            );
                            return Ok(ChatTurn::assistant(content));
                        }
                        return Err(err);
                    }
                };
                messages.push(OpenAiMessage::tool_result(call.id, output));
            }
        }

        match partial {
            Some(content) => {
                tracing::warn!(max_steps = MAX_TOOL_STEPS, "tool loop hit step limit");
                Ok(ChatTurn::assistant(content))
            }
            None => Err(ModelError::Augmentation {
                provider: PROVIDER,
                strategy: "tool",
                message: format!("tool loop exceeded {} steps without a reply", MAX_TOOL_STEPS),
            }),
        }
    }

    async fn invoke_tool(&self, call: &OpenAiToolCall) -> Result<String, ModelError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == call.function.name)
            .ok_or_else(|| ModelError::Augmentation {
                provider: PROVIDER,
                strategy: "tool",
                message: format!("model requested unknown tool '{}'", call.function.name),
            })?;

        let args: serde_json::Value = if call.function.arguments.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                ModelError::Augmentation {
                    provider: PROVIDER,
                    strategy: "tool",
                    message: format!("invalid arguments for '{}': {}", tool.name(), e),
                }
            })?
        };

        tracing::debug!(tool = %tool.name(), "executing tool call");
        let result = tool
            .execute(args)
            .await
            .map_err(|e| ModelError::Augmentation {
                provider: PROVIDER,
                strategy: "tool",
                message: format!("tool '{}' execution failed: {}", tool.name(), e),
            })?;

        // A tool that ran but reported failure is fed back to the model so
        // it can recover; only transport-level failures abort the loop.
        Ok(if result.success {
            result.output
        } else {
            format!(
                "tool '{}' failed: {}",
                tool.name(),
                result.error.unwrap_or_else(|| "unknown error".into())
            )
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn generate(
        &self,
        history: &[ChatTurn],
        options: &GenerateOptions,
    ) -> Result<ChatTurn, ModelError> {
        if options.web_search {
            return self.generate_with_tools(history).await;
        }
        if options.retrieval {
            return self.generate_with_retrieval(history).await;
        }
        self.generate_plain(history).await
    }

    async fn stream(&self, history: &[ChatTurn], sink: &ChunkSink) -> Result<String, ModelError> {
        let messages = to_wire(history);
        let request = OpenAiRequest {
            model: &self.model,
            messages: &messages,
            tools: None,
            stream: true,
        };

        let response = self
            .client
            .post(self.completions_url())
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

            // SSE events are newline-delimited; a data payload (or a
            // multi-byte character) may arrive split across chunks, so bytes
            // are decoded only once a complete line is buffered.
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);

                let Some(payload) = parse_sse_data(line.trim()) else {
                    continue;
                };
                if payload == "[DONE]" {
                    return Ok(aggregate);
                }

                let delta = extract_stream_delta(payload)?;
                if let Some(text) = delta.filter(|t| !t.is_empty()) {
                    aggregate.push_str(&text);
                    if sink.send(text).is_err() {
                        return Err(ModelError::SinkClosed { provider: PROVIDER });
                    }
                }
            }
        }

        // The body may end without a trailing newline; a complete final
        // data line would otherwise be lost.
        let tail = String::from_utf8_lossy(&buffer);
        if let Some(payload) = parse_sse_data(tail.trim()) {
            if payload != "[DONE]" {
                let delta = extract_stream_delta(payload)?;
                if let Some(text) = delta.filter(|t| !t.is_empty()) {
                    aggregate.push_str(&text);
                    if sink.send(text).is_err() {
                        return Err(ModelError::SinkClosed { provider: PROVIDER });
                    }
                }
            }
        }

        Ok(aggregate)
    }

    fn model_type(&self) -> &str {
        PROVIDER
    }
}

/// Extract the payload of an SSE `data:` line.
fn parse_sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Extract the text delta from one streamed completion chunk.
fn extract_stream_delta(payload: &str) -> Result<Option<String>, ModelError> {
    let chunk: StreamChunk = serde_json::from_str(payload).map_err(|e| ModelError::Parse {
        provider: PROVIDER,
        message: format!("bad stream chunk: {}", e),
    })?;
    Ok(chunk.choices.into_iter().next().and_then(|c| c.delta.content))
}

fn to_wire(history: &[ChatTurn]) -> Vec<OpenAiMessage> {
    history
        .iter()
        .map(|turn| OpenAiMessage {
            role: turn.role.as_str().into(),
            content: Some(turn.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        })
        .collect()
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [OpenAiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [OpenAiToolDef]>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn tool_result(call_id: String, output: String) -> Self {
        Self {
            role: "tool".into(),
            content: Some(output),
            tool_calls: None,
            tool_call_id: Some(call_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    /// JSON-encoded argument object, as the API delivers it.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiToolDef {
    #[serde(rename = "type")]
    def_type: &'static str,
    function: ToolSpec,
}

impl From<ToolSpec> for OpenAiToolDef {
    fn from(spec: ToolSpec) -> Self {
        Self {
            def_type: "function",
            function: spec,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

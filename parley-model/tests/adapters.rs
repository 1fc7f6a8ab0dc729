//! HTTP round-trip tests for the backend adapters, against a mock server.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parley_model::{
    ChatModel, ChatTurn, GenerateOptions, ModelError, OllamaModel, OpenAiModel, RetrievedDoc,
    Retriever, Tool, ToolResult,
};

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": { "role": "assistant", "content": content }
        }]
    })
}

struct StubRetriever {
    docs: Vec<RetrievedDoc>,
    fail: bool,
}

#[async_trait]
impl Retriever for StubRetriever {
    async fn retrieve(&self, _query: &str) -> anyhow::Result<Vec<RetrievedDoc>> {
        if self.fail {
            anyhow::bail!("retrieval service unavailable");
        }
        Ok(self.docs.clone())
    }
}

struct RecordingTool {
    calls: Mutex<Vec<serde_json::Value>>,
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "q": { "type": "string" } },
            "required": ["q"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        self.calls.lock().await.push(args);
        Ok(ToolResult::success("rust is a systems language"))
    }
}

#[tokio::test]
async fn openai_generate_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hello!")))
        .mount(&server)
        .await;

    let model = OpenAiModel::with_base_url("sk-test", server.uri());
    let reply = model
        .generate(&[ChatTurn::user("Hi")], &GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(reply.content, "Hello!");
}

#[tokio::test]
async fn openai_api_error_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let model = OpenAiModel::with_base_url("sk-test", server.uri());
    let err = model
        .generate(&[ChatTurn::user("Hi")], &GenerateOptions::default())
        .await
        .unwrap_err();

    match err {
        ModelError::Api { status, message, .. } => {
            assert_eq!(status, 429);
            assert!(message.contains("rate limited"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn openai_empty_content_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("")))
        .mount(&server)
        .await;

    let model = OpenAiModel::with_base_url("sk-test", server.uri());
    let err = model
        .generate(&[ChatTurn::user("Hi")], &GenerateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::EmptyResponse { .. }));
}

#[tokio::test]
async fn openai_stream_delivers_chunks_in_order() {
    let sse = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"content\":\"lo, \"}}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}\n\n\
               data: [DONE]\n\n";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let model = OpenAiModel::with_base_url("sk-test", server.uri());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let aggregate = model.stream(&[ChatTurn::user("Hi")], &tx).await.unwrap();
    drop(tx);

    assert_eq!(aggregate, "Hello, world");

    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(chunks, vec!["Hel", "lo, ", "world"]);
}

#[tokio::test]
async fn openai_stream_error_status_delivers_no_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let model = OpenAiModel::with_base_url("sk-test", server.uri());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let err = model.stream(&[ChatTurn::user("Hi")], &tx).await.unwrap_err();
    drop(tx);

    assert!(matches!(err, ModelError::Api { status: 500, .. }));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn openai_stream_parse_error_after_chunks_keeps_delivered_chunks() {
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
               data: this is not json\n\n";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let model = OpenAiModel::with_base_url("sk-test", server.uri());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let err = model.stream(&[ChatTurn::user("Hi")], &tx).await.unwrap_err();
    drop(tx);

    assert!(matches!(err, ModelError::Parse { .. }));

    // Chunks delivered before the failure are not retracted.
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(chunks, vec!["Hel", "lo"]);
}

#[tokio::test]
async fn openai_stream_consumes_final_line_without_newline() {
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hello, \"}}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let model = OpenAiModel::with_base_url("sk-test", server.uri());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let aggregate = model.stream(&[ChatTurn::user("Hi")], &tx).await.unwrap();
    drop(tx);

    assert_eq!(aggregate, "Hello, world");

    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(chunks, vec!["Hello, ", "world"]);
}

#[tokio::test]
async fn openai_stream_aborts_when_receiver_dropped() {
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
               data: [DONE]\n\n";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let model = OpenAiModel::with_base_url("sk-test", server.uri());
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);

    let err = model.stream(&[ChatTurn::user("Hi")], &tx).await.unwrap_err();
    assert!(matches!(err, ModelError::SinkClosed { .. }));
}

#[tokio::test]
async fn openai_retrieval_splices_docs_and_cites_them() {
    let server = MockServer::start().await;
    // Only matches when the retrieved document was spliced into the request.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Reference material: parley is a chat multiplexer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("It multiplexes.")))
        .mount(&server)
        .await;

    let retriever = Arc::new(StubRetriever {
        docs: vec![RetrievedDoc {
            id: "doc-1".into(),
            content: "parley is a chat multiplexer".into(),
        }],
        fail: false,
    });
    let model = OpenAiModel::with_base_url("sk-test", server.uri()).with_retriever(retriever);

    let reply = model
        .generate(
            &[ChatTurn::user("What is parley?")],
            &GenerateOptions::default().with_retrieval(),
        )
        .await
        .unwrap();

    assert!(reply.content.starts_with("It multiplexes."));
    assert!(reply.content.contains("## References ##"));
    assert!(reply.content.contains("[1] doc-1"));
}

#[tokio::test]
async fn openai_retrieval_failure_propagates() {
    let server = MockServer::start().await;
    let retriever = Arc::new(StubRetriever {
        docs: vec![],
        fail: true,
    });
    let model = OpenAiModel::with_base_url("sk-test", server.uri()).with_retriever(retriever);

    let err = model
        .generate(
            &[ChatTurn::user("What is parley?")],
            &GenerateOptions::default().with_retrieval(),
        )
        .await
        .unwrap_err();

    match err {
        ModelError::Augmentation {
            strategy, message, ..
        } => {
            assert_eq!(strategy, "retrieval");
            assert!(message.contains("unavailable"));
        }
        other => panic!("expected Augmentation error, got {other:?}"),
    }
    // The base call never ran.
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn openai_retrieval_without_retriever_is_an_error() {
    let model = OpenAiModel::with_base_url("sk-test", "http://127.0.0.1:1");
    let err = model
        .generate(
            &[ChatTurn::user("Hi")],
            &GenerateOptions::default().with_retrieval(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ModelError::Augmentation {
            strategy: "retrieval",
            ..
        }
    ));
}

#[tokio::test]
async fn openai_tool_loop_executes_and_summarizes() {
    let server = MockServer::start().await;

    // First round trip: the model asks for a tool call.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "web_search", "arguments": "{\"q\":\"rust\"}" }
                    }]
                }
            }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // Second round trip: the tool result is in the history, final answer.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("rust is a systems language"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
            "Rust is a systems programming language.",
        )))
        .mount(&server)
        .await;

    let tool = Arc::new(RecordingTool {
        calls: Mutex::new(Vec::new()),
    });
    let model =
        OpenAiModel::with_base_url("sk-test", server.uri()).with_tools(vec![tool.clone() as Arc<dyn Tool>]);

    let reply = model
        .generate(
            &[ChatTurn::user("Tell me about rust")],
            &GenerateOptions::default().with_web_search(),
        )
        .await
        .unwrap();

    assert_eq!(reply.content, "Rust is a systems programming language.");
    let calls = tool.calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], json!({"q": "rust"}));
}

#[tokio::test]
async fn openai_tool_loop_returns_partial_on_late_failure() {
    let server = MockServer::start().await;

    // First reply carries both content and a tool call.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Here is what I know so far.",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "web_search", "arguments": "{\"q\":\"rust\"}" }
                    }]
                }
            }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // The follow-up round trip fails.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let tool = Arc::new(RecordingTool {
        calls: Mutex::new(Vec::new()),
    });
    let model = OpenAiModel::with_base_url("sk-test", server.uri())
        .with_tools(vec![tool as Arc<dyn Tool>]);

    let reply = model
        .generate(
            &[ChatTurn::user("Tell me about rust")],
            &GenerateOptions::default().with_web_search(),
        )
        .await
        .unwrap();

    assert_eq!(reply.content, "Here is what I know so far.");
}

#[tokio::test]
async fn ollama_generate_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": { "role": "assistant", "content": "Hello from llama" },
            "done": true
        })))
        .mount(&server)
        .await;

    let model = OllamaModel::new(Some(&server.uri()), "llama3");
    let reply = model
        .generate(&[ChatTurn::user("Hi")], &GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(reply.content, "Hello from llama");
}

#[tokio::test]
async fn ollama_stream_aggregates_ndjson() {
    let ndjson = "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n\
                  {\"message\":{\"content\":\"lo, \"},\"done\":false}\n\
                  {\"message\":{\"content\":\"world\"},\"done\":false}\n\
                  {\"message\":{\"content\":\"\"},\"done\":true}\n";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
        .mount(&server)
        .await;

    let model = OllamaModel::new(Some(&server.uri()), "llama3");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let aggregate = model.stream(&[ChatTurn::user("Hi")], &tx).await.unwrap();
    drop(tx);

    assert_eq!(aggregate, "Hello, world");

    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(chunks, vec!["Hel", "lo, ", "world"]);
}

#[tokio::test]
async fn ollama_stream_parse_error_after_chunks_keeps_delivered_chunks() {
    let ndjson = "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n\
                  {\"message\":{\"content\":\"lo\"},\"done\":false}\n\
                  this is not json\n";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
        .mount(&server)
        .await;

    let model = OllamaModel::new(Some(&server.uri()), "llama3");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let err = model.stream(&[ChatTurn::user("Hi")], &tx).await.unwrap_err();
    drop(tx);

    assert!(matches!(err, ModelError::Parse { .. }));

    // Chunks delivered before the failure are not retracted.
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(chunks, vec!["Hel", "lo"]);
}

#[tokio::test]
async fn ollama_stream_consumes_final_line_without_newline() {
    let ndjson = "{\"message\":{\"content\":\"Hello, \"},\"done\":false}\n\
                  {\"message\":{\"content\":\"world\"},\"done\":true}";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
        .mount(&server)
        .await;

    let model = OllamaModel::new(Some(&server.uri()), "llama3");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let aggregate = model.stream(&[ChatTurn::user("Hi")], &tx).await.unwrap();
    drop(tx);

    assert_eq!(aggregate, "Hello, world");

    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(chunks, vec!["Hello, ", "world"]);
}

#[tokio::test]
async fn ollama_rejects_tool_flag() {
    let model = OllamaModel::new(Some("http://127.0.0.1:1"), "llama3");
    let err = model
        .generate(
            &[ChatTurn::user("Hi")],
            &GenerateOptions::default().with_web_search(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ModelError::Augmentation {
            strategy: "tool",
            ..
        }
    ));
}

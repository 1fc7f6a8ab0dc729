//! The conversation helper: exclusive owner of one session's history.
//!
//! One helper is bound to one session and one backend adapter. The history
//! is append-only for the helper's lifetime and guarded by a single
//! reader/writer lock; generation snapshots the history under the read lock
//! and releases it before the backend round trip, so a slow backend never
//! blocks other readers or writers of the same session.

use std::sync::Arc;

use tokio::sync::RwLock;

use parley_model::{ChatModel, ChatTurn, ChunkSink, GenerateOptions};

use crate::error::ChatError;
use crate::message::Message;
use crate::persist::SaveFn;

/// In-memory owner of one session's message history and its bound backend.
pub struct ConversationHelper {
    session_id: String,
    title: String,
    model: Arc<dyn ChatModel>,
    messages: RwLock<Vec<Message>>,
    save_fn: RwLock<SaveFn>,
}

impl std::fmt::Debug for ConversationHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationHelper")
            .field("session_id", &self.session_id)
            .field("title", &self.title)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ConversationHelper {
    pub fn new(
        model: Arc<dyn ChatModel>,
        session_id: impl Into<String>,
        title: impl Into<String>,
        save_fn: SaveFn,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            title: title.into(),
            model,
            messages: RwLock::new(Vec::new()),
            save_fn: RwLock::new(save_fn),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Stable identifier of the bound backend.
    pub fn model_type(&self) -> &str {
        self.model.model_type()
    }

    /// Append a message to the in-memory history.
    ///
    /// With `persist` set, the injected save function is invoked after the
    /// append; a save failure is logged and the append stands regardless
    /// (durability is best-effort, the in-memory history is authoritative).
    /// History replay passes `persist = false` so replayed messages are not
    /// re-enqueued.
    pub async fn add_message(&self, content: &str, author: &str, is_user: bool, persist: bool) {
        let message = Message {
            session_id: self.session_id.clone(),
            content: content.into(),
            author_name: author.into(),
            is_user,
        };

        {
            let mut messages = self.messages.write().await;
            messages.push(message.clone());
        }

        if persist {
            let save = self.save_fn.read().await.clone();
            if let Err(err) = save(&message) {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %err,
                    "failed to persist message, keeping in-memory copy"
                );
            }
        }
    }

    /// Isolated snapshot of the current history.
    ///
    /// A concurrent append never mutates a snapshot already handed out.
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    /// Replace the persistence strategy for subsequent appends.
    pub async fn set_save_fn(&self, save_fn: SaveFn) {
        *self.save_fn.write().await = save_fn;
    }

    /// Generate one reply for `question`.
    ///
    /// The question is recorded (and persisted) before the backend call; on
    /// failure it stays recorded and no reply is appended.
    pub async fn generate(&self, author: &str, question: &str) -> Result<Message, ChatError> {
        self.generate_with(author, question, &GenerateOptions::default())
            .await
    }

    /// Like [`generate`](Self::generate), with capability flags passed
    /// through to the bound adapter.
    pub async fn generate_with(
        &self,
        author: &str,
        question: &str,
        options: &GenerateOptions,
    ) -> Result<Message, ChatError> {
        self.add_message(question, author, true, true).await;

        let turns = self.snapshot_turns().await;
        let reply = self.model.generate(&turns, options).await?;

        self.add_message(&reply.content, author, false, true).await;
        Ok(Message {
            session_id: self.session_id.clone(),
            content: reply.content,
            author_name: author.into(),
            is_user: false,
        })
    }

    /// Generate a reply as a stream of text increments.
    ///
    /// Chunks flow straight from the backend into the caller-supplied sink,
    /// no intermediate buffering here; on success the aggregate is appended
    /// as a persisted assistant message and returned.
    pub async fn stream(
        &self,
        author: &str,
        sink: &ChunkSink,
        question: &str,
    ) -> Result<Message, ChatError> {
        self.add_message(question, author, true, true).await;

        let turns = self.snapshot_turns().await;
        let content = self.model.stream(&turns, sink).await?;

        self.add_message(&content, author, false, true).await;
        Ok(Message {
            session_id: self.session_id.clone(),
            content,
            author_name: author.into(),
            is_user: false,
        })
    }

    /// Convert the current history into adapter-level turns under the read
    /// lock; the lock is released before any backend call.
    async fn snapshot_turns(&self) -> Vec<ChatTurn> {
        let messages = self.messages.read().await;
        messages
            .iter()
            .map(|m| {
                if m.is_user {
                    ChatTurn::user(m.content.clone())
                } else {
                    ChatTurn::assistant(m.content.clone())
                }
            })
            .collect()
    }
}

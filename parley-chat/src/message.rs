//! Conversation data model.

use serde::{Deserialize, Serialize};

/// One message in a session's history.
///
/// Immutable once appended; ordering is arrival order within the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: String,
    pub content: String,
    pub author_name: String,
    /// True when the message was authored by the user, false for replies.
    pub is_user: bool,
}

/// Read-only projection of one live session, produced on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub title: String,
    pub model_type: String,
}

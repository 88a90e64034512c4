/// Data models for database operations.
/// Represents chats and their messages, plus the REST request/response DTOs.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chat {
    pub id: i64,
    pub chat_id: String,
    pub user_id: String,
    pub role_id: String,
    pub created_at: String,
}

/// A stored message, also its wire shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub client_tag: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    /// Unix milliseconds, strictly increasing within a chat
    pub timestamp: i64,
    pub media_ref: Option<String>,
}

// Request/Response DTOs
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub chat_id: String,
    pub user_id: String,
    pub role_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub content: String,
    pub client_tag: String,
    #[serde(default)]
    pub media_ref: Option<String>,
}

/// `?since=` or `?before=`, exactly one of them
#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesQuery {
    pub since: Option<i64>,
    pub before: Option<i64>,
}

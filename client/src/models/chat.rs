/// Chat context model.
/// A chat is a conversation between a user and a story role.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        ChatId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        ChatId(s.to_string())
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        ChatId(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    pub chat_id: ChatId,
    /// The local user taking part in the chat
    pub user_id: String,
    /// The story role on the other side
    pub role_id: String,
}

impl ChatContext {
    pub fn new(chat_id: impl Into<ChatId>, user_id: &str, role_id: &str) -> Self {
        ChatContext {
            chat_id: chat_id.into(),
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
        }
    }

    /// True if the message was authored by the local user.
    pub fn is_own(&self, sender_id: &str) -> bool {
        self.user_id == sender_id
    }
}

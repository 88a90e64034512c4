/// Data models for the story chat client.
/// Defines messages, delivery status, and chat contexts.

pub mod chat;
pub mod message;

pub use chat::{ChatContext, ChatId};
pub use message::{ClientTag, Message, MessageStatus};

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Message model for the story chat client.
/// A message carries a client-generated tag that stays stable from the
/// optimistic local copy to the server-confirmed one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{now_millis, ChatId};

/// Correlation identifier assigned when a message is created.
///
/// Locally created tags are UUID v4 strings. Messages that originate on the
/// server (role replies) carry whatever tag the server assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientTag(String);

impl ClientTag {
    pub fn new() -> Self {
        ClientTag(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        ClientTag(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientTag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }

    /// Legal transitions: `Sending -> Sent`, `Sending -> Failed`, `Failed -> Sending`.
    pub fn can_transition_to(&self, target: MessageStatus) -> bool {
        matches!(
            (self, target),
            (MessageStatus::Sending, MessageStatus::Sent)
                | (MessageStatus::Sending, MessageStatus::Failed)
                | (MessageStatus::Failed, MessageStatus::Sending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Sent)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned id, `None` until the server acknowledges the message
    pub id: Option<i64>,
    pub client_tag: ClientTag,
    pub chat_id: ChatId,
    pub sender_id: String,
    pub content: String,
    /// Unix milliseconds
    pub timestamp: i64,
    pub status: MessageStatus,
    /// Attached media, resolved lazily by the presentation layer
    pub media_ref: Option<String>,
}

impl Message {
    /// Create an outgoing message in `Sending` state with a fresh tag
    pub fn outgoing(chat_id: ChatId, sender_id: String, content: String) -> Self {
        Message {
            id: None,
            client_tag: ClientTag::new(),
            chat_id,
            sender_id,
            content,
            timestamp: now_millis(),
            status: MessageStatus::Sending,
            media_ref: None,
        }
    }

    /// Create a message as delivered by the server (already confirmed)
    pub fn from_server(
        id: i64,
        client_tag: ClientTag,
        chat_id: ChatId,
        sender_id: String,
        content: String,
        timestamp: i64,
    ) -> Self {
        Message {
            id: Some(id),
            client_tag,
            chat_id,
            sender_id,
            content,
            timestamp,
            status: MessageStatus::Sent,
            media_ref: None,
        }
    }

    pub fn with_media(mut self, media_ref: impl Into<String>) -> Self {
        self.media_ref = Some(media_ref.into());
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Sending
    }

    pub fn is_failed(&self) -> bool {
        self.status == MessageStatus::Failed
    }
}

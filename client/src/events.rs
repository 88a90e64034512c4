/// Notifications from the chat core to the presentation layer.
/// Delivered over an unbounded tokio channel; the receiver renders them.

use crate::models::{ChatId, ClientTag, Message, MessageStatus};
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<ChatEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ChatEvent>;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The displayed list changed; carries the full ordered snapshot
    MessagesChanged {
        chat_id: ChatId,
        messages: Vec<Message>,
    },
    /// A single outgoing message changed status
    StatusChanged {
        chat_id: ChatId,
        client_tag: ClientTag,
        status: MessageStatus,
    },
    /// No further history will be requested for this chat
    HistoryExhausted { chat_id: ChatId },
}

impl ChatEvent {
    pub fn chat_id(&self) -> &ChatId {
        match self {
            ChatEvent::MessagesChanged { chat_id, .. }
            | ChatEvent::StatusChanged { chat_id, .. }
            | ChatEvent::HistoryExhausted { chat_id } => chat_id,
        }
    }
}

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

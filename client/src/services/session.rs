/// Per-chat shared state.
/// One `ChatSession` exists per open chat. Its mutex serializes every
/// mutation of that chat's displayed list and store rows; its generation
/// counter lets in-flight work notice that it has been cancelled.

use crate::events::{ChatEvent, EventSender};
use crate::models::{ChatContext, ChatId, ClientTag, MessageStatus};
use crate::timeline::Timeline;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, MutexGuard};

/// Outgoing messages a task in this process is still delivering.
///
/// Shared by every session of a manager, so a send started before a chat
/// was reopened is still recognised afterwards.
#[derive(Debug, Clone, Default)]
pub struct InFlightSends(Arc<std::sync::Mutex<HashSet<ClientTag>>>);

impl InFlightSends {
    fn tags(&self) -> std::sync::MutexGuard<'_, HashSet<ClientTag>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `client_tag` as owned; the returned guard releases it when dropped
    pub fn claim(&self, client_tag: &ClientTag) -> SendClaim {
        self.tags().insert(client_tag.clone());
        SendClaim {
            sends: self.clone(),
            client_tag: client_tag.clone(),
        }
    }

    pub fn contains(&self, client_tag: &ClientTag) -> bool {
        self.tags().contains(client_tag)
    }
}

pub struct SendClaim {
    sends: InFlightSends,
    client_tag: ClientTag,
}

impl Drop for SendClaim {
    fn drop(&mut self) {
        self.sends.tags().remove(&self.client_tag);
    }
}

/// What is currently displayed for a chat
#[derive(Debug, Default)]
pub struct ChatView {
    pub timeline: Timeline,
    /// Set once history loading gave up; cleared only by reopening the chat
    pub no_more_history: bool,
}

/// Snapshot of the cancellation counter taken before a suspension point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

pub struct ChatSession {
    context: ChatContext,
    view: Mutex<ChatView>,
    generation: AtomicU64,
    closed: AtomicBool,
    events: Option<EventSender>,
    sends: InFlightSends,
}

impl ChatSession {
    pub fn new(context: ChatContext, events: Option<EventSender>) -> Self {
        Self::with_sends(context, events, InFlightSends::default())
    }

    pub fn with_sends(context: ChatContext, events: Option<EventSender>, sends: InFlightSends) -> Self {
        ChatSession {
            context,
            view: Mutex::new(ChatView::default()),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            events,
            sends,
        }
    }

    pub fn sends(&self) -> &InFlightSends {
        &self.sends
    }

    pub fn context(&self) -> &ChatContext {
        &self.context
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.context.chat_id
    }

    pub async fn lock(&self) -> MutexGuard<'_, ChatView> {
        self.view.lock().await
    }

    pub fn generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::SeqCst))
    }

    /// True if no cancellation happened since `generation` was taken
    pub fn is_current(&self, generation: Generation) -> bool {
        self.is_live() && self.generation.load(Ordering::SeqCst) == generation.0
    }

    pub fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Invalidate in-flight sync and pagination without closing the chat
    pub fn cancel_in_flight(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel_in_flight();
        log::debug!("Chat session {} closed", self.context.chat_id);
    }

    pub fn publish_messages(&self, view: &ChatView) {
        self.publish(ChatEvent::MessagesChanged {
            chat_id: self.context.chat_id.clone(),
            messages: view.timeline.snapshot(),
        });
    }

    pub fn publish_status(&self, client_tag: &ClientTag, status: MessageStatus) {
        self.publish(ChatEvent::StatusChanged {
            chat_id: self.context.chat_id.clone(),
            client_tag: client_tag.clone(),
            status,
        });
    }

    pub fn publish_exhausted(&self) {
        self.publish(ChatEvent::HistoryExhausted {
            chat_id: self.context.chat_id.clone(),
        });
    }

    fn publish(&self, event: ChatEvent) {
        if !self.is_live() {
            return;
        }
        if let Some(events) = &self.events {
            // Receiver gone means nobody is rendering; not an error for the core
            if events.send(event).is_err() {
                log::debug!("Event receiver dropped for chat {}", self.context.chat_id);
            }
        }
    }
}

/// Optimistic send controller.
/// Shows an outgoing message before the network round-trip, then confirms
/// it in place or marks it failed so the user can retry it.

use crate::config::SyncConfig;
use crate::error::{ClientError, GatewayError, Result};
use crate::models::{ClientTag, Message, MessageStatus};
use crate::services::gateway::{with_timeout, MessageGateway};
use crate::services::session::{ChatSession, SendClaim};
use crate::storage::MessageStore;
use crate::timeline::MergeSource;
use std::sync::Arc;

pub const MAX_CONTENT_CHARS: usize = 4000;

/// Trim and check user input before it becomes a message
pub fn validate_content(content: &str) -> Result<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ClientError::InvalidInput("Message is empty".to_string()));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(ClientError::InvalidInput(format!(
            "Message is {} characters, the limit is {}",
            chars, MAX_CONTENT_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

/// An optimistic message that is displayed and cached but not yet delivered.
///
/// Holding it keeps the message registered as in flight, so reloading the
/// chat leaves it in `Sending`.
pub struct PendingSend {
    message: Message,
    claim: SendClaim,
}

impl PendingSend {
    pub fn message(&self) -> &Message {
        &self.message
    }
}

#[derive(Clone)]
pub struct SendController {
    session: Arc<ChatSession>,
    store: Arc<dyn MessageStore>,
    gateway: Arc<dyn MessageGateway>,
    config: SyncConfig,
}

impl SendController {
    pub fn new(
        session: Arc<ChatSession>,
        store: Arc<dyn MessageStore>,
        gateway: Arc<dyn MessageGateway>,
        config: SyncConfig,
    ) -> Self {
        SendController {
            session,
            store,
            gateway,
            config,
        }
    }

    /// Send `content` and wait for the outcome.
    ///
    /// Only invalid input is an error; delivery problems come back as a
    /// message in `Failed` state.
    pub async fn send(&self, content: &str) -> Result<Message> {
        let pending = self.prepare(content).await?;
        Ok(self.transmit(pending.message, pending.claim).await)
    }

    /// Create the optimistic `Sending` message, cache it and display it
    pub async fn prepare(&self, content: &str) -> Result<PendingSend> {
        let content = validate_content(content)?;
        let context = self.session.context();
        let message = Message::outgoing(context.chat_id.clone(), context.user_id.clone(), content);

        let mut view = self.session.lock().await;
        let claim = self.session.sends().claim(&message.client_tag);
        if let Err(e) = self.store.upsert(&message) {
            // Still shown and still sent; only lost if the process exits first
            log::warn!("Could not cache outgoing message {}: {}", message.client_tag, e);
        }
        if self.session.is_live() {
            view.timeline.insert_pending(message.clone());
            self.session.publish_messages(&view);
        }
        log::debug!("Prepared message {} in chat {}", message.client_tag, context.chat_id);
        Ok(PendingSend { message, claim })
    }

    /// Deliver a message previously returned by `prepare`
    pub async fn deliver(&self, pending: PendingSend) -> Result<Message> {
        Ok(self.transmit(pending.message, pending.claim).await)
    }

    /// Re-send a failed message under its original tag
    pub async fn retry(&self, client_tag: &ClientTag) -> Result<Message> {
        let (message, claim) = {
            let mut view = self.session.lock().await;
            if !self.session.is_live() {
                return Err(ClientError::InvalidState(format!(
                    "Chat {} is closed",
                    self.session.chat_id()
                )));
            }
            let mut message = view
                .timeline
                .get(client_tag)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(format!("No message with tag {}", client_tag)))?;
            if message.status != MessageStatus::Failed {
                return Err(ClientError::InvalidState(format!(
                    "Only failed messages can be retried, {} is {}",
                    client_tag, message.status
                )));
            }

            let claim = self.session.sends().claim(client_tag);
            view.timeline.apply_status(client_tag, None, MessageStatus::Sending);
            match self
                .store
                .update_status(&message.chat_id, client_tag, None, MessageStatus::Sending)
            {
                Ok(true) => {}
                Ok(false) => {
                    message.status = MessageStatus::Sending;
                    if let Err(e) = self.store.upsert(&message) {
                        log::warn!("Could not cache retried message {}: {}", client_tag, e);
                    }
                }
                Err(e) => log::warn!("Could not mark {} as sending: {}", client_tag, e),
            }
            self.session.publish_status(client_tag, MessageStatus::Sending);
            self.session.publish_messages(&view);

            message.status = MessageStatus::Sending;
            (message, claim)
        };

        log::info!("Retrying message {}", client_tag);
        Ok(self.transmit(message, claim).await)
    }

    /// Run the gateway call and reconcile store and view with its outcome.
    /// The claim is released once the outcome is recorded.
    async fn transmit(&self, message: Message, _claim: SendClaim) -> Message {
        let tag = message.client_tag.clone();
        let result = with_timeout(
            self.config.gateway_timeout,
            self.gateway
                .send_message(&message.chat_id, &message.sender_id, &message.content, &tag),
        )
        .await;

        let result = match result {
            Ok(returned) if returned.is_empty() => Err(GatewayError::Malformed(
                "send returned no echo".to_string(),
            )),
            other => other,
        };

        match result {
            Ok(returned) => self.confirm(message, returned).await,
            Err(e) => {
                log::warn!("Send of {} failed: {}", tag, e);
                self.fail(message).await
            }
        }
    }

    async fn confirm(&self, message: Message, returned: Vec<Message>) -> Message {
        let tag = message.client_tag.clone();
        let mut returned = returned.into_iter();
        let mut echo = match returned.next() {
            Some(echo) => echo,
            None => return self.fail(message).await,
        };
        if echo.client_tag != tag {
            log::debug!("Server echoed tag {} for {}, keeping the local one", echo.client_tag, tag);
            echo.client_tag = tag.clone();
        }
        echo.chat_id = message.chat_id.clone();
        echo.status = MessageStatus::Sent;
        if echo.media_ref.is_none() {
            echo.media_ref = message.media_ref.clone();
        }
        let replies: Vec<Message> = returned
            .map(|mut reply| {
                reply.status = MessageStatus::Sent;
                reply
            })
            .collect();

        let mut view = self.session.lock().await;

        // Store first, regardless of whether the chat is still displayed
        if let Err(e) = self.store.update_status(&echo.chat_id, &tag, echo.id, MessageStatus::Sent) {
            log::warn!("Could not mark {} as sent: {}", tag, e);
        }
        for stored in std::iter::once(&echo).chain(replies.iter()) {
            if let Err(e) = self.store.upsert(stored) {
                log::warn!("Could not cache {}: {}", stored.client_tag, e);
            }
        }

        log::info!("Message {} sent (id {:?}), {} replies", tag, echo.id, replies.len());
        if !self.session.is_live() {
            return echo;
        }

        if !view.timeline.confirm(echo.clone()) {
            view.timeline.merge(vec![echo.clone()], MergeSource::Gateway);
        }
        view.timeline.merge(replies, MergeSource::Gateway);
        self.session.publish_status(&tag, MessageStatus::Sent);
        self.session.publish_messages(&view);

        view.timeline.get(&tag).cloned().unwrap_or(echo)
    }

    async fn fail(&self, message: Message) -> Message {
        let tag = message.client_tag.clone();
        let mut view = self.session.lock().await;

        match self.store.update_status(&message.chat_id, &tag, None, MessageStatus::Failed) {
            Ok(true) => {}
            Ok(false) => log::debug!("Failure of {} not recorded in cache", tag),
            Err(e) => log::warn!("Could not mark {} as failed: {}", tag, e),
        }

        let failed = Message {
            status: MessageStatus::Failed,
            ..message
        };
        if !self.session.is_live() {
            return failed;
        }

        if view.timeline.apply_status(&tag, None, MessageStatus::Failed) {
            self.session.publish_status(&tag, MessageStatus::Failed);
            self.session.publish_messages(&view);
        }
        // A concurrent sync may already have confirmed it
        view.timeline.get(&tag).cloned().unwrap_or(failed)
    }
}

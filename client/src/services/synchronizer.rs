/// Message synchronizer.
/// Builds a chat's displayed list from the local cache first and the remote
/// gateway second, and pages older history in on demand.

use crate::config::SyncConfig;
use crate::models::{Message, MessageStatus};
use crate::services::gateway::{with_timeout, MessageGateway};
use crate::services::session::{ChatSession, ChatView, Generation};
use crate::storage::MessageStore;
use crate::timeline::MergeSource;
use std::sync::Arc;

/// Result of an initial load or forward sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Gateway answered; `fetched` counts messages that were new to the view
    Synced { cached: usize, fetched: usize },
    /// Gateway failed; only cached messages are shown
    Offline { cached: usize },
    /// The chat was closed or switched away from before the result landed
    Cancelled,
}

/// Result of one "load more history" request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    Loaded { added: usize, source: MergeSource },
    /// No further history will be requested; `added` counts cached rows still shown
    Exhausted { added: usize },
    Cancelled,
}

#[derive(Clone)]
pub struct MessageSynchronizer {
    session: Arc<ChatSession>,
    store: Arc<dyn MessageStore>,
    gateway: Arc<dyn MessageGateway>,
    config: SyncConfig,
}

impl MessageSynchronizer {
    pub fn new(
        session: Arc<ChatSession>,
        store: Arc<dyn MessageStore>,
        gateway: Arc<dyn MessageGateway>,
        config: SyncConfig,
    ) -> Self {
        MessageSynchronizer {
            session,
            store,
            gateway,
            config,
        }
    }

    /// Show the newest cached page right away, then catch up with the gateway
    pub async fn load_initial(&self) -> SyncOutcome {
        let generation = self.session.generation();
        let chat_id = self.session.chat_id();

        let cached = {
            let mut view = self.session.lock().await;
            if !self.session.is_current(generation) {
                return SyncOutcome::Cancelled;
            }
            let mut cached = match self.store.fetch_recent(chat_id, self.config.page_size) {
                Ok(messages) => messages,
                Err(e) => {
                    log::warn!("Cache read failed for chat {}, continuing without it: {}", chat_id, e);
                    Vec::new()
                }
            };
            self.fail_orphaned_sends(&mut cached);
            let added = view.timeline.merge(cached, MergeSource::Store);
            log::debug!("Chat {}: {} cached messages displayed", chat_id, added);
            self.session.publish_messages(&view);
            added
        };

        self.sync_from(generation, cached).await
    }

    /// Fetch everything newer than what is known locally
    pub async fn sync_newer(&self) -> SyncOutcome {
        let generation = self.session.generation();
        self.sync_from(generation, 0).await
    }

    async fn sync_from(&self, generation: Generation, cached: usize) -> SyncOutcome {
        let chat_id = self.session.chat_id();

        let cursor = {
            let view = self.session.lock().await;
            if !self.session.is_current(generation) {
                return SyncOutcome::Cancelled;
            }
            self.forward_cursor(&view)
        };

        let result = with_timeout(
            self.config.gateway_timeout,
            self.gateway.fetch_messages_since(chat_id, cursor),
        )
        .await;

        let mut view = self.session.lock().await;
        if !self.session.is_current(generation) {
            log::debug!("Discarding stale sync result for chat {}", chat_id);
            return SyncOutcome::Cancelled;
        }

        match result {
            Ok(messages) => {
                self.persist(&messages);
                let fetched = view.timeline.merge(messages, MergeSource::Gateway);
                log::info!("Chat {}: synced {} new messages since {}", chat_id, fetched, cursor);
                self.session.publish_messages(&view);
                SyncOutcome::Synced { cached, fetched }
            }
            Err(e) => {
                log::warn!("Sync failed for chat {}: {}", chat_id, e);
                SyncOutcome::Offline { cached }
            }
        }
    }

    /// Page older messages in, from the cache when it holds a full page
    pub async fn load_more_history(&self) -> HistoryOutcome {
        let generation = self.session.generation();
        let chat_id = self.session.chat_id();
        let page_size = self.config.page_size;

        let (cursor, from_cache) = {
            let mut view = self.session.lock().await;
            if !self.session.is_current(generation) {
                return HistoryOutcome::Cancelled;
            }
            if view.no_more_history {
                return HistoryOutcome::Exhausted { added: 0 };
            }

            let cursor = view.timeline.oldest_timestamp().unwrap_or(i64::MAX);
            let mut cached = match self.store.fetch_before(chat_id, cursor, page_size) {
                Ok(messages) => messages,
                Err(e) => {
                    log::warn!("Cache read failed for chat {} history: {}", chat_id, e);
                    Vec::new()
                }
            };
            let full_page = cached.len() >= page_size;
            self.fail_orphaned_sends(&mut cached);
            let added = view.timeline.merge(cached, MergeSource::Store);
            if added > 0 {
                self.session.publish_messages(&view);
            }
            if full_page {
                log::debug!("Chat {}: {} history messages served from cache", chat_id, added);
                return HistoryOutcome::Loaded {
                    added,
                    source: MergeSource::Store,
                };
            }
            (cursor, added)
        };

        let result = with_timeout(
            self.config.gateway_timeout,
            self.gateway.fetch_messages_before(chat_id, cursor),
        )
        .await;

        let mut view = self.session.lock().await;
        if !self.session.is_current(generation) {
            log::debug!("Discarding stale history result for chat {}", chat_id);
            return HistoryOutcome::Cancelled;
        }

        match result {
            Ok(messages) if messages.is_empty() => {
                log::info!("Chat {}: no history before {}", chat_id, cursor);
                Self::mark_exhausted(&self.session, &mut view);
                HistoryOutcome::Exhausted { added: from_cache }
            }
            Ok(messages) => {
                self.persist(&messages);
                let added = view.timeline.merge(messages, MergeSource::Gateway);
                self.session.publish_messages(&view);
                HistoryOutcome::Loaded {
                    added: from_cache + added,
                    source: MergeSource::Gateway,
                }
            }
            Err(e) => {
                log::warn!("History load failed for chat {}, not retrying: {}", chat_id, e);
                Self::mark_exhausted(&self.session, &mut view);
                HistoryOutcome::Exhausted { added: from_cache }
            }
        }
    }

    /// Whether `load_more_history` may still do anything
    pub async fn has_more_history(&self) -> bool {
        !self.session.lock().await.no_more_history
    }

    fn mark_exhausted(session: &ChatSession, view: &mut ChatView) {
        view.no_more_history = true;
        session.publish_exhausted();
    }

    /// Newest confirmed timestamp known either to the cache or the view
    fn forward_cursor(&self, view: &ChatView) -> i64 {
        let stored = match self.store.fetch_latest_timestamp(self.session.chat_id()) {
            Ok(ts) => ts,
            Err(e) => {
                log::warn!("Could not read sync cursor for chat {}: {}", self.session.chat_id(), e);
                0
            }
        };
        stored.max(view.timeline.newest_confirmed_timestamp().unwrap_or(0))
    }

    /// Cached `Sending` rows that no task in this process is delivering were
    /// cut off mid-send, usually by an earlier run exiting. They become
    /// `Failed` so they can be retried.
    fn fail_orphaned_sends(&self, messages: &mut [Message]) {
        let sends = self.session.sends();
        for message in messages
            .iter_mut()
            .filter(|m| m.status == MessageStatus::Sending && !sends.contains(&m.client_tag))
        {
            if let Err(e) =
                self.store
                    .update_status(&message.chat_id, &message.client_tag, None, MessageStatus::Failed)
            {
                log::warn!("Could not mark interrupted send {} as failed: {}", message.client_tag, e);
            }
            log::info!("Message {} was never delivered, marking it failed", message.client_tag);
            message.status = MessageStatus::Failed;
        }
    }

    fn persist(&self, messages: &[Message]) {
        let mut failed = 0;
        for message in messages {
            if let Err(e) = self.store.upsert(message) {
                failed += 1;
                log::debug!("Upsert of {} failed: {}", message.client_tag, e);
            }
        }
        if failed > 0 {
            log::warn!(
                "Chat {}: {} of {} fetched messages were not cached",
                self.session.chat_id(),
                failed,
                messages.len()
            );
        }
    }
}

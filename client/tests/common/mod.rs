//! Common test utilities and helpers for integration tests
//!
//! Provides an in-process scripted gateway, a store with injectable
//! failures and builders for chat fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use story_chat_client::config::RetentionPolicy;
use story_chat_client::error::{GatewayError, StoreError};
use story_chat_client::events::{self, ChatEvent, EventReceiver};
use story_chat_client::services::GatewayResult;
use story_chat_client::storage::StoreResult;
use story_chat_client::{
    ChatContext, ChatId, ClientManager, ClientTag, LocalStore, Message, MessageGateway, MessageStatus,
    MessageStore, SyncConfig,
};

pub const CHAT: &str = "tale";
pub const USER: &str = "alice";
pub const ROLE: &str = "narrator";

pub fn context() -> ChatContext {
    ChatContext::new(CHAT, USER, ROLE)
}

pub fn chat_id() -> ChatId {
    ChatId::from(CHAT)
}

/// A confirmed message with tag `m<timestamp>` and server id equal to its timestamp
pub fn sent_at(chat: &str, timestamp: i64) -> Message {
    Message::from_server(
        timestamp,
        ClientTag::from_string(&format!("m{}", timestamp)),
        ChatId::from(chat),
        ROLE.to_string(),
        format!("line {}", timestamp),
        timestamp,
    )
}

pub fn tags(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.client_tag.to_string()).collect()
}

pub fn timestamps(messages: &[Message]) -> Vec<i64> {
    messages.iter().map(|m| m.timestamp).collect()
}

pub fn assert_sorted_and_unique(messages: &[Message]) {
    let distinct: HashSet<_> = messages.iter().map(|m| &m.client_tag).collect();
    assert_eq!(distinct.len(), messages.len(), "duplicate tag displayed");
    assert!(
        messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
        "not sorted by timestamp: {:?}",
        timestamps(messages)
    );
}

/// Everything currently queued on the event channel
pub fn drain(rx: &mut EventReceiver) -> Vec<ChatEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// Scripted in-memory gateway that behaves like the reference server
pub struct FakeGateway {
    messages: Mutex<Vec<Message>>,
    clock: AtomicI64,
    next_id: AtomicI64,
    pub page_limit: AtomicUsize,
    pub auto_reply: AtomicBool,
    pub fail_since: AtomicBool,
    pub fail_before: AtomicBool,
    pub fail_send: AtomicBool,
    /// Delay applied to every call, in milliseconds
    pub delay_ms: AtomicU64,
    pub since_calls: AtomicUsize,
    pub before_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub sent_tags: Mutex<Vec<ClientTag>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        FakeGateway {
            messages: Mutex::new(Vec::new()),
            clock: AtomicI64::new(story_chat_client::models::now_millis()),
            next_id: AtomicI64::new(10_000),
            page_limit: AtomicUsize::new(20),
            auto_reply: AtomicBool::new(false),
            fail_since: AtomicBool::new(false),
            fail_before: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            since_calls: AtomicUsize::new(0),
            before_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            sent_tags: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Put messages on the "server"
    pub fn seed(&self, messages: impl IntoIterator<Item = Message>) {
        let mut stored = self.messages.lock().unwrap();
        stored.extend(messages);
        stored.sort_by_key(|m| m.timestamp);
    }

    pub fn offline(&self, offline: bool) {
        self.fail_since.store(offline, Ordering::SeqCst);
        self.fail_before.store(offline, Ordering::SeqCst);
        self.fail_send.store(offline, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    async fn pause(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn unreachable() -> GatewayError {
        GatewayError::Http("connection refused".to_string())
    }

    fn store_new(&self, chat_id: &ChatId, tag: ClientTag, sender: &str, content: &str) -> (Message, bool) {
        let mut stored = self.messages.lock().unwrap();
        if let Some(existing) = stored.iter().find(|m| &m.chat_id == chat_id && m.client_tag == tag) {
            return (existing.clone(), false);
        }
        let last = stored.iter().map(|m| m.timestamp).max().unwrap_or(0);
        let now = self.clock.fetch_add(1, Ordering::SeqCst).max(last + 1);
        let message = Message::from_server(
            self.next_id.fetch_add(1, Ordering::SeqCst),
            tag,
            chat_id.clone(),
            sender.to_string(),
            content.to_string(),
            now,
        );
        stored.push(message.clone());
        (message, true)
    }
}

#[async_trait]
impl MessageGateway for FakeGateway {
    async fn fetch_messages_since(&self, chat_id: &ChatId, cursor: i64) -> GatewayResult<Vec<Message>> {
        self.since_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_since.load(Ordering::SeqCst) {
            return Err(Self::unreachable());
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| &m.chat_id == chat_id && m.timestamp > cursor)
            .cloned()
            .collect())
    }

    async fn fetch_messages_before(&self, chat_id: &ChatId, cursor: i64) -> GatewayResult<Vec<Message>> {
        self.before_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_before.load(Ordering::SeqCst) {
            return Err(Self::unreachable());
        }
        let limit = self.page_limit.load(Ordering::SeqCst);
        let older: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| &m.chat_id == chat_id && m.timestamp < cursor)
            .cloned()
            .collect();
        let skip = older.len().saturating_sub(limit);
        Ok(older.into_iter().skip(skip).collect())
    }

    async fn send_message(
        &self,
        chat_id: &ChatId,
        sender_id: &str,
        content: &str,
        client_tag: &ClientTag,
    ) -> GatewayResult<Vec<Message>> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent_tags.lock().unwrap().push(client_tag.clone());
        self.pause().await;
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Self::unreachable());
        }

        let (echo, created) = self.store_new(chat_id, client_tag.clone(), sender_id, content);
        let mut response = vec![echo];
        if created && self.auto_reply.load(Ordering::SeqCst) {
            let reply_tag = ClientTag::from_string(&format!("{}-reply", client_tag));
            let (reply, _) = self.store_new(chat_id, reply_tag, ROLE, &format!("re: {}", content));
            response.push(reply);
        }
        Ok(response)
    }
}

/// `LocalStore` wrapper whose reads and writes can be switched to fail
pub struct FlakyStore {
    inner: LocalStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(FlakyStore {
            inner: LocalStore::in_memory().unwrap(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        })
    }

    fn read(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("injected read failure".to_string()));
        }
        Ok(())
    }

    fn write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        Ok(())
    }
}

impl MessageStore for FlakyStore {
    fn fetch_recent(&self, chat_id: &ChatId, limit: usize) -> StoreResult<Vec<Message>> {
        self.read()?;
        self.inner.fetch_recent(chat_id, limit)
    }

    fn fetch_before(&self, chat_id: &ChatId, timestamp: i64, limit: usize) -> StoreResult<Vec<Message>> {
        self.read()?;
        self.inner.fetch_before(chat_id, timestamp, limit)
    }

    fn fetch_latest_timestamp(&self, chat_id: &ChatId) -> StoreResult<i64> {
        self.read()?;
        self.inner.fetch_latest_timestamp(chat_id)
    }

    fn upsert(&self, message: &Message) -> StoreResult<()> {
        self.write()?;
        self.inner.upsert(message)
    }

    fn update_status(
        &self,
        chat_id: &ChatId,
        client_tag: &ClientTag,
        server_id: Option<i64>,
        status: MessageStatus,
    ) -> StoreResult<bool> {
        self.write()?;
        self.inner.update_status(chat_id, client_tag, server_id, status)
    }

    fn prune(&self, policy: &RetentionPolicy, pinned: &HashSet<ClientTag>) -> StoreResult<usize> {
        self.write()?;
        self.inner.prune(policy, pinned)
    }

    fn search(&self, chat_id: &ChatId, query: &str, limit: usize) -> StoreResult<Vec<Message>> {
        self.read()?;
        self.inner.search(chat_id, query, limit)
    }

    fn clear_chat(&self, chat_id: &ChatId) -> StoreResult<usize> {
        self.write()?;
        self.inner.clear_chat(chat_id)
    }

    fn count(&self, chat_id: &ChatId) -> StoreResult<usize> {
        self.read()?;
        self.inner.count(chat_id)
    }
}

/// A manager wired to a fake gateway and an in-memory store
pub struct TestContext {
    pub store: Arc<FlakyStore>,
    pub gateway: Arc<FakeGateway>,
    pub manager: ClientManager,
    pub events: EventReceiver,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(SyncConfig {
            gateway_timeout: Duration::from_secs(2),
            ..SyncConfig::default()
        })
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let store = FlakyStore::new();
        let gateway = FakeGateway::new();
        let (tx, rx) = events::channel();
        let manager = ClientManager::new(store.clone(), gateway.clone(), config, Some(tx))
            .expect("valid config");
        TestContext {
            store,
            gateway,
            manager,
            events: rx,
        }
    }

    /// Cache messages locally without going through the engine
    pub fn cache(&self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.store.upsert(&message).unwrap();
        }
    }

    pub fn cached(&self, chat: &str) -> Vec<Message> {
        self.store.fetch_recent(&ChatId::from(chat), 10_000).unwrap()
    }
}

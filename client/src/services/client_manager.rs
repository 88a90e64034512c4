/// Client manager - main orchestrator for all client operations.
/// Owns the shared store and gateway, hands out per-chat handles and
/// runs cache retention without touching anything currently displayed.

use crate::api::{ServerApi, Session};
use crate::config::{RetentionPolicy, SyncConfig};
use crate::error::{ClientError, Result};
use crate::events::EventSender;
use crate::models::{ChatContext, ChatId, ClientTag, Message};
use crate::services::gateway::MessageGateway;
use crate::services::send_controller::SendController;
use crate::services::session::{ChatSession, InFlightSends};
use crate::services::synchronizer::{HistoryOutcome, MessageSynchronizer, SyncOutcome};
use crate::storage::{LocalStore, MessageStore};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

pub const DATABASE_FILE: &str = "messages.db";

pub struct ClientManager {
    store: Arc<dyn MessageStore>,
    gateway: Arc<dyn MessageGateway>,
    config: SyncConfig,
    events: Option<EventSender>,
    sends: InFlightSends,
    /// Open chats, ordered by id so multi-chat locking has a fixed order
    sessions: Mutex<BTreeMap<ChatId, Arc<ChatSession>>>,
}

impl ClientManager {
    pub fn new(
        store: Arc<dyn MessageStore>,
        gateway: Arc<dyn MessageGateway>,
        config: SyncConfig,
        events: Option<EventSender>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(ClientManager {
            store,
            gateway,
            config,
            events,
            sends: InFlightSends::default(),
            sessions: Mutex::new(BTreeMap::new()),
        })
    }

    /// Initialize a client backed by a cache in `data_dir` and the HTTP server
    pub fn connect(
        server_url: &str,
        session: Session,
        data_dir: &Path,
        config: SyncConfig,
        events: Option<EventSender>,
    ) -> Result<Self> {
        let store = LocalStore::open(data_dir.join(DATABASE_FILE))?;
        let api = ServerApi::with_timeout(server_url, session, config.gateway_timeout)?;
        log::info!("Client initialized: cache {:?}, server {}", store.path(), server_url);
        Self::new(Arc::new(store), Arc::new(api), config, events)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    fn sessions(&self) -> MutexGuard<'_, BTreeMap<ChatId, Arc<ChatSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a chat, reusing its live session if it is already open
    pub fn open_chat(&self, context: ChatContext) -> ChatHandle {
        let mut sessions = self.sessions();
        if let Some(existing) = sessions.get(&context.chat_id) {
            if existing.is_live() && existing.context() == &context {
                return self.handle(existing.clone());
            }
            existing.close();
        }

        log::info!("Opening chat {} as {}", context.chat_id, context.user_id);
        let session = Arc::new(ChatSession::with_sends(context, self.events.clone(), self.sends.clone()));
        sessions.insert(session.chat_id().clone(), session.clone());
        self.handle(session)
    }

    /// Make `context` the only open chat, cancelling work for every other one
    pub fn switch_chat(&self, context: ChatContext) -> ChatHandle {
        {
            let mut sessions = self.sessions();
            sessions.retain(|chat_id, session| {
                if chat_id == &context.chat_id {
                    return true;
                }
                session.close();
                false
            });
        }
        self.open_chat(context)
    }

    /// Close a chat. Returns false if it was not open.
    pub fn close_chat(&self, chat_id: &ChatId) -> bool {
        match self.sessions().remove(chat_id) {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    pub fn open_chats(&self) -> Vec<ChatId> {
        self.sessions().keys().cloned().collect()
    }

    /// Apply the configured retention policy
    pub async fn prune(&self) -> Result<usize> {
        let policy = self.config.retention.clone();
        self.prune_with(&policy).await
    }

    /// Prune the cache while every open chat's view is held still.
    ///
    /// Messages displayed in any open chat are pinned and survive.
    pub async fn prune_with(&self, policy: &RetentionPolicy) -> Result<usize> {
        let open: Vec<Arc<ChatSession>> = self.sessions().values().cloned().collect();

        let mut views = Vec::with_capacity(open.len());
        for session in &open {
            views.push(session.lock().await);
        }
        let pinned: HashSet<ClientTag> = views.iter().flat_map(|view| view.timeline.tags()).collect();

        let pinned_count = pinned.len();
        let store = self.store.clone();
        let policy = policy.clone();
        let removed = tokio::task::spawn_blocking(move || store.prune(&policy, &pinned))
            .await
            .map_err(|e| ClientError::Task(format!("prune worker failed: {}", e)))??;
        drop(views);

        log::info!(
            "Pruned {} cached messages ({} pinned across {} open chats)",
            removed,
            pinned_count,
            open.len()
        );
        Ok(removed)
    }

    /// Search the local cache of a chat
    pub fn search(&self, chat_id: &ChatId, query: &str, limit: usize) -> Result<Vec<Message>> {
        if query.trim().is_empty() {
            return Err(ClientError::InvalidInput("Search query is empty".to_string()));
        }
        Ok(self.store.search(chat_id, query.trim(), limit)?)
    }

    fn handle(&self, session: Arc<ChatSession>) -> ChatHandle {
        ChatHandle {
            synchronizer: MessageSynchronizer::new(
                session.clone(),
                self.store.clone(),
                self.gateway.clone(),
                self.config.clone(),
            ),
            sender: SendController::new(
                session.clone(),
                self.store.clone(),
                self.gateway.clone(),
                self.config.clone(),
            ),
            session,
        }
    }
}

/// Everything the presentation layer can do with one open chat
#[derive(Clone)]
pub struct ChatHandle {
    session: Arc<ChatSession>,
    synchronizer: MessageSynchronizer,
    sender: SendController,
}

impl ChatHandle {
    pub fn context(&self) -> &ChatContext {
        self.session.context()
    }

    pub fn chat_id(&self) -> &ChatId {
        self.session.chat_id()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_live()
    }

    /// Ordered snapshot of what is displayed
    pub async fn messages(&self) -> Vec<Message> {
        self.session.lock().await.timeline.snapshot()
    }

    pub async fn load_initial(&self) -> SyncOutcome {
        self.synchronizer.load_initial().await
    }

    pub async fn sync_newer(&self) -> SyncOutcome {
        self.synchronizer.sync_newer().await
    }

    pub async fn load_more_history(&self) -> HistoryOutcome {
        self.synchronizer.load_more_history().await
    }

    pub async fn has_more_history(&self) -> bool {
        self.synchronizer.has_more_history().await
    }

    /// Drop the results of any sync or history load still in flight
    pub fn cancel_in_flight(&self) {
        self.session.cancel_in_flight();
    }

    pub async fn send(&self, content: &str) -> Result<Message> {
        self.sender.send(content).await
    }

    /// Show the message now and deliver it on a background task
    pub async fn send_in_background(&self, content: &str) -> Result<(Message, JoinHandle<Result<Message>>)> {
        let pending = self.sender.prepare(content).await?;
        let message = pending.message().clone();
        let sender = self.sender.clone();
        let task = tokio::spawn(async move { sender.deliver(pending).await });
        Ok((message, task))
    }

    pub async fn retry(&self, client_tag: &ClientTag) -> Result<Message> {
        self.sender.retry(client_tag).await
    }
}

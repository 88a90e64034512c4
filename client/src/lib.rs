/// Story Chat Client Library
/// Local message cache, sync and optimistic sending for story/role chats

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod services;
pub mod storage;
pub mod timeline;

pub use api::{ServerApi, Session};
pub use config::{RetentionPolicy, SyncConfig};
pub use error::{ClientError, GatewayError, Result, StoreError};
pub use events::ChatEvent;
pub use models::{ChatContext, ChatId, ClientTag, Message, MessageStatus};
pub use services::{ChatHandle, ClientManager, HistoryOutcome, MessageGateway, SyncOutcome};
pub use storage::{LocalStore, MessageStore};
pub use timeline::{MergeSource, Timeline};

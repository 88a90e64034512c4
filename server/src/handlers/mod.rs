/// HTTP handlers module
/// Provides the REST endpoints and their shared runtime settings

pub mod rest;

pub use rest::{create_chat, get_messages, health, send_message};

pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Settings the handlers read on every request
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bearer token required on chat endpoints, if set
    pub api_token: Option<String>,
    /// Maximum messages per `?before=` page
    pub page_limit: i64,
    /// Whether the role answers each new user message
    pub auto_reply: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            api_token: None,
            page_limit: DEFAULT_PAGE_LIMIT,
            auto_reply: true,
        }
    }
}

/// Configuration management for the story chat server.
/// Handles command-line argument parsing and config structure.
use crate::handlers::{ServerConfig, DEFAULT_PAGE_LIMIT};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "Story Chat Server")]
#[command(about = "Reference message gateway for story chat clients", long_about = None)]
pub struct Config {
    /// Server port (default: 4000)
    #[arg(long, default_value = "4000")]
    pub port: u16,

    /// SQLite database file path (default: storychat.db)
    #[arg(long, default_value = "storychat.db")]
    pub database: PathBuf,

    /// PID file path (optional) - write server PID to this file on startup
    #[arg(long)]
    pub pidfile: Option<PathBuf>,

    /// Require this bearer token on chat endpoints
    #[arg(long)]
    pub api_token: Option<String>,

    /// Maximum messages returned per history page
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    pub page_limit: i64,

    /// Do not let roles answer automatically
    #[arg(long)]
    pub no_auto_reply: bool,
}

impl Config {
    /// Parse command-line arguments into Config
    pub fn from_args() -> Self {
        Config::parse()
    }

    /// Handler settings derived from the command line
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            api_token: self.api_token.clone(),
            page_limit: self.page_limit.max(1),
            auto_reply: !self.no_auto_reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::parse_from(["story-chat-server"]);
        assert_eq!(config.port, 4000);
        assert_eq!(config.database.to_str().unwrap(), "storychat.db");
        assert!(config.pidfile.is_none());

        let server = config.server_config();
        assert!(server.auto_reply);
        assert_eq!(server.page_limit, DEFAULT_PAGE_LIMIT);
        assert!(server.api_token.is_none());
    }

    #[test]
    fn test_custom_options() {
        let config = Config::parse_from([
            "story-chat-server",
            "--port",
            "8080",
            "--api-token",
            "secret",
            "--page-limit",
            "0",
            "--no-auto-reply",
        ]);
        assert_eq!(config.port, 8080);

        let server = config.server_config();
        assert_eq!(server.api_token.as_deref(), Some("secret"));
        assert_eq!(server.page_limit, 1);
        assert!(!server.auto_reply);
    }
}

/// Story Chat Server Library
/// Reference message gateway: chat registration, cursor-based message
/// fetches and idempotent sends with optional role auto-replies.

pub mod config;
pub mod db;
pub mod handlers;
pub mod server;

/// Service layer for the story chat client.
/// Sync, send and session orchestration on top of the store and gateway.

pub mod client_manager;
pub mod gateway;
pub mod send_controller;
pub mod session;
pub mod synchronizer;

pub use client_manager::{ChatHandle, ClientManager};
pub use gateway::{MessageGateway, GatewayResult};
pub use send_controller::{PendingSend, SendController};
pub use session::{ChatSession, ChatView, InFlightSends};
pub use synchronizer::{HistoryOutcome, MessageSynchronizer, SyncOutcome};

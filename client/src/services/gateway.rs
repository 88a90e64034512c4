//! Remote message gateway seam.
//!
//! The synchronizer and send controller only see this trait; `ServerApi`
//! implements it over HTTP and tests substitute scripted fakes.

use crate::error::GatewayError;
use crate::models::{ChatId, ClientTag, Message};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Messages strictly newer than `cursor`, ascending
    async fn fetch_messages_since(&self, chat_id: &ChatId, cursor: i64) -> GatewayResult<Vec<Message>>;

    /// A page of messages strictly older than `cursor`, ascending
    async fn fetch_messages_before(&self, chat_id: &ChatId, cursor: i64) -> GatewayResult<Vec<Message>>;

    /// Deliver a message. The first returned message is the echo of the
    /// sent one, any further ones are replies the server generated.
    async fn send_message(
        &self,
        chat_id: &ChatId,
        sender_id: &str,
        content: &str,
        client_tag: &ClientTag,
    ) -> GatewayResult<Vec<Message>>;
}

/// Bound a gateway call, mapping expiry to `GatewayError::Timeout`
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, GatewayError>(5) }).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, GatewayError>(())
        })
        .await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }
}

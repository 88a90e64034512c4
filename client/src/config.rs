/// Configuration for message synchronization and cache retention.

use crate::error::{ClientError, Result};
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const DEFAULT_MAX_MESSAGES_PER_CHAT: usize = 2000;

/// How long cached messages are kept.
///
/// Either limit may be disabled with `None`. Only confirmed (`Sent`)
/// messages are ever pruned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Option<Duration>,
    pub max_messages_per_chat: Option<usize>,
}

impl RetentionPolicy {
    /// Timestamp (Unix ms) below which messages are expired, if age pruning is on.
    pub fn age_cutoff(&self, now_ms: i64) -> Option<i64> {
        self.max_age
            .map(|age| now_ms.saturating_sub(i64::try_from(age.as_millis()).unwrap_or(i64::MAX)))
    }

    pub fn unlimited() -> Self {
        RetentionPolicy {
            max_age: None,
            max_messages_per_chat: None,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy {
            max_age: Some(DEFAULT_MAX_AGE),
            max_messages_per_chat: Some(DEFAULT_MAX_MESSAGES_PER_CHAT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Messages per initial load / history page
    pub page_size: usize,
    /// Upper bound for any single gateway call
    pub gateway_timeout: Duration,
    pub retention: RetentionPolicy,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(ClientError::Config("page_size must be at least 1".to_string()));
        }
        if self.gateway_timeout.is_zero() {
            return Err(ClientError::Config("gateway_timeout must be non-zero".to_string()));
        }
        if self.retention.max_messages_per_chat == Some(0) {
            return Err(ClientError::Config(
                "max_messages_per_chat must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            page_size: DEFAULT_PAGE_SIZE,
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            retention: RetentionPolicy::default(),
        }
    }
}

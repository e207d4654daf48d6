//! Outbound alert delivery.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The recipient can never be reached again (blocked the bot, deleted chat).
    #[error("Recipient gone: {0}")]
    RecipientGone(String),
    #[error("Delivery failed: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::RecipientGone(_))
    }
}

/// Delivers a rendered alert to a subscriber.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, owner_id: &str, message: &str) -> Result<(), DeliveryError>;
}

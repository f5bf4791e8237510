//! The delivery seam the queue calls through.

use crate::DeliveryResult;
use async_trait::async_trait;
use serde::Serialize;

/// A message as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    /// Client-generated id. Repeated deliveries carry the same id.
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: String,
    pub content: String,
}

/// Persists one message remotely.
///
/// Implementations must tolerate receiving the same message more than once;
/// the queue retries anything it did not see succeed.
#[async_trait]
pub trait MessageDeliverer: Send + Sync {
    async fn deliver(&self, message: &OutgoingMessage) -> DeliveryResult<()>;
}

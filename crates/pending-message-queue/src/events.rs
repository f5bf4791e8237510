/// Broadcast after a queued message was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFlushed {
    pub conversation_id: String,
    pub message_id: String,
}

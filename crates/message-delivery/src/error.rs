//! Error types for message delivery.

use thiserror::Error;

/// Why a delivery attempt did not succeed.
///
/// The queue treats every variant the same way (one failed attempt); the
/// distinction exists for logs and for callers using the client directly.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Network or transport-level HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Supabase returned a non-success status.
    #[error("Supabase error: {status} - {message}")]
    Supabase {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The backend answered but refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// No access token is available to authorize the write.
    #[error("Not authenticated")]
    Unauthenticated,

    /// The collaborator cannot be reached at all right now.
    #[error("Delivery unavailable: {0}")]
    Unavailable(String),
}

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

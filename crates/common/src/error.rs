use thiserror::Error;

/// Errors raised by a notification store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed record {id}: {reason}")]
    Malformed { id: String, reason: String },
}

/// Errors raised by a push-delivery channel.
#[derive(Debug, Error)]
pub enum PushError {
    /// The channel rejected the device token (unregistered, expired, malformed).
    #[error("Invalid push token: {0}")]
    InvalidToken(String),

    #[error("Push rejected ({status}): {message}")]
    Rejected { status: String, message: String },

    #[error("Push transport error: {0}")]
    Transport(String),

    #[error("Push authentication error: {0}")]
    Auth(String),
}

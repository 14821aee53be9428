//! Session error types.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by the chat session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The WebSocket connection to the bridge could not be opened.
    #[error("Failed to connect to chat bridge at {endpoint}: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// The chat service rejected the login.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The chat service requires a CAPTCHA to be solved by hand.
    #[error(
        "CAPTCHA challenge encountered during login. Please solve it manually by visiting the following URL: {url}"
    )]
    CaptchaRequired { url: String },

    /// The connection to the bridge was lost.
    #[error("Disconnected from chat bridge: {0}")]
    Disconnected(String),

    /// The outbound frame queue is full.
    #[error("Outbound queue is full")]
    QueueFull,
}

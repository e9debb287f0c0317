use std::time::Duration;

/// Errors that can occur while talking to a chassis REST control plane.
///
/// The poller treats every variant identically (sentinel substitution); the
/// distinction exists for logging and for future per-variant retry policy.
#[derive(Debug, thiserror::Error)]
pub enum DeviceClientError {
    /// Credentials rejected when opening a session.
    #[error("authentication rejected by {address}")]
    Auth { address: String },

    /// Non-2xx status from the chassis API.
    #[error("chassis API HTTP error: status={status}, body={body}")]
    Http { status: u16, body: String },

    /// Response parsed but did not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Fetch exceeded the configured per-device timeout.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// An underlying transport error from `reqwest`.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Convenience alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, DeviceClientError>;

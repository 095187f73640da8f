//! Error types for credential and session orchestration

use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Orchestration error
#[derive(Debug, Error)]
pub enum Error {
    /// No wallet provider is available in this context
    #[error("No wallet detected")]
    NoWalletDetected,

    /// The user declined an interactive wallet prompt
    #[error("User rejected the request: {0}")]
    UserRejected(String),

    /// The user closed an interactive authentication surface
    #[error("User cancelled the sign-in")]
    UserCancelled,

    /// The wallet or identity provider failed
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// The OAuth redirect could not be accepted
    #[error("Redirect error: {0}")]
    RedirectError(String),

    /// The OAuth redirect carried no identity token
    #[error("Missing token: {0}")]
    MissingToken(String),

    /// Caller-supplied input is not well-formed
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Handshake or RPC against the signing network failed
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// An operation needs a connected network context
    #[error("Not connected to the signing network")]
    NotConnected,

    /// Minting a key failed; never retried automatically
    #[error("Mint failed: {0}")]
    MintFailed(String),

    /// A mint for the same identity proof is already in flight
    #[error("A mint for this identity is already in progress")]
    MintInProgress,

    /// The signing callback for session issuance failed or timed out
    #[error("Auth callback failed: {0}")]
    AuthCallbackFailed(String),

    /// A session credential does not grant a required capability
    #[error("Capability not granted: {required}")]
    CapabilityDenied { required: String },

    /// A session credential is past its expiry
    #[error("Session credential expired at {0}")]
    SessionExpired(chrono::DateTime<chrono::Utc>),

    /// A session credential belongs to a disconnected network context
    #[error("Session credential was issued for a connection that is no longer active")]
    SessionRevoked,

    /// The remote execution raised an error
    #[error("Remote execution error: {0}")]
    RemoteExecution(String),

    /// Durable storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used to decide how a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User declined an interactive step; re-offer the action
    UserDeclined,
    /// No wallet or extension context; only this auth path is unavailable
    ProviderUnavailable,
    /// Bad input, recovered locally and never sent onward
    MalformedInput,
    /// Handshake or RPC failure; retryable by explicit user action
    NetworkUnreachable,
    /// Costly mint failed; never retried automatically
    MintFailed,
    /// Session signing callback failed; fatal to that session attempt
    AuthCallbackFailed,
    /// Credential does not authorize the operation
    Authorization,
    /// Everything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::UserRejected(_) | Error::UserCancelled => ErrorCategory::UserDeclined,
            Error::NoWalletDetected | Error::ProviderError(_) => ErrorCategory::ProviderUnavailable,
            Error::MalformedInput(_) | Error::RedirectError(_) | Error::MissingToken(_) => {
                ErrorCategory::MalformedInput
            }
            Error::NetworkUnreachable(_) | Error::NotConnected | Error::Http(_) => {
                ErrorCategory::NetworkUnreachable
            }
            Error::MintFailed(_) | Error::MintInProgress => ErrorCategory::MintFailed,
            Error::AuthCallbackFailed(_) => ErrorCategory::AuthCallbackFailed,
            Error::CapabilityDenied { .. } | Error::SessionExpired(_) | Error::SessionRevoked => {
                ErrorCategory::Authorization
            }
            Error::RemoteExecution(_)
            | Error::Storage(_)
            | Error::Config(_)
            | Error::Json(_)
            | Error::Io(_) => ErrorCategory::Internal,
        }
    }

    /// Whether offering the user an explicit retry makes sense.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::UserDeclined
                | ErrorCategory::NetworkUnreachable
                | ErrorCategory::MintFailed
                | ErrorCategory::AuthCallbackFailed
        )
    }
}

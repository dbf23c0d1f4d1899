//! Error types for the loanwatch system
//!
//! This module defines all error types used throughout the crate.
//!
//! The taxonomy follows how far a failure is allowed to travel:
//! - [`Error::Auth`] aborts the whole refresh cycle
//! - [`Error::Session`] is an ordering bug (request before login)
//! - [`Error::Fetch`] aborts the enclosing account or cycle, depending on
//!   which request failed
//! - [`Error::Parse`] degrades to an empty result for that one document,
//!   except on the membership and activity steps where it counts as a
//!   [`Error::Fetch`]

use thiserror::Error;

/// Result type alias for loanwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the multi-step login protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The redirect target lacked the callback, token or hint parameter
    #[error("login redirect is missing protocol parameters: {0}")]
    MissingParameters(String),

    /// The credential submission answered outside {200, 303}
    #[error("credentials rejected (status {0})")]
    CredentialsRejected(u16),

    /// The protected resource was not reachable after login
    #[error("login verification failed (status {0})")]
    VerificationFailed(u16),

    /// A redirect carried no usable `Location` header
    #[error("malformed redirect: {0}")]
    MalformedRedirect(String),

    /// Transport failure during the login sequence
    #[error("network failure during login: {0}")]
    Network(String),
}

/// Session misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A request was issued before a successful login
    #[error("session is not authenticated")]
    NotAuthenticated,
}

/// Core error type for the loanwatch system
#[derive(Error, Debug)]
pub enum Error {
    /// Login protocol failure
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Session used out of order
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Non-success status, transport failure or timeout on a mandatory request
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Malformed or unexpected document shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

}

impl Error {
    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Treat an unreadable document from a mandatory request as a failed fetch
    ///
    /// Every other variant passes through unchanged.
    pub fn into_fetch(self) -> Self {
        match self {
            Self::Parse(msg) => Self::Fetch(msg),
            Self::Json(e) => Self::Fetch(e.to_string()),
            other => other,
        }
    }

    /// Whether this error means the data source is unusable until a later cycle
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Session(_))
    }
}

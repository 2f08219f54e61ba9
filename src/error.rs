//! Error types for Authgate
//!
//! This module defines all error types used by the authentication and
//! authorization subsystem, using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Authgate operations
///
/// Each variant corresponds to one failure class of the login and
/// permission-resolution pipeline.  Functions return [`Result`], which wraps
/// these variants in `anyhow::Error`; callers that need to branch on the kind
/// use `err.downcast_ref::<AuthError>()`.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Missing or invalid endpoint, client credential, or redirect settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport-level failure talking to the token endpoint or directory
    #[error("Network error: {0}")]
    Network(String),

    /// The token endpoint answered with a non-200 status
    #[error("Token endpoint returned {status}: {body}")]
    TokenEndpoint {
        /// HTTP status code returned by the token endpoint
        status: u16,
        /// Upstream response body, kept verbatim for diagnostics
        body: String,
    },

    /// The user (or the authorization server) denied the request
    #[error("Authentication denied: {error}{}", describe(.description))]
    AuthenticationDenied {
        /// The `error` query parameter from the callback
        error: String,
        /// The optional `error_description` query parameter
        description: Option<String>,
    },

    /// The callback carried neither a code nor an error
    #[error("Malformed callback: {0}")]
    MalformedCallback(String),

    /// The callback `state` did not match the value sent in the request
    #[error("State mismatch in authorization callback")]
    StateMismatch,

    /// No callback arrived before the wait elapsed
    #[error("No response received from the authorization server within {seconds}s")]
    CallbackTimeout {
        /// Configured wait in seconds
        seconds: u64,
    },

    /// The registered redirect port is already bound by another process
    #[error(
        "Port {port} on {host} is already in use. The redirect URI is registered with the \
         authorization server and cannot change; stop the process holding port {port} and retry"
    )]
    PortInUse {
        /// Host from the redirect URI
        host: String,
        /// Port from the redirect URI
        port: u16,
    },

    /// Directory unreachable or no matching user record
    #[error("Permission resolution error: {0}")]
    PermissionResolution(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

fn describe(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

/// Result type alias for Authgate operations
///
/// Uses `anyhow::Error` so that context can be attached while the concrete
/// [`AuthError`] stays recoverable through downcasting.
pub type Result<T> = anyhow::Result<T>;

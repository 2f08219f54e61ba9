//! Authgate - OAuth2 Authorization Code + PKCE client library
//!
//! This library lets a command-line tool obtain, cache, and refresh a user's
//! access token through the browser, and resolve the user's capabilities
//! from a directory service so privileged operations can be gated per user.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: PKCE, callback listener, token exchange, token cache, claims
//! - `permissions`: directory client and capability resolution
//! - `guard`: the facade business logic calls
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use authgate::{AuthConfig, AuthorizationGuard};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AuthConfig::load(Some("authgate.yaml"))?;
//!     let guard = AuthorizationGuard::from_config(config)?;
//!
//!     let token = guard.ensure_token().await?;
//!     // Use `token` as a bearer credential
//!     # let _ = token;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod guard;
pub mod permissions;

// Re-export commonly used types
pub use auth::{BrowserLauncher, SystemBrowser};
pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use guard::{AccessDecision, AuthorizationGuard};
pub use permissions::{CapabilitySet, DirectoryClient, PermissionResolver, ScimDirectory};

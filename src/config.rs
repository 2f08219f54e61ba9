//! Configuration management for Authgate
//!
//! This module handles loading, parsing, validating, and managing the
//! authorization configuration from a YAML file and `AUTHGATE_*`
//! environment variables.

use crate::auth::token_cache::MAX_EXPIRY_MARGIN_SECS;
use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main configuration structure for Authgate
///
/// Holds the authorization server endpoints, the client registration, the
/// directory service credentials, and the local token cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Authorization endpoint the browser is sent to
    #[serde(default)]
    pub authorization_endpoint: String,

    /// Token endpoint used for code and refresh exchanges
    #[serde(default)]
    pub token_endpoint: String,

    /// OAuth client identifier
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret (confidential client)
    #[serde(default)]
    pub client_secret: String,

    /// Redirect URI registered with the authorization server
    ///
    /// The callback listener binds exactly the host and port encoded here.
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Scopes requested during authorization
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Directory service settings used for permission resolution
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Location of the persisted token record
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: PathBuf,

    /// Ignore any cached token and force an interactive login
    #[serde(default)]
    pub force_reauth: bool,

    /// How long to wait for the browser redirect (seconds)
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_seconds: u64,

    /// Timeout for token endpoint and directory calls (seconds)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,

    /// Tokens expiring within this many seconds are treated as invalid
    #[serde(default = "default_expiry_margin")]
    pub expiry_margin_seconds: i64,

    /// Verify TLS certificates of the token endpoint and directory
    ///
    /// When unset, certificates are verified unless the endpoint host is
    /// `localhost` or `127.0.0.1`.
    #[serde(default)]
    pub verify_tls: Option<bool>,
}

/// Directory service (SCIM 2.0) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the SCIM API, e.g. `https://localhost:9443/scim2`
    #[serde(default)]
    pub base_url: String,

    /// Service account used for read-only lookups
    #[serde(default)]
    pub admin_username: String,

    /// Password of the service account
    #[serde(default)]
    pub admin_password: String,
}

fn default_redirect_uri() -> String {
    "http://localhost:8765/callback".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
    ]
}

fn default_token_cache_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "authgate")
        .map(|dirs| dirs.cache_dir().join("token.json"))
        .unwrap_or_else(|| PathBuf::from(".authgate_token.json"))
}

fn default_callback_timeout() -> u64 {
    300
}

fn default_http_timeout() -> u64 {
    15
}

fn default_expiry_margin() -> i64 {
    30
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            directory: DirectoryConfig::default(),
            token_cache_path: default_token_cache_path(),
            force_reauth: false,
            callback_timeout_seconds: default_callback_timeout(),
            http_timeout_seconds: default_http_timeout(),
            expiry_margin_seconds: default_expiry_margin(),
            verify_tls: None,
        }
    }
}

/// Host, port, and path parsed from the redirect URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    /// Host the callback listener binds to
    pub host: String,
    /// Port the callback listener binds to
    pub port: u16,
    /// Path the authorization server redirects to
    pub path: String,
}

impl AuthConfig {
    /// Load configuration from an optional file with environment overrides
    ///
    /// A missing file is not an error: defaults are used and environment
    /// variables fill in the rest.  The result is not validated; call
    /// [`validate`](Self::validate) before use.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) if Path::new(p).exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::debug!("Config file not found at {}, using defaults", p);
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_vars();
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AuthError::Configuration(format!("Failed to read config file: {}", e))
        })?;
        serde_yaml::from_str(&contents)
            .map_err(|e| AuthError::Configuration(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(v) = std::env::var("AUTHGATE_AUTHORIZATION_ENDPOINT") {
            self.authorization_endpoint = v;
        }
        if let Ok(v) = std::env::var("AUTHGATE_TOKEN_ENDPOINT") {
            self.token_endpoint = v;
        }
        if let Ok(v) = std::env::var("AUTHGATE_CLIENT_ID") {
            self.client_id = v;
        }
        if let Ok(v) = std::env::var("AUTHGATE_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Ok(v) = std::env::var("AUTHGATE_REDIRECT_URI") {
            self.redirect_uri = v;
        }
        if let Ok(v) = std::env::var("AUTHGATE_SCOPES") {
            self.scopes = v.split_whitespace().map(str::to_string).collect();
        }
        if let Ok(v) = std::env::var("AUTHGATE_DIRECTORY_URL") {
            self.directory.base_url = v;
        }
        if let Ok(v) = std::env::var("AUTHGATE_DIRECTORY_USERNAME") {
            self.directory.admin_username = v;
        }
        if let Ok(v) = std::env::var("AUTHGATE_DIRECTORY_PASSWORD") {
            self.directory.admin_password = v;
        }
        if let Ok(v) = std::env::var("AUTHGATE_TOKEN_CACHE") {
            self.token_cache_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AUTHGATE_FORCE_REAUTH") {
            self.force_reauth = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("AUTHGATE_CALLBACK_TIMEOUT") {
            match v.parse::<u64>() {
                Ok(secs) => self.callback_timeout_seconds = secs,
                Err(_) => tracing::warn!("Ignoring invalid AUTHGATE_CALLBACK_TIMEOUT: {}", v),
            }
        }
        if let Ok(v) = std::env::var("AUTHGATE_VERIFY_TLS") {
            self.verify_tls = Some(parse_bool(&v));
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] naming the first missing or
    /// invalid setting
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("directory.base_url", &self.directory.base_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(AuthError::Configuration(format!("{} is required", name)).into());
            }
        }

        for (name, value) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("directory.base_url", &self.directory.base_url),
        ] {
            Url::parse(value).map_err(|e| {
                AuthError::Configuration(format!("{} is not a valid URL: {}", name, e))
            })?;
        }

        self.redirect_target()?;

        if self.callback_timeout_seconds == 0 {
            return Err(AuthError::Configuration(
                "callback_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.http_timeout_seconds == 0 {
            return Err(AuthError::Configuration(
                "http_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.expiry_margin_seconds < 0 {
            return Err(AuthError::Configuration(
                "expiry_margin_seconds must not be negative".to_string(),
            )
            .into());
        }

        if self.expiry_margin_seconds > MAX_EXPIRY_MARGIN_SECS {
            return Err(AuthError::Configuration(format!(
                "expiry_margin_seconds must be at most {}",
                MAX_EXPIRY_MARGIN_SECS
            ))
            .into());
        }

        Ok(())
    }

    /// Parse the redirect URI into the exact listener address
    ///
    /// The port must be explicit: the URI is registered with the
    /// authorization server, so a scheme default is not assumed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the URI does not parse or
    /// lacks a host or explicit port
    pub fn redirect_target(&self) -> Result<RedirectTarget> {
        let url = Url::parse(&self.redirect_uri).map_err(|e| {
            AuthError::Configuration(format!("redirect_uri is not a valid URL: {}", e))
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| AuthError::Configuration("redirect_uri has no host".to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port().ok_or_else(|| {
            AuthError::Configuration("redirect_uri must include an explicit port".to_string())
        })?;

        Ok(RedirectTarget {
            host,
            port,
            path: url.path().to_string(),
        })
    }

    /// Space-separated scope string sent to the authorization endpoint
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    /// Whether TLS certificates of `endpoint` should be verified
    pub fn verify_tls_for(&self, endpoint: &str) -> bool {
        self.verify_tls.unwrap_or_else(|| !is_localhost_url(endpoint))
    }

    /// Callback wait as a [`Duration`]
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_seconds)
    }

    /// HTTP request timeout as a [`Duration`]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn is_localhost_url(endpoint: &str) -> bool {
    Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "localhost" || h == "127.0.0.1"))
        .unwrap_or(false)
}

//! Token endpoint client for the authorization code and refresh grants
//!
//! A single attempt is made per call: transport failures and non-200
//! responses surface to the caller, which decides whether to fall back to
//! the interactive flow.

use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use reqwest::StatusCode;
use url::Url;

use crate::auth::pkce;
use crate::auth::token_cache::TokenRecord;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Upper bound on `expires_in` so timestamp arithmetic cannot overflow.
const MAX_EXPIRES_IN_SECS: u64 = 10 * 365 * 24 * 3600;

// ---------------------------------------------------------------------------
// Token endpoint response (raw deserialization)
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

impl TokenResponse {
    /// Converts the response into a record, anchoring `expires_in` at now.
    fn into_record(self) -> TokenRecord {
        let expires_in = self
            .expires_in
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            .min(MAX_EXPIRES_IN_SECS);
        let expires_at = Utc::now() + chrono::Duration::seconds(expires_in as i64);

        TokenRecord::new(self.access_token, expires_at)
            .with_refresh_token(self.refresh_token)
            .with_scope(self.scope)
            .with_id_token(self.id_token)
    }
}

// ---------------------------------------------------------------------------
// TokenClient
// ---------------------------------------------------------------------------

/// Client for the authorization server's authorize and token endpoints.
///
/// Requests to the token endpoint are authenticated with the client
/// credentials using HTTP basic auth.
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    authorization_endpoint: String,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
}

impl std::fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl TokenClient {
    /// Creates a client over an existing HTTP client.
    pub fn new(http: reqwest::Client, config: &AuthConfig) -> Self {
        Self {
            http,
            authorization_endpoint: config.authorization_endpoint.clone(),
            token_endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope_string(),
        }
    }

    /// Creates a client with the configured timeout and TLS policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let http = build_http_client(
            config.http_timeout(),
            config.verify_tls_for(&config.token_endpoint),
        )?;
        Ok(Self::new(http, config))
    }

    /// The redirect URI sent with every request.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Builds the browser URL for one authorization attempt.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the authorization endpoint is
    /// not a valid URL.
    pub fn authorization_url(&self, code_challenge: &str, state: &str) -> Result<String> {
        let mut url = Url::parse(&self.authorization_endpoint).map_err(|e| {
            AuthError::Configuration(format!("invalid authorization endpoint URL: {e}"))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", &self.redirect_uri);
            if !self.scope.is_empty() {
                query.append_pair("scope", &self.scope);
            }
            query.append_pair("state", state);
            query.append_pair("code_challenge", code_challenge);
            query.append_pair("code_challenge_method", pkce::S256);
        }

        Ok(url.to_string())
    }

    /// Exchanges an authorization code and PKCE verifier for a token record.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Network`] on transport failure or an unparseable body.
    /// - [`AuthError::TokenEndpoint`] for any non-200 status, carrying the
    ///   upstream body.
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenRecord> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", verifier),
        ];

        let raw = self.post_token(&params, "authorization_code").await?;
        tracing::info!("authorization code exchanged for tokens");
        Ok(raw.into_record())
    }

    /// Obtains a new token record with the stored refresh token.
    ///
    /// A response without `refresh_token` keeps the previous one, and the
    /// previous `id_token` likewise, since servers do not always rotate them.
    ///
    /// # Errors
    ///
    /// Same as [`exchange_code`](Self::exchange_code); also fails when
    /// `record` carries no refresh token.
    pub async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord> {
        let refresh_token = record
            .refresh_token
            .as_deref()
            .ok_or_else(|| anyhow!("token record has no refresh token"))?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];

        let raw = self.post_token(&params, "refresh_token").await?;
        let mut refreshed = raw.into_record();
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = record.refresh_token.clone();
        }
        if refreshed.id_token.is_none() {
            refreshed.id_token = record.id_token.clone();
        }

        tracing::info!("access token refreshed");
        Ok(refreshed)
    }

    async fn post_token(&self, params: &[(&str, &str)], grant: &str) -> Result<TokenResponse> {
        tracing::debug!(grant, endpoint = %self.token_endpoint, "posting to token endpoint");

        let resp = self
            .http
            .post(&self.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("{grant} request failed: {e}")))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(grant, status = status.as_u16(), "token endpoint rejected request");
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let raw: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("failed to parse token response: {e}")))?;
        if raw.access_token.is_empty() {
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body: "response contained an empty access_token".to_string(),
            }
            .into());
        }
        Ok(raw)
    }
}

/// Builds a `reqwest` client with a request timeout and TLS policy.
///
/// # Errors
///
/// Returns [`AuthError::Http`] if the TLS backend cannot be initialized.
pub fn build_http_client(timeout: Duration, verify_tls: bool) -> Result<reqwest::Client> {
    if !verify_tls {
        tracing::debug!("TLS certificate verification disabled");
    }
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(!verify_tls)
        .build()
        .map_err(AuthError::Http)?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TokenClient {
        let config = AuthConfig {
            authorization_endpoint: "https://idp.example.com/oauth2/authorize".to_string(),
            token_endpoint: "https://idp.example.com/oauth2/token".to_string(),
            client_id: "cli-client".to_string(),
            client_secret: "s3cret".to_string(),
            redirect_uri: "http://localhost:8765/callback".to_string(),
            ..AuthConfig::default()
        };
        TokenClient::new(reqwest::Client::new(), &config)
    }

    #[test]
    fn test_authorization_url_contains_required_params() {
        let url = client().authorization_url("chal", "st4te").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "cli-client");
        assert_eq!(pairs["redirect_uri"], "http://localhost:8765/callback");
        assert_eq!(pairs["scope"], "openid profile email");
        assert_eq!(pairs["state"], "st4te");
        assert_eq!(pairs["code_challenge"], "chal");
        assert_eq!(pairs["code_challenge_method"], "S256");
    }

    #[test]
    fn test_authorization_url_rejects_bad_endpoint() {
        let mut c = client();
        c.authorization_endpoint = "not a url".to_string();
        assert!(c.authorization_url("c", "s").is_err());
    }

    #[test]
    fn test_token_response_defaults_expiry() {
        let raw = TokenResponse {
            access_token: "tok".to_string(),
            expires_in: None,
            refresh_token: None,
            scope: None,
            id_token: None,
        };
        let record = raw.into_record();
        let delta = (record.expires_at() - Utc::now()).num_seconds();
        assert!((3598..=3600).contains(&delta), "delta was {delta}");
    }

    #[test]
    fn test_token_response_has_whole_second_expiry() {
        let raw = TokenResponse {
            access_token: "tok".to_string(),
            expires_in: Some(60),
            refresh_token: Some("r".to_string()),
            scope: Some("openid".to_string()),
            id_token: None,
        };
        let record = raw.into_record();
        assert_eq!(record.expires_at().timestamp_subsec_nanos(), 0);
        assert_eq!(record.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn test_debug_omits_secret() {
        let dbg = format!("{:?}", client());
        assert!(!dbg.contains("s3cret"));
    }
}

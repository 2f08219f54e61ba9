//! Shared helpers for integration tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use authgate::config::DirectoryConfig;
use authgate::{AuthConfig, BrowserLauncher};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};

use authgate::auth::token_cache::TokenRecord;

/// Returns a port that was free a moment ago on 127.0.0.1.
#[allow(dead_code)]
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}

/// Configuration pointing every endpoint at a wiremock server.
///
/// The token endpoint is `{server}/token` and the directory is
/// `{server}/scim2`; the redirect listens on `127.0.0.1:{port}/callback`.
#[allow(dead_code)]
pub fn test_config(server: &str, port: u16, cache_path: &Path) -> AuthConfig {
    AuthConfig {
        authorization_endpoint: format!("{server}/authorize"),
        token_endpoint: format!("{server}/token"),
        client_id: "cli-client".to_string(),
        client_secret: "s3cret".to_string(),
        redirect_uri: format!("http://127.0.0.1:{port}/callback"),
        directory: DirectoryConfig {
            base_url: format!("{server}/scim2"),
            admin_username: "admin".to_string(),
            admin_password: "admin".to_string(),
        },
        token_cache_path: cache_path.to_path_buf(),
        callback_timeout_seconds: 5,
        http_timeout_seconds: 5,
        ..AuthConfig::default()
    }
}

/// Unsigned compact JWT carrying `payload`.
#[allow(dead_code)]
pub fn jwt_with(payload: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).expect("json"));
    format!("{header}.{body}.c2lnbmF0dXJl")
}

/// Token record expiring `seconds` from now (negative for expired).
#[allow(dead_code)]
pub fn record_expiring_in(access_token: &str, seconds: i64) -> TokenRecord {
    TokenRecord::new(access_token, Utc::now() + Duration::seconds(seconds))
        .with_scope(Some("openid profile email".to_string()))
}

/// Browser stand-in that performs the authorization server's redirect.
///
/// Reads `redirect_uri` and `state` from the authorization URL and issues
/// the callback request itself.
#[allow(dead_code)]
#[derive(Default)]
pub struct RedirectingBrowser {
    /// Parameters appended to the redirect instead of a code.
    pub params: Vec<(String, String)>,
    /// Replaces the echoed state when set.
    pub state_override: Option<String>,
    opened: AtomicUsize,
}

#[allow(dead_code)]
impl RedirectingBrowser {
    /// Redirects back with `code`.
    pub fn with_code(code: &str) -> Self {
        Self {
            params: vec![("code".to_string(), code.to_string())],
            ..Default::default()
        }
    }

    /// Redirects back with `error` and a description.
    pub fn with_error(error: &str, description: &str) -> Self {
        Self {
            params: vec![
                ("error".to_string(), error.to_string()),
                ("error_description".to_string(), description.to_string()),
            ],
            ..Default::default()
        }
    }

    /// Number of times the browser was opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl BrowserLauncher for RedirectingBrowser {
    fn open(&self, url: &str) {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let url = url::Url::parse(url).expect("authorization URL");
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let state = self
            .state_override
            .clone()
            .unwrap_or_else(|| query["state"].clone());

        let mut target = url::Url::parse(&query["redirect_uri"]).expect("redirect URI");
        {
            let mut pairs = target.query_pairs_mut();
            for (k, v) in &self.params {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("state", &state);
        }

        tokio::spawn(async move {
            let _ = reqwest::get(target).await;
        });
    }
}

/// Browser stand-in that never completes the redirect.
#[allow(dead_code)]
pub struct SilentBrowser;

impl BrowserLauncher for SilentBrowser {
    fn open(&self, _url: &str) {}
}

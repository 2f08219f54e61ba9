//! Single-use local listener for the authorization redirect
//!
//! The listener binds the exact host and port of the registered redirect
//! URI, answers the first request to the redirect path, exchanges the code
//! immediately when a [`PendingExchange`] is attached, and shuts itself down.
//! The outcome is handed to the waiting flow through a oneshot channel owned
//! by this attempt only, so a later attempt can never observe it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::auth::exchange::TokenClient;
use crate::auth::token_cache::TokenRecord;
use crate::config::RedirectTarget;
use crate::error::{AuthError, Result};

/// How long [`CallbackReceiver::stop`] waits for in-flight responses.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// CallbackResult / CallbackOutcome
// ---------------------------------------------------------------------------

/// Query parameters delivered by the authorization server.
///
/// `code` and `error` are never both set: an `error` parameter wins and the
/// code is discarded.  Both unset means the callback was malformed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackResult {
    /// Authorization code on success.
    pub code: Option<String>,
    /// Echoed `state` nonce.
    pub state: Option<String>,
    /// OAuth error code on denial.
    pub error: Option<String>,
    /// Human-readable error detail on denial.
    pub error_description: Option<String>,
}

impl CallbackResult {
    /// Builds a result from decoded query parameters.
    pub fn from_query(mut params: HashMap<String, String>) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());

        let error = non_empty(params.remove("error"));
        let error_description = non_empty(params.remove("error_description"));
        let state = non_empty(params.remove("state"));
        let code = if error.is_some() {
            None
        } else {
            non_empty(params.remove("code"))
        };

        Self {
            code,
            state,
            error,
            error_description,
        }
    }

    /// Whether the server reported a denial.
    pub fn is_denied(&self) -> bool {
        self.error.is_some()
    }
}

/// What the receiver observed, plus the token exchange it performed.
#[derive(Debug)]
pub struct CallbackOutcome {
    /// Parsed callback parameters.
    pub result: CallbackResult,
    /// Result of the immediate code exchange; `None` when none was attempted.
    pub exchange: Option<Result<TokenRecord>>,
}

impl CallbackOutcome {
    /// Converts the outcome into the issued token record.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AuthenticationDenied`] when the callback carried `error`.
    /// - [`AuthError::StateMismatch`] when the `state` nonce did not match.
    /// - [`AuthError::MalformedCallback`] when it carried neither code nor
    ///   error, or no exchange was attempted.
    /// - Any error returned by the token exchange.
    pub fn into_token(self) -> Result<TokenRecord> {
        if let Some(error) = self.result.error {
            return Err(AuthError::AuthenticationDenied {
                error,
                description: self.result.error_description,
            }
            .into());
        }

        match (self.result.code, self.exchange) {
            (_, Some(exchanged)) => exchanged,
            (None, None) => Err(AuthError::MalformedCallback(
                "callback carried neither code nor error".to_string(),
            )
            .into()),
            (Some(_), None) => Err(AuthError::MalformedCallback(
                "authorization code received but no exchange was attempted".to_string(),
            )
            .into()),
        }
    }
}

/// The code exchange bound to one attempt: the client plus that attempt's
/// PKCE verifier.  Consumed by the first callback.
pub struct PendingExchange {
    client: TokenClient,
    verifier: String,
}

impl PendingExchange {
    /// Binds `verifier` to `client` for a single exchange.
    pub fn new(client: TokenClient, verifier: String) -> Self {
        Self { client, verifier }
    }
}

// ---------------------------------------------------------------------------
// CallbackReceiver
// ---------------------------------------------------------------------------

struct ReceiverState {
    expected_state: String,
    pending: Mutex<Option<PendingExchange>>,
    outcome_tx: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ReceiverState {
    fn trigger_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Handle to a running callback listener.
///
/// Dropping the handle aborts the listener task, releasing the port.
pub struct CallbackReceiver {
    local_addrs: Vec<SocketAddr>,
    state: Arc<ReceiverState>,
    outcome_rx: Option<oneshot::Receiver<CallbackOutcome>>,
    server: Option<JoinHandle<()>>,
}

impl CallbackReceiver {
    /// Binds the redirect address and starts serving in the background.
    ///
    /// Every address the redirect host resolves to is bound, so `localhost`
    /// is served on both `127.0.0.1` and `::1` when both exist.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::PortInUse`] when the registered port is taken on
    /// any of those addresses; the port is never substituted.
    pub async fn start(
        target: &RedirectTarget,
        expected_state: impl Into<String>,
        exchange: Option<PendingExchange>,
    ) -> Result<Self> {
        let listeners = bind_exact(target).await?;
        let local_addrs = listeners
            .iter()
            .map(|l| l.local_addr())
            .collect::<std::io::Result<Vec<_>>>()?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = Arc::new(ReceiverState {
            expected_state: expected_state.into(),
            pending: Mutex::new(exchange),
            outcome_tx: Mutex::new(Some(outcome_tx)),
            shutdown_tx,
        });

        let app = Router::new()
            .route(&target.path, get(handle_callback))
            .with_state(Arc::clone(&state));

        let server = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            for listener in listeners {
                let app = app.clone();
                let mut shutdown_rx = shutdown_rx.clone();
                tasks.spawn(async move {
                    let result = axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            while !*shutdown_rx.borrow_and_update() {
                                if shutdown_rx.changed().await.is_err() {
                                    break;
                                }
                            }
                        })
                        .await;
                    if let Err(e) = result {
                        tracing::warn!("callback listener stopped with error: {}", e);
                    }
                });
            }
            while tasks.join_next().await.is_some() {}
        });

        tracing::debug!(addrs = ?local_addrs, path = %target.path, "callback listener started");

        Ok(Self {
            local_addrs,
            state,
            outcome_rx: Some(outcome_rx),
            server: Some(server),
        })
    }

    /// First address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addrs[0]
    }

    /// Every address the listener is bound to.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Waits up to `timeout` for the callback, then stops the listener.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CallbackTimeout`] when nothing arrives in time.
    pub async fn await_result(mut self, timeout: Duration) -> Result<CallbackOutcome> {
        let rx = self
            .outcome_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("callback result already consumed"))?;

        let received = tokio::time::timeout(timeout, rx).await;
        self.stop().await;

        match received {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(anyhow::anyhow!(
                "callback listener exited before a result was delivered"
            )),
            Err(_) => {
                tracing::warn!(seconds = timeout.as_secs(), "no authorization callback received");
                Err(AuthError::CallbackTimeout {
                    seconds: timeout.as_secs(),
                }
                .into())
            }
        }
    }

    /// Shuts the listener down and waits until the port is released.
    pub async fn stop(mut self) {
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        self.state.trigger_shutdown();
        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
                server.abort();
                let _ = server.await;
            }
        }
        tracing::debug!(addrs = ?self.local_addrs, "callback listener stopped");
    }
}

impl Drop for CallbackReceiver {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// Binds the redirect port on every address the host resolves to.
///
/// A port taken on any of them is `PortInUse`.  Addresses the machine cannot
/// bind at all (an address family that is disabled) are skipped as long as
/// one listener remains.
async fn bind_exact(target: &RedirectTarget) -> Result<Vec<tokio::net::TcpListener>> {
    let mut addrs: Vec<SocketAddr> = Vec::new();
    for addr in tokio::net::lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|e| {
            AuthError::Configuration(format!(
                "cannot resolve redirect host {}: {}",
                target.host, e
            ))
        })?
    {
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }

    let mut listeners = Vec::with_capacity(addrs.len());
    let mut last_err = None;
    for addr in addrs {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listeners.push(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::warn!(addr = %addr, "redirect port already in use");
                return Err(AuthError::PortInUse {
                    host: target.host.clone(),
                    port: target.port,
                }
                .into());
            }
            Err(e) => {
                tracing::debug!(addr = %addr, "skipping unbindable redirect address: {}", e);
                last_err = Some(e);
            }
        }
    }

    if !listeners.is_empty() {
        return Ok(listeners);
    }

    Err(match last_err {
        Some(e) => AuthError::Io(e).into(),
        None => AuthError::Configuration(format!(
            "redirect host {} resolved to no addresses",
            target.host
        ))
        .into(),
    })
}

async fn handle_callback(
    State(state): State<Arc<ReceiverState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    // Claim the single slot before doing any work.
    let Some(outcome_tx) = state.outcome_tx.lock().await.take() else {
        return (
            StatusCode::GONE,
            Html(page("Already completed", "This sign-in link has already been used.")),
        );
    };

    let result = CallbackResult::from_query(params);

    let exchange = match result.code.as_deref() {
        Some(_) if result.state.as_deref() != Some(state.expected_state.as_str()) => {
            tracing::warn!("callback state did not match this attempt");
            Some(Err(AuthError::StateMismatch.into()))
        }
        Some(code) => {
            let pending = state.pending.lock().await.take();
            match pending {
                Some(pending) => {
                    Some(pending.client.exchange_code(code, &pending.verifier).await)
                }
                None => None,
            }
        }
        None => None,
    };

    let response = if let Some(error) = &result.error {
        tracing::info!(error = %error, "authorization denied in browser");
        let detail = result.error_description.as_deref().unwrap_or(error.as_str());
        (
            StatusCode::OK,
            Html(page(
                "Sign-in denied",
                &format!("The authorization server reported: {}", escape_html(detail)),
            )),
        )
    } else if result.code.is_none() {
        tracing::warn!("callback carried neither code nor error");
        (
            StatusCode::BAD_REQUEST,
            Html(page("Sign-in failed", "The callback was missing its parameters.")),
        )
    } else if matches!(exchange, Some(Err(_))) {
        (
            StatusCode::OK,
            Html(page(
                "Sign-in failed",
                "The authorization code could not be exchanged. Check the terminal for details.",
            )),
        )
    } else {
        (
            StatusCode::OK,
            Html(page(
                "Sign-in complete",
                "You can close this tab and return to the terminal.",
            )),
        )
    };

    let _ = outcome_tx.send(CallbackOutcome { result, exchange });
    state.trigger_shutdown();

    response
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{title}</title></head>\n\
         <body style=\"font-family: system-ui; text-align: center; padding-top: 80px;\">\n\
         <h2>{title}</h2>\n<p>{body}</p>\n</body>\n</html>"
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

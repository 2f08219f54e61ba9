//! Authorization guard used by business logic
//!
//! [`AuthorizationGuard`] answers the two questions callers have: "give me a
//! currently valid access token" ([`ensure_token`](AuthorizationGuard::ensure_token))
//! and "may the current user do X" ([`check_capability`](AuthorizationGuard::check_capability)).
//!
//! Token acquisition order:
//!
//! 1. Cached record still valid: return it, no network.
//! 2. Cached record expired with a refresh token: refresh grant.
//! 3. Otherwise: interactive authorization code flow with PKCE.
//!
//! Session state sits behind a `tokio::sync::Mutex` held for the whole
//! acquisition, so concurrent callers wait for the in-flight attempt instead
//! of binding a second callback listener.
//!
//! # Examples
//!
//! ```no_run
//! use authgate::{AccessDecision, AuthConfig, AuthorizationGuard};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AuthConfig::load(None)?;
//! let guard = AuthorizationGuard::from_config(config)?;
//!
//! match guard.check_capability("Update Prices", "update product prices").await {
//!     AccessDecision::Granted => { /* perform the operation */ }
//!     denied => println!("{denied}"),
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::auth::callback::{CallbackReceiver, PendingExchange};
use crate::auth::exchange::TokenClient;
use crate::auth::session::{AuthPhase, SessionState};
use crate::auth::token_cache::{TokenCache, TokenRecord};
use crate::auth::{pkce, BrowserLauncher, SystemBrowser};
use crate::config::AuthConfig;
use crate::error::Result;
use crate::permissions::{CapabilitySet, PermissionResolver, ScimDirectory};

// ---------------------------------------------------------------------------
// AccessDecision
// ---------------------------------------------------------------------------

/// Outcome of a capability check.
///
/// Lacking a capability is an ordinary outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The session holds the capability.
    Granted,
    /// Authenticated, but the capability is not in the resolved set.
    Denied {
        /// Capability that was required.
        capability: String,
        /// Action the caller attempted.
        action: String,
    },
    /// Login was attempted and failed.
    LoginRequired {
        /// Action the caller attempted.
        action: String,
        /// Why login failed.
        reason: String,
    },
}

impl AccessDecision {
    /// Returns `true` for [`AccessDecision::Granted`].
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }

    /// Denial message for display, or `None` when granted.
    pub fn denial_message(&self) -> Option<String> {
        match self {
            AccessDecision::Granted => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDecision::Granted => write!(f, "Access granted"),
            AccessDecision::Denied { capability, action } => write!(
                f,
                "Permission denied: you need the '{capability}' permission to {action}"
            ),
            AccessDecision::LoginRequired { action, reason } => {
                write!(f, "Login required to {action}: {reason}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AuthorizationGuard
// ---------------------------------------------------------------------------

/// Facade coordinating the token cache, token client, callback listener,
/// and permission resolver for a single user session.
pub struct AuthorizationGuard {
    config: AuthConfig,
    client: TokenClient,
    cache: TokenCache,
    resolver: PermissionResolver,
    browser: Arc<dyn BrowserLauncher>,
    session: Mutex<SessionState>,
}

impl fmt::Debug for AuthorizationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationGuard")
            .field("client", &self.client)
            .field("cache", &self.cache.path())
            .finish_non_exhaustive()
    }
}

impl AuthorizationGuard {
    /// Assembles a guard from its parts, using [`SystemBrowser`].
    pub fn new(
        config: AuthConfig,
        client: TokenClient,
        cache: TokenCache,
        resolver: PermissionResolver,
    ) -> Self {
        Self {
            config,
            client,
            cache,
            resolver,
            browser: Arc::new(SystemBrowser),
            session: Mutex::new(SessionState::default()),
        }
    }

    /// Validates `config` and builds the production components.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`](crate::error::AuthError::Configuration)
    /// when required settings are missing, or an HTTP client error.
    pub fn from_config(config: AuthConfig) -> Result<Self> {
        config.validate()?;
        let client = TokenClient::from_config(&config)?;
        let cache = TokenCache::from_config(&config);
        let directory = ScimDirectory::from_config(&config)?;
        let resolver = PermissionResolver::new(Arc::new(directory));
        Ok(Self::new(config, client, cache, resolver))
    }

    /// Replaces the browser launcher.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    /// Token cache backing this guard.
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Returns a currently valid access token, acquiring one if needed.
    ///
    /// # Errors
    ///
    /// Any failure of the interactive flow: denial, timeout, port in use,
    /// state mismatch, or token endpoint errors.  The session returns to
    /// [`AuthPhase::Unauthenticated`] and keeps the error for
    /// [`last_error`](Self::last_error).
    pub async fn ensure_token(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        self.acquire(&mut session).await
    }

    /// Checks whether the session holds `required`.
    ///
    /// The first call in an uninitialized session triggers login.  A failed
    /// login yields [`AccessDecision::LoginRequired`].
    pub async fn check_capability(&self, required: &str, action: &str) -> AccessDecision {
        let mut session = self.session.lock().await;

        if !session.initialized {
            if let Err(e) = self.acquire(&mut session).await {
                return AccessDecision::LoginRequired {
                    action: action.to_string(),
                    reason: format!("{e:#}"),
                };
            }
        }

        if session.capabilities.contains(required) {
            tracing::debug!(capability = required, "capability granted");
            AccessDecision::Granted
        } else {
            tracing::info!(capability = required, action, "capability denied");
            AccessDecision::Denied {
                capability: required.to_string(),
                action: action.to_string(),
            }
        }
    }

    /// Capabilities resolved for the current session.
    pub async fn capabilities(&self) -> CapabilitySet {
        self.session.lock().await.capabilities.clone()
    }

    /// Current session phase.
    pub async fn phase(&self) -> AuthPhase {
        self.session.lock().await.phase
    }

    /// Error that last reset the session, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.session.lock().await.last_error.clone()
    }

    /// Deletes the cached token and resets the session.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the cache file exists but cannot be removed.
    pub async fn logout(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        self.cache.clear()?;
        *session = SessionState::default();
        tracing::info!("logged out");
        Ok(())
    }

    async fn acquire(&self, session: &mut SessionState) -> Result<String> {
        let current = self.cache.load().or_else(|| {
            if self.cache.force_reauth() {
                None
            } else {
                session.token.clone()
            }
        });

        if let Some(record) = current {
            if self.cache.is_valid(&record) {
                if !session.initialized {
                    self.populate(session, &record).await;
                }
                return Ok(record.access_token);
            }

            if record.refresh_token.is_some() {
                session.phase = AuthPhase::NeedsRefresh;
                match self.client.refresh(&record).await {
                    Ok(refreshed) => {
                        let token = refreshed.access_token.clone();
                        if session.initialized {
                            session.phase = AuthPhase::Ready;
                        } else {
                            self.populate(session, &refreshed).await;
                        }
                        self.store(session, refreshed);
                        return Ok(token);
                    }
                    Err(e) => {
                        tracing::warn!("token refresh failed, starting interactive login: {:#}", e);
                        session.fail(&e);
                    }
                }
            } else {
                tracing::debug!("cached token expired and has no refresh token");
            }
        }

        self.login(session).await
    }

    async fn login(&self, session: &mut SessionState) -> Result<String> {
        session.phase = AuthPhase::AwaitingCallback;
        let record = match self.authorize().await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("interactive login failed: {:#}", e);
                session.fail(&e);
                return Err(e);
            }
        };

        session.phase = AuthPhase::TokenExchanged;
        let token = record.access_token.clone();
        self.populate(session, &record).await;
        self.store(session, record);
        self.cache.clear_force_reauth();
        Ok(token)
    }

    /// Runs one authorization code attempt: PKCE pair, state nonce, browser,
    /// callback, exchange.
    async fn authorize(&self) -> Result<TokenRecord> {
        let target = self.config.redirect_target()?;
        let pair = pkce::generate();
        let state = pkce::generate_state();
        let url = self.client.authorization_url(&pair.challenge, &state)?;

        let receiver = CallbackReceiver::start(
            &target,
            state,
            Some(PendingExchange::new(self.client.clone(), pair.verifier)),
        )
        .await?;

        tracing::info!(redirect = %self.client.redirect_uri(), "waiting for authorization callback");
        self.browser.open(&url);

        let outcome = receiver.await_result(self.config.callback_timeout()).await?;
        outcome.into_token()
    }

    async fn populate(&self, session: &mut SessionState, record: &TokenRecord) {
        let capabilities = match record.subject_claims() {
            Some(claims) => self.resolver.resolve(&claims).await,
            None => {
                tracing::warn!("token carries no decodable identity claims; no capabilities granted");
                CapabilitySet::default()
            }
        };
        session.phase = AuthPhase::PermissionsResolved;
        session.complete(capabilities);
    }

    fn store(&self, session: &mut SessionState, record: TokenRecord) {
        if let Err(e) = self.cache.save(&record) {
            tracing::warn!(path = %self.cache.path().display(), "failed to persist token: {:#}", e);
        }
        session.token = Some(record);
    }
}

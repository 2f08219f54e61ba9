//! In-memory session state for the authorization guard

use std::fmt;

use crate::auth::token_cache::TokenRecord;
use crate::permissions::CapabilitySet;

/// Lifecycle phase of the current session.
///
/// ```text
/// Unauthenticated -> AwaitingCallback -> TokenExchanged -> PermissionsResolved -> Ready
/// Ready -> NeedsRefresh -> Ready            (refresh succeeded)
/// NeedsRefresh -> Unauthenticated           (refresh failed)
/// any step failure -> Unauthenticated
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthPhase {
    /// No usable token.
    #[default]
    Unauthenticated,
    /// Browser launched; waiting for the redirect.
    AwaitingCallback,
    /// Token obtained; permissions not yet resolved.
    TokenExchanged,
    /// Capability set populated.
    PermissionsResolved,
    /// Valid token and capabilities available.
    Ready,
    /// Token expired; refresh in progress.
    NeedsRefresh,
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthPhase::Unauthenticated => "unauthenticated",
            AuthPhase::AwaitingCallback => "awaiting callback",
            AuthPhase::TokenExchanged => "token exchanged",
            AuthPhase::PermissionsResolved => "permissions resolved",
            AuthPhase::Ready => "ready",
            AuthPhase::NeedsRefresh => "needs refresh",
        };
        f.write_str(name)
    }
}

/// Per-process session owned by the guard.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Set once the capability set has been populated for this process.
    pub initialized: bool,

    /// Current lifecycle phase.
    pub phase: AuthPhase,

    /// Capabilities resolved at the last authentication.
    pub capabilities: CapabilitySet,

    /// Most recently acquired token, used when the cache file is unwritable.
    pub token: Option<TokenRecord>,

    /// Display form of the error that last returned the session to
    /// [`AuthPhase::Unauthenticated`].
    pub last_error: Option<String>,
}

impl SessionState {
    /// Records a failure and returns to [`AuthPhase::Unauthenticated`].
    pub fn fail(&mut self, error: &anyhow::Error) {
        self.phase = AuthPhase::Unauthenticated;
        self.last_error = Some(format!("{error:#}"));
    }

    /// Replaces the capability set and marks the session ready.
    pub fn complete(&mut self, capabilities: CapabilitySet) {
        self.capabilities = capabilities;
        self.initialized = true;
        self.last_error = None;
        self.phase = AuthPhase::Ready;
    }
}

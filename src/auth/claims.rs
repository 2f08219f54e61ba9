//! Subject identity claims extracted from issued tokens
//!
//! The claims feed the permission resolver, which turns them into directory
//! lookup candidates.
//!
//! # Trust
//!
//! [`SubjectClaims::decode_unverified`] reads the JWT payload WITHOUT
//! checking the signature, issuer, or audience.  The token arrives directly
//! from the token endpoint over the client's own connection, which is the
//! only thing vouching for it.  Deployments that cannot rely on that channel
//! must add JWKS verification before trusting these claims.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Identity claims of the authenticated subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectClaims {
    /// Stable subject identifier (`sub`).
    #[serde(default)]
    pub sub: Option<String>,

    /// OIDC `preferred_username`.
    #[serde(default)]
    pub preferred_username: Option<String>,

    /// Non-standard `username` claim emitted by some identity servers.
    #[serde(default)]
    pub username: Option<String>,

    /// OIDC `email`.
    #[serde(default)]
    pub email: Option<String>,

    /// Every other claim, kept for diagnostics.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl SubjectClaims {
    /// Decodes the payload segment of a compact JWT.
    ///
    /// Returns `None` for anything that is not a three-segment token with a
    /// JSON object payload.  Signatures are not verified.
    ///
    /// # Examples
    ///
    /// ```
    /// use authgate::auth::claims::SubjectClaims;
    ///
    /// // {"sub":"u-1","email":"ana@example.com"}
    /// let jwt = "eyJhbGciOiJub25lIn0.eyJzdWIiOiJ1LTEiLCJlbWFpbCI6ImFuYUBleGFtcGxlLmNvbSJ9.";
    /// let claims = SubjectClaims::decode_unverified(jwt).unwrap();
    /// assert_eq!(claims.sub.as_deref(), Some("u-1"));
    /// assert!(SubjectClaims::decode_unverified("opaque-token").is_none());
    /// ```
    pub fn decode_unverified(token: &str) -> Option<Self> {
        let mut parts = token.split('.');
        let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        match serde_json::from_slice::<Self>(&bytes) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::debug!("token payload is not a claims object: {}", e);
                None
            }
        }
    }

    /// Directory lookup candidates in priority order, deduplicated.
    ///
    /// Order: `sub`, `preferred_username`, `username`, `email`.  Blank values
    /// are skipped.
    pub fn candidate_identifiers(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(4);
        for value in [
            &self.sub,
            &self.preferred_username,
            &self.username,
            &self.email,
        ]
        .into_iter()
        .flatten()
        {
            let value = value.trim();
            if !value.is_empty() && !out.iter().any(|c| c == value) {
                out.push(value.to_string());
            }
        }
        out
    }
}

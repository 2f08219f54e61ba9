//! PKCE S256 verifier/challenge generation
//!
//! Implements the Proof Key for Code Exchange extension (RFC 7636) with the
//! `S256` method.  A fresh pair is generated for every interactive login
//! attempt; the verifier is sent only to the token endpoint and is dropped
//! once that single exchange has been attempted.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

/// The only challenge method this crate produces.
pub const S256: &str = "S256";

/// A one-time PKCE verifier and its derived challenge.
///
/// Never persisted.  `Debug` redacts the verifier.
///
/// # Examples
///
/// ```
/// use authgate::auth::pkce;
///
/// let pair = pkce::generate();
/// assert_eq!(pair.method, "S256");
/// assert_eq!(pair.verifier.len(), 43);
/// assert_eq!(pair.challenge, pkce::challenge_for(&pair.verifier));
/// ```
#[derive(Clone)]
pub struct PkcePair {
    /// 32 random bytes, base64url without padding (43 characters).
    pub verifier: String,

    /// `BASE64URL(SHA256(ASCII(verifier)))` without padding.
    pub challenge: String,

    /// Always [`S256`].
    pub method: &'static str,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish()
    }
}

/// Generates a fresh PKCE pair from the thread-local CSPRNG.
pub fn generate() -> PkcePair {
    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);

    let verifier = URL_SAFE_NO_PAD.encode(random_bytes);
    let challenge = challenge_for(&verifier);

    PkcePair {
        verifier,
        challenge,
        method: S256,
    }
}

/// Computes the S256 challenge for an arbitrary verifier.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Generates a random `state` nonce: 16 bytes, base64url without padding.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

//! PKCE generation properties

use std::collections::HashSet;

use authgate::auth::pkce;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

#[test]
fn test_challenge_is_sha256_of_verifier_for_many_pairs() {
    for _ in 0..200 {
        let pair = pkce::generate();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
        assert_eq!(pair.method, "S256");
    }
}

#[test]
fn test_verifier_length_and_charset() {
    let pair = pkce::generate();
    assert!(pair.verifier.len() >= 43 && pair.verifier.len() <= 128);
    assert!(pair
        .verifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    assert!(!pair.challenge.contains('='));
}

#[test]
fn test_verifiers_and_states_are_unique() {
    let verifiers: HashSet<String> = (0..100).map(|_| pkce::generate().verifier).collect();
    assert_eq!(verifiers.len(), 100);

    let states: HashSet<String> = (0..100).map(|_| pkce::generate_state()).collect();
    assert_eq!(states.len(), 100);
}

#[test]
fn test_debug_redacts_verifier() {
    let pair = pkce::generate();
    let dbg = format!("{:?}", pair);
    assert!(!dbg.contains(&pair.verifier));
    assert!(dbg.contains(&pair.challenge));
}

//! Token cache persistence and validity tests

mod common;

use authgate::auth::token_cache::{TokenCache, TokenRecord};
use chrono::{Duration, SubsecRound, TimeZone, Utc};
use tempfile::TempDir;

fn full_record() -> TokenRecord {
    TokenRecord::new("tok1", Utc.timestamp_opt(1_900_000_000, 0).unwrap())
        .with_refresh_token(Some("ref1".to_string()))
        .with_scope(Some("openid profile".to_string()))
        .with_id_token(Some(common::jwt_with(serde_json::json!({"sub": "u-1"}))))
}

#[test]
fn test_save_then_load_round_trips() {
    let dir = TempDir::new().unwrap();
    let cache = TokenCache::new(dir.path().join("nested").join("token.json"));

    cache.save(&full_record()).unwrap();
    assert_eq!(cache.load(), Some(full_record()));
}

#[test]
fn test_save_then_load_round_trips_record_built_from_now() {
    let dir = TempDir::new().unwrap();
    let cache = TokenCache::new(dir.path().join("token.json"));
    let record = TokenRecord::new("tok1", Utc::now() + Duration::seconds(3600))
        .with_refresh_token(Some("ref1".to_string()));

    assert_eq!(record.expires_at().timestamp_subsec_nanos(), 0);
    cache.save(&record).unwrap();
    assert_eq!(cache.load(), Some(record));
}

#[test]
fn test_file_uses_epoch_seconds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    let cache = TokenCache::new(&path);
    cache.save(&full_record()).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["access_token"], "tok1");
    assert_eq!(raw["refresh_token"], "ref1");
    assert_eq!(raw["expires_at"], 1_900_000_000i64);
    assert_eq!(raw["scope"], "openid profile");
}

#[test]
fn test_loads_minimal_file_written_elsewhere() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    std::fs::write(&path, r#"{"access_token":"abc","expires_at":1900000000}"#).unwrap();

    let record = TokenCache::new(&path).load().unwrap();
    assert_eq!(record.access_token, "abc");
    assert!(record.refresh_token.is_none());
    assert!(record.id_token.is_none());
}

#[test]
fn test_force_reauth_bypasses_valid_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    TokenCache::new(&path).save(&full_record()).unwrap();

    let cache = TokenCache::new(&path).with_force_reauth(true);
    assert!(cache.load().is_none());

    cache.clear_force_reauth();
    assert_eq!(cache.load(), Some(full_record()));
}

#[test]
fn test_validity_boundary_at_thirty_second_margin() {
    let cache = TokenCache::new("unused.json");
    let now = Utc::now();
    let now = now.trunc_subsecs(0);
    let at = |secs: i64| TokenRecord::new("tok1", now + Duration::seconds(secs));

    assert!(!cache.is_valid_at(&at(29), now));
    assert!(!cache.is_valid_at(&at(30), now));
    assert!(cache.is_valid_at(&at(31), now));
    assert!(!cache.is_valid_at(&at(-5), now));
}

#[test]
fn test_empty_access_token_is_never_valid() {
    let cache = TokenCache::new("unused.json");
    let mut record = common::record_expiring_in("x", 3600);
    record.access_token = String::new();
    assert!(!cache.is_valid(&record));
}

#[test]
fn test_corrupt_file_reads_as_absent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(TokenCache::new(&path).load().is_none());
}

#[test]
fn test_clear_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    let cache = TokenCache::new(&path);
    cache.save(&full_record()).unwrap();

    cache.clear().unwrap();
    assert!(!path.exists());
    cache.clear().unwrap();
}

#[cfg(unix)]
#[test]
fn test_cache_file_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    TokenCache::new(&path).save(&full_record()).unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

//! Token record persistence in a local JSON file
//!
//! The cache holds at most one [`TokenRecord`] for the single user of the
//! process.  It is written with write-then-rename so that a crash mid-write
//! leaves either the previous file or the new one, never a truncated record
//! that parses as valid.  No cross-process locking is performed.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, SubsecRound as _, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::claims::SubjectClaims;
use crate::config::AuthConfig;
use crate::error::Result;

/// Default safety margin applied by [`TokenCache::is_valid`].
pub const DEFAULT_EXPIRY_MARGIN_SECS: i64 = 30;

/// Largest accepted safety margin (one day).
pub const MAX_EXPIRY_MARGIN_SECS: i64 = 24 * 3600;

// ---------------------------------------------------------------------------
// TokenRecord
// ---------------------------------------------------------------------------

/// The latest token set issued for the user.
///
/// Replaced wholesale on every successful exchange or refresh, never edited
/// in place.  `expires_at` holds whole seconds only, matching the epoch
/// seconds stored on disk, so a saved record loads back equal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer access token.
    pub access_token: String,

    /// Refresh token, when the server issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(with = "chrono::serde::ts_seconds")]
    expires_at: DateTime<Utc>,

    /// Space-separated scopes granted by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// OpenID Connect identity token carrying the subject claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenRecord {
    /// Creates a record for `access_token`, truncating `expires_at` to whole
    /// seconds.
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: expires_at.trunc_subsecs(0),
            scope: None,
            id_token: None,
        }
    }

    /// Sets the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    /// Sets the granted scope.
    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the identity token.
    pub fn with_id_token(mut self, id_token: Option<String>) -> Self {
        self.id_token = id_token;
        self
    }

    /// Absolute expiry of `access_token`.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Identity claims carried by this record.
    ///
    /// Read from `id_token` first, then from the access token when it is a
    /// JWT.  See [`SubjectClaims::decode_unverified`] for the trust caveat.
    pub fn subject_claims(&self) -> Option<SubjectClaims> {
        self.id_token
            .as_deref()
            .and_then(SubjectClaims::decode_unverified)
            .or_else(|| SubjectClaims::decode_unverified(&self.access_token))
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TokenCache
// ---------------------------------------------------------------------------

/// File-backed store for the current [`TokenRecord`].
///
/// # Examples
///
/// ```no_run
/// use authgate::auth::token_cache::TokenCache;
///
/// let cache = TokenCache::new("/tmp/authgate-token.json");
/// if let Some(record) = cache.load() {
///     println!("cached token valid: {}", cache.is_valid(&record));
/// }
/// ```
#[derive(Debug)]
pub struct TokenCache {
    path: PathBuf,
    margin: Duration,
    force_reauth: AtomicBool,
}

impl TokenCache {
    /// Creates a cache at `path` with the default 30-second margin.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            margin: Duration::seconds(DEFAULT_EXPIRY_MARGIN_SECS),
            force_reauth: AtomicBool::new(false),
        }
    }

    /// Creates a cache from the path, margin and force flag in `config`.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.token_cache_path.clone())
            .with_margin(config.expiry_margin_seconds)
            .with_force_reauth(config.force_reauth)
    }

    /// Sets the safety margin in seconds, clamped to
    /// `0..=`[`MAX_EXPIRY_MARGIN_SECS`].
    pub fn with_margin(mut self, seconds: i64) -> Self {
        let clamped = seconds.clamp(0, MAX_EXPIRY_MARGIN_SECS);
        if clamped != seconds {
            tracing::warn!(requested = seconds, used = clamped, "expiry margin out of range");
        }
        self.margin = Duration::seconds(clamped);
        self
    }

    /// Sets the initial force-reauth flag.
    pub fn with_force_reauth(self, force: bool) -> Self {
        self.force_reauth.store(force, Ordering::SeqCst);
        self
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether reads currently bypass the file.
    pub fn force_reauth(&self) -> bool {
        self.force_reauth.load(Ordering::SeqCst)
    }

    /// Re-enables reads after a successful token acquisition.
    pub fn clear_force_reauth(&self) {
        if self.force_reauth.swap(false, Ordering::SeqCst) {
            tracing::debug!("force_reauth cleared");
        }
    }

    /// Returns the persisted record.
    ///
    /// Always `None` while force-reauth is set.  A missing or unreadable
    /// file is also `None`; corruption is logged, not raised.
    pub fn load(&self) -> Option<TokenRecord> {
        if self.force_reauth() {
            tracing::debug!("force_reauth set, ignoring cached token");
            return None;
        }

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to read token cache: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<TokenRecord>(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring corrupt token cache: {}", e);
                None
            }
        }
    }

    /// Persists `record`, replacing any previous file.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error if the file cannot be written.
    pub fn save(&self, record: &TokenRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.tmp_path();
        {
            let mut file = open_private(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(path = %self.path.display(), expires_at = %record.expires_at, "token cached");
        Ok(())
    }

    /// Removes the cache file.  No-op when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an IO error for failures other than "not found".
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// `true` when the access token is non-empty and outlives the margin.
    pub fn is_valid(&self, record: &TokenRecord) -> bool {
        self.is_valid_at(record, Utc::now())
    }

    /// [`is_valid`](Self::is_valid) evaluated at an explicit instant.
    pub fn is_valid_at(&self, record: &TokenRecord, now: DateTime<Utc>) -> bool {
        !record.access_token.is_empty() && record.expires_at > now + self.margin
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "token.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt as _;
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record_expiring_in(seconds: i64) -> TokenRecord {
        TokenRecord::new("tok", Utc::now() + Duration::seconds(seconds))
    }

    #[test]
    fn test_valid_boundary_at_margin() {
        let cache = TokenCache::new("unused.json");
        let now = Utc::now().trunc_subsecs(0);
        let at = |secs: i64| TokenRecord::new("tok", now + Duration::seconds(secs));

        assert!(!cache.is_valid_at(&at(29), now));
        assert!(!cache.is_valid_at(&at(30), now), "margin is exclusive");
        assert!(cache.is_valid_at(&at(31), now));
    }

    #[test]
    fn test_empty_access_token_is_invalid() {
        let cache = TokenCache::new("unused.json");
        let mut record = record_expiring_in(3600);
        record.access_token = String::new();
        assert!(!cache.is_valid(&record));
    }

    #[test]
    fn test_custom_margin() {
        let cache = TokenCache::new("unused.json").with_margin(120);
        assert!(!cache.is_valid(&record_expiring_in(90)));
        assert!(cache.is_valid(&record_expiring_in(600)));
    }

    #[test]
    fn test_huge_margin_is_clamped() {
        let cache = TokenCache::new("unused.json").with_margin(i64::MAX / 10);
        assert!(!cache.is_valid(&record_expiring_in(MAX_EXPIRY_MARGIN_SECS - 60)));
        assert!(cache.is_valid(&record_expiring_in(MAX_EXPIRY_MARGIN_SECS + 60)));
    }

    #[test]
    fn test_negative_margin_is_clamped_to_zero() {
        let cache = TokenCache::new("unused.json").with_margin(-100);
        assert!(cache.is_valid(&record_expiring_in(5)));
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = TokenCache::new(dir.path().join("absent.json"));
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_load_corrupt_file_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "{\"access_tok").unwrap();
        assert!(TokenCache::new(path).load().is_none());
    }

    #[test]
    fn test_save_creates_parent_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("token.json");
        let cache = TokenCache::new(&path);
        cache.save(&record_expiring_in(3600)).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("nested").join("token.json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_is_owner_only() {
        use std::os::unix::fs::PermissionsExt as _;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        TokenCache::new(&path)
            .save(&record_expiring_in(3600))
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_on_disk_format_uses_epoch_seconds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        let record = TokenRecord::new("a", DateTime::from_timestamp(1_800_000_000, 0).unwrap())
            .with_refresh_token(Some("r".to_string()))
            .with_scope(Some("openid".to_string()));
        TokenCache::new(&path).save(&record).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["access_token"], "a");
        assert_eq!(raw["refresh_token"], "r");
        assert_eq!(raw["expires_at"], 1_800_000_000i64);
        assert_eq!(raw["scope"], "openid");
        assert!(raw.get("id_token").is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = TokenCache::new(dir.path().join("token.json"));
        cache.save(&record_expiring_in(3600)).unwrap();
        cache.clear().unwrap();
        cache.clear().unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_clear_force_reauth_restores_reads() {
        let dir = TempDir::new().unwrap();
        let cache = TokenCache::new(dir.path().join("token.json")).with_force_reauth(true);
        cache.save(&record_expiring_in(3600)).unwrap();
        assert!(cache.load().is_none());

        cache.clear_force_reauth();
        assert!(!cache.force_reauth());
        assert!(cache.load().is_some());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let mut record = record_expiring_in(3600);
        record.access_token = "super-secret-access".to_string();
        record.refresh_token = Some("super-secret-refresh".to_string());
        let dbg = format!("{:?}", record);
        assert!(!dbg.contains("super-secret"));
    }
}

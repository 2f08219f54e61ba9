//! Directory service access for user and role lookups
//!
//! [`DirectoryClient`] is the seam the resolver depends on; [`ScimDirectory`]
//! implements it against a SCIM 2.0 API using service-level basic
//! credentials, independent of the end user's token.  All calls are
//! read-only.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::auth::exchange::build_http_client;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

const SCIM_MEDIA_TYPE: &str = "application/scim+json";

// ---------------------------------------------------------------------------
// Directory records
// ---------------------------------------------------------------------------

/// A reference to a role or group on a user record.
///
/// Directories emit either inline objects (`{"value": "...", "display":
/// "..."}`) or bare identifier strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    /// Bare identifier string.
    Bare(String),
    /// Inline object with an identifier and optional display name.
    Inline {
        /// SCIM `value` attribute (the referenced id).
        #[serde(default)]
        value: Option<String>,
        /// Alternative id attribute used by some servers.
        #[serde(default)]
        id: Option<String>,
        /// Human-readable name.
        #[serde(default)]
        display: Option<String>,
    },
}

impl Reference {
    /// Identifier used to fetch the referenced role.
    pub fn id(&self) -> Option<&str> {
        let id = match self {
            Reference::Bare(s) => Some(s.as_str()),
            Reference::Inline { value, id, .. } => value.as_deref().or(id.as_deref()),
        };
        id.filter(|s| !s.is_empty())
    }

    /// Display name, falling back to the identifier.
    pub fn label(&self) -> Option<&str> {
        match self {
            Reference::Inline {
                display: Some(d), ..
            } if !d.is_empty() => Some(d.as_str()),
            _ => self.id(),
        }
    }
}

/// A user record from the directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryUser {
    /// Directory-assigned identifier.
    #[serde(default)]
    pub id: Option<String>,

    /// SCIM `userName`.
    #[serde(default, rename = "userName")]
    pub user_name: Option<String>,

    /// Directly assigned roles.
    #[serde(default)]
    pub roles: Vec<Reference>,

    /// Group memberships.
    #[serde(default)]
    pub groups: Vec<Reference>,
}

impl DirectoryUser {
    /// Role and group references, roles first.
    pub fn role_references(&self) -> impl Iterator<Item = &Reference> {
        self.roles.iter().chain(self.groups.iter())
    }
}

/// A declared permission on a role.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PermissionEntry {
    /// Bare permission name.
    Bare(String),
    /// Inline object; `display` is preferred over `value`.
    Inline {
        /// Human-readable permission name.
        #[serde(default)]
        display: Option<String>,
        /// Machine permission value.
        #[serde(default)]
        value: Option<String>,
    },
}

impl PermissionEntry {
    /// Capability name contributed by this entry.
    pub fn name(&self) -> Option<&str> {
        let name = match self {
            PermissionEntry::Bare(s) => Some(s.as_str()),
            PermissionEntry::Inline { display, value } => display
                .as_deref()
                .filter(|d| !d.is_empty())
                .or(value.as_deref()),
        };
        name.map(str::trim).filter(|s| !s.is_empty())
    }
}

/// A role definition from the directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleDefinition {
    /// Directory-assigned identifier.
    #[serde(default)]
    pub id: Option<String>,

    /// Role name.
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,

    /// Permissions granted by the role.
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default, rename = "Resources")]
    resources: Vec<DirectoryUser>,
}

// ---------------------------------------------------------------------------
// DirectoryClient
// ---------------------------------------------------------------------------

/// Read-only access to users and roles in a directory service.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Looks a user up by directory identifier.  `Ok(None)` when absent.
    async fn get_user(&self, id: &str) -> Result<Option<DirectoryUser>>;

    /// Finds a user by username-equivalent attribute.  `Ok(None)` when absent.
    async fn find_user_by_username(&self, username: &str) -> Result<Option<DirectoryUser>>;

    /// Fetches a role definition by identifier.
    async fn get_role(&self, id: &str) -> Result<RoleDefinition>;
}

// ---------------------------------------------------------------------------
// ScimDirectory
// ---------------------------------------------------------------------------

/// [`DirectoryClient`] over a SCIM 2.0 HTTP API.
pub struct ScimDirectory {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
}

impl std::fmt::Debug for ScimDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScimDirectory")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ScimDirectory {
    /// Creates a directory client over an existing HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if `base_url` cannot carry paths.
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AuthError::Configuration(format!("invalid directory URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(AuthError::Configuration(format!(
                "directory URL cannot carry paths: {base_url}"
            ))
            .into());
        }
        Ok(Self {
            http,
            base_url,
            username: username.into(),
            password: password.into(),
        })
    }

    /// Creates a directory client from the `directory` section of `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// built.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let http = build_http_client(
            config.http_timeout(),
            config.verify_tls_for(&config.directory.base_url),
        )?;
        Self::new(
            http,
            &config.directory.base_url,
            config.directory.admin_username.clone(),
            config.directory.admin_password.clone(),
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }

    async fn get_json(&self, url: Url, what: &str) -> Result<Option<reqwest::Response>> {
        tracing::debug!(url = %url, "directory {}", what);
        let resp = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, SCIM_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("directory {what} failed: {e}")))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp)),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(AuthError::PermissionResolution(format!(
                    "directory {what} returned {status}: {body}"
                ))
                .into())
            }
        }
    }
}

#[async_trait]
impl DirectoryClient for ScimDirectory {
    async fn get_user(&self, id: &str) -> Result<Option<DirectoryUser>> {
        let url = self.endpoint(&["Users", id]);
        match self.get_json(url, "user lookup").await? {
            Some(resp) => Ok(Some(resp.json::<DirectoryUser>().await.map_err(|e| {
                AuthError::PermissionResolution(format!("invalid user record: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<DirectoryUser>> {
        let mut url = self.endpoint(&["Users"]);
        let escaped = username.replace('\\', "\\\\").replace('"', "\\\"");
        url.query_pairs_mut()
            .append_pair("filter", &format!("userName eq \"{escaped}\""));

        match self.get_json(url, "user search").await? {
            Some(resp) => {
                let list: ListResponse = resp.json().await.map_err(|e| {
                    AuthError::PermissionResolution(format!("invalid user search response: {e}"))
                })?;
                Ok(list.resources.into_iter().next())
            }
            None => Ok(None),
        }
    }

    async fn get_role(&self, id: &str) -> Result<RoleDefinition> {
        let url = self.endpoint(&["Roles", id]);
        match self.get_json(url, "role fetch").await? {
            Some(resp) => Ok(resp.json::<RoleDefinition>().await.map_err(|e| {
                AuthError::PermissionResolution(format!("invalid role definition: {e}"))
            })?),
            None => Err(AuthError::PermissionResolution(format!("role {id} not found")).into()),
        }
    }
}

//! Maps an authenticated identity to its capability set
//!
//! Resolution fails closed: any failure to find the user yields an empty
//! set, and a role that cannot be fetched is skipped while the remaining
//! roles still contribute.

use std::collections::HashSet;
use std::sync::Arc;

use crate::auth::claims::SubjectClaims;
use crate::permissions::directory::{DirectoryClient, DirectoryUser, Reference};
use crate::permissions::CapabilitySet;

/// Resolves capability sets through a [`DirectoryClient`].
#[derive(Clone)]
pub struct PermissionResolver {
    directory: Arc<dyn DirectoryClient>,
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver").finish_non_exhaustive()
    }
}

impl PermissionResolver {
    /// Creates a resolver over `directory`.
    pub fn new(directory: Arc<dyn DirectoryClient>) -> Self {
        Self { directory }
    }

    /// Resolves the capability set for `claims`.
    ///
    /// Never fails: an unknown user or unreachable directory produces an
    /// empty set.
    pub async fn resolve(&self, claims: &SubjectClaims) -> CapabilitySet {
        let candidates = claims.candidate_identifiers();
        if candidates.is_empty() {
            tracing::warn!("token carries no usable identity claims; no capabilities granted");
            return CapabilitySet::default();
        }

        let Some(user) = self.find_user(&candidates).await else {
            tracing::warn!(
                candidates = candidates.len(),
                "user not found in directory; no capabilities granted"
            );
            return CapabilitySet::default();
        };

        let capabilities = self.collect_permissions(&user).await;
        tracing::info!(
            user = user.user_name.as_deref().or(user.id.as_deref()).unwrap_or("?"),
            capabilities = capabilities.len(),
            "permissions resolved"
        );
        capabilities
    }

    /// Tries every candidate by direct id, then by username search; the
    /// first hit wins.
    async fn find_user(&self, candidates: &[String]) -> Option<DirectoryUser> {
        for candidate in candidates {
            match self.directory.get_user(candidate).await {
                Ok(Some(user)) => {
                    tracing::debug!(candidate = %candidate, "user found by id");
                    return Some(user);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(candidate = %candidate, "id lookup failed: {:#}", e),
            }

            match self.directory.find_user_by_username(candidate).await {
                Ok(Some(user)) => {
                    tracing::debug!(candidate = %candidate, "user found by username");
                    return Some(user);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(candidate = %candidate, "username search failed: {:#}", e)
                }
            }
        }
        None
    }

    async fn collect_permissions(&self, user: &DirectoryUser) -> CapabilitySet {
        let mut seen = HashSet::new();
        let mut capabilities = CapabilitySet::default();

        for reference in user.role_references() {
            let Some(role_id) = reference.id() else {
                tracing::debug!(role = ?reference.label(), "role reference without id skipped");
                continue;
            };
            if !seen.insert(role_id.to_string()) {
                continue;
            }

            match self.directory.get_role(role_id).await {
                Ok(role) => {
                    capabilities.extend(role.permissions.iter().filter_map(|p| p.name()));
                }
                Err(e) => {
                    tracing::warn!(role = %role_label(reference), "role fetch failed, skipping: {:#}", e);
                }
            }
        }
        capabilities
    }
}

fn role_label(reference: &Reference) -> &str {
    reference.label().unwrap_or("?")
}

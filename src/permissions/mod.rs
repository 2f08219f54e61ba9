//! Permission resolution against the directory service
//!
//! - [`directory`] -- [`DirectoryClient`] trait and SCIM implementation
//! - [`resolver`] -- identity claims to [`CapabilitySet`]

pub mod directory;
pub mod resolver;

use std::collections::BTreeSet;
use std::fmt;

pub use directory::{DirectoryClient, ScimDirectory};
pub use resolver::PermissionResolver;

/// Set of capability names granted to a user.
///
/// Names are compared exactly and case-sensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    /// Returns `true` if `capability` is in the set.
    pub fn contains(&self, capability: &str) -> bool {
        self.0.contains(capability)
    }

    /// Number of capabilities.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no capabilities are granted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Capabilities in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for CapabilitySet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(", "))
    }
}

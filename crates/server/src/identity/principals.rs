use std::collections::BTreeSet;

use async_trait::async_trait;

/// Directory of known principals.
///
/// A lookup failure of any kind is reported as `None`, and the request is
/// then identified by its network address.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// The client key for a principal id, if the principal exists.
    async fn find(&self, principal_id: &str) -> Option<String>;
}

/// Trusts the token: every verified principal id exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenPrincipals;

#[async_trait]
impl PrincipalStore for TokenPrincipals {
    async fn find(&self, principal_id: &str) -> Option<String> {
        Some(principal_id.to_string())
    }
}

/// A fixed set of principal ids.
#[derive(Debug, Default, Clone)]
pub struct StaticPrincipals {
    ids: BTreeSet<String>,
}

impl StaticPrincipals {
    /// Create a directory of the given ids.
    pub fn new(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PrincipalStore for StaticPrincipals {
    async fn find(&self, principal_id: &str) -> Option<String> {
        self.ids.get(principal_id).cloned()
    }
}

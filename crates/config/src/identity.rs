//! Client identity resolution settings.

use std::collections::BTreeSet;

use secrecy::SecretString;
use serde::Deserialize;

/// How a stable client key is derived from a request.
///
/// A verified bearer credential resolves to its principal id. Anything else
/// (no credential, an unverifiable one, an unknown principal) falls back to
/// the caller's network address.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// HS256 secret used to verify access tokens. Credentials are ignored when unset.
    pub jwt_secret: Option<SecretString>,
    /// Header carrying the JSON credential envelope `{"access_token": "..."}`.
    pub token_header: String,
    /// Claim holding the principal id. Dotted paths address nested claims.
    pub principal_claim: String,
    /// Known principal ids. When unset, every verified token names a valid principal.
    pub principals: Option<BTreeSet<String>>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_header: "token".to_string(),
            principal_claim: "userId".to_string(),
            principals: None,
        }
    }
}

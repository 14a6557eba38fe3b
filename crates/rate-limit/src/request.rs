//! Request information for admission control.

/// What the admission pipeline needs to know about a request.
#[derive(Debug, Clone)]
pub struct RateLimitRequest {
    /// Stable identity of the caller: a principal id or a network address.
    pub client_key: String,
    /// Request path, used to pick the policy category.
    pub path: String,
}

impl RateLimitRequest {
    /// Describe a request. An empty client key is replaced by `unknown`.
    pub fn new(client_key: impl Into<String>, path: impl Into<String>) -> Self {
        let mut client_key = client_key.into();

        if client_key.is_empty() {
            client_key.push_str("unknown");
        }

        Self {
            client_key,
            path: path.into(),
        }
    }
}

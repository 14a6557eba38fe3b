//! Token bucket parameters per request category.

use config::{AdmissionConfig, DEFAULT_CATEGORY};

use crate::error::RateLimitError;

/// Token bucket parameters for one request category.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    category: String,
    capacity: u32,
    refill_rate: f64,
}

impl Policy {
    /// Create a policy, rejecting parameters a bucket cannot work with.
    pub fn new(category: impl Into<String>, capacity: u32, refill_rate: f64) -> Result<Self, RateLimitError> {
        let category = category.into();

        if capacity == 0 {
            return Err(RateLimitError::InvalidPolicy {
                category,
                reason: "capacity must be at least 1".to_string(),
            });
        }

        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(RateLimitError::InvalidPolicy {
                category,
                reason: format!("refill rate {refill_rate} must be a positive number"),
            });
        }

        Ok(Self {
            category,
            capacity,
            refill_rate,
        })
    }

    /// Category name, also part of the bucket key.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Maximum number of tokens.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

/// Immutable mapping from request path to policy.
///
/// The longest matching path prefix wins; unmatched paths get the default policy.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    // Sorted by descending prefix length.
    routes: Vec<(String, Policy)>,
    default: Policy,
}

impl PolicyRegistry {
    /// Build the registry from explicit routes.
    pub fn new(routes: impl IntoIterator<Item = (String, Policy)>, default: Policy) -> Self {
        let mut routes: Vec<_> = routes.into_iter().collect();
        routes.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        Self { routes, default }
    }

    /// Build the registry from the admission configuration.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self, RateLimitError> {
        let routes = config
            .policies
            .iter()
            .map(|(name, policy)| {
                let resolved = Policy::new(name.as_str(), policy.capacity, policy.refill_rate())?;
                Ok((policy.path_prefix.clone(), resolved))
            })
            .collect::<Result<Vec<_>, RateLimitError>>()?;

        let default = Policy::new(
            DEFAULT_CATEGORY,
            config.default_policy.capacity,
            config.default_policy.refill_rate(),
        )?;

        Ok(Self::new(routes, default))
    }

    /// The policy for a request path.
    pub fn resolve(&self, path: &str) -> &Policy {
        self.routes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, policy)| policy)
            .unwrap_or(&self.default)
    }

    /// Policies of the path-matched categories, longest prefix first.
    pub fn categories(&self) -> impl Iterator<Item = &Policy> {
        self.routes.iter().map(|(_, policy)| policy)
    }
}

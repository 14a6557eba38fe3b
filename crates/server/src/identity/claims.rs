use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Access token claims. Everything but `sub` is kept as raw JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomClaims {
    /// Subject claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// All other claims.
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

impl CustomClaims {
    /// Read a claim by path. Dotted paths address nested objects, e.g. `user.id`.
    ///
    /// Strings, numbers and booleans are returned as strings. Empty strings,
    /// objects, arrays and nulls count as missing.
    pub fn get_claim(&self, path: &str) -> Option<String> {
        if path == "sub" {
            return self.sub.clone().filter(|sub| !sub.is_empty());
        }

        let mut parts = path.split('.');
        let mut current = self.additional.get(parts.next()?)?;

        for part in parts {
            current = current.as_object()?.get(part)?;
        }

        match current {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

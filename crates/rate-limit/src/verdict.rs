//! Outcome of an admission check.

use serde::Serialize;

use crate::block::BlockDuration;

/// The decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the request. Allow-listed clients carry no headers.
    Allowed(Option<RateLimitHeaders>),
    /// Reject the request.
    Denied(Denial),
}

impl Verdict {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed(_))
    }
}

/// Quota information reported on admitted requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Capacity of the applied policy.
    pub limit: u32,
    /// Whole tokens left after this request.
    pub remaining: u32,
    /// Approximate reset time in epoch milliseconds.
    pub reset_at_ms: u64,
}

impl RateLimitHeaders {
    /// The reset time as an RFC 3339 timestamp with millisecond precision.
    pub fn reset(&self) -> String {
        format_timestamp(self.reset_at_ms)
    }
}

/// Epoch milliseconds as RFC 3339, e.g. `2023-11-14T22:14:20.000Z`.
pub(crate) fn format_timestamp(ms: u64) -> String {
    let timestamp = i64::try_from(ms)
        .ok()
        .and_then(|ms| jiff::Timestamp::from_millisecond(ms).ok());

    match timestamp {
        Some(timestamp) => format!("{timestamp:.3}"),
        None => ms.to_string(),
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DenialReason {
    /// The client is on the deny list.
    Blacklisted,
    /// The client is blocked for good.
    Permanent,
    /// The client is blocked for a while.
    Temporary,
    /// The gateway as a whole is over its admission ceiling.
    Overloaded,
}

impl DenialReason {
    /// The reason as it appears in response bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::Blacklisted => "blacklisted",
            DenialReason::Permanent => "permanent",
            DenialReason::Temporary => "temporary",
            DenialReason::Overloaded => "overloaded",
        }
    }
}

/// A rejection, serialized as the response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    /// Human readable explanation.
    #[serde(rename = "error")]
    pub message: String,
    /// Machine readable reason.
    #[serde(rename = "type")]
    pub reason: DenialReason,
    /// Minutes until the client may retry, when known.
    #[serde(rename = "remainingMinutes", skip_serializing_if = "Option::is_none")]
    pub remaining_minutes: Option<u64>,
}

impl Denial {
    pub(crate) fn blacklisted() -> Self {
        Self {
            message: "Access denied".to_string(),
            reason: DenialReason::Blacklisted,
            remaining_minutes: None,
        }
    }

    pub(crate) fn permanently_blocked() -> Self {
        Self {
            message: "You are permanently blocked".to_string(),
            reason: DenialReason::Permanent,
            remaining_minutes: None,
        }
    }

    pub(crate) fn temporarily_blocked(remaining_minutes: u64) -> Self {
        Self {
            message: format!("You are temporarily blocked for {remaining_minutes} min"),
            reason: DenialReason::Temporary,
            remaining_minutes: Some(remaining_minutes),
        }
    }

    pub(crate) fn overloaded() -> Self {
        Self {
            message: "Server overloaded, try later".to_string(),
            reason: DenialReason::Overloaded,
            remaining_minutes: None,
        }
    }

    pub(crate) fn rate_limit_exceeded(category: &str, block: BlockDuration) -> Self {
        match block.minutes() {
            Some(minutes) => Self {
                message: format!("Rate limit exceeded for {category}. You are blocked for {minutes} min"),
                reason: DenialReason::Temporary,
                remaining_minutes: Some(minutes),
            },
            None => Self::permanently_blocked(),
        }
    }

    /// HTTP status code for this denial.
    pub fn status_code(&self) -> u16 {
        match self.reason {
            DenialReason::Overloaded => 503,
            DenialReason::Blacklisted | DenialReason::Permanent | DenialReason::Temporary => 429,
        }
    }

    /// Seconds until the client may retry, when known.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.remaining_minutes.map(|minutes| minutes * 60)
    }
}

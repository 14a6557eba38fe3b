//! Process-independent admission ceiling.

use std::time::Duration;

use crate::storage::{RemoteStore, StateStore};

const GLOBAL_KEY: &str = "global_rate_limit";
const WINDOW: Duration = Duration::from_secs(1);

/// Caps the number of requests admitted per one-second window, across all clients.
///
/// Windows are fixed: the counter starts with the first request after the
/// previous window expired and is shared by every gateway instance using the
/// same store.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GlobalLimiter {
    limit: u64,
}

impl GlobalLimiter {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            limit: u64::from(limit),
        }
    }

    /// Count one request. Returns false if it went over the ceiling.
    pub(crate) async fn admit<R: RemoteStore>(&self, store: &StateStore<R>) -> bool {
        store.increment(GLOBAL_KEY, WINDOW).await <= self.limit
    }
}

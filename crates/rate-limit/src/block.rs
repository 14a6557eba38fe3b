//! Progressive blocking of clients that keep exhausting their quota.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RateLimitError;
use crate::storage::{RemoteStore, StateStore};

/// Length of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDuration {
    /// Blocked for a fixed time.
    Timed(Duration),
    /// Blocked until the record is removed by hand.
    Permanent,
}

/// Block length by offense number: the first offense gets the first entry,
/// anything past the end gets the last one.
pub const ESCALATION_SCHEDULE: [BlockDuration; 5] = [
    BlockDuration::Timed(Duration::from_secs(15 * 60)),
    BlockDuration::Timed(Duration::from_secs(30 * 60)),
    BlockDuration::Timed(Duration::from_secs(60 * 60)),
    BlockDuration::Timed(Duration::from_secs(24 * 60 * 60)),
    BlockDuration::Permanent,
];

impl BlockDuration {
    /// The block length for the given offense number, starting at 1.
    pub fn for_offense(count: u32) -> Self {
        let index = (count.max(1) as usize - 1).min(ESCALATION_SCHEDULE.len() - 1);
        ESCALATION_SCHEDULE[index]
    }

    /// Length in whole minutes, rounded up. `None` when permanent.
    pub fn minutes(&self) -> Option<u64> {
        match self {
            BlockDuration::Timed(duration) => Some(minutes_ceil(duration.as_millis() as u64)),
            BlockDuration::Permanent => None,
        }
    }
}

/// Punitive suspension state of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Number of consecutive offenses, at least 1.
    pub count: u32,
    /// End of the block in epoch milliseconds. `None` for a permanent block.
    #[serde(with = "expires")]
    pub expires: Option<u64>,
}

/// What a block record means at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Every request is rejected.
    Permanent,
    /// Requests are rejected for the remaining time.
    Active {
        /// Time until the block ends.
        remaining: Duration,
    },
    /// The block has ended. The record only serves to escalate the next offense.
    Lapsed,
}

impl BlockStatus {
    /// Remaining block time in whole minutes, rounded up.
    pub fn remaining_minutes(&self) -> Option<u64> {
        match self {
            BlockStatus::Active { remaining } => Some(minutes_ceil(remaining.as_millis() as u64)),
            BlockStatus::Permanent | BlockStatus::Lapsed => None,
        }
    }
}

impl BlockRecord {
    /// Store key of a client's block record.
    pub fn key(client_key: &str) -> String {
        format!("block:{client_key}")
    }

    /// The record for a new offense, following `previous` if it is still stored.
    pub fn escalate(previous: Option<&BlockRecord>, now_ms: u64) -> Self {
        let count = match previous {
            Some(previous) => previous.count.saturating_add(1).min(ESCALATION_SCHEDULE.len() as u32),
            None => 1,
        };

        let expires = match BlockDuration::for_offense(count) {
            BlockDuration::Timed(duration) => Some(now_ms + duration.as_millis() as u64),
            BlockDuration::Permanent => None,
        };

        Self { count, expires }
    }

    /// Block length of this record's offense.
    pub fn duration(&self) -> BlockDuration {
        BlockDuration::for_offense(self.count)
    }

    /// Whether the block is in force at `now_ms`.
    pub fn status(&self, now_ms: u64) -> BlockStatus {
        match self.expires {
            None => BlockStatus::Permanent,
            Some(expires) if now_ms < expires => BlockStatus::Active {
                remaining: Duration::from_millis(expires - now_ms),
            },
            Some(_) => BlockStatus::Lapsed,
        }
    }
}

fn minutes_ceil(ms: u64) -> u64 {
    ms.div_ceil(60_000)
}

/// Read a client's block record. Corrupt records are treated as absent.
pub(crate) async fn lookup<R: RemoteStore>(store: &StateStore<R>, client_key: &str) -> Option<BlockRecord> {
    let key = BlockRecord::key(client_key);
    let raw = store.get(&key).await?;

    match serde_json::from_str(&raw) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("Ignoring corrupt block record '{key}': {e}");
            None
        }
    }
}

/// Record a new offense and store the resulting block.
///
/// The record expires together with the block, extended by `offense_memory`.
/// Once it is gone, the next offense starts over from the first tier.
pub(crate) async fn escalate<R: RemoteStore>(
    store: &StateStore<R>,
    client_key: &str,
    previous: Option<&BlockRecord>,
    now_ms: u64,
    offense_memory: Duration,
) -> Result<BlockRecord, RateLimitError> {
    let record = BlockRecord::escalate(previous, now_ms);

    let ttl = match record.duration() {
        BlockDuration::Timed(duration) => Some(duration + offense_memory),
        BlockDuration::Permanent => None,
    };

    let encoded = serde_json::to_string(&record).map_err(|source| RateLimitError::Encode { kind: "block", source })?;
    store.set(&BlockRecord::key(client_key), &encoded, ttl).await;

    Ok(record)
}

/// Permanent blocks are stored as `-1`.
mod expires {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(expires: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match expires {
            Some(ms) => serializer.serialize_u64(*ms),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let value = Option::<i64>::deserialize(deserializer)?;
        Ok(value.and_then(|ms| u64::try_from(ms).ok()))
    }
}

//! The admission pipeline.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use config::AdmissionConfig;
use telemetry::metrics::{ADMISSION_DURATION, Recorder};

use crate::block::{self, BlockStatus};
use crate::bucket::{self, Consumption};
use crate::clock::SystemClock;
use crate::error::RateLimitError;
use crate::global::GlobalLimiter;
use crate::metrics::AdmissionMetrics;
use crate::policy::{Policy, PolicyRegistry};
use crate::request::RateLimitRequest;
use crate::storage::{RedisStore, RemoteStore, StateStore};
use crate::verdict::{Denial, RateLimitHeaders, Verdict, format_timestamp};

/// Decides whether requests are admitted.
///
/// Checks run in a fixed order and stop at the first one that decides:
///
/// 1. allow list: admitted, nothing is counted
/// 2. deny list: rejected as blacklisted
/// 3. block record: rejected while the block is in force
/// 4. global ceiling: rejected as overloaded
/// 5. token bucket: admitted if a token is left, otherwise the client is
///    blocked for the next tier of the escalation schedule
///
/// Offense counting follows the block record, which expires with the block
/// (plus the configured offense memory). A client that waits for its record
/// to expire starts over from the first tier.
pub struct RateLimitManager<R = RedisStore> {
    enabled: bool,
    store: StateStore<R>,
    policies: PolicyRegistry,
    allow_list: BTreeSet<String>,
    deny_list: BTreeSet<String>,
    global: GlobalLimiter,
    bucket_ttl: Duration,
    offense_memory: Duration,
    metrics: AdmissionMetrics,
}

impl RateLimitManager<RedisStore> {
    /// Create a manager with the storage backend from the configuration.
    pub fn new(config: &AdmissionConfig) -> Result<Self, RateLimitError> {
        let store = StateStore::from_config(&config.storage, Arc::new(SystemClock))?;
        Self::with_store(config, store)
    }
}

impl<R: RemoteStore> RateLimitManager<R> {
    /// Create a manager on top of an existing store.
    pub fn with_store(config: &AdmissionConfig, store: StateStore<R>) -> Result<Self, RateLimitError> {
        if config.enabled && config.offense_memory.is_zero() {
            log::info!(
                "Block records expire with their block: a client offending again after a block has ended \
                 starts over at 15 minutes. Set admission.offense_memory to keep escalating."
            );
        }

        Ok(Self {
            enabled: config.enabled,
            store,
            policies: PolicyRegistry::from_config(config)?,
            allow_list: config.allow_list.clone(),
            deny_list: config.deny_list.clone(),
            global: GlobalLimiter::new(config.global_limit),
            bucket_ttl: config.bucket_ttl,
            offense_memory: config.offense_memory,
            metrics: AdmissionMetrics::new(),
        })
    }

    /// Whether admission control is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The policies requests are checked against.
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// The state store backing the pipeline.
    pub fn store(&self) -> &StateStore<R> {
        &self.store
    }

    /// Decide whether a request is admitted.
    ///
    /// Store outages never surface here. An error means a record could not
    /// be encoded, and the request should be failed.
    pub async fn check_request(&self, request: &RateLimitRequest) -> Result<Verdict, RateLimitError> {
        if !self.enabled {
            return Ok(Verdict::Allowed(None));
        }

        let policy = self.policies.resolve(&request.path);

        let mut recorder = Recorder::new(ADMISSION_DURATION);
        recorder.push_attribute("category", policy.category().to_string());

        let result = self.evaluate(&request.client_key, policy).await;

        match &result {
            Ok((_, decision)) => self.metrics.record(*decision, policy.category()),
            Err(_) => self.metrics.record("error", policy.category()),
        }

        recorder.record();

        result.map(|(verdict, _)| verdict)
    }

    async fn evaluate(&self, client: &str, policy: &Policy) -> Result<(Verdict, &'static str), RateLimitError> {
        let category = policy.category();

        if self.allow_list.contains(client) {
            log::debug!("[WHITELISTED] User: {client}, API: {category} bypassing rate limit");
            return Ok((Verdict::Allowed(None), "whitelisted"));
        }

        if self.deny_list.contains(client) {
            log::warn!("[BLACKLISTED] User: {client}, API: {category} blocked");
            return Ok((Verdict::Denied(Denial::blacklisted()), "blacklisted"));
        }

        let now = self.store.now_ms().await;
        let existing_block = block::lookup(&self.store, client).await;

        if let Some(record) = &existing_block {
            match record.status(now) {
                BlockStatus::Permanent => {
                    log::warn!("[BLOCKED] User: {client}, API: {category} permanently blocked");
                    return Ok((Verdict::Denied(Denial::permanently_blocked()), "blocked"));
                }
                status @ BlockStatus::Active { .. } => {
                    let minutes = status.remaining_minutes().unwrap_or(1);
                    log::warn!("[BLOCKED] User: {client}, API: {category} blocked temporarily for {minutes} min");

                    return Ok((Verdict::Denied(Denial::temporarily_blocked(minutes)), "blocked"));
                }
                BlockStatus::Lapsed => (),
            }
        }

        if !self.global.admit(&self.store).await {
            log::warn!("[GLOBAL_LIMIT] User: {client}, API: {category} Server overloaded");
            return Ok((Verdict::Denied(Denial::overloaded()), "overloaded"));
        }

        match bucket::consume(&self.store, client, policy, now, self.bucket_ttl).await? {
            Consumption::Taken { remaining, reset_at_ms } => {
                let headers = RateLimitHeaders {
                    limit: policy.capacity(),
                    remaining,
                    reset_at_ms,
                };

                Ok((Verdict::Allowed(Some(headers)), "allowed"))
            }
            Consumption::Exhausted => {
                let record = block::escalate(
                    &self.store,
                    client,
                    existing_block.as_ref(),
                    now,
                    self.offense_memory,
                )
                .await?;

                let until = record.expires.map(format_timestamp);

                log::warn!(
                    "[RATE_LIMIT_EXCEEDED] User: {client}, API: {category} Offense={}, blocked until {}",
                    record.count,
                    until.as_deref().unwrap_or("permanent"),
                );

                let denial = Denial::rate_limit_exceeded(category, record.duration());

                Ok((Verdict::Denied(denial), "rate_limited"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use config::{PolicyConfig, QuotaConfig};

    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::testing::FakeRemote;
    use crate::verdict::DenialReason;

    const NOW: u64 = 1_700_000_000_000;
    const RECOVERY: Duration = Duration::from_secs(1);

    struct Harness {
        manager: RateLimitManager<FakeRemote>,
        remote: FakeRemote,
        clock: ManualClock,
    }

    impl Harness {
        async fn check(&self, client: &str, path: &str) -> Verdict {
            self.manager
                .check_request(&RateLimitRequest::new(client, path))
                .await
                .unwrap()
        }

        /// Send `count` requests and return the remaining-token header of each admitted one.
        async fn drain(&self, client: &str, path: &str, count: usize) -> Vec<u32> {
            let mut remaining = Vec::new();

            for _ in 0..count {
                match self.check(client, path).await {
                    Verdict::Allowed(Some(headers)) => remaining.push(headers.remaining),
                    other => unreachable!("expected an admitted request, got {other:?}"),
                }
            }

            remaining
        }

        fn advance(&self, by: Duration) {
            self.clock.advance(by);
        }
    }

    fn admission_config() -> AdmissionConfig {
        let mut policies = BTreeMap::new();

        policies.insert(
            "auth".to_string(),
            PolicyConfig {
                path_prefix: "/auth".to_string(),
                capacity: 10,
                refill_rate: None,
            },
        );

        policies.insert(
            "single".to_string(),
            PolicyConfig {
                path_prefix: "/single".to_string(),
                capacity: 1,
                refill_rate: None,
            },
        );

        AdmissionConfig {
            policies,
            default_policy: QuotaConfig {
                capacity: 20,
                refill_rate: None,
            },
            allow_list: ["trusted".to_string(), "both".to_string()].into(),
            deny_list: ["banned".to_string(), "both".to_string()].into(),
            ..AdmissionConfig::default()
        }
    }

    fn harness_with(config: AdmissionConfig) -> Harness {
        let clock = ManualClock::new(NOW);
        let remote = FakeRemote::new(Arc::new(clock.clone()));
        let store = StateStore::with_remote(remote.clone(), Arc::new(clock.clone()), Duration::from_secs(1), RECOVERY);
        let manager = RateLimitManager::with_store(&config, store).unwrap();

        Harness { manager, remote, clock }
    }

    fn harness() -> Harness {
        harness_with(admission_config())
    }

    fn denial(verdict: Verdict) -> Denial {
        match verdict {
            Verdict::Denied(denial) => denial,
            Verdict::Allowed(_) => unreachable!("expected a denial"),
        }
    }

    #[tokio::test]
    async fn ten_requests_then_a_fifteen_minute_block() {
        let harness = harness();

        assert_eq!(harness.drain("client", "/auth/login", 10).await, vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);

        let denial = denial(harness.check("client", "/auth/login").await);

        insta::assert_json_snapshot!(denial, @r#"
        {
          "error": "Rate limit exceeded for auth. You are blocked for 15 min",
          "type": "temporary",
          "remainingMinutes": 15
        }
        "#);

        let denial = self::denial(harness.check("client", "/auth/login").await);
        assert_eq!(denial.message, "You are temporarily blocked for 15 min");

        // The block lapses at its end. The record is still stored at that
        // instant, so the next exhaustion escalates.
        harness.advance(Duration::from_secs(15 * 60));
        harness.drain("client", "/auth/login", 10).await;

        let denial = self::denial(harness.check("client", "/auth/login").await);
        assert_eq!(denial.remaining_minutes, Some(30));
    }

    #[tokio::test]
    async fn headers_report_the_policy() {
        let harness = harness();

        let Verdict::Allowed(Some(headers)) = harness.check("client", "/users").await else {
            unreachable!("expected headers");
        };

        assert_eq!(headers.limit, 20);
        assert_eq!(headers.remaining, 19);
        assert_eq!(headers.reset_at_ms, NOW + 60_000);
    }

    #[tokio::test]
    async fn escalation_follows_the_schedule() {
        let harness = harness();
        let mut observed = Vec::new();

        for _ in 0..6 {
            // At the boundary of the previous block a single token has refilled.
            if let Verdict::Allowed(_) = harness.check("client", "/single").await {
                let denial = denial(harness.check("client", "/single").await);
                observed.push(denial.remaining_minutes);

                if let Some(minutes) = denial.remaining_minutes {
                    harness.advance(Duration::from_secs(minutes * 60));
                }
            } else {
                observed.push(denial(harness.check("client", "/single").await).remaining_minutes);
            }
        }

        assert_eq!(
            observed,
            vec![Some(15), Some(30), Some(60), Some(1440), None, None]
        );
    }

    #[tokio::test]
    async fn permanent_block_sticks() {
        let harness = harness();

        harness.remote.data().set("block:client", r#"{"count":5,"expires":-1}"#.to_string(), None);

        for _ in 0..3 {
            harness.advance(Duration::from_secs(365 * 24 * 3600));

            let denial = denial(harness.check("client", "/users").await);
            assert_eq!(denial.reason, DenialReason::Permanent);
            assert_eq!(denial.message, "You are permanently blocked");
        }
    }

    #[tokio::test]
    async fn allow_list_wins_and_leaves_no_state() {
        let harness = harness();

        for _ in 0..50 {
            assert_eq!(harness.check("both", "/single").await, Verdict::Allowed(None));
            assert_eq!(harness.check("trusted", "/single").await, Verdict::Allowed(None));
        }

        assert!(harness.remote.data().is_empty());
        assert_eq!(harness.remote.calls(), 0);
    }

    #[tokio::test]
    async fn deny_list_rejects_without_touching_state() {
        let harness = harness();

        let denial = denial(harness.check("banned", "/users").await);

        assert_eq!(denial.reason, DenialReason::Blacklisted);
        assert_eq!(denial.message, "Access denied");
        assert_eq!(denial.status_code(), 429);
        assert!(harness.remote.data().is_empty());
    }

    #[tokio::test]
    async fn outage_is_transparent_and_recovery_resets_history() {
        let harness = harness();
        harness.remote.set_down(true);

        assert_eq!(harness.drain("client", "/auth", 10).await, vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(denial(harness.check("client", "/auth").await).remaining_minutes, Some(15));

        assert!(!harness.manager.store().is_remote_available());
        assert!(harness.remote.data().is_empty());

        harness.remote.set_down(false);
        harness.advance(RECOVERY);

        // Local history is dropped on recovery, including the block.
        assert_eq!(harness.drain("client", "/auth", 1).await, vec![9]);
        assert!(harness.manager.store().is_remote_available());
        assert!(harness.manager.store().local().is_empty());
    }

    #[tokio::test]
    async fn global_ceiling_rejects_as_overloaded() {
        let harness = harness_with(AdmissionConfig {
            global_limit: 3,
            ..admission_config()
        });

        for client in ["a", "b", "c"] {
            assert!(harness.check(client, "/users").await.is_allowed());
        }

        let denial = denial(harness.check("d", "/users").await);
        assert_eq!(denial.reason, DenialReason::Overloaded);
        assert_eq!(denial.status_code(), 503);

        harness.advance(Duration::from_millis(1001));
        assert!(harness.check("d", "/users").await.is_allowed());
    }

    #[tokio::test]
    async fn blocked_clients_do_not_count_against_the_ceiling() {
        let harness = harness_with(AdmissionConfig {
            global_limit: 3,
            ..admission_config()
        });

        harness.check("abuser", "/single").await;
        harness.check("abuser", "/single").await;
        harness.advance(Duration::from_secs(2));

        for _ in 0..10 {
            assert!(!harness.check("abuser", "/single").await.is_allowed());
        }

        assert_eq!(harness.remote.data().get("global_rate_limit"), None);

        for client in ["a", "b", "c"] {
            assert!(harness.check(client, "/users").await.is_allowed());
        }
    }

    #[tokio::test]
    async fn disabled_admission_allows_everything() {
        let harness = harness_with(AdmissionConfig {
            enabled: false,
            ..admission_config()
        });

        assert_eq!(harness.check("banned", "/users").await, Verdict::Allowed(None));
        assert_eq!(harness.remote.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_burst_overshoot_is_bounded() {
        let harness = Arc::new(harness());
        let burst = 50;

        // Every bucket read lands before the first write.
        harness.remote.set_delay(Duration::from_millis(20));

        let tasks: Vec<_> = (0..burst)
            .map(|_| {
                let harness = harness.clone();
                tokio::spawn(async move { harness.check("client", "/auth").await.is_allowed() })
            })
            .collect();

        let mut allowed = 0;

        for task in futures::future::join_all(tasks).await {
            if task.unwrap() {
                allowed += 1;
            }
        }

        // Overlapping read-modify-writes hand out extra tokens, at most one per request in flight.
        assert!(allowed > 10, "allowed {allowed}");
        assert!(allowed <= burst, "allowed {allowed}");
    }
}

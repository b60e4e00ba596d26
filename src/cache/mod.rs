//! Result Cache (C4): content-addressed, TTL-bounded, single-flight cache
//! of completed `AIResult`s.
//!
//! No direct teacher analog exists for single-flight; the locking shape
//! (serialize writers per key, admit concurrent readers) follows the
//! "wrap a resource, serialize access" idiom used for the rate limiter and
//! OCR backend registry elsewhere in the pack.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::{broadcast, Mutex};

use crate::error::CacheError;
use crate::model::{AIResult, PromptFingerprint};

struct Entry {
    result: Arc<AIResult>,
    inserted_at: Instant,
    ttl: Duration,
    byte_size: usize,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > self.ttl
    }
}

/// A single-flight slot: either a leader is computing the result (the
/// receiver side of the broadcast channel is how followers wait for it),
/// or nobody is.
enum FlightState {
    InFlight(broadcast::Sender<FlightOutcome>),
}

#[derive(Clone)]
enum FlightOutcome {
    Ready(Arc<AIResult>),
    LeaderFailed,
}

struct Inner {
    entries: LruCache<PromptFingerprint, Entry>,
    in_flight: HashMap<PromptFingerprint, FlightState>,
    total_bytes: usize,
    max_bytes: usize,
}

pub struct ResultCache {
    inner: Mutex<Inner>,
}

/// RAII-ish guard returned to the single-flight leader; call `complete` or
/// `fail` exactly once. Dropping without either leaves any waiting
/// followers to observe `LeaderFailed` (the drop of the broadcast sender).
pub struct LeaderGuard {
    cache: Arc<ResultCache>,
    fingerprint: PromptFingerprint,
    settled: bool,
}

impl LeaderGuard {
    pub async fn complete(mut self, result: Arc<AIResult>, ttl: Duration, byte_size: usize) {
        self.settled = true;
        self.cache
            .finish_flight(self.fingerprint, Some((result, ttl, byte_size)))
            .await;
    }

    pub async fn fail(mut self) {
        self.settled = true;
        self.cache.finish_flight(self.fingerprint, None).await;
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.settled {
            // Cancelled without completing: caller is expected to call
            // `fail()` explicitly before dropping in the cancellation path,
            // but this is a safety net so followers are never left hanging
            // forever. Best-effort only, since Drop cannot be async.
            let cache = self.cache.clone();
            let fingerprint = self.fingerprint;
            tokio::spawn(async move {
                cache.finish_flight(fingerprint, None).await;
            });
        }
    }
}

pub enum Lookup {
    Hit(Arc<AIResult>),
    /// Caller became the single-flight leader and must call `complete`/`fail`.
    Lead(LeaderGuard),
    /// Another caller is already computing this fingerprint; waits here.
    Followed(Arc<AIResult>),
}

impl ResultCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
                total_bytes: 0,
                max_bytes,
            }),
        }
    }

    /// Returns a cached value, or joins/starts a single-flight computation.
    pub async fn get_or_lead(self: &Arc<Self>, fingerprint: PromptFingerprint) -> Lookup {
        let mut guard = self.inner.lock().await;

        if let Some(entry) = guard.entries.get(&fingerprint) {
            if !entry.is_expired(Instant::now()) {
                return Lookup::Hit(entry.result.clone());
            }
            guard.entries.pop(&fingerprint);
        }

        if let Some(FlightState::InFlight(sender)) = guard.in_flight.get(&fingerprint) {
            let mut receiver = sender.subscribe();
            drop(guard);
            match receiver.recv().await {
                Ok(FlightOutcome::Ready(result)) => return Lookup::Followed(result),
                _ => {
                    // Leader failed or was dropped with no result. Every
                    // waiting follower wakes up here at once, so leadership
                    // must be claimed, not assumed: only the first one to
                    // re-acquire the lock and find the slot empty leads; the
                    // rest find that follower's fresh slot and queue behind it.
                    return self.claim_leadership(fingerprint).await;
                }
            }
        }

        let (sender, _) = broadcast::channel(1);
        guard.in_flight.insert(fingerprint, FlightState::InFlight(sender));
        drop(guard);

        Lookup::Lead(LeaderGuard {
            cache: self.clone(),
            fingerprint,
            settled: false,
        })
    }

    /// Re-checks the cache and in-flight slot under the lock and either
    /// claims leadership (if the slot is free) or queues behind whoever
    /// claimed it first, retrying if that leader also fails. Used after a
    /// leader fails, when multiple followers may race to replace it.
    async fn claim_leadership(self: &Arc<Self>, fingerprint: PromptFingerprint) -> Lookup {
        loop {
            let mut guard = self.inner.lock().await;

            if let Some(entry) = guard.entries.get(&fingerprint) {
                if !entry.is_expired(Instant::now()) {
                    return Lookup::Hit(entry.result.clone());
                }
                guard.entries.pop(&fingerprint);
            }

            match guard.in_flight.get(&fingerprint) {
                Some(FlightState::InFlight(sender)) => {
                    let mut receiver = sender.subscribe();
                    drop(guard);
                    match receiver.recv().await {
                        Ok(FlightOutcome::Ready(result)) => return Lookup::Followed(result),
                        _ => continue,
                    }
                }
                None => {
                    let (sender, _) = broadcast::channel(1);
                    guard.in_flight.insert(fingerprint, FlightState::InFlight(sender));
                    drop(guard);
                    return Lookup::Lead(LeaderGuard {
                        cache: self.clone(),
                        fingerprint,
                        settled: false,
                    });
                }
            }
        }
    }

    async fn finish_flight(
        &self,
        fingerprint: PromptFingerprint,
        outcome: Option<(Arc<AIResult>, Duration, usize)>,
    ) {
        let mut guard = self.inner.lock().await;

        let broadcast_outcome = match &outcome {
            Some((result, ttl, byte_size)) => {
                self.insert_locked(&mut guard, fingerprint, result.clone(), *ttl, *byte_size);
                FlightOutcome::Ready(result.clone())
            }
            None => FlightOutcome::LeaderFailed,
        };

        if let Some(FlightState::InFlight(sender)) = guard.in_flight.remove(&fingerprint) {
            let _ = sender.send(broadcast_outcome);
        }
    }

    fn insert_locked(
        &self,
        guard: &mut Inner,
        fingerprint: PromptFingerprint,
        result: Arc<AIResult>,
        ttl: Duration,
        byte_size: usize,
    ) {
        while guard.total_bytes + byte_size > guard.max_bytes {
            match guard.entries.pop_lru() {
                Some((_, evicted)) => guard.total_bytes -= evicted.byte_size,
                None => break,
            }
        }
        if let Some(evicted) = guard.entries.put(
            fingerprint,
            Entry {
                result,
                inserted_at: Instant::now(),
                ttl,
                byte_size,
            },
        ) {
            guard.total_bytes -= evicted.byte_size;
        }
        guard.total_bytes += byte_size;
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

/// Convenience error used by callers that want a plain `Result` instead of
/// matching on `Lookup` (e.g. tests that don't exercise single-flight).
pub fn leader_cancelled() -> CacheError {
    CacheError::LeaderCancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelTier, TaskKind};
    use chrono::Utc;

    fn fingerprint(byte: u8) -> PromptFingerprint {
        PromptFingerprint([byte; 32])
    }

    fn sample_result() -> Arc<AIResult> {
        Arc::new(AIResult {
            task_kind: TaskKind::AnalyzeRisk,
            tier: ModelTier::Balanced,
            raw_text: "raw".to_string(),
            parsed: serde_json::json!({"risk_score": 0.1}),
            confidence: 0.9,
            tokens_in: 10,
            tokens_out: 5,
            latency_ms: 42,
            fingerprint: fingerprint(1),
            completed_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn miss_then_store_then_hit() {
        let cache = Arc::new(ResultCache::new(10, 1_000_000));
        let fp = fingerprint(1);

        match cache.get_or_lead(fp).await {
            Lookup::Lead(guard) => {
                guard
                    .complete(sample_result(), Duration::from_secs(60), 100)
                    .await;
            }
            _ => panic!("expected to lead on first lookup"),
        }

        match cache.get_or_lead(fp).await {
            Lookup::Hit(result) => assert_eq!(result.raw_text, "raw"),
            _ => panic!("expected cache hit"),
        }
    }

    #[tokio::test]
    async fn expired_entry_is_not_served() {
        let cache = Arc::new(ResultCache::new(10, 1_000_000));
        let fp = fingerprint(2);
        match cache.get_or_lead(fp).await {
            Lookup::Lead(guard) => {
                guard
                    .complete(sample_result(), Duration::from_millis(1), 10)
                    .await;
            }
            _ => panic!(),
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        match cache.get_or_lead(fp).await {
            Lookup::Lead(_) => {}
            _ => panic!("expired entry must not be served as a hit"),
        }
    }

    #[tokio::test]
    async fn followers_share_leaders_result() {
        let cache = Arc::new(ResultCache::new(10, 1_000_000));
        let fp = fingerprint(3);

        let leader = match cache.get_or_lead(fp).await {
            Lookup::Lead(guard) => guard,
            _ => panic!(),
        };

        let cache2 = cache.clone();
        let follower = tokio::spawn(async move { cache2.get_or_lead(fp).await });

        tokio::task::yield_now().await;
        leader
            .complete(sample_result(), Duration::from_secs(60), 10)
            .await;

        match follower.await.unwrap() {
            Lookup::Followed(result) => assert_eq!(result.raw_text, "raw"),
            _ => panic!("expected follower to receive leader's result"),
        }
    }

    #[tokio::test]
    async fn exactly_one_follower_is_promoted_when_the_leader_fails() {
        use tokio::task::JoinSet;

        let cache = Arc::new(ResultCache::new(10, 1_000_000));
        let fp = fingerprint(4);

        let leader = match cache.get_or_lead(fp).await {
            Lookup::Lead(guard) => guard,
            _ => panic!(),
        };

        let mut set = JoinSet::new();
        for _ in 0..3 {
            let cache = cache.clone();
            set.spawn(async move { cache.get_or_lead(fp).await });
        }
        tokio::task::yield_now().await;
        leader.fail().await;

        // Only the promoted leader can finish without further input, so it
        // is always the first to resolve; completing it unblocks the other
        // two, which then resolve as `Followed`.
        let mut leads = 0;
        let mut followed = 0;
        while let Some(result) = set.join_next().await {
            match result.unwrap() {
                Lookup::Lead(guard) => {
                    leads += 1;
                    guard
                        .complete(sample_result(), Duration::from_secs(60), 10)
                        .await;
                }
                Lookup::Followed(result) => {
                    followed += 1;
                    assert_eq!(result.raw_text, "raw");
                }
                Lookup::Hit(_) => panic!("nothing was ever stored"),
            }
        }

        // Exactly one follower is promoted; the rest queue behind it rather
        // than each starting their own model call.
        assert_eq!(leads, 1);
        assert_eq!(followed, 2);
    }
}

//! Credential pool: key rotation, per-key throttling and cooldowns.
//!
//! Each key moves between two states:
//!
//! ```text
//! available --(rate_limited | auth_error)--> cooling_down --(window elapsed)--> available
//! ```
//!
//! Selection is round-robin over available keys, starting after the key handed
//! out last. A key is also skipped while its minimum inter-call interval has
//! not elapsed. When no key is usable, `acquire` sleeps until the earliest one
//! becomes usable again.
//!
//! All state sits behind one mutex that is never held across an await, so
//! workers see a consistent view and two workers can't both pick up a key
//! that just went into cooldown.

use crate::abort::AbortFlag;
use crate::clock::Clock;
use crate::config::CredentialsConfig;
use crate::error::ConfigError;
use crate::types::ProviderStatus;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Longest single sleep inside `acquire`, so an abort is noticed promptly.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(1);

/// Timing policy for the pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Minimum time between two calls on the same key
    pub min_interval: Duration,
    /// Base cooldown after a rate-limited call (doubles per consecutive failure)
    pub cooldown: Duration,
    /// Fixed cooldown after an authentication failure
    pub auth_cooldown: Duration,
    /// Cap for the rate-limit cooldown window
    pub max_cooldown: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from(&CredentialsConfig::default())
    }
}

impl From<&CredentialsConfig> for PoolOptions {
    fn from(config: &CredentialsConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            cooldown: Duration::from_millis(config.cooldown_ms),
            auth_cooldown: Duration::from_millis(config.auth_cooldown_ms),
            max_cooldown: Duration::from_millis(config.max_cooldown_ms),
        }
    }
}

/// A key checked out of the pool for one call.
#[derive(Clone)]
pub struct CredentialHandle {
    index: usize,
    key: Arc<str>,
}

impl CredentialHandle {
    /// Position of the key in the configured order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The secret itself. Never log this; use `Display` instead.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key#{} ({})", self.index, mask(&self.key))
    }
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Externally visible state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Available,
    CoolingDown,
}

/// Point-in-time view of one key, safe to log.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub index: usize,
    pub masked_key: String,
    pub state: CredentialState,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct Slot {
    key: Arc<str>,
    last_used_at: Option<Instant>,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl Slot {
    fn is_cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    /// Earliest instant the slot may be handed out, or `None` if usable now.
    fn ready_at(&self, now: Instant, min_interval: Duration) -> Option<Instant> {
        let throttle = self.last_used_at.map(|t| t + min_interval);
        let ready = match (self.cooldown_until, throttle) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        ready.filter(|t| *t > now)
    }
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<Slot>,
    /// Index to start the next round-robin scan from
    cursor: usize,
}

/// Thread-safe pool of API keys shared by all workers.
pub struct CredentialPool {
    state: Mutex<PoolState>,
    options: PoolOptions,
    clock: Arc<dyn Clock>,
    abort: AbortFlag,
}

impl CredentialPool {
    /// Build a pool from keys in rotation order.
    pub fn new(
        keys: Vec<String>,
        options: PoolOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        if keys.is_empty() {
            return Err(ConfigError::ValidationError(
                "credential pool needs at least one key".into(),
            ));
        }
        let slots = keys
            .into_iter()
            .map(|key| Slot {
                key: Arc::from(key),
                last_used_at: None,
                consecutive_failures: 0,
                cooldown_until: None,
            })
            .collect();

        Ok(Self {
            state: Mutex::new(PoolState { slots, cursor: 0 }),
            options,
            clock,
            abort: AbortFlag::new(),
        })
    }

    /// Observe `abort` while waiting for a key.
    pub fn with_abort(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check out a key without waiting.
    ///
    /// Returns the instant the next key becomes usable if none is usable now.
    pub fn try_acquire(&self) -> Result<CredentialHandle, Instant> {
        let now = self.clock.now();
        let min_interval = self.options.min_interval;
        let mut state = self.lock();
        let n = state.slots.len();

        for offset in 0..n {
            let index = (state.cursor + offset) % n;
            let slot = &mut state.slots[index];
            if slot.ready_at(now, min_interval).is_none() {
                slot.last_used_at = Some(now);
                let handle = CredentialHandle {
                    index,
                    key: slot.key.clone(),
                };
                state.cursor = (index + 1) % n;
                return Ok(handle);
            }
        }

        let wake_at = state
            .slots
            .iter()
            .filter_map(|s| s.ready_at(now, min_interval))
            .min()
            .unwrap_or(now);
        Err(wake_at)
    }

    /// Check out a key, sleeping until one is usable.
    ///
    /// Returns `None` only if the abort flag is raised while waiting.
    pub async fn acquire(&self) -> Option<CredentialHandle> {
        loop {
            if self.abort.is_aborted() {
                return None;
            }
            match self.try_acquire() {
                Ok(handle) => {
                    tracing::debug!("Acquired {handle}");
                    return Some(handle);
                }
                Err(wake_at) => {
                    let wait = wake_at.saturating_duration_since(self.clock.now());
                    tracing::debug!("All credentials busy, waiting {wait:?}");
                    self.clock.sleep(wait.min(MAX_WAIT_SLICE)).await;
                }
            }
        }
    }

    /// Record the outcome of a call made with `handle`.
    pub fn report(&self, handle: &CredentialHandle, status: ProviderStatus) {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(slot) = state.slots.get_mut(handle.index) else {
            return;
        };

        match status {
            ProviderStatus::Success => {
                slot.consecutive_failures = 0;
                slot.cooldown_until = None;
            }
            ProviderStatus::RateLimited => {
                slot.consecutive_failures += 1;
                let window = cooldown_window(
                    self.options.cooldown,
                    slot.consecutive_failures,
                    self.options.max_cooldown,
                );
                slot.cooldown_until = Some(now + window);
                tracing::warn!("{handle} rate limited, cooling down for {window:?}");
            }
            ProviderStatus::AuthError => {
                slot.consecutive_failures += 1;
                slot.cooldown_until = Some(now + self.options.auth_cooldown);
                tracing::warn!(
                    "{handle} rejected by provider, cooling down for {:?}",
                    self.options.auth_cooldown
                );
            }
            ProviderStatus::TransientError | ProviderStatus::FatalError => {
                tracing::debug!("{handle} reported {status}; key state unchanged");
            }
        }
    }

    /// Current state of the key at `index`.
    pub fn state_of(&self, index: usize) -> Option<CredentialState> {
        let now = self.clock.now();
        self.lock().slots.get(index).map(|slot| {
            if slot.is_cooling_down(now) {
                CredentialState::CoolingDown
            } else {
                CredentialState::Available
            }
        })
    }

    /// Loggable view of every key.
    pub fn snapshot(&self) -> Vec<CredentialStatus> {
        let now = self.clock.now();
        self.lock()
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| CredentialStatus {
                index,
                masked_key: mask(&slot.key),
                state: if slot.is_cooling_down(now) {
                    CredentialState::CoolingDown
                } else {
                    CredentialState::Available
                },
                consecutive_failures: slot.consecutive_failures,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `base * 2^(failures-1)`, capped at `max`.
fn cooldown_window(base: Duration, failures: u32, max: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}

fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 10 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn options() -> PoolOptions {
        PoolOptions {
            min_interval: Duration::ZERO,
            cooldown: Duration::from_secs(10),
            auth_cooldown: Duration::from_secs(300),
            max_cooldown: Duration::from_secs(60),
        }
    }

    fn pool(n: usize, options: PoolOptions) -> (CredentialPool, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let keys = (0..n).map(|i| format!("test-key-number-{i}")).collect();
        let pool = CredentialPool::new(keys, options, clock.clone()).unwrap();
        (pool, clock)
    }

    #[test]
    fn test_empty_pool_rejected() {
        let clock = Arc::new(ManualClock::new());
        assert!(CredentialPool::new(vec![], options(), clock).is_err());
    }

    #[tokio::test]
    async fn test_round_robin_on_success() {
        let (pool, _) = pool(3, options());
        let mut order = Vec::new();
        for _ in 0..6 {
            let handle = pool.acquire().await.unwrap();
            pool.report(&handle, ProviderStatus::Success);
            order.push(handle.index());
        }
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn test_rate_limited_burst_cycles_all_keys_before_blocking() {
        let (pool, clock) = pool(3, options());

        let mut used = Vec::new();
        for _ in 0..3 {
            let handle = pool.acquire().await.unwrap();
            pool.report(&handle, ProviderStatus::RateLimited);
            used.push(handle.index());
        }
        assert_eq!(used, vec![0, 1, 2]);
        assert!(clock.sleeps().is_empty(), "must not block while a key is free");

        // Every key is cooling down now: the next acquire waits for the first one.
        let handle = pool.acquire().await.unwrap();
        assert_eq!(handle.index(), 0);
        assert!(clock.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workers_never_get_a_cooling_key() {
        let (pool, clock) = pool(3, options());
        let pool = Arc::new(pool);

        // Every worker holds its key until all three have one, then reports a 429
        let round = |workers: usize| {
            let barrier = Arc::new(tokio::sync::Barrier::new(workers));
            (0..workers)
                .map(|_| {
                    let pool = pool.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        let handle = pool.acquire().await.unwrap();
                        let state = pool.state_of(handle.index());
                        barrier.wait().await;
                        pool.report(&handle, ProviderStatus::RateLimited);
                        (handle.index(), state)
                    })
                })
                .collect::<Vec<_>>()
        };

        let mut first = Vec::new();
        for task in round(3) {
            first.push(task.await.unwrap());
        }
        let mut indices: Vec<usize> = first.iter().map(|(i, _)| *i).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(first
            .iter()
            .all(|(_, s)| *s == Some(CredentialState::Available)));
        assert!(
            clock.sleeps().is_empty(),
            "slept with a free key: {:?}",
            clock.sleeps()
        );

        // All keys are cooling now; the next workers wait and still only get
        // keys whose cooldown has passed
        for task in round(3) {
            let (_, state) = task.await.unwrap();
            assert_eq!(state, Some(CredentialState::Available));
        }
        assert!(!clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_cooling_key_skipped_while_others_available() {
        let (pool, clock) = pool(3, options());

        let first = pool.acquire().await.unwrap();
        pool.report(&first, ProviderStatus::RateLimited);
        assert_eq!(pool.state_of(0), Some(CredentialState::CoolingDown));

        for _ in 0..10 {
            let handle = pool.acquire().await.unwrap();
            assert_ne!(handle.index(), 0);
            pool.report(&handle, ProviderStatus::Success);
        }

        clock.advance(Duration::from_secs(10));
        assert_eq!(pool.state_of(0), Some(CredentialState::Available));
    }

    #[tokio::test]
    async fn test_auth_error_uses_auth_cooldown() {
        let (pool, clock) = pool(1, options());
        let handle = pool.acquire().await.unwrap();
        pool.report(&handle, ProviderStatus::AuthError);

        clock.advance(Duration::from_secs(299));
        assert_eq!(pool.state_of(0), Some(CredentialState::CoolingDown));
        clock.advance(Duration::from_secs(1));
        assert_eq!(pool.state_of(0), Some(CredentialState::Available));
    }

    #[tokio::test]
    async fn test_transient_error_leaves_key_available() {
        let (pool, _) = pool(1, options());
        let handle = pool.acquire().await.unwrap();
        pool.report(&handle, ProviderStatus::TransientError);
        assert_eq!(pool.state_of(0), Some(CredentialState::Available));
        assert_eq!(pool.snapshot()[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_min_interval_throttles_single_key() {
        let opts = PoolOptions {
            min_interval: Duration::from_secs(2),
            ..options()
        };
        let (pool, clock) = pool(1, opts);

        pool.acquire().await.unwrap();
        pool.acquire().await.unwrap();
        assert!(clock.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_min_interval_prefers_other_key() {
        let opts = PoolOptions {
            min_interval: Duration::from_secs(2),
            ..options()
        };
        let (pool, clock) = pool(2, opts);

        assert_eq!(pool.acquire().await.unwrap().index(), 0);
        assert_eq!(pool.acquire().await.unwrap().index(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let (pool, clock) = pool(1, options());
        let handle = pool.acquire().await.unwrap();
        pool.report(&handle, ProviderStatus::RateLimited);
        pool.report(&handle, ProviderStatus::RateLimited);
        assert_eq!(pool.snapshot()[0].consecutive_failures, 2);

        clock.advance(Duration::from_secs(60));
        pool.report(&handle, ProviderStatus::Success);
        assert_eq!(pool.snapshot()[0].consecutive_failures, 0);
        assert_eq!(pool.state_of(0), Some(CredentialState::Available));
    }

    #[tokio::test]
    async fn test_acquire_returns_none_when_aborted() {
        let (pool, _) = pool(1, options());
        let abort = AbortFlag::new();
        let pool = pool.with_abort(abort.clone());

        let handle = pool.acquire().await.unwrap();
        pool.report(&handle, ProviderStatus::RateLimited);
        abort.abort();
        assert!(pool.acquire().await.is_none());
    }

    #[test]
    fn test_cooldown_window_doubles_and_caps() {
        let base = Duration::from_secs(10);
        let max = Duration::from_secs(60);
        assert_eq!(cooldown_window(base, 1, max), Duration::from_secs(10));
        assert_eq!(cooldown_window(base, 2, max), Duration::from_secs(20));
        assert_eq!(cooldown_window(base, 3, max), Duration::from_secs(40));
        assert_eq!(cooldown_window(base, 4, max), Duration::from_secs(60));
        assert_eq!(cooldown_window(base, 40, max), Duration::from_secs(60));
    }

    #[test]
    fn test_handle_display_masks_key() {
        let handle = CredentialHandle {
            index: 2,
            key: Arc::from("AIzaSyExampleSecretKey42"),
        };
        let shown = handle.to_string();
        assert_eq!(shown, "key#2 (AIza…42)");
        assert!(!format!("{handle:?}").contains("ExampleSecret"));
        assert_eq!(mask("short"), "****");
    }
}

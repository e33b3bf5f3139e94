//! Heartbeat-based mutual exclusion between sessions of one account.
//!
//! Ownership is decided purely by recency: the active session rewrites a
//! `{token, at}` heartbeat every interval, and a starting session yields if
//! it finds a heartbeat from another token younger than the staleness
//! threshold. There is no release: a session that stops refreshing is
//! superseded once its heartbeat goes stale.
//!
//! This lock is advisory. Two sessions starting within one staleness window
//! can both decide to proceed; the store itself does not prevent it.

use crate::clock::Clock;
use crate::error::CacheResult;
use crate::metadata::{Heartbeat, PersistedMetadata};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Outcome of the session-start lock check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCheck {
    /// This session owns the store and is refreshing its heartbeat.
    Acquired,
    /// Another session's heartbeat is fresh.
    Yield {
        /// Age of that heartbeat.
        age: Duration,
    },
}

/// Writes and checks session heartbeats.
pub struct LockCoordinator<C: Clock> {
    metadata: PersistedMetadata,
    clock: Arc<C>,
    token: Arc<Mutex<Uuid>>,
    interval: Duration,
    staleness: Duration,
    refresh: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock> std::fmt::Debug for LockCoordinator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("token", &self.token())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl<C: Clock> LockCoordinator<C> {
    /// Creates a coordinator with a fresh token.
    pub fn new(
        metadata: PersistedMetadata,
        clock: Arc<C>,
        interval: Duration,
        staleness: Duration,
    ) -> Self {
        Self {
            metadata,
            clock,
            token: Arc::new(Mutex::new(Uuid::new_v4())),
            interval,
            staleness,
            refresh: Mutex::new(None),
        }
    }

    /// This session's current token.
    pub fn token(&self) -> Uuid {
        *self.token.lock()
    }

    /// Replaces the token and stops the refresh task. Once this returns, no
    /// heartbeat carrying the old token is written.
    pub fn regenerate_token(&self) -> Uuid {
        let token = Uuid::new_v4();
        *self.token.lock() = token;
        self.stop();
        token
    }

    /// Returns true while a refresh task is running.
    pub fn is_refreshing(&self) -> bool {
        self.refresh
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Returns true if another session owns the store. Otherwise claims it:
    /// writes this session's heartbeat and starts refreshing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the heartbeat cannot be read or written.
    pub fn should_yield_to_other_session(&self) -> CacheResult<bool> {
        Ok(matches!(self.check()?, LockCheck::Yield { .. }))
    }

    /// Like [`Self::should_yield_to_other_session`], reporting the age of
    /// the heartbeat that caused a yield.
    ///
    /// # Errors
    ///
    /// Returns an error if the heartbeat cannot be read or written.
    pub fn check(&self) -> CacheResult<LockCheck> {
        let token = self.token();
        let now = self.clock.now_millis();

        if let Some(heartbeat) = self.metadata.heartbeat()? {
            let age = heartbeat.age_millis(now);
            if heartbeat.token != token && u128::from(age) < self.staleness.as_millis() {
                tracing::info!(
                    account = %self.metadata.account(),
                    age_ms = age,
                    "another session holds the cache"
                );
                return Ok(LockCheck::Yield {
                    age: Duration::from_millis(age),
                });
            }
        }

        self.metadata.write_heartbeat(&Heartbeat { token, at: now })?;
        self.start_refresh(token);
        Ok(LockCheck::Acquired)
    }

    fn start_refresh(&self, token: Uuid) {
        let metadata = self.metadata.clone();
        let clock = Arc::clone(&self.clock);
        let current = Arc::clone(&self.token);
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the heartbeat was just written.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let metadata = metadata.clone();
                let clock = Arc::clone(&clock);
                let current = Arc::clone(&current);
                // Backend writes may block on file locks and fsync.
                let refreshed = tokio::task::spawn_blocking(move || {
                    // Held across the write so a regenerated token never sees
                    // a heartbeat from the old one land afterwards.
                    let guard = current.lock();
                    if *guard != token {
                        return false;
                    }
                    let heartbeat = Heartbeat {
                        token,
                        at: clock.now_millis(),
                    };
                    if let Err(e) = metadata.write_heartbeat(&heartbeat) {
                        tracing::warn!(error = %e, "failed to refresh heartbeat");
                    }
                    true
                })
                .await;
                if !matches!(refreshed, Ok(true)) {
                    break;
                }
            }
        });

        if let Some(previous) = self.refresh.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stops refreshing. The heartbeat is left to go stale.
    pub fn stop(&self) {
        if let Some(task) = self.refresh.lock().take() {
            task.abort();
        }
    }
}

impl<C: Clock> Drop for LockCoordinator<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrordb_storage::InMemoryMetadata;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Default)]
    struct TestClock(AtomicU64);

    impl TestClock {
        fn set(&self, millis: u64) {
            self.0.store(millis, Ordering::SeqCst);
        }
    }

    impl Clock for TestClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn coordinator(
        backend: &InMemoryMetadata,
        clock: &Arc<TestClock>,
    ) -> LockCoordinator<TestClock> {
        LockCoordinator::new(
            PersistedMetadata::new(Arc::new(backend.clone()), "alice"),
            Arc::clone(clock),
            Duration::from_millis(500),
            Duration::from_millis(1000),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_session_acquires() {
        let backend = InMemoryMetadata::new();
        let clock = Arc::new(TestClock::default());
        clock.set(5_000);
        let lock = coordinator(&backend, &clock);

        assert!(!lock.should_yield_to_other_session().unwrap());
        assert!(lock.is_refreshing());

        let metadata = PersistedMetadata::new(Arc::new(backend), "alice");
        let heartbeat = metadata.heartbeat().unwrap().unwrap();
        assert_eq!(heartbeat.token, lock.token());
        assert_eq!(heartbeat.at, 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_foreign_heartbeat_yields() {
        let backend = InMemoryMetadata::new();
        let clock = Arc::new(TestClock::default());
        clock.set(10_000);
        let first = coordinator(&backend, &clock);
        assert_eq!(first.check().unwrap(), LockCheck::Acquired);

        clock.set(10_200);
        let second = coordinator(&backend, &clock);
        assert_eq!(
            second.check().unwrap(),
            LockCheck::Yield {
                age: Duration::from_millis(200)
            }
        );
        assert!(!second.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_heartbeat_is_superseded() {
        let backend = InMemoryMetadata::new();
        let clock = Arc::new(TestClock::default());
        clock.set(10_000);
        let first = coordinator(&backend, &clock);
        first.check().unwrap();
        first.stop();

        clock.set(11_000);
        let second = coordinator(&backend, &clock);
        assert_eq!(second.check().unwrap(), LockCheck::Acquired);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_keeps_heartbeat_fresh() {
        let backend = InMemoryMetadata::new();
        let clock = Arc::new(TestClock::default());
        clock.set(1_000);
        let lock = coordinator(&backend, &clock);
        lock.check().unwrap();

        clock.set(1_600);
        tokio::time::sleep(Duration::from_millis(550)).await;

        let metadata = PersistedMetadata::new(Arc::new(backend), "alice");
        assert_eq!(metadata.heartbeat().unwrap().unwrap().at, 1_600);
    }

    #[tokio::test(start_paused = true)]
    async fn regenerated_token_stops_refresh() {
        let backend = InMemoryMetadata::new();
        let clock = Arc::new(TestClock::default());
        let lock = coordinator(&backend, &clock);
        let old = lock.token();
        lock.check().unwrap();

        let new = lock.regenerate_token();
        assert_ne!(old, new);
        assert!(!lock.is_refreshing());

        clock.set(2_000);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let metadata = PersistedMetadata::new(Arc::new(backend), "alice");
        assert_eq!(metadata.heartbeat().unwrap().unwrap().token, old);
        assert_eq!(metadata.heartbeat().unwrap().unwrap().at, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retired_token_never_rewrites_cleared_heartbeat() {
        let backend = InMemoryMetadata::new();
        let clock = Arc::new(TestClock::default());
        clock.set(50_000);
        let lock = LockCoordinator::new(
            PersistedMetadata::new(Arc::new(backend.clone()), "alice"),
            Arc::clone(&clock),
            Duration::from_micros(50),
            Duration::from_millis(1000),
        );
        let metadata = PersistedMetadata::new(Arc::new(backend), "alice");

        for _ in 0..200 {
            assert_eq!(lock.check().unwrap(), LockCheck::Acquired);
            tokio::time::sleep(Duration::from_micros(100)).await;
            lock.regenerate_token();
            metadata.clear_all().unwrap();
            assert_eq!(lock.check().unwrap(), LockCheck::Acquired);
            lock.stop();
        }
    }
}

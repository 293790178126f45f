// src/security/replay.rs
//! Seen-signature cache that closes the replay gap left by the timestamp
//! window: a message can be resent verbatim inside the tolerance, but its
//! signature will already be on file.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long a seen signature is remembered.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(3600);
/// How often the background sweep reclaims expired entries.
pub const DEFAULT_SWEEP_EVERY: Duration = Duration::from_secs(600);

#[derive(Debug, Default)]
struct SeenCache {
    first_seen: HashMap<String, Instant>,
}

impl SeenCache {
    fn sweep(&mut self, now: Instant, expiry: Duration) -> usize {
        let before = self.first_seen.len();
        self.first_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) <= expiry);
        before - self.first_seen.len()
    }
}

pub struct ReplayGuard {
    cache: Arc<Mutex<SeenCache>>,
    expiry: Duration,
    sweeper: Option<JoinHandle<()>>,
}

impl ReplayGuard {
    /// Guard without a background sweep; call [`ReplayGuard::sweep_at`] manually.
    pub fn new(expiry: Duration) -> Self {
        Self {
            cache: Arc::new(Mutex::new(SeenCache::default())),
            expiry,
            sweeper: None,
        }
    }

    /// Guard with a periodic sweep task. Must be called inside a tokio runtime.
    /// The task stops when the guard is dropped.
    pub fn with_sweeper(expiry: Duration, every: Duration) -> Self {
        let mut guard = Self::new(expiry);
        let cache = Arc::clone(&guard.cache);
        guard.sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            loop {
                ticker.tick().await;
                let (removed, remaining) = {
                    let mut c = cache.lock();
                    let removed = c.sweep(Instant::now(), expiry);
                    (removed, c.first_seen.len())
                };
                gauge!("pipeline_replay_cache_size").set(remaining as f64);
                if removed > 0 {
                    tracing::debug!(target: "security", removed, remaining, "replay cache sweep");
                }
            }
        }));
        guard
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn is_duplicate(&self, signature: &str) -> bool {
        self.is_duplicate_at(signature, Instant::now())
    }

    /// `false` the first time a signature is seen within the expiry window,
    /// `true` afterwards. Entries past expiry count as unseen even before a sweep.
    pub fn is_duplicate_at(&self, signature: &str, now: Instant) -> bool {
        let mut cache = self.cache.lock();
        match cache.first_seen.get(signature) {
            Some(seen) if now.saturating_duration_since(*seen) <= self.expiry => true,
            _ => {
                cache.first_seen.insert(signature.to_string(), now);
                false
            }
        }
    }

    /// Drop entries older than the expiry. Returns the number removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        self.cache.lock().sweep(now, self.expiry)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY)
    }
}

impl Drop for ReplayGuard {
    fn drop(&mut self) {
        if let Some(h) = self.sweeper.take() {
            h.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_duplicate_second_is() {
        let g = ReplayGuard::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        assert!(!g.is_duplicate_at("abc", t0));
        assert!(g.is_duplicate_at("abc", t0 + Duration::from_secs(10)));
        assert!(g.is_duplicate_at("abc", t0 + Duration::from_secs(3600)));
        assert!(!g.is_duplicate_at("other", t0));
    }

    #[test]
    fn expired_entry_is_accepted_again_before_sweep() {
        let g = ReplayGuard::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(!g.is_duplicate_at("abc", t0));
        assert!(!g.is_duplicate_at("abc", t0 + Duration::from_secs(61)));
        // re-recorded at t0+61
        assert!(g.is_duplicate_at("abc", t0 + Duration::from_secs(62)));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let g = ReplayGuard::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        g.is_duplicate_at("old", t0);
        g.is_duplicate_at("new", t0 + Duration::from_secs(3000));
        let removed = g.sweep_at(t0 + Duration::from_secs(3601));
        assert_eq!(removed, 1);
        assert_eq!(g.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_reclaims_entries() {
        let g = ReplayGuard::with_sweeper(Duration::from_secs(3600), Duration::from_secs(600));
        assert!(!g.is_duplicate("sig"));
        assert_eq!(g.len(), 1);

        // Not yet expired at the first few sweeps.
        tokio::time::sleep(Duration::from_secs(1800)).await;
        assert_eq!(g.len(), 1);

        // Expired after 3600s; the sweep at t=4200 reclaims it.
        tokio::time::sleep(Duration::from_secs(2500)).await;
        assert!(g.is_empty());
    }
}

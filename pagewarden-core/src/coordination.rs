//! Cross-crawl coordination state: which domain is being crawled by which
//! scan, and how many times in a row each seed url has failed.
//!
//! Only the scheduler touches this. Crawls never see it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    last_failure: Instant,
}

#[derive(Debug, Default)]
pub struct Coordinator {
    /// domain -> scan id holding it
    locks: Mutex<HashMap<String, String>>,
    /// seed url -> consecutive failures
    failures: Mutex<HashMap<String, FailureRecord>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    // Domain locks

    /// Claims `domain` for `scan_id`. Fails if any scan already holds it.
    pub fn try_lock_domain(&self, domain: &str, scan_id: &str) -> bool {
        let mut locks = guard(&self.locks);
        if locks.contains_key(domain) {
            return false;
        }
        locks.insert(domain.to_string(), scan_id.to_string());
        debug!("Locked {} for scan {}", domain, scan_id);
        true
    }

    /// Like [`Coordinator::try_lock_domain`], but the lock is released when
    /// the returned guard drops.
    pub fn acquire(self: &Arc<Self>, domain: &str, scan_id: &str) -> Option<DomainLockGuard> {
        self.try_lock_domain(domain, scan_id)
            .then(|| DomainLockGuard {
                coordinator: Arc::clone(self),
                domain: domain.to_string(),
                scan_id: scan_id.to_string(),
            })
    }

    /// Releases `domain` only if `scan_id` is the holder, so a stale release
    /// never frees a lock taken over by a later scan.
    pub fn release_domain(&self, domain: &str, scan_id: &str) -> bool {
        let mut locks = guard(&self.locks);
        if locks.get(domain).is_some_and(|holder| holder == scan_id) {
            locks.remove(domain);
            debug!("Released {} from scan {}", domain, scan_id);
            return true;
        }
        false
    }

    /// Releases `domain` regardless of holder. Returns the scan id that held it.
    pub fn force_release(&self, domain: &str) -> Option<String> {
        guard(&self.locks).remove(domain)
    }

    pub fn is_locked(&self, domain: &str) -> bool {
        guard(&self.locks).contains_key(domain)
    }

    pub fn locked_domains(&self) -> usize {
        guard(&self.locks).len()
    }

    /// Snapshot of `(domain, scan_id)` pairs.
    pub fn lock_holders(&self) -> Vec<(String, String)> {
        guard(&self.locks)
            .iter()
            .map(|(domain, scan_id)| (domain.clone(), scan_id.clone()))
            .collect()
    }

    // Failure tracking

    pub fn failure_count(&self, url: &str) -> u32 {
        guard(&self.failures).get(url).map_or(0, |r| r.count)
    }

    /// Returns the new consecutive failure count.
    pub fn record_failure(&self, url: &str) -> u32 {
        let mut failures = guard(&self.failures);
        let record = failures.entry(url.to_string()).or_insert(FailureRecord {
            count: 0,
            last_failure: Instant::now(),
        });
        record.count += 1;
        record.last_failure = Instant::now();
        record.count
    }

    pub fn reset_failures(&self, url: &str) {
        guard(&self.failures).remove(url);
    }

    /// True while `url` is waiting out its retry delay: `base` times the
    /// number of consecutive failures since the last one.
    pub fn in_backoff(&self, url: &str, base: Duration) -> bool {
        if base.is_zero() {
            return false;
        }
        guard(&self.failures).get(url).is_some_and(|r| {
            let delay = base.saturating_mul(r.count);
            r.last_failure.elapsed() < delay
        })
    }
}

/// Holds a domain lock for one scan and releases it on drop, whether the scan
/// finished, failed or panicked.
#[derive(Debug)]
pub struct DomainLockGuard {
    coordinator: Arc<Coordinator>,
    domain: String,
    scan_id: String,
}

impl DomainLockGuard {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }
}

impl Drop for DomainLockGuard {
    fn drop(&mut self) {
        self.coordinator.release_domain(&self.domain, &self.scan_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_lock_is_exclusive() {
        let coordinator = Coordinator::new();
        assert!(coordinator.try_lock_domain("example.com", "scan-1"));
        assert!(!coordinator.try_lock_domain("example.com", "scan-2"));
        assert!(coordinator.try_lock_domain("other.com", "scan-2"));
        assert_eq!(coordinator.locked_domains(), 2);
    }

    #[test]
    fn test_release_requires_holder() {
        let coordinator = Coordinator::new();
        coordinator.try_lock_domain("example.com", "scan-1");

        assert!(!coordinator.release_domain("example.com", "scan-2"));
        assert!(coordinator.is_locked("example.com"));

        assert!(coordinator.release_domain("example.com", "scan-1"));
        assert!(!coordinator.is_locked("example.com"));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let coordinator = Arc::new(Coordinator::new());
        {
            let held = coordinator.acquire("example.com", "scan-1");
            assert!(held.is_some());
            assert!(coordinator.acquire("example.com", "scan-2").is_none());
        }
        assert!(!coordinator.is_locked("example.com"));
    }

    #[test]
    fn test_stale_guard_does_not_release_new_holder() {
        let coordinator = Arc::new(Coordinator::new());
        let stale = coordinator.acquire("example.com", "scan-1");

        assert_eq!(
            coordinator.force_release("example.com").as_deref(),
            Some("scan-1")
        );
        assert!(coordinator.try_lock_domain("example.com", "scan-2"));

        drop(stale);
        assert_eq!(
            coordinator.lock_holders(),
            vec![("example.com".to_string(), "scan-2".to_string())]
        );
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let coordinator = Arc::new(Coordinator::new());
        let inner = Arc::clone(&coordinator);

        let outcome = std::panic::catch_unwind(move || {
            let _held = inner.acquire("example.com", "scan-1");
            panic!("crawl blew up");
        });

        assert!(outcome.is_err());
        assert!(!coordinator.is_locked("example.com"));
    }

    #[test]
    fn test_failure_counts() {
        let coordinator = Coordinator::new();
        let url = "https://example.com";

        assert_eq!(coordinator.failure_count(url), 0);
        assert_eq!(coordinator.record_failure(url), 1);
        assert_eq!(coordinator.record_failure(url), 2);
        assert_eq!(coordinator.failure_count(url), 2);

        coordinator.reset_failures(url);
        assert_eq!(coordinator.failure_count(url), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_with_failures() {
        let coordinator = Coordinator::new();
        let url = "https://example.com";
        let base = Duration::from_secs(10);

        assert!(!coordinator.in_backoff(url, base));

        coordinator.record_failure(url);
        coordinator.record_failure(url);
        assert!(coordinator.in_backoff(url, base));

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(coordinator.in_backoff(url, base));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!coordinator.in_backoff(url, base));

        assert!(!coordinator.in_backoff(url, Duration::ZERO));
    }
}

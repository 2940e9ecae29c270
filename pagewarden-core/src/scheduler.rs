use crate::coordination::{Coordinator, DomainLockGuard};
use crate::data::{NewScan, ScanStatus, SeedEntry, new_scan_id};
use crate::error::Result;
use crate::store::{ResultSink, SeedQueue};
use futures::FutureExt;
use pagewarden_scanner::{
    CrawlProgress, CrawlRequest, CrawlSummary, Crawler, PageResult, PageSink, ProgressCallback,
};
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global cap on concurrently running scans (one per locked domain).
    pub max_concurrent: usize,
    /// Consecutive failures after which a seed is dropped from the queue.
    pub max_attempts: u32,
    /// Queue entries considered per tick.
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub reconcile_interval: Duration,
    /// Wait this long times the failure count before retrying a failed seed.
    /// Zero retries on the next tick.
    pub retry_backoff: Duration,
    /// Push frontier urls left over at the page cap back into the queue as seeds.
    pub requeue_discovered: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_attempts: 3,
            batch_size: 20,
            poll_interval: Duration::from_secs(15),
            reconcile_interval: Duration::from_secs(120),
            retry_backoff: Duration::ZERO,
            requeue_discovered: false,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_requeue_discovered(mut self, requeue: bool) -> Self {
        self.requeue_discovered = requeue;
        self
    }
}

/// What a single scheduling pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The concurrency cap is reached; nothing was looked at.
    Saturated,
    /// The queue is empty.
    Idle,
    /// Every candidate's domain is locked or backing off after a failure.
    AllDomainsBusy,
    /// The selected seed had failed too often and was dropped.
    Quarantined { url: String, scan_id: String },
    Started { scan_id: String, url: String },
}

/// Progress of one scan, tagged with its id.
pub type ScanProgressCallback = Arc<dyn Fn(&str, CrawlProgress) + Send + Sync>;

/// Pulls seeds from the durable queue and runs one crawl per domain at a time.
pub struct Scheduler {
    config: SchedulerConfig,
    queue: Arc<dyn SeedQueue>,
    sink: Arc<dyn ResultSink>,
    crawler: Arc<Crawler>,
    coordinator: Arc<Coordinator>,
    progress: Option<ScanProgressCallback>,
    tasks: Mutex<JoinSet<()>>,
    /// Scan ids whose job is still alive, including its bookkeeping after the crawl.
    running: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    /// The crawler should write its page results to the same store as `sink`.
    pub fn new(queue: Arc<dyn SeedQueue>, sink: Arc<dyn ResultSink>, crawler: Arc<Crawler>) -> Self {
        Self {
            config: SchedulerConfig::default(),
            queue,
            sink,
            crawler,
            coordinator: Arc::new(Coordinator::new()),
            progress: None,
            tasks: Mutex::new(JoinSet::new()),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_coordinator(mut self, coordinator: Arc<Coordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_progress(mut self, callback: ScanProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Scans spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.reap_finished();
        self.tasks().len()
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reap_finished(&self) {
        let mut tasks = self.tasks();
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!("Scan task ended abnormally: {}", e);
            }
        }
    }

    /// One scheduling pass. Starts at most one scan.
    ///
    /// An error means the queue or result store could not be reached; nothing
    /// was started and the next tick tries again.
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.reap_finished();

        if self.coordinator.locked_domains() >= self.config.max_concurrent {
            debug!("At concurrency cap ({}), skipping tick", self.config.max_concurrent);
            return Ok(TickOutcome::Saturated);
        }

        let batch = self.queue.peek_batch(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(TickOutcome::Idle);
        }

        let backoff = self.config.retry_backoff;
        let Some(seed) = batch.into_iter().find(|seed| {
            !self.coordinator.is_locked(&seed.domain)
                && !self.coordinator.in_backoff(&seed.url, backoff)
        }) else {
            debug!("No eligible seed this tick");
            return Ok(TickOutcome::AllDomainsBusy);
        };

        let failures = self.coordinator.failure_count(&seed.url);
        if failures >= self.config.max_attempts {
            let scan_id = self.quarantine(&seed, failures).await?;
            return Ok(TickOutcome::Quarantined {
                url: seed.url,
                scan_id,
            });
        }

        let scan_id = new_scan_id();
        let Some(lock) = self.coordinator.acquire(&seed.domain, &scan_id) else {
            return Ok(TickOutcome::AllDomainsBusy);
        };

        // On error the lock guard drops here and the domain is free again
        self.sink
            .start_scan(&NewScan::for_seed(&scan_id, &seed, ScanStatus::InProgress))
            .await?;

        info!(scan_id = %scan_id, "Starting scan of {} (attempt {})", seed.url, failures + 1);

        let job = ScanJob {
            queue: Arc::clone(&self.queue),
            sink: Arc::clone(&self.sink),
            crawler: Arc::clone(&self.crawler),
            coordinator: Arc::clone(&self.coordinator),
            progress: self.progress.clone(),
            max_attempts: self.config.max_attempts,
            requeue_discovered: self.config.requeue_discovered,
            seed: seed.clone(),
            lock,
            _running: RunningScan::register(&self.running, &scan_id),
        };
        self.tasks().spawn(job.run());

        Ok(TickOutcome::Started {
            scan_id,
            url: seed.url,
        })
    }

    async fn quarantine(&self, seed: &SeedEntry, failures: u32) -> Result<String> {
        let scan_id = new_scan_id();
        let reason = format!(
            "Giving up on {} after {} consecutive failed attempts",
            seed.url, failures
        );
        warn!(scan_id = %scan_id, "{}", reason);

        let mut scan = NewScan::for_seed(&scan_id, seed, ScanStatus::Failed);
        scan.error_message = Some(reason.clone());
        self.sink.start_scan(&scan).await?;
        self.sink
            .append_page_result(&PageResult::with_error(&scan_id, seed.url.clone(), 0, reason))
            .await?;
        self.queue.remove(&seed.url).await?;

        Ok(scan_id)
    }

    /// Frees domain locks whose scan the result store no longer lists as in
    /// progress and whose job has ended. Returns the number of locks released.
    pub async fn reconcile(&self) -> Result<usize> {
        let live: HashSet<String> = self
            .sink
            .query_in_progress_scan_ids()
            .await?
            .into_iter()
            .collect();

        let mut released = 0;
        for (domain, scan_id) in self.coordinator.lock_holders() {
            if live.contains(&scan_id) || self.is_running(&scan_id) {
                continue;
            }
            if self.coordinator.release_domain(&domain, &scan_id) {
                warn!(scan_id = %scan_id, "Released leaked lock on {}", domain);
                released += 1;
            }
        }
        Ok(released)
    }

    fn is_running(&self, scan_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(scan_id)
    }

    /// Waits for every spawned scan to finish.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Scan task ended abnormally: {}", e);
            }
        }
    }

    /// Polls the queue and reconciles locks until `shutdown` resolves, then
    /// waits for in-flight scans. Store errors are logged and retried.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconcile = tokio::time::interval(self.config.reconcile_interval);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        info!(
            "Scheduler running (max concurrent {}, max attempts {}, poll every {:?})",
            self.config.max_concurrent, self.config.max_attempts, self.config.poll_interval
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = poll.tick() => match self.tick().await {
                    Ok(TickOutcome::Started { scan_id, url }) => {
                        debug!(scan_id = %scan_id, "Tick started {}", url);
                    }
                    Ok(outcome) => debug!("Tick: {:?}", outcome),
                    Err(e) => error!("Scheduling tick failed: {}", e),
                },
                _ = reconcile.tick() => {
                    if let Err(e) = self.reconcile().await {
                        error!("Lock reconciliation failed: {}", e);
                    }
                }
            }
        }

        self.drain().await;
        info!("Scheduler stopped");
    }
}

/// Marks a scan as running until dropped.
struct RunningScan {
    scans: Arc<Mutex<HashSet<String>>>,
    scan_id: String,
}

impl RunningScan {
    fn register(scans: &Arc<Mutex<HashSet<String>>>, scan_id: &str) -> Self {
        scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scan_id.to_string());
        Self {
            scans: Arc::clone(scans),
            scan_id: scan_id.to_string(),
        }
    }
}

impl Drop for RunningScan {
    fn drop(&mut self) {
        self.scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.scan_id);
    }
}

/// Everything one spawned scan needs. Owns the domain lock for its lifetime.
struct ScanJob {
    queue: Arc<dyn SeedQueue>,
    sink: Arc<dyn ResultSink>,
    crawler: Arc<Crawler>,
    coordinator: Arc<Coordinator>,
    progress: Option<ScanProgressCallback>,
    max_attempts: u32,
    requeue_discovered: bool,
    seed: SeedEntry,
    lock: DomainLockGuard,
    _running: RunningScan,
}

impl ScanJob {
    async fn run(self) {
        let scan_id = self.lock.scan_id().to_string();
        let request = CrawlRequest {
            scan_id: scan_id.clone(),
            seed_url: self.seed.url.clone(),
            max_pages: self.seed.max_pages,
            max_depth: self.seed.max_depth,
        };

        let on_progress: Option<ProgressCallback> = self.progress.as_ref().map(|callback| {
            let callback = Arc::clone(callback);
            let id = scan_id.clone();
            Arc::new(move |progress: CrawlProgress| callback(&id, progress)) as ProgressCallback
        });

        let outcome = AssertUnwindSafe(self.crawler.crawl(&request, on_progress.as_ref()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(summary)) => self.succeeded(&scan_id, summary).await,
            Ok(Err(e)) => self.failed(&scan_id, e.to_string()).await,
            Err(_) => self.failed(&scan_id, "Crawl panicked".to_string()).await,
        }
        // the lock guard drops with `self`
    }

    async fn succeeded(&self, scan_id: &str, summary: CrawlSummary) {
        info!(
            scan_id = %scan_id,
            "Scan of {} completed: {} pages visited, {} found, {} page errors",
            self.seed.url, summary.pages_visited, summary.pages_found, summary.page_errors
        );

        // A completed scan's seed is already off the queue.
        if let Err(e) = self.queue.remove(&self.seed.url).await {
            error!(scan_id = %scan_id, "Failed to dequeue {}: {}", self.seed.url, e);
        }
        self.coordinator.reset_failures(&self.seed.url);

        if self.requeue_discovered {
            self.requeue(scan_id, &summary.unvisited).await;
        }

        if let Err(e) = self
            .sink
            .record_scan_totals(scan_id, summary.pages_visited, summary.pages_found)
            .await
        {
            error!(scan_id = %scan_id, "Failed to record scan totals: {}", e);
        }
        if let Err(e) = self
            .sink
            .set_scan_status(scan_id, ScanStatus::Completed, None)
            .await
        {
            error!(scan_id = %scan_id, "Failed to mark scan completed: {}", e);
        }
    }

    async fn requeue(&self, scan_id: &str, urls: &[String]) {
        let mut queued = 0;
        for url in urls {
            let entry = match SeedEntry::new(url, self.seed.max_pages, self.seed.max_depth) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Not requeueing {}: {}", url, e);
                    continue;
                }
            };
            match self.queue.enqueue(&entry).await {
                Ok(()) => queued += 1,
                Err(e) => warn!(scan_id = %scan_id, "Failed to requeue {}: {}", url, e),
            }
        }
        if queued > 0 {
            info!(scan_id = %scan_id, "Requeued {} discovered urls as seeds", queued);
        }
    }

    async fn failed(&self, scan_id: &str, message: String) {
        let failures = self.coordinator.record_failure(&self.seed.url);
        warn!(
            scan_id = %scan_id,
            "Scan of {} failed (attempt {} of {}): {}",
            self.seed.url, failures, self.max_attempts, message
        );

        if failures >= self.max_attempts {
            warn!("Dropping {} from the queue after {} failures", self.seed.url, failures);
            if let Err(e) = self.queue.remove(&self.seed.url).await {
                error!(scan_id = %scan_id, "Failed to dequeue {}: {}", self.seed.url, e);
            }
        }

        // The seed may already have a row from before the crawl failed. The
        // scan's error message then carries the failure on its own.
        let result = PageResult::with_error(scan_id, self.seed.url.clone(), 0, message.clone());
        match self.sink.append_page_result(&result).await {
            Ok(true) => {}
            Ok(false) => warn!(
                scan_id = %scan_id,
                "{} already has a page result; failure kept on the scan record only",
                self.seed.url
            ),
            Err(e) => error!(scan_id = %scan_id, "Failed to record failure result: {:#}", e),
        }

        if let Err(e) = self
            .sink
            .set_scan_status(scan_id, ScanStatus::Failed, Some(&message))
            .await
        {
            error!(scan_id = %scan_id, "Failed to mark scan failed: {}", e);
        }
    }
}

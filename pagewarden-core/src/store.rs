use crate::data::{Database, NewScan, ScanStatus, SeedEntry};
use crate::error::Result;
use async_trait::async_trait;
use pagewarden_scanner::{PageResult, PageSink};

/// Persistent table of seed urls waiting for a crawl to start.
#[async_trait]
pub trait SeedQueue: Send + Sync {
    /// Upsert keyed by url. Re-submitting a queued url updates its limits.
    async fn enqueue(&self, entry: &SeedEntry) -> Result<()>;

    /// Up to `n` entries, oldest first. Entries stay queued.
    async fn peek_batch(&self, n: usize) -> Result<Vec<SeedEntry>>;

    async fn remove(&self, url: &str) -> Result<()>;
}

/// Scan-level status store, on top of the per-page sink the crawler writes to.
#[async_trait]
pub trait ResultSink: PageSink {
    async fn start_scan(&self, scan: &NewScan) -> Result<()>;

    /// Returns `false` if the transition was refused (terminal or backwards).
    async fn set_scan_status(
        &self,
        scan_id: &str,
        status: ScanStatus,
        error_message: Option<&str>,
    ) -> Result<bool>;

    async fn record_scan_totals(
        &self,
        scan_id: &str,
        pages_visited: usize,
        total_pages_found: usize,
    ) -> Result<()>;

    async fn query_in_progress_scan_ids(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl SeedQueue for Database {
    async fn enqueue(&self, entry: &SeedEntry) -> Result<()> {
        self.enqueue_seed(entry)
    }

    async fn peek_batch(&self, n: usize) -> Result<Vec<SeedEntry>> {
        self.peek_seeds(n)
    }

    async fn remove(&self, url: &str) -> Result<()> {
        self.remove_seed(url)?;
        Ok(())
    }
}

#[async_trait]
impl PageSink for Database {
    async fn append_page_result(&self, result: &PageResult) -> anyhow::Result<bool> {
        Ok(self.insert_page_result(result)?)
    }
}

#[async_trait]
impl ResultSink for Database {
    async fn start_scan(&self, scan: &NewScan) -> Result<()> {
        self.create_scan(scan)
    }

    async fn set_scan_status(
        &self,
        scan_id: &str,
        status: ScanStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        self.update_scan_status(scan_id, status, error_message)
    }

    async fn record_scan_totals(
        &self,
        scan_id: &str,
        pages_visited: usize,
        total_pages_found: usize,
    ) -> Result<()> {
        Database::record_scan_totals(self, scan_id, pages_visited, total_pages_found)
    }

    async fn query_in_progress_scan_ids(&self) -> Result<Vec<String>> {
        self.in_progress_scan_ids()
    }
}

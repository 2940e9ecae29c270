use crate::result::PageResult;
use async_trait::async_trait;
use std::sync::Mutex;

/// Durable destination for per-page results.
#[async_trait]
pub trait PageSink: Send + Sync {
    /// Appends one result. Returns `false` when a result for the same
    /// `(scan_id, url)` already exists and the append was ignored.
    async fn append_page_result(&self, result: &PageResult) -> anyhow::Result<bool>;
}

/// Keeps results in memory. Used for one-off crawls and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<PageResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<PageResult> {
        self.results
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PageSink for MemorySink {
    async fn append_page_result(&self, result: &PageResult) -> anyhow::Result<bool> {
        let mut results = self
            .results
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?;
        if results
            .iter()
            .any(|r| r.scan_id == result.scan_id && r.url == result.url)
        {
            return Ok(false);
        }
        results.push(result.clone());
        Ok(true)
    }
}

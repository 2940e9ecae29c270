use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Page load timed out after {0:?}")]
    Timeout(Duration),

    #[error("Crawl startup timed out after {0:?}")]
    StartupTimeout(Duration),

    #[error("Page analysis failed: {0}")]
    AnalyzerError(String),

    #[error("Result sink failed: {0}")]
    SinkError(String),

    #[error("Redirect refused, it leaves the crawl: {0}")]
    RedirectRefused(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    /// True for failures that belong to a single page rather than the whole crawl.
    pub fn is_page_local(&self) -> bool {
        matches!(
            self,
            ScanError::HttpError(_)
                | ScanError::Timeout(_)
                | ScanError::AnalyzerError(_)
                | ScanError::RedirectRefused(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

pub mod admission;
pub mod analyzer;
pub mod crawler;
pub mod error;
pub mod loader;
pub mod result;
pub mod sink;
pub mod urls;

pub use admission::AdmissionFilter;
pub use analyzer::{HtmlAnalyzer, PageAnalysis, PageAnalyzer};
pub use crawler::{
    CrawlProgress, CrawlRequest, CrawlSummary, Crawler, CrawlerConfig, ProgressCallback,
    StopReason,
};
pub use error::ScanError;
pub use loader::{HttpLoader, PageLoader, RenderedPage};
pub use result::{ContentKind, Impact, PageResult, PageStatus, Violation};
pub use sink::{MemorySink, PageSink};
pub use urls::normalize;

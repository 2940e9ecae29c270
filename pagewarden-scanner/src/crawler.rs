use crate::admission::AdmissionFilter;
use crate::analyzer::{HtmlAnalyzer, PageAnalyzer};
use crate::error::{Result, ScanError};
use crate::loader::{HttpLoader, PageLoader, RenderedPage};
use crate::result::{ContentKind, PageResult};
use crate::sink::PageSink;
use crate::urls::{normalize, resolve_link};
use futures::FutureExt;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Snapshot handed to progress observers after every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CrawlProgress {
    pub visited: usize,
    /// Unique URLs admitted to the frontier so far, the seed included.
    pub found: usize,
    pub frontier: usize,
}

pub type ProgressCallback = Arc<dyn Fn(CrawlProgress) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub scan_id: String,
    pub seed_url: String,
    pub max_pages: usize,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every reachable page within the depth limit was visited.
    Exhausted,
    /// The page cap was reached with work still in the frontier.
    PageLimit,
}

#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub scan_id: String,
    pub pages_visited: usize,
    pub pages_found: usize,
    pub page_errors: usize,
    pub stop_reason: StopReason,
    /// Admitted URLs still waiting in the frontier when the crawl stopped.
    pub unvisited: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub page_timeout: Duration,
    pub startup_timeout: Duration,
    pub page_delay: Duration,
    pub filter: AdmissionFilter,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(30),
            page_delay: Duration::from_millis(250),
            filter: AdmissionFilter::default(),
        }
    }
}

struct FrontierItem {
    url: String,
    depth: usize,
}

/// Bounded breadth-first crawler.
///
/// The crawler itself is stateless between crawls: every call to
/// [`Crawler::crawl`] owns its own frontier and visited set, so one instance
/// can serve many concurrent scans.
pub struct Crawler {
    loader: Arc<dyn PageLoader>,
    analyzer: Arc<dyn PageAnalyzer>,
    sink: Arc<dyn PageSink>,
    config: CrawlerConfig,
}

impl Crawler {
    pub fn new(
        loader: Arc<dyn PageLoader>,
        analyzer: Arc<dyn PageAnalyzer>,
        sink: Arc<dyn PageSink>,
    ) -> Self {
        Self {
            loader,
            analyzer,
            sink,
            config: CrawlerConfig::default(),
        }
    }

    /// Crawler with the plain HTTP loader and the structural HTML analyzer.
    pub fn http(sink: Arc<dyn PageSink>, config: CrawlerConfig) -> Result<Self> {
        let loader = HttpLoader::new(config.page_timeout, config.filter.clone())?;
        Ok(Self::new(Arc::new(loader), Arc::new(HtmlAnalyzer), sink).with_config(config))
    }

    pub fn with_config(mut self, config: CrawlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.config.page_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout = timeout;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.config.page_delay = delay;
        self
    }

    pub fn with_filter(mut self, filter: AdmissionFilter) -> Self {
        self.config.filter = filter;
        self
    }

    /// Crawls breadth-first from the request's seed, writing one result per
    /// visited page to the sink.
    ///
    /// Page-level failures are recorded and skipped. An error is returned only
    /// when the crawl as a whole cannot proceed: the loader failed to start,
    /// the seed is not a URL, or the sink rejected a write.
    pub async fn crawl(
        &self,
        request: &CrawlRequest,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<CrawlSummary> {
        info!(
            scan_id = %request.scan_id,
            "Starting crawl of {} (max pages {}, max depth {})",
            request.seed_url, request.max_pages, request.max_depth
        );

        let startup = self.config.startup_timeout;
        tokio::time::timeout(startup, self.loader.prepare())
            .await
            .map_err(|_| ScanError::StartupTimeout(startup))??;

        let seed = normalize(&request.seed_url);
        Url::parse(&seed).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", seed, e)))?;

        let mut frontier: VecDeque<FrontierItem> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut page_errors = 0;

        frontier.push_back(FrontierItem {
            url: seed.clone(),
            depth: 0,
        });
        seen.insert(seed.clone());

        while visited.len() < request.max_pages {
            let Some(item) = frontier.pop_front() else {
                break;
            };

            if visited.contains(&item.url) || item.depth > request.max_depth {
                continue;
            }
            visited.insert(item.url.clone());

            let result = self.visit(&request.scan_id, &item, &seed).await;
            if result.is_error() {
                page_errors += 1;
            }

            if item.depth < request.max_depth {
                for link in &result.links {
                    if seen.contains(link) {
                        continue;
                    }
                    if !self.config.filter.is_valid_for_crawl(link, &seed) {
                        debug!("Not admitting {}", link);
                        continue;
                    }
                    seen.insert(link.clone());
                    frontier.push_back(FrontierItem {
                        url: link.clone(),
                        depth: item.depth + 1,
                    });
                }
            }

            let inserted = self
                .sink
                .append_page_result(&result)
                .await
                .map_err(|e| ScanError::SinkError(format!("{e:#}")))?;
            if !inserted {
                warn!(scan_id = %request.scan_id, "Duplicate result for {} ignored", result.url);
            }

            if let Some(callback) = on_progress {
                report_progress(
                    callback,
                    CrawlProgress {
                        visited: visited.len(),
                        found: seen.len(),
                        frontier: frontier.len(),
                    },
                );
            }

            let more_work = !frontier.is_empty() && visited.len() < request.max_pages;
            if more_work && !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        let unvisited: Vec<String> = frontier
            .into_iter()
            .filter(|item| !visited.contains(&item.url))
            .map(|item| item.url)
            .collect();
        let stop_reason = if unvisited.is_empty() {
            StopReason::Exhausted
        } else {
            StopReason::PageLimit
        };

        info!(
            scan_id = %request.scan_id,
            "Crawl complete. Visited {} pages, found {}, {} page errors",
            visited.len(),
            seen.len(),
            page_errors
        );

        Ok(CrawlSummary {
            scan_id: request.scan_id.clone(),
            pages_visited: visited.len(),
            pages_found: seen.len(),
            page_errors,
            stop_reason,
            unvisited,
        })
    }

    /// Loads and analyzes one page. Never fails: every problem ends up in the
    /// returned result.
    async fn visit(&self, scan_id: &str, item: &FrontierItem, origin: &str) -> PageResult {
        debug!("Visiting [depth {}] {}", item.depth, item.url);

        let mut result = PageResult::new(scan_id, item.url.clone(), item.depth);

        let url = match Url::parse(&item.url) {
            Ok(url) => url,
            Err(e) => {
                result.fail(ScanError::InvalidUrl(format!("{}: {}", item.url, e)).to_string());
                return result;
            }
        };

        let timeout = self.config.page_timeout;
        let page = match tokio::time::timeout(timeout, self.loader.load(&url)).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                warn!("Failed to load {}: {}", item.url, e);
                result.fail(e.to_string());
                return result;
            }
            Err(_) => {
                warn!("Timed out loading {}", item.url);
                result.fail(ScanError::Timeout(timeout).to_string());
                return result;
            }
        };

        if page.was_redirected()
            && !self
                .config
                .filter
                .is_valid_for_crawl(&normalize(page.final_url.as_str()), origin)
        {
            warn!("{} redirected off the crawl to {}", item.url, page.final_url);
            result.fail(ScanError::RedirectRefused(page.final_url.to_string()).to_string());
            return result;
        }

        result.http_status = Some(page.status);
        result.content_kind = page.content_kind();
        if result.content_kind != ContentKind::Html {
            return result;
        }

        let analysis = AssertUnwindSafe(self.analyzer.analyze(&page)).catch_unwind();
        match tokio::time::timeout(timeout, analysis).await {
            Ok(Ok(Ok(analysis))) => {
                result.violations = analysis.violations;
                let (links, documents) = self.collect_links(&page, &analysis.links, origin);
                result.links = links;
                result.documents = documents;
            }
            Ok(Ok(Err(e))) => {
                warn!("Analyzer failed on {}: {}", item.url, e);
                result.fail(e.to_string());
            }
            Ok(Err(_)) => {
                warn!("Analyzer panicked on {}", item.url);
                result.fail(ScanError::AnalyzerError("analyzer panicked".to_string()).to_string());
            }
            Err(_) => {
                warn!("Analyzer timed out on {}", item.url);
                result.fail(ScanError::Timeout(timeout).to_string());
            }
        }

        result
    }

    /// Resolves raw hrefs against the page, normalizes them and splits out
    /// same-origin document links. Order of first appearance is kept.
    fn collect_links(
        &self,
        page: &RenderedPage,
        hrefs: &[String],
        origin: &str,
    ) -> (Vec<String>, Vec<String>) {
        let mut unique = HashSet::new();
        let mut links = Vec::new();
        let mut documents = Vec::new();

        for href in hrefs {
            let Some(resolved) = resolve_link(&page.final_url, href) else {
                continue;
            };
            let link = normalize(resolved.as_str());
            if !unique.insert(link.clone()) {
                continue;
            }
            if self.config.filter.is_document_link(&link, origin) {
                documents.push(link.clone());
            }
            links.push(link);
        }

        (links, documents)
    }
}

fn report_progress(callback: &ProgressCallback, progress: CrawlProgress) {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(progress)));
    if outcome.is_err() {
        warn!("Progress callback panicked; continuing crawl");
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Critical,
    Serious,
    Moderate,
    Minor,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::Critical => "critical",
            Impact::Serious => "serious",
            Impact::Moderate => "moderate",
            Impact::Minor => "minor",
        }
    }
}

/// A single accessibility rule failure reported by a page analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub impact: Impact,
    pub description: String,
    pub help: Option<String>,
    /// Short snippets or selectors identifying the offending elements.
    pub targets: Vec<String>,
}

impl Violation {
    pub fn new(rule_id: &str, impact: Impact, description: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            impact,
            description: description.to_string(),
            help: None,
            targets: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    pub fn with_target(mut self, target: String) -> Self {
        self.targets.push(target);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Ok,
    Error,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Ok => "ok",
            PageStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(PageStatus::Ok),
            "error" => Some(PageStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Html,
    Pdf,
    Other,
}

impl ContentKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let content_type = content_type.map(str::to_ascii_lowercase);
        match content_type.as_deref() {
            Some(ct) if ct.contains("application/pdf") => ContentKind::Pdf,
            Some(ct) if ct.contains("text/html") || ct.contains("application/xhtml") => {
                ContentKind::Html
            }
            // Servers that omit the header are overwhelmingly serving HTML
            None => ContentKind::Html,
            Some(_) => ContentKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Html => "html",
            ContentKind::Pdf => "pdf",
            ContentKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "html" => Some(ContentKind::Html),
            "pdf" => Some(ContentKind::Pdf),
            "other" => Some(ContentKind::Other),
            _ => None,
        }
    }
}

/// The persisted outcome of visiting one page during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub scan_id: String,
    pub url: String,
    /// Link hops from the seed url; the seed itself is depth 0.
    pub depth: usize,
    pub status: PageStatus,
    pub http_status: Option<u16>,
    pub content_kind: ContentKind,
    pub violations: Vec<Violation>,
    pub links: Vec<String>,
    /// Same-origin document links (pdf) found on the page; never crawled.
    pub documents: Vec<String>,
    pub error: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl PageResult {
    pub fn new(scan_id: &str, url: String, depth: usize) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            url,
            depth,
            status: PageStatus::Ok,
            http_status: None,
            content_kind: ContentKind::Html,
            violations: Vec::new(),
            links: Vec::new(),
            documents: Vec::new(),
            error: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_error(scan_id: &str, url: String, depth: usize, error: String) -> Self {
        let mut result = Self::new(scan_id, url, depth);
        result.fail(error);
        result
    }

    /// Marks the result as failed. Violations gathered so far are discarded.
    pub fn fail(&mut self, error: String) {
        self.status = PageStatus::Error;
        self.violations.clear();
        self.error = Some(error);
    }

    pub fn is_error(&self) -> bool {
        self.status == PageStatus::Error
    }
}

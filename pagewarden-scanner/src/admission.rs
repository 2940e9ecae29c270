//! Admission checks for submitted seeds and discovered links.
//!
//! Both predicates are fail-closed: anything that does not parse is rejected.

use std::net::IpAddr;
use url::Url;

pub const MAX_URL_LENGTH: usize = 500;

/// File extensions that never lead to an HTML page worth analyzing.
const BLOCKED_EXTENSIONS: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "bmp", "tif", "tiff", "avif",
    // archives
    "zip", "gz", "tgz", "tar", "rar", "7z", "bz2", "xz",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // styles and scripts
    "css", "js", "mjs", "map", "json", "xml",
    // media
    "mp3", "mp4", "webm", "avi", "mov", "wav", "ogg",
    // documents
    "pdf", "csv", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // binaries
    "exe", "dmg", "msi", "apk", "bin", "iso",
];

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf"];

/// Path fragments of pages generated by the reporting side of the service.
/// Crawling them would scan our own reports, which link to every scanned page.
const REPORT_PATH_MARKERS: &[&str] = &["/reports/", "/report/", "/scan-report", "/a11y-report"];

#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    allow_loopback: bool,
    report_markers: Vec<String>,
}

impl Default for AdmissionFilter {
    fn default() -> Self {
        Self {
            allow_loopback: false,
            report_markers: REPORT_PATH_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl AdmissionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permits localhost and loopback targets. Only for local testing.
    pub fn with_allow_loopback(mut self, allow: bool) -> Self {
        self.allow_loopback = allow;
        self
    }

    pub fn with_report_marker(mut self, marker: &str) -> Self {
        self.report_markers.push(marker.to_lowercase());
        self
    }

    /// Generic admission check for any URL that may be queued or crawled.
    pub fn should_allow(&self, url: &str) -> bool {
        if url.is_empty() || url.len() > MAX_URL_LENGTH {
            return false;
        }

        let Ok(parsed) = Url::parse(url) else {
            return false;
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }

        let Some(host) = parsed.host_str() else {
            return false;
        };

        if !self.allow_loopback && is_loopback_host(host) {
            return false;
        }

        let path = parsed.path().to_lowercase();
        if has_extension(&path, BLOCKED_EXTENSIONS) {
            return false;
        }

        !self
            .report_markers
            .iter()
            .any(|marker| path.contains(marker.as_str()))
    }

    /// Admission check for links discovered while crawling `origin_url`.
    /// Adds a same-host requirement on top of [`Self::should_allow`].
    pub fn is_valid_for_crawl(&self, url: &str, origin_url: &str) -> bool {
        if !self.should_allow(url) {
            return false;
        }
        match (Url::parse(url), Url::parse(origin_url)) {
            (Ok(candidate), Ok(origin)) => match (candidate.host_str(), origin.host_str()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            },
            _ => false,
        }
    }

    /// True for same-host links to documents the engine records but never crawls.
    pub fn is_document_link(&self, url: &str, origin_url: &str) -> bool {
        if url.len() > MAX_URL_LENGTH {
            return false;
        }
        let (Ok(candidate), Ok(origin)) = (Url::parse(url), Url::parse(origin_url)) else {
            return false;
        };
        let same_host = match (candidate.host_str(), origin.host_str()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        };
        same_host && has_extension(&candidate.path().to_lowercase(), DOCUMENT_EXTENSIONS)
    }
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((_, ext)) => extensions.contains(&ext),
        None => false,
    }
}

fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.to_lowercase().ends_with(".localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_plain_pages() {
        let filter = AdmissionFilter::default();
        assert!(filter.should_allow("https://example.com/"));
        assert!(filter.should_allow("http://example.com/about?lang=en"));
        assert!(filter.should_allow("https://example.com/v1.2/notes"));
    }

    #[test]
    fn test_rejects_malformed_and_non_http() {
        let filter = AdmissionFilter::default();
        assert!(!filter.should_allow(""));
        assert!(!filter.should_allow("not a url"));
        assert!(!filter.should_allow("ftp://example.com/file"));
        assert!(!filter.should_allow("mailto:a@example.com"));
        assert!(!filter.should_allow("javascript:alert(1)"));
    }

    #[test]
    fn test_rejects_loopback() {
        let filter = AdmissionFilter::default();
        assert!(!filter.should_allow("http://localhost:3000/"));
        assert!(!filter.should_allow("http://127.0.0.1/"));
        assert!(!filter.should_allow("http://[::1]/"));
        assert!(!filter.should_allow("http://app.localhost/"));
        assert!(!filter.should_allow("http://0.0.0.0/"));

        let permissive = AdmissionFilter::default().with_allow_loopback(true);
        assert!(permissive.should_allow("http://127.0.0.1:8080/page"));
    }

    #[test]
    fn test_rejects_blocked_extensions() {
        let filter = AdmissionFilter::default();
        for url in [
            "https://example.com/logo.PNG",
            "https://example.com/assets/app.js",
            "https://example.com/site.css",
            "https://example.com/font.woff2",
            "https://example.com/backup.zip",
            "https://example.com/brochure.pdf",
            "https://example.com/export.csv",
        ] {
            assert!(!filter.should_allow(url), "{url} should be rejected");
        }
    }

    #[test]
    fn test_rejects_report_pages() {
        let filter = AdmissionFilter::default();
        assert!(!filter.should_allow("https://example.com/reports/abc123"));
        assert!(!filter.should_allow("https://example.com/scan-report?id=9"));

        let custom = AdmissionFilter::default().with_report_marker("/Audit-Output/");
        assert!(!custom.should_allow("https://example.com/audit-output/1"));
    }

    #[test]
    fn test_rejects_overlong_urls() {
        let filter = AdmissionFilter::default();
        let url = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(!filter.should_allow(&url));
    }

    #[test]
    fn test_crawl_requires_same_host() {
        let filter = AdmissionFilter::default();
        let origin = "https://example.com/";
        assert!(filter.is_valid_for_crawl("https://example.com/a", origin));
        assert!(filter.is_valid_for_crawl("http://EXAMPLE.com/b", origin));
        assert!(!filter.is_valid_for_crawl("https://other.com/c", origin));
        assert!(!filter.is_valid_for_crawl("https://sub.example.com/", origin));
        assert!(!filter.is_valid_for_crawl("https://example.com/a", "not a url"));
    }

    #[test]
    fn test_document_links() {
        let filter = AdmissionFilter::default();
        let origin = "https://example.com/";
        assert!(filter.is_document_link("https://example.com/files/report.pdf", origin));
        assert!(!filter.is_document_link("https://other.com/report.pdf", origin));
        assert!(!filter.is_document_link("https://example.com/page", origin));
    }
}

//! URL canonicalization and link resolution.
//!
//! [`normalize`] is the identity function for deduplication: every URL that
//! enters a visited set, a frontier or the durable queue goes through it.

use url::Url;

/// Canonicalizes a raw URL string.
///
/// The host is lowercased, the fragment dropped, and trailing slashes are
/// stripped from the path unless the path is exactly `/`. Query strings are
/// kept as-is. Input that does not parse as an absolute URL is returned
/// unchanged.
pub fn normalize(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.to_string();
    };

    url.set_fragment(None);

    if let Some(host) = url.host_str() {
        let lowered = host.to_lowercase();
        if lowered != host && url.set_host(Some(&lowered)).is_err() {
            return raw.to_string();
        }
    }

    // Stripping every trailing slash, not just one, keeps normalize idempotent
    // for paths like `/a//`.
    if !url.cannot_be_a_base() {
        let path = url.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/');
            let trimmed = if trimmed.is_empty() { "/" } else { trimmed }.to_string();
            url.set_path(&trimmed);
        }
    }

    url.to_string()
}

/// Resolves an href found on `base` into an absolute URL.
///
/// Returns `None` for empty hrefs, fragment-only anchors and non-navigational
/// schemes (`javascript:`, `mailto:`, `tel:`, `data:`).
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("tel:")
        || lowered.starts_with("data:")
    {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    Some(resolved)
}

/// Lowercased host of a URL, used as the domain key for scheduling.
pub fn domain_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Extract the path component from a URL
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

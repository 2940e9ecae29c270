use crate::admission::AdmissionFilter;
use crate::error::{Result, ScanError};
use crate::urls::normalize;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::result::ContentKind;

const MAX_REDIRECTS: usize = 5;

/// A fetched page, ready for analysis.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub requested_url: Url,
    /// Where the page ended up after redirects. Relative links resolve against this.
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl RenderedPage {
    pub fn html(url: Url, status: u16, body: &str) -> Self {
        Self {
            requested_url: url.clone(),
            final_url: url,
            status,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.to_string(),
        }
    }

    pub fn content_kind(&self) -> ContentKind {
        ContentKind::from_content_type(self.content_type.as_deref())
    }

    pub fn was_redirected(&self) -> bool {
        self.final_url != self.requested_url
    }
}

/// Fetches pages for the crawl engine.
#[async_trait]
pub trait PageLoader: Send + Sync {
    /// Acquires whatever the loader needs before the first page (a browser,
    /// a session, a warm connection). Bounded by the crawl startup timeout.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self, url: &Url) -> Result<RenderedPage>;
}

/// Plain HTTP loader backed by a pooled reqwest client.
///
/// Redirects are followed only while every hop stays on the requested host
/// and passes `filter`.
pub struct HttpLoader {
    client: Client,
}

impl HttpLoader {
    pub fn new(timeout: Duration, filter: AdmissionFilter) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(
                "pagewarden/",
                env!("CARGO_PKG_VERSION"),
                " (+https://github.com/trapdoorsec/pagewarden)"
            ))
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(redirect_policy(filter))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageLoader for HttpLoader {
    async fn load(&self, url: &Url) -> Result<RenderedPage> {
        debug!("Fetching {}", url);

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_redirect() {
                let target = e.url().map(Url::to_string).unwrap_or_default();
                ScanError::RedirectRefused(target)
            } else {
                ScanError::HttpError(e)
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // Only HTML bodies are analyzed; everything else is recorded by type alone
        let body = match ContentKind::from_content_type(content_type.as_deref()) {
            ContentKind::Html => response.text().await?,
            ContentKind::Pdf | ContentKind::Other => String::new(),
        };

        if final_url.host_str().is_none() {
            return Err(ScanError::InvalidUrl(format!(
                "redirected to a url without a host: {}",
                final_url
            )));
        }

        Ok(RenderedPage {
            requested_url: url.clone(),
            final_url,
            status,
            content_type,
            body,
        })
    }
}

fn redirect_policy(filter: AdmissionFilter) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let on_site = attempt.previous().first().is_some_and(|origin| {
            filter.is_valid_for_crawl(&normalize(attempt.url().as_str()), origin.as_str())
        });
        if on_site {
            attempt.follow()
        } else {
            attempt.error("redirect leaves the crawl")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn local() -> AdmissionFilter {
        AdmissionFilter::default().with_allow_loopback(true)
    }

    #[tokio::test]
    async fn test_load_html_page() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>Hi</body></html>", "text/html"),
            )
            .mount(&mock_server)
            .await;

        let loader = HttpLoader::new(Duration::from_secs(5), local()).unwrap();
        let url = Url::parse(&mock_server.uri()).unwrap();
        let page = loader.load(&url).await.unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.content_kind(), ContentKind::Html);
        assert!(page.body.contains("Hi"));
    }

    #[tokio::test]
    async fn test_load_pdf_skips_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"%PDF-1.4".to_vec(), "application/pdf"),
            )
            .mount(&mock_server)
            .await;

        let loader = HttpLoader::new(Duration::from_secs(5), local()).unwrap();
        let url = Url::parse(&format!("{}/doc.pdf", mock_server.uri())).unwrap();
        let page = loader.load(&url).await.unwrap();

        assert_eq!(page.content_kind(), ContentKind::Pdf);
        assert!(page.body.is_empty());
    }

    #[tokio::test]
    async fn test_load_reports_http_errors_as_pages() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).insert_header("content-type", "text/html"))
            .mount(&mock_server)
            .await;

        let loader = HttpLoader::new(Duration::from_secs(5), local()).unwrap();
        let url = Url::parse(&format!("{}/missing", mock_server.uri())).unwrap();
        let page = loader.load(&url).await.unwrap();

        assert_eq!(page.status, 404);
    }

    #[tokio::test]
    async fn test_load_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let loader = HttpLoader::new(Duration::from_millis(100), local()).unwrap();
        let url = Url::parse(&format!("{}/slow", mock_server.uri())).unwrap();
        let err = loader.load(&url).await.unwrap_err();

        assert!(err.is_page_local());
    }

    #[tokio::test]
    async fn test_follows_same_host_redirects() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
            .mount(&mock_server)
            .await;

        let loader = HttpLoader::new(Duration::from_secs(5), local()).unwrap();
        let url = Url::parse(&format!("{}/old", mock_server.uri())).unwrap();
        let page = loader.load(&url).await.unwrap();

        assert!(page.was_redirected());
        assert_eq!(page.final_url.path(), "/new");
    }

    #[tokio::test]
    async fn test_refuses_redirect_to_another_host() {
        let site = MockServer::start().await;
        let elsewhere = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/offsite"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
            .mount(&elsewhere)
            .await;
        // same machine, different host name
        let target = format!("http://localhost:{}/offsite", elsewhere.address().port());
        Mock::given(method("GET"))
            .and(path("/go"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", target.as_str()))
            .mount(&site)
            .await;

        let loader = HttpLoader::new(Duration::from_secs(5), local()).unwrap();
        let url = Url::parse(&format!("{}/go", site.uri())).unwrap();
        let err = loader.load(&url).await.unwrap_err();

        assert!(matches!(err, ScanError::RedirectRefused(_)));
        assert!(err.is_page_local());
        assert!(elsewhere.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refuses_redirect_to_loopback() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/go"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/internal"))
            .mount(&mock_server)
            .await;

        let loader = HttpLoader::new(Duration::from_secs(5), AdmissionFilter::default()).unwrap();
        let url = Url::parse(&format!("{}/go", mock_server.uri())).unwrap();
        let err = loader.load(&url).await.unwrap_err();

        assert!(matches!(err, ScanError::RedirectRefused(_)));
    }
}

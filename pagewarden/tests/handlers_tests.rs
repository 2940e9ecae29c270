use pagewarden::handlers::*;
use pagewarden_core::data::{Database, ScanStatus};
use pagewarden_core::SchedulerConfig;
use pagewarden_scanner::{AdmissionFilter, CrawlerConfig, PageStatus};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_db() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("pagewarden.db");
    (temp_dir, db_path)
}

fn local_config() -> CrawlerConfig {
    CrawlerConfig {
        page_timeout: Duration::from_secs(5),
        startup_timeout: Duration::from_secs(5),
        page_delay: Duration::ZERO,
        filter: AdmissionFilter::default().with_allow_loopback(true),
    }
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
}

// ============================================================================
// Submission hygiene
// ============================================================================

#[test]
fn test_parse_url_line_with_scheme() {
    let result = parse_url_line("https://example.com/about/");
    assert_eq!(result, Some("https://example.com/about".to_string()));
}

#[test]
fn test_parse_url_line_without_scheme() {
    let result = parse_url_line("Example.com");
    assert_eq!(result, Some("https://example.com/".to_string()));
}

#[test]
fn test_parse_url_line_invalid() {
    assert_eq!(parse_url_line("not a valid url!!!"), None);
    assert_eq!(parse_url_line("https://"), None);
}

#[test]
fn test_report_boilerplate_is_rejected() {
    let filter = AdmissionFilter::default();
    for line in [
        "Scan complete for https://example.com",
        "Thank-you-for-using-our-service",
        "Error:https://example.com",
    ] {
        assert!(check_submission(line, &filter).is_err(), "{line} should be rejected");
    }
}

#[test]
fn test_submission_goes_through_admission_filter() {
    let filter = AdmissionFilter::default();
    assert!(check_submission("http://localhost:8080", &filter).is_err());
    assert!(check_submission("ftp://example.com", &filter).is_err());
    assert!(check_submission("https://example.com/logo.png", &filter).is_err());

    let local = AdmissionFilter::default().with_allow_loopback(true);
    assert_eq!(
        check_submission("http://localhost:8080", &local),
        Ok("http://localhost:8080/".to_string())
    );
}

#[test]
fn test_extract_url_path() {
    assert_eq!(
        pagewarden::extract_url_path("https://example.com/docs/guide"),
        "/docs/guide"
    );
    assert_eq!(pagewarden::extract_url_path("https://example.com"), "/");
}

#[test]
fn test_load_urls_from_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(temp_file, "https://example.com")?;
    writeln!(temp_file, "example.org/contact")?;
    writeln!(temp_file)?; // Empty line
    writeln!(temp_file, "Scan results attached")?;
    writeln!(temp_file, "https://docs.example.com/")?;

    let path = PathBuf::from(temp_file.path());
    let urls = load_urls_from_file(&path)?;

    assert_eq!(
        urls,
        vec![
            "https://example.com/",
            "https://example.org/contact",
            "https://docs.example.com/"
        ]
    );

    Ok(())
}

#[test]
fn test_load_urls_from_file_empty() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file).unwrap();
    writeln!(temp_file, "   ").unwrap();

    let result = load_urls_from_file(temp_file.path());
    assert!(result.is_err());
    assert!(result.unwrap_err().contains("No valid URLs"));
}

#[test]
fn test_load_urls_from_missing_file() {
    let result = load_urls_from_file(std::path::Path::new("/nonexistent/seeds.txt"));
    assert!(result.unwrap_err().contains("Failed to read hosts file"));
}

// ============================================================================
// Database and queue handlers
// ============================================================================

#[test]
fn test_resolve_db_path_expands_tilde() {
    let resolved = resolve_db_path("~/pagewarden.db");
    assert!(!resolved.to_string_lossy().starts_with('~'));
    assert_eq!(resolve_db_path("/tmp/pw.db"), PathBuf::from("/tmp/pw.db"));
}

#[test]
fn test_init_creates_and_refuses_to_overwrite() {
    let (_temp, db_path) = create_test_db();

    handle_init(&db_path, false).unwrap();
    assert!(Database::exists(&db_path));

    assert!(handle_init(&db_path, false).is_err());
}

#[test]
fn test_init_force_recreates() {
    let (_temp, db_path) = create_test_db();
    {
        let db = open_database(&db_path).unwrap();
        handle_enqueue(
            &db,
            &["https://example.com".to_string()],
            5,
            1,
            &AdmissionFilter::default(),
        )
        .unwrap();
    }

    handle_init(&db_path, true).unwrap();

    let db = open_database(&db_path).unwrap();
    assert_eq!(db.seed_count().unwrap(), 0);
}

#[test]
fn test_enqueue_list_and_remove() {
    let (_temp, db_path) = create_test_db();
    let db = open_database(&db_path).unwrap();
    let filter = AdmissionFilter::default();

    let submissions = vec![
        "example.com".to_string(),
        "https://example.com/".to_string(),
        "Thank you".to_string(),
        "https://other.example/start".to_string(),
    ];
    let queued = handle_enqueue(&db, &submissions, 10, 2, &filter).unwrap();
    assert_eq!(queued, 3);

    // the first two are the same seed
    let seeds = handle_queue_list(&db).unwrap();
    let urls: Vec<&str> = seeds.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(urls, vec!["https://example.com/", "https://other.example/start"]);

    assert!(handle_queue_remove(&db, "example.com").unwrap());
    assert!(!handle_queue_remove(&db, "example.com").unwrap());
    assert_eq!(db.seed_count().unwrap(), 1);
}

#[test]
fn test_status_without_scans() {
    let (_temp, db_path) = create_test_db();
    let db = open_database(&db_path).unwrap();

    let status = render_status(&db, None, 10).unwrap();
    assert!(status.contains("No scans yet."));
    assert!(status.contains("0 seed urls queued"));

    assert!(render_status(&db, Some("missing"), 10).is_err());
}

// ============================================================================
// Scanning
// ============================================================================

#[tokio::test]
async fn test_one_shot_scan_against_local_site() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html lang="en"><head><title>Home</title></head><body>
                <a href="/about">About</a>
                <a href="/guide.pdf">Guide</a>
                <a href="https://elsewhere.example/">Elsewhere</a>
            </body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html(
            r#"<html><head><title>About</title></head><body><img src="team.png"></body></html>"#,
        ))
        .mount(&server)
        .await;

    let (_temp, db_path) = create_test_db();
    let db = open_database(&db_path).unwrap();

    let scan_id = handle_scan(db.clone(), &server.uri(), 10, 2, local_config(), true)
        .await
        .unwrap();

    let scan = db.get_scan(&scan_id).unwrap().unwrap();
    assert_eq!(scan.status, ScanStatus::Completed);
    assert_eq!(scan.pages_visited, 2);

    let results = db.get_page_results(&scan_id).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == PageStatus::Ok));
    assert_eq!(results[0].documents, vec![format!("{}/guide.pdf", server.uri())]);
    assert!(results[1].violations.iter().any(|v| v.rule_id == "image-alt"));

    let status = render_status(&db, Some(&scan_id), 10).unwrap();
    assert!(status.contains("/about"));
}

#[tokio::test]
async fn test_scan_rejects_inadmissible_seed() {
    let (_temp, db_path) = create_test_db();
    let db = open_database(&db_path).unwrap();

    let config = CrawlerConfig::default();
    let result = handle_scan(db.clone(), "http://localhost:9", 10, 2, config, true).await;

    assert!(result.is_err());
    assert!(db.list_scans(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_run_processes_queue_until_shutdown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<html lang=\"en\"><title>Queued</title></html>"))
        .mount(&server)
        .await;

    let (_temp, db_path) = create_test_db();
    let db = open_database(&db_path).unwrap();
    let filter = AdmissionFilter::default().with_allow_loopback(true);
    handle_enqueue(&db, &[server.uri()], 5, 1, &filter).unwrap();

    handle_run(
        db.clone(),
        SchedulerConfig::default(),
        local_config(),
        tokio::time::sleep(Duration::from_millis(500)),
    )
    .await
    .unwrap();

    let scans = db.list_scans(10).unwrap();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].status, ScanStatus::Completed);
    assert_eq!(db.seed_count().unwrap(), 0);
}

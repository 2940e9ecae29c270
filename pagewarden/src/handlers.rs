use anyhow::{Context, anyhow, bail};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use pagewarden_core::data::{Database, NewScan, ScanStatus, SeedEntry, new_scan_id};
use pagewarden_core::summary::{generate_scan_list, generate_scan_report};
use pagewarden_core::{ScanProgressCallback, Scheduler, SchedulerConfig};
use pagewarden_scanner::urls::normalize;
use pagewarden_scanner::{
    AdmissionFilter, CrawlProgress, CrawlRequest, Crawler, CrawlerConfig, PageResult, PageSink,
    ProgressCallback,
};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Substrings that mark a line as pasted report or email text rather than a url.
const REPORT_MARKERS: [&str; 3] = ["Scan", "Thank", "Error:"];

// Database location

pub fn resolve_db_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Opens the database, creating it and its directory on first use.
pub fn open_database(path: &Path) -> anyhow::Result<Arc<Database>> {
    if !Database::exists(path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        info!("Creating database at {}", path.display());
    }
    let db = Database::new(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(db))
}

pub fn handle_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if Database::exists(path) {
        if !force {
            bail!(
                "A database already exists at {} (use --force to recreate it)",
                path.display()
            );
        }
        Database::drop(path)
            .with_context(|| format!("Failed to delete {}", path.display()))?;
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            let _ = fs::remove_file(sidecar);
        }
        println!("{} Existing database removed", "✓".green().bold());
    }

    open_database(path)?;
    println!(
        "{} Database created at {}",
        "✓".green().bold(),
        path.display().to_string().cyan()
    );
    Ok(())
}

// Submission hygiene

/// Turns one submitted line into a normalized seed url, or says why not.
///
/// Pasted report text is rejected, a missing scheme becomes `https://`, and
/// the result must pass the admission filter.
pub fn check_submission(line: &str, filter: &AdmissionFilter) -> Result<String, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err("empty line".to_string());
    }
    if let Some(marker) = REPORT_MARKERS.iter().find(|m| line.contains(**m)) {
        return Err(format!("looks like pasted report text (contains '{marker}')"));
    }
    if line.chars().any(char::is_whitespace) {
        return Err("contains whitespace".to_string());
    }

    let candidate = if line.contains("://") {
        line.to_string()
    } else {
        format!("https://{line}")
    };
    let url = Url::parse(&candidate).map_err(|e| format!("not a valid url: {e}"))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err("no host".to_string());
    }

    let normalized = normalize(url.as_str());
    if !filter.should_allow(&normalized) {
        return Err("not an admissible page url".to_string());
    }
    Ok(normalized)
}

/// Parse a single line as a seed url with the default admission rules.
pub fn parse_url_line(line: &str) -> Option<String> {
    match check_submission(line, &AdmissionFilter::default()) {
        Ok(url) => Some(url),
        Err(reason) => {
            eprintln!("{}  Skipping '{}': {}", "⚠".yellow(), line, reason);
            None
        }
    }
}

/// Load and parse seed urls from a newline-delimited file
pub fn load_urls_from_file(path: &Path) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| parse_url_line(line.trim()))
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

// Queue

/// Queues every admissible submission. Returns how many were queued.
pub fn handle_enqueue(
    db: &Database,
    submissions: &[String],
    max_pages: usize,
    max_depth: usize,
    filter: &AdmissionFilter,
) -> anyhow::Result<usize> {
    let mut queued = 0;
    for raw in submissions {
        let url = match check_submission(raw, filter) {
            Ok(url) => url,
            Err(reason) => {
                println!("{} Skipping '{}': {}", "✗".red().bold(), raw, reason);
                continue;
            }
        };
        let entry = SeedEntry::new(&url, max_pages, max_depth)?;
        db.enqueue_seed(&entry)?;
        println!(
            "{} Queued {} ({} pages, depth {})",
            "✓".green().bold(),
            url.cyan(),
            max_pages,
            max_depth
        );
        queued += 1;
    }
    Ok(queued)
}

pub fn handle_queue_list(db: &Database) -> anyhow::Result<Vec<SeedEntry>> {
    let seeds = db.peek_seeds(db.seed_count()?)?;
    if seeds.is_empty() {
        println!("The queue is empty.");
        return Ok(seeds);
    }
    for seed in &seeds {
        let queued_at = chrono::DateTime::from_timestamp_millis(seed.enqueued_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "  {}  {} {}",
            queued_at.dimmed(),
            seed.url.cyan(),
            format!("({} pages, depth {})", seed.max_pages, seed.max_depth).dimmed()
        );
    }
    println!("{} queued", seeds.len());
    Ok(seeds)
}

/// Removes a queued url. Accepts the url as submitted or as stored.
pub fn handle_queue_remove(db: &Database, url: &str) -> anyhow::Result<bool> {
    let candidate = if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    let removed = db.remove_seed(&normalize(&candidate))?;
    if removed {
        println!("{} Removed {}", "✓".green().bold(), url);
    } else {
        println!("{} {} is not queued", "✗".red().bold(), url);
    }
    Ok(removed)
}

// Scanning

fn spinner(quiet: bool) -> anyhow::Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

fn progress_message(progress: CrawlProgress) -> String {
    format!(
        "{} visited, {} found, {} queued",
        progress.visited, progress.found, progress.frontier
    )
}

/// Crawls one seed in the foreground, bypassing the queue, and prints the
/// report. Returns the scan id.
pub async fn handle_scan(
    db: Arc<Database>,
    url: &str,
    max_pages: usize,
    max_depth: usize,
    config: CrawlerConfig,
    quiet: bool,
) -> anyhow::Result<String> {
    let seed_url =
        check_submission(url, &config.filter).map_err(|reason| anyhow!("Cannot scan {url}: {reason}"))?;
    let seed = SeedEntry::new(&seed_url, max_pages, max_depth)?;
    let scan_id = new_scan_id();
    db.create_scan(&NewScan::for_seed(&scan_id, &seed, ScanStatus::InProgress))?;

    let sink: Arc<dyn PageSink> = db.clone();
    let crawler = Crawler::http(sink, config)?;

    let bar = spinner(quiet)?;
    bar.set_message(format!("Scanning {}", seed.url));
    let progress_bar = bar.clone();
    let on_progress: ProgressCallback = Arc::new(move |progress: CrawlProgress| {
        progress_bar.set_message(progress_message(progress));
    });

    let request = CrawlRequest {
        scan_id: scan_id.clone(),
        seed_url: seed.url.clone(),
        max_pages,
        max_depth,
    };
    let outcome = crawler.crawl(&request, Some(&on_progress)).await;
    bar.finish_and_clear();

    match outcome {
        Ok(summary) => {
            db.record_scan_totals(&scan_id, summary.pages_visited, summary.pages_found)?;
            db.update_scan_status(&scan_id, ScanStatus::Completed, None)?;
        }
        Err(e) => {
            let message = e.to_string();
            db.update_scan_status(&scan_id, ScanStatus::Failed, Some(&message))?;
            db.insert_page_result(&PageResult::with_error(&scan_id, seed.url.clone(), 0, message))?;
        }
    }

    let scan = db
        .get_scan(&scan_id)?
        .ok_or_else(|| anyhow!("Scan {scan_id} disappeared from the database"))?;
    let results = db.get_page_results(&scan_id)?;
    print!("{}", generate_scan_report(&scan, &results));

    Ok(scan_id)
}

/// Processes the queue until `shutdown` resolves.
pub async fn handle_run<F>(
    db: Arc<Database>,
    scheduler_config: SchedulerConfig,
    crawler_config: CrawlerConfig,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let sink: Arc<dyn PageSink> = db.clone();
    let crawler = Arc::new(Crawler::http(sink, crawler_config)?);

    let progress: ScanProgressCallback = Arc::new(|scan_id: &str, progress: CrawlProgress| {
        debug!(scan_id = %scan_id, "{}", progress_message(progress));
    });
    let scheduler = Scheduler::new(db.clone(), db.clone(), crawler)
        .with_config(scheduler_config)
        .with_progress(progress);

    println!(
        "{} Processing the scan queue ({} waiting). Press Ctrl-C to stop.",
        "→".cyan().bold(),
        db.seed_count()?
    );
    scheduler.run(shutdown).await;
    println!("{} Stopped", "✓".green().bold());
    Ok(())
}

// Status

pub fn render_status(db: &Database, scan_id: Option<&str>, limit: usize) -> anyhow::Result<String> {
    if let Some(id) = scan_id {
        let scan = db
            .get_scan(id)?
            .ok_or_else(|| anyhow!("No scan with id {id}"))?;
        let results = db.get_page_results(id)?;
        return Ok(generate_scan_report(&scan, &results));
    }

    let scans = db.list_scans(limit)?;
    let mut out = if scans.is_empty() {
        "No scans yet.\n".to_string()
    } else {
        generate_scan_list(&scans)
    };
    out.push_str(&format!("{} seed urls queued\n", db.seed_count()?));
    Ok(out)
}

pub fn handle_status(db: &Database, scan_id: Option<&str>, limit: usize) -> anyhow::Result<()> {
    print!("{}", render_status(db, scan_id, limit)?);
    Ok(())
}

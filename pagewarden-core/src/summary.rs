use crate::data::{ScanRecord, ScanStatus};
use colored::{ColoredString, Colorize};
use pagewarden_scanner::urls::extract_url_path;
use pagewarden_scanner::{ContentKind, Impact, PageResult};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

pub fn status_label(status: ScanStatus) -> ColoredString {
    match status {
        ScanStatus::Pending => status.as_str().white(),
        ScanStatus::InProgress => status.as_str().cyan(),
        ScanStatus::Completed => status.as_str().green(),
        ScanStatus::Failed => status.as_str().red(),
    }
}

fn impact_label(impact: Impact) -> ColoredString {
    match impact {
        Impact::Critical => impact.as_str().red().bold(),
        Impact::Serious => impact.as_str().red(),
        Impact::Moderate => impact.as_str().yellow(),
        Impact::Minor => impact.as_str().white(),
    }
}

fn http_label(status: Option<u16>) -> ColoredString {
    match status {
        Some(code @ 200..=299) => code.to_string().green(),
        Some(code @ 300..=399) => code.to_string().cyan(),
        Some(code @ 400..=499) => code.to_string().yellow(),
        Some(code @ 500..=599) => code.to_string().red(),
        Some(code) => code.to_string().normal(),
        None => "---".dimmed(),
    }
}

/// Violation totals per impact, most severe first.
pub fn impact_counts(results: &[PageResult]) -> [(Impact, usize); 4] {
    let mut counts = [
        (Impact::Critical, 0),
        (Impact::Serious, 0),
        (Impact::Moderate, 0),
        (Impact::Minor, 0),
    ];
    for violation in results.iter().flat_map(|r| &r.violations) {
        if let Some(entry) = counts.iter_mut().find(|(impact, _)| *impact == violation.impact) {
            entry.1 += 1;
        }
    }
    counts
}

/// Full report for one scan: totals, then one line per page.
pub fn generate_scan_report(scan: &ScanRecord, results: &[PageResult]) -> String {
    let mut report = String::new();
    report.push_str(RULE);
    report.push_str("\n\n");
    report.push_str(&format!("# Scan {}\n", scan.id));
    report.push_str(&format!("  Seed: {}\n", scan.seed_url));
    report.push_str(&format!("  Status: {}\n", status_label(scan.status)));
    if let Some(ref message) = scan.error_message {
        report.push_str(&format!("  Error: {}\n", message.red()));
    }
    report.push_str(&format!(
        "  Limits: {} pages, depth {}\n",
        scan.max_pages, scan.max_depth
    ));
    report.push_str(&format!("  Pages visited: {}\n", scan.pages_visited));
    if let Some(found) = scan.total_pages_found {
        report.push_str(&format!("  Pages found: {}\n", found));
    }

    let errors = results.iter().filter(|r| r.is_error()).count();
    report.push_str(&format!("  Page errors: {}\n", errors));

    let total: usize = results.iter().map(|r| r.violations.len()).sum();
    report.push_str(&format!("  Violations: {}\n", total));
    for (impact, count) in impact_counts(results) {
        if count > 0 {
            report.push_str(&format!("    {} {}\n", impact_label(impact), count));
        }
    }

    report.push('\n');
    report.push_str(RULE);
    report.push_str("\n\n");

    for result in results {
        let path = extract_url_path(&result.url);
        let mut line = format!("  {} {}", http_label(result.http_status), path);

        if result.content_kind != ContentKind::Html {
            line.push_str(&format!(" {}", result.content_kind.as_str().dimmed()));
        }
        if let Some(ref error) = result.error {
            line.push_str(&format!(" {}", error.red()));
        } else if !result.violations.is_empty() {
            line.push_str(&format!(" ({} violations)", result.violations.len()));
        }
        report.push_str(&line);
        report.push('\n');

        for violation in &result.violations {
            report.push_str(&format!(
                "      [{}] {}: {}\n",
                impact_label(violation.impact),
                violation.rule_id,
                violation.description
            ));
        }
        for document in &result.documents {
            report.push_str(&format!("      document {}\n", document));
        }
    }

    report
}

/// One line per scan, newest first as given.
pub fn generate_scan_list(scans: &[ScanRecord]) -> String {
    let mut list = String::new();
    for scan in scans {
        list.push_str(&format!(
            "  {}  {:<11}  {:>4} pages  {}\n",
            scan.id,
            status_label(scan.status),
            scan.pages_visited,
            scan.seed_url
        ));
    }
    list
}

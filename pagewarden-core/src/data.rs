use crate::error::{Result, StoreError};
use pagewarden_scanner::urls::{domain_of, normalize};
use pagewarden_scanner::{ContentKind, PageResult, PageStatus};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// SQLite-backed durable queue and result store.
///
/// The connection sits behind a mutex so one `Database` can be shared by the
/// scheduler and every crawl it runs. Statements are short; the lock is never
/// held across an await.
pub struct Database {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::InProgress => "in_progress",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "in_progress" => Some(ScanStatus::InProgress),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    /// Position in the lifecycle. Status updates may only move forward.
    fn rank(&self) -> i64 {
        match self {
            ScanStatus::Pending => 0,
            ScanStatus::InProgress => 1,
            ScanStatus::Completed | ScanStatus::Failed => 2,
        }
    }
}

/// A seed URL waiting for a crawl to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub url: String,
    pub domain: String,
    pub max_pages: usize,
    pub max_depth: usize,
    /// Epoch milliseconds of the first submission.
    pub enqueued_at: i64,
}

impl SeedEntry {
    pub fn new(url: &str, max_pages: usize, max_depth: usize) -> Result<Self> {
        let url = normalize(url);
        let domain = domain_of(&url)
            .ok_or_else(|| StoreError::InvalidData(format!("seed url has no host: {}", url)))?;
        Ok(Self {
            url,
            domain,
            max_pages,
            max_depth,
            enqueued_at: current_timestamp(),
        })
    }
}

/// Values for a new row in the scans table.
#[derive(Debug, Clone)]
pub struct NewScan {
    pub id: String,
    pub seed_url: String,
    pub domain: String,
    pub status: ScanStatus,
    pub max_pages: usize,
    pub max_depth: usize,
    pub error_message: Option<String>,
}

impl NewScan {
    pub fn for_seed(id: &str, seed: &SeedEntry, status: ScanStatus) -> Self {
        Self {
            id: id.to_string(),
            seed_url: seed.url.clone(),
            domain: seed.domain.clone(),
            status,
            max_pages: seed.max_pages,
            max_depth: seed.max_depth,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: String,
    pub seed_url: String,
    pub domain: String,
    pub status: ScanStatus,
    pub max_pages: usize,
    pub max_depth: usize,
    pub pages_visited: usize,
    pub total_pages_found: Option<usize>,
    pub error_message: Option<String>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_scan_id() -> String {
    Uuid::new_v4().to_string()
}

const SCAN_COLUMNS: &str = "id, seed_url, domain, status, max_pages, max_depth, pages_visited, \
     total_pages_found, error_message, started_at, finished_at";

fn scan_from_row(row: &rusqlite::Row) -> rusqlite::Result<ScanRecord> {
    let status: String = row.get(3)?;
    let status = ScanStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown scan status {status}").into(),
        )
    })?;
    Ok(ScanRecord {
        id: row.get(0)?,
        seed_url: row.get(1)?,
        domain: row.get(2)?,
        status,
        max_pages: row.get::<_, i64>(4)? as usize,
        max_depth: row.get::<_, i64>(5)? as usize,
        pages_visited: row.get::<_, i64>(6)? as usize,
        total_pages_found: row.get::<_, Option<i64>>(7)?.map(|n| n as usize),
        error_message: row.get(8)?,
        started_at: row.get(9)?,
        finished_at: row.get(10)?,
    })
}

/// Page result columns as stored, before the JSON fields are decoded.
struct PageRow {
    scan_id: String,
    url: String,
    depth: i64,
    status: String,
    http_status: Option<i64>,
    content_kind: String,
    violations: String,
    links: String,
    documents: String,
    error_message: Option<String>,
    recorded_at: i64,
}

impl PageRow {
    fn into_result(self) -> Result<PageResult> {
        let status = PageStatus::parse(&self.status)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown page status {}", self.status)))?;
        let content_kind = ContentKind::parse(&self.content_kind).ok_or_else(|| {
            StoreError::InvalidData(format!("unknown content kind {}", self.content_kind))
        })?;
        Ok(PageResult {
            scan_id: self.scan_id,
            url: self.url,
            depth: self.depth as usize,
            status,
            http_status: self.http_status.map(|s| s as u16),
            content_kind,
            violations: serde_json::from_str(&self.violations)?,
            links: serde_json::from_str(&self.links)?,
            documents: serde_json::from_str(&self.documents)?,
            error: self.error_message,
            timestamp: self.recorded_at,
        })
    }
}

impl Database {
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Optimize for concurrent writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            "
-- Seed urls waiting for a crawl to start
CREATE TABLE IF NOT EXISTS seed_queue (
    url TEXT PRIMARY KEY,
    domain TEXT NOT NULL,
    max_pages INTEGER NOT NULL,
    max_depth INTEGER NOT NULL,
    enqueued_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_seed_queue_order ON seed_queue(enqueued_at);

-- One row per crawl attempt
CREATE TABLE IF NOT EXISTS scans (
    id TEXT PRIMARY KEY,
    seed_url TEXT NOT NULL,
    domain TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('pending', 'in_progress', 'completed', 'failed')),
    max_pages INTEGER NOT NULL,
    max_depth INTEGER NOT NULL,
    pages_visited INTEGER NOT NULL DEFAULT 0,
    total_pages_found INTEGER,
    error_message TEXT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_scans_status ON scans(status);
CREATE INDEX IF NOT EXISTS idx_scans_seed ON scans(seed_url);

-- One row per visited page per scan
CREATE TABLE IF NOT EXISTS page_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id TEXT NOT NULL,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('ok', 'error')),
    http_status INTEGER,
    content_kind TEXT NOT NULL CHECK(content_kind IN ('html', 'pdf', 'other')),
    violations TEXT NOT NULL,   -- JSON array of violations
    links TEXT NOT NULL,        -- JSON array of normalized urls
    documents TEXT NOT NULL,    -- JSON array of document urls
    error_message TEXT,
    recorded_at INTEGER NOT NULL,

    FOREIGN KEY(scan_id) REFERENCES scans(id) ON DELETE CASCADE,
    UNIQUE(scan_id, url)
);

CREATE INDEX IF NOT EXISTS idx_page_results_scan ON page_results(scan_id);
            ",
        )?;
        Ok(())
    }

    // Seed queue

    /// Inserts a seed, or updates the limits of an already queued one.
    /// The original queue position is kept.
    pub fn enqueue_seed(&self, entry: &SeedEntry) -> Result<()> {
        self.conn().execute(
            "INSERT INTO seed_queue (url, domain, max_pages, max_depth, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(url) DO UPDATE SET
                max_pages = excluded.max_pages,
                max_depth = excluded.max_depth",
            params![
                &entry.url,
                &entry.domain,
                entry.max_pages as i64,
                entry.max_depth as i64,
                entry.enqueued_at,
            ],
        )?;
        Ok(())
    }

    /// Oldest seeds first.
    pub fn peek_seeds(&self, limit: usize) -> Result<Vec<SeedEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT url, domain, max_pages, max_depth, enqueued_at
             FROM seed_queue ORDER BY enqueued_at, rowid LIMIT ?1",
        )?;

        let seeds = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SeedEntry {
                    url: row.get(0)?,
                    domain: row.get(1)?,
                    max_pages: row.get::<_, i64>(2)? as usize,
                    max_depth: row.get::<_, i64>(3)? as usize,
                    enqueued_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(seeds)
    }

    pub fn remove_seed(&self, url: &str) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM seed_queue WHERE url = ?1", params![url])?;
        Ok(removed > 0)
    }

    pub fn seed_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM seed_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // Scan management

    pub fn create_scan(&self, scan: &NewScan) -> Result<()> {
        let timestamp = current_timestamp();
        let finished_at = scan.status.is_terminal().then_some(timestamp);

        self.conn().execute(
            "INSERT INTO scans (id, seed_url, domain, status, max_pages, max_depth, error_message, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &scan.id,
                &scan.seed_url,
                &scan.domain,
                scan.status.as_str(),
                scan.max_pages as i64,
                scan.max_depth as i64,
                &scan.error_message,
                timestamp,
                finished_at,
            ],
        )?;
        Ok(())
    }

    /// Moves a scan forward in its lifecycle. Returns `false` when the update
    /// would move it backwards or out of a terminal state, or the scan is unknown.
    pub fn update_scan_status(
        &self,
        scan_id: &str,
        status: ScanStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let finished_at = status.is_terminal().then(current_timestamp);
        let updated = self.conn().execute(
            "UPDATE scans
             SET status = ?1,
                 error_message = COALESCE(?2, error_message),
                 finished_at = COALESCE(?3, finished_at)
             WHERE id = ?4
               AND CASE status WHEN 'pending' THEN 0 WHEN 'in_progress' THEN 1 ELSE 2 END < ?5",
            params![status.as_str(), error_message, finished_at, scan_id, status.rank()],
        )?;
        Ok(updated > 0)
    }

    pub fn record_scan_totals(
        &self,
        scan_id: &str,
        pages_visited: usize,
        total_pages_found: usize,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE scans SET pages_visited = ?1, total_pages_found = ?2 WHERE id = ?3",
            params![pages_visited as i64, total_pages_found as i64, scan_id],
        )?;
        Ok(())
    }

    pub fn get_scan(&self, scan_id: &str) -> Result<Option<ScanRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = ?1"))?;
        let scan = stmt.query_row(params![scan_id], scan_from_row).optional()?;
        Ok(scan)
    }

    /// Most recent scans first.
    pub fn list_scans(&self, limit: usize) -> Result<Vec<ScanRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans ORDER BY started_at DESC, rowid DESC LIMIT ?1"
        ))?;
        let scans = stmt
            .query_map(params![limit as i64], scan_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scans)
    }

    pub fn scans_for_seed(&self, seed_url: &str) -> Result<Vec<ScanRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans WHERE seed_url = ?1 ORDER BY started_at, rowid"
        ))?;
        let scans = stmt
            .query_map(params![seed_url], scan_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scans)
    }

    pub fn in_progress_scan_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM scans WHERE status = 'in_progress'")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    // Page results

    /// Returns `false` if the scan already has a result for this url.
    pub fn insert_page_result(&self, result: &PageResult) -> Result<bool> {
        let violations = serde_json::to_string(&result.violations)?;
        let links = serde_json::to_string(&result.links)?;
        let documents = serde_json::to_string(&result.documents)?;

        let inserted = self.conn().execute(
            "INSERT INTO page_results (
                scan_id, url, depth, status, http_status, content_kind,
                violations, links, documents, error_message, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(scan_id, url) DO NOTHING",
            params![
                &result.scan_id,
                &result.url,
                result.depth as i64,
                result.status.as_str(),
                result.http_status.map(i64::from),
                result.content_kind.as_str(),
                violations,
                links,
                documents,
                &result.error,
                result.timestamp,
            ],
        )?;

        Ok(inserted > 0)
    }

    /// Results in the order they were recorded.
    pub fn get_page_results(&self, scan_id: &str) -> Result<Vec<PageResult>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT scan_id, url, depth, status, http_status, content_kind,
                        violations, links, documents, error_message, recorded_at
                 FROM page_results WHERE scan_id = ?1 ORDER BY id",
            )?;
            stmt.query_map(params![scan_id], |row| {
                Ok(PageRow {
                    scan_id: row.get(0)?,
                    url: row.get(1)?,
                    depth: row.get(2)?,
                    status: row.get(3)?,
                    http_status: row.get(4)?,
                    content_kind: row.get(5)?,
                    violations: row.get(6)?,
                    links: row.get(7)?,
                    documents: row.get(8)?,
                    error_message: row.get(9)?,
                    recorded_at: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        rows.into_iter().map(PageRow::into_result).collect()
    }

    pub fn count_page_results(&self, scan_id: &str) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM page_results WHERE scan_id = ?1",
            params![scan_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

use catwalk_scanner::error::{Result, ScanError};
use catwalk_scanner::orchestrator::RunStats;
use catwalk_scanner::record::{CacheEntry, ContentFingerprint, ProductRecord};
use catwalk_scanner::RecordCache;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-backed change-detection cache. Also keeps a log of pipeline runs.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn db_err(e: rusqlite::Error) -> ScanError {
    ScanError::CacheError(e.to_string())
}

impl SqliteCache {
    pub fn remove(path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;

        // Workers write concurrently through one connection
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            ",
        )
        .map_err(db_err)?;

        let cache = SqliteCache {
            conn: Mutex::new(conn),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS cache_entries (
    identifier TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL,
    record TEXT NOT NULL,       -- JSON ProductRecord
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    root_url TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed', 'cancelled')),
    stats TEXT                  -- JSON RunStats
);

CREATE INDEX IF NOT EXISTS idx_runs_start ON runs(start_time);
                ",
            )
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ScanError::CacheError(format!("connection lock poisoned: {}", e)))?;
        f(&conn).map_err(db_err)
    }

    pub fn len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .map(|n| n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // Run log
    pub fn create_run(&self, root_url: &str) -> Result<String> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let timestamp = current_timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO runs (id, root_url, start_time, status) VALUES (?1, ?2, ?3, ?4)",
                params![&run_id, root_url, timestamp, "running"],
            )
        })?;
        Ok(run_id)
    }

    pub fn finish_run(&self, run_id: &str, status: &str, stats: &RunStats) -> Result<()> {
        let stats = serde_json::to_string(stats)
            .map_err(|e| ScanError::CacheError(e.to_string()))?;
        let timestamp = current_timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE runs SET status = ?1, end_time = ?2, stats = ?3 WHERE id = ?4",
                params![status, timestamp, stats, run_id],
            )
        })?;
        Ok(())
    }

    pub fn run_status(&self, run_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT status FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
        })
    }
}

impl RecordCache for SqliteCache {
    fn lookup(&self, identifier: &str) -> Result<Option<CacheEntry>> {
        let row: Option<(String, String)> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT fingerprint, record FROM cache_entries WHERE identifier = ?1",
                params![identifier],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })?;

        let Some((fingerprint, record)) = row else {
            return Ok(None);
        };
        let fingerprint = ContentFingerprint::from_hex(&fingerprint).ok_or_else(|| {
            ScanError::CacheError(format!("corrupt fingerprint for '{}'", identifier))
        })?;
        let record: ProductRecord = serde_json::from_str(&record)
            .map_err(|e| ScanError::CacheError(format!("corrupt record for '{}': {}", identifier, e)))?;

        Ok(Some(CacheEntry {
            identifier: identifier.to_string(),
            fingerprint,
            record,
        }))
    }

    fn store(&self, entry: &CacheEntry) -> Result<()> {
        let record = serde_json::to_string(&entry.record)
            .map_err(|e| ScanError::CacheError(e.to_string()))?;
        let timestamp = current_timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cache_entries (identifier, fingerprint, record, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(identifier) DO UPDATE SET
                    fingerprint = excluded.fingerprint,
                    record = excluded.record,
                    updated_at = excluded.updated_at",
                params![&entry.identifier, entry.fingerprint.to_hex(), record, timestamp],
            )
        })?;
        Ok(())
    }
}

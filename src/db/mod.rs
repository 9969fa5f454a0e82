//! Embedded aggregate store
//!
//! A single SQLite file holds the hourly aggregate tables plus the durable
//! read-position table. The pool is capped at one connection so the
//! aggregators and the retention sweeper never hold overlapping write
//! transactions; external readers may open their own connections.

mod schema;

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

/// Key of one row in the requests table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub hour: String,
    pub router: String,
    pub path: String,
    pub method: String,
    pub status: u16,
}

/// Accumulated counters for one requests row
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestTotals {
    pub count: i64,
    pub bytes: i64,
    pub duration_ms: i64,
}

/// Key of one row in the visitors table (presence-only)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisitorKey {
    pub hour: String,
    pub router: String,
    pub ip_hash: String,
}

/// Key of one row in any single-dimension counter table
/// (referrers, user_agents, countries, browsers, os_stats, duration_hist)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimKey {
    pub hour: String,
    pub router: String,
    pub value: String,
}

impl DimKey {
    pub fn new(hour: &str, router: &str, value: impl Into<String>) -> Self {
        Self {
            hour: hour.to_string(),
            router: router.to_string(),
            value: value.into(),
        }
    }
}

/// One flush worth of accumulated counters, keyed by immutable facts of the
/// underlying lines so that repeated delivery upserts monotonically.
#[derive(Debug, Default)]
pub struct AggregateBatch {
    pub requests: HashMap<RequestKey, RequestTotals>,
    pub visitors: HashSet<VisitorKey>,
    pub referrers: HashMap<DimKey, i64>,
    pub user_agents: HashMap<DimKey, i64>,
    pub countries: HashMap<DimKey, i64>,
    pub browsers: HashMap<DimKey, i64>,
    pub os_stats: HashMap<DimKey, i64>,
    pub duration_hist: HashMap<DimKey, i64>,
    /// Number of accumulated lines, the flush threshold trigger
    pub entries: usize,
}

impl AggregateBatch {
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

/// Saved read position of one tracked file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilePosition {
    pub offset: i64,
    pub inode: i64,
    pub size: i64,
}

/// Rows deleted by one retention sweep, per table
pub type PurgeCounts = Vec<(&'static str, u64)>;

#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Opens (creating if missing) the SQLite database at the given path.
    /// `":memory:"` opens a transient in-memory database.
    pub async fn open(path: &str) -> Result<Self> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            if let Some(dir) = std::path::Path::new(path).parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)
                        .with_context(|| format!("creating database directory {}", dir.display()))?;
                }
            }
            format!("sqlite:{path}?mode=rwc")
        };

        // One connection: SQLite allows a single writer and the pipeline
        // relies on flush and retention transactions being serialized.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON")
                        .execute(&mut *conn)
                        .await?;
                    // WAL makes fsync batching safe
                    sqlx::query("PRAGMA synchronous = NORMAL")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .with_context(|| format!("opening database {path}"))?;

        Ok(Self { pool })
    }

    /// Creates tables and indexes. Safe to re-run on every startup.
    pub async fn run_migrations(&self) -> Result<()> {
        // WAL persists at database level
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;

        for &stmt in schema::MIGRATIONS {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration failed: {}", stmt.trim()))?;
        }
        Ok(())
    }

    /// Read-side handle for the external query layer.
    pub fn read_pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Writes one batch of accumulated counters in a single transaction.
    /// All upserts add onto existing rows, so replaying a batch inflates
    /// counts rather than corrupting them.
    pub async fn flush_batch(&self, batch: &AggregateBatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (key, val) in &batch.requests {
            sqlx::query(
                r#"
                INSERT INTO requests (hour, router, path, method, status, count, bytes, duration)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(hour, router, path, method, status) DO UPDATE SET
                    count = count + excluded.count,
                    bytes = bytes + excluded.bytes,
                    duration = duration + excluded.duration
                "#,
            )
            .bind(&key.hour)
            .bind(&key.router)
            .bind(&key.path)
            .bind(&key.method)
            .bind(key.status as i32)
            .bind(val.count)
            .bind(val.bytes)
            .bind(val.duration_ms)
            .execute(&mut *tx)
            .await?;
        }

        for key in &batch.visitors {
            sqlx::query(
                r#"
                INSERT INTO visitors (hour, router, ip_hash)
                VALUES (?, ?, ?)
                ON CONFLICT(hour, router, ip_hash) DO NOTHING
                "#,
            )
            .bind(&key.hour)
            .bind(&key.router)
            .bind(&key.ip_hash)
            .execute(&mut *tx)
            .await?;
        }

        for (table, column, counters) in [
            ("referrers", "referrer", &batch.referrers),
            ("user_agents", "category", &batch.user_agents),
            ("countries", "country", &batch.countries),
            ("browsers", "browser", &batch.browsers),
            ("os_stats", "os", &batch.os_stats),
            ("duration_hist", "bucket", &batch.duration_hist),
        ] {
            let sql = format!(
                "INSERT INTO {table} (hour, router, {column}, count) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(hour, router, {column}) DO UPDATE SET count = count + excluded.count"
            );
            for (key, count) in counters {
                sqlx::query(&sql)
                    .bind(&key.hour)
                    .bind(&key.router)
                    .bind(&key.value)
                    .bind(*count)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Retrieves the saved position for a file, or zeros if none exists.
    pub async fn load_position(&self, file: &str) -> Result<FilePosition> {
        let row = sqlx::query("SELECT offset, inode, size FROM log_position WHERE file = ?")
            .bind(file)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => FilePosition {
                offset: row.get(0),
                inode: row.get(1),
                size: row.get(2),
            },
            None => FilePosition::default(),
        })
    }

    /// Persists the position for a file as a single upsert.
    pub async fn save_position(&self, file: &str, pos: FilePosition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO log_position (file, offset, inode, size)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(file) DO UPDATE SET
                offset = excluded.offset,
                inode = excluded.inode,
                size = excluded.size
            "#,
        )
        .bind(file)
        .bind(pos.offset)
        .bind(pos.inode)
        .bind(pos.size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes rows older than the cutoff hour from every time-bucketed
    /// table in one transaction. log_position is left untouched.
    pub async fn purge_older_than(&self, cutoff: &str) -> Result<PurgeCounts> {
        let mut tx = self.pool.begin().await?;
        let mut counts = PurgeCounts::new();

        for &table in schema::TIME_BUCKETED_TABLES {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE hour < ?"))
                .bind(cutoff)
                .execute(&mut *tx)
                .await?;
            counts.push((table, result.rows_affected()));
        }

        tx.commit().await?;
        Ok(counts)
    }

    /// Total accumulated request count, for the status endpoint.
    pub async fn total_requests(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COALESCE(SUM(count), 0) FROM requests")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) async fn test_store() -> Store {
        let store = Store::open(":memory:").await.unwrap();
        store.run_migrations().await.unwrap();
        store
    }

    fn request_key(hour: &str) -> RequestKey {
        RequestKey {
            hour: hour.to_string(),
            router: "web@docker".to_string(),
            path: "/ws".to_string(),
            method: "GET".to_string(),
            status: 404,
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = test_store().await;
        store.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn missing_position_is_zeros() {
        let store = test_store().await;
        let pos = store.load_position("/logs/access.log").await.unwrap();
        assert_eq!(pos, FilePosition::default());
    }

    #[tokio::test]
    async fn position_round_trip_and_overwrite() {
        let store = test_store().await;
        let first = FilePosition { offset: 1234, inode: 5678, size: 9012 };
        store.save_position("/logs/access.log", first).await.unwrap();
        assert_eq!(store.load_position("/logs/access.log").await.unwrap(), first);

        let second = FilePosition { offset: 2000, inode: 5678, size: 9999 };
        store.save_position("/logs/access.log", second).await.unwrap();
        assert_eq!(store.load_position("/logs/access.log").await.unwrap(), second);
    }

    #[tokio::test]
    async fn upserts_accumulate_across_flushes() {
        let store = test_store().await;
        let hour = "2026-01-07T16:00:00Z";

        let mut batch = AggregateBatch::default();
        batch.requests.insert(
            request_key(hour),
            RequestTotals { count: 1, bytes: 555, duration_ms: 1 },
        );
        batch.entries = 1;
        store.flush_batch(&batch).await.unwrap();

        let mut batch = AggregateBatch::default();
        batch.requests.insert(
            request_key(hour),
            RequestTotals { count: 2, bytes: 445, duration_ms: 9 },
        );
        batch.entries = 2;
        store.flush_batch(&batch).await.unwrap();

        let (count, bytes, duration): (i64, i64, i64) = sqlx::query_as(
            "SELECT count, bytes, duration FROM requests WHERE hour = ? AND path = '/ws'",
        )
        .bind(hour)
        .fetch_one(store.read_pool())
        .await
        .unwrap();

        assert_eq!((count, bytes, duration), (3, 1000, 10));
        assert_eq!(store.total_requests().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn visitors_are_presence_only() {
        let store = test_store().await;
        let key = VisitorKey {
            hour: "2026-01-07T16:00:00Z".to_string(),
            router: "web@docker".to_string(),
            ip_hash: "deadbeefdeadbeef".to_string(),
        };

        for _ in 0..2 {
            let mut batch = AggregateBatch::default();
            batch.visitors.insert(key.clone());
            batch.entries = 1;
            store.flush_batch(&batch).await.unwrap();
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM visitors")
            .fetch_one(store.read_pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn purge_respects_cutoff_and_log_position() {
        let store = test_store().await;

        for hour in ["2025-09-01T10:00:00Z", "2026-01-07T16:00:00Z"] {
            let mut batch = AggregateBatch::default();
            batch.requests.insert(request_key(hour), RequestTotals { count: 1, bytes: 1, duration_ms: 1 });
            batch.user_agents.insert(DimKey::new(hour, "web@docker", "Chrome"), 1);
            batch.entries = 1;
            store.flush_batch(&batch).await.unwrap();
        }
        store
            .save_position("/logs/access.log", FilePosition { offset: 10, inode: 1, size: 10 })
            .await
            .unwrap();

        let counts = store.purge_older_than("2026-01-01T00:00:00Z").await.unwrap();
        let deleted: u64 = counts.iter().map(|(_, n)| n).sum();
        assert_eq!(deleted, 2); // one requests row, one user_agents row

        let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM requests")
            .fetch_one(store.read_pool())
            .await
            .unwrap();
        assert_eq!(remaining, 1);

        // position survives the sweep
        let pos = store.load_position("/logs/access.log").await.unwrap();
        assert_eq!(pos.offset, 10);
    }
}

use crate::models::config::Config;
use crate::models::error::{LogHubError, Result};
use crate::models::host::Host;
use crate::models::log_entry::{LogEntry, NewLogEntry};
use crate::models::query::{LogFilter, LogPage, LogQuery, SortField, SortOrder, StoreStats};
use crate::utils::time::{format_db_time, parse_db_time, to_db_precision};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, ToSql};
use std::time::Duration;

type DbPool = Pool<SqliteConnectionManager>;
type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Upper bound on a single history page, whatever the caller asks for.
pub const MAX_QUERY_LIMIT: usize = 100_000;

const BUSY_TIMEOUT_MS: u64 = 5000;

const ENTRY_COLUMNS: &str = "id, timestamp, received_at, source_ip, source_port, hostname, \
     facility, severity, priority, app_name, proc_id, msg_id, message, raw_message, \
     is_syslog, is_marker, marker_style";

const SCHEMA: &str = "BEGIN;
    PRAGMA ENCODING = 'UTF-8';

    CREATE TABLE IF NOT EXISTS log_entries(
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp     TEXT,
        received_at   TEXT    NOT NULL,
        source_ip     TEXT    NOT NULL,
        source_port   INTEGER,
        hostname      TEXT,
        facility      INTEGER,
        severity      INTEGER,
        priority      INTEGER,
        app_name      TEXT,
        proc_id       TEXT,
        msg_id        TEXT,
        message       TEXT    NOT NULL,
        raw_message   TEXT    NOT NULL,
        is_syslog     INTEGER NOT NULL DEFAULT 1,
        is_marker     INTEGER NOT NULL DEFAULT 0,
        marker_style  TEXT);

    CREATE INDEX IF NOT EXISTS idx_log_entries_timestamp
            ON log_entries (timestamp);

    CREATE INDEX IF NOT EXISTS idx_log_entries_event_time
            ON log_entries (COALESCE(timestamp, received_at));

    CREATE INDEX IF NOT EXISTS idx_log_entries_received_at
            ON log_entries (received_at);

    CREATE INDEX IF NOT EXISTS idx_log_entries_source_ip
            ON log_entries (source_ip);

    CREATE INDEX IF NOT EXISTS idx_log_entries_hostname
            ON log_entries (hostname);

    CREATE INDEX IF NOT EXISTS idx_log_entries_severity
            ON log_entries (severity);

    CREATE INDEX IF NOT EXISTS idx_log_entries_is_marker
            ON log_entries (is_marker);

    CREATE TABLE IF NOT EXISTS known_hosts(
        ip            TEXT    PRIMARY KEY,
        hostname      TEXT,
        display_name  TEXT,
        first_seen    TEXT    NOT NULL,
        last_seen     TEXT    NOT NULL,
        message_count INTEGER NOT NULL DEFAULT 0);

    COMMIT;";

/// Tuning knobs for [`LogStore::open`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Longest a write waits for the writer before failing with `StorageBusy`.
    pub write_timeout: Duration,
    pub read_pool_size: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_millis(5000),
            read_pool_size: (num_cpus::get_physical() + 7) as u32,
        }
    }
}

impl From<&Config> for StoreOptions {
    fn from(config: &Config) -> Self {
        Self {
            write_timeout: config.write_timeout(),
            read_pool_size: config.read_pool_size,
        }
    }
}

/// Durable, append-only log storage plus the host registry.
///
/// One SQLite file in WAL mode behind two pools: a single-connection writer
/// pool, which serializes every write and hands out ids in commit order,
/// and a read-only pool, so history queries never wait behind ingestion.
pub struct LogStore {
    writer: DbPool,
    readers: DbPool,
    write_timeout: Duration,
    db_file: String,
}

impl LogStore {
    pub fn open(db_file: &str, options: StoreOptions) -> Result<LogStore> {
        if db_file.is_empty() {
            return Err(LogHubError::InvalidConfig(
                "Database file path cannot be empty".to_string(),
            ));
        }
        if db_file == ":memory:" || db_file.contains("mode=memory") || db_file.starts_with("file::memory:")
        {
            return Err(LogHubError::InvalidConfig(format!(
                "In-memory database '{}' is not supported, log storage must be durable",
                db_file
            )));
        }

        info!("Opening log database: {}", db_file);

        let manager = SqliteConnectionManager::file(db_file).with_init(|conn| {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = {};
                 PRAGMA cache_size = -64000;",
                BUSY_TIMEOUT_MS
            ))
        });
        let writer = Pool::builder()
            .max_size(1)
            .connection_timeout(options.write_timeout)
            .build(manager)
            .map_err(|cause| LogHubError::DatabaseConnection {
                path: db_file.to_string(),
                cause,
            })?;

        {
            let conn = writer.get().map_err(|cause| LogHubError::DatabaseConnection {
                path: db_file.to_string(),
                cause,
            })?;
            conn.execute_batch(SCHEMA)
                .map_err(|cause| LogHubError::query("create tables", cause))?;
        }

        // Readers attach to the file the writer already switched to WAL
        let manager = SqliteConnectionManager::file(db_file).with_init(|conn| {
            conn.execute_batch(&format!(
                "PRAGMA busy_timeout = {};
                 PRAGMA cache_size = -64000;
                 PRAGMA query_only = ON;",
                BUSY_TIMEOUT_MS
            ))
        });
        let read_pool_size = options.read_pool_size.max(1);
        let readers = Pool::builder()
            .max_size(read_pool_size)
            .build(manager)
            .map_err(|cause| LogHubError::DatabaseConnection {
                path: db_file.to_string(),
                cause,
            })?;

        info!(
            "Log database ready with 1 writer and {} reader connections",
            read_pool_size
        );

        Ok(LogStore {
            writer,
            readers,
            write_timeout: options.write_timeout,
            db_file: db_file.to_string(),
        })
    }

    pub fn db_file(&self) -> &str {
        &self.db_file
    }

    fn writer(&self, operation: &str) -> Result<DbConnection> {
        self.writer.get().map_err(|e| {
            warn!(
                "Writer unavailable for '{}' after {:?}: {}",
                operation, self.write_timeout, e
            );
            LogHubError::StorageBusy {
                operation: operation.to_string(),
                waited: self.write_timeout,
            }
        })
    }

    fn reader(&self) -> Result<DbConnection> {
        self.readers
            .get()
            .map_err(|cause| LogHubError::DatabaseConnection {
                path: self.db_file.clone(),
                cause,
            })
    }

    /// Commits one entry and, for non-markers, bumps its sender in the host
    /// registry, atomically. `on_commit` runs after the commit while the
    /// writer is still held, so whatever it does happens in id order.
    pub fn record<F>(&self, mut entry: NewLogEntry, on_commit: F) -> Result<LogEntry>
    where
        F: FnOnce(&LogEntry),
    {
        let mut conn = self.writer("insert log entry")?;
        // What callers and subscribers see must equal what reads return
        let received_at = to_db_precision(Utc::now());
        entry.timestamp = entry.timestamp.map(to_db_precision);

        let tx = conn
            .transaction()
            .map_err(|cause| LogHubError::query("begin insert", cause))?;
        let id = insert_entry(&tx, &entry, &received_at)?;
        if !entry.is_marker {
            touch_host(
                &tx,
                &entry.source_ip,
                entry.hostname.as_deref(),
                &received_at,
            )?;
        }
        tx.commit()
            .map_err(|cause| LogHubError::query("commit insert", cause))?;

        let stored = entry.into_entry(id, received_at);
        debug!("Stored entry {} from {}", stored.id, stored.source_ip);
        on_commit(&stored);
        Ok(stored)
    }

    pub fn insert(&self, entry: NewLogEntry) -> Result<LogEntry> {
        self.record(entry, |_| {})
    }

    /// Registers a sighting of `ip`. A known hostname is kept when the new
    /// one is missing or blank.
    pub fn upsert_host(&self, ip: &str, hostname: Option<&str>) -> Result<()> {
        let conn = self.writer("upsert host")?;
        touch_host(&conn, ip, hostname, &Utc::now())
    }

    /// Sets the operator-facing name for a host; a blank name clears it.
    pub fn rename_host(&self, ip: &str, display_name: Option<&str>) -> Result<()> {
        let display_name = display_name.map(str::trim).filter(|name| !name.is_empty());
        let conn = self.writer("rename host")?;
        let updated = conn
            .execute(
                "UPDATE known_hosts SET display_name = ?1 WHERE ip = ?2",
                (display_name, ip),
            )
            .map_err(|cause| LogHubError::query("rename host", cause))?;

        if updated == 0 {
            return Err(LogHubError::HostNotFound { ip: ip.to_string() });
        }
        info!("Host {} display name set to {:?}", ip, display_name);
        Ok(())
    }

    /// All known hosts, most recently seen first.
    pub fn list_hosts(&self) -> Result<Vec<Host>> {
        let conn = self.reader()?;
        let mut stmt = conn
            .prepare(
                "SELECT ip, hostname, display_name, first_seen, last_seen, message_count
                 FROM known_hosts
                 ORDER BY last_seen DESC, ip ASC",
            )
            .map_err(|cause| LogHubError::query("list hosts", cause))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Host {
                    ip: row.get(0)?,
                    hostname: row.get(1)?,
                    display_name: row.get(2)?,
                    first_seen: time_column(row, 3)?,
                    last_seen: time_column(row, 4)?,
                    message_count: row.get(5)?,
                })
            })
            .map_err(|cause| LogHubError::query("list hosts", cause))?;

        rows.collect::<rusqlite::Result<Vec<Host>>>()
            .map_err(|cause| LogHubError::query("collect hosts", cause))
    }

    /// One page of history and the total count for the same filters, both
    /// read from one snapshot.
    pub fn query(&self, query: &LogQuery) -> Result<LogPage> {
        let mut conn = self.reader()?;
        let tx = conn
            .transaction()
            .map_err(|cause| LogHubError::query("begin read", cause))?;

        let (clause, params) = build_filter(&query.filter);
        let limit = query.limit.min(MAX_QUERY_LIMIT) as i64;
        let offset = query.offset as i64;

        let filter_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut page_refs = filter_refs.clone();
        page_refs.push(&limit);
        page_refs.push(&offset);

        let sql = format!(
            "SELECT {} FROM log_entries{} ORDER BY {} {}, id {} LIMIT ? OFFSET ?",
            ENTRY_COLUMNS,
            clause,
            query.sort_by.column(),
            query.sort_order.keyword(),
            query.sort_order.keyword()
        );
        let entries = {
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|cause| LogHubError::query("query logs", cause))?;
            let rows = stmt
                .query_map(page_refs.as_slice(), entry_from_row)
                .map_err(|cause| LogHubError::query("query logs", cause))?;
            rows.collect::<rusqlite::Result<Vec<LogEntry>>>()
                .map_err(|cause| LogHubError::query("collect log rows", cause))?
        };

        let total: i64 = tx
            .query_row(
                &format!("SELECT COUNT(*) FROM log_entries{}", clause),
                filter_refs.as_slice(),
                |row| row.get(0),
            )
            .map_err(|cause| LogHubError::query("count logs", cause))?;

        tx.commit()
            .map_err(|cause| LogHubError::query("end read", cause))?;
        Ok(LogPage { entries, total })
    }

    /// Entries with id greater than `after_id`, oldest first.
    pub fn entries_after(&self, after_id: i64, limit: usize) -> Result<Vec<LogEntry>> {
        let query = LogQuery {
            filter: LogFilter {
                after_id: Some(after_id),
                ..Default::default()
            },
            sort_by: SortField::Id,
            sort_order: SortOrder::Asc,
            limit,
            offset: 0,
        };
        Ok(self.query(&query)?.entries)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.reader()?;
        conn.query_row(
            "SELECT (SELECT COUNT(*) FROM log_entries),
                    (SELECT COUNT(*) FROM known_hosts),
                    (SELECT COALESCE(MAX(id), 0) FROM log_entries)",
            [],
            |row| {
                Ok(StoreStats {
                    total_entries: row.get(0)?,
                    known_hosts: row.get(1)?,
                    latest_id: row.get(2)?,
                })
            },
        )
        .map_err(|cause| LogHubError::query("stats", cause))
    }
}

fn insert_entry(conn: &Connection, entry: &NewLogEntry, received_at: &DateTime<Utc>) -> Result<i64> {
    conn.query_row(
        "INSERT INTO log_entries (timestamp, received_at, source_ip, source_port, hostname,
             facility, severity, priority, app_name, proc_id, msg_id, message, raw_message,
             is_syslog, is_marker, marker_style)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         RETURNING id",
        rusqlite::params![
            entry.timestamp.as_ref().map(format_db_time),
            format_db_time(received_at),
            entry.source_ip,
            entry.source_port,
            entry.hostname,
            entry.facility,
            entry.severity,
            entry.priority,
            entry.app_name,
            entry.proc_id,
            entry.msg_id,
            entry.message,
            entry.raw_message,
            entry.is_syslog,
            entry.is_marker,
            entry.marker_style,
        ],
        |row| row.get(0),
    )
    .map_err(|cause| LogHubError::query("insert log entry", cause))
}

fn touch_host(
    conn: &Connection,
    ip: &str,
    hostname: Option<&str>,
    seen_at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO known_hosts (ip, hostname, display_name, first_seen, last_seen, message_count)
         VALUES (?1, NULLIF(TRIM(?2), ''), NULL, ?3, ?3, 1)
         ON CONFLICT (ip) DO UPDATE SET
             hostname = COALESCE(excluded.hostname, known_hosts.hostname),
             last_seen = excluded.last_seen,
             message_count = known_hosts.message_count + 1",
        (ip, hostname, format_db_time(seen_at)),
    )
    .map_err(|cause| LogHubError::query("upsert host", cause))?;
    Ok(())
}

/// `WHERE` clause and positional parameters for a filter set.
fn build_filter(filter: &LogFilter) -> (String, Vec<Box<dyn ToSql>>) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(ip) = &filter.source_ip {
        conditions.push("source_ip = ?");
        params.push(Box::new(ip.clone()));
    }

    if let Some(hostname) = &filter.hostname {
        conditions.push(
            "(hostname LIKE ? ESCAPE '\\' OR source_ip IN \
             (SELECT ip FROM known_hosts WHERE display_name LIKE ? ESCAPE '\\'))",
        );
        let pattern = like_pattern(hostname);
        params.push(Box::new(pattern.clone()));
        params.push(Box::new(pattern));
    }

    if let Some(severity) = filter.severity {
        conditions.push("severity <= ?");
        params.push(Box::new(severity));
    }

    if let Some(search) = &filter.search {
        conditions.push("message LIKE ? ESCAPE '\\'");
        params.push(Box::new(like_pattern(search)));
    }

    if let Some(start) = &filter.start_time {
        conditions.push("COALESCE(timestamp, received_at) >= ?");
        params.push(Box::new(format_db_time(start)));
    }

    if let Some(end) = &filter.end_time {
        conditions.push("COALESCE(timestamp, received_at) <= ?");
        params.push(Box::new(format_db_time(end)));
    }

    if !filter.include_markers {
        conditions.push("is_marker = 0");
    }

    if let Some(after_id) = filter.after_id {
        conditions.push("id > ?");
        params.push(Box::new(after_id));
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

/// Substring pattern with the caller's own wildcards taken literally.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn time_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_db_time(&text).ok_or_else(|| invalid_time(idx, &text))
}

fn optional_time_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => parse_db_time(&text)
            .map(Some)
            .ok_or_else(|| invalid_time(idx, &text)),
        None => Ok(None),
    }
}

fn invalid_time(idx: usize, text: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("invalid stored time '{}'", text).into(),
    )
}

fn entry_from_row(row: &Row) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        timestamp: optional_time_column(row, 1)?,
        received_at: time_column(row, 2)?,
        source_ip: row.get(3)?,
        source_port: row.get(4)?,
        hostname: row.get(5)?,
        facility: row.get(6)?,
        severity: row.get(7)?,
        priority: row.get(8)?,
        app_name: row.get(9)?,
        proc_id: row.get(10)?,
        msg_id: row.get(11)?,
        message: row.get(12)?,
        raw_message: row.get(13)?,
        is_syslog: row.get(14)?,
        is_marker: row.get(15)?,
        marker_style: row.get(16)?,
    })
}

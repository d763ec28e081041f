//! Database backend abstraction layer.
//!
//! Embedded SQLite, synchronous.
//! - One connection per handle, shared behind a mutex (the handle is `Send + Sync`)
//! - WAL journal with a busy timeout so another process can read during a scan
//! - `regexp(pattern, text)` registered on every connection

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, ErrorCode, OpenFlags};
use thiserror::Error;
use tracing::{debug_span, info, warn};

/// How long SQLite waits on a lock held by another process before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Errors from database backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database is busy: {0}")]
    Busy(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Operation requires write access but database is read-only")]
    ReadOnly,

    #[error("Query error: {0}")]
    Query(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BackendError {
    /// True when the failure came from lock contention and the operation may be retried.
    pub fn is_busy(&self) -> bool {
        matches!(self, BackendError::Busy(_))
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    BackendError::Busy(err.to_string())
                }
                ErrorCode::ConstraintViolation => BackendError::Constraint(err.to_string()),
                ErrorCode::ReadOnly => BackendError::ReadOnly,
                _ => BackendError::Database(err.to_string()),
            },
            rusqlite::Error::InvalidParameterCount(_, _) => {
                BackendError::InvalidInput(err.to_string())
            }
            _ => BackendError::Database(err.to_string()),
        }
    }
}

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-write access
    ReadWrite,
    /// Read-only access (writes fail with `BackendError::ReadOnly`)
    ReadOnly,
}

/// Value type for query parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    /// Stored as INTEGER milliseconds since the Unix epoch.
    Timestamp(DateTime<Utc>),
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        DbValue::Integer(v as i64)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<u64> for DbValue {
    fn from(v: u64) -> Self {
        // SQLite integers are signed; sizes and inode numbers above i64::MAX wrap.
        DbValue::Integer(v as i64)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Real(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<&String> for DbValue {
    fn from(v: &String) -> Self {
        DbValue::Text(v.clone())
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

impl From<DateTime<Utc>> for DbValue {
    fn from(v: DateTime<Utc>) -> Self {
        DbValue::Timestamp(v)
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(v: Vec<u8>) -> Self {
        DbValue::Blob(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DbValue::Null,
        }
    }
}

impl rusqlite::ToSql for DbValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DbValue::Null => ToSqlOutput::Owned(Value::Null),
            DbValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            DbValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            DbValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            DbValue::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            DbValue::Boolean(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            DbValue::Timestamp(v) => ToSqlOutput::Owned(Value::Integer(v.timestamp_millis())),
        })
    }
}

/// Row data from a query result.
#[derive(Debug, Clone)]
pub struct DbRow {
    columns: Vec<String>,
    values: Vec<DbValue>,
}

impl DbRow {
    /// Create a new row with column names and values.
    pub fn new(columns: Vec<String>, values: Vec<DbValue>) -> Self {
        Self { columns, values }
    }

    /// Get a value by column index.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, BackendError> {
        self.values
            .get(index)
            .ok_or_else(|| {
                BackendError::TypeConversion(format!("Column index {} out of bounds", index))
            })
            .and_then(|v| T::from_db_value(v))
    }

    /// Get a value by column name.
    pub fn get_by_name<T: FromDbValue>(&self, name: &str) -> Result<T, BackendError> {
        let index =
            self.columns.iter().position(|c| c == name).ok_or_else(|| {
                BackendError::TypeConversion(format!("Column '{}' not found", name))
            })?;
        self.get(index)
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the column names.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }
}

/// Trait for converting from DbValue.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError>;
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            DbValue::Boolean(v) => Ok(i64::from(*v)),
            DbValue::Null => Err(BackendError::TypeConversion(
                "i64 field is NULL - use Option<i64> for nullable columns".to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected integer".to_string())),
        }
    }
}

impl FromDbValue for u64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => Ok(*v as u64),
            DbValue::Null => Err(BackendError::TypeConversion(
                "u64 field is NULL - use Option<u64> for nullable columns".to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected integer".to_string())),
        }
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            DbValue::Null => Err(BackendError::TypeConversion(
                "f64 field is NULL - use Option<f64> for nullable columns".to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected real".to_string())),
        }
    }
}

impl FromDbValue for DateTime<Utc> {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Timestamp(v) => Ok(*v),
            DbValue::Integer(ms) => DateTime::from_timestamp_millis(*ms).ok_or_else(|| {
                BackendError::TypeConversion(format!("Invalid Unix milliseconds: {}", ms))
            }),
            DbValue::Text(v) => DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| BackendError::TypeConversion(format!("Invalid timestamp: {}", e))),
            DbValue::Null => Err(BackendError::TypeConversion(
                "timestamp field is NULL - use Option<DateTime<Utc>> for nullable columns"
                    .to_string(),
            )),
            _ => Err(BackendError::TypeConversion(
                "Expected timestamp".to_string(),
            )),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            DbValue::Null => Err(BackendError::TypeConversion(
                "String field is NULL - use Option<String> for nullable columns".to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected text".to_string())),
        }
    }
}

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Boolean(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v != 0),
            DbValue::Null => Err(BackendError::TypeConversion(
                "bool field is NULL - use Option<bool> for nullable columns".to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected boolean".to_string())),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Null => Ok(None),
            _ => T::from_db_value(value).map(Some),
        }
    }
}

impl FromDbValue for Vec<u8> {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Blob(v) => Ok(v.clone()),
            DbValue::Null => Err(BackendError::TypeConversion(
                "Vec<u8> field is NULL - use Option<Vec<u8>> for nullable columns".to_string(),
            )),
            _ => Err(BackendError::TypeConversion("Expected blob".to_string())),
        }
    }
}

/// Unified database connection.
///
/// Cloning shares the underlying connection. The mutex is held for one
/// statement or one transaction at a time, never across caller work.
#[derive(Clone)]
pub struct DbConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
    access_mode: AccessMode,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("backend", &"SQLite")
            .field("access_mode", &self.access_mode)
            .finish()
    }
}

impl DbConnection {
    /// Open (or create) a database file with read-write access.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let conn = rusqlite::Connection::open(path)?;
        configure(&conn, AccessMode::ReadWrite)?;
        info!(path = %path.display(), "Opened SQLite database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            access_mode: AccessMode::ReadWrite,
        })
    }

    /// Open an existing database file in read-only mode.
    pub fn open_readonly(path: &Path) -> Result<Self, BackendError> {
        let conn = rusqlite::Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        configure(&conn, AccessMode::ReadOnly)?;
        info!(path = %path.display(), "Opened SQLite database (read-only)");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            access_mode: AccessMode::ReadOnly,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        configure(&conn, AccessMode::ReadWrite)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            access_mode: AccessMode::ReadWrite,
        })
    }

    /// Get the access mode.
    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    /// Check if this connection has write access.
    pub fn is_writable(&self) -> bool {
        self.access_mode == AccessMode::ReadWrite
    }

    /// Execute a SQL statement (no results).
    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        self.ensure_writable()?;
        let conn = self.lock()?;
        execute_on_conn(&conn, sql, params)
    }

    /// Execute a batch of SQL statements.
    pub fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        self.ensure_writable()?;
        let conn = self.lock()?;
        execute_batch_on_conn(&conn, sql)
    }

    /// Query and return all rows.
    pub fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, BackendError> {
        let conn = self.lock()?;
        query_on_conn(&conn, sql, params)
    }

    /// Query and return the first row, if any.
    pub fn query_optional(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Option<DbRow>, BackendError> {
        let rows = self.query_all(sql, params)?;
        Ok(rows.into_iter().next())
    }

    /// Query and return exactly one row.
    pub fn query_one(&self, sql: &str, params: &[DbValue]) -> Result<DbRow, BackendError> {
        self.query_optional(sql, params)?
            .ok_or_else(|| BackendError::Query("Expected one row, got none".to_string()))
    }

    /// Query and return a single scalar value.
    pub fn query_scalar<T: FromDbValue>(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        let row = self.query_one(sql, params)?;
        row.get(0)
    }

    /// Run `op` inside `BEGIN IMMEDIATE ... COMMIT`.
    ///
    /// The write lock is taken up front so two writers never both read and then
    /// race to write. Any error from `op` rolls the transaction back. The
    /// connection is locked for the duration: use `tx`, not `self`, inside `op`.
    pub fn transaction<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut DbTransaction<'_>) -> Result<T, E>,
        E: From<BackendError> + std::fmt::Display,
    {
        self.ensure_writable()?;
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(BackendError::from)?;

        let mut tx = DbTransaction { conn: &conn };
        match op(&mut tx) {
            Ok(value) => match conn.execute_batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(commit_err) => {
                    if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                        warn!(error = %rollback_err, "Rollback after failed commit also failed");
                    }
                    Err(BackendError::from(commit_err).into())
                }
            },
            Err(err) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    warn!(
                        error = %rollback_err,
                        cause = %err,
                        "Transaction rollback failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Run `op` inside a deferred read transaction, so every query it issues
    /// sees the same snapshot. Works on read-only connections.
    pub fn read<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut DbTransaction<'_>) -> Result<T, E>,
        E: From<BackendError>,
    {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN DEFERRED")
            .map_err(BackendError::from)?;

        let mut tx = DbTransaction { conn: &conn };
        let result = op(&mut tx);
        // Nothing was written; ending the snapshot cannot lose data.
        if let Err(end_err) = conn.execute_batch("COMMIT") {
            warn!(error = %end_err, "Failed to end read snapshot");
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                warn!(error = %rollback_err, "Failed to roll back read snapshot");
            }
        }
        result
    }

    fn ensure_writable(&self) -> Result<(), BackendError> {
        if self.access_mode == AccessMode::ReadOnly {
            return Err(BackendError::ReadOnly);
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, rusqlite::Connection>, BackendError> {
        self.conn
            .lock()
            .map_err(|_| BackendError::Database("connection mutex poisoned".to_string()))
    }
}

/// Transaction handle passed to `DbConnection::transaction`.
pub struct DbTransaction<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> DbTransaction<'a> {
    pub fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        execute_on_conn(self.conn, sql, params)
    }

    pub fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError> {
        execute_batch_on_conn(self.conn, sql)
    }

    pub fn query_all(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, BackendError> {
        query_on_conn(self.conn, sql, params)
    }

    pub fn query_optional(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Option<DbRow>, BackendError> {
        let rows = self.query_all(sql, params)?;
        Ok(rows.into_iter().next())
    }

    pub fn query_one(&mut self, sql: &str, params: &[DbValue]) -> Result<DbRow, BackendError> {
        self.query_optional(sql, params)?
            .ok_or_else(|| BackendError::Query("Expected one row, got none".to_string()))
    }

    pub fn query_scalar<T: FromDbValue>(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        let row = self.query_one(sql, params)?;
        row.get(0)
    }

    /// Row id assigned by the most recent successful INSERT on this connection.
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }
}

fn configure(conn: &rusqlite::Connection, mode: AccessMode) -> Result<(), BackendError> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if mode == AccessMode::ReadWrite {
        // In-memory databases answer "memory"; the value is not needed either way.
        let _journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    register_regexp(conn)?;
    Ok(())
}

/// `regexp(pattern, text)`: true when `text` matches; NULL text never matches.
fn register_regexp(conn: &rusqlite::Connection) -> Result<(), BackendError> {
    type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |vr| -> Result<Regex, BoxError> {
                Ok(Regex::new(vr.as_str()?)?)
            })?;
            let text = ctx
                .get_raw(1)
                .as_str_or_null()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            Ok(text.map(|t| pattern.is_match(t)).unwrap_or(false))
        },
    )?;
    Ok(())
}

fn execute_on_conn(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[DbValue],
) -> Result<u64, BackendError> {
    let op = sql_op_name(sql);
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.exec",
        op = op,
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.execute(params_from_iter(params.iter()))?;
    let duration_ms = start.elapsed().as_millis() as u64;
    span.record("duration_ms", duration_ms);
    Ok(rows as u64)
}

fn execute_batch_on_conn(conn: &rusqlite::Connection, sql: &str) -> Result<(), BackendError> {
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.exec_batch",
        op = "BATCH",
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();
    conn.execute_batch(sql)?;
    let duration_ms = start.elapsed().as_millis() as u64;
    span.record("duration_ms", duration_ms);
    Ok(())
}

fn query_on_conn(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[DbValue],
) -> Result<Vec<DbRow>, BackendError> {
    let op = sql_op_name(sql);
    let sql_hash = hash_sql(sql);
    let span = debug_span!(
        "db.query",
        op = op,
        sql_hash = %sql_hash,
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    let column_count = columns.len();

    let mut rows_iter = stmt.query(params_from_iter(params.iter()))?;
    let mut result = Vec::new();
    while let Some(row) = rows_iter.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(value_ref_to_db_value(row.get_ref(i)?));
        }
        result.push(DbRow::new(columns.clone(), values));
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    span.record("duration_ms", duration_ms);
    Ok(result)
}

fn value_ref_to_db_value(value: ValueRef<'_>) -> DbValue {
    match value {
        ValueRef::Null => DbValue::Null,
        ValueRef::Integer(v) => DbValue::Integer(v),
        ValueRef::Real(v) => DbValue::Real(v),
        ValueRef::Text(v) => DbValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => DbValue::Blob(v.to_vec()),
    }
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit hash for low-cardinality, stable identification.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}

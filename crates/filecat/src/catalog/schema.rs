//! Catalog schema.
//!
//! All CREATE statements live here. Timestamps are INTEGER milliseconds since
//! the Unix epoch.

use crate::error::{CatalogError, Result};
use filecat_db::DbConnection;
use tracing::debug;

const SCHEMA_SQL: &str = r#"
-- Blobs: one row per distinct content (SHA-256 of the full bytes)
CREATE TABLE IF NOT EXISTS blobs (
    content_hash TEXT PRIMARY KEY,
    fast_hash TEXT NOT NULL,                 -- BLAKE3 head/tail probe, lookup key only
    size INTEGER NOT NULL,
    mime TEXT,
    primary_type TEXT,                       -- image, video, audio, document, archive, executable, other
    phash TEXT,                              -- opaque fingerprints from the similarity service
    audio_fingerprint TEXT,
    doc_fingerprint TEXT,
    meta_json TEXT,                          -- opaque metadata from the extraction service
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blobs_fast_hash ON blobs(fast_hash, size);
CREATE INDEX IF NOT EXISTS idx_blobs_created_at ON blobs(created_at);

-- Assets: every location a blob has been observed at
CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT NOT NULL REFERENCES blobs(content_hash),
    full_path TEXT NOT NULL,
    name TEXT NOT NULL,                      -- basename of full_path
    extension TEXT,                          -- lowercase, without the dot
    volume_id TEXT,
    inode INTEGER,
    device_id INTEGER,
    mtime INTEGER,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    is_available INTEGER NOT NULL DEFAULT 1,
    UNIQUE(content_hash, full_path)
);

CREATE INDEX IF NOT EXISTS idx_assets_full_path ON assets(full_path);
CREATE INDEX IF NOT EXISTS idx_assets_available ON assets(is_available, content_hash);

-- Tags: named labels, attached to content rather than to paths
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL DEFAULT 'user',
    color TEXT
);

CREATE TABLE IF NOT EXISTS file_tags (
    content_hash TEXT NOT NULL REFERENCES blobs(content_hash),
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    source TEXT NOT NULL DEFAULT 'manual',   -- manual, rule, import
    confidence REAL NOT NULL DEFAULT 1.0,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (content_hash, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_file_tags_tag ON file_tags(tag_id);

-- Saved views: a persisted, already-validated query AST plus display layout
CREATE TABLE IF NOT EXISTS saved_views (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    query_ast_json TEXT NOT NULL,
    layout_json TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// Columns the query compiler's field table depends on.
const REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("blobs", "primary_type"),
    ("blobs", "created_at"),
    ("assets", "name"),
    ("assets", "extension"),
    ("assets", "mtime"),
    ("assets", "is_available"),
];

pub(crate) fn ensure_schema(conn: &DbConnection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    validate_schema(conn)?;
    debug!("Catalog schema verified");
    Ok(())
}

/// Fail loud when an existing database predates a column the compiler needs.
fn validate_schema(conn: &DbConnection) -> Result<()> {
    let mut missing = Vec::new();
    for (table, column) in REQUIRED_COLUMNS {
        let present: i64 = conn.query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
            &[(*table).into(), (*column).into()],
        )?;
        if present == 0 {
            missing.push(format!("{}.{}", table, column));
        }
    }

    if missing.is_empty() {
        return Ok(());
    }

    Err(CatalogError::Config(format!(
        "Catalog database is missing columns: {}. Move the database aside and rescan.",
        missing.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = DbConnection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('blobs', 'assets', 'tags', 'file_tags', 'saved_views')",
                &[],
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn outdated_schema_is_rejected() {
        let conn = DbConnection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE assets (id INTEGER PRIMARY KEY, content_hash TEXT, full_path TEXT, is_available INTEGER)",
        )
        .unwrap();
        let err = ensure_schema(&conn).unwrap_err();
        assert!(matches!(err, CatalogError::Config(_)));
    }
}

//! Catalog store.
//!
//! Blobs, assets, tags and saved views in one SQLite database.
//! - Every write keyed by a content hash holds that key's lock and runs in one
//!   `BEGIN IMMEDIATE` transaction (`Catalog::write`)
//! - A blob is only ever created in the same transaction as its first asset
//! - Busy databases are retried here; callers only see `Concurrency` once the
//!   retry budget is spent

mod locks;
mod schema;
mod tags;
pub mod types;
mod views;

pub use types::*;

use crate::error::{CatalogError, Result};
use crate::hashing::{ContentHash, FastHash};
use chrono::{DateTime, Utc};
use filecat_db::{now_millis, DbConnection, DbRow, DbTransaction, DbValue};
use locks::KeyLocks;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_WRITE_ATTEMPTS: u32 = 5;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(20);

const BLOB_COLUMNS: &str = "b.content_hash, b.fast_hash, b.size, b.mime, b.primary_type, \
    b.phash, b.audio_fingerprint, b.doc_fingerprint, b.meta_json, b.created_at";

const ASSET_COLUMNS: &str = "a.id, a.content_hash, a.full_path, a.name, a.extension, \
    a.volume_id, a.inode, a.device_id, a.mtime, a.first_seen, a.last_seen, a.is_available";

const ENTRY_COLUMNS: &str = "a.id, a.content_hash, a.full_path, a.name, a.extension, \
    a.volume_id, b.size, b.mime, b.primary_type, b.created_at, a.mtime, a.last_seen, a.is_available";

const ENTRY_FROM: &str = "assets a JOIN blobs b ON b.content_hash = a.content_hash";

/// Handle to the catalog. Cheap to clone; clones share the connection and key locks.
#[derive(Clone)]
pub struct Catalog {
    conn: DbConnection,
    locks: Arc<KeyLocks>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").field("conn", &self.conn).finish()
    }
}

impl Catalog {
    /// Open or create a catalog at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let catalog = Self::from_connection(DbConnection::open(path)?)?;
        info!(path = %path.display(), "Catalog opened");
        Ok(catalog)
    }

    /// Create an in-memory catalog (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(DbConnection::open_in_memory()?)
    }

    /// Wrap an existing connection, creating tables as needed.
    pub fn from_connection(conn: DbConnection) -> Result<Self> {
        schema::ensure_schema(&conn)?;
        Ok(Self {
            conn,
            locks: Arc::new(KeyLocks::new()),
        })
    }

    /// Get the underlying connection.
    pub fn conn(&self) -> &DbConnection {
        &self.conn
    }

    // ========================================================================
    // Write scopes
    // ========================================================================

    /// Run `op` as the only writer for `key`, inside one transaction.
    ///
    /// `op` may run more than once when the database is busy; it must not have
    /// side effects outside `tx`.
    pub fn write<T, F>(&self, key: &ContentHash, op: F) -> Result<T>
    where
        F: FnMut(&mut CatalogTx<'_, '_>) -> Result<T>,
    {
        let _guard = self.locks.lock(key.as_str());
        self.with_retry(key.as_str(), op)
    }

    /// Transaction with busy-retry but no key lock, for writes not owned by one blob.
    pub(crate) fn with_retry<T, F>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(&mut CatalogTx<'_, '_>) -> Result<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = self.conn.transaction(|tx| {
                let mut scoped = CatalogTx { tx };
                op(&mut scoped)
            });
            match result {
                Err(err) if err.is_busy() => {
                    if attempt >= MAX_WRITE_ATTEMPTS {
                        warn!(key = label, attempts = attempt, "Catalog write gave up on busy database");
                        return Err(CatalogError::Concurrency(format!(
                            "write to {} still contended after {} attempts: {}",
                            label, attempt, err
                        )));
                    }
                    debug!(key = label, attempt, "Catalog busy, retrying write");
                    thread::sleep(RETRY_BASE_DELAY * attempt);
                }
                other => return other,
            }
        }
    }

    // ========================================================================
    // Blob & Asset Operations
    // ========================================================================

    /// Record one observed file: find-or-create its blob and upsert the asset,
    /// atomically. Other contents previously seen at the same path are marked
    /// unavailable (the file was overwritten).
    pub fn record_observation(&self, blob: &NewBlob, location: &AssetLocation) -> Result<Observed> {
        self.write(&blob.content_hash, |tx| {
            let found = tx.find_or_create_blob(blob)?;
            let asset = tx.upsert_asset(&blob.content_hash, location)?;
            let replaced = tx.retire_other_content_at(&location.full_path, &blob.content_hash)?;
            if replaced > 0 {
                debug!(path = %location.full_path, replaced, "Path now holds different content");
            }

            let outcome = match (found.is_new, asset.is_new) {
                (true, _) => ObservationOutcome::NewContent,
                (false, true) => ObservationOutcome::NewLocation,
                (false, false) => ObservationOutcome::Refreshed,
            };
            Ok(Observed {
                asset: asset.record,
                outcome,
            })
        })
    }

    /// Create the asset for `(content_hash, full_path)` or refresh its `last_seen`.
    ///
    /// The blob must already exist (`NotFound` otherwise).
    pub fn upsert_asset(
        &self,
        content_hash: &ContentHash,
        location: &AssetLocation,
    ) -> Result<Upserted<Asset>> {
        self.write(content_hash, |tx| tx.upsert_asset(content_hash, location))
    }

    /// Mark one asset as no longer present on disk. The blob is kept.
    pub fn mark_unavailable(&self, asset_id: i64) -> Result<()> {
        let asset = self
            .get_asset(asset_id)?
            .ok_or_else(|| CatalogError::not_found(format!("asset {}", asset_id)))?;
        self.write(&asset.content_hash, |tx| tx.set_available(asset_id, false))
    }

    /// Point an asset at the path its file was moved to.
    ///
    /// If the blob already has an asset at `new_path`, that row is revived and
    /// this one marked unavailable instead of violating uniqueness.
    pub fn relocate_asset(&self, asset_id: i64, new_path: &str) -> Result<Asset> {
        let asset = self
            .get_asset(asset_id)?
            .ok_or_else(|| CatalogError::not_found(format!("asset {}", asset_id)))?;

        self.write(&asset.content_hash, |tx| {
            let now = now_millis();
            let target = match tx.asset_id_at(&asset.content_hash, new_path)? {
                Some(existing) if existing != asset_id => {
                    tx.exec(
                        "UPDATE assets SET is_available = 1, last_seen = ? WHERE id = ?",
                        &[now.into(), existing.into()],
                    )?;
                    tx.set_available(asset_id, false)?;
                    existing
                }
                _ => {
                    tx.exec(
                        r#"
                        UPDATE assets SET
                            full_path = ?, name = ?, extension = ?, last_seen = ?, is_available = 1
                        WHERE id = ?
                        "#,
                        &[
                            new_path.into(),
                            file_name_of(new_path).into(),
                            extension_of(new_path).into(),
                            now.into(),
                            asset_id.into(),
                        ],
                    )?;
                    asset_id
                }
            };
            tx.get_asset(target)?.ok_or_else(|| {
                CatalogError::invalid_state(format!("asset {} vanished during relocation", target))
            })
        })
    }

    /// Mark assets under `root` not seen since `seen_before` as unavailable.
    ///
    /// Assets under any of `skipped` (directories the scan did not enter) are
    /// left alone.
    pub fn mark_missing_under(
        &self,
        root: &str,
        seen_before: DateTime<Utc>,
        skipped: &[String],
    ) -> Result<u64> {
        let mut sql = String::from(
            "UPDATE assets SET is_available = 0 WHERE is_available = 1 AND last_seen < ? AND ",
        );
        let mut params: Vec<DbValue> = vec![seen_before.into()];
        sql.push_str(&subtree_predicate(root, &mut params));
        for dir in skipped {
            sql.push_str(" AND NOT ");
            sql.push_str(&subtree_predicate(dir, &mut params));
        }

        self.with_retry("mark_missing", |tx| tx.exec(&sql, &params))
    }

    /// Set the coarse classification of a blob.
    pub fn set_primary_type(&self, content_hash: &ContentHash, primary_type: &str) -> Result<()> {
        self.update_blob(
            content_hash,
            "UPDATE blobs SET primary_type = ? WHERE content_hash = ?",
            vec![primary_type.into()],
        )
    }

    /// Store fingerprints computed by the similarity service; `None` fields are left alone.
    pub fn set_fingerprints(&self, content_hash: &ContentHash, prints: &Fingerprints) -> Result<()> {
        self.update_blob(
            content_hash,
            r#"
            UPDATE blobs SET
                phash = COALESCE(?, phash),
                audio_fingerprint = COALESCE(?, audio_fingerprint),
                doc_fingerprint = COALESCE(?, doc_fingerprint)
            WHERE content_hash = ?
            "#,
            vec![
                prints.phash.as_deref().into(),
                prints.audio_fingerprint.as_deref().into(),
                prints.doc_fingerprint.as_deref().into(),
            ],
        )
    }

    /// Replace the metadata document written by the extraction service.
    pub fn set_metadata_json(&self, content_hash: &ContentHash, meta: &serde_json::Value) -> Result<()> {
        let encoded = serde_json::to_string(meta)?;
        self.update_blob(
            content_hash,
            "UPDATE blobs SET meta_json = ? WHERE content_hash = ?",
            vec![encoded.into()],
        )
    }

    fn update_blob(&self, content_hash: &ContentHash, sql: &str, mut params: Vec<DbValue>) -> Result<()> {
        params.push(content_hash.into());
        self.write(content_hash, |tx| {
            if tx.exec(sql, &params)? == 0 {
                return Err(CatalogError::not_found(format!("blob {}", content_hash)));
            }
            Ok(())
        })
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn get_blob(&self, content_hash: &ContentHash) -> Result<Option<Blob>> {
        let row = self.conn.query_optional(
            &format!("SELECT {} FROM blobs b WHERE b.content_hash = ?", BLOB_COLUMNS),
            &[content_hash.into()],
        )?;
        row.as_ref().map(row_to_blob).transpose()
    }

    pub fn get_asset(&self, asset_id: i64) -> Result<Option<Asset>> {
        let row = self.conn.query_optional(
            &format!("SELECT {} FROM assets a WHERE a.id = ?", ASSET_COLUMNS),
            &[asset_id.into()],
        )?;
        row.as_ref().map(row_to_asset).transpose()
    }

    /// Blobs whose probe and size match. Candidates only: equality needs the full hash.
    pub fn blobs_by_fast_hash(&self, fast_hash: &FastHash, size: u64) -> Result<Vec<Blob>> {
        let rows = self.conn.query_all(
            &format!(
                "SELECT {} FROM blobs b WHERE b.fast_hash = ? AND b.size = ?",
                BLOB_COLUMNS
            ),
            &[fast_hash.into(), size.into()],
        )?;
        rows.iter().map(row_to_blob).collect()
    }

    /// The most recently seen available asset at `full_path`, if any.
    pub fn asset_at_path(&self, full_path: &str) -> Result<Option<Asset>> {
        let row = self.conn.query_optional(
            &format!(
                "SELECT {} FROM assets a WHERE a.full_path = ? AND a.is_available = 1 \
                 ORDER BY a.last_seen DESC, a.id DESC LIMIT 1",
                ASSET_COLUMNS
            ),
            &[full_path.into()],
        )?;
        row.as_ref().map(row_to_asset).transpose()
    }

    /// All assets of one blob, available or not.
    pub fn assets_for_blob(&self, content_hash: &ContentHash) -> Result<Vec<Asset>> {
        let rows = self.conn.query_all(
            &format!(
                "SELECT {} FROM assets a WHERE a.content_hash = ? ORDER BY a.id",
                ASSET_COLUMNS
            ),
            &[content_hash.into()],
        )?;
        rows.iter().map(row_to_asset).collect()
    }

    /// Joined view of one asset (regardless of availability).
    pub fn entry_for_asset(&self, asset_id: i64) -> Result<Option<CatalogEntry>> {
        self.single_entry("a.id = ?", asset_id.into())
    }

    /// Joined view of the oldest available asset of a blob.
    pub fn entry_for_content_hash(&self, content_hash: &ContentHash) -> Result<Option<CatalogEntry>> {
        self.single_entry("a.content_hash = ? AND a.is_available = 1", content_hash.into())
    }

    fn single_entry(&self, predicate: &str, param: DbValue) -> Result<Option<CatalogEntry>> {
        let row = self.conn.query_optional(
            &format!(
                "SELECT {} FROM {} WHERE {} ORDER BY a.id LIMIT 1",
                ENTRY_COLUMNS, ENTRY_FROM, predicate
            ),
            &[param],
        )?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut entries = vec![row_to_entry(&row)?];
        self.fill_tags(&mut entries)?;
        Ok(entries.pop())
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// One page of available assets matching `filter`, with the total match count.
    ///
    /// Count and page come from the same read snapshot. An `a.id` tiebreaker is
    /// appended to `order`, so consecutive pages never overlap or skip.
    pub fn list_assets(
        &self,
        filter: &AssetFilter,
        order: &[OrderTerm],
        limit: u64,
        offset: u64,
    ) -> Result<Page<CatalogEntry>> {
        let where_sql = format!("a.is_available = 1 AND ({})", filter.clause);
        let count_sql = format!("SELECT COUNT(*) FROM {} WHERE {}", ENTRY_FROM, where_sql);
        let page_sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
            ENTRY_COLUMNS,
            ENTRY_FROM,
            where_sql,
            order_by_sql(order)
        );
        let mut page_params = filter.params.clone();
        page_params.push(clamp_i64(limit).into());
        page_params.push(clamp_i64(offset).into());

        let (total, rows) = self.conn.read(|tx| {
            let total: i64 = tx.query_scalar(&count_sql, &filter.params)?;
            let rows = tx.query_all(&page_sql, &page_params)?;
            Ok::<_, CatalogError>((total, rows))
        })?;

        let mut items = rows.iter().map(row_to_entry).collect::<Result<Vec<_>>>()?;
        self.fill_tags(&mut items)?;

        Ok(Page {
            items,
            total_count: total.max(0) as u64,
            limit,
            offset,
        })
    }

    /// Number of available assets matching `filter`.
    pub fn count_assets(&self, filter: &AssetFilter) -> Result<u64> {
        let total: i64 = self.conn.query_scalar(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE a.is_available = 1 AND ({})",
                ENTRY_FROM, filter.clause
            ),
            &filter.params,
        )?;
        Ok(total.max(0) as u64)
    }

    /// Available assets matching `filter`, grouped by `primary_type`.
    pub fn count_by_type(&self, filter: &AssetFilter) -> Result<Vec<TypeCount>> {
        let rows = self.conn.query_all(
            &format!(
                "SELECT b.primary_type, COUNT(*) AS n FROM {} \
                 WHERE a.is_available = 1 AND ({}) \
                 GROUP BY b.primary_type ORDER BY n DESC, b.primary_type",
                ENTRY_FROM, filter.clause
            ),
            &filter.params,
        )?;
        rows.iter()
            .map(|row| {
                Ok(TypeCount {
                    primary_type: row.get(0)?,
                    count: row.get::<i64>(1)?.max(0) as u64,
                })
            })
            .collect()
    }

    fn fill_tags(&self, entries: &mut [CatalogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut hashes: Vec<&ContentHash> = entries.iter().map(|e| &e.content_hash).collect();
        hashes.sort();
        hashes.dedup();
        let placeholders = vec!["?"; hashes.len()].join(", ");
        let params: Vec<DbValue> = hashes.iter().map(|h| (*h).into()).collect();

        let rows = self.conn.query_all(
            &format!(
                "SELECT ft.content_hash, t.name FROM file_tags ft \
                 JOIN tags t ON t.id = ft.tag_id \
                 WHERE ft.content_hash IN ({}) ORDER BY t.name",
                placeholders
            ),
            &params,
        )?;

        let mut by_hash: HashMap<String, Vec<String>> = HashMap::new();
        for row in &rows {
            by_hash
                .entry(row.get(0)?)
                .or_default()
                .push(row.get(1)?);
        }
        for entry in entries.iter_mut() {
            entry.tags = by_hash
                .get(entry.content_hash.as_str())
                .cloned()
                .unwrap_or_default();
        }
        Ok(())
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Blobs with no available asset. Retained indefinitely; reported, never purged.
    pub fn orphaned_blobs(&self) -> Result<Vec<Blob>> {
        let rows = self.conn.query_all(
            &format!(
                "SELECT {} FROM blobs b WHERE NOT EXISTS \
                 (SELECT 1 FROM assets a WHERE a.content_hash = b.content_hash AND a.is_available = 1) \
                 ORDER BY b.created_at, b.content_hash",
                BLOB_COLUMNS
            ),
            &[],
        )?;
        rows.iter().map(row_to_blob).collect()
    }

    /// Blobs available at more than one path, largest first.
    pub fn duplicate_groups(&self, limit: u64) -> Result<Vec<DuplicateGroup>> {
        let rows = self.conn.query_all(
            r#"
            SELECT a.content_hash, b.size, a.full_path
            FROM assets a JOIN blobs b ON b.content_hash = a.content_hash
            WHERE a.is_available = 1 AND a.content_hash IN (
                SELECT d.content_hash FROM assets d JOIN blobs db ON db.content_hash = d.content_hash
                WHERE d.is_available = 1
                GROUP BY d.content_hash
                HAVING COUNT(*) > 1
                ORDER BY MAX(db.size) DESC, d.content_hash
                LIMIT ?
            )
            ORDER BY b.size DESC, a.content_hash, a.full_path
            "#,
            &[clamp_i64(limit).into()],
        )?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for row in &rows {
            let content_hash: ContentHash = row.get(0)?;
            let path: String = row.get(2)?;
            match groups.last_mut() {
                Some(group) if group.content_hash == content_hash => group.paths.push(path),
                _ => groups.push(DuplicateGroup {
                    content_hash,
                    size: row.get(1)?,
                    paths: vec![path],
                }),
            }
        }
        Ok(groups)
    }

    /// Catalog-wide counters.
    pub fn stats(&self) -> Result<CatalogStats> {
        let row = self.conn.query_one(
            r#"
            SELECT
                (SELECT COUNT(*) FROM blobs),
                (SELECT COUNT(*) FROM assets),
                (SELECT COUNT(*) FROM assets WHERE is_available = 1),
                (SELECT COUNT(*) FROM blobs b WHERE NOT EXISTS
                    (SELECT 1 FROM assets a WHERE a.content_hash = b.content_hash AND a.is_available = 1)),
                (SELECT COUNT(*) FROM tags),
                (SELECT COUNT(*) FROM saved_views),
                (SELECT COALESCE(SUM(b.size), 0) FROM blobs b WHERE EXISTS
                    (SELECT 1 FROM assets a WHERE a.content_hash = b.content_hash AND a.is_available = 1))
            "#,
            &[],
        )?;

        let count = |index: usize| -> Result<u64> { Ok(row.get::<i64>(index)?.max(0) as u64) };
        Ok(CatalogStats {
            blobs: count(0)?,
            assets: count(1)?,
            available_assets: count(2)?,
            orphaned_blobs: count(3)?,
            tags: count(4)?,
            saved_views: count(5)?,
            available_bytes: count(6)?,
        })
    }
}

// ============================================================================
// Transaction-scoped operations
// ============================================================================

/// Catalog operations inside one write transaction (see `Catalog::write`).
pub struct CatalogTx<'t, 'c> {
    tx: &'t mut DbTransaction<'c>,
}

impl CatalogTx<'_, '_> {
    /// Return the blob for `new.content_hash`, inserting it if absent.
    ///
    /// Missing `mime`/`primary_type` on an existing blob are filled in; a size
    /// that disagrees with the stored one is an `InvalidState`.
    pub fn find_or_create_blob(&mut self, new: &NewBlob) -> Result<Upserted<Blob>> {
        let inserted = self.exec(
            r#"
            INSERT INTO blobs (content_hash, fast_hash, size, mime, primary_type, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO NOTHING
            "#,
            &[
                (&new.content_hash).into(),
                (&new.fast_hash).into(),
                new.size.into(),
                new.mime.as_deref().into(),
                new.primary_type.as_deref().into(),
                now_millis().into(),
            ],
        )?;

        if inserted == 0 {
            self.exec(
                r#"
                UPDATE blobs SET
                    mime = COALESCE(mime, ?),
                    primary_type = COALESCE(primary_type, ?)
                WHERE content_hash = ?
                "#,
                &[
                    new.mime.as_deref().into(),
                    new.primary_type.as_deref().into(),
                    (&new.content_hash).into(),
                ],
            )?;
        }

        let blob = self.get_blob(&new.content_hash)?.ok_or_else(|| {
            CatalogError::invalid_state(format!("blob {} missing after insert", new.content_hash))
        })?;
        if blob.size != new.size {
            return Err(CatalogError::invalid_state(format!(
                "blob {} recorded with size {} but observed with size {}",
                new.content_hash, blob.size, new.size
            )));
        }

        Ok(Upserted {
            record: blob,
            is_new: inserted == 1,
        })
    }

    /// Create or refresh the asset for `(content_hash, location.full_path)`.
    pub fn upsert_asset(
        &mut self,
        content_hash: &ContentHash,
        location: &AssetLocation,
    ) -> Result<Upserted<Asset>> {
        if self.get_blob(content_hash)?.is_none() {
            return Err(CatalogError::not_found(format!("blob {}", content_hash)));
        }

        let now = now_millis();
        let path = location.full_path.as_str();
        let (id, is_new) = match self.asset_id_at(content_hash, path)? {
            None => {
                self.exec(
                    r#"
                    INSERT INTO assets (content_hash, full_path, name, extension, volume_id, inode, device_id, mtime, first_seen, last_seen, is_available)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
                    "#,
                    &[
                        content_hash.into(),
                        path.into(),
                        file_name_of(path).into(),
                        extension_of(path).into(),
                        location.volume_id.as_deref().into(),
                        location.inode.into(),
                        location.device_id.into(),
                        location.mtime.into(),
                        now.into(),
                        now.into(),
                    ],
                )?;
                (self.tx.last_insert_rowid(), true)
            }
            Some(id) => {
                self.exec(
                    r#"
                    UPDATE assets SET
                        last_seen = ?,
                        is_available = 1,
                        volume_id = COALESCE(?, volume_id),
                        inode = COALESCE(?, inode),
                        device_id = COALESCE(?, device_id),
                        mtime = COALESCE(?, mtime)
                    WHERE id = ?
                    "#,
                    &[
                        now.into(),
                        location.volume_id.as_deref().into(),
                        location.inode.into(),
                        location.device_id.into(),
                        location.mtime.into(),
                        id.into(),
                    ],
                )?;
                (id, false)
            }
        };

        let asset = self.get_asset(id)?.ok_or_else(|| {
            CatalogError::invalid_state(format!("asset {} missing after upsert", id))
        })?;
        Ok(Upserted {
            record: asset,
            is_new,
        })
    }

    pub fn get_blob(&mut self, content_hash: &ContentHash) -> Result<Option<Blob>> {
        let row = self.tx.query_optional(
            &format!("SELECT {} FROM blobs b WHERE b.content_hash = ?", BLOB_COLUMNS),
            &[content_hash.into()],
        )?;
        row.as_ref().map(row_to_blob).transpose()
    }

    pub fn get_asset(&mut self, asset_id: i64) -> Result<Option<Asset>> {
        let row = self.tx.query_optional(
            &format!("SELECT {} FROM assets a WHERE a.id = ?", ASSET_COLUMNS),
            &[asset_id.into()],
        )?;
        row.as_ref().map(row_to_asset).transpose()
    }

    fn asset_id_at(&mut self, content_hash: &ContentHash, full_path: &str) -> Result<Option<i64>> {
        let row = self.tx.query_optional(
            "SELECT id FROM assets WHERE content_hash = ? AND full_path = ?",
            &[content_hash.into(), full_path.into()],
        )?;
        Ok(row.map(|r| r.get::<i64>(0)).transpose()?)
    }

    fn set_available(&mut self, asset_id: i64, available: bool) -> Result<()> {
        let changed = self.exec(
            "UPDATE assets SET is_available = ? WHERE id = ?",
            &[available.into(), asset_id.into()],
        )?;
        if changed == 0 {
            return Err(CatalogError::not_found(format!("asset {}", asset_id)));
        }
        Ok(())
    }

    fn retire_other_content_at(&mut self, full_path: &str, keep: &ContentHash) -> Result<u64> {
        self.exec(
            "UPDATE assets SET is_available = 0 \
             WHERE full_path = ? AND content_hash != ? AND is_available = 1",
            &[full_path.into(), keep.into()],
        )
    }

    fn exec(&mut self, sql: &str, params: &[DbValue]) -> Result<u64> {
        Ok(self.tx.execute(sql, params)?)
    }

    fn query_all(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
        Ok(self.tx.query_all(sql, params)?)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn row_to_blob(row: &DbRow) -> Result<Blob> {
    Ok(Blob {
        content_hash: row.get(0)?,
        fast_hash: row.get(1)?,
        size: row.get(2)?,
        mime: row.get(3)?,
        primary_type: row.get(4)?,
        fingerprints: Fingerprints {
            phash: row.get(5)?,
            audio_fingerprint: row.get(6)?,
            doc_fingerprint: row.get(7)?,
        },
        meta_json: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn row_to_asset(row: &DbRow) -> Result<Asset> {
    Ok(Asset {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        full_path: row.get(2)?,
        name: row.get(3)?,
        extension: row.get(4)?,
        volume_id: row.get(5)?,
        inode: row.get(6)?,
        device_id: row.get(7)?,
        mtime: row.get(8)?,
        first_seen: row.get(9)?,
        last_seen: row.get(10)?,
        is_available: row.get(11)?,
    })
}

fn row_to_entry(row: &DbRow) -> Result<CatalogEntry> {
    Ok(CatalogEntry {
        asset_id: row.get(0)?,
        content_hash: row.get(1)?,
        full_path: row.get(2)?,
        name: row.get(3)?,
        extension: row.get(4)?,
        volume_id: row.get(5)?,
        size: row.get(6)?,
        mime: row.get(7)?,
        primary_type: row.get(8)?,
        created_at: row.get(9)?,
        modified: row.get(10)?,
        last_seen: row.get(11)?,
        is_available: row.get(12)?,
        tags: Vec::new(),
    })
}

fn order_by_sql(order: &[OrderTerm]) -> String {
    let terms: Vec<OrderTerm> = if order.is_empty() {
        vec![OrderTerm::newest_first()]
    } else {
        order.to_vec()
    };
    let tiebreak_desc = terms.first().map(|t| t.descending).unwrap_or(true);

    let mut parts: Vec<String> = terms
        .iter()
        .map(|t| format!("{} {}", t.column, if t.descending { "DESC" } else { "ASC" }))
        .collect();
    parts.push(format!("a.id {}", if tiebreak_desc { "DESC" } else { "ASC" }));
    parts.join(", ")
}

/// `full_path` is `dir` or lies below it.
fn subtree_predicate(dir: &str, params: &mut Vec<DbValue>) -> String {
    let trimmed = dir.trim_end_matches(std::path::MAIN_SEPARATOR);
    let prefix = format!("{}{}", trimmed, std::path::MAIN_SEPARATOR);
    params.push(trimmed.into());
    params.push((prefix.chars().count() as i64).into());
    params.push(prefix.into());
    "(full_path = ? OR substr(full_path, 1, ?) = ?)".to_string()
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{fast_probe, full_hash};
    use std::io::Cursor;

    fn new_blob(bytes: &[u8]) -> NewBlob {
        let size = bytes.len() as u64;
        NewBlob {
            content_hash: full_hash(&mut Cursor::new(bytes.to_vec()), size, None).unwrap(),
            fast_hash: fast_probe(&mut Cursor::new(bytes.to_vec()), size).unwrap(),
            size,
            mime: Some("text/plain".to_string()),
            primary_type: Some("document".to_string()),
        }
    }

    #[test]
    fn observation_creates_blob_and_asset_together() {
        let catalog = Catalog::open_in_memory().unwrap();
        let blob = new_blob(b"hello");

        let first = catalog
            .record_observation(&blob, &AssetLocation::new("/data/a.txt"))
            .unwrap();
        assert_eq!(first.outcome, ObservationOutcome::NewContent);
        assert_eq!(first.asset.extension.as_deref(), Some("txt"));

        let second = catalog
            .record_observation(&blob, &AssetLocation::new("/data/b.txt"))
            .unwrap();
        assert_eq!(second.outcome, ObservationOutcome::NewLocation);

        let again = catalog
            .record_observation(&blob, &AssetLocation::new("/data/a.txt"))
            .unwrap();
        assert_eq!(again.outcome, ObservationOutcome::Refreshed);
        assert_eq!(again.asset.id, first.asset.id);

        let stats = catalog.stats().unwrap();
        assert_eq!(stats.blobs, 1);
        assert_eq!(stats.assets, 2);
    }

    #[test]
    fn upsert_asset_requires_existing_blob() {
        let catalog = Catalog::open_in_memory().unwrap();
        let blob = new_blob(b"nobody home");
        let err = catalog
            .upsert_asset(&blob.content_hash, &AssetLocation::new("/x"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
        assert_eq!(catalog.stats().unwrap().assets, 0);
    }

    #[test]
    fn size_disagreement_is_rejected_and_rolled_back() {
        let catalog = Catalog::open_in_memory().unwrap();
        let blob = new_blob(b"twelve bytes");
        catalog
            .record_observation(&blob, &AssetLocation::new("/a"))
            .unwrap();

        let mut liar = blob.clone();
        liar.size = 99;
        let err = catalog
            .record_observation(&liar, &AssetLocation::new("/b"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidState(_)));
        assert!(catalog.asset_at_path("/b").unwrap().is_none());
    }

    #[test]
    fn mark_unavailable_keeps_blob() {
        let catalog = Catalog::open_in_memory().unwrap();
        let blob = new_blob(b"keep me");
        let observed = catalog
            .record_observation(&blob, &AssetLocation::new("/k"))
            .unwrap();

        catalog.mark_unavailable(observed.asset.id).unwrap();

        assert!(catalog.get_blob(&blob.content_hash).unwrap().is_some());
        let page = catalog
            .list_assets(&AssetFilter::all(), &[], 10, 0)
            .unwrap();
        assert_eq!(page.total_count, 0);
        assert_eq!(catalog.orphaned_blobs().unwrap().len(), 1);

        assert!(matches!(
            catalog.mark_unavailable(9_999),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn overwritten_path_retires_old_content() {
        let catalog = Catalog::open_in_memory().unwrap();
        let old = catalog
            .record_observation(&new_blob(b"v1"), &AssetLocation::new("/doc.txt"))
            .unwrap();
        catalog
            .record_observation(&new_blob(b"v2"), &AssetLocation::new("/doc.txt"))
            .unwrap();

        let stale = catalog.get_asset(old.asset.id).unwrap().unwrap();
        assert!(!stale.is_available);
        assert_eq!(catalog.count_assets(&AssetFilter::all()).unwrap(), 1);
    }

    #[test]
    fn relocate_updates_path_and_derived_columns() {
        let catalog = Catalog::open_in_memory().unwrap();
        let observed = catalog
            .record_observation(&new_blob(b"move me"), &AssetLocation::new("/in/a.TXT"))
            .unwrap();

        let moved = catalog
            .relocate_asset(observed.asset.id, "/out/b.md")
            .unwrap();
        assert_eq!(moved.id, observed.asset.id);
        assert_eq!(moved.full_path, "/out/b.md");
        assert_eq!(moved.name, "b.md");
        assert_eq!(moved.extension.as_deref(), Some("md"));
    }

    #[test]
    fn pages_are_disjoint_and_ordered() {
        let catalog = Catalog::open_in_memory().unwrap();
        for i in 0..5 {
            let bytes = format!("file {}", i);
            catalog
                .record_observation(
                    &new_blob(bytes.as_bytes()),
                    &AssetLocation::new(format!("/p/{}.txt", i)),
                )
                .unwrap();
        }

        let whole = catalog
            .list_assets(&AssetFilter::all(), &[], 4, 0)
            .unwrap();
        let first = catalog
            .list_assets(&AssetFilter::all(), &[], 2, 0)
            .unwrap();
        let second = catalog
            .list_assets(&AssetFilter::all(), &[], 2, 2)
            .unwrap();

        assert_eq!(whole.total_count, 5);
        assert!(whole.has_more());
        let stitched: Vec<i64> = first
            .items
            .iter()
            .chain(second.items.iter())
            .map(|e| e.asset_id)
            .collect();
        let expected: Vec<i64> = whole.items.iter().map(|e| e.asset_id).collect();
        assert_eq!(stitched, expected);
    }

    #[test]
    fn mark_missing_only_touches_subtree() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .record_observation(&new_blob(b"in"), &AssetLocation::new("/root/sub/in.txt"))
            .unwrap();
        catalog
            .record_observation(&new_blob(b"sibling"), &AssetLocation::new("/rootless/x.txt"))
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(5);
        let marked = catalog.mark_missing_under("/root", later, &[]).unwrap();
        assert_eq!(marked, 1);
        assert!(catalog.asset_at_path("/rootless/x.txt").unwrap().is_some());
    }

    #[test]
    fn mark_missing_leaves_skipped_dirs_alone() {
        let catalog = Catalog::open_in_memory().unwrap();
        for (bytes, path) in [
            (&b"kept"[..], "/root/vendor/lib.txt"),
            (&b"gone"[..], "/root/src/main.txt"),
            (&b"near"[..], "/root/vendored.txt"),
        ] {
            catalog
                .record_observation(&new_blob(bytes), &AssetLocation::new(path))
                .unwrap();
        }

        let later = Utc::now() + chrono::Duration::seconds(5);
        let skipped = vec!["/root/vendor".to_string()];
        let marked = catalog.mark_missing_under("/root", later, &skipped).unwrap();
        assert_eq!(marked, 2);
        assert!(catalog.asset_at_path("/root/vendor/lib.txt").unwrap().is_some());
        assert!(catalog.asset_at_path("/root/vendored.txt").unwrap().is_none());
    }

    #[test]
    fn duplicate_groups_collect_paths() {
        let catalog = Catalog::open_in_memory().unwrap();
        let blob = new_blob(b"same bytes");
        for path in ["/d/1", "/d/2", "/d/3"] {
            catalog
                .record_observation(&blob, &AssetLocation::new(path))
                .unwrap();
        }
        catalog
            .record_observation(&new_blob(b"unique"), &AssetLocation::new("/d/u"))
            .unwrap();

        let groups = catalog.duplicate_groups(10).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].paths, vec!["/d/1", "/d/2", "/d/3"]);
    }

    #[test]
    fn fingerprints_and_metadata_need_a_blob() {
        let catalog = Catalog::open_in_memory().unwrap();
        let blob = new_blob(b"print me");
        let missing = catalog.set_primary_type(&blob.content_hash, "image");
        assert!(matches!(missing, Err(CatalogError::NotFound(_))));

        catalog
            .record_observation(&blob, &AssetLocation::new("/f"))
            .unwrap();
        catalog
            .set_fingerprints(
                &blob.content_hash,
                &Fingerprints {
                    phash: Some("ff00".into()),
                    ..Fingerprints::default()
                },
            )
            .unwrap();
        catalog
            .set_metadata_json(&blob.content_hash, &serde_json::json!({"pages": 3}))
            .unwrap();

        let stored = catalog.get_blob(&blob.content_hash).unwrap().unwrap();
        assert_eq!(stored.fingerprints.phash.as_deref(), Some("ff00"));
        assert_eq!(stored.meta_json.as_deref(), Some(r#"{"pages":3}"#));
    }
}

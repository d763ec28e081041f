//! Core types for the catalog
//!
//! A **Blob** is one distinct content, keyed by the SHA-256 of its bytes.
//! An **Asset** is one place a blob was seen on disk. Tags hang off the blob,
//! so every copy of the same bytes carries the same tags.

use crate::hashing::{ContentHash, FastHash};
use chrono::{DateTime, Utc};
use filecat_db::DbValue;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// Blob & Asset
// ============================================================================

/// One distinct content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// SHA-256 of the full bytes
    pub content_hash: ContentHash,
    /// BLAKE3 head/tail probe
    pub fast_hash: FastHash,
    pub size: u64,
    pub mime: Option<String>,
    /// Coarse classification (image, video, audio, document, archive, executable, other)
    pub primary_type: Option<String>,
    #[serde(default)]
    pub fingerprints: Fingerprints,
    /// Raw JSON document written by the metadata extractor
    pub meta_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Opaque similarity fingerprints. Computed elsewhere; stored and returned as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprints {
    pub phash: Option<String>,
    pub audio_fingerprint: Option<String>,
    pub doc_fingerprint: Option<String>,
}

/// One observed location of a blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: i64,
    pub content_hash: ContentHash,
    /// Absolute path as observed
    pub full_path: String,
    /// Basename of `full_path`
    pub name: String,
    /// Lowercase extension without the dot
    pub extension: Option<String>,
    pub volume_id: Option<String>,
    pub inode: Option<u64>,
    pub device_id: Option<u64>,
    /// Filesystem modification time at last observation
    pub mtime: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_available: bool,
}

/// Asset joined with its blob and tags: the row shape queries and rules work on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub asset_id: i64,
    pub content_hash: ContentHash,
    pub full_path: String,
    pub name: String,
    pub extension: Option<String>,
    pub volume_id: Option<String>,
    pub size: u64,
    pub mime: Option<String>,
    pub primary_type: Option<String>,
    /// When the blob was first catalogued
    pub created_at: DateTime<Utc>,
    /// Filesystem modification time of this asset
    pub modified: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
    pub is_available: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One page of results plus the size of the whole result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub limit: u64,
    pub offset: u64,
}

impl<T> Page<T> {
    /// True when rows exist past this page.
    pub fn has_more(&self) -> bool {
        self.offset + (self.items.len() as u64) < self.total_count
    }
}

// ============================================================================
// Write inputs & outcomes
// ============================================================================

/// Blob attributes known at ingestion time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBlob {
    pub content_hash: ContentHash,
    pub fast_hash: FastHash,
    pub size: u64,
    pub mime: Option<String>,
    pub primary_type: Option<String>,
}

/// Where (and as what) a blob was observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetLocation {
    pub full_path: String,
    pub volume_id: Option<String>,
    pub inode: Option<u64>,
    pub device_id: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
}

impl AssetLocation {
    pub fn new(full_path: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
            ..Self::default()
        }
    }
}

/// A found-or-created row.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted<T> {
    pub record: T,
    pub is_new: bool,
}

/// What recording one observed file changed in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationOutcome {
    /// First time these bytes were seen: new blob and new asset
    NewContent,
    /// Known bytes at a new path: new asset only
    NewLocation,
    /// Known bytes at a known path: `last_seen` refreshed
    Refreshed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub asset: Asset,
    pub outcome: ObservationOutcome,
}

// ============================================================================
// Tags
// ============================================================================

/// Who attached a tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    #[default]
    Manual,
    Rule,
    Import,
}

impl TagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagSource::Manual => "manual",
            TagSource::Rule => "rule",
            TagSource::Import => "import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(TagSource::Manual),
            "rule" => Some(TagSource::Rule),
            "import" => Some(TagSource::Import),
            _ => None,
        }
    }
}

/// A tag attachment request.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSpec {
    pub name: String,
    pub kind: String,
    pub color: Option<String>,
    pub source: TagSource,
    pub confidence: f64,
}

impl TagSpec {
    pub fn manual(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "user".to_string(),
            color: None,
            source: TagSource::Manual,
            confidence: 1.0,
        }
    }
}

/// A tag as attached to one blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedTag {
    pub name: String,
    pub kind: String,
    pub color: Option<String>,
    pub source: TagSource,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Saved views
// ============================================================================

/// A named, persisted query. `query_ast` always compiled when it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedView {
    pub id: i64,
    pub name: String,
    pub query_ast: serde_json::Value,
    /// Display settings owned by the UI; stored verbatim
    pub layout: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Reports
// ============================================================================

/// Catalog-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub blobs: u64,
    pub assets: u64,
    pub available_assets: u64,
    /// Blobs with no available asset (kept, see `Catalog::orphaned_blobs`)
    pub orphaned_blobs: u64,
    pub tags: u64,
    pub saved_views: u64,
    /// Sum of distinct blob sizes with at least one available asset
    pub available_bytes: u64,
}

/// Result count for one `primary_type` value (`None` = unclassified).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCount {
    pub primary_type: Option<String>,
    pub count: u64,
}

/// Available assets sharing one blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub content_hash: ContentHash,
    pub size: u64,
    pub paths: Vec<String>,
}

impl DuplicateGroup {
    /// Bytes that would be freed by keeping a single copy.
    pub fn reclaimable_bytes(&self) -> u64 {
        self.size * (self.paths.len().saturating_sub(1) as u64)
    }
}

// ============================================================================
// Query plumbing
// ============================================================================

/// A parameter-bound WHERE fragment over `assets a JOIN blobs b`.
///
/// Only the query compiler builds non-trivial filters, so every value reaches
/// SQLite as a bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetFilter {
    pub(crate) clause: String,
    pub(crate) params: Vec<DbValue>,
}

impl AssetFilter {
    /// Matches every available asset.
    pub fn all() -> Self {
        Self {
            clause: "1 = 1".to_string(),
            params: Vec::new(),
        }
    }

    pub(crate) fn new(clause: String, params: Vec<DbValue>) -> Self {
        Self { clause, params }
    }

    /// This filter restricted to asset ids above `last_id`, for keyset paging.
    pub(crate) fn after_id(&self, last_id: i64) -> Self {
        let mut params = self.params.clone();
        params.push(last_id.into());
        Self {
            clause: format!("({}) AND a.id > ?", self.clause),
            params,
        }
    }

    /// The SQL fragment (with `?` placeholders).
    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn params(&self) -> &[DbValue] {
        &self.params
    }
}

/// One ORDER BY term. Columns come from a static table, never from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTerm {
    pub(crate) column: &'static str,
    pub(crate) descending: bool,
}

impl OrderTerm {
    pub(crate) fn new(column: &'static str, descending: bool) -> Self {
        Self { column, descending }
    }

    /// Newest blobs first.
    pub fn newest_first() -> Self {
        Self::new("b.created_at", true)
    }

    /// Ascending asset id; stable while rows are being added.
    pub fn by_asset_id() -> Self {
        Self::new("a.id", false)
    }
}

// ============================================================================
// Path helpers
// ============================================================================

/// Basename of `path` (the whole string when it has none).
pub fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Lowercase text after the last `.` of the basename.
///
/// Dot-files (`.bashrc`) and trailing dots have no extension.
pub fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

//! Filesystem scanner: walks a root, hashes what it finds and records each
//! file in the catalog.
//!
//! # Design
//!
//! - Sequential depth-first walk (`walkdir`, sorted, symlinks not followed);
//!   files stream straight into the catalog, nothing is buffered
//! - Denied directory names are pruned before descending, denied extensions
//!   are skipped before opening
//! - Every file is read in full; the SHA-256 decides identity and equal probes
//!   are only a hint. `ScanConfig::trust_unchanged` opts into refreshing files
//!   whose path, size, mtime and probe all match without rehashing them
//! - Only a clean, uncancelled scan marks vanished files as unavailable, and
//!   never under directories the scan pruned

use crate::catalog::{AssetLocation, Catalog, NewBlob, ObservationOutcome};
use crate::error::{CatalogError, Result};
use crate::hashing::{fast_probe, full_hash_exact};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, Metadata};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory names never descended into.
pub const DEFAULT_EXCLUDE_DIR_NAMES: &[&str] = &[
    "System Volume Information",
    "$Recycle.Bin",
    "Windows",
    "Program Files",
    "Program Files (x86)",
    "AppData",
    "Application Data",
    "Local Settings",
    "Temporary Internet Files",
    "Temp",
    ".git",
    ".svn",
    "node_modules",
    "__pycache__",
    ".cache",
    ".Trash",
];

/// File extensions (lowercase, no dot) never hashed.
pub const DEFAULT_EXCLUDE_EXTENSIONS: &[&str] = &[
    "tmp", "temp", "log", "cache", "bak", "swp", "lock", "pid", "sock", "fifo",
];

/// Per-file problems kept in a `ScanSummary`; later ones are only counted.
pub const MAX_REPORTED_ERRORS: usize = 100;

/// Configuration for scanning operations
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Directory names to prune (exact match on the name, not the path)
    pub exclude_dir_names: Vec<String>,
    /// Extensions to skip, lowercase without the dot
    pub exclude_extensions: Vec<String>,
    /// Volume label recorded on every asset; defaults to the device id
    pub volume_id: Option<String>,
    /// Mark assets under the root that were not seen as unavailable
    pub mark_missing: bool,
    /// Refresh files with unchanged path, size, mtime and fast probe without a
    /// full hash. An edit that preserves the mtime is then missed.
    pub trust_unchanged: bool,
    /// Files between progress updates
    pub progress_interval: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dir_names: DEFAULT_EXCLUDE_DIR_NAMES.iter().map(|s| s.to_string()).collect(),
            exclude_extensions: DEFAULT_EXCLUDE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            volume_id: None,
            mark_missing: true,
            trust_unchanged: false,
            progress_interval: 100,
        }
    }
}

/// Cooperative cancellation flag, checked between files.
#[derive(Debug, Clone, Default)]
pub struct ScanCancelToken(Arc<AtomicBool>);

impl ScanCancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress update during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanProgress {
    pub files_found: u64,
    pub files_saved: u64,
    pub files_refreshed: u64,
    pub files_failed: u64,
    pub bytes_hashed: u64,
    /// File being processed (hint)
    pub current_path: Option<String>,
}

/// One file or directory the scan could not handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub path: String,
    pub message: String,
}

/// Result of a scan operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub root: String,
    /// Regular files considered for ingestion
    pub files_found: u64,
    /// New assets recorded (new content or a new location of known content)
    pub files_saved: u64,
    /// Known assets whose `last_seen` was refreshed
    pub files_refreshed: u64,
    pub files_failed: u64,
    /// Files skipped by extension, plus symlinks and special files
    pub files_skipped: u64,
    /// Directories pruned by name or unreadable
    pub dirs_skipped: u64,
    /// Bytes read by full hashing
    pub bytes_hashed: u64,
    /// Files whose probe matched a blob with different content
    pub probe_collisions: u64,
    /// Assets marked unavailable because the scan no longer found them
    pub missing_marked: u64,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub errors: Vec<ScanIssue>,
}

impl ScanSummary {
    fn record_issue(&mut self, path: &Path, message: String) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(ScanIssue {
                path: path.display().to_string(),
                message,
            });
        }
    }

    fn progress(&self, current: Option<&Path>) -> ScanProgress {
        ScanProgress {
            files_found: self.files_found,
            files_saved: self.files_saved,
            files_refreshed: self.files_refreshed,
            files_failed: self.files_failed,
            bytes_hashed: self.bytes_hashed,
            current_path: current.map(|p| p.display().to_string()),
        }
    }
}

/// Filesystem scanner
#[derive(Debug, Clone)]
pub struct Scanner {
    catalog: Catalog,
    config: ScanConfig,
}

impl Scanner {
    /// Create a new scanner with the given catalog and default config
    pub fn new(catalog: Catalog) -> Self {
        Self::with_config(catalog, ScanConfig::default())
    }

    pub fn with_config(catalog: Catalog, config: ScanConfig) -> Self {
        Self { catalog, config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan `root` with no progress reporting or cancellation.
    pub fn scan(&self, root: &Path) -> Result<ScanSummary> {
        self.scan_with(root, None, None)
    }

    /// Scan `root`, a directory or a single file.
    pub fn scan_with(
        &self,
        root: &Path,
        progress_tx: Option<mpsc::Sender<ScanProgress>>,
        cancel: Option<&ScanCancelToken>,
    ) -> Result<ScanSummary> {
        let root = match fs::canonicalize(root) {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CatalogError::not_found(format!("scan root {}", root.display())))
            }
            Err(e) => return Err(e.into()),
        };

        let start = Instant::now();
        let scan_start = Utc::now();
        let mut summary = ScanSummary {
            root: root.display().to_string(),
            ..ScanSummary::default()
        };
        let mut clean = true;
        let mut pruned_dirs: Vec<String> = Vec::new();

        info!(root = %summary.root, "Starting scan");

        let interval = self.config.progress_interval.max(1) as u64;
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let prune = entry.depth() > 0
                    && entry.file_type().is_dir()
                    && self.is_excluded_dir(entry.file_name().to_string_lossy().as_ref());
                if prune {
                    pruned_dirs.push(entry.path().display().to_string());
                    debug!(path = %entry.path().display(), "Skipping excluded directory");
                }
                !prune
            });

        for item in walker {
            if cancel.map(ScanCancelToken::is_cancelled).unwrap_or(false) {
                summary.cancelled = true;
                break;
            }

            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    clean = false;
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    let denied = err
                        .io_error()
                        .map(|e| e.kind() == io::ErrorKind::PermissionDenied)
                        .unwrap_or(false);
                    if denied {
                        summary.dirs_skipped += 1;
                        warn!(path = %path.display(), "Permission denied, skipping directory");
                    } else {
                        warn!(path = %path.display(), error = %err, "Walk error");
                    }
                    summary.record_issue(&path, err.to_string());
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() || self.is_excluded_file(entry.path()) {
                summary.files_skipped += 1;
                continue;
            }

            summary.files_found += 1;
            match self.ingest_file(entry.path(), &mut summary) {
                Ok(ObservationOutcome::NewContent) | Ok(ObservationOutcome::NewLocation) => {
                    summary.files_saved += 1
                }
                Ok(ObservationOutcome::Refreshed) => summary.files_refreshed += 1,
                Err(err) => {
                    clean = false;
                    summary.files_failed += 1;
                    warn!(path = %entry.path().display(), error = %err, "Failed to ingest file");
                    summary.record_issue(entry.path(), err.to_string());
                }
            }

            if summary.files_found % interval == 0 {
                if let Some(ref tx) = progress_tx {
                    let _ = tx.send(summary.progress(Some(entry.path())));
                }
            }
        }

        summary.dirs_skipped += pruned_dirs.len() as u64;

        if let Some(ref tx) = progress_tx {
            let _ = tx.send(summary.progress(None));
        }

        // Only a complete walk proves absence
        if self.config.mark_missing && clean && !summary.cancelled {
            summary.missing_marked = self
                .catalog
                .mark_missing_under(&summary.root, scan_start, &pruned_dirs)?;
        } else if self.config.mark_missing {
            warn!(
                root = %summary.root,
                cancelled = summary.cancelled,
                failed = summary.files_failed,
                "Skipping missing-file marking: scan was incomplete"
            );
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            root = %summary.root,
            found = summary.files_found,
            saved = summary.files_saved,
            refreshed = summary.files_refreshed,
            failed = summary.files_failed,
            skipped = summary.files_skipped,
            collisions = summary.probe_collisions,
            missing = summary.missing_marked,
            cancelled = summary.cancelled,
            duration_ms = summary.duration_ms,
            "Scan complete"
        );
        Ok(summary)
    }

    /// Hash one file and record it.
    fn ingest_file(&self, path: &Path, summary: &mut ScanSummary) -> Result<ObservationOutcome> {
        let mut file = File::open(path)?;
        let meta = file.metadata()?;
        let size = meta.len();
        let fast_hash = fast_probe(&mut file, size)?;
        let location = asset_location(path, &meta, self.config.volume_id.as_deref());

        if self.config.trust_unchanged {
            if let Some(existing) = self.catalog.asset_at_path(&location.full_path)? {
                if location.mtime.is_some() && existing.mtime == location.mtime {
                    if let Some(blob) = self.catalog.get_blob(&existing.content_hash)? {
                        if blob.size == size && blob.fast_hash == fast_hash {
                            debug!(path = %location.full_path, "Unchanged since last scan");
                            self.catalog.upsert_asset(&blob.content_hash, &location)?;
                            return Ok(ObservationOutcome::Refreshed);
                        }
                    }
                }
            }
        }

        file.seek(SeekFrom::Start(0))?;
        let content_hash = full_hash_exact(&mut file, size)?;
        summary.bytes_hashed += size;

        let candidates = self.catalog.blobs_by_fast_hash(&fast_hash, size)?;
        if candidates.iter().any(|b| b.content_hash == content_hash) {
            debug!(path = %location.full_path, %content_hash, "Probe hit, content already known");
        } else if !candidates.is_empty() {
            summary.probe_collisions += 1;
            debug!(
                path = %location.full_path,
                %fast_hash,
                candidates = candidates.len(),
                "Probe collision, full hash differs"
            );
        }

        let (mime, primary_type) = classify(path);
        let blob = NewBlob {
            content_hash,
            fast_hash,
            size,
            mime,
            primary_type: Some(primary_type.to_string()),
        };
        Ok(self.catalog.record_observation(&blob, &location)?.outcome)
    }

    fn is_excluded_dir(&self, name: &str) -> bool {
        self.config.exclude_dir_names.iter().any(|d| d == name)
    }

    fn is_excluded_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| self.config.exclude_extensions.iter().any(|e| *e == ext))
            .unwrap_or(false)
    }
}

// ============================================================================
// Background scans
// ============================================================================

/// A scan running on its own thread.
#[derive(Debug)]
pub struct ScanHandle {
    cancel: ScanCancelToken,
    handle: JoinHandle<Result<ScanSummary>>,
}

impl ScanHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> ScanCancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the scan to end.
    pub fn join(self) -> Result<ScanSummary> {
        self.handle
            .join()
            .map_err(|_| CatalogError::invalid_state("scan thread panicked"))?
    }
}

/// Start a scan of `root` on a new thread.
pub fn spawn_scan(
    scanner: Scanner,
    root: PathBuf,
    progress_tx: Option<mpsc::Sender<ScanProgress>>,
) -> Result<ScanHandle> {
    let cancel = ScanCancelToken::new();
    let token = cancel.clone();
    let handle = thread::Builder::new()
        .name("filecat-scan".to_string())
        .spawn(move || scanner.scan_with(&root, progress_tx, Some(&token)))?;
    Ok(ScanHandle { cancel, handle })
}

// ============================================================================
// File attributes
// ============================================================================

/// Location attributes of a file as the catalog stores them.
pub(crate) fn asset_location(path: &Path, meta: &Metadata, volume_id: Option<&str>) -> AssetLocation {
    let (inode, device_id) = file_identity(meta);
    AssetLocation {
        full_path: path.display().to_string(),
        volume_id: volume_id
            .map(str::to_string)
            .or_else(|| device_id.map(|dev| format!("dev-{}", dev))),
        inode,
        device_id,
        mtime: meta.modified().ok().and_then(to_millis_precision),
    }
}

#[cfg(unix)]
fn file_identity(meta: &Metadata) -> (Option<u64>, Option<u64>) {
    use std::os::unix::fs::MetadataExt;
    (Some(meta.ino()), Some(meta.dev()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &Metadata) -> (Option<u64>, Option<u64>) {
    (None, None)
}

/// Truncate to what the catalog stores, so equality survives a round trip.
fn to_millis_precision(time: std::time::SystemTime) -> Option<DateTime<Utc>> {
    let ts = DateTime::<Utc>::from(time);
    Utc.timestamp_millis_opt(ts.timestamp_millis()).single()
}

/// Guess MIME type from the extension and map it to a coarse type.
pub fn classify(path: &Path) -> (Option<String>, &'static str) {
    match mime_guess::from_path(path).first() {
        Some(mime) => {
            let essence = mime.essence_str().to_string();
            let primary = primary_type_for_mime(&essence);
            (Some(essence), primary)
        }
        None => (None, "other"),
    }
}

/// Coarse classification of a MIME type.
pub fn primary_type_for_mime(mime: &str) -> &'static str {
    let (top, sub) = mime.split_once('/').unwrap_or((mime, ""));
    match top {
        "image" => "image",
        "video" => "video",
        "audio" => "audio",
        "text" => "document",
        _ => match sub {
            "pdf" | "msword" | "rtf" | "epub+zip" | "json" | "xml" => "document",
            s if s.starts_with("vnd.openxmlformats-officedocument")
                || s.starts_with("vnd.oasis.opendocument")
                || s.starts_with("vnd.ms-") =>
            {
                "document"
            }
            "zip" | "gzip" | "x-tar" | "x-7z-compressed" | "vnd.rar" | "x-rar-compressed"
            | "x-bzip2" | "x-xz" | "zstd" => "archive",
            "x-msdownload" | "x-executable" | "x-sharedlib" | "x-mach-binary"
            | "vnd.microsoft.portable-executable" | "x-sh" => "executable",
            _ => "other",
        },
    }
}

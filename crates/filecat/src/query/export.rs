//! Export a view's results as a directory of symlinks plus `manifest.json`.

use super::compiler::CompiledQuery;
use crate::catalog::{Catalog, CatalogEntry, OrderTerm};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name reserved for the manifest in every export directory.
pub const MANIFEST_NAME: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedLink {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFailure {
    pub source: String,
    pub error: String,
}

/// Contents of `manifest.json`. `created_links + failed_links == total_files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub savedview_id: i64,
    pub export_path: String,
    pub total_files: u64,
    pub created_links: u64,
    pub failed_links: u64,
    pub created_at: DateTime<Utc>,
    pub files: Vec<ExportedLink>,
    pub errors: Vec<ExportFailure>,
}

impl ExportManifest {
    pub fn manifest_path(&self) -> PathBuf {
        Path::new(&self.export_path).join(MANIFEST_NAME)
    }
}

/// Walk `query` page by page, linking each result into `target_dir`.
///
/// Missing sources and failed links are recorded per file; only failing to
/// create the directory or write the manifest aborts the export.
pub(crate) fn export_links(
    catalog: &Catalog,
    savedview_id: i64,
    query: &CompiledQuery,
    target_dir: &Path,
    page_size: u64,
) -> Result<ExportManifest> {
    fs::create_dir_all(target_dir)?;

    let mut manifest = ExportManifest {
        savedview_id,
        export_path: target_dir.display().to_string(),
        total_files: 0,
        created_links: 0,
        failed_links: 0,
        created_at: Utc::now(),
        files: Vec::new(),
        errors: Vec::new(),
    };

    for_each_by_id(catalog, query, page_size, |entry| {
        manifest.total_files += 1;
        let source = Path::new(&entry.full_path);
        match link_one(source, target_dir) {
            Ok(target) => manifest.files.push(ExportedLink {
                source: entry.full_path.clone(),
                target: target.display().to_string(),
            }),
            Err(err) => {
                warn!(source = %entry.full_path, error = %err, "Export link failed");
                manifest.errors.push(ExportFailure {
                    source: entry.full_path.clone(),
                    error: err.to_string(),
                });
            }
        }
        Ok(())
    })?;

    manifest.created_links = manifest.files.len() as u64;
    manifest.failed_links = manifest.errors.len() as u64;

    let writer = BufWriter::new(File::create(manifest.manifest_path())?);
    serde_json::to_writer_pretty(writer, &manifest)?;

    info!(
        view_id = savedview_id,
        export_path = %manifest.export_path,
        created = manifest.created_links,
        failed = manifest.failed_links,
        "Saved view exported"
    );
    Ok(manifest)
}

/// Visit every match of `query` in asset id order, `page_size` rows at a time.
///
/// Pages are keyed on the last id seen rather than an offset, so assets added
/// while the walk runs never shift a row into a page twice or out of all pages.
fn for_each_by_id<F>(catalog: &Catalog, query: &CompiledQuery, page_size: u64, mut visit: F) -> Result<()>
where
    F: FnMut(&CatalogEntry) -> Result<()>,
{
    let page_size = page_size.max(1);
    let order = [OrderTerm::by_asset_id()];
    let mut last_id = 0;
    loop {
        let filter = query.filter.after_id(last_id);
        let page = catalog.list_assets(&filter, &order, page_size, 0)?;
        for entry in &page.items {
            visit(entry)?;
        }
        match page.items.last() {
            Some(last) if (page.items.len() as u64) == page_size => last_id = last.asset_id,
            _ => return Ok(()),
        }
    }
}

fn link_one(source: &Path, target_dir: &Path) -> io::Result<PathBuf> {
    if !source.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source file does not exist: {}", source.display()),
        ));
    }
    let target = free_target(source, target_dir)?;
    symlink(source, &target)?;
    Ok(target)
}

/// `name`, then `stem_1.ext`, `stem_2.ext`, ... until nothing exists there.
fn free_target(source: &Path, target_dir: &Path) -> io::Result<PathBuf> {
    let file_name = source.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("source has no file name: {}", source.display()),
        )
    })?;

    let first = target_dir.join(file_name);
    if file_name != MANIFEST_NAME && !occupied(&first) {
        return Ok(first);
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter: u32 = 1;
    loop {
        let candidate = target_dir.join(format!("{}_{}{}", stem, counter, ext));
        if !occupied(&candidate) {
            return Ok(candidate);
        }
        counter += 1;
    }
}

/// True for anything at `path`, including dangling symlinks.
fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[cfg(unix)]
fn symlink(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(windows)]
fn symlink(source: &Path, target: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(source, target)
}

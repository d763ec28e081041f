//! Runs validated rules against catalog entries.

use super::action::{Action, DEFAULT_RULE_TAG_COLOR};
use super::eval::matches;
use super::{parse_rules, Rule};
use crate::catalog::{Catalog, CatalogEntry, TagSource, TagSpec};
use crate::collab::{Collaborators, Notification};
use crate::error::{CatalogError, Result};
use crate::hashing::ContentHash;
use crate::scanner::{asset_location, ScanCancelToken};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What one action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub rule: String,
    pub action: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of applying a rule list to one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub matched_count: usize,
    pub action_results: Vec<ActionResult>,
}

impl ApplyReport {
    pub fn failed_actions(&self) -> usize {
        self.action_results.iter().filter(|r| !r.success).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Applied { report: ApplyReport },
    NotFound,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub content_hash: ContentHash,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

/// Per-item outcomes of `RuleEngine::apply_batch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    pub processed: usize,
    pub matched: usize,
    pub not_found: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Applies rules to catalog entries and carries out their actions.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    catalog: Catalog,
    collaborators: Collaborators,
}

impl RuleEngine {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            collaborators: Collaborators::default(),
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Whether `rule` would match `entry`. No side effects.
    pub fn test(&self, rule: &Rule, entry: &CatalogEntry) -> bool {
        matches(&rule.when, entry)
    }

    /// Run every matching rule's actions on `entry`, rule order then action order.
    ///
    /// Each rule sees the entry as earlier actions left it (a moved file is
    /// matched and acted on at its new path). Failed actions are reported,
    /// never raised.
    pub fn apply(&self, rules: &[Rule], entry: &CatalogEntry) -> ApplyReport {
        let mut record = entry.clone();
        let mut report = ApplyReport::default();

        for rule in rules {
            if !matches(&rule.when, &record) {
                continue;
            }
            report.matched_count += 1;
            debug!(rule = %rule.name, path = %record.full_path, "Rule matched");

            for action in &rule.then {
                let outcome = self.run_action(rule, action, &mut record);
                let result = match outcome {
                    Ok(detail) => ActionResult {
                        rule: rule.name.clone(),
                        action: action.name().to_string(),
                        success: true,
                        error: None,
                        detail,
                    },
                    Err(err) => {
                        warn!(
                            rule = %rule.name,
                            action = action.name(),
                            path = %record.full_path,
                            error = %err,
                            "Rule action failed"
                        );
                        ActionResult {
                            rule: rule.name.clone(),
                            action: action.name().to_string(),
                            success: false,
                            error: Some(err),
                            detail: None,
                        }
                    }
                };
                report.action_results.push(result);
            }
        }

        report
    }

    /// Validate every rule document, then apply them. Nothing runs if any is invalid.
    pub fn apply_json(&self, docs: &[Value], entry: &CatalogEntry) -> Result<ApplyReport> {
        let rules = parse_rules(docs)?;
        Ok(self.apply(&rules, entry))
    }

    /// Apply `rules` to the first available asset of each content hash.
    ///
    /// Unknown or unavailable content is recorded as `NotFound` and the batch
    /// goes on. `cancel` is checked between items.
    pub fn apply_batch(
        &self,
        rules: &[Rule],
        content_hashes: &[ContentHash],
        cancel: Option<&ScanCancelToken>,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for content_hash in content_hashes {
            if cancel.map(ScanCancelToken::is_cancelled).unwrap_or(false) {
                report.cancelled = true;
                break;
            }
            report.processed += 1;

            let outcome = match self.catalog.entry_for_content_hash(content_hash) {
                Ok(Some(entry)) => {
                    let applied = self.apply(rules, &entry);
                    if applied.matched_count > 0 {
                        report.matched += 1;
                    }
                    BatchOutcome::Applied { report: applied }
                }
                Ok(None) => {
                    report.not_found += 1;
                    BatchOutcome::NotFound
                }
                Err(err) => {
                    report.failed += 1;
                    BatchOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            report.items.push(BatchItem {
                content_hash: content_hash.clone(),
                outcome,
            });
        }

        info!(
            processed = report.processed,
            matched = report.matched,
            not_found = report.not_found,
            failed = report.failed,
            cancelled = report.cancelled,
            "Rule batch finished"
        );
        report
    }

    // ========================================================================
    // Actions
    // ========================================================================

    fn run_action(
        &self,
        rule: &Rule,
        action: &Action,
        record: &mut CatalogEntry,
    ) -> std::result::Result<Option<String>, String> {
        match action {
            Action::AddTag {
                name,
                color,
                confidence,
            } => {
                let spec = TagSpec {
                    name: name.clone(),
                    kind: "rule".to_string(),
                    color: Some(color.clone().unwrap_or_else(|| DEFAULT_RULE_TAG_COLOR.to_string())),
                    source: TagSource::Rule,
                    confidence: *confidence,
                };
                let added = self
                    .catalog
                    .attach_tag(&record.content_hash, &spec)
                    .map_err(|e| e.to_string())?;
                if added {
                    record.tags.push(name.clone());
                    record.tags.sort();
                    Ok(Some(format!("tag '{}' added", name)))
                } else {
                    Ok(Some(format!("tag '{}' already attached", name)))
                }
            }
            Action::RemoveTag { name } => {
                let removed = self
                    .catalog
                    .detach_tag(&record.content_hash, name)
                    .map_err(|e| e.to_string())?;
                record.tags.retain(|t| t != name);
                Ok(Some(if removed {
                    format!("tag '{}' removed", name)
                } else {
                    format!("tag '{}' was not attached", name)
                }))
            }
            Action::SetPrimaryType { primary_type } => {
                self.catalog
                    .set_primary_type(&record.content_hash, primary_type)
                    .map_err(|e| e.to_string())?;
                record.primary_type = Some(primary_type.clone());
                Ok(Some(format!("primary type set to '{}'", primary_type)))
            }
            Action::MoveFile { path } => self.move_file(record, path).map(Some),
            Action::CopyFile { path } => self.copy_file(record, path).map(Some),
            Action::DeleteFile => self.delete_file(record).map(Some),
            Action::GeneratePreview => {
                self.collaborators
                    .preview
                    .request_preview(&record.content_hash, &record.full_path)
                    .map_err(|e| e.to_string())?;
                Ok(Some("preview requested".to_string()))
            }
            Action::ExtractMetadata => {
                self.collaborators
                    .metadata
                    .request_extraction(&record.content_hash, &record.full_path)
                    .map_err(|e| e.to_string())?;
                Ok(Some("metadata extraction requested".to_string()))
            }
            Action::SendNotification { message } => {
                let message = message
                    .clone()
                    .unwrap_or_else(|| format!("Rule '{}' matched {}", rule.name, record.full_path));
                self.collaborators
                    .notifier
                    .notify(Notification {
                        rule: rule.name.clone(),
                        message,
                        content_hash: record.content_hash.clone(),
                        path: record.full_path.clone(),
                    })
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
        }
    }

    /// Move on disk first, then update the catalog; undo the move if the
    /// catalog update fails.
    fn move_file(&self, record: &mut CatalogEntry, target: &str) -> std::result::Result<String, String> {
        let source = PathBuf::from(&record.full_path);
        let dest = prepare_target(&source, Path::new(target))?;
        let dest_str = dest.display().to_string();

        move_path(&source, &dest).map_err(|e| format!("move to {} failed: {}", dest_str, e))?;

        match self.catalog.relocate_asset(record.asset_id, &dest_str) {
            Ok(asset) => {
                info!(from = %record.full_path, to = %dest_str, "File moved by rule");
                record.asset_id = asset.id;
                record.full_path = asset.full_path;
                record.name = asset.name;
                record.extension = asset.extension;
                Ok(format!("moved to {}", dest_str))
            }
            Err(catalog_err) => match move_path(&dest, &source) {
                Ok(()) => Err(format!(
                    "catalog update failed, file moved back: {}",
                    catalog_err
                )),
                Err(undo_err) => {
                    error!(
                        from = %record.full_path,
                        to = %dest_str,
                        error = %undo_err,
                        "File moved but catalog not updated and move-back failed"
                    );
                    Err(format!(
                        "catalog update failed ({}) and moving the file back failed ({}); file is at {}",
                        catalog_err, undo_err, dest_str
                    ))
                }
            },
        }
    }

    /// Copy on disk and register the copy as another asset of the same blob.
    fn copy_file(&self, record: &CatalogEntry, target: &str) -> std::result::Result<String, String> {
        let source = PathBuf::from(&record.full_path);
        let dest = prepare_target(&source, Path::new(target))?;
        let dest_str = dest.display().to_string();

        fs::copy(&source, &dest).map_err(|e| format!("copy to {} failed: {}", dest_str, e))?;

        let registered = fs::metadata(&dest)
            .map_err(CatalogError::from)
            .and_then(|meta| {
                let location = asset_location(&dest, &meta, record.volume_id.as_deref());
                self.catalog.upsert_asset(&record.content_hash, &location)
            });

        match registered {
            Ok(asset) => Ok(format!("copied to {} (asset {})", dest_str, asset.record.id)),
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(&dest) {
                    warn!(path = %dest_str, error = %cleanup, "Could not remove unregistered copy");
                }
                Err(format!("copy not registered in catalog: {}", err))
            }
        }
    }

    /// Remove the file and mark its asset unavailable. A file that is already
    /// gone only needs the catalog update.
    fn delete_file(&self, record: &mut CatalogEntry) -> std::result::Result<String, String> {
        let detail = match fs::remove_file(&record.full_path) {
            Ok(()) => format!("deleted {}", record.full_path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                format!("{} was already missing", record.full_path)
            }
            Err(e) => return Err(format!("delete failed: {}", e)),
        };

        self.catalog
            .mark_unavailable(record.asset_id)
            .map_err(|e| format!("file removed but catalog not updated: {}", e))?;
        record.is_available = false;
        info!(path = %record.full_path, "File deleted by rule");
        Ok(detail)
    }
}

/// Resolve a move/copy target: an existing directory receives the file under
/// its own name. Never overwrites; creates missing parent directories.
fn prepare_target(source: &Path, target: &Path) -> std::result::Result<PathBuf, String> {
    let dest = if target.is_dir() {
        let name = source
            .file_name()
            .ok_or_else(|| format!("{} has no file name", source.display()))?;
        target.join(name)
    } else {
        target.to_path_buf()
    };

    if dest == source {
        return Err(format!("{} is the file's current location", dest.display()));
    }
    if fs::symlink_metadata(&dest).is_ok() {
        return Err(format!("{} already exists", dest.display()));
    }
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }
    }
    Ok(dest)
}

/// Rename, falling back to copy + remove (e.g. across filesystems). A
/// fallback whose remove fails deletes the copy again.
fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    let rename_err = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if !from.is_file() {
        return Err(rename_err);
    }
    debug!(from = %from.display(), error = %rename_err, "Rename failed, copying instead");

    if let Err(copy_err) = fs::copy(from, to) {
        discard_partial(to);
        return Err(copy_err);
    }
    if let Err(remove_err) = fs::remove_file(from) {
        discard_partial(to);
        return Err(remove_err);
    }
    Ok(())
}

fn discard_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not remove partial copy");
        }
    }
}

//! Configuration for the catalog and its scanner

use crate::error::{CatalogError, Result};
use crate::query::DEFAULT_EXPORT_PAGE_SIZE;
use crate::scanner::{ScanConfig, DEFAULT_EXCLUDE_DIR_NAMES, DEFAULT_EXCLUDE_EXTENSIONS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up in the filecat home when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Main configuration for filecat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilecatConfig {
    /// Path to the SQLite catalog
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default)]
    pub scan: ScanSection,

    #[serde(default)]
    pub export: ExportSection,
}

/// `[scan]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSection {
    #[serde(default = "default_exclude_dir_names")]
    pub exclude_dir_names: Vec<String>,

    #[serde(default = "default_exclude_extensions")]
    pub exclude_extensions: Vec<String>,

    /// Volume label stored on every asset; the device id when unset
    #[serde(default)]
    pub volume_id: Option<String>,

    #[serde(default = "default_true")]
    pub mark_missing: bool,

    /// Skip the full hash of files whose path, size, mtime and fast probe are
    /// unchanged. Edits that keep the mtime go unnoticed when set.
    #[serde(default)]
    pub trust_unchanged: bool,

    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

/// `[export]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSection {
    /// Rows fetched per page while exporting a view
    #[serde(default = "default_export_page_size")]
    pub page_size: u64,
}

fn default_database_path() -> String {
    filecat_logging::filecat_home()
        .map(|home| home.join("catalog.sqlite3"))
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "catalog.sqlite3".to_string())
}

fn default_exclude_dir_names() -> Vec<String> {
    DEFAULT_EXCLUDE_DIR_NAMES.iter().map(|s| s.to_string()).collect()
}

fn default_exclude_extensions() -> Vec<String> {
    DEFAULT_EXCLUDE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_progress_interval() -> usize {
    100
}

fn default_export_page_size() -> u64 {
    DEFAULT_EXPORT_PAGE_SIZE
}

impl Default for FilecatConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scan: ScanSection::default(),
            export: ExportSection::default(),
        }
    }
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            exclude_dir_names: default_exclude_dir_names(),
            exclude_extensions: default_exclude_extensions(),
            volume_id: None,
            mark_missing: default_true(),
            trust_unchanged: false,
            progress_interval: default_progress_interval(),
        }
    }
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            page_size: default_export_page_size(),
        }
    }
}

impl ScanSection {
    /// Scanner settings; extensions are normalized to lowercase without a dot.
    pub fn to_scan_config(&self) -> ScanConfig {
        ScanConfig {
            exclude_dir_names: self.exclude_dir_names.clone(),
            exclude_extensions: self
                .exclude_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            volume_id: self.volume_id.clone(),
            mark_missing: self.mark_missing,
            trust_unchanged: self.trust_unchanged,
            progress_interval: self.progress_interval,
        }
    }
}

impl FilecatConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FilecatConfig =
            toml::from_str(&content).map_err(|e| CatalogError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load `path`, or the defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CatalogError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `<home>/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        filecat_logging::filecat_home()
            .map(|home| home.join(CONFIG_FILE_NAME))
            .map_err(|e| CatalogError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = FilecatConfig::default();
        assert!(
            config.database_path.ends_with("catalog.sqlite3"),
            "unexpected database path: {}",
            config.database_path
        );
        assert!(config.scan.mark_missing);
        assert!(!config.scan.trust_unchanged);
        assert!(config.scan.exclude_dir_names.iter().any(|d| d == "node_modules"));
        assert_eq!(config.export.page_size, DEFAULT_EXPORT_PAGE_SIZE);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: FilecatConfig = toml::from_str(
            r#"
            database_path = "/tmp/cat.sqlite3"

            [scan]
            exclude_extensions = [".ISO", "tmp"]
            mark_missing = false
            trust_unchanged = true
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, "/tmp/cat.sqlite3");
        assert!(!config.scan.mark_missing);
        assert_eq!(config.scan.progress_interval, 100);
        assert_eq!(config.export.page_size, DEFAULT_EXPORT_PAGE_SIZE);

        let scan = config.scan.to_scan_config();
        assert_eq!(scan.exclude_extensions, vec!["iso", "tmp"]);
        assert!(scan.trust_unchanged);
        assert!(!scan.exclude_dir_names.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = FilecatConfig::default();
        config.database_path = "cat.db".to_string();
        config.scan.volume_id = Some("usb-1".to_string());
        config.export.page_size = 50;
        config.save(&path).unwrap();

        assert_eq!(FilecatConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = FilecatConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scan, ScanSection::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "database_path = [").unwrap();
        assert!(matches!(FilecatConfig::load(&path), Err(CatalogError::Config(_))));
    }
}

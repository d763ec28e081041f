//! CLI module for filecat
//!
//! Every command opens the catalog named by `--db`, else the configured
//! `database_path`, and prints either a table or `--json`.

pub mod error;
pub mod output;

pub mod query;
pub mod rule;
pub mod scan;
pub mod search;
pub mod stats;
pub mod view;

use crate::cli::error::HelpfulError;
use filecat::{Catalog, FilecatConfig};
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolved configuration shared by every command.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: FilecatConfig,
    pub database_path: PathBuf,
}

impl CliContext {
    /// Load `config_path` (or `<home>/config.toml`) and apply `--db`.
    pub fn load(config_path: Option<&Path>, db_override: Option<&Path>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => FilecatConfig::load(path).map_err(|e| {
                HelpfulError::new(format!("Failed to load config: {}", e))
                    .with_context(format!("Config path: {}", path.display()))
            })?,
            None => {
                let path = FilecatConfig::default_path().map_err(HelpfulError::from_catalog)?;
                FilecatConfig::load_or_default(&path).map_err(HelpfulError::from_catalog)?
            }
        };
        let database_path = db_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&config.database_path));
        debug!(database = %database_path.display(), "Resolved catalog path");
        Ok(Self {
            config,
            database_path,
        })
    }

    pub fn open_catalog(&self) -> anyhow::Result<Catalog> {
        Catalog::open(&self.database_path).map_err(|e| {
            HelpfulError::catalog_unavailable(&self.database_path, &e.to_string()).into()
        })
    }
}

/// Read a JSON document given inline, as `@file`, or as `-` for stdin.
pub fn read_json_arg(arg: &str, what: &str) -> anyhow::Result<Value> {
    let text = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else if let Some(path) = arg.strip_prefix('@') {
        let path = Path::new(path);
        std::fs::read_to_string(path).map_err(|_| HelpfulError::path_not_found(path))?
    } else {
        arg.to_string()
    };
    serde_json::from_str(&text).map_err(|e| HelpfulError::invalid_json(what, &e.to_string()).into())
}

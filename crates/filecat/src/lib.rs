//! filecat - Content-Addressable File Catalog
//!
//! Files found on disk are reduced to content records keyed by their SHA-256,
//! queried with a declarative JSON condition language, and acted on by
//! automation rules written in the same language.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Scanner    │────▶│   Catalog   │◀────│   Queries   │──▶ saved views, export
//! │ (hash, dedup) │     │  (SQLite)   │     │  (compiler) │
//! └───────────────┘     └──────┬──────┘     └─────────────┘
//!                              │
//!                       ┌──────┴──────┐
//!                       │ Rule engine │──▶ preview / metadata / notify
//!                       └─────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Blob**: unique content, identified by the SHA-256 of every byte
//! - **Asset**: one path at which a blob was observed
//! - **Condition tree**: `{"field", "op", "value"}` leaves under `all`/`any`/`not`,
//!   compiled to SQL for queries and evaluated in memory for rules
//! - **Saved view**: a named condition tree that is validated before it is stored

pub mod catalog;
pub mod collab;
pub mod config;
pub mod error;
pub mod grammar;
pub mod hashing;
pub mod query;
pub mod rules;
pub mod scanner;

// Re-exports for convenience
pub use catalog::{
    Asset, AssetLocation, Blob, Catalog, CatalogEntry, CatalogStats, NewBlob, Page, SavedView,
    TagSource, TagSpec,
};
pub use collab::{Collaborators, ContainerEntry, ContainerLister};
pub use config::FilecatConfig;
pub use error::{CatalogError, CompileError, Result, ValidationErrors};
pub use hashing::{fast_probe, full_hash, ContentHash, FastHash};
pub use query::{compile, search, suggest, CompiledQuery, ExportManifest, SavedViews, SearchFilters};
pub use rules::{validate, ApplyReport, Rule, RuleEngine, ValidationResult};
pub use scanner::{spawn_scan, ScanCancelToken, ScanConfig, ScanHandle, ScanSummary, Scanner};

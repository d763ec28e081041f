//! Declarative queries over the catalog and the saved views built on them.

mod compiler;
mod export;
mod savedview;
mod search;

pub use compiler::{compile, compile_expr, CompiledQuery};
pub use export::{ExportFailure, ExportManifest, ExportedLink, MANIFEST_NAME};
pub use search::{compile_search, search, search_ast, suggest, SearchFilters, MIN_SUGGEST_CHARS};
pub use savedview::{
    SavedViewUpdate, SavedViews, ViewRefresh, ViewStats, DEFAULT_EXPORT_PAGE_SIZE,
};

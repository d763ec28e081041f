//! Saved views: named queries that are validated before they are stored.

use super::compiler::{compile, CompiledQuery};
use super::export::{export_links, ExportManifest};
use crate::catalog::{Catalog, CatalogEntry, Page, SavedView, TypeCount};
use crate::error::{CatalogError, Result, ValidationErrors};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// Rows fetched per page when exporting a view.
pub const DEFAULT_EXPORT_PAGE_SIZE: u64 = 500;

/// Fields to change on a saved view; `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct SavedViewUpdate {
    pub name: Option<String>,
    pub query_ast: Option<Value>,
    pub layout: Option<Value>,
}

/// Match count of a view, broken down by `primary_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewStats {
    pub savedview_id: i64,
    pub name: String,
    pub total_files: u64,
    pub type_stats: Vec<TypeCount>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRefresh {
    pub savedview_id: i64,
    pub total_files: u64,
    pub refreshed_at: DateTime<Utc>,
}

/// Saved view lifecycle over one catalog.
#[derive(Debug, Clone)]
pub struct SavedViews {
    catalog: Catalog,
    export_page_size: u64,
}

impl SavedViews {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            export_page_size: DEFAULT_EXPORT_PAGE_SIZE,
        }
    }

    pub fn with_export_page_size(mut self, page_size: u64) -> Self {
        self.export_page_size = page_size.max(1);
        self
    }

    /// Store a new view. An AST that does not compile is refused before any write.
    pub fn create(&self, name: &str, query_ast: &Value, layout: Option<&Value>) -> Result<SavedView> {
        let name = validate_name(name)?;
        validate_ast(query_ast)?;
        let view = self.catalog.insert_view(name, query_ast, layout)?;
        info!(view_id = view.id, name = %view.name, "Saved view created");
        Ok(view)
    }

    /// Change a view. A replacement AST is re-validated before any write.
    pub fn update(&self, id: i64, update: &SavedViewUpdate) -> Result<SavedView> {
        let name = update.name.as_deref().map(validate_name).transpose()?;
        if let Some(ast) = &update.query_ast {
            validate_ast(ast)?;
        }
        self.catalog
            .update_view(id, name, update.query_ast.as_ref(), update.layout.as_ref())
    }

    /// Delete the definition. Matched files are untouched.
    pub fn delete(&self, id: i64) -> Result<()> {
        self.catalog.delete_view(id)?;
        info!(view_id = id, "Saved view deleted");
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<SavedView> {
        self.catalog
            .get_view(id)?
            .ok_or_else(|| CatalogError::not_found(format!("saved view {}", id)))
    }

    /// All views, most recently updated first.
    pub fn list(&self) -> Result<Vec<SavedView>> {
        self.catalog.list_views()
    }

    /// Compile the stored AST of a view.
    pub fn compiled(&self, id: i64) -> Result<CompiledQuery> {
        let view = self.get(id)?;
        Ok(compile(&view.query_ast)?)
    }

    /// One page of a view's results.
    pub fn execute(&self, id: i64, limit: u64, offset: u64) -> Result<Page<CatalogEntry>> {
        self.compiled(id)?.execute(&self.catalog, limit, offset)
    }

    /// Total and per-type counts for a view.
    pub fn stats(&self, id: i64) -> Result<ViewStats> {
        let view = self.get(id)?;
        let compiled = compile(&view.query_ast)?;
        Ok(ViewStats {
            savedview_id: view.id,
            name: view.name,
            total_files: compiled.count(&self.catalog)?,
            type_stats: self.catalog.count_by_type(&compiled.filter)?,
            created_at: view.created_at,
            updated_at: view.updated_at,
        })
    }

    /// Re-run a view's count and bump its `updated_at`.
    pub fn refresh(&self, id: i64) -> Result<ViewRefresh> {
        let total_files = self.compiled(id)?.count(&self.catalog)?;
        let view = self.catalog.update_view(id, None, None, None)?;
        Ok(ViewRefresh {
            savedview_id: id,
            total_files,
            refreshed_at: view.updated_at,
        })
    }

    /// Symlink every result of a view into `target_dir` and write `manifest.json`.
    pub fn export(&self, id: i64, target_dir: &Path) -> Result<ExportManifest> {
        let compiled = self.compiled(id)?;
        export_links(&self.catalog, id, &compiled, target_dir, self.export_page_size)
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::validation("view name must not be empty"));
    }
    Ok(trimmed)
}

fn validate_ast(ast: &Value) -> Result<()> {
    compile(ast)
        .map(|_| ())
        .map_err(|e| CatalogError::Validation(ValidationErrors(vec![e.to_string()])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn views() -> SavedViews {
        SavedViews::new(Catalog::open_in_memory().unwrap())
    }

    #[test]
    fn invalid_ast_is_refused_before_writing() {
        let views = views();
        let err = views
            .create("bad", &json!({"field": "colour", "value": "red"}), None)
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert!(views.list().unwrap().is_empty());
    }

    #[test]
    fn update_revalidates_and_keeps_old_ast_on_failure() {
        let views = views();
        let ast = json!({"field": "type", "op": "eq", "value": "image"});
        let view = views.create("images", &ast, None).unwrap();

        let err = views
            .update(
                view.id,
                &SavedViewUpdate {
                    query_ast: Some(json!({"field": "size", "op": "regex", "value": "1"})),
                    ..SavedViewUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert_eq!(views.get(view.id).unwrap().query_ast, ast);

        let renamed = views
            .update(
                view.id,
                &SavedViewUpdate {
                    name: Some("pictures".into()),
                    ..SavedViewUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "pictures");
        assert!(renamed.updated_at > view.updated_at);
    }

    #[test]
    fn unknown_view_is_not_found() {
        let views = views();
        assert!(matches!(views.get(42), Err(CatalogError::NotFound(_))));
        assert!(matches!(views.delete(42), Err(CatalogError::NotFound(_))));
        assert!(matches!(
            views.update(42, &SavedViewUpdate::default()),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn layout_is_stored_verbatim() {
        let views = views();
        let layout = json!({"columns": ["name", "size"], "grid": true});
        let view = views.create("v", &json!({}), Some(&layout)).unwrap();
        assert_eq!(views.get(view.id).unwrap().layout, Some(layout));
    }
}

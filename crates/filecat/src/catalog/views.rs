//! Saved view rows. Callers validate the AST first (see `query::SavedViews`).

use super::Catalog;
use crate::catalog::types::SavedView;
use crate::error::{CatalogError, Result};
use chrono::{DateTime, Utc};
use filecat_db::{now_millis, DbRow};
use serde_json::Value;

const VIEW_COLUMNS: &str = "id, name, query_ast_json, layout_json, created_at, updated_at";

impl Catalog {
    pub(crate) fn insert_view(&self, name: &str, query_ast: &Value, layout: Option<&Value>) -> Result<SavedView> {
        let ast_json = serde_json::to_string(query_ast)?;
        let layout_json = layout.map(serde_json::to_string).transpose()?;
        let id = self.with_retry("saved_views", |tx| {
            let now = now_millis();
            tx.exec(
                "INSERT INTO saved_views (name, query_ast_json, layout_json, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?)",
                &[
                    name.into(),
                    ast_json.as_str().into(),
                    layout_json.as_deref().into(),
                    now.into(),
                    now.into(),
                ],
            )?;
            Ok(tx.tx.last_insert_rowid())
        })?;
        self.require_view(id)
    }

    /// Overwrite the fields that are `Some`; always bumps `updated_at`.
    pub(crate) fn update_view(
        &self,
        id: i64,
        name: Option<&str>,
        query_ast: Option<&Value>,
        layout: Option<&Value>,
    ) -> Result<SavedView> {
        let ast_json = query_ast.map(serde_json::to_string).transpose()?;
        let layout_json = layout.map(serde_json::to_string).transpose()?;
        let changed = self.with_retry("saved_views", |tx| {
            tx.exec(
                r#"
                UPDATE saved_views SET
                    name = COALESCE(?, name),
                    query_ast_json = COALESCE(?, query_ast_json),
                    layout_json = COALESCE(?, layout_json),
                    updated_at = MAX(?, updated_at + 1)
                WHERE id = ?
                "#,
                &[
                    name.into(),
                    ast_json.as_deref().into(),
                    layout_json.as_deref().into(),
                    now_millis().into(),
                    id.into(),
                ],
            )
        })?;
        if changed == 0 {
            return Err(CatalogError::not_found(format!("saved view {}", id)));
        }
        self.require_view(id)
    }

    /// Delete the definition only; nothing it matched is touched.
    pub(crate) fn delete_view(&self, id: i64) -> Result<()> {
        let removed = self.with_retry("saved_views", |tx| {
            tx.exec("DELETE FROM saved_views WHERE id = ?", &[id.into()])
        })?;
        if removed == 0 {
            return Err(CatalogError::not_found(format!("saved view {}", id)));
        }
        Ok(())
    }

    pub(crate) fn get_view(&self, id: i64) -> Result<Option<SavedView>> {
        let row = self.conn.query_optional(
            &format!("SELECT {} FROM saved_views WHERE id = ?", VIEW_COLUMNS),
            &[id.into()],
        )?;
        row.as_ref().map(row_to_view).transpose()
    }

    pub(crate) fn list_views(&self) -> Result<Vec<SavedView>> {
        let rows = self.conn.query_all(
            &format!(
                "SELECT {} FROM saved_views ORDER BY updated_at DESC, id DESC",
                VIEW_COLUMNS
            ),
            &[],
        )?;
        rows.iter().map(row_to_view).collect()
    }

    fn require_view(&self, id: i64) -> Result<SavedView> {
        self.get_view(id)?
            .ok_or_else(|| CatalogError::not_found(format!("saved view {}", id)))
    }
}

fn row_to_view(row: &DbRow) -> Result<SavedView> {
    let ast_json: String = row.get(2)?;
    let layout_json: Option<String> = row.get(3)?;
    let created_at: DateTime<Utc> = row.get(4)?;
    let updated_at: DateTime<Utc> = row.get(5)?;
    Ok(SavedView {
        id: row.get(0)?,
        name: row.get(1)?,
        query_ast: serde_json::from_str(&ast_json)?,
        layout: layout_json.as_deref().map(serde_json::from_str).transpose()?,
        created_at,
        updated_at,
    })
}

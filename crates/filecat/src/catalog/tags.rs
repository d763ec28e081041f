//! Tag attachment. Tags belong to blobs, so every copy of a file shares them.

use super::{Catalog, CatalogTx};
use crate::catalog::types::{AttachedTag, TagSource, TagSpec};
use crate::error::{CatalogError, Result};
use crate::hashing::ContentHash;
use filecat_db::{now_millis, DbRow};

impl Catalog {
    /// Attach a tag to a blob, creating the tag on first use.
    ///
    /// Returns `false` when the blob already carried the tag (nothing changes).
    pub fn attach_tag(&self, content_hash: &ContentHash, tag: &TagSpec) -> Result<bool> {
        let name = tag.name.trim();
        if name.is_empty() {
            return Err(CatalogError::validation("tag name must not be empty"));
        }

        self.write(content_hash, |tx| {
            if tx.get_blob(content_hash)?.is_none() {
                return Err(CatalogError::not_found(format!("blob {}", content_hash)));
            }
            let tag_id = tx.ensure_tag(name, &tag.kind, tag.color.as_deref())?;
            let inserted = tx.exec(
                r#"
                INSERT INTO file_tags (content_hash, tag_id, source, confidence, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(content_hash, tag_id) DO NOTHING
                "#,
                &[
                    content_hash.into(),
                    tag_id.into(),
                    tag.source.as_str().into(),
                    tag.confidence.into(),
                    now_millis().into(),
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Remove a tag from a blob. Returns `false` when it was not attached.
    pub fn detach_tag(&self, content_hash: &ContentHash, name: &str) -> Result<bool> {
        let name = name.trim();
        self.write(content_hash, |tx| {
            let removed = tx.exec(
                "DELETE FROM file_tags WHERE content_hash = ? \
                 AND tag_id = (SELECT id FROM tags WHERE name = ?)",
                &[content_hash.into(), name.into()],
            )?;
            Ok(removed > 0)
        })
    }

    /// Tags attached to a blob, by name.
    pub fn tags_for(&self, content_hash: &ContentHash) -> Result<Vec<AttachedTag>> {
        let rows = self.conn.query_all(
            r#"
            SELECT t.name, t.kind, t.color, ft.source, ft.confidence, ft.created_at
            FROM file_tags ft JOIN tags t ON t.id = ft.tag_id
            WHERE ft.content_hash = ?
            ORDER BY t.name
            "#,
            &[content_hash.into()],
        )?;
        rows.iter().map(row_to_attached).collect()
    }
}

impl CatalogTx<'_, '_> {
    fn ensure_tag(&mut self, name: &str, kind: &str, color: Option<&str>) -> Result<i64> {
        self.exec(
            r#"
            INSERT INTO tags (name, kind, color) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET color = COALESCE(tags.color, excluded.color)
            "#,
            &[name.into(), kind.into(), color.into()],
        )?;
        let rows = self.query_all("SELECT id FROM tags WHERE name = ?", &[name.into()])?;
        let row = rows.first().ok_or_else(|| {
            CatalogError::invalid_state(format!("tag '{}' missing after insert", name))
        })?;
        Ok(row.get(0)?)
    }
}

fn row_to_attached(row: &DbRow) -> Result<AttachedTag> {
    let source: String = row.get(3)?;
    Ok(AttachedTag {
        name: row.get(0)?,
        kind: row.get(1)?,
        color: row.get(2)?,
        source: TagSource::parse(&source).unwrap_or_default(),
        confidence: row.get(4)?,
        created_at: row.get(5)?,
    })
}

//! Free-text search and name suggestions.
//!
//! A search is an ordinary condition tree: every whitespace-separated term
//! must appear in the name, the path or a tag, and the optional filters are
//! ANDed on. It compiles and binds exactly like a saved view.

use super::compiler::{compile, like_pattern, CompiledQuery};
use crate::catalog::{Catalog, CatalogEntry, Page};
use crate::error::{CompileError, Result};
use crate::grammar::Operator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Prefixes shorter than this get no suggestions.
pub const MIN_SUGGEST_CHARS: usize = 2;

/// Narrowing applied on top of the free text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub primary_type: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub extension: Option<String>,
}

/// The condition tree for `text` and `filters`. Empty text matches everything.
pub fn search_ast(text: &str, filters: &SearchFilters) -> Value {
    let mut clauses: Vec<Value> = text
        .split_whitespace()
        .map(|term| {
            json!({"any": [
                {"field": "name", "op": "contains", "value": term},
                {"field": "path", "op": "contains", "value": term},
                {"field": "tag", "op": "contains", "value": term}
            ]})
        })
        .collect();

    if let Some(primary_type) = &filters.primary_type {
        clauses.push(json!({"field": "type", "op": "eq", "value": primary_type}));
    }
    if let Some(min) = filters.min_size {
        clauses.push(json!({"field": "size", "op": "gte", "value": min}));
    }
    if let Some(max) = filters.max_size {
        clauses.push(json!({"field": "size", "op": "lte", "value": max}));
    }
    if let Some(ext) = &filters.extension {
        clauses.push(json!({"field": "extension", "op": "eq", "value": ext.trim_start_matches('.')}));
    }

    json!({ "all": clauses })
}

pub fn compile_search(text: &str, filters: &SearchFilters) -> std::result::Result<CompiledQuery, CompileError> {
    compile(&search_ast(text, filters))
}

/// One page of available assets matching `text`, newest content first.
pub fn search(
    catalog: &Catalog,
    text: &str,
    filters: &SearchFilters,
    limit: u64,
    offset: u64,
) -> Result<Page<CatalogEntry>> {
    compile_search(text, filters)?.execute(catalog, limit, offset)
}

/// File and tag names starting with `prefix`, alphabetically.
pub fn suggest(catalog: &Catalog, prefix: &str, limit: u64) -> Result<Vec<String>> {
    let prefix = prefix.trim();
    if prefix.chars().count() < MIN_SUGGEST_CHARS || limit == 0 {
        return Ok(Vec::new());
    }

    let pattern = like_pattern(Operator::StartsWith, prefix);
    let rows = catalog.conn().query_all(
        r#"
        SELECT a.name FROM assets a
        WHERE a.is_available = 1 AND a.name LIKE ? ESCAPE '\'
        UNION
        SELECT t.name FROM tags t
        WHERE t.name LIKE ? ESCAPE '\'
        ORDER BY 1
        LIMIT ?
        "#,
        &[
            pattern.as_str().into(),
            pattern.as_str().into(),
            i64::try_from(limit).unwrap_or(i64::MAX).into(),
        ],
    )?;
    rows.iter()
        .map(|row| row.get::<String>(0).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AssetLocation, NewBlob, TagSpec};
    use crate::hashing::{fast_probe, full_hash, ContentHash};
    use std::io::Cursor;

    fn observe(catalog: &Catalog, path: &str, size: u64, primary_type: &str) -> ContentHash {
        let bytes = path.as_bytes().to_vec();
        let len = bytes.len() as u64;
        let blob = NewBlob {
            content_hash: full_hash(&mut Cursor::new(bytes.clone()), len, None).unwrap(),
            fast_hash: fast_probe(&mut Cursor::new(bytes), len).unwrap(),
            size,
            mime: None,
            primary_type: Some(primary_type.to_string()),
        };
        catalog
            .record_observation(&blob, &AssetLocation::new(path))
            .unwrap();
        blob.content_hash
    }

    fn sample() -> Catalog {
        let catalog = Catalog::open_in_memory().unwrap();
        observe(&catalog, "/photos/beach/sunset.jpg", 3_000, "image");
        observe(&catalog, "/photos/city/skyline.jpg", 9_000, "image");
        let report = observe(&catalog, "/work/q3-report.pdf", 500, "document");
        catalog
            .attach_tag(&report, &TagSpec::manual("sunshine-project"))
            .unwrap();
        catalog
    }

    fn found(page: Page<CatalogEntry>) -> Vec<String> {
        let mut paths: Vec<String> = page.items.into_iter().map(|e| e.full_path).collect();
        paths.sort();
        paths
    }

    #[test]
    fn terms_match_name_path_or_tag() {
        let catalog = sample();
        let none = SearchFilters::default();

        assert_eq!(
            found(search(&catalog, "SUN", &none, 10, 0).unwrap()),
            vec!["/photos/beach/sunset.jpg", "/work/q3-report.pdf"]
        );
        assert_eq!(
            found(search(&catalog, "photos sky", &none, 10, 0).unwrap()),
            vec!["/photos/city/skyline.jpg"]
        );
        assert_eq!(search(&catalog, "", &none, 10, 0).unwrap().total_count, 3);
        assert_eq!(search(&catalog, "nothing-like-this", &none, 10, 0).unwrap().total_count, 0);
    }

    #[test]
    fn filters_narrow_the_text_match() {
        let catalog = sample();
        let images = SearchFilters {
            primary_type: Some("image".into()),
            min_size: Some(5_000),
            ..SearchFilters::default()
        };
        assert_eq!(
            found(search(&catalog, "", &images, 10, 0).unwrap()),
            vec!["/photos/city/skyline.jpg"]
        );

        let pdfs = SearchFilters {
            extension: Some(".PDF".into()),
            max_size: Some(1_000),
            ..SearchFilters::default()
        };
        assert_eq!(
            found(search(&catalog, "report", &pdfs, 10, 0).unwrap()),
            vec!["/work/q3-report.pdf"]
        );
    }

    #[test]
    fn search_text_is_bound_not_spliced() {
        let compiled = compile_search("x' OR 1=1 --", &SearchFilters::default()).unwrap();
        assert!(!compiled.filter.clause().contains("1=1"));
    }

    #[test]
    fn suggestions_come_from_names_and_tags() {
        let catalog = sample();
        assert_eq!(
            suggest(&catalog, "su", 10).unwrap(),
            vec!["sunset.jpg", "sunshine-project"]
        );
        assert_eq!(suggest(&catalog, "su", 1).unwrap(), vec!["sunset.jpg"]);
        assert!(suggest(&catalog, "s", 10).unwrap().is_empty());
        assert!(suggest(&catalog, "50%", 10).unwrap().is_empty());
    }
}

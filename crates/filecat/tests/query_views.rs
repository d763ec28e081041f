//! End-to-end tests for declarative queries and saved views

use filecat::catalog::{AssetLocation, NewBlob, TagSpec};
use filecat::query::{search, suggest, SavedViewUpdate, SearchFilters, MANIFEST_NAME};
use filecat::{compile, Catalog, CatalogError, ContentHash, ExportManifest, SavedViews, Scanner};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs;
use tempfile::TempDir;

/// Record a synthetic file: `label` stands in for the bytes.
fn observe(catalog: &Catalog, path: &str, label: &str, size: u64, mime: &str, primary_type: &str) -> ContentHash {
    let hex = format!("{:x}", Sha256::digest(label.as_bytes()));
    let blob = NewBlob {
        content_hash: hex.parse().unwrap(),
        fast_hash: hex.parse().unwrap(),
        size,
        mime: Some(mime.to_string()),
        primary_type: Some(primary_type.to_string()),
    };
    catalog
        .record_observation(&blob, &AssetLocation::new(path))
        .unwrap();
    blob.content_hash
}

fn paths(catalog: &Catalog, ast: Value) -> Vec<String> {
    let mut found: Vec<String> = compile(&ast)
        .unwrap()
        .execute(catalog, 100, 0)
        .unwrap()
        .items
        .into_iter()
        .map(|e| e.full_path)
        .collect();
    found.sort();
    found
}

fn sample_catalog() -> Catalog {
    let catalog = Catalog::open_in_memory().unwrap();
    observe(&catalog, "/lib/small.txt", "small", 500, "text/plain", "document");
    observe(&catalog, "/lib/large.txt", "large", 2000, "text/plain", "document");
    observe(&catalog, "/lib/icon.png", "icon", 50, "image/png", "image");
    observe(&catalog, "/lib/photo.jpg", "photo", 5000, "image/jpeg", "image");
    observe(&catalog, "/lib/clip.mp4", "clip", 60, "video/mp4", "video");
    catalog
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_size_greater_than() {
    let catalog = Catalog::open_in_memory().unwrap();
    observe(&catalog, "/a/500.bin", "five hundred", 500, "application/octet-stream", "other");
    observe(&catalog, "/a/2000.bin", "two thousand", 2000, "application/octet-stream", "other");

    let found = paths(&catalog, json!({"field": "size", "op": "gt", "value": 1000}));
    assert_eq!(found, vec!["/a/2000.bin"]);
}

#[test]
fn test_all_is_an_intersection() {
    let catalog = sample_catalog();
    let found = paths(
        &catalog,
        json!({"all": [
            {"field": "type", "op": "eq", "value": "image"},
            {"field": "size", "op": "lt", "value": 100}
        ]}),
    );
    assert_eq!(found, vec!["/lib/icon.png"]);
}

#[test]
fn test_any_not_and_text_operators() {
    let catalog = sample_catalog();

    let found = paths(
        &catalog,
        json!({"any": [
            {"field": "extension", "op": "eq", "value": "mp4"},
            {"field": "name", "op": "starts_with", "value": "PHOTO"}
        ]}),
    );
    assert_eq!(found, vec!["/lib/clip.mp4", "/lib/photo.jpg"]);

    let found = paths(
        &catalog,
        json!({"not": {"field": "mime", "op": "contains", "value": "image"}}),
    );
    assert_eq!(found, vec!["/lib/clip.mp4", "/lib/large.txt", "/lib/small.txt"]);

    let found = paths(&catalog, json!({"field": "name", "op": "regex", "value": "^[a-z]+\\.txt$"}));
    assert_eq!(found, vec!["/lib/large.txt", "/lib/small.txt"]);
}

#[test]
fn test_tag_conditions() {
    let catalog = sample_catalog();
    let photo = catalog.asset_at_path("/lib/photo.jpg").unwrap().unwrap();
    catalog
        .attach_tag(&photo.content_hash, &TagSpec::manual("holiday"))
        .unwrap();

    assert_eq!(
        paths(&catalog, json!({"field": "tag", "op": "eq", "value": "holiday"})),
        vec!["/lib/photo.jpg"]
    );
    assert_eq!(
        paths(
            &catalog,
            json!({"all": [
                {"field": "type", "op": "eq", "value": "image"},
                {"field": "tag", "op": "ne", "value": "holiday"}
            ]})
        ),
        vec!["/lib/icon.png"]
    );

    let page = compile(&json!({"field": "tag", "op": "is_not_null"}))
        .unwrap()
        .execute(&catalog, 10, 0)
        .unwrap();
    assert_eq!(page.items[0].tags, vec!["holiday"]);
}

#[test]
fn test_pages_are_disjoint_and_complete() {
    let catalog = sample_catalog();
    let query = compile(&json!({"sort": [{"field": "size", "dir": "desc"}]})).unwrap();

    let first = query.execute(&catalog, 1, 0).unwrap();
    let second = query.execute(&catalog, 1, 1).unwrap();
    let both = query.execute(&catalog, 2, 0).unwrap();

    assert_eq!(first.total_count, 5);
    assert!(first.has_more());
    let paged: Vec<i64> = first.items.iter().chain(&second.items).map(|e| e.asset_id).collect();
    let whole: Vec<i64> = both.items.iter().map(|e| e.asset_id).collect();
    assert_eq!(paged, whole);
    assert_eq!(both.items[0].size, 5000);

    let past_end = query.execute(&catalog, 10, 10).unwrap();
    assert!(past_end.items.is_empty());
    assert_eq!(past_end.total_count, 5);
}

#[test]
fn test_invalid_queries_are_rejected() {
    for bad in [
        json!({"field": "colour", "op": "eq", "value": "red"}),
        json!({"field": "size", "op": "explode", "value": 1}),
        json!({"field": "size", "op": "contains", "value": "1"}),
        json!({"field": "name", "op": "regex", "value": "("}),
        json!({"all": "not a list"}),
    ] {
        assert!(compile(&bad).is_err(), "accepted {}", bad);
    }
}

#[test]
fn test_free_text_search_and_suggestions() {
    let catalog = sample_catalog();
    let icon = catalog.asset_at_path("/lib/icon.png").unwrap().unwrap();
    catalog
        .attach_tag(&icon.content_hash, &TagSpec::manual("logo"))
        .unwrap();

    let images = SearchFilters {
        primary_type: Some("image".into()),
        ..SearchFilters::default()
    };
    let page = search(&catalog, "o", &images, 10, 0).unwrap();
    assert_eq!(page.total_count, 2);

    let page = search(&catalog, "LOGO", &SearchFilters::default(), 10, 0).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].full_path, "/lib/icon.png");

    assert_eq!(suggest(&catalog, "lo", 10).unwrap(), vec!["logo"]);
    assert_eq!(suggest(&catalog, "ph", 10).unwrap(), vec!["photo.jpg"]);
}

// ============================================================================
// Saved views
// ============================================================================

#[test]
fn test_saved_view_lifecycle() {
    let catalog = sample_catalog();
    let views = SavedViews::new(catalog.clone());

    let view = views
        .create("Images", &json!({"field": "type", "op": "eq", "value": "image"}), None)
        .unwrap();
    assert_eq!(views.execute(view.id, 10, 0).unwrap().total_count, 2);

    let stats = views.stats(view.id).unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.type_stats.len(), 1);
    assert_eq!(stats.type_stats[0].count, 2);

    let updated = views
        .update(
            view.id,
            &SavedViewUpdate {
                query_ast: Some(json!({"field": "type", "op": "in", "value": ["image", "video"]})),
                ..SavedViewUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(updated.name, "Images");
    assert!(updated.updated_at > view.updated_at);
    assert_eq!(views.refresh(view.id).unwrap().total_files, 3);

    views.delete(view.id).unwrap();
    assert!(matches!(views.get(view.id), Err(CatalogError::NotFound(_))));
}

#[test]
fn test_invalid_view_is_never_stored() {
    let views = SavedViews::new(Catalog::open_in_memory().unwrap());
    let err = views
        .create("Broken", &json!({"field": "colour", "op": "eq", "value": "red"}), None)
        .unwrap_err();
    assert!(matches!(err, CatalogError::Validation(_)));
    assert!(views.list().unwrap().is_empty());

    let view = views.create("Everything", &json!({}), None).unwrap();
    let err = views
        .update(
            view.id,
            &SavedViewUpdate {
                query_ast: Some(json!({"not": []})),
                ..SavedViewUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, CatalogError::Validation(_)));
    assert_eq!(views.get(view.id).unwrap().query_ast, json!({}));
}

#[cfg(unix)]
#[test]
fn test_export_links_existing_files_and_reports_missing() {
    let temp = TempDir::new().unwrap();
    let library = temp.path().join("library");
    fs::create_dir_all(&library).unwrap();
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        fs::write(library.join(name), format!("contents of {}", name)).unwrap();
    }

    let catalog = Catalog::open(&temp.path().join("catalog.sqlite3")).unwrap();
    Scanner::new(catalog.clone()).scan(&library).unwrap();
    // Gone from disk, still available in the catalog
    fs::remove_file(library.join("d.txt")).unwrap();

    let views = SavedViews::new(catalog).with_export_page_size(2);
    let view = views
        .create("Text", &json!({"field": "extension", "op": "eq", "value": "txt"}), None)
        .unwrap();

    let out = temp.path().join("export");
    let manifest = views.export(view.id, &out).unwrap();
    assert_eq!(manifest.total_files, 4);
    assert_eq!(manifest.created_links, 3);
    assert_eq!(manifest.failed_links, 1);
    assert_eq!(manifest.created_links + manifest.failed_links, manifest.total_files);
    assert!(manifest.errors[0].source.ends_with("d.txt"));

    for link in &manifest.files {
        let meta = fs::symlink_metadata(&link.target).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(&link.target).unwrap().display().to_string(), link.source);
    }

    let written: ExportManifest =
        serde_json::from_str(&fs::read_to_string(out.join(MANIFEST_NAME)).unwrap()).unwrap();
    assert_eq!(written, manifest);
}

//! End-to-end tests for automation rules

use filecat::catalog::{AssetLocation, NewBlob};
use filecat::collab::{ChannelQueue, Collaborators};
use filecat::rules::{parse_rules, validate};
use filecat::{compile, Catalog, CatalogEntry, RuleEngine, Scanner};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs;
use std::sync::mpsc;
use std::sync::Arc;
use tempfile::TempDir;

fn synthetic_entry(catalog: &Catalog, path: &str, size: u64, primary_type: &str) -> CatalogEntry {
    let hex = format!("{:x}", Sha256::digest(path.as_bytes()));
    let blob = NewBlob {
        content_hash: hex.parse().unwrap(),
        fast_hash: hex.parse().unwrap(),
        size,
        mime: None,
        primary_type: Some(primary_type.to_string()),
    };
    let observed = catalog
        .record_observation(&blob, &AssetLocation::new(path))
        .unwrap();
    catalog.entry_for_asset(observed.asset.id).unwrap().unwrap()
}

fn big_file_rule() -> serde_json::Value {
    json!({
        "name": "big",
        "when": {"field": "size", "op": "gt", "value": 100_000_000},
        "then": [{"action": "add_tag", "args": {"name": "big"}}]
    })
}

#[test]
fn test_big_file_rule_tags_once() {
    let catalog = Catalog::open_in_memory().unwrap();
    let entry = synthetic_entry(&catalog, "/media/movie.mkv", 200_000_000, "video");
    let engine = RuleEngine::new(catalog.clone());

    let report = engine.apply_json(&[big_file_rule()], &entry).unwrap();
    assert_eq!(report.matched_count, 1);
    assert_eq!(report.action_results.len(), 1);
    assert!(report.action_results[0].success);
    assert_eq!(report.action_results[0].action, "add_tag");

    // Second run is a no-op on the attachment
    let again = engine.apply_json(&[big_file_rule()], &entry).unwrap();
    assert!(again.action_results[0].success);

    let tags = catalog.tags_for(&entry.content_hash).unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].name, "big");
    assert_eq!(tags[0].kind, "rule");

    let small = synthetic_entry(&catalog, "/media/note.txt", 10, "document");
    let report = engine.apply_json(&[big_file_rule()], &small).unwrap();
    assert_eq!(report.matched_count, 0);
    assert!(report.action_results.is_empty());
}

#[test]
fn test_validation_rejects_bad_rules() {
    let missing_when = validate(&json!({
        "name": "incomplete",
        "then": [{"action": "add_tag", "args": {"name": "x"}}]
    }));
    assert!(!missing_when.valid);
    assert!(missing_when.errors.iter().any(|e| e.contains("when")));

    let unknown_action = validate(&json!({
        "name": "mystery",
        "when": {"field": "size", "op": "gt", "value": 0},
        "then": [{"action": "teleport_file"}]
    }));
    assert!(!unknown_action.valid);
    assert!(unknown_action.errors.iter().any(|e| e.contains("teleport_file")));

    assert!(validate(&big_file_rule()).valid);
}

#[test]
fn test_invalid_rule_list_runs_nothing() {
    let catalog = Catalog::open_in_memory().unwrap();
    let entry = synthetic_entry(&catalog, "/media/movie.mkv", 200_000_000, "video");
    let engine = RuleEngine::new(catalog.clone());

    let result = engine.apply_json(
        &[big_file_rule(), json!({"name": "broken", "when": {"field": "size"}})],
        &entry,
    );
    assert!(result.is_err());
    assert!(catalog.tags_for(&entry.content_hash).unwrap().is_empty());
}

#[test]
fn test_later_rules_see_earlier_changes() {
    let catalog = Catalog::open_in_memory().unwrap();
    let entry = synthetic_entry(&catalog, "/scans/page.raw", 4_000, "other");
    let rules = parse_rules(&[
        json!({
            "name": "classify",
            "when": {"field": "extension", "op": "eq", "value": "raw"},
            "then": [{"action": "set_primary_type", "args": {"type": "image"}}]
        }),
        json!({
            "name": "images",
            "when": {"field": "type", "op": "eq", "value": "image"},
            "then": [
                {"action": "add_tag", "args": {"name": "photo", "color": "#FF9800"}},
                {"action": "generate_preview"},
                {"action": "extract_metadata"}
            ]
        }),
    ])
    .unwrap();

    let (tx, rx) = mpsc::channel();
    let queue = Arc::new(ChannelQueue::new(tx));
    let collaborators = Collaborators::default()
        .with_preview(queue.clone())
        .with_metadata(queue);
    let engine = RuleEngine::new(catalog.clone()).with_collaborators(collaborators);

    let report = engine.apply(&rules, &entry);
    assert_eq!(report.matched_count, 2);
    assert_eq!(report.failed_actions(), 0);
    assert_eq!(report.action_results.len(), 4);

    let requests: Vec<_> = rx.try_iter().collect();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.content_hash == entry.content_hash));

    let images = compile(&json!({"field": "tag", "op": "eq", "value": "photo"}))
        .unwrap()
        .execute(&catalog, 10, 0)
        .unwrap();
    assert_eq!(images.total_count, 1);
    assert_eq!(images.items[0].primary_type.as_deref(), Some("image"));
}

#[test]
fn test_file_actions_keep_catalog_in_step() {
    let temp = TempDir::new().unwrap();
    let library = temp.path().join("library");
    fs::create_dir_all(&library).unwrap();
    fs::write(library.join("report.pdf"), b"%PDF-1.4 quarterly").unwrap();

    let catalog = Catalog::open(&temp.path().join("catalog.sqlite3")).unwrap();
    Scanner::new(catalog.clone()).scan(&library).unwrap();
    let page = compile(&json!({})).unwrap().execute(&catalog, 10, 0).unwrap();
    let entry = page.items[0].clone();

    let archive = temp.path().join("archive");
    let backup = temp.path().join("backup");
    // Existing directories receive the file under its own name
    fs::create_dir_all(&archive).unwrap();
    fs::create_dir_all(&backup).unwrap();
    let rules = parse_rules(&[json!({
        "name": "file-documents",
        "when": {"field": "type", "op": "eq", "value": "document"},
        "then": [
            {"action": "copy_file", "args": {"path": backup.display().to_string()}},
            {"action": "move_file", "args": {"path": archive.display().to_string()}}
        ]
    })])
    .unwrap();

    let report = RuleEngine::new(catalog.clone()).apply(&rules, &entry);
    assert_eq!(report.failed_actions(), 0, "{:?}", report.action_results);

    assert!(!library.join("report.pdf").exists());
    assert!(archive.join("report.pdf").exists());
    assert!(backup.join("report.pdf").exists());

    // One blob, two available locations, neither of them the original
    let listed = compile(&json!({})).unwrap().execute(&catalog, 10, 0).unwrap();
    let mut found: Vec<String> = listed.items.iter().map(|e| e.full_path.clone()).collect();
    found.sort();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|p| p.ends_with("report.pdf") && !p.contains("library")));
    assert_eq!(catalog.stats().unwrap().blobs, 1);
}

#[test]
fn test_move_is_undone_when_catalog_update_fails() {
    let temp = TempDir::new().unwrap();
    let library = temp.path().join("library");
    fs::create_dir_all(&library).unwrap();
    let source = library.join("invoice.pdf");
    fs::write(&source, b"%PDF-1.4 invoice").unwrap();

    let catalog = Catalog::open(&temp.path().join("catalog.sqlite3")).unwrap();
    Scanner::new(catalog.clone()).scan(&library).unwrap();
    let page = compile(&json!({})).unwrap().execute(&catalog, 10, 0).unwrap();

    // A stale record whose asset row no longer exists
    let mut stale = page.items[0].clone();
    stale.asset_id += 10_000;

    let archive = temp.path().join("archive");
    fs::create_dir_all(&archive).unwrap();
    let rules = parse_rules(&[json!({
        "name": "archive-documents",
        "when": {"field": "type", "op": "eq", "value": "document"},
        "then": [{"action": "move_file", "args": {"path": archive.display().to_string()}}]
    })])
    .unwrap();

    let report = RuleEngine::new(catalog.clone()).apply(&rules, &stale);
    assert_eq!(report.failed_actions(), 1);
    let error = report.action_results[0].error.clone().unwrap_or_default();
    assert!(error.contains("moved back"), "{}", error);

    assert!(source.exists());
    assert!(!archive.join("invoice.pdf").exists());
    let asset = catalog.asset_at_path(&page.items[0].full_path).unwrap().unwrap();
    assert_eq!(asset.id, page.items[0].asset_id);
}

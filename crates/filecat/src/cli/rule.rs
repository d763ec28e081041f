//! Rule command - validate, test and apply automation rules
//!
//! Rules are not stored; each invocation supplies them as JSON (one rule
//! object or an array of them).

use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table};
use crate::cli::{read_json_arg, CliContext};
use clap::Subcommand;
use filecat::rules::{parse_rules, BatchOutcome};
use filecat::{validate, ApplyReport, Catalog, CatalogEntry, ContentHash, Rule, RuleEngine, SavedViews};
use serde_json::Value;

/// Subcommands for rules
#[derive(Subcommand, Debug, Clone)]
pub enum RuleAction {
    /// Check a rule document without running it
    Validate {
        /// Rule document: inline JSON, @file, or -
        rule: String,
        #[arg(long)]
        json: bool,
    },
    /// Report whether a rule's condition matches a file (no side effects)
    Test {
        rule: String,
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        json: bool,
    },
    /// Run rules against files
    Apply {
        /// One rule object or an array of rules
        rules: String,
        #[command(flatten)]
        target: Target,
        /// Apply to every file in a saved view
        #[arg(long, conflicts_with_all = ["asset", "hash"])]
        view: Option<i64>,
        #[arg(long)]
        json: bool,
    },
}

/// Which catalog entries a rule command acts on.
#[derive(clap::Args, Debug, Clone)]
pub struct Target {
    /// Asset id
    #[arg(long, conflicts_with = "hash")]
    pub asset: Option<i64>,
    /// Content hash (repeatable for `apply`)
    #[arg(long)]
    pub hash: Vec<String>,
}

impl RuleAction {
    pub fn wants_json(&self) -> bool {
        match self {
            RuleAction::Validate { json, .. }
            | RuleAction::Test { json, .. }
            | RuleAction::Apply { json, .. } => *json,
        }
    }
}

/// Execute the rule command
pub fn run(ctx: &CliContext, action: RuleAction) -> anyhow::Result<()> {
    match action {
        RuleAction::Validate { rule, json } => validate_rule(&rule, json),
        RuleAction::Test { rule, target, json } => test_rule(ctx, &rule, &target, json),
        RuleAction::Apply {
            rules,
            target,
            view,
            json,
        } => apply_rules(ctx, &rules, &target, view, json),
    }
}

fn validate_rule(rule: &str, json: bool) -> anyhow::Result<()> {
    let doc = read_json_arg(rule, "rule")?;
    let result = validate(&doc);
    if json {
        print_json(&result)?;
    } else if result.valid {
        println!("Rule is valid.");
    }
    if result.valid {
        Ok(())
    } else {
        Err(HelpfulError::invalid_document("rule", &result.errors).into())
    }
}

fn test_rule(ctx: &CliContext, rule: &str, target: &Target, json: bool) -> anyhow::Result<()> {
    let doc = read_json_arg(rule, "rule")?;
    let rule = Rule::from_json(&doc).map_err(|e| HelpfulError::invalid_document("rule", e.messages()))?;
    let catalog = ctx.open_catalog()?;
    let engine = RuleEngine::new(catalog.clone());

    let mut results = Vec::new();
    for entry in resolve_entries(&catalog, target)? {
        results.push(serde_json::json!({
            "asset_id": entry.asset_id,
            "path": entry.full_path,
            "matched": engine.test(&rule, &entry),
        }));
    }

    if json {
        return print_json(&results);
    }
    let rows = results
        .iter()
        .map(|r| {
            vec![
                r["asset_id"].to_string(),
                r["path"].as_str().unwrap_or_default().to_string(),
                r["matched"].to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "PATH", "MATCHED"], rows);
    Ok(())
}

fn apply_rules(
    ctx: &CliContext,
    rules: &str,
    target: &Target,
    view: Option<i64>,
    json: bool,
) -> anyhow::Result<()> {
    let docs = match read_json_arg(rules, "rules")? {
        Value::Array(items) => items,
        single => vec![single],
    };
    let rules = parse_rules(&docs).map_err(|e| HelpfulError::invalid_document("rules", e.messages()))?;
    let catalog = ctx.open_catalog()?;
    let engine = RuleEngine::new(catalog.clone());

    let hashes = match view {
        Some(id) => view_hashes(ctx, &catalog, id)?,
        None => match target.asset {
            Some(id) => {
                let report = engine.apply(&rules, &asset_entry(&catalog, id)?);
                return print_apply_report(&report, json);
            }
            None => parse_hashes(&target.hash)?,
        },
    };

    let report = engine.apply_batch(&rules, &hashes, None);
    if json {
        return print_json(&report);
    }
    for item in &report.items {
        match &item.outcome {
            BatchOutcome::Applied { report } => {
                println!("{}: {} rule(s) matched", item.content_hash, report.matched_count);
                print_results(report);
            }
            BatchOutcome::NotFound => println!("{}: not in catalog", item.content_hash),
            BatchOutcome::Failed { error } => println!("{}: failed: {}", item.content_hash, error),
        }
    }
    println!(
        "Processed {}, matched {}, not found {}, failed {}",
        report.processed, report.matched, report.not_found, report.failed
    );
    Ok(())
}

fn print_apply_report(report: &ApplyReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }
    println!("{} rule(s) matched", report.matched_count);
    print_results(report);
    Ok(())
}

fn print_results(report: &ApplyReport) {
    if report.action_results.is_empty() {
        return;
    }
    let rows = report
        .action_results
        .iter()
        .map(|r| {
            vec![
                r.rule.clone(),
                r.action.clone(),
                if r.success { "ok".to_string() } else { "FAILED".to_string() },
                r.error.clone().or_else(|| r.detail.clone()).unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["RULE", "ACTION", "STATUS", "DETAIL"], rows);
}

fn parse_hashes(raw: &[String]) -> anyhow::Result<Vec<ContentHash>> {
    if raw.is_empty() {
        return Err(HelpfulError::new("No target files given")
            .with_suggestion("TRY: --asset <id>, --hash <sha256> (repeatable) or --view <id>")
            .into());
    }
    raw.iter()
        .map(|h| {
            h.parse::<ContentHash>().map_err(|e| {
                anyhow::Error::from(
                    HelpfulError::new(e).with_context("Content hashes are 64 hex digits (SHA-256)"),
                )
            })
        })
        .collect()
}

fn resolve_entries(catalog: &Catalog, target: &Target) -> anyhow::Result<Vec<CatalogEntry>> {
    if let Some(id) = target.asset {
        return Ok(vec![asset_entry(catalog, id)?]);
    }

    let mut entries = Vec::new();
    for hash in parse_hashes(&target.hash)? {
        let entry = catalog
            .entry_for_content_hash(&hash)
            .map_err(HelpfulError::from_catalog)?
            .ok_or_else(|| HelpfulError::new(format!("No available file with content {}", hash)))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn asset_entry(catalog: &Catalog, id: i64) -> anyhow::Result<CatalogEntry> {
    let entry = catalog
        .entry_for_asset(id)
        .map_err(HelpfulError::from_catalog)?
        .ok_or_else(|| {
            HelpfulError::new(format!("Asset not found: {}", id))
                .with_suggestion("TRY: Find asset ids with: filecat query '{\"all\": []}'")
        })?;
    Ok(entry)
}

/// Content hashes of every file in a view, paged like an export.
fn view_hashes(ctx: &CliContext, catalog: &Catalog, id: i64) -> anyhow::Result<Vec<ContentHash>> {
    let views = SavedViews::new(catalog.clone());
    let page_size = ctx.config.export.page_size.max(1);
    let mut hashes: Vec<ContentHash> = Vec::new();
    let mut offset = 0;
    loop {
        let page = views
            .execute(id, page_size, offset)
            .map_err(|_| HelpfulError::view_not_found(id))?;
        let fetched = page.items.len() as u64;
        for entry in page.items {
            if !hashes.contains(&entry.content_hash) {
                hashes.push(entry.content_hash);
            }
        }
        offset += fetched;
        if fetched == 0 || offset >= page.total_count {
            break;
        }
    }
    Ok(hashes)
}

//! Scan command - hash a directory tree into the catalog

use crate::cli::error::HelpfulError;
use crate::cli::output::{format_size, print_json, print_table};
use crate::cli::CliContext;
use filecat::scanner::ScanProgress;
use filecat::{spawn_scan, ScanSummary, Scanner};
use std::path::PathBuf;
use std::sync::mpsc;

/// Arguments for the scan command
#[derive(Debug, clap::Args)]
pub struct ScanArgs {
    /// Directory (or single file) to scan
    pub path: PathBuf,

    /// Volume label recorded on every asset
    #[arg(long)]
    pub volume_id: Option<String>,

    /// Keep assets that were not found available
    #[arg(long)]
    pub no_mark_missing: bool,

    /// Output the summary as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(ctx: &CliContext, args: ScanArgs) -> anyhow::Result<()> {
    if !args.path.exists() {
        return Err(HelpfulError::path_not_found(&args.path).into());
    }

    let catalog = ctx.open_catalog()?;
    let mut config = ctx.config.scan.to_scan_config();
    if args.volume_id.is_some() {
        config.volume_id = args.volume_id.clone();
    }
    if args.no_mark_missing {
        config.mark_missing = false;
    }

    let (tx, rx) = mpsc::channel::<ScanProgress>();
    let handle = spawn_scan(Scanner::with_config(catalog, config), args.path.clone(), Some(tx))
        .map_err(HelpfulError::from_catalog)?;

    // Channel closes when the scan thread drops its sender
    for progress in rx {
        if !args.json {
            eprint!(
                "\rScanning: {} files, {} new, {} hashed",
                progress.files_found,
                progress.files_saved,
                format_size(progress.bytes_hashed)
            );
        }
    }
    if !args.json {
        eprintln!();
    }

    let summary = handle.join().map_err(HelpfulError::from_catalog)?;
    if args.json {
        print_json(&summary)
    } else {
        print_summary(&summary);
        Ok(())
    }
}

fn print_summary(summary: &ScanSummary) {
    print_table(
        &["METRIC", "VALUE"],
        vec![
            vec!["Root".into(), summary.root.clone()],
            vec!["Files found".into(), summary.files_found.to_string()],
            vec!["Saved".into(), summary.files_saved.to_string()],
            vec!["Unchanged".into(), summary.files_refreshed.to_string()],
            vec!["Failed".into(), summary.files_failed.to_string()],
            vec!["Skipped files".into(), summary.files_skipped.to_string()],
            vec!["Skipped dirs".into(), summary.dirs_skipped.to_string()],
            vec!["Hashed".into(), format_size(summary.bytes_hashed)],
            vec!["Marked missing".into(), summary.missing_marked.to_string()],
            vec!["Duration".into(), format!("{} ms", summary.duration_ms)],
        ],
    );

    if summary.cancelled {
        println!("Scan was cancelled before completion.");
    }
    for issue in &summary.errors {
        println!("  {}: {}", issue.path, issue.message);
    }
}

//! Stats command - catalog totals, type breakdown and duplicate report

use crate::cli::error::HelpfulError;
use crate::cli::output::{format_size, print_json, print_table, short_hash};
use crate::cli::CliContext;
use filecat::catalog::AssetFilter;

/// Arguments for the stats command
#[derive(Debug, clap::Args)]
pub struct StatsArgs {
    /// Number of duplicate groups to list
    #[arg(long, default_value = "10")]
    pub duplicates: u64,

    #[arg(long)]
    pub json: bool,
}

pub fn run(ctx: &CliContext, args: StatsArgs) -> anyhow::Result<()> {
    let catalog = ctx.open_catalog()?;
    let stats = catalog.stats().map_err(HelpfulError::from_catalog)?;
    let by_type = catalog
        .count_by_type(&AssetFilter::all())
        .map_err(HelpfulError::from_catalog)?;
    let duplicates = catalog
        .duplicate_groups(args.duplicates)
        .map_err(HelpfulError::from_catalog)?;

    if args.json {
        return print_json(&serde_json::json!({
            "database_path": ctx.database_path.display().to_string(),
            "stats": stats,
            "by_type": by_type,
            "duplicates": duplicates,
        }));
    }

    println!("Catalog: {}", ctx.database_path.display());
    print_table(
        &["METRIC", "VALUE"],
        vec![
            vec!["Unique contents".into(), stats.blobs.to_string()],
            vec!["Files".into(), stats.assets.to_string()],
            vec!["Available files".into(), stats.available_assets.to_string()],
            vec!["Orphaned contents".into(), stats.orphaned_blobs.to_string()],
            vec!["Tags".into(), stats.tags.to_string()],
            vec!["Saved views".into(), stats.saved_views.to_string()],
            vec!["Available bytes".into(), format_size(stats.available_bytes)],
        ],
    );

    if !by_type.is_empty() {
        let rows = by_type
            .iter()
            .map(|t| {
                vec![
                    t.primary_type.clone().unwrap_or_else(|| "-".to_string()),
                    t.count.to_string(),
                ]
            })
            .collect();
        print_table(&["TYPE", "FILES"], rows);
    }

    if !duplicates.is_empty() {
        let rows = duplicates
            .iter()
            .map(|group| {
                vec![
                    short_hash(group.content_hash.as_str()).to_string(),
                    group.paths.len().to_string(),
                    format_size(group.reclaimable_bytes()),
                    group.paths.join("\n"),
                ]
            })
            .collect();
        print_table(&["CONTENT", "COPIES", "RECLAIMABLE", "PATHS"], rows);
    }
    Ok(())
}

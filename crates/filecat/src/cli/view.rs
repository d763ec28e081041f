//! View command - manage saved views
//!
//! A view is stored only if its query compiles, so `run`, `stats` and
//! `export` never see an invalid tree.

use crate::cli::error::HelpfulError;
use crate::cli::output::{format_timestamp, print_json, print_table};
use crate::cli::query::print_page;
use crate::cli::{read_json_arg, CliContext};
use clap::Subcommand;
use filecat::query::SavedViewUpdate;
use filecat::{CatalogError, SavedViews};
use std::path::PathBuf;

/// Subcommands for saved views
#[derive(Subcommand, Debug, Clone)]
pub enum ViewAction {
    /// Create a view from a query document
    Create {
        name: String,
        /// Query document: inline JSON, @file, or -
        ast: String,
        /// Opaque layout document stored with the view
        #[arg(long)]
        layout: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List views, most recently updated first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one view
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Change a view's name, query or layout
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        layout: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Delete a view
    Delete { id: i64 },
    /// Run a view and print one page of results
    Run {
        id: i64,
        #[arg(long, default_value = "50")]
        limit: u64,
        #[arg(long, default_value = "0")]
        offset: u64,
        #[arg(long)]
        json: bool,
    },
    /// Count a view's files by type
    Stats {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Recount a view and bump its update time
    Refresh {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Symlink every file in a view into a directory
    Export {
        id: i64,
        dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

impl ViewAction {
    pub fn wants_json(&self) -> bool {
        match self {
            ViewAction::Create { json, .. }
            | ViewAction::List { json }
            | ViewAction::Show { json, .. }
            | ViewAction::Update { json, .. }
            | ViewAction::Run { json, .. }
            | ViewAction::Stats { json, .. }
            | ViewAction::Refresh { json, .. }
            | ViewAction::Export { json, .. } => *json,
            ViewAction::Delete { .. } => false,
        }
    }
}

/// Execute the view command
pub fn run(ctx: &CliContext, action: ViewAction) -> anyhow::Result<()> {
    let views = SavedViews::new(ctx.open_catalog()?).with_export_page_size(ctx.config.export.page_size);

    match action {
        ViewAction::Create {
            name,
            ast,
            layout,
            json,
        } => {
            let ast = read_json_arg(&ast, "query")?;
            let layout = layout.map(|l| read_json_arg(&l, "layout")).transpose()?;
            let view = views
                .create(&name, &ast, layout.as_ref())
                .map_err(HelpfulError::from_catalog)?;
            if json {
                print_json(&view)
            } else {
                println!("Created view {} ({})", view.id, view.name);
                Ok(())
            }
        }
        ViewAction::List { json } => {
            let list = views.list().map_err(HelpfulError::from_catalog)?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No saved views.");
                return Ok(());
            }
            let rows = list
                .iter()
                .map(|v| {
                    vec![
                        v.id.to_string(),
                        v.name.clone(),
                        format_timestamp(&v.updated_at),
                        v.query_ast.to_string(),
                    ]
                })
                .collect();
            print_table(&["ID", "NAME", "UPDATED", "QUERY"], rows);
            Ok(())
        }
        ViewAction::Show { id, json } => {
            let view = views.get(id).map_err(|e| view_error(id, e))?;
            if json {
                return print_json(&view);
            }
            println!("View {}: {}", view.id, view.name);
            println!("Created: {}", format_timestamp(&view.created_at));
            println!("Updated: {}", format_timestamp(&view.updated_at));
            println!("Query:\n{}", serde_json::to_string_pretty(&view.query_ast)?);
            if let Some(layout) = &view.layout {
                println!("Layout:\n{}", serde_json::to_string_pretty(layout)?);
            }
            Ok(())
        }
        ViewAction::Update {
            id,
            name,
            query,
            layout,
            json,
        } => {
            let update = SavedViewUpdate {
                name,
                query_ast: query.map(|q| read_json_arg(&q, "query")).transpose()?,
                layout: layout.map(|l| read_json_arg(&l, "layout")).transpose()?,
            };
            let view = views.update(id, &update).map_err(|e| view_error(id, e))?;
            if json {
                print_json(&view)
            } else {
                println!("Updated view {} ({})", view.id, view.name);
                Ok(())
            }
        }
        ViewAction::Delete { id } => {
            views.delete(id).map_err(|e| view_error(id, e))?;
            println!("Deleted view {}", id);
            Ok(())
        }
        ViewAction::Run {
            id,
            limit,
            offset,
            json,
        } => {
            let page = views.execute(id, limit, offset).map_err(|e| view_error(id, e))?;
            if json {
                print_json(&page)
            } else {
                print_page(&page);
                Ok(())
            }
        }
        ViewAction::Stats { id, json } => {
            let stats = views.stats(id).map_err(|e| view_error(id, e))?;
            if json {
                return print_json(&stats);
            }
            println!("View {} ({}): {} files", stats.savedview_id, stats.name, stats.total_files);
            let rows = stats
                .type_stats
                .iter()
                .map(|t| {
                    vec![
                        t.primary_type.clone().unwrap_or_else(|| "-".to_string()),
                        t.count.to_string(),
                    ]
                })
                .collect();
            print_table(&["TYPE", "FILES"], rows);
            Ok(())
        }
        ViewAction::Refresh { id, json } => {
            let refresh = views.refresh(id).map_err(|e| view_error(id, e))?;
            if json {
                print_json(&refresh)
            } else {
                println!(
                    "View {}: {} files at {}",
                    refresh.savedview_id,
                    refresh.total_files,
                    format_timestamp(&refresh.refreshed_at)
                );
                Ok(())
            }
        }
        ViewAction::Export { id, dir, json } => {
            let manifest = views.export(id, &dir).map_err(|e| view_error(id, e))?;
            if json {
                return print_json(&manifest);
            }
            println!(
                "Exported {} of {} files to {} ({} failed)",
                manifest.created_links,
                manifest.total_files,
                manifest.export_path,
                manifest.failed_links
            );
            for failure in &manifest.errors {
                println!("  {}: {}", failure.source, failure.error);
            }
            println!("Manifest: {}", manifest.manifest_path().display());
            Ok(())
        }
    }
}

fn view_error(id: i64, err: CatalogError) -> HelpfulError {
    match err {
        CatalogError::NotFound(_) => HelpfulError::view_not_found(id),
        other => HelpfulError::from_catalog(other),
    }
}

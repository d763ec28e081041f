//! Query command - run an ad-hoc condition tree against the catalog

use crate::cli::error::HelpfulError;
use crate::cli::output::{print_entries, print_json};
use crate::cli::{read_json_arg, CliContext};
use filecat::{compile, CatalogEntry, Page};

/// Arguments for the query command
#[derive(Debug, clap::Args)]
pub struct QueryArgs {
    /// Query document: inline JSON, @file, or - for stdin
    pub ast: String,

    #[arg(long, default_value = "50")]
    pub limit: u64,

    #[arg(long, default_value = "0")]
    pub offset: u64,

    /// Output the page as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(ctx: &CliContext, args: QueryArgs) -> anyhow::Result<()> {
    let ast = read_json_arg(&args.ast, "query")?;
    let compiled = compile(&ast)
        .map_err(|e| HelpfulError::invalid_document("query", &[e.to_string()]))?;

    let catalog = ctx.open_catalog()?;
    let page = compiled
        .execute(&catalog, args.limit, args.offset)
        .map_err(HelpfulError::from_catalog)?;

    if args.json {
        print_json(&page)
    } else {
        print_page(&page);
        Ok(())
    }
}

/// Table plus a position footer.
pub fn print_page(page: &Page<CatalogEntry>) {
    print_entries(&page.items);
    let shown_to = page.offset + page.items.len() as u64;
    if page.items.is_empty() {
        println!("No matching files ({} total)", page.total_count);
    } else {
        println!(
            "Showing {}-{} of {}",
            page.offset + 1,
            shown_to,
            page.total_count
        );
    }
}

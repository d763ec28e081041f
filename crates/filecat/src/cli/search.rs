//! Search command - free text over names, paths and tags

use crate::cli::error::HelpfulError;
use crate::cli::output::print_json;
use crate::cli::query::print_page;
use crate::cli::CliContext;
use filecat::query::{search, suggest, SearchFilters, MIN_SUGGEST_CHARS};

/// Arguments for the search command
#[derive(Debug, clap::Args)]
pub struct SearchArgs {
    /// Words that must each appear in the name, path or a tag
    #[arg(default_value = "")]
    pub text: String,

    /// Only this primary type (image, video, audio, document, ...)
    #[arg(long = "type")]
    pub primary_type: Option<String>,

    /// Minimum size in bytes
    #[arg(long)]
    pub min_size: Option<u64>,

    /// Maximum size in bytes
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Only this extension (with or without the dot)
    #[arg(long)]
    pub ext: Option<String>,

    /// List file and tag names starting with TEXT instead of searching
    #[arg(long)]
    pub suggest: bool,

    #[arg(long, default_value = "50")]
    pub limit: u64,

    #[arg(long, default_value = "0")]
    pub offset: u64,

    #[arg(long)]
    pub json: bool,
}

pub fn run(ctx: &CliContext, args: SearchArgs) -> anyhow::Result<()> {
    let catalog = ctx.open_catalog()?;

    if args.suggest {
        if args.text.trim().chars().count() < MIN_SUGGEST_CHARS {
            return Err(HelpfulError::new(format!(
                "Suggestions need at least {} characters",
                MIN_SUGGEST_CHARS
            ))
            .with_suggestion("TRY: Type a longer prefix: filecat search --suggest hol")
            .into());
        }
        let names = suggest(&catalog, &args.text, args.limit).map_err(HelpfulError::from_catalog)?;
        if args.json {
            return print_json(&names);
        }
        if names.is_empty() {
            println!("No suggestions for '{}'", args.text.trim());
        }
        for name in &names {
            println!("{}", name);
        }
        return Ok(());
    }

    let filters = SearchFilters {
        primary_type: args.primary_type,
        min_size: args.min_size,
        max_size: args.max_size,
        extension: args.ext,
    };
    let page = search(&catalog, &args.text, &filters, args.limit, args.offset)
        .map_err(HelpfulError::from_catalog)?;

    if args.json {
        print_json(&page)
    } else {
        print_page(&page);
        Ok(())
    }
}

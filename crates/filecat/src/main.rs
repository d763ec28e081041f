//! filecat command-line interface
//!
//! - `scan` hashes a tree into the catalog
//! - `query` runs an ad-hoc condition tree
//! - `search` matches free text against names, paths and tags
//! - `view` manages saved views and exports
//! - `rule` validates, tests and applies automation rules
//! - `stats` summarizes the catalog

use clap::{Parser, Subcommand};
use filecat_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "filecat", version, about = "Content-addressable file catalog")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Catalog database path (overrides the config file)
    #[arg(long, global = true, env = "FILECAT_DB")]
    db: Option<PathBuf>,

    /// Config file (default: ~/.filecat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hash files under a path into the catalog
    Scan(cli::scan::ScanArgs),

    /// Run a query document against the catalog
    Query(cli::query::QueryArgs),

    /// Search names, paths and tags, or suggest names
    Search(cli::search::SearchArgs),

    /// Manage saved views
    View {
        #[command(subcommand)]
        action: cli::view::ViewAction,
    },

    /// Validate, test and apply automation rules
    Rule {
        #[command(subcommand)]
        action: cli::rule::RuleAction,
    },

    /// Show catalog statistics
    Stats(cli::stats::StatsArgs),
}

fn command_wants_json(command: &Commands) -> bool {
    match command {
        Commands::Scan(args) => args.json,
        Commands::Query(args) => args.json,
        Commands::Search(args) => args.json,
        Commands::View { action } => action.wants_json(),
        Commands::Rule { action } => action.wants_json(),
        Commands::Stats(args) => args.json,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = command_wants_json(&cli.command);

    if let Err(err) = init_logging(LogConfig {
        app_name: "filecat",
        verbose: cli.verbose,
        stderr_only: false,
    }) {
        eprintln!("Warning: file logging unavailable: {:#}", err);
        let _ = init_logging(LogConfig {
            app_name: "filecat",
            verbose: cli.verbose,
            stderr_only: true,
        });
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else {
                eprintln!("{:#}", err);
            }
            ExitCode::from(1)
        }
    }
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = cli::CliContext::load(cli.config.as_deref(), cli.db.as_deref())?;
    match cli.command {
        Commands::Scan(args) => cli::scan::run(&ctx, args),
        Commands::Query(args) => cli::query::run(&ctx, args),
        Commands::Search(args) => cli::search::run(&ctx, args),
        Commands::View { action } => cli::view::run(&ctx, action),
        Commands::Rule { action } => cli::rule::run(&ctx, action),
        Commands::Stats(args) => cli::stats::run(&ctx, args),
    }
}

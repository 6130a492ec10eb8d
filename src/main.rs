use anyhow::Result;
use casefind::config::Config;
use casefind::index::build::{build_index, build_index_auto, open_store};
use casefind::index::compact::compact_index;
use casefind::index::stats::{list_indexes, show_stats};
use casefind::output;
use casefind::query::QueryEngine;
use casefind::server::IndexService;
use casefind::utils::{find_workspace_root, is_indexed, remove_index};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "casefind")]
#[command(about = "Incremental full-text search for markdown test cases")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Search query (when no subcommand is given)
    #[arg(trailing_var_arg = true)]
    query: Vec<String>,

    /// Path to search in
    #[arg(short, long, default_value = ".")]
    path: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or update the index
    Index {
        /// Path to index (auto-detects an indexed ancestor)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Discard the index and rebuild it
        #[arg(short, long)]
        force: bool,
    },
    /// Search the index
    Search {
        /// Query terms; every term must match
        #[arg(required = true)]
        query: Vec<String>,

        /// Path to search in
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Maximum number of results
        #[arg(short = 'n', long)]
        max_results: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Only print matching paths
        #[arg(short = 'l', long)]
        files_with_matches: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Search the index as it is, without checking the disk for changes
        #[arg(long)]
        no_refresh: bool,
    },
    /// Keep the index current while files change; read queries from stdin
    Watch {
        /// Path to watch
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Show index statistics
    Stats {
        /// Path to index
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Fold the journal into a checkpoint
    Compact {
        /// Path to index
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// List all indexed workspaces
    List,
    /// Remove an index
    Remove {
        /// Path to the workspace to remove the index for
        path: PathBuf,
    },
}

struct SearchArgs {
    query: String,
    path: PathBuf,
    max_results: Option<usize>,
    json: bool,
    files_only: bool,
    color: bool,
    refresh: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // One-shot commands print their own summaries; `watch` logs its activity
    let default_filter = match cli.command {
        Some(Commands::Watch { .. }) => "casefind=info",
        _ => "casefind=warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let config = Config::load();

    match cli.command {
        Some(Commands::Index { path, force }) => {
            build_index_auto(&path, &config, force)?;
        }
        Some(Commands::Search {
            query,
            path,
            max_results,
            json,
            files_with_matches,
            no_color,
            no_refresh,
        }) => {
            run_search(
                &config,
                SearchArgs {
                    query: query.join(" "),
                    path,
                    max_results,
                    json,
                    files_only: files_with_matches,
                    color: !no_color,
                    refresh: !no_refresh,
                },
            )?;
        }
        Some(Commands::Watch { path }) => {
            run_watch(&path, config)?;
        }
        Some(Commands::Stats { path }) => {
            show_stats(&path, &config)?;
        }
        Some(Commands::Compact { path }) => {
            compact_index(&path, &config)?;
        }
        Some(Commands::List) => {
            list_indexes(&config)?;
        }
        Some(Commands::Remove { path }) => {
            let root = find_workspace_root(&path, &config)?;
            if remove_index(&root, &config)? {
                println!("Removed index for: {}", root.display());
            } else {
                println!("No index for: {}", root.display());
            }
        }
        None => {
            if cli.query.is_empty() {
                use clap::CommandFactory;
                Cli::command().print_help()?;
            } else {
                run_search(
                    &config,
                    SearchArgs {
                        query: cli.query.join(" "),
                        path: cli.path,
                        max_results: None,
                        json: false,
                        files_only: false,
                        color: true,
                        refresh: true,
                    },
                )?;
            }
        }
    }

    Ok(())
}

fn run_search(config: &Config, args: SearchArgs) -> Result<()> {
    let root = find_workspace_root(&args.path, config)?;
    let first_time = !is_indexed(&root, config)?;
    let store = open_store(&root, config)?;

    if first_time || args.refresh || store.needs_rebuild() {
        // Progress only when building from scratch in a terminal
        let show_progress = first_time && io::stderr().is_terminal();
        let report = build_index(&store, config, false, show_progress)?;
        info!(%report, "index refreshed");
    }

    let engine = QueryEngine::new(Arc::new(store), &config.search);
    let hits = engine.search(
        &args.query,
        args.max_results.unwrap_or(config.search.default_max_results),
    );

    if args.json {
        output::print_json(&hits)?;
    } else if args.files_only {
        output::print_files_only(&hits, args.color)?;
    } else {
        output::print_hits(&hits, args.color)?;
    }

    Ok(())
}

fn run_watch(path: &Path, mut config: Config) -> Result<()> {
    config.watcher.enabled = true;
    let root = find_workspace_root(path, &config)?;
    let service = IndexService::start(&root, &config)?;

    eprintln!("Watching {} (type a query and press Enter, Ctrl-D to stop)", root.display());
    service.wait_idle(Duration::from_secs(600));
    let status = service.status();
    eprintln!("{} documents indexed", status.documents);

    let stdin = io::stdin();
    let color = io::stdout().is_terminal();
    for line in stdin.lock().lines() {
        let line = line?;
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        let hits = service.search(query, None);
        output::print_hits(&hits, color)?;
        if hits.is_empty() {
            println!("(no results)");
        }
        io::stdout().flush()?;
    }

    service.shutdown();
    Ok(())
}

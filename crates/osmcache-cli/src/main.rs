//! osmcache CLI
//!
//! Command-line interface for the local OSM element mirror.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use osmcache_core::{Config, ElementKind, Mirror};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "osmcache")]
#[command(about = "osmcache - Local mirror of OpenStreetMap elements")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log more (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only use local data, never contact the remote service
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import an OSM XML file
    Import {
        /// Path to the .osm file
        file: std::path::PathBuf,
    },
    /// Show one element
    Show {
        /// node, way or relation
        kind: ElementKind,
        /// OSM id
        id: i64,
        /// Also list way nodes or relation members
        #[arg(short, long)]
        members: bool,
    },
    /// Find elements by area, tags or editor
    Find {
        /// node, way or relation
        kind: ElementKind,
        /// Bounding box as south,west,north,east (nodes only)
        #[arg(long, allow_hyphen_values = true)]
        bbox: Option<String>,
        /// Tag filter as key=value
        #[arg(short, long)]
        tag: Vec<String>,
        /// Last editor
        #[arg(short, long)]
        user: Option<String>,
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Mark an element stale so the next read refreshes it
    Expire {
        /// node, way or relation
        kind: ElementKind,
        /// OSM id
        id: i64,
    },
    /// Show mirror status
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, table_prefix, max_age_secs, online,
        /// overpass_url, recursive_refresh, fetch_timeout_secs)
        key: String,
        /// Configuration value
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Commands that don't need the mirror
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), &output);
    }

    let mut mirror = open_mirror(cli.offline)?;

    match cli.command {
        Commands::Import { file } => commands::import::import(&mut mirror, &file, &output),
        Commands::Show { kind, id, members } => {
            commands::element::show(&mut mirror, kind, id, members, &output)
        }
        Commands::Find {
            kind,
            bbox,
            tag,
            user,
            limit,
        } => {
            let filter = commands::element::FindFilter {
                bbox,
                tags: tag,
                user,
                limit,
            };
            commands::element::find(&mut mirror, kind, filter, &output)
        }
        Commands::Expire { kind, id } => commands::element::expire(&mut mirror, kind, id, &output),
        Commands::Status => commands::status::show(&mirror, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn open_mirror(offline: bool) -> Result<Mirror> {
    let mut config = Config::load()?;
    if offline {
        config.online = false;
    }
    debug!("Opening mirror at {}", config.sqlite_path().display());
    Ok(Mirror::open_with_config(config)?)
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}

/// Log to stderr so stdout stays clean for --json
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("osmcache_core={},osmcache_cli={}", level, level))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

//! # rfl CLI
//!
//! Maintenance and fetch commands for the shared rfl file cache.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rfl_config::logging::{init_logging, LogLevel};
use rfl_config::{log_cli_debug, Config};
use rfl_store::LocalCache;

/// `println!` that stops quietly once stdout is closed, e.g. by `| head`.
macro_rules! out {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        if let Err(e) = writeln!(std::io::stdout(), $($arg)*) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                std::process::exit(0);
            }
            return Err(e.into());
        }
    }};
}

mod gc;
mod prefetch;

/// rfl - shared file cache for shallow repositories
#[derive(Parser)]
#[command(name = "rfl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Shared cache root (overrides cache.path)
    #[arg(long = "cache-root", global = true)]
    cache_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove unused entries and trim the cache to its size limit
    Gc(gc::GcArgs),

    /// Check every cache entry, quarantining corrupt ones
    Validate,

    /// Fetch file revisions listed on stdin as `<hex id> <path>` lines
    Prefetch(prefetch::PrefetchArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file locations
    Path,
}

fn main() -> Result<()> {
    init_logging(LogLevel::Warn);

    let cli = Cli::parse();
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(root) = cli.cache_root {
        config.cache.path = root;
    }
    let root = config.cache.root();
    log_cli_debug!(
        "cache root resolved",
        root = tracing::field::display(root.display())
    );

    match cli.command {
        Commands::Gc(args) => gc::run(&config, args),
        Commands::Validate => cmd_validate(&config),
        Commands::Prefetch(args) => prefetch::run(&config, args),
        Commands::Config { command } => cmd_config(&config, command),
    }
}

fn cmd_validate(config: &Config) -> Result<()> {
    let root = config.cache.root();
    let cache = LocalCache::new(&root)
        .with_context(|| format!("Failed to open cache at {}", root.display()))?
        .with_validation(config.cache.validate_log.clone());

    let stats = cache.validate_all()?;
    out!(
        "checked {} entries in {}, quarantined {}",
        stats.checked,
        root.display(),
        stats.quarantined
    );
    Ok(())
}

fn cmd_config(config: &Config, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => out!("{}", config.to_toml().trim_end()),
        ConfigCommands::Path => {
            match Config::global_config_path() {
                Some(path) => out!("global:  {}", path.display()),
                None => out!("global:  (no home directory)"),
            }
            out!("project: {}", Config::project_config_path().display());
        }
    }
    Ok(())
}

//! # Local cache garbage collection

use anyhow::{Context, Result};
use clap::Args;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use rfl_config::{log_cli_info, parse_byte_size, Config};
use rfl_store::LocalCache;

#[derive(Args, Debug)]
pub struct GcArgs {
    /// Size to trim the cache to, e.g. "50 GB" (default: cache.limit)
    #[arg(long)]
    limit: Option<String>,

    /// File listing cache keys that must survive, one per line
    #[arg(long)]
    keep: Option<PathBuf>,
}

pub fn run(config: &Config, args: GcArgs) -> Result<()> {
    let root = config.cache.root();
    let limit = match &args.limit {
        Some(limit) => parse_byte_size(limit)?,
        None => config
            .cache
            .limit_bytes()
            .context("Invalid cache.limit in configuration")?,
    };
    let keep = match &args.keep {
        Some(path) => read_keep_set(
            &fs::read_to_string(path)
                .with_context(|| format!("Failed to read keep list {}", path.display()))?,
        ),
        None => HashSet::new(),
    };

    let cache = LocalCache::new(&root)
        .with_context(|| format!("Failed to open cache at {}", root.display()))?;

    out!();
    out!("  rfl cache gc");
    out!("  ============");
    out!("  Cache:  {}", root.display());
    out!("  Limit:  {}", format_bytes(limit));
    out!("  Keep:   {} keys", format_number(keep.len() as u64));
    let repos = cache.repos()?;
    if !repos.is_empty() {
        out!("  Used by {} repositories", repos.len());
    }

    let stats = cache.gc(&keep, limit)?;
    log_cli_info!("gc complete", removed = stats.removed, scanned = stats.scanned);

    out!();
    out!("  {}", stats.summary());
    out!(
        "  Reclaimed: {}",
        format_bytes(stats.original_bytes.saturating_sub(stats.retained_bytes))
    );
    out!();
    Ok(())
}

fn read_keep_set(contents: &str) -> HashSet<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Format bytes in human-readable form
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format number with comma separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

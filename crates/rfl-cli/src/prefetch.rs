//! `rfl prefetch`: fill the cache for a repository from a list of revisions.

use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use rfl_config::{log_cli_info, Config};
use rfl_fetch::{stats, FetchCoordinator, Progress};
use rfl_store::{FileId, NodeId};

#[derive(Args, Debug)]
pub struct PrefetchArgs {
    /// Repository the revisions belong to
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Fetch even if a revision is already present locally
    #[arg(long)]
    force: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    quiet: bool,
}

pub fn run(config: &Config, args: PrefetchArgs) -> Result<()> {
    let repo = fs::canonicalize(&args.repo)
        .with_context(|| format!("Repository not found: {}", args.repo.display()))?;
    let ids = parse_requests(io::stdin().lock())?;
    if ids.is_empty() {
        return Ok(());
    }

    stats::reset();
    let mut coordinator = FetchCoordinator::from_config(config, &repo)?;
    if !args.quiet {
        coordinator = coordinator.with_progress(Box::new(BarProgress::default()));
    }

    let result = coordinator.prefetch(&ids, args.force);
    coordinator.close();
    result?;

    let summary = stats::snapshot();
    log_cli_info!("prefetch complete", files = summary.files, fetches = summary.fetches);
    if !summary.is_empty() {
        out!("{}", summary);
    }
    Ok(())
}

/// Parse `<40 hex id> <path>` lines; blank lines are skipped.
fn parse_requests(input: impl BufRead) -> Result<Vec<FileId>> {
    let mut ids = Vec::new();
    for (number, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let Some((hex, path)) = line.split_once(' ') else {
            bail!("line {}: expected `<id> <path>`", number + 1);
        };
        let Some(node) = NodeId::from_hex(hex) else {
            bail!("line {}: invalid id {:?}", number + 1, hex);
        };
        if path.is_empty() {
            bail!("line {}: missing path", number + 1);
        }
        ids.push(FileId::new(path, node));
    }
    Ok(ids)
}

/// Progress bar created on the first update.
#[derive(Default)]
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl Progress for BarProgress {
    fn update(&mut self, done: usize, total: usize) {
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template("  downloading [{bar:40}] {pos}/{len} files")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            bar
        });
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    }

    fn complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

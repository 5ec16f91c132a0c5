//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use affilscan_archive::open_archive;
use affilscan_core::{BatchScheduler, ProgressReporter, RunSummary};
use affilscan_latex::{CommandSet, extract_institutions, select_text_sources};
use affilscan_shared::{
    AffilscanError, AppConfig, ArchiveContents, ExtractionResult, FetchConfig, init_config,
    load_config, load_config_from,
};
use affilscan_storage::Storage;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::feed::{read_feed, write_results};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// affilscan: extract raw affiliation blocks from arXiv LaTeX sources.
#[derive(Parser)]
#[command(
    name = "affilscan",
    version,
    about = "Download arXiv source archives and extract raw affiliation blocks.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.affilscan/affilscan.toml.
    #[arg(long, global = true, env = "AFFILSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch every record of a feed and write the extracted blocks.
    Run {
        /// Feed JSONL, one `{"link": ..}` object per line.
        #[arg(long)]
        feed: PathBuf,

        /// Output JSONL, one `{"id": .., "institutions": [..]}` object per line.
        #[arg(long)]
        out: PathBuf,
    },

    /// Extract blocks from a local archive without touching the network.
    Scan {
        /// Archive path, or a record identifier with `--archived`.
        target: Option<String>,

        /// Rescan sources kept from earlier runs. Without a target, every
        /// archived record is rescanned and printed as JSONL.
        #[arg(long)]
        archived: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so command
/// output on stdout stays machine-readable.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "affilscan=info",
        1 => "affilscan=debug",
        _ => "affilscan=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run { feed, out } => cmd_run(config_path.as_deref(), &feed, &out).await,
        Command::Scan { target, archived } => {
            cmd_scan(config_path.as_deref(), target.as_deref(), archived).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, feed: &Path, out: &Path) -> Result<()> {
    let config = resolve_config(config_path)?;
    let records = read_feed(feed)?;

    info!(
        feed = %feed.display(),
        records = records.len(),
        "starting affiliation extraction"
    );

    let storage = Arc::new(Storage::open(&config.paths).await?);
    let scheduler = BatchScheduler::new(FetchConfig::from(&config), Arc::clone(&storage));
    let reporter = Arc::new(CliProgress::new());

    match scheduler.run(records, reporter).await {
        Ok(report) => {
            write_results(out, &report.results)?;
            print_summary(&report.summary, out, storage.error_log());
            Ok(())
        }
        Err(halted) => {
            write_results(out, &halted.results)?;
            print_summary(&halted.summary, out, storage.error_log());
            warn!(written = halted.results.len(), "partial results written");
            Err(halted.into())
        }
    }
}

fn print_summary(summary: &RunSummary, out: &Path, error_log: &Path) {
    println!();
    if summary.halted {
        println!("  Run halted before every batch ran.");
    } else {
        println!("  Extraction complete.");
    }
    println!("  Records:   {}/{}", summary.processed, summary.total);
    println!("  Extracted: {}", summary.succeeded);
    println!("  Failed:    {}", summary.failed);
    if summary.skipped > 0 {
        println!("  Skipped:   {}", summary.skipped);
    }
    println!("  Batches:   {}", summary.batches);
    println!("  Output:    {}", out.display());
    if summary.failed > 0 {
        println!("  Log:       {}", error_log.display());
    }
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

async fn cmd_scan(config_path: Option<&Path>, target: Option<&str>, archived: bool) -> Result<()> {
    if !archived {
        let path = target.ok_or_else(|| eyre!("scan needs an archive path (or --archived)"))?;
        let contents = open_archive(Path::new(path))?;
        for block in scan_contents(contents)? {
            println!("{block}");
        }
        return Ok(());
    }

    let config = resolve_config(config_path)?;
    let storage = Storage::open(&config.paths).await?;

    let ids = match target {
        Some(id) => vec![id.to_string()],
        None => storage.archived_ids().await?,
    };
    info!(records = ids.len(), root = %storage.source_root().display(), "rescanning archived sources");

    for id in ids {
        let contents = storage.load_archived(&id).await?;
        let result = match scan_contents(contents) {
            Ok(blocks) => ExtractionResult::done(&id, blocks),
            Err(e) => {
                warn!(%id, kind = %e.kind(), "nothing extracted");
                ExtractionResult::failed(&id, e.kind())
            }
        };
        println!("{}", serde_json::to_string(&result)?);
    }
    Ok(())
}

fn scan_contents(contents: ArchiveContents) -> std::result::Result<Vec<String>, AffilscanError> {
    let sources = select_text_sources(contents)?;
    extract_institutions(&sources, CommandSet::default_set())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn batch_started(&self, index: usize, total_batches: usize, size: usize) {
        self.spinner
            .set_message(format!("Batch {index}/{total_batches} ({size} records)"));
    }

    fn record_finished(&self, result: &ExtractionResult, completed: usize, total: usize) {
        let mark = if result.is_success() { "ok" } else { "--" };
        self.spinner.set_message(format!(
            "[{completed}/{total}] {mark} {} ({} blocks)",
            result.id,
            result.institutions.len()
        ));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

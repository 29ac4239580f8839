//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{info, warn};

use reviewcrawl_core::{CrawlRun, ForumOutcome, ProgressReporter, RunSummary, crawl_venue};
use reviewcrawl_shared::{
    AppConfig, CrawlConfig, ForumHandle, Venue, expand_home, init_config, load_config,
};
use reviewcrawl_storage::Storage;

use crate::sink::JsonlSink;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// reviewcrawl: incremental crawler for OpenReview peer reviews.
#[derive(Parser)]
#[command(
    name = "reviewcrawl",
    version,
    about = "Crawl papers, reviews and decisions of an OpenReview venue into JSONL records.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Identifies a venue on the command line.
#[derive(Args, Debug, Clone)]
pub(crate) struct VenueArgs {
    /// Venue short name (ICLR, NeurIPS, ...).
    #[arg(long)]
    pub venue: String,

    /// Conference year.
    #[arg(long)]
    pub year: u16,

    /// Track segment of the venue group id.
    #[arg(long, default_value = "Conference")]
    pub track: String,

    /// Full venue group id, for venues with a non-standard layout.
    #[arg(long)]
    pub group: Option<String>,
}

impl VenueArgs {
    fn to_venue(&self) -> Venue {
        let venue = Venue::new(&self.venue, self.year).with_track(&self.track);
        match &self.group {
            Some(group) => venue.with_group(group),
            None => venue,
        }
    }
}

/// Options of a crawl run.
#[derive(Args, Debug)]
pub(crate) struct CrawlArgs {
    #[command(flatten)]
    pub venue: VenueArgs,

    /// Only emit forums with an accepting decision.
    #[arg(long)]
    pub accepted_only: bool,

    /// Stop after this many forums have been written.
    #[arg(long)]
    pub max_papers: Option<usize>,

    /// Reprocess every forum even if its notes are unchanged.
    #[arg(long)]
    pub force_refresh: bool,

    /// Forums processed in parallel (overrides config).
    #[arg(long)]
    pub concurrency: Option<u32>,

    /// Requests per second budget (overrides config).
    #[arg(long)]
    pub rps: Option<f64>,

    /// Output directory for the JSONL files (overrides config).
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Fingerprint cache database (overrides config).
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Download and verify submission PDFs into this directory.
    #[arg(long)]
    pub pdfs: Option<PathBuf>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl a venue and write its records.
    Crawl(CrawlArgs),

    /// Inspect or reset the fingerprint cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// List stored fingerprints for a venue.
    Show {
        #[command(flatten)]
        venue: VenueArgs,

        /// Fingerprint cache database (overrides config).
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Forget every fingerprint of a venue, forcing a full crawl next time.
    Clear {
        #[command(flatten)]
        venue: VenueArgs,

        /// Fingerprint cache database (overrides config).
        #[arg(long)]
        cache: Option<PathBuf>,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "reviewcrawl=info",
        1 => "reviewcrawl=debug",
        _ => "reviewcrawl=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
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
    match cli.command {
        Command::Crawl(args) => cmd_crawl(args).await,
        Command::Cache { action } => match action {
            CacheAction::Show { venue, cache } => cmd_cache_show(&venue, cache).await,
            CacheAction::Clear { venue, cache } => cmd_cache_clear(&venue, cache).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Merge CLI overrides into the configured crawl settings.
fn crawl_config(app: &AppConfig, args: &CrawlArgs) -> CrawlConfig {
    let mut config = CrawlConfig::from(app);
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(rps) = args.rps {
        config.requests_per_second = rps;
    }
    if let Some(dir) = &args.pdfs {
        config.attachments_dir = Some(dir.clone());
    }
    config
}

async fn open_cache(app: &AppConfig, cache: Option<PathBuf>) -> Result<Arc<Storage>> {
    let path = cache.unwrap_or_else(|| expand_home(&app.defaults.cache_path));
    let storage = Storage::open(&path)
        .await
        .wrap_err_with(|| format!("opening fingerprint cache {}", path.display()))?;
    Ok(Arc::new(storage))
}

async fn cmd_crawl(args: CrawlArgs) -> Result<()> {
    let app = load_config()?;
    let config = crawl_config(&app, &args);
    let storage = open_cache(&app, args.cache.clone()).await?;
    let out = args
        .out
        .clone()
        .unwrap_or_else(|| expand_home(&app.defaults.output_dir));

    let venue = args.venue.to_venue();
    let run = CrawlRun::new(venue.clone())
        .accepted_only(args.accepted_only)
        .max_papers(args.max_papers)
        .force_refresh(args.force_refresh);

    info!(
        run_id = %run.id,
        venue = %venue,
        out = %out.display(),
        authenticated = config.credentials.is_some(),
        "starting crawl"
    );

    let token = run.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight forums");
            token.cancel();
        }
    });

    let sink = JsonlSink::create(&out, &venue).await?;
    let records_path = sink.records_path().to_path_buf();
    let rejects_path = sink.rejects_path().to_path_buf();
    let (tx, rx) = mpsc::channel(256);
    let writer = tokio::spawn(sink.drain(rx));

    let reporter = CliProgress::new();
    let result = crawl_venue(&config, &run, storage, tx, &reporter).await;
    if result.is_err() {
        reporter.spinner.finish_and_clear();
    }
    let written = writer.await.wrap_err("record writer stopped")??;
    let summary = result?;

    print_summary(&summary);
    println!("  Records:   {} ({})", written.records, records_path.display());
    println!("  Rejects:   {} ({})", written.rejects, rejects_path.display());
    println!();

    if !summary.failed_forums.is_empty() {
        println!("  Failed forums:");
        for (forum, reason) in &summary.failed_forums {
            println!("    {forum}: {reason}");
        }
        println!();
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    if summary.cancelled {
        println!("  Crawl stopped early.");
    } else {
        println!("  Crawl complete!");
    }
    println!("  Run:       {}", summary.run_id);
    println!("  Venue:     {}", summary.venue_id);
    println!("  Protocol:  {}", summary.protocol);
    println!("  Forums:    {}", summary.forums);
    println!("  Fetched:   {}", summary.fetched);
    println!("  Skipped:   {}", summary.skipped);
    println!("  Filtered:  {}", summary.filtered);
    println!("  Failed:    {}", summary.failed);
    println!("  Rejected:  {}", summary.rejected);
    println!("  Retries:   {}", summary.retries);
    if summary.attachments_rejected > 0 {
        println!("  Bad PDFs:  {}", summary.attachments_rejected);
    }
    println!(
        "  Time:      {:.1}s",
        summary.elapsed_ms as f64 / 1000.0
    );
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
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn forums_listed(&self, total: usize) {
        self.spinner.set_message(format!("Found {total} forums"));
    }

    fn forum_done(&self, forum: &ForumHandle, outcome: &ForumOutcome, completed: usize, total: usize) {
        let status = match outcome {
            ForumOutcome::Emitted { records, .. } => format!("{records} records"),
            ForumOutcome::Skipped => "unchanged".into(),
            ForumOutcome::Filtered => "filtered".into(),
            ForumOutcome::Failed(_) => "failed".into(),
            ForumOutcome::Dropped => "dropped".into(),
        };
        self.spinner
            .set_message(format!("Crawling [{completed}/{total}] {forum} ({status})"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Cache and config commands
// ---------------------------------------------------------------------------

async fn cmd_cache_show(venue: &VenueArgs, cache: Option<PathBuf>) -> Result<()> {
    let app = load_config()?;
    let storage = open_cache(&app, cache).await?;
    let venue = venue.to_venue();

    let entries = storage.list_fingerprints(&venue.id()).await?;
    if entries.is_empty() {
        println!("No fingerprints stored for {venue}.");
        return Ok(());
    }

    println!("{:<16} {:>6}  {:<25} {}", "FORUM", "NOTES", "LAST SEEN", "HASH");
    for entry in &entries {
        println!(
            "{:<16} {:>6}  {:<25} {}",
            entry.forum,
            entry.note_count,
            entry.last_seen.format("%Y-%m-%d %H:%M:%S UTC"),
            &entry.content_hash[..entry.content_hash.len().min(12)],
        );
    }
    println!();
    println!("{} forums cached for {venue}", entries.len());
    Ok(())
}

async fn cmd_cache_clear(venue: &VenueArgs, cache: Option<PathBuf>) -> Result<()> {
    let app = load_config()?;
    let storage = open_cache(&app, cache).await?;
    let venue = venue.to_venue();

    let removed = storage.delete_fingerprints(&venue.id()).await?;
    info!(venue = %venue, removed, "cleared fingerprints");
    println!("Removed {removed} fingerprints for {venue}.");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn crawl_flags_parse() {
        let cli = Cli::try_parse_from([
            "reviewcrawl",
            "crawl",
            "--venue",
            "ICLR",
            "--year",
            "2024",
            "--accepted-only",
            "--max-papers",
            "10",
            "--rps",
            "2.5",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        assert!(args.accepted_only);
        assert!(!args.force_refresh);
        assert_eq!(args.max_papers, Some(10));
        assert_eq!(args.venue.to_venue().id(), "ICLR.cc/2024/Conference");

        let config = crawl_config(&AppConfig::default(), &args);
        assert_eq!(config.requests_per_second, 2.5);
        assert_eq!(config.concurrency, AppConfig::default().defaults.concurrency);
    }

    #[test]
    fn group_overrides_venue_id() {
        let cli = Cli::try_parse_from([
            "reviewcrawl",
            "cache",
            "show",
            "--venue",
            "NeurIPS",
            "--year",
            "2023",
            "--group",
            "NeurIPS.cc/2023/Track/Datasets_and_Benchmarks",
        ])
        .unwrap();
        let Command::Cache {
            action: CacheAction::Show { venue, .. },
        } = cli.command
        else {
            panic!("expected cache show");
        };
        assert_eq!(venue.to_venue().id(), "NeurIPS.cc/2023/Track/Datasets_and_Benchmarks");
    }

    #[test]
    fn pdfs_flag_enables_downloads() {
        let cli = Cli::try_parse_from([
            "reviewcrawl", "crawl", "--venue", "ICLR", "--year", "2024", "--pdfs", "/tmp/pdfs",
        ])
        .unwrap();
        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        let config = crawl_config(&AppConfig::default(), &args);
        assert_eq!(config.attachments_dir, Some(PathBuf::from("/tmp/pdfs")));
    }

    #[test]
    fn year_is_required() {
        assert!(Cli::try_parse_from(["reviewcrawl", "crawl", "--venue", "ICLR"]).is_err());
    }
}

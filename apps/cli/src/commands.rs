//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use hearings_core::manifest::{MANIFEST_FILE, ManifestTotals, export_manifest, load_manifest};
use hearings_core::topics::{BridgeModeller, run_topics};
use hearings_core::{HarvestReport, ProgressReporter, SessionStep};
use hearings_shared::{
    AppConfig, HarvestConfig, SessionId, TopicsConfig, config_file_path, init_config, init_config_at,
    load_config, load_config_from,
};
use hearings_storage::CorpusStore;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tracing::{info, warn};

/// Exit status of a run stopped by Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

/// Runs shown by `hearings status`.
const STATUS_RUNS: usize = 5;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// hearings: harvest committee oral-evidence transcripts into a local corpus.
#[derive(Parser)]
#[command(
    name = "hearings",
    version,
    about = "Harvest committee oral-evidence transcripts into a resumable local corpus.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.hearings/hearings.toml.
    #[arg(long, global = true, env = "HEARINGS_CONFIG")]
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
    /// Walk the catalog and fetch every transcript not yet in the corpus.
    Harvest {
        /// Corpus root (defaults to `harvest.output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Committee to harvest (defaults to `api.committee_id`).
        #[arg(short, long)]
        committee: Option<i64>,

        /// API base URL (defaults to `api.base_url`).
        #[arg(long)]
        base_url: Option<String>,

        /// Documents fetched in parallel.
        #[arg(long)]
        concurrency: Option<u32>,

        /// Re-attempt sessions previously recorded as having no document.
        #[arg(long)]
        retry_missing: bool,

        /// Stop after this many sessions have been attempted.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show ledger totals and recent runs.
    Status {
        /// Corpus root (defaults to `harvest.output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Check every fetched session against its transcript file.
    Verify {
        /// Corpus root (defaults to `harvest.output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Write manifest.json from the ledger.
    Export {
        /// Corpus root (defaults to `harvest.output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Fit the topic model over the corpus and write the topic tables.
    Topics {
        /// Corpus root (defaults to `harvest.output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Skip transcripts shorter than this many characters.
        #[arg(long)]
        min_chars: Option<usize>,

        /// Topics kept by name in the prevalence table.
        #[arg(long)]
        top_n: Option<usize>,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "hearings=info",
        1 => "hearings=debug",
        _ => "hearings=trace",
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
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Harvest {
            out,
            committee,
            base_url,
            concurrency,
            retry_missing,
            limit,
        } => {
            let config = load(config_path)?;
            let mut harvest = HarvestConfig::from(&config);
            if let Some(out) = out {
                harvest.output_dir = out;
            }
            if let Some(committee) = committee {
                harvest.committee_id = committee;
            }
            if let Some(base_url) = base_url {
                harvest.base_url = base_url.trim_end_matches('/').to_string();
            }
            if let Some(concurrency) = concurrency {
                harvest.concurrency = concurrency;
            }
            harvest.retry_no_document = retry_missing;
            harvest.limit = limit;
            cmd_harvest(harvest).await
        }
        Command::Status { out } => cmd_status(&corpus_root(config_path, out)?).await,
        Command::Verify { out } => cmd_verify(&corpus_root(config_path, out)?).await,
        Command::Export { out } => cmd_export(&corpus_root(config_path, out)?).await,
        Command::Topics {
            out,
            min_chars,
            top_n,
        } => {
            let config = load(config_path)?;
            let root = out.unwrap_or_else(|| PathBuf::from(&config.harvest.output_dir));
            let mut topics = config.topics;
            if let Some(min_chars) = min_chars {
                topics.min_chars = min_chars;
            }
            if let Some(top_n) = top_n {
                topics.top_n = top_n;
            }
            cmd_topics(&root, topics).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

fn corpus_root(config_path: Option<&Path>, out: Option<PathBuf>) -> Result<PathBuf> {
    match out {
        Some(out) => Ok(out),
        None => Ok(PathBuf::from(load(config_path)?.harvest.output_dir)),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_harvest(config: HarvestConfig) -> Result<()> {
    config.validate()?;
    info!(
        committee = config.committee_id,
        out = %config.output_dir.display(),
        concurrency = config.concurrency,
        "harvesting oral evidence"
    );

    let store = CorpusStore::open(&config.output_dir).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current session");
            let _ = shutdown_tx.send(true);
        }
    });

    let reporter = CliProgress::new();
    let result = hearings_core::harvest(&config, &store, &reporter, shutdown_rx).await;
    listener.abort();
    reporter.spinner.finish_and_clear();
    let report = result?;

    println!();
    if report.interrupted {
        println!("  Harvest interrupted; progress so far is saved.");
    } else {
        println!("  Harvest complete.");
    }
    println!("  Run:         {}", report.run_id);
    println!("  Fetched:     {}", report.fetched);
    println!("  Skipped:     {}", report.skipped);
    println!("  No document: {}", report.no_document);
    println!("  Failed:      {}", report.failed);
    println!("  Pages:       {}", report.pages);
    if let Some((page, reason)) = &report.truncated {
        println!("  Truncated:   catalog page {page} failed ({reason})");
    }
    if report.limit_reached {
        println!("  Limit reached; rerun to continue.");
    }
    println!("  Corpus:      {}", config.output_dir.display());
    println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());
    println!();

    if report.interrupted {
        std::process::exit(EXIT_INTERRUPTED);
    }
    Ok(())
}

async fn cmd_status(root: &Path) -> Result<()> {
    let store = CorpusStore::open_readonly(root).await?;
    let counts = store.counts().await?;
    let runs = store.recent_runs(STATUS_RUNS).await?;

    println!();
    println!("  Corpus:      {}", root.display());
    println!("  Sessions:    {}", counts.total());
    println!("  Fetched:     {}", counts.fetched);
    println!("  No document: {}", counts.no_document);
    println!("  Failed:      {}", counts.failed);
    println!("  Characters:  {}", counts.total_chars);

    if root.join(MANIFEST_FILE).is_file() {
        match load_manifest(root) {
            Ok(manifest) => {
                let stale = manifest.totals != ManifestTotals::from(counts);
                println!(
                    "  Manifest:    {} sessions, exported {}{}",
                    manifest.totals.sessions,
                    manifest.generated_at.format("%Y-%m-%d %H:%M:%S"),
                    if stale { " (stale, rerun `hearings export`)" } else { "" }
                );
            }
            Err(e) => println!("  Manifest:    unreadable ({e})"),
        }
    }

    if !runs.is_empty() {
        println!();
        println!("  Recent runs:");
        for run in &runs {
            let started = run.started_at.format("%Y-%m-%d %H:%M:%S");
            match &run.stats {
                Some(stats) => {
                    let mut line = format!(
                        "    {started}  fetched {}  skipped {}  no document {}  failed {}",
                        stats.fetched, stats.skipped, stats.no_document, stats.failed
                    );
                    if stats.interrupted {
                        line.push_str("  (interrupted)");
                    }
                    if stats.truncated.is_some() {
                        line.push_str("  (truncated)");
                    }
                    println!("{line}");
                }
                None => println!("    {started}  did not finish"),
            }
        }
    }
    println!();

    Ok(())
}

async fn cmd_verify(root: &Path) -> Result<()> {
    let store = CorpusStore::open_readonly(root).await?;
    let report = store.verify().await?;

    println!();
    println!("  Checked: {} fetched sessions", report.checked);
    print_ids("Missing", &report.missing);
    print_ids("Empty", &report.empty);
    print_ids("Corrupt", &report.corrupt);
    for orphan in &report.orphans {
        println!("  Orphan:  {}", orphan.display());
    }
    println!();

    if report.is_clean() {
        println!("  Corpus is consistent.");
        return Ok(());
    }
    Err(eyre!(
        "corpus at '{}' failed verification; rerun `hearings harvest` to repair missing transcripts",
        root.display()
    ))
}

fn print_ids(label: &str, ids: &[SessionId]) {
    if ids.is_empty() {
        return;
    }
    let joined: Vec<String> = ids.iter().map(ToString::to_string).collect();
    println!("  {label}: {}", joined.join(", "));
}

async fn cmd_export(root: &Path) -> Result<()> {
    let store = CorpusStore::open_readonly(root).await?;
    let corpus = store.snapshot().await?;
    let path = export_manifest(&corpus)?;
    println!("Manifest written to: {}", path.display());
    Ok(())
}

async fn cmd_topics(root: &Path, topics: TopicsConfig) -> Result<()> {
    let store = CorpusStore::open_readonly(root).await?;
    let corpus = store.snapshot().await?;

    let spinner = spinner();
    spinner.set_message("Fitting topic model");

    let report = tokio::task::spawn_blocking(move || {
        let mut modeller = BridgeModeller::from_config(&topics);
        run_topics(&corpus, &topics, &mut modeller)
    })
    .await
    .map_err(|e| eyre!("topic task panicked: {e}"))?;
    spinner.finish_and_clear();
    let report = report?;

    println!();
    println!("  Documents: {}", report.documents);
    println!("  Topics:    {}", report.topics);
    println!("  Outliers:  {}", report.outliers);
    println!("  Output:    {}", report.output_dir.display());
    println!();

    Ok(())
}

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => init_config_at(path)?,
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let source = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    let config = load(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("# {}", source.display());
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    spinner.set_style(style);
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self { spinner: spinner() }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_listed(&self, page: u32, sessions: usize) {
        self.spinner
            .set_message(format!("Catalog page {page}: {sessions} sessions"));
    }

    fn session_finished(&self, id: SessionId, step: SessionStep, processed: usize) {
        let verb = match step {
            SessionStep::Skipped => "skipped",
            SessionStep::Fetched => "fetched",
            SessionStep::NoDocument => "no document",
            SessionStep::Failed => "failed",
        };
        self.spinner
            .set_message(format!("[{processed}] session {id} {verb}"));
    }

    fn done(&self, _report: &HarvestReport) {
        self.spinner.finish_and_clear();
    }
}

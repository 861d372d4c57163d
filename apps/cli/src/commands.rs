//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use tagcrawl_core::tidy::{self, DEFAULT_STRIP_EXTENSIONS, RenameStatus};
use tagcrawl_core::{ProgressReporter, RunSummary, UnitOutcome, retrying_fetcher};
use tagcrawl_crawler::HttpFetcher;
use tagcrawl_shared::{
    AppConfig, ArticleRef, CrawlConfig, LedgerBackend, Tag, init_config, init_config_at,
    load_config, load_config_from,
};
use tagcrawl_storage::CompletionLedger;

/// Conventional exit status after SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// tagcrawl: mirror a tagged article catalog as Markdown.
#[derive(Parser)]
#[command(
    name = "tagcrawl",
    version,
    about = "Crawl a tagged article catalog into a resumable Markdown tree.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.tagcrawl/tagcrawl.toml).
    #[arg(long, global = true, env = "TAGCRAWL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output root directory (overrides `crawl.root`).
    #[arg(long, global = true)]
    pub root: Option<String>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
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

/// Ledger backend as accepted on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum LedgerArg {
    Files,
    Sqlite,
}

impl From<LedgerArg> for LedgerBackend {
    fn from(arg: LedgerArg) -> Self {
        match arg {
            LedgerArg::Files => LedgerBackend::Files,
            LedgerArg::Sqlite => LedgerBackend::Sqlite,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl every (or every allow-listed) tag into the output root.
    Crawl(CrawlArgs),

    /// Forget the completion markers of one tag so it is crawled again.
    Reset {
        /// Tag name, as shown on the tag index page.
        #[arg(long)]
        tag: String,

        /// Ledger backend to clear (overrides `ledger.backend`).
        #[arg(long)]
        ledger: Option<LedgerArg>,
    },

    /// Post-process an existing article tree.
    Tidy {
        #[command(subcommand)]
        action: TidyAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags of `tagcrawl crawl`; each one overrides the config file.
#[derive(clap::Args, Default)]
pub(crate) struct CrawlArgs {
    /// Tag index page of the catalog.
    #[arg(long)]
    pub base_tag_url: Option<String>,

    /// Minimum delay between requests, in seconds.
    #[arg(long)]
    pub delay_min: Option<f64>,

    /// Maximum delay between requests, in seconds.
    #[arg(long)]
    pub delay_max: Option<f64>,

    /// Concurrent article workers (capped at 8).
    #[arg(long)]
    pub threads: Option<usize>,

    /// Extra attempts after a failed fetch.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Only crawl these tags (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub only_tags: Vec<String>,

    /// Fetch every article again, ignoring completion markers.
    #[arg(long)]
    pub no_resume: bool,

    /// Completion ledger backend.
    #[arg(long)]
    pub ledger: Option<LedgerArg>,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Post-processing subcommands.
#[derive(Subcommand)]
pub(crate) enum TidyAction {
    /// Delete every Markdown line containing one of the patterns.
    CleanLines {
        /// Substring to drop (repeatable; defaults to `tidy.drop_line_patterns`).
        #[arg(long = "pattern")]
        patterns: Vec<String>,
    },

    /// Download remote images next to each article and relink them.
    LocalizeImages {
        /// Image directory beside each Markdown file (overrides `tidy.images_dir`).
        #[arg(long)]
        images_dir: Option<String>,
    },

    /// Remove the ` [p<ID>]` suffix from file names.
    StripIds {
        /// Actually rename; without this only the plan is printed.
        #[arg(long)]
        execute: bool,

        /// File extensions to consider (repeatable).
        #[arg(long = "ext")]
        extensions: Vec<String>,
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
        0 => "warn,tagcrawl=info",
        1 => "warn,tagcrawl=debug",
        _ => "info,tagcrawl=trace",
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
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    let root = cli.root.as_deref();

    match cli.command {
        Command::Crawl(args) => cmd_crawl(config_path, root, &args).await,
        Command::Reset { tag, ledger } => cmd_reset(config_path, root, &tag, ledger).await,
        Command::Tidy { action } => cmd_tidy(config_path, root, action).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Load the config file, falling back to defaults when it does not exist.
fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => Ok(load_config_from(path)?),
        None => Ok(load_config()?),
    }
}

/// Apply command-line overrides on top of the file values.
fn apply_overrides(config: &mut AppConfig, root: Option<&str>, args: &CrawlArgs) {
    let crawl = &mut config.crawl;
    if let Some(root) = root {
        crawl.root = root.to_string();
    }
    if let Some(url) = &args.base_tag_url {
        crawl.base_tag_url = url.clone();
    }
    if let Some(min) = args.delay_min {
        crawl.delay_min = min;
    }
    if let Some(max) = args.delay_max {
        crawl.delay_max = max;
    }
    if let Some(threads) = args.threads {
        crawl.threads = threads;
    }
    if let Some(retries) = args.retries {
        crawl.retries = retries;
    }
    if !args.only_tags.is_empty() {
        crawl.only_tags = args.only_tags.clone();
    }
    if args.no_resume {
        crawl.resume = false;
    }
    if let Some(ledger) = args.ledger {
        config.ledger.backend = ledger.into();
    }
}

/// Resolve the immutable run configuration.
fn resolve_crawl_config(
    config_path: Option<&Path>,
    root: Option<&str>,
    args: &CrawlArgs,
) -> Result<CrawlConfig> {
    let mut app = load_app_config(config_path)?;
    apply_overrides(&mut app, root, args);
    Ok(CrawlConfig::try_from(&app)?)
}

/// 0 on success, 1 when every attempted article failed, 130 when interrupted.
fn exit_status(summary: &RunSummary) -> u8 {
    if summary.interrupted {
        EXIT_INTERRUPTED
    } else if summary.all_failed() {
        1
    } else {
        0
    }
}

/// Resolves on the first Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    warn!("Ctrl-C received, finishing in-flight articles");
}

// ---------------------------------------------------------------------------
// crawl
// ---------------------------------------------------------------------------

async fn cmd_crawl(config_path: Option<&Path>, root: Option<&str>, args: &CrawlArgs) -> Result<ExitCode> {
    let config = Arc::new(resolve_crawl_config(config_path, root, args)?);

    info!(
        root = %config.root.display(),
        base = %config.base_tag_url,
        threads = config.threads,
        resume = config.resume,
        "crawling catalog"
    );

    let reporter = CliProgress::new(!args.json);
    let summary = tagcrawl_core::crawl(Arc::clone(&config), &reporter, ctrl_c()).await;
    reporter.finish();
    let summary = summary?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, &config.root);
    }

    Ok(ExitCode::from(exit_status(&summary)))
}

fn print_summary(summary: &RunSummary, root: &Path) {
    println!();
    if summary.interrupted {
        println!("  Crawl interrupted.");
    } else {
        println!("  Crawl finished.");
    }
    println!("  Tags:     {}", summary.tags);
    println!("  Articles: {}", summary.articles_seen);
    println!("  Saved:    {}", summary.saved);
    println!("  Skipped:  {}", summary.skipped);
    println!("  Failed:   {}", summary.failed);
    println!("  Root:     {}", root.display());
    println!("  Time:     {:.1}s", summary.duration.as_secs_f64());

    if !summary.tag_failures.is_empty() {
        println!();
        println!("  Tags that could not be listed:");
        for failure in &summary.tag_failures {
            println!("    {} ({}): {}", failure.tag, failure.kind, failure.message);
        }
    }
    if !summary.failures.is_empty() {
        println!();
        println!("  Failed articles:");
        for failure in &summary.failures {
            println!(
                "    [{}] p{} ({}): {}",
                failure.tag, failure.article_id, failure.kind, failure.message
            );
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(visible: bool) -> Self {
        if !visible {
            return Self {
                spinner: ProgressBar::hidden(),
            };
        }

        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} [{pos} done] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn tag_started(&self, tag: &Tag, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Tag [{current}/{total}] {tag}"));
    }

    fn article_finished(&self, article: &ArticleRef, outcome: &UnitOutcome) {
        self.spinner.inc(1);
        if let UnitOutcome::Failed(e) = outcome {
            self.spinner
                .println(format!("  failed {} ({}): {e}", article.url, e.kind()));
        }
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// reset
// ---------------------------------------------------------------------------

async fn cmd_reset(
    config_path: Option<&Path>,
    root: Option<&str>,
    tag: &str,
    ledger: Option<LedgerArg>,
) -> Result<ExitCode> {
    let args = CrawlArgs {
        ledger,
        ..CrawlArgs::default()
    };
    let config = resolve_crawl_config(config_path, root, &args)?;
    let tag = Tag::new(tag.trim());
    if tag.as_str().is_empty() {
        return Err(eyre!("tag name must not be empty"));
    }

    // Clearing must work even when resume is disabled in the config.
    let mut forced = config.clone();
    forced.resume = true;
    let ledger = CompletionLedger::open(&forced).await?;
    let cleared = ledger.clear_tag(&tag).await?;

    info!(%tag, cleared, "completion markers cleared");
    println!("Cleared {cleared} completion marker(s) for tag '{tag}'.");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// tidy
// ---------------------------------------------------------------------------

async fn cmd_tidy(config_path: Option<&Path>, root: Option<&str>, action: TidyAction) -> Result<ExitCode> {
    let app = {
        let mut app = load_app_config(config_path)?;
        apply_overrides(&mut app, root, &CrawlArgs::default());
        app
    };
    let root = PathBuf::from(&app.crawl.root);
    if !root.is_dir() {
        return Err(eyre!("output root '{}' is not a directory", root.display()));
    }

    match action {
        TidyAction::CleanLines { patterns } => {
            let patterns = if patterns.is_empty() {
                app.tidy.drop_line_patterns.clone()
            } else {
                patterns
            };
            if patterns.is_empty() {
                return Err(eyre!(
                    "no patterns given; pass --pattern or set tidy.drop_line_patterns"
                ));
            }
            let report = tidy::clean_lines(&root, &patterns).await?;
            println!(
                "Scanned {} file(s), changed {}, removed {} line(s).",
                report.files_scanned, report.files_changed, report.lines_removed
            );
        }
        TidyAction::LocalizeImages { images_dir } => {
            let images_dir = images_dir.unwrap_or_else(|| app.tidy.images_dir.clone());
            let config = CrawlConfig::try_from(&app)?;
            let fetcher = retrying_fetcher(&config, Arc::new(HttpFetcher::new(&config)?));
            let report = tidy::localize_images(&root, &images_dir, &fetcher).await?;
            println!(
                "Scanned {} file(s), changed {}; downloaded {}, reused {}, failed {}.",
                report.files_scanned,
                report.files_changed,
                report.downloaded,
                report.reused,
                report.failed
            );
        }
        TidyAction::StripIds { execute, extensions } => {
            let extensions = if extensions.is_empty() {
                DEFAULT_STRIP_EXTENSIONS.iter().map(|e| e.to_string()).collect()
            } else {
                extensions
            };
            let renames = tidy::strip_ids(&root, &extensions, execute).await?;
            for rename in &renames {
                let label = match rename.status {
                    RenameStatus::Planned => "would rename",
                    RenameStatus::Renamed => "renamed",
                    RenameStatus::TargetExists => "skipped (target exists)",
                };
                println!("{label}: {} -> {}", rename.from.display(), rename.to.display());
            }
            if !execute && !renames.is_empty() {
                println!("Dry run. Re-run with --execute to rename.");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init(path: Option<&Path>) -> Result<ExitCode> {
    let path = match path {
        Some(path) => {
            init_config_at(path)?;
            path.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(path: Option<&Path>) -> Result<ExitCode> {
    let config = load_app_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(ExitCode::SUCCESS)
}

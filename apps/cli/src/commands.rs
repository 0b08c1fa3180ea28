//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use jobsync_core::pipeline::{
    ProgressReporter, SyncOptions, SyncReport, SyncRequest, run_sync,
};
use jobsync_sheets::SheetsClient;
use jobsync_shared::{
    AppConfig, DateWindow, SourceFilter, config_file_path, init_config_at, load_config,
    load_config_from,
};
use jobsync_workiz::WorkizClient;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// jobsync: keep a Google Sheet in step with Workiz jobs.
#[derive(Parser)]
#[command(
    name = "jobsync",
    version,
    about = "Upsert Workiz jobs into a Google Sheet, one row per job.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.jobsync/jobsync.toml.
    #[arg(long, global = true)]
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

/// Date window and source selection shared by `sync` and `fetch`.
#[derive(Args, Debug, Clone)]
pub(crate) struct WindowArgs {
    /// First job date to include (YYYY-MM-DD).
    #[arg(long)]
    pub since: Option<NaiveDate>,

    /// Last job date to include (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub until: Option<NaiveDate>,

    /// Days to look back when --since is not given.
    #[arg(long, conflicts_with = "since")]
    pub days: Option<u32>,

    /// Only keep jobs from this lead source (repeatable).
    #[arg(long = "source")]
    pub sources: Vec<String>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch jobs from Workiz and upsert them into the sheet.
    Sync {
        #[command(flatten)]
        window: WindowArgs,

        /// Spreadsheet id (overrides config).
        #[arg(long)]
        spreadsheet: Option<String>,

        /// Tab name (overrides config).
        #[arg(long)]
        tab: Option<String>,

        /// Show what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch jobs from Workiz and print them.
    Fetch {
        #[command(flatten)]
        window: WindowArgs,

        /// Print the raw records as JSON.
        #[arg(long)]
        json: bool,
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
        0 => "jobsync=info",
        1 => "jobsync=debug",
        _ => "jobsync=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
        Command::Sync {
            window,
            spreadsheet,
            tab,
            dry_run,
        } => cmd_sync(config_path, &window, spreadsheet, tab, dry_run).await,
        Command::Fetch { window, json } => cmd_fetch(config_path, &window, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Build the date window from flags, falling back to `lookback_days`.
fn resolve_window(args: &WindowArgs, lookback_days: u32, today: NaiveDate) -> Result<DateWindow> {
    let end = args.until.unwrap_or(today);
    let window = match (args.since, args.days) {
        (Some(start), _) => DateWindow::new(start, end)?,
        (None, Some(days)) => DateWindow::last_days(days, end),
        (None, None) => DateWindow::last_days(lookback_days, end),
    };
    Ok(window)
}

/// `--source` flags win over `sync.sources` from config.
fn resolve_sources(args: &WindowArgs, config: &AppConfig) -> SourceFilter {
    if args.sources.is_empty() {
        SourceFilter::new(&config.sync.sources)
    } else {
        SourceFilter::new(&args.sources)
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_sync(
    config_path: Option<&Path>,
    window_args: &WindowArgs,
    spreadsheet: Option<String>,
    tab: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    if let Some(id) = spreadsheet {
        config.sheets.spreadsheet_id = id;
    }
    if let Some(tab) = tab {
        config.sheets.tab = tab;
    }
    config.validate()?;

    let request = SyncRequest {
        window: resolve_window(window_args, config.sync.lookback_days, Local::now().date_naive())?,
        sources: resolve_sources(window_args, &config),
        dry_run,
    };
    let options = SyncOptions::from_config(&config)?;
    let feed = WorkizClient::from_config(&config)?;
    let store = SheetsClient::from_config(&config)?;

    info!(
        window = %request.window,
        spreadsheet = store.spreadsheet_id(),
        tab = %options.tab,
        dry_run,
        "syncing jobs"
    );

    let reporter = CliProgress::new();
    let report = run_sync(&request, &feed, &store, &options, &reporter).await?;

    print_report(&report);
    Ok(())
}

async fn cmd_fetch(config_path: Option<&Path>, window_args: &WindowArgs, json: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let window = resolve_window(window_args, config.sync.lookback_days, Local::now().date_naive())?;
    let sources = resolve_sources(window_args, &config);
    let client = WorkizClient::from_config(&config)?;

    info!(%window, "fetching jobs");
    let jobs = client.fetch_jobs(&window, &sources).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    println!();
    println!("  {:<36}  {:<10}  {:<12}  {:<16}  SOURCE", "UUID", "SERIAL", "DATE", "STATUS");
    for job in &jobs {
        println!(
            "  {:<36}  {:<10}  {:<12}  {:<16}  {}",
            job.key().unwrap_or("-"),
            job.serial_id().unwrap_or_else(|| "-".into()),
            job.job_date().map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            job.status().unwrap_or("-"),
            job.source().unwrap_or("-"),
        );
    }
    println!();
    println!("  {} job(s) in {window}", jobs.len());
    println!();

    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if path.exists() {
        return Err(eyre!(
            "config file already exists at {}; edit it or remove it first",
            path.display()
        ));
    }
    init_config_at(&path)?;
    println!("Created {}", path.display());
    println!("Set sheets.spreadsheet_id, then export WORKIZ_API_TOKEN and GOOGLE_SERVICE_ACCOUNT_JSON.");
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!();
    if report.dry_run {
        println!("  Dry run, nothing was written.");
    } else {
        println!("  Sync complete!");
    }
    println!("  Run:        {}", report.run_id);
    println!("  Fetched:    {}", report.fetched);
    println!("  Updated:    {}", report.updated);
    println!("  Appended:   {}", report.appended);
    println!("  Unchanged:  {}", report.unchanged);
    if report.header_written {
        println!("  Header:     written");
    }
    if !report.duplicate_keys.is_empty() {
        println!(
            "  Duplicates: {} key(s) repeated in the sheet: {}",
            report.duplicate_keys.len(),
            report.duplicate_keys.join(", ")
        );
    }
    if report.remote_duplicates > 0 {
        println!("  Remote dup: {} job(s) shared a key", report.remote_duplicates);
    }
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
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
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn batch_written(&self, kind: &str, done: usize, total: usize) {
        self.spinner.set_message(format!("Writing rows [{done}/{total} {kind}]"));
    }

    fn done(&self, _report: &SyncReport) {
        self.spinner.finish_and_clear();
    }
}

// Clears the spinner when a run fails before `done`.
impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn args(since: Option<&str>, until: Option<&str>, days: Option<u32>) -> WindowArgs {
        WindowArgs {
            since: since.map(date),
            until: until.map(date),
            days,
            sources: vec![],
        }
    }

    #[test]
    fn window_defaults_to_lookback() {
        let w = resolve_window(&args(None, None, None), 30, date("2024-03-31")).unwrap();
        assert_eq!(w.start, date("2024-03-01"));
        assert_eq!(w.end, date("2024-03-31"));
    }

    #[test]
    fn explicit_dates_win() {
        let w = resolve_window(
            &args(Some("2024-01-01"), Some("2024-01-31"), None),
            30,
            date("2024-03-31"),
        )
        .unwrap();
        assert_eq!(w.start, date("2024-01-01"));
        assert_eq!(w.end, date("2024-01-31"));

        let w = resolve_window(&args(None, Some("2024-01-31"), Some(7)), 30, date("2024-03-31"))
            .unwrap();
        assert_eq!(w.start, date("2024-01-24"));
    }

    #[test]
    fn inverted_dates_are_rejected() {
        assert!(
            resolve_window(&args(Some("2024-02-01"), Some("2024-01-01"), None), 30, date("2024-03-31"))
                .is_err()
        );
    }

    #[test]
    fn source_flags_override_config() {
        let mut config = AppConfig::default();
        config.sync.sources = vec!["Google".into()];

        let from_config = resolve_sources(&args(None, None, None), &config);
        assert!(!from_config.is_all());

        let mut flagged = args(None, None, None);
        flagged.sources = vec!["Yelp".into()];
        let job: jobsync_shared::Job =
            serde_json::from_value(serde_json::json!({"JobSource": "yelp"})).unwrap();
        assert!(resolve_sources(&flagged, &config).accepts(&job));
        assert!(!from_config.accepts(&job));
    }

    #[test]
    fn spinner_is_cleared_when_progress_is_dropped() {
        let progress = CliProgress::new();
        let spinner = progress.spinner.clone();
        progress.phase("Reading sheet");
        drop(progress);
        assert!(spinner.is_finished());
    }

    #[tokio::test]
    async fn config_init_honors_config_flag() {
        let dir = std::env::temp_dir().join(format!("jobsync-cli-init-{}", std::process::id()));
        let path = dir.join("custom.toml");
        let _ = std::fs::remove_dir_all(&dir);

        let cli = Cli::try_parse_from(["jobsync", "--config", path.to_str().unwrap(), "config", "init"])
            .unwrap();
        run(cli).await.unwrap();
        assert!(path.exists());
        assert!(resolve_config(Some(path.as_path())).is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn cli_parses_sync_flags() {
        let cli = Cli::try_parse_from([
            "jobsync", "sync", "--since", "2024-03-01", "--source", "Google", "--source", "Yelp",
            "--dry-run", "--tab", "Leads",
        ])
        .unwrap();
        match cli.command {
            Command::Sync {
                window, tab, dry_run, ..
            } => {
                assert_eq!(window.since, Some(date("2024-03-01")));
                assert_eq!(window.sources, vec!["Google", "Yelp"]);
                assert_eq!(tab.as_deref(), Some("Leads"));
                assert!(dry_run);
            }
            _ => panic!("expected sync"),
        }
    }
}

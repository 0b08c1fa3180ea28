//! End-to-end sync: fetch → snapshot → plan → apply.

use std::future::Future;
use std::time::Instant;

use tracing::{info, instrument};

use jobsync_sheets::a1;
use jobsync_shared::{AppConfig, DateWindow, Job, Result, RunId, SourceFilter};
use jobsync_workiz::WorkizClient;

use crate::columns::ColumnMap;
use crate::reconcile::{self, ApplyOptions, SheetStore, Snapshot};

// ---------------------------------------------------------------------------
// JobFeed
// ---------------------------------------------------------------------------

/// Source of remote job records.
pub trait JobFeed {
    fn fetch_jobs(
        &self,
        window: &DateWindow,
        filter: &SourceFilter,
    ) -> impl Future<Output = Result<Vec<Job>>>;
}

impl JobFeed for WorkizClient {
    fn fetch_jobs(
        &self,
        window: &DateWindow,
        filter: &SourceFilter,
    ) -> impl Future<Output = Result<Vec<Job>>> {
        WorkizClient::fetch_jobs(self, window, filter)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each write batch. `kind` is `updated` or `appended`.
    fn batch_written(&self, kind: &str, done: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, report: &SyncReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn batch_written(&self, _kind: &str, _done: usize, _total: usize) {}
    fn done(&self, _report: &SyncReport) {}
}

// ---------------------------------------------------------------------------
// Request, options & report
// ---------------------------------------------------------------------------

/// What to sync in this run.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub window: DateWindow,
    pub sources: SourceFilter,
    /// Compute the plan but write nothing.
    pub dry_run: bool,
}

/// Sheet layout and batching, normally derived from config.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub columns: ColumnMap,
    pub tab: String,
    pub batch_size: usize,
}

impl SyncOptions {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            columns: ColumnMap::new(config.sync.columns.clone(), &config.sync.key_column)?,
            tab: config.sheets.tab.clone(),
            batch_size: config.sheets.batch_size,
        })
    }
}

/// Result of one sync run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub run_id: RunId,
    /// Jobs returned by the feed.
    pub fetched: usize,
    /// Rows rewritten in place (or that would be, on a dry run).
    pub updated: usize,
    /// Rows added (or that would be, on a dry run).
    pub appended: usize,
    pub unchanged: usize,
    /// Keys that appear more than once in the sheet.
    pub duplicate_keys: Vec<String>,
    /// Remote jobs dropped because a later one shared their key.
    pub remote_duplicates: usize,
    pub header_written: bool,
    pub dry_run: bool,
    pub elapsed: std::time::Duration,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run one sync.
///
/// 1. Fetch jobs for the window
/// 2. Read the sheet and index it by key
/// 3. Plan updates and appends
/// 4. Apply the plan (skipped on dry runs)
#[instrument(skip_all, fields(run_id, window = %request.window, dry_run = request.dry_run))]
pub async fn run_sync<F, S>(
    request: &SyncRequest,
    feed: &F,
    store: &S,
    options: &SyncOptions,
    progress: &dyn ProgressReporter,
) -> Result<SyncReport>
where
    F: JobFeed,
    S: SheetStore,
{
    let start = Instant::now();
    let run_id = RunId::new();
    tracing::Span::current().record("run_id", tracing::field::display(&run_id));

    info!(%run_id, tab = %options.tab, "starting sync");

    // --- Fetch ---
    progress.phase("Fetching jobs from Workiz");
    let jobs = feed.fetch_jobs(&request.window, &request.sources).await?;

    // --- Snapshot ---
    progress.phase("Reading sheet");
    let range = a1::columns_range(&options.tab, options.columns.width());
    let values = store.read_values(&range).await?;
    let snapshot = Snapshot::from_values(values, &options.columns)?;

    // --- Plan ---
    progress.phase("Comparing rows");
    let plan = reconcile::plan(&snapshot, &jobs, &options.columns);

    info!(
        fetched = jobs.len(),
        existing = snapshot.len(),
        sheet_rows = snapshot.data_rows(),
        updates = plan.updates.len(),
        appends = plan.appends.len(),
        unchanged = plan.unchanged,
        "sync plan computed"
    );

    // --- Apply ---
    let header_written = if request.dry_run {
        info!("dry run, nothing written");
        plan.header.is_some()
    } else if plan.is_noop() {
        false
    } else {
        progress.phase("Writing rows");
        let apply_options = ApplyOptions {
            tab: options.tab.clone(),
            batch_size: options.batch_size,
        };
        let applied =
            reconcile::apply(store, &plan, &options.columns, &apply_options, progress).await?;
        applied.header_written
    };

    let report = SyncReport {
        run_id,
        fetched: jobs.len(),
        updated: plan.updates.len(),
        appended: plan.appends.len(),
        unchanged: plan.unchanged,
        duplicate_keys: plan.duplicate_keys,
        remote_duplicates: plan.remote_duplicates,
        header_written,
        dry_run: request.dry_run,
        elapsed: start.elapsed(),
    };

    info!(
        updated = report.updated,
        appended = report.appended,
        unchanged = report.unchanged,
        elapsed_ms = report.elapsed.as_millis(),
        "sync complete"
    );

    progress.done(&report);
    Ok(report)
}

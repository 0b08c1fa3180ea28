//! Key-based reconciliation of remote jobs against the sheet.
//!
//! [`Snapshot`] indexes the rows already in the sheet by key, [`plan`] splits
//! the remote jobs into in-place updates, appends and unchanged rows, and
//! [`apply`] writes the plan in batches through a [`SheetStore`].

use std::collections::HashMap;
use std::future::Future;

use tracing::{debug, info, instrument, warn};

use jobsync_sheets::{AppendOutcome, SheetsClient, ValueRange, a1};
use jobsync_shared::{Job, Result, Row, SyncError};

use crate::columns::{ColumnMap, cells_match};
use crate::pipeline::ProgressReporter;

// ---------------------------------------------------------------------------
// SheetStore
// ---------------------------------------------------------------------------

/// The spreadsheet calls reconciliation needs.
pub trait SheetStore {
    /// Every row of `range`, as strings.
    fn read_values(&self, range: &str) -> impl Future<Output = Result<Vec<Row>>>;

    /// Overwrite each range with its rows. Returns rows written.
    fn batch_update(&self, data: &[ValueRange]) -> impl Future<Output = Result<usize>>;

    /// Add rows after the last non-empty row of `range`.
    fn append(&self, range: &str, rows: &[Row]) -> impl Future<Output = Result<AppendOutcome>>;
}

impl SheetStore for SheetsClient {
    fn read_values(&self, range: &str) -> impl Future<Output = Result<Vec<Row>>> {
        SheetsClient::read_values(self, range)
    }

    fn batch_update(&self, data: &[ValueRange]) -> impl Future<Output = Result<usize>> {
        SheetsClient::batch_update(self, data)
    }

    fn append(&self, range: &str, rows: &[Row]) -> impl Future<Output = Result<AppendOutcome>> {
        SheetsClient::append(self, range, rows)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An existing data row: its 1-based sheet row number and managed cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRow {
    pub row: u32,
    pub cells: Row,
}

/// The sheet's current contents, indexed by key.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    has_header: bool,
    rows_by_key: HashMap<String, ExistingRow>,
    duplicate_keys: Vec<String>,
    data_rows: usize,
}

impl Snapshot {
    /// Index the values read from the sheet (row 1 first).
    ///
    /// The header must start with the configured columns; extra trailing
    /// columns are allowed and never written.
    pub fn from_values(values: Vec<Row>, columns: &ColumnMap) -> Result<Self> {
        let mut rows = values.into_iter();
        let Some(header) = rows.next() else {
            return Ok(Self::default());
        };

        let expected = columns.header();
        let found: Vec<&str> = header.iter().map(|c| c.trim()).collect();
        let matches = found.len() >= expected.len()
            && expected.iter().zip(&found).all(|(want, got)| want == got);
        if !matches {
            return Err(SyncError::validation(format!(
                "sheet header does not match configured columns: expected [{}], found [{}]",
                expected.join(", "),
                found.join(", ")
            )));
        }

        let width = columns.width();
        let key_index = columns.key_index();
        let mut snapshot = Self {
            has_header: true,
            ..Self::default()
        };

        for (offset, mut cells) in rows.enumerate() {
            // Header is row 1, so the first data row is row 2.
            let row = offset as u32 + 2;
            snapshot.data_rows += 1;

            let key = match cells.get(key_index).map(|k| k.trim()) {
                Some(k) if !k.is_empty() => k.to_string(),
                _ => continue,
            };

            cells.resize(width, String::new());
            if snapshot.rows_by_key.contains_key(&key) {
                warn!(%key, row, "duplicate key in sheet, leaving row untouched");
                snapshot.duplicate_keys.push(key);
                continue;
            }
            snapshot.rows_by_key.insert(key, ExistingRow { row, cells });
        }

        Ok(snapshot)
    }

    pub fn has_header(&self) -> bool {
        self.has_header
    }

    /// Number of keyed rows.
    pub fn len(&self) -> usize {
        self.rows_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows_by_key.is_empty()
    }

    /// Data rows below the header, including blank and unkeyed ones.
    pub fn data_rows(&self) -> usize {
        self.data_rows
    }

    pub fn get(&self, key: &str) -> Option<&ExistingRow> {
        self.rows_by_key.get(key)
    }

    /// Keys seen more than once; only their first row is ever updated.
    pub fn duplicate_keys(&self) -> &[String] {
        &self.duplicate_keys
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Rewrite of one existing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub key: String,
    pub row: u32,
    pub values: Row,
}

/// What a sync will write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Header row to write at row 1, when the sheet has none.
    pub header: Option<Row>,
    /// In-place rewrites, in sheet row order.
    pub updates: Vec<RowUpdate>,
    /// New rows, in remote order.
    pub appends: Vec<Row>,
    /// Remote jobs whose row already matches.
    pub unchanged: usize,
    /// Keys duplicated in the sheet.
    pub duplicate_keys: Vec<String>,
    /// Remote jobs dropped because a later job had the same key.
    pub remote_duplicates: usize,
}

impl SyncPlan {
    /// Whether applying the plan would write anything.
    pub fn is_noop(&self) -> bool {
        self.header.is_none() && self.updates.is_empty() && self.appends.is_empty()
    }
}

/// Partition `jobs` into updates, appends and unchanged rows.
///
/// Jobs are keyed by their value in the key column; those without one are
/// ignored. When the same key appears twice remotely the last record wins, at
/// the position of the first. Sheet rows with no remote counterpart are never
/// touched.
pub fn plan(snapshot: &Snapshot, jobs: &[Job], columns: &ColumnMap) -> SyncPlan {
    let mut order: Vec<(String, &Job)> = Vec::with_capacity(jobs.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(jobs.len());
    let mut remote_duplicates = 0;
    let mut keyless = 0;

    for job in jobs {
        let Some(key) = columns.key_of(job) else {
            keyless += 1;
            continue;
        };
        match positions.get(&key) {
            Some(&idx) => {
                order[idx].1 = job;
                remote_duplicates += 1;
            }
            None => {
                positions.insert(key.clone(), order.len());
                order.push((key, job));
            }
        }
    }

    if keyless > 0 {
        warn!(keyless, key_column = columns.key_column(), "jobs without a key, skipped");
    }

    let mut plan = SyncPlan {
        header: (!snapshot.has_header()).then(|| columns.header()),
        duplicate_keys: snapshot.duplicate_keys().to_vec(),
        remote_duplicates,
        ..SyncPlan::default()
    };

    for (key, job) in order {
        let rendered = columns.render(job);
        match snapshot.get(&key) {
            Some(existing) if cells_match(&existing.cells, &rendered) => plan.unchanged += 1,
            Some(existing) => plan.updates.push(RowUpdate {
                key,
                row: existing.row,
                values: rendered,
            }),
            None => plan.appends.push(rendered),
        }
    }

    plan.updates.sort_by_key(|u| u.row);

    if remote_duplicates > 0 {
        warn!(remote_duplicates, "remote jobs shared a key, kept the last of each");
    }
    debug!(
        updates = plan.updates.len(),
        appends = plan.appends.len(),
        unchanged = plan.unchanged,
        "plan computed"
    );

    plan
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Where and how a plan is written.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Tab (sheet) name.
    pub tab: String,
    /// Rows per batchUpdate / append call.
    pub batch_size: usize,
}

/// What applying a plan wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub header_written: bool,
    pub rows_updated: usize,
    pub rows_appended: usize,
    /// API write calls made (header included).
    pub calls: usize,
}

/// Write `plan`: header first, then updates, then appends, each in batches.
#[instrument(skip_all, fields(tab = %options.tab))]
pub async fn apply<S: SheetStore>(
    store: &S,
    plan: &SyncPlan,
    columns: &ColumnMap,
    options: &ApplyOptions,
    progress: &dyn ProgressReporter,
) -> Result<ApplyReport> {
    if options.batch_size == 0 {
        return Err(SyncError::config("batch size must be greater than 0"));
    }

    let width = columns.width();
    let mut report = ApplyReport::default();

    if let Some(header) = &plan.header {
        let range = ValueRange {
            range: a1::row_range(&options.tab, 1, width),
            values: vec![header.clone()],
        };
        store.batch_update(std::slice::from_ref(&range)).await?;
        report.header_written = true;
        report.calls += 1;
        debug!("header written");
    }

    let total_updates = plan.updates.len();
    for chunk in plan.updates.chunks(options.batch_size) {
        let data: Vec<ValueRange> = chunk
            .iter()
            .map(|u| ValueRange {
                range: a1::row_range(&options.tab, u.row, width),
                values: vec![u.values.clone()],
            })
            .collect();

        store.batch_update(&data).await?;
        report.rows_updated += chunk.len();
        report.calls += 1;
        progress.batch_written("updated", report.rows_updated, total_updates);
    }

    let append_range = a1::columns_range(&options.tab, width);
    let total_appends = plan.appends.len();
    for chunk in plan.appends.chunks(options.batch_size) {
        let outcome = store.append(&append_range, chunk).await?;
        if outcome.updated_rows != 0 && outcome.updated_rows != chunk.len() {
            warn!(
                sent = chunk.len(),
                written = outcome.updated_rows,
                "append wrote a different number of rows than sent"
            );
        }
        debug!(first_row = ?outcome.first_row, rows = chunk.len(), "rows appended");
        report.rows_appended += chunk.len();
        report.calls += 1;
        progress.batch_written("appended", report.rows_appended, total_appends);
    }

    info!(
        header = report.header_written,
        updated = report.rows_updated,
        appended = report.rows_appended,
        calls = report.calls,
        "plan applied"
    );

    Ok(report)
}

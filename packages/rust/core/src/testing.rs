//! In-memory stand-ins for the Workiz and Sheets clients.

use std::sync::Mutex;

use jobsync_sheets::{AppendOutcome, ValueRange, a1};
use jobsync_shared::{DateWindow, Job, Result, Row, SourceFilter, SyncError};

use crate::pipeline::JobFeed;
use crate::reconcile::SheetStore;

/// A sheet held in memory. Row 1 is `rows[0]`.
#[derive(Default)]
pub(crate) struct MemorySheet {
    rows: Mutex<Vec<Row>>,
    batch_update_calls: Mutex<usize>,
    append_calls: Mutex<usize>,
}

impl MemorySheet {
    pub(crate) fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub(crate) fn rows(&self) -> Vec<Row> {
        self.rows.lock().unwrap().clone()
    }

    pub(crate) fn batch_update_calls(&self) -> usize {
        *self.batch_update_calls.lock().unwrap()
    }

    pub(crate) fn append_calls(&self) -> usize {
        *self.append_calls.lock().unwrap()
    }
}

impl SheetStore for MemorySheet {
    async fn read_values(&self, _range: &str) -> Result<Vec<Row>> {
        Ok(self.rows())
    }

    async fn batch_update(&self, data: &[ValueRange]) -> Result<usize> {
        *self.batch_update_calls.lock().unwrap() += 1;
        let mut rows = self.rows.lock().unwrap();
        let mut written = 0;
        for range in data {
            let first = a1::first_row(&range.range)
                .ok_or_else(|| SyncError::validation(format!("bad range {}", range.range)))?;
            for (i, values) in range.values.iter().enumerate() {
                let idx = first as usize - 1 + i;
                if rows.len() <= idx {
                    rows.resize(idx + 1, Row::new());
                }
                rows[idx] = values.clone();
                written += 1;
            }
        }
        Ok(written)
    }

    async fn append(&self, _range: &str, new_rows: &[Row]) -> Result<AppendOutcome> {
        *self.append_calls.lock().unwrap() += 1;
        let mut rows = self.rows.lock().unwrap();
        let last = rows
            .iter()
            .rposition(|r| r.iter().any(|c| !c.is_empty()))
            .map_or(0, |i| i + 1);
        rows.truncate(last);
        let first_row = rows.len() as u32 + 1;
        rows.extend(new_rows.iter().cloned());
        Ok(AppendOutcome {
            updated_range: None,
            first_row: Some(first_row),
            updated_rows: new_rows.len(),
        })
    }
}

/// A fixed set of jobs, filtered the way the Workiz client filters.
pub(crate) struct StaticFeed {
    pub(crate) jobs: Vec<Job>,
}

impl JobFeed for StaticFeed {
    async fn fetch_jobs(&self, window: &DateWindow, filter: &SourceFilter) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| j.job_date().is_none_or(|d| window.contains(d)))
            .filter(|j| filter.accepts(j))
            .cloned()
            .collect())
    }
}

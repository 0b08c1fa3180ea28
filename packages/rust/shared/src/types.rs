//! Core domain types shared by the fetch and reconcile sides.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// A spreadsheet row. Cells are handled as plain strings end to end.
pub type Row = Vec<String>;

/// Field holding the job's stable identifier.
pub const JOB_KEY_FIELD: &str = "UUID";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one sync run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One job record as returned by Workiz.
///
/// Every field of the payload is kept so any of them can be projected into a
/// sheet column; the accessors cover the fields the sync itself relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Job {
    fields: Map<String, Value>,
}

impl Job {
    /// Wrap an already-decoded JSON object.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Raw access to a field by its Workiz name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The job identifier, trimmed. `None` when missing or blank.
    pub fn key(&self) -> Option<&str> {
        self.str_field(JOB_KEY_FIELD)
    }

    /// Human-facing serial number, rendered as text.
    pub fn serial_id(&self) -> Option<String> {
        match self.fields.get("SerialId")? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Job status (e.g. `Submitted`, `Done`).
    pub fn status(&self) -> Option<&str> {
        self.str_field("Status")
    }

    /// Lead source the job was booked through.
    pub fn source(&self) -> Option<&str> {
        self.str_field("JobSource")
    }

    /// Scheduled date of the job, parsed from the `JobDateTime` prefix.
    ///
    /// Workiz sends `YYYY-MM-DD HH:MM:SS`; anything unparseable yields `None`.
    pub fn job_date(&self) -> Option<NaiveDate> {
        let raw = self.str_field("JobDateTime")?;
        let date_part = raw.get(..10)?;
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// DateWindow
// ---------------------------------------------------------------------------

/// Inclusive date range of jobs to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Build a window, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(SyncError::validation(format!(
                "date window start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days` days leading up to and including `today`.
    pub fn last_days(days: u32, today: NaiveDate) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    /// Whether `date` lies inside the window.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// SourceFilter
// ---------------------------------------------------------------------------

/// Restricts fetched jobs to a set of lead sources. Empty accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilter {
    sources: Vec<String>,
}

impl SourceFilter {
    /// Build a filter from user-supplied source names. Blank names are ignored.
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sources = sources
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { sources }
    }

    /// A filter that accepts every job.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_all(&self) -> bool {
        self.sources.is_empty()
    }

    /// Whether `job` passes the filter. Jobs without a source only pass `all()`.
    pub fn accepts(&self, job: &Job) -> bool {
        if self.sources.is_empty() {
            return true;
        }
        match job.source() {
            Some(src) => {
                let src = src.to_lowercase();
                self.sources.iter().any(|s| *s == src)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(value: Value) -> Job {
        serde_json::from_value(value).expect("job object")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn job_accessors() {
        let j = job(json!({
            "UUID": " ABC123 ",
            "SerialId": 1042,
            "JobDateTime": "2024-03-05 14:30:00",
            "JobSource": "Google",
            "Status": "Submitted",
        }));

        assert_eq!(j.key(), Some("ABC123"));
        assert_eq!(j.serial_id().as_deref(), Some("1042"));
        assert_eq!(j.job_date(), Some(date("2024-03-05")));
        assert_eq!(j.source(), Some("Google"));
        assert_eq!(j.status(), Some("Submitted"));
    }

    #[test]
    fn blank_key_is_none() {
        assert_eq!(job(json!({"UUID": "   "})).key(), None);
        assert_eq!(job(json!({"UUID": null})).key(), None);
        assert_eq!(job(json!({})).key(), None);
    }

    #[test]
    fn unparseable_date_is_none() {
        assert_eq!(job(json!({"JobDateTime": "soon"})).job_date(), None);
        assert_eq!(job(json!({"JobDateTime": ""})).job_date(), None);
    }

    #[test]
    fn window_rejects_inverted_range() {
        assert!(DateWindow::new(date("2024-02-01"), date("2024-01-01")).is_err());
        let w = DateWindow::new(date("2024-01-01"), date("2024-01-01")).unwrap();
        assert!(w.contains(date("2024-01-01")));
    }

    #[test]
    fn window_last_days() {
        let w = DateWindow::last_days(7, date("2024-03-10"));
        assert_eq!(w.start, date("2024-03-03"));
        assert_eq!(w.end, date("2024-03-10"));
        assert!(!w.contains(date("2024-03-11")));
    }

    #[test]
    fn source_filter_is_case_insensitive() {
        let filter = SourceFilter::new(["google ", "", "Yelp"]);
        assert!(!filter.is_all());
        assert!(filter.accepts(&job(json!({"JobSource": "Google"}))));
        assert!(filter.accepts(&job(json!({"JobSource": "YELP"}))));
        assert!(!filter.accepts(&job(json!({"JobSource": "Angi"}))));
        assert!(!filter.accepts(&job(json!({}))));
        assert!(SourceFilter::all().accepts(&job(json!({}))));
    }

    #[test]
    fn run_id_display_is_uuid() {
        let id = RunId::new();
        assert_eq!(id.to_string().len(), 36);
    }
}

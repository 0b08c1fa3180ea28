//! Projection of job records onto sheet columns.

use std::collections::HashSet;

use serde_json::Value;

use jobsync_shared::{Job, Result, Row, SyncError};

/// Ordered list of Workiz fields written to the sheet, plus the key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    columns: Vec<String>,
    key_index: usize,
}

impl ColumnMap {
    pub fn new(columns: Vec<String>, key_column: &str) -> Result<Self> {
        if columns.is_empty() {
            return Err(SyncError::config("at least one column must be configured"));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if column.trim().is_empty() {
                return Err(SyncError::config("column names must not be blank"));
            }
            if !seen.insert(column.as_str()) {
                return Err(SyncError::config(format!("column '{column}' is listed twice")));
            }
        }

        let key_index = columns
            .iter()
            .position(|c| c == key_column)
            .ok_or_else(|| {
                SyncError::config(format!("key column '{key_column}' is not a configured column"))
            })?;

        Ok(Self { columns, key_index })
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn key_index(&self) -> usize {
        self.key_index
    }

    pub fn key_column(&self) -> &str {
        &self.columns[self.key_index]
    }

    pub fn header(&self) -> Row {
        self.columns.clone()
    }

    /// The value `job` would put in the key column, trimmed. `None` when blank.
    pub fn key_of(&self, job: &Job) -> Option<String> {
        let key = job.field(self.key_column()).map(render_cell)?;
        let key = key.trim();
        (!key.is_empty()).then(|| key.to_string())
    }

    /// The sheet row for `job`, one cell per configured column.
    pub fn render(&self, job: &Job) -> Row {
        self.columns
            .iter()
            .map(|column| job.field(column).map(render_cell).unwrap_or_default())
            .collect()
    }
}

/// Whether an existing sheet row already holds `rendered`.
///
/// Numeric cells compare by value, so `150` read back from the sheet matches a
/// rendered `150.0`.
pub fn cells_match(existing: &[String], rendered: &[String]) -> bool {
    existing.len() == rendered.len()
        && existing
            .iter()
            .zip(rendered)
            .all(|(have, want)| have == want || same_number(have, want))
}

fn same_number(a: &str, b: &str) -> bool {
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Plain decimal numbers only; words like `inf` or `NaN` stay text.
fn parse_number(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    let numeric = cell.chars().any(|c| c.is_ascii_digit())
        && cell
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if numeric { cell.parse().ok() } else { None }
}

/// Render one field value as cell text.
///
/// Arrays of objects (e.g. `Team`) become their `Name`s joined with `", "`.
fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(obj) => obj
                    .get("Name")
                    .or_else(|| obj.get("name"))
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| item.to_string()),
                other => render_cell(other),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_bad_column_sets() {
        assert!(ColumnMap::new(vec![], "UUID").is_err());
        assert!(ColumnMap::new(columns(&["UUID", "UUID"]), "UUID").is_err());
        assert!(ColumnMap::new(columns(&["UUID", " "]), "UUID").is_err());
        assert!(ColumnMap::new(columns(&["Status"]), "UUID").is_err());
    }

    #[test]
    fn key_index_follows_configuration() {
        let map = ColumnMap::new(columns(&["SerialId", "UUID", "Status"]), "UUID").unwrap();
        assert_eq!(map.key_index(), 1);
        assert_eq!(map.key_column(), "UUID");
        assert_eq!(map.width(), 3);
        assert_eq!(map.header(), columns(&["SerialId", "UUID", "Status"]));
    }

    #[test]
    fn renders_fields_in_column_order() {
        let map = ColumnMap::new(
            columns(&["UUID", "SerialId", "JobTotalPrice", "Team", "Missing", "Paid", "Extra"]),
            "UUID",
        )
        .unwrap();
        let job: Job = serde_json::from_value(json!({
            "UUID": "ABC",
            "SerialId": 1042,
            "JobTotalPrice": 150.5,
            "Team": [{"id": 1, "Name": "Dana"}, {"id": 2, "Name": "Lee"}],
            "Paid": false,
            "Extra": {"a": 1},
        }))
        .unwrap();

        assert_eq!(
            map.render(&job),
            columns(&["ABC", "1042", "150.5", "Dana, Lee", "", "false", r#"{"a":1}"#])
        );
    }

    #[test]
    fn key_of_uses_the_configured_column() {
        let map = ColumnMap::new(columns(&["SerialId", "UUID"]), "SerialId").unwrap();
        let job: Job = serde_json::from_value(json!({"UUID": "U1", "SerialId": 1042})).unwrap();
        assert_eq!(map.key_of(&job).as_deref(), Some("1042"));

        let blank: Job = serde_json::from_value(json!({"UUID": "U2", "SerialId": " "})).unwrap();
        assert_eq!(map.key_of(&blank), None);
    }

    #[test]
    fn numbers_match_their_sheet_display_form() {
        assert!(cells_match(&columns(&["A", "150"]), &columns(&["A", "150.0"])));
        assert!(cells_match(&columns(&["1e3"]), &columns(&["1000"])));
        assert!(!cells_match(&columns(&["150"]), &columns(&["151"])));
        assert!(!cells_match(&columns(&["inf"]), &columns(&["infinity"])));
        assert!(!cells_match(&columns(&["-"]), &columns(&["+"])));
        assert!(!cells_match(&columns(&["A"]), &columns(&["A", ""])));
    }

    #[test]
    fn scalar_arrays_are_joined() {
        assert_eq!(render_cell(&json!(["a", null, 3])), "a, 3");
    }
}

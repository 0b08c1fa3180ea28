//! Google Sheets `spreadsheets.values` client.
//!
//! Only the three calls a sync needs: read a range, batch-update ranges, and
//! append rows. Every call runs through the shared rate-limit backoff.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use jobsync_shared::{
    AppConfig, Result, RetryPolicy, Row, SyncError, service_account_json, with_retry,
};

use crate::a1;
use crate::auth::{Auth, ServiceAccountAuth};

/// User-Agent string for Sheets requests.
const USER_AGENT: &str = concat!("jobsync/", env!("CARGO_PKG_VERSION"));

/// Service name used in errors and logs.
const SERVICE: &str = "sheets";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A block of rows addressed by an A1 range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueRange {
    pub range: String,
    pub values: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest<'a> {
    value_input_option: &'a str,
    data: &'a [ValueRange],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateResponse {
    #[serde(default)]
    total_updated_rows: usize,
}

#[derive(Serialize)]
struct AppendRequest<'a> {
    values: &'a [Row],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_range: Option<String>,
    #[serde(default)]
    updated_rows: usize,
}

/// Where an append landed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// The range Sheets reports as written, e.g. `Jobs!A12:W14`.
    pub updated_range: Option<String>,
    /// First sheet row written (1-based), when the range names one.
    pub first_row: Option<u32>,
    pub updated_rows: usize,
}

// ---------------------------------------------------------------------------
// SheetsClient
// ---------------------------------------------------------------------------

/// Client bound to one spreadsheet.
pub struct SheetsClient {
    client: Client,
    base_url: Url,
    spreadsheet_id: String,
    auth: Auth,
    value_input_option: String,
    retry: RetryPolicy,
}

impl SheetsClient {
    /// Create a client rooted at `base_url` (e.g. `https://sheets.googleapis.com/v4/`).
    pub fn new(
        base_url: Url,
        spreadsheet_id: impl Into<String>,
        auth: Auth,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {e}")))?;

        if base_url.cannot_be_a_base() {
            return Err(SyncError::config(format!(
                "sheets base URL '{base_url}' cannot carry a path"
            )));
        }

        Ok(Self {
            client,
            base_url,
            spreadsheet_id: spreadsheet_id.into(),
            auth,
            value_input_option: "RAW".into(),
            retry,
        })
    }

    /// Build a service-account client from the `[sheets]` and `[retry]` sections.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let key_json = service_account_json(config)?;
        let auth = Auth::ServiceAccount(ServiceAccountAuth::from_json(&key_json)?);
        Ok(Self::new(
            config.sheets.base_url.clone(),
            config.sheets.spreadsheet_id.clone(),
            auth,
            RetryPolicy::from(&config.retry),
        )?
        .with_value_input_option(&config.sheets.value_input_option))
    }

    /// `RAW` (default) stores text as-is; `USER_ENTERED` lets Sheets parse numbers and dates.
    pub fn with_value_input_option(mut self, option: &str) -> Self {
        self.value_input_option = option.to_string();
        self
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    /// Read every row of `range`. Cells come back as display strings.
    #[instrument(skip_all, fields(range = %range))]
    pub async fn read_values(&self, range: &str) -> Result<Vec<Row>> {
        let url = self.endpoint(&["values", range])?;
        let label = format!("read {range}");

        let response: ReadResponse = self
            .send_json(&label, || {
                self.client
                    .request(Method::GET, url.clone())
                    .query(&[("majorDimension", "ROWS"), ("valueRenderOption", "FORMATTED_VALUE")])
            })
            .await?;

        let rows: Vec<Row> = response
            .values
            .into_iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();

        debug!(rows = rows.len(), "read values");
        Ok(rows)
    }

    /// Write several ranges in one call. Returns the number of rows Sheets reports updated.
    #[instrument(skip_all, fields(ranges = data.len()))]
    pub async fn batch_update(&self, data: &[ValueRange]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let url = self.endpoint(&["values:batchUpdate"])?;
        let label = format!("batchUpdate {} ranges", data.len());
        let body = BatchUpdateRequest {
            value_input_option: &self.value_input_option,
            data,
        };

        let response: BatchUpdateResponse = self
            .send_json(&label, || {
                self.client.request(Method::POST, url.clone()).json(&body)
            })
            .await?;

        debug!(updated_rows = response.total_updated_rows, "batch update done");
        Ok(response.total_updated_rows)
    }

    /// Append rows after the last non-empty row of `range`.
    #[instrument(skip_all, fields(range = %range, rows = rows.len()))]
    pub async fn append(&self, range: &str, rows: &[Row]) -> Result<AppendOutcome> {
        if rows.is_empty() {
            return Ok(AppendOutcome::default());
        }

        let url = self.endpoint(&["values", &format!("{range}:append")])?;
        let label = format!("append {} rows to {range}", rows.len());
        let body = AppendRequest { values: rows };

        let response: AppendResponse = self
            .send_json(&label, || {
                self.client
                    .request(Method::POST, url.clone())
                    .query(&[
                        ("valueInputOption", self.value_input_option.as_str()),
                        ("insertDataOption", "INSERT_ROWS"),
                    ])
                    .json(&body)
            })
            .await?;

        let outcome = match response.updates {
            Some(updates) => AppendOutcome {
                first_row: updates.updated_range.as_deref().and_then(a1::first_row),
                updated_range: updates.updated_range,
                updated_rows: updates.updated_rows,
            },
            None => AppendOutcome::default(),
        };

        debug!(range = ?outcome.updated_range, "append done");
        Ok(outcome)
    }

    /// `{base}/spreadsheets/{id}/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::config("sheets base URL cannot carry a path"))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .extend(segments);
        Ok(url)
    }

    /// Send an authorized request (rebuilt per attempt) and decode the JSON reply.
    async fn send_json<T, B>(&self, label: &str, build: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Fn() -> RequestBuilder,
    {
        let build = &build;

        with_retry(&self.retry, label, move || async move {
            let token = self.auth.access_token().await?;
            let response = build()
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| SyncError::Network(format!("{label}: {e}")))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| SyncError::Network(format!("{label}: body read failed: {e}")))?;

            if !status.is_success() {
                return Err(SyncError::from_status(
                    SERVICE,
                    status.as_u16(),
                    google_error_message(&body),
                ));
            }

            serde_json::from_str(&body)
                .map_err(|e| SyncError::parse(format!("{label}: unexpected response: {e}")))
        })
        .await
    }
}

/// Stringify a cell as read back from Sheets.
fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Extract `error.message` from a Google API error body.
fn google_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHEET: &str = "sheet-123";

    fn client(server: &MockServer) -> SheetsClient {
        let base = Url::parse(&format!("{}/v4/", server.uri())).unwrap();
        SheetsClient::new(
            base,
            SHEET,
            Auth::Static("test-token".into()),
            RetryPolicy::immediate(3),
        )
        .unwrap()
    }

    #[test]
    fn endpoint_encodes_range() {
        let base = Url::parse("https://sheets.googleapis.com/v4/").unwrap();
        let client =
            SheetsClient::new(base, SHEET, Auth::Static("t".into()), RetryPolicy::default())
                .unwrap();
        let url = client.endpoint(&["values", "'My Jobs'!A:C"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123/values/'My%20Jobs'!A:C"
        );
    }

    #[test]
    fn google_error_message_extraction() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(google_error_message(body), "Quota exceeded");
        assert_eq!(google_error_message("<html>"), "<html>");
    }

    #[test]
    fn cells_are_stringified() {
        assert_eq!(cell_to_string(&json!(null)), "");
        assert_eq!(cell_to_string(&json!("x")), "x");
        assert_eq!(cell_to_string(&json!(12.5)), "12.5");
        assert_eq!(cell_to_string(&json!(true)), "true");
    }

    #[tokio::test]
    async fn read_values_returns_rows() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-123/values/'Jobs'!A:C"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "Jobs!A1:C3",
                "majorDimension": "ROWS",
                "values": [["UUID", "Status", "Total"], ["A", "Done", 150], ["B"]],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rows = client(&server).read_values("'Jobs'!A:C").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["A", "Done", "150"]);
        assert_eq!(rows[2], vec!["B"]);
    }

    #[tokio::test]
    async fn empty_sheet_has_no_values() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "Jobs!A1:C1000",
                "majorDimension": "ROWS",
            })))
            .mount(&server)
            .await;

        let rows = client(&server).read_values("'Jobs'!A:C").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn batch_update_posts_all_ranges() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-123/values:batchUpdate"))
            .and(body_json(json!({
                "valueInputOption": "USER_ENTERED",
                "data": [
                    {"range": "'Jobs'!A2:B2", "values": [["A", "Done"]]},
                    {"range": "'Jobs'!A5:B5", "values": [["B", "Open"]]},
                ],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spreadsheetId": SHEET,
                "totalUpdatedRows": 2,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let data = vec![
            ValueRange {
                range: "'Jobs'!A2:B2".into(),
                values: vec![vec!["A".into(), "Done".into()]],
            },
            ValueRange {
                range: "'Jobs'!A5:B5".into(),
                values: vec![vec!["B".into(), "Open".into()]],
            },
        ];

        let updated = client(&server)
            .with_value_input_option("USER_ENTERED")
            .batch_update(&data)
            .await
            .unwrap();
        assert_eq!(updated, 2);
    }

    #[tokio::test]
    async fn append_reports_first_row() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-123/values/'Jobs'!A:B:append"))
            .and(query_param("insertDataOption", "INSERT_ROWS"))
            .and(query_param("valueInputOption", "RAW"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spreadsheetId": SHEET,
                "tableRange": "Jobs!A1:B11",
                "updates": {
                    "updatedRange": "Jobs!A12:B13",
                    "updatedRows": 2,
                },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rows = vec![
            vec!["C".to_string(), "New".to_string()],
            vec!["D".to_string(), "New".to_string()],
        ];
        let outcome = client(&server).append("'Jobs'!A:B", &rows).await.unwrap();
        assert_eq!(outcome.first_row, Some(12));
        assert_eq!(outcome.updated_rows, 2);
    }

    #[tokio::test]
    async fn rate_limited_calls_are_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-123/values:batchUpdate"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"},
            })))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-123/values:batchUpdate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"totalUpdatedRows": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let data = vec![ValueRange {
            range: "'Jobs'!A2:A2".into(),
            values: vec![vec!["A".into()]],
        }];
        assert_eq!(client(&server).batch_update(&data).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(4)
            .mount(&server)
            .await;

        let err = client(&server).read_values("'Jobs'!A:B").await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn permission_denied_is_an_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "The caller does not have permission"},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).read_values("'Jobs'!A:B").await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert!(err.to_string().contains("does not have permission"));
    }
}

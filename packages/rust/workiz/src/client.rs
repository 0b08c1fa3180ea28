//! Paginated job listing against the Workiz REST API.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use jobsync_shared::{
    AppConfig, DateWindow, Job, Result, RetryPolicy, SourceFilter, SyncError, WORKIZ_MAX_PAGE_SIZE,
    with_retry, workiz_token,
};

/// User-Agent string for Workiz requests.
const USER_AGENT: &str = concat!("jobsync/", env!("CARGO_PKG_VERSION"));

/// Service name used in errors and logs.
const SERVICE: &str = "workiz";

/// One page of `job/all`.
#[derive(Debug, Deserialize)]
struct JobPage {
    #[serde(default = "default_flag")]
    flag: bool,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    data: Vec<Job>,
    #[serde(default)]
    msg: Option<String>,
}

fn default_flag() -> bool {
    true
}

/// Client for the Workiz job API.
///
/// The API token is part of the URL path, so URLs are only ever logged through
/// [`WorkizClient::redacted`].
pub struct WorkizClient {
    client: Client,
    base_url: Url,
    token: String,
    page_size: u32,
    only_open: bool,
    retry: RetryPolicy,
}

impl WorkizClient {
    /// Create a client rooted at `base_url` (e.g. `https://api.workiz.com/api/v1/`).
    pub fn new(base_url: Url, token: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {e}")))?;

        let token = token.into();
        if token.is_empty() || token.contains('/') {
            return Err(SyncError::config("Workiz API token is empty or malformed"));
        }

        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            token,
            page_size: WORKIZ_MAX_PAGE_SIZE,
            only_open: false,
            retry,
        })
    }

    /// Build a client from the `[workiz]` and `[retry]` config sections.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let token = workiz_token(config)?;
        Ok(Self::new(
            config.workiz.base_url.clone(),
            token,
            RetryPolicy::from(&config.retry),
        )?
        .with_page_size(config.workiz.page_size)
        .only_open(config.workiz.only_open))
    }

    /// Records requested per page, clamped to what Workiz accepts.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, WORKIZ_MAX_PAGE_SIZE);
        self
    }

    pub fn only_open(mut self, only_open: bool) -> Self {
        self.only_open = only_open;
        self
    }

    /// Fetch every job scheduled inside `window` that passes `filter`.
    ///
    /// Workiz only takes a lower date bound, so jobs dated after
    /// `window.end` are dropped here. Jobs without a readable date are kept.
    #[instrument(skip_all, fields(window = %window))]
    pub async fn fetch_jobs(&self, window: &DateWindow, filter: &SourceFilter) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut offset: u32 = 0;
        let mut pages = 0usize;
        let mut received = 0usize;

        loop {
            let page = self.fetch_page(window.start, offset).await?;
            pages += 1;

            let count = page.data.len();
            received += count;
            debug!(offset, count, has_more = page.has_more, "received page");

            for job in page.data {
                if keep_job(&job, window, filter) {
                    jobs.push(job);
                }
            }

            if !page.has_more || count == 0 {
                break;
            }
            offset += count as u32;
        }

        info!(
            pages,
            received,
            kept = jobs.len(),
            sources = if filter.is_all() { "all" } else { "filtered" },
            "fetched jobs from Workiz"
        );

        Ok(jobs)
    }

    async fn fetch_page(&self, start: NaiveDate, offset: u32) -> Result<JobPage> {
        let url = self.jobs_url()?;
        let label = format!("GET {}", self.redacted(&url));
        let query = [
            ("start_date", start.format("%Y-%m-%d").to_string()),
            ("offset", offset.to_string()),
            ("records", self.page_size.to_string()),
            ("only_open", self.only_open.to_string()),
        ];

        let url = &url;
        let label = label.as_str();
        let query = &query;

        with_retry(&self.retry, label, move || async move {
            let response = self
                .client
                .get(url.clone())
                .query(query)
                .send()
                .await
                .map_err(|e| SyncError::Network(format!("{label}: {}", self.scrub(&e.to_string()))))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| SyncError::Network(format!("{label}: body read failed: {e}")))?;

            if !status.is_success() {
                return Err(SyncError::from_status(
                    SERVICE,
                    status.as_u16(),
                    error_message(&body),
                ));
            }

            let page: JobPage = serde_json::from_str(&body)
                .map_err(|e| SyncError::parse(format!("{label}: invalid job page: {e}")))?;

            if !page.flag {
                return Err(SyncError::Api {
                    service: SERVICE.into(),
                    status: status.as_u16(),
                    message: page.msg.unwrap_or_else(|| "request flagged as failed".into()),
                });
            }

            Ok(page)
        })
        .await
    }

    fn jobs_url(&self) -> Result<Url> {
        self.base_url
            .join(&format!("{}/job/all/", self.token))
            .map_err(|e| SyncError::config(format!("invalid Workiz base URL: {e}")))
    }

    /// The URL with the API token masked.
    fn redacted(&self, url: &Url) -> String {
        self.scrub(url.as_str())
    }

    fn scrub(&self, text: &str) -> String {
        text.replace(&self.token, "***")
    }
}

/// Jobs without a usable key are kept here; the sync drops them against its
/// configured key column.
fn keep_job(job: &Job, window: &DateWindow, filter: &SourceFilter) -> bool {
    if let Some(date) = job.job_date() {
        if date > window.end {
            return false;
        }
    }
    filter.accepts(job)
}

/// Pull a human-readable message out of a Workiz error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("msg")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

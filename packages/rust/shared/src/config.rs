//! Application configuration for jobsync.
//!
//! User config lives at `~/.jobsync/jobsync.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets never live in the file, only the names of the env vars holding them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SyncError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "jobsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".jobsync";

/// Workiz never returns more than this many records per page.
pub const WORKIZ_MAX_PAGE_SIZE: u32 = 100;

// ---------------------------------------------------------------------------
// Config structs (matching jobsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Workiz API settings.
    #[serde(default)]
    pub workiz: WorkizConfig,

    /// Google Sheets settings.
    #[serde(default)]
    pub sheets: SheetsConfig,

    /// Reconciliation settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Backoff applied to rate-limited calls.
    #[serde(default)]
    pub retry: RetrySettings,
}

/// `[workiz]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkizConfig {
    /// Name of the env var holding the API token.
    #[serde(default = "default_workiz_token_env")]
    pub api_token_env: String,

    /// API root; the token is appended as the first path segment.
    #[serde(default = "default_workiz_base_url")]
    pub base_url: Url,

    /// Records requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Only fetch jobs that are still open.
    #[serde(default)]
    pub only_open: bool,
}

impl Default for WorkizConfig {
    fn default() -> Self {
        Self {
            api_token_env: default_workiz_token_env(),
            base_url: default_workiz_base_url(),
            page_size: default_page_size(),
            only_open: false,
        }
    }
}

fn default_workiz_token_env() -> String {
    "WORKIZ_API_TOKEN".into()
}
fn default_workiz_base_url() -> Url {
    Url::parse("https://api.workiz.com/api/v1/").expect("static url")
}
fn default_page_size() -> u32 {
    WORKIZ_MAX_PAGE_SIZE
}

/// `[sheets]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    /// Target spreadsheet id (the long token in the sheet URL).
    #[serde(default)]
    pub spreadsheet_id: String,

    /// Tab (sheet) name holding the job rows.
    #[serde(default = "default_tab")]
    pub tab: String,

    /// Name of the env var holding the service-account JSON key.
    #[serde(default = "default_credentials_env")]
    pub credentials_env: String,

    /// Path to a service-account JSON key file. Takes precedence over the env var.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,

    /// API root.
    #[serde(default = "default_sheets_base_url")]
    pub base_url: Url,

    /// `RAW` or `USER_ENTERED`. `RAW` reads back exactly what was written, so
    /// unchanged rows stay unchanged.
    #[serde(default = "default_value_input_option")]
    pub value_input_option: String,

    /// Rows per batchUpdate / append call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            tab: default_tab(),
            credentials_env: default_credentials_env(),
            credentials_path: None,
            base_url: default_sheets_base_url(),
            value_input_option: default_value_input_option(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_tab() -> String {
    "Jobs".into()
}
fn default_credentials_env() -> String {
    "GOOGLE_SERVICE_ACCOUNT_JSON".into()
}
fn default_sheets_base_url() -> Url {
    Url::parse("https://sheets.googleapis.com/v4/").expect("static url")
}
fn default_value_input_option() -> String {
    "RAW".into()
}
fn default_batch_size() -> usize {
    500
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Header of the column holding the job key.
    #[serde(default = "default_key_column")]
    pub key_column: String,

    /// Window size when no explicit dates are given.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Lead sources to keep. Empty keeps all.
    #[serde(default)]
    pub sources: Vec<String>,

    /// Workiz fields written to the sheet, in column order.
    #[serde(default = "default_columns")]
    pub columns: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            key_column: default_key_column(),
            lookback_days: default_lookback_days(),
            sources: Vec::new(),
            columns: default_columns(),
        }
    }
}

fn default_key_column() -> String {
    "UUID".into()
}
fn default_lookback_days() -> u32 {
    30
}
fn default_columns() -> Vec<String> {
    [
        "UUID",
        "SerialId",
        "Status",
        "SubStatus",
        "JobType",
        "JobSource",
        "JobDateTime",
        "JobEndDateTime",
        "CreatedDate",
        "FirstName",
        "LastName",
        "Company",
        "Phone",
        "Email",
        "Address",
        "City",
        "State",
        "PostalCode",
        "JobTotalPrice",
        "JobAmountDue",
        "SubTotal",
        "Team",
        "ReferralCompany",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Extra attempts after the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_min_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    32_000
}
fn default_max_retries() -> usize {
    5
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Check the settings a sync run cannot do without.
    pub fn validate(&self) -> Result<()> {
        if self.sheets.spreadsheet_id.trim().is_empty() {
            return Err(SyncError::config(
                "sheets.spreadsheet_id is not set (config file or --spreadsheet)",
            ));
        }
        if self.sheets.tab.trim().is_empty() {
            return Err(SyncError::config("sheets.tab must not be empty"));
        }
        if !matches!(self.sheets.value_input_option.as_str(), "RAW" | "USER_ENTERED") {
            return Err(SyncError::config(format!(
                "sheets.value_input_option must be RAW or USER_ENTERED, got '{}'",
                self.sheets.value_input_option
            )));
        }
        if self.sheets.batch_size == 0 {
            return Err(SyncError::config("sheets.batch_size must be greater than 0"));
        }
        if !(1..=WORKIZ_MAX_PAGE_SIZE).contains(&self.workiz.page_size) {
            return Err(SyncError::config(format!(
                "workiz.page_size must be between 1 and {WORKIZ_MAX_PAGE_SIZE}"
            )));
        }
        if !self.sync.columns.iter().any(|c| c == &self.sync.key_column) {
            return Err(SyncError::config(format!(
                "sync.key_column '{}' is not one of sync.columns",
                self.sync.key_column
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.jobsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.jobsync/jobsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SyncError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file at `path`, creating parent directories.
/// An existing file is never overwritten.
pub fn init_config_at(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(SyncError::config(format!(
            "config file already exists at {}",
            path.display()
        )));
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SyncError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| SyncError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(())
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Read the Workiz API token from the configured env var.
pub fn workiz_token(config: &AppConfig) -> Result<String> {
    let var_name = &config.workiz.api_token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(SyncError::config(format!(
            "Workiz API token not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Resolve the service-account JSON key: the configured file first, then the env var.
pub fn service_account_json(config: &AppConfig) -> Result<String> {
    if let Some(path) = &config.sheets.credentials_path {
        return std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e));
    }

    let var_name = &config.sheets.credentials_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(SyncError::config(format!(
            "Google service account key not found. Set the {var_name} environment variable \
             or sheets.credentials_path."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sheets.spreadsheet_id = "sheet-123".into();
        config
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("spreadsheet_id"));
        assert!(toml_str.contains("WORKIZ_API_TOKEN"));
        assert!(!toml_str.contains("credentials_path"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.workiz.page_size, 100);
        assert_eq!(parsed.sync.key_column, "UUID");
        assert_eq!(parsed.retry.max_retries, 5);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[sheets]
spreadsheet_id = "abc"
tab = "Leads"

[sync]
sources = ["Google", "Yelp"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.sheets.tab, "Leads");
        assert_eq!(config.sheets.batch_size, 500);
        assert_eq!(config.sync.sources.len(), 2);
        assert!(config.sync.columns.contains(&"UUID".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_requires_spreadsheet_id() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("spreadsheet_id"));
    }

    #[test]
    fn validate_key_column_must_be_managed() {
        let mut config = valid_config();
        config.sync.key_column = "JobId".into();
        assert!(config.validate().unwrap_err().to_string().contains("JobId"));
    }

    #[test]
    fn validate_page_size_bounds() {
        let mut config = valid_config();
        config.workiz.page_size = 0;
        assert!(config.validate().is_err());
        config.workiz.page_size = 101;
        assert!(config.validate().is_err());
        config.workiz.page_size = 50;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn retry_durations() {
        let retry = RetrySettings::default();
        assert_eq!(retry.min_delay(), Duration::from_secs(1));
        assert_eq!(retry.max_delay(), Duration::from_secs(32));
    }

    #[test]
    fn token_lookup_names_missing_var() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.workiz.api_token_env = "JOBSYNC_TEST_NONEXISTENT_TOKEN_12345".into();
        let err = workiz_token(&config).unwrap_err();
        assert!(err.to_string().contains("JOBSYNC_TEST_NONEXISTENT_TOKEN_12345"));
    }

    #[test]
    fn credentials_path_takes_precedence() {
        let dir = std::env::temp_dir().join(format!("jobsync-cfg-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let key_path = dir.join("key.json");
        std::fs::write(&key_path, "{\"client_email\":\"x\"}").unwrap();

        let mut config = AppConfig::default();
        config.sheets.credentials_path = Some(key_path);
        config.sheets.credentials_env = "JOBSYNC_TEST_NONEXISTENT_KEY_12345".into();
        let json = service_account_json(&config).expect("read key file");
        assert!(json.contains("client_email"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn init_config_at_writes_loadable_defaults_once() {
        let dir = std::env::temp_dir().join(format!("jobsync-init-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("nested").join("jobsync.toml");

        init_config_at(&path).expect("write defaults");
        let loaded = load_config_from(&path).expect("load written config");
        assert_eq!(loaded.sheets.value_input_option, "RAW");
        assert!(init_config_at(&path).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn validate_value_input_option() {
        let mut config = valid_config();
        config.sheets.value_input_option = "FORMULA".into();
        assert!(config.validate().is_err());
        config.sheets.value_input_option = "USER_ENTERED".into();
        assert!(config.validate().is_ok());
    }
}

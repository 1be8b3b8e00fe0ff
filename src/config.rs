use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_LEVER_BASE_URL: &str = "https://api.lever.co/v1";
pub const DEFAULT_POSTING_TITLE: &str = "AI Link Email List";
pub const DEFAULT_CANDIDATES_FILE: &str = "ai_link_email_list_candidates.json";
pub const DEFAULT_FILTERED_FILE: &str = "filtered_candidates_with_linkedin.json";
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";
const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 600;
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 1800;

/// Everything the stages need from the outside world, resolved once at startup
/// and handed to each collaborator.
#[derive(Debug, Clone)]
pub struct Config {
    pub lever_api_key: Option<String>,
    pub lever_base_url: String,
    pub posting_title: String,
    pub google_credentials_file: PathBuf,
    pub spreadsheet_id: Option<String>,
    pub candidates_file: PathBuf,
    pub filtered_file: PathBuf,
    pub rate_limit_delay: Duration,
    pub stage_timeout: Duration,
    /// `None` means failed enrichments are retried on every run.
    pub enrich_max_attempts: Option<u32>,
}

impl Config {
    /// Read `KEY=VALUE` pairs from `env_file` if it exists, falling back to the
    /// process environment for anything the file does not set.
    ///
    /// The process environment itself is never modified.
    pub fn load(env_file: &Path) -> Result<Self> {
        let file_vars = read_env_file(env_file)?;
        Self::from_lookup(|key| {
            file_vars
                .get(key)
                .cloned()
                .or_else(|| env::var(key).ok())
        })
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let rate_limit_ms: u64 = parse_var(&get, "RATE_LIMIT_DELAY_MS")?
            .unwrap_or(DEFAULT_RATE_LIMIT_DELAY_MS);
        let stage_timeout_secs: u64 = parse_var(&get, "STAGE_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_STAGE_TIMEOUT_SECS);
        let enrich_max_attempts: Option<u32> = parse_var(&get, "ENRICH_MAX_ATTEMPTS")?;
        if enrich_max_attempts == Some(0) {
            return Err(anyhow!("ENRICH_MAX_ATTEMPTS must be at least 1"));
        }

        Ok(Self {
            lever_api_key: get("LEVER_API_KEY"),
            lever_base_url: get("LEVER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LEVER_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            posting_title: get("POSTING_TITLE").unwrap_or_else(|| DEFAULT_POSTING_TITLE.to_string()),
            google_credentials_file: PathBuf::from(
                get("GOOGLE_CREDENTIALS_FILE").unwrap_or_else(|| DEFAULT_CREDENTIALS_FILE.to_string()),
            ),
            spreadsheet_id: get("TARGET_SPREADSHEET_ID"),
            candidates_file: PathBuf::from(
                get("CANDIDATES_FILE").unwrap_or_else(|| DEFAULT_CANDIDATES_FILE.to_string()),
            ),
            filtered_file: PathBuf::from(
                get("FILTERED_FILE").unwrap_or_else(|| DEFAULT_FILTERED_FILE.to_string()),
            ),
            rate_limit_delay: Duration::from_millis(rate_limit_ms),
            stage_timeout: Duration::from_secs(stage_timeout_secs),
            enrich_max_attempts,
        })
    }

    pub fn require_lever_api_key(&self) -> Result<&str> {
        self.lever_api_key.as_deref().ok_or_else(|| {
            anyhow!("LEVER_API_KEY not set. Add it to the env file or export LEVER_API_KEY=your-key")
        })
    }

    pub fn require_spreadsheet_id(&self) -> Result<&str> {
        self.spreadsheet_id.as_deref().ok_or_else(|| {
            anyhow!("TARGET_SPREADSHEET_ID not set. Add it to the env file or export TARGET_SPREADSHEET_ID=...")
        })
    }

    pub fn require_credentials_file(&self) -> Result<&Path> {
        let path = self.google_credentials_file.as_path();
        if !path.exists() {
            return Err(anyhow!("Google credentials file not found: {}", path.display()));
        }
        Ok(path)
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read env file: {}", path.display()))?;
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_env_line(line) {
            Some((key, value)) => {
                vars.insert(key, value);
            }
            None => warn!(path = %path.display(), line = number + 1, "ignoring env file line without KEY=VALUE"),
        }
    }
    Ok(vars)
}

/// Quotes, escapes and `export` follow dotenv rules. An unquoted value with
/// spaces, which dotenv rejects, is taken as everything after the first `=`.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    if let Some(Ok(pair)) = dotenvy::from_read_iter(line.as_bytes()).next() {
        return Some(pair);
    }

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let key = key.strip_prefix("export ").unwrap_or(key).trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("Invalid value for {}: '{}'", key, raw))
        })
        .transpose()
}

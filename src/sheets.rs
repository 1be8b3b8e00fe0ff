use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: i64 = 3600;

/// The destination worksheet: read everything, append at the end.
pub trait Spreadsheet {
    fn read_all(&self) -> Result<Vec<Vec<String>>>;
    fn append_rows(&self, rows: &[Vec<String>]) -> Result<()>;
}

// --- Service account auth ---

#[derive(Debug, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid service account JSON: {}", path.display()))
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

fn signed_assertion(key: &ServiceAccountKey, issued_at: i64) -> Result<String> {
    let claims = Claims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: &key.token_uri,
        iat: issued_at,
        exp: issued_at + TOKEN_LIFETIME_SECS,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .context("Service account private key is not a valid RSA PEM key")?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .context("Failed to sign service account assertion")
}

fn fetch_access_token(client: &reqwest::blocking::Client, key: &ServiceAccountKey) -> Result<String> {
    let assertion = signed_assertion(key, chrono::Utc::now().timestamp())?;
    let response = client
        .post(&key.token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .context("Failed to reach Google token endpoint")?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().unwrap_or_default();
        return Err(anyhow!("Authentication failed with status {}: {}", status, error_text));
    }

    let token: TokenResponse = response
        .json()
        .context("Failed to parse Google token response")?;
    Ok(token.access_token)
}

// --- Google Sheets client ---

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    properties: TitleProperties,
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: TitleProperties,
}

#[derive(Debug, Deserialize)]
struct TitleProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct AppendBody<'a> {
    values: &'a [Vec<String>],
}

#[derive(Debug)]
pub struct GoogleSheets {
    client: reqwest::blocking::Client,
    access_token: String,
    spreadsheet_id: String,
    pub spreadsheet_title: String,
    pub worksheet_title: String,
}

impl GoogleSheets {
    /// Authenticate with the service account and open the first worksheet.
    pub fn connect(credentials_file: &Path, spreadsheet_id: &str) -> Result<Self> {
        let key = ServiceAccountKey::from_file(credentials_file)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        let access_token = fetch_access_token(&client, &key)?;
        debug!(account = %key.client_email, "authenticated with Google");

        let url = spreadsheet_url(spreadsheet_id, &[])?;
        let meta: SpreadsheetMeta = send_json(
            client
                .get(url)
                .bearer_auth(&access_token)
                .query(&[("fields", "properties.title,sheets.properties.title")]),
            "open spreadsheet",
        )
        .with_context(|| format!("Failed to open spreadsheet '{}'", spreadsheet_id))?;

        let worksheet_title = meta
            .sheets
            .first()
            .map(|s| s.properties.title.clone())
            .ok_or_else(|| anyhow!("Spreadsheet '{}' has no worksheets", spreadsheet_id))?;

        Ok(Self {
            client,
            access_token,
            spreadsheet_id: spreadsheet_id.to_string(),
            spreadsheet_title: meta.properties.title,
            worksheet_title,
        })
    }

    fn range(&self) -> String {
        format!("'{}'", self.worksheet_title.replace('\'', "''"))
    }
}

impl Spreadsheet for GoogleSheets {
    fn read_all(&self) -> Result<Vec<Vec<String>>> {
        let url = spreadsheet_url(&self.spreadsheet_id, &["values", &self.range()])?;
        let range: ValueRange = send_json(
            self.client.get(url).bearer_auth(&self.access_token),
            "read values",
        )?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
        let url = spreadsheet_url(
            &self.spreadsheet_id,
            &["values", &format!("{}:append", self.range())],
        )?;
        let _: Value = send_json(
            self.client
                .post(url)
                .bearer_auth(&self.access_token)
                .query(&[
                    ("valueInputOption", "USER_ENTERED"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&AppendBody { values: rows }),
            "append rows",
        )?;
        Ok(())
    }
}

fn spreadsheet_url(spreadsheet_id: &str, segments: &[&str]) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(SHEETS_API_URL).context("Invalid Sheets API URL")?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Sheets API URL cannot be a base"))?
        .push(spreadsheet_id)
        .extend(segments);
    Ok(url)
}

fn send_json<T: serde::de::DeserializeOwned>(
    request: reqwest::blocking::RequestBuilder,
    action: &str,
) -> Result<T> {
    let response = request
        .send()
        .with_context(|| format!("Failed to send Sheets request ({})", action))?;
    if !response.status().is_success() {
        let status = response.status();
        let error_text: String = response.text().unwrap_or_default().chars().take(500).collect();
        return Err(anyhow!(
            "Sheets request ({}) failed with status {}: {}",
            action,
            status,
            error_text
        ));
    }
    response
        .json()
        .with_context(|| format!("Failed to parse Sheets response ({})", action))
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

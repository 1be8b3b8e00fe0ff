use anyhow::{anyhow, Context, Result};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::Value;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;

pub const PAGE_SIZE: u32 = 100;

// --- Source trait ---

/// The slice of the applicant-tracking API the pipeline depends on.
pub trait CandidateSource {
    fn check_connection(&self) -> Result<()>;
    fn postings_page(&self, cursor: Option<&str>) -> Result<Page<Posting>>;
    fn opportunities_page(&self, posting_id: &str, cursor: Option<&str>) -> Result<Page<Opportunity>>;
    fn candidate_detail(&self, candidate_id: &str) -> Result<CandidateDetail>;
}

// --- Wire types ---

#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(rename = "hasNext", default)]
    pub has_next: Option<bool>,
}

impl<T> Page<T> {
    /// Cursor for the following page, if the API says there is one.
    pub fn next_cursor(&self) -> Option<&str> {
        if self.has_next == Some(false) {
            return None;
        }
        self.next.as_deref().filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Posting {
    pub id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Archived {
    #[serde(rename = "archivedAt", default)]
    pub archived_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Opportunity {
    #[serde(default)]
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    pub location: Option<String>,
    pub headline: Option<String>,
    /// A plain id normally, an object when the API expands it.
    #[serde(default)]
    pub stage: Value,
    pub origin: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<i64>,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<i64>,
    pub archived: Option<Archived>,
    #[serde(default)]
    pub applications: Vec<String>,
}

impl Opportunity {
    pub fn stage_text(&self) -> String {
        match &self.stage {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("text")
                .or_else(|| map.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived
            .as_ref()
            .is_some_and(|a| a.archived_at.is_some())
    }
}

/// A link entry on a detailed profile: either a bare URL or an object with a `url`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProfileLink {
    Url(String),
    Entry {
        #[serde(default)]
        url: Option<String>,
    },
    Other(IgnoredAny),
}

impl ProfileLink {
    pub fn url(&self) -> Option<&str> {
        match self {
            ProfileLink::Url(url) => Some(url),
            ProfileLink::Entry { url } => url.as_deref(),
            ProfileLink::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateDetail {
    #[serde(default)]
    pub links: Vec<ProfileLink>,
    #[serde(default)]
    pub emails: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

// --- Lever client ---

#[derive(Debug)]
pub struct LeverClient {
    api_key: String,
    base_url: String,
    rate_limit_delay: Duration,
    client: reqwest::blocking::Client,
}

impl LeverClient {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.require_lever_api_key()?.to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_key,
            base_url: config.lever_base_url.clone(),
            rate_limit_delay: config.rate_limit_delay,
            client,
        })
    }

    fn get<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, ?params, "lever request");

        let result = self
            .client
            .get(&url)
            .basic_auth(&self.api_key, Some(""))
            .query(params)
            .send();

        // Every call counts against the rate limit, successful or not.
        thread::sleep(self.rate_limit_delay);

        let response = result.with_context(|| format!("Failed to send request to {}", endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text: String = response.text().unwrap_or_default().chars().take(500).collect();
            return Err(anyhow!(
                "Lever request to {} failed with status {}: {}",
                endpoint,
                status,
                error_text
            ));
        }

        response
            .json()
            .with_context(|| format!("Failed to parse Lever response from {}", endpoint))
    }
}

fn page_params(cursor: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![("limit", PAGE_SIZE.to_string())];
    if let Some(cursor) = cursor {
        params.push(("offset", cursor.to_string()));
    }
    params
}

impl CandidateSource for LeverClient {
    fn check_connection(&self) -> Result<()> {
        let _: Value = self.get("/opportunities", &[("limit", "1".to_string())])?;
        Ok(())
    }

    fn postings_page(&self, cursor: Option<&str>) -> Result<Page<Posting>> {
        self.get("/postings", &page_params(cursor))
    }

    fn opportunities_page(&self, posting_id: &str, cursor: Option<&str>) -> Result<Page<Opportunity>> {
        let mut params = page_params(cursor);
        params.push(("posting_id", posting_id.to_string()));
        self.get("/opportunities", &params)
    }

    fn candidate_detail(&self, candidate_id: &str) -> Result<CandidateDetail> {
        let envelope: Envelope<CandidateDetail> =
            self.get(&format!("/candidates/{}", candidate_id), &[])?;
        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_next_cursor() {
        let page: Page<Posting> =
            serde_json::from_str(r#"{"data": [], "next": "abc", "hasNext": true}"#).unwrap();
        assert_eq!(page.next_cursor(), Some("abc"));

        let page: Page<Posting> =
            serde_json::from_str(r#"{"data": [], "next": "abc", "hasNext": false}"#).unwrap();
        assert_eq!(page.next_cursor(), None);

        let page: Page<Posting> = serde_json::from_str(r#"{"data": [], "next": ""}"#).unwrap();
        assert_eq!(page.next_cursor(), None);

        let page: Page<Posting> = serde_json::from_str(r#"{}"#).unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.next_cursor(), None);
    }

    #[test]
    fn test_opportunity_parsing() {
        let raw = r#"{
            "id": "opp-1",
            "name": "Ada Lovelace",
            "emails": ["ada@x.com", "ada@y.com"],
            "location": "London",
            "headline": "Mathematician",
            "stage": {"id": "stage-1", "text": "New lead"},
            "origin": "sourced",
            "createdAt": 1700000000000,
            "updatedAt": 1700000100000,
            "archived": {"archivedAt": 1700000200000, "reason": "r1"},
            "applications": ["app-1"]
        }"#;
        let opp: Opportunity = serde_json::from_str(raw).unwrap();
        assert_eq!(opp.stage_text(), "New lead");
        assert!(opp.is_archived());
        assert_eq!(opp.updated_at, Some(1_700_000_100_000));

        let opp: Opportunity =
            serde_json::from_str(r#"{"id": "opp-2", "stage": "stage-9", "archived": null}"#).unwrap();
        assert_eq!(opp.stage_text(), "stage-9");
        assert!(!opp.is_archived());
        assert!(opp.emails.is_empty());
    }

    #[test]
    fn test_profile_link_shapes() {
        let detail: CandidateDetail = serde_json::from_str(
            r#"{"links": ["https://a.example", {"url": "https://b.example"}, {"label": "x"}, 42],
                "emails": ["a@x.com"]}"#,
        )
        .unwrap();
        let urls: Vec<Option<&str>> = detail.links.iter().map(ProfileLink::url).collect();
        assert_eq!(
            urls,
            vec![Some("https://a.example"), Some("https://b.example"), None, None]
        );
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = Config::from_lookup(|_| None).unwrap();
        let err = LeverClient::new(&config).unwrap_err();
        assert!(err.to_string().contains("LEVER_API_KEY"));
    }
}

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A candidate as stored in the raw snapshot file.
///
/// Upstream-owned fields are refreshed on every fetch. `already_processed`,
/// `unprocessable`, `enrich_failures`, `linkedin_url` and `all_emails` belong to
/// the enrich stage and survive merges untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default, deserialize_with = "nullable")]
    pub candidate_id: String,
    #[serde(default = "unknown_name", deserialize_with = "nullable_name")]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub location: String,
    #[serde(default, deserialize_with = "nullable")]
    pub headline: String,
    #[serde(default, deserialize_with = "stage_text")]
    pub stage: String,
    #[serde(default, deserialize_with = "nullable")]
    pub origin: String,
    #[serde(rename = "createdAt", default, deserialize_with = "timestamp")]
    pub created_at: Option<i64>,
    #[serde(rename = "updatedAt", default, deserialize_with = "timestamp")]
    pub updated_at: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    pub archived: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub applications: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub posting_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub posting_title: String,

    // --- Enrichment state ---
    #[serde(default, deserialize_with = "nullable")]
    pub already_processed: bool,
    /// Set together with `already_processed` when the record can never be
    /// enriched (no identifier, or retry cap reached).
    #[serde(default, skip_serializing_if = "is_false")]
    pub unprocessable: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub enrich_failures: u32,
    #[serde(default, deserialize_with = "nullable")]
    pub linkedin_url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub all_emails: Vec<String>,

    /// Keys this version does not know about, kept so a rewrite never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CandidateRecord {
    pub fn has_identifier(&self) -> bool {
        !self.candidate_id.trim().is_empty()
    }

    pub fn to_filtered(&self) -> FilteredCandidate {
        FilteredCandidate {
            name: self.name.clone(),
            all_emails: self.all_emails.clone(),
            location: self.location.clone(),
            linkedin_url: self.linkedin_url.clone(),
        }
    }
}

/// Projection handed from the enrich stage to the sync stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredCandidate {
    #[serde(default = "unknown_name", deserialize_with = "nullable_name")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub all_emails: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub location: String,
    #[serde(default, deserialize_with = "nullable")]
    pub linkedin_url: String,
}

fn unknown_name() -> String {
    "Unknown".to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

// Older snapshots wrote `null` where we now expect empty values.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(unknown_name))
}

/// Epoch millis. Older snapshots wrote `""` for a missing value and some
/// tools write the number as a string.
fn timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Millis(millis)) => Some(millis),
        Some(Raw::Text(text)) => text.trim().parse().ok(),
        None => None,
    })
}

// Stage is usually an id, but an expanded stage object may have been stored verbatim.
fn stage_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => text,
        Some(Value::Object(map)) => map
            .get("text")
            .or_else(|| map.get("id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    })
}

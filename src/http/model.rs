//! Payloads exchanged with the remote job API.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Body of every status change sent for steplets, steps and cluster nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn new(status_code: i64) -> Self {
        Self {
            status_code,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn started_now(self) -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..self
        }
    }

    pub fn ended_now(self) -> Self {
        Self {
            ended_at: Some(Utc::now()),
            ..self
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NextStepsQuery<'a> {
    pub affinity_group: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NextSteps {
    #[serde(default, deserialize_with = "ids")]
    pub step_ids: Vec<String>,
}

/// A node-targeted piece of a step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubUnit {
    #[serde(deserialize_with = "id")]
    pub id: String,
    #[serde(deserialize_with = "id")]
    pub step_id: String,
    #[serde(deserialize_with = "id")]
    pub pipeline_id: String,
}

/// Remote identifiers are numbers on some endpoints and strings on others.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

impl From<RawId> for String {
    fn from(value: RawId) -> Self {
        match value {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

fn id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

fn ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Vec::<RawId>::deserialize(deserializer)?
        .into_iter()
        .map(String::from)
        .collect())
}

//! External collaborators consulted by the processor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LookupError;
use crate::types::Rating;

/// Submission metadata as returned by the Submission API.
///
/// Every field the processor depends on is optional here; the processor
/// decides which absences are fatal for which event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub challenge_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub member_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub legacy_submission_id: Option<i64>,
}

/// Ids arrive as JSON numbers or numeric strings depending on the producer.
fn lenient_id<'de, D>(de: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(de)?;
    Ok(match v {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

#[async_trait]
pub trait SubmissionLookup: Send + Sync {
    async fn submission(&self, submission_id: &str) -> Result<SubmissionRecord, LookupError>;
}

/// Prior rating source used at phase end.
///
/// Implementations return [`Rating::default`] when the contestant has no
/// rating record; `Err` is reserved for the source itself failing.
#[async_trait]
pub trait RatingLookup: Send + Sync {
    async fn rating(&self, coder_id: i64) -> Result<Rating, LookupError>;
}

//! Inbound message envelope and the four event payload shapes.
//!
//! Validation happens here, before any transaction begins. Unknown keys are
//! allowed everywhere; required keys must be present and well-typed.
//!
//! Id rules: a positive integer, given as a JSON number or a numeric string.
//! String-id rules (`submissionId`, `typeId`): a non-empty string, or a
//! positive integer rendered as a string.
//!
//! The envelope `timestamp` is an RFC 3339 string or a JSON number of epoch
//! milliseconds.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::EngineError;

/// Envelope every broker message arrives in.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
    pub topic: String,
    pub originator: String,
    pub timestamp: DateTime<FixedOffset>,
    pub mime_type: String,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationEvent {
    pub challenge_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewEvent {
    pub submission_id: String,
    pub type_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateScoreEvent {
    pub submission_id: String,
    pub aggregate_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseEndEvent {
    pub project_id: i64,
    pub phase_type_name: String,
    pub state: String,
}

impl MessageEnvelope {
    pub fn parse(message: &Value) -> Result<Self, EngineError> {
        let obj = as_object(message, "message")?;
        let timestamp = required_timestamp(obj, "timestamp")?;
        let payload = obj
            .get("payload")
            .ok_or_else(|| missing("payload"))
            .and_then(|v| as_object(v, "payload"))?
            .clone();

        Ok(Self {
            topic: required_str(obj, "topic")?,
            originator: required_str(obj, "originator")?,
            timestamp,
            mime_type: required_str(obj, "mime-type")?,
            payload,
        })
    }

    /// A string-valued payload key, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

impl RegistrationEvent {
    pub fn parse(payload: &Map<String, Value>) -> Result<Self, EngineError> {
        let data = payload
            .get("data")
            .ok_or_else(|| missing("data"))
            .and_then(|v| as_object(v, "data"))?;
        Ok(Self {
            challenge_id: required_id(data, "challengeId")?,
            user_id: required_id(data, "userId")?,
        })
    }
}

impl ReviewEvent {
    pub fn parse(payload: &Map<String, Value>) -> Result<Self, EngineError> {
        Ok(Self {
            submission_id: required_sid(payload, "submissionId")?,
            type_id: required_sid(payload, "typeId")?,
            score: required_number(payload, "score")?,
        })
    }
}

impl AggregateScoreEvent {
    pub fn parse(payload: &Map<String, Value>) -> Result<Self, EngineError> {
        Ok(Self {
            submission_id: required_sid(payload, "submissionId")?,
            aggregate_score: required_number(payload, "aggregateScore")?,
        })
    }
}

impl PhaseEndEvent {
    pub fn parse(payload: &Map<String, Value>) -> Result<Self, EngineError> {
        Ok(Self {
            project_id: required_id(payload, "projectId")?,
            phase_type_name: required_str(payload, "phaseTypeName")?,
            state: required_str(payload, "state")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn missing(key: &str) -> EngineError {
    EngineError::Validation(format!("\"{key}\" is required"))
}

fn as_object<'a>(v: &'a Value, key: &str) -> Result<&'a Map<String, Value>, EngineError> {
    v.as_object()
        .ok_or_else(|| EngineError::Validation(format!("\"{key}\" must be an object")))
}

fn required_timestamp(
    obj: &Map<String, Value>,
    key: &str,
) -> Result<DateTime<FixedOffset>, EngineError> {
    let not_a_date = |detail: String| {
        EngineError::Validation(format!("\"{key}\" must be a date: {detail}"))
    };
    match obj.get(key) {
        Some(Value::Number(n)) => {
            let millis = n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
                .ok_or_else(|| not_a_date(n.to_string()))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .map(DateTime::<FixedOffset>::from)
                .ok_or_else(|| not_a_date(format!("{millis} is out of range")))
        }
        _ => {
            let raw = required_str(obj, key)?;
            DateTime::parse_from_rfc3339(&raw).map_err(|e| not_a_date(e.to_string()))
        }
    }
}

fn required_str(obj: &Map<String, Value>, key: &str) -> Result<String, EngineError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(missing(key)),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(EngineError::Validation(format!(
            "\"{key}\" is not allowed to be empty"
        ))),
        Some(_) => Err(EngineError::Validation(format!("\"{key}\" must be a string"))),
    }
}

fn required_id(obj: &Map<String, Value>, key: &str) -> Result<i64, EngineError> {
    let v = match obj.get(key) {
        None | Some(Value::Null) => return Err(missing(key)),
        Some(v) => v,
    };
    let id = match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match id {
        Some(id) if id >= 1 => Ok(id),
        _ => Err(EngineError::Validation(format!(
            "\"{key}\" must be a positive integer"
        ))),
    }
}

fn required_sid(obj: &Map<String, Value>, key: &str) -> Result<String, EngineError> {
    match obj.get(key) {
        Some(Value::Number(_)) => required_id(obj, key).map(|id| id.to_string()),
        _ => required_str(obj, key),
    }
}

fn required_number(obj: &Map<String, Value>, key: &str) -> Result<f64, EngineError> {
    let v = match obj.get(key) {
        None | Some(Value::Null) => return Err(missing(key)),
        Some(v) => v,
    };
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|x| x.is_finite())
        .ok_or_else(|| EngineError::Validation(format!("\"{key}\" must be a number")))
}

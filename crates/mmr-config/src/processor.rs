//! Typed processor configuration.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mmr_ledger::{PhaseEndPolicy, ProcessorSettings, Topics, COMPONENT_STATE_SEQ};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub topics: TopicsConfig,
    pub review: ReviewConfig,
    pub ledger: LedgerConfig,
    pub submission_api: SubmissionApiConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub challenge_notification_events: String,
    pub submission_notification_aggregate: String,
    pub notification_autopilot_events: String,
    pub submission_notification_create: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        let t = Topics::default();
        Self {
            challenge_notification_events: t.challenge_notification_events,
            submission_notification_aggregate: t.submission_notification_aggregate,
            notification_autopilot_events: t.notification_autopilot_events,
            submission_notification_create: t.submission_notification_create,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Review-type names resolved to ids through the Submission API at startup.
    pub ignored_review_types: Vec<String>,
    /// Ids ignored without a lookup.
    pub ignored_review_type_ids: Vec<String>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            ignored_review_types: vec!["AV Scan".to_string()],
            ignored_review_type_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub component_state_sequence: String,
    pub round_type_id: i32,
    pub rating_type_id: i32,
    pub language_id: i32,
    pub submission_time_zone: String,
    pub scoring_phase_name: String,
    pub phase_end_state: String,
    /// `recompute` or `skip_placed`.
    pub phase_end_policy: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let s = ProcessorSettings::default();
        Self {
            component_state_sequence: COMPONENT_STATE_SEQ.to_string(),
            round_type_id: s.round_type_id,
            rating_type_id: 3,
            language_id: s.language_id,
            submission_time_zone: s.submission_time_zone.name().to_string(),
            scoring_phase_name: s.scoring_phase_name,
            phase_end_state: s.phase_end_state,
            phase_end_policy: "recompute".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionApiConfig {
    pub base_url: String,
    pub auth: Option<AuthConfig>,
}

impl Default for SubmissionApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            auth: None,
        }
    }
}

/// OAuth2 client-credentials settings. Holds env var NAMES, not values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token_url: String,
    pub audience: String,
    pub client_id_env: String,
    pub client_secret_env: String,
    #[serde(default = "default_token_cache_secs")]
    pub token_cache_secs: u64,
}

fn default_token_cache_secs() -> u64 {
    86_000
}

impl AuthConfig {
    pub fn cache_for(&self) -> Duration {
        Duration::from_secs(self.token_cache_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Name of the env var holding the Postgres URL.
    pub url_env: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url_env: "MMR_DATABASE_URL".to_string(),
        }
    }
}

impl ProcessorConfig {
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let cfg: ProcessorConfig = serde_json::from_value(config_json.clone())
            .context("processor config does not match the expected shape")?;
        // Fail at load time rather than on the first event.
        cfg.ledger.time_zone()?;
        cfg.ledger.policy()?;
        Ok(cfg)
    }

    pub fn topics(&self) -> Topics {
        Topics {
            challenge_notification_events: self.topics.challenge_notification_events.clone(),
            submission_notification_aggregate: self
                .topics
                .submission_notification_aggregate
                .clone(),
            notification_autopilot_events: self.topics.notification_autopilot_events.clone(),
            submission_notification_create: self.topics.submission_notification_create.clone(),
        }
    }

    /// Processor settings; `resolved_ignored_ids` are the ids looked up from
    /// `review.ignored_review_types` and join the configured ids.
    pub fn processor_settings(
        &self,
        resolved_ignored_ids: impl IntoIterator<Item = String>,
    ) -> Result<ProcessorSettings> {
        let mut ignored: HashSet<String> =
            self.review.ignored_review_type_ids.iter().cloned().collect();
        ignored.extend(resolved_ignored_ids);

        Ok(ProcessorSettings {
            round_type_id: self.ledger.round_type_id,
            language_id: self.ledger.language_id,
            submission_time_zone: self.ledger.time_zone()?,
            scoring_phase_name: self.ledger.scoring_phase_name.clone(),
            phase_end_state: self.ledger.phase_end_state.clone(),
            ignored_review_type_ids: ignored,
            phase_end_policy: self.ledger.policy()?,
        })
    }
}

impl LedgerConfig {
    pub fn time_zone(&self) -> Result<Tz> {
        self.submission_time_zone
            .parse::<Tz>()
            .map_err(|e| anyhow!("invalid ledger.submission_time_zone: {e}"))
    }

    pub fn policy(&self) -> Result<PhaseEndPolicy> {
        match self.phase_end_policy.trim().to_ascii_lowercase().as_str() {
            "recompute" => Ok(PhaseEndPolicy::Recompute),
            "skip_placed" => Ok(PhaseEndPolicy::SkipPlaced),
            other => Err(anyhow!(
                "invalid ledger.phase_end_policy '{}'. expected one of: recompute | skip_placed",
                other
            )),
        }
    }
}

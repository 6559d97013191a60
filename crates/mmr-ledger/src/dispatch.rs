//! Topic routing for inbound broker messages.
//!
//! The envelope and the selected payload are validated here, before a
//! handler (and therefore a transaction) runs. Messages on a known topic
//! that carry the wrong `type`, `originalTopic` or `resource` are ignored.

use serde_json::Value;
use tracing::info;

use crate::error::EngineError;
use crate::processor::{EventProcessor, IgnoreReason, Outcome};
use crate::schema::{
    AggregateScoreEvent, MessageEnvelope, PhaseEndEvent, RegistrationEvent, ReviewEvent,
};
use crate::store::LedgerStore;

pub const USER_REGISTRATION: &str = "USER_REGISTRATION";
pub const RESOURCE_REVIEW: &str = "review";
pub const RESOURCE_REVIEW_SUMMATION: &str = "reviewSummation";

/// What the dispatch loop reports for one message.
pub type DispatchOutcome = Outcome;

/// Broker topic names the dispatcher routes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub challenge_notification_events: String,
    pub submission_notification_aggregate: String,
    pub notification_autopilot_events: String,
    /// Expected `originalTopic` of aggregate messages; never subscribed to.
    pub submission_notification_create: String,
}

impl Topics {
    /// Topics a consumer subscribes to for this dispatcher.
    pub fn subscribed(&self) -> [&str; 3] {
        [
            &self.challenge_notification_events,
            &self.submission_notification_aggregate,
            &self.notification_autopilot_events,
        ]
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            challenge_notification_events: "challenge.notification.events".to_string(),
            submission_notification_aggregate: "submission.notification.aggregate".to_string(),
            notification_autopilot_events: "notifications.autopilot.events".to_string(),
            submission_notification_create: "submission.notification.create".to_string(),
        }
    }
}

/// Event kind selected by the router, with its validated payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Registration(RegistrationEvent),
    Review(ReviewEvent),
    AggregateScore(AggregateScoreEvent),
    PhaseEnd(PhaseEndEvent),
    Ignored(IgnoreReason),
}

/// Pick the handler for an envelope and validate its payload.
pub fn route(topics: &Topics, env: &MessageEnvelope) -> Result<Routed, EngineError> {
    if env.topic == topics.challenge_notification_events {
        if env.payload_str("type") != Some(USER_REGISTRATION) {
            return Ok(Routed::Ignored(IgnoreReason::NotUserRegistration));
        }
        return RegistrationEvent::parse(&env.payload).map(Routed::Registration);
    }

    if env.topic == topics.submission_notification_aggregate {
        if env.payload_str("originalTopic") != Some(topics.submission_notification_create.as_str())
        {
            return Ok(Routed::Ignored(IgnoreReason::OriginalTopicMismatch));
        }
        return match env.payload_str("resource") {
            Some(RESOURCE_REVIEW) => ReviewEvent::parse(&env.payload).map(Routed::Review),
            Some(RESOURCE_REVIEW_SUMMATION) => {
                AggregateScoreEvent::parse(&env.payload).map(Routed::AggregateScore)
            }
            _ => Ok(Routed::Ignored(IgnoreReason::ResourceMismatch)),
        };
    }

    PhaseEndEvent::parse(&env.payload).map(Routed::PhaseEnd)
}

pub struct Dispatcher<S: LedgerStore> {
    processor: EventProcessor<S>,
    topics: Topics,
}

impl<S: LedgerStore> Dispatcher<S> {
    pub fn new(processor: EventProcessor<S>, topics: Topics) -> Self {
        Self { processor, topics }
    }

    pub fn processor(&self) -> &EventProcessor<S> {
        &self.processor
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Validate, route and apply one raw message.
    pub async fn dispatch(&self, message: &Value) -> Result<DispatchOutcome, EngineError> {
        let env = MessageEnvelope::parse(message)?;
        match route(&self.topics, &env)? {
            Routed::Registration(ev) => self.processor.process_registration(&ev).await,
            Routed::Review(ev) => self.processor.process_review(&ev).await,
            Routed::AggregateScore(ev) => self.processor.process_aggregate_score(&ev).await,
            Routed::PhaseEnd(ev) => self.processor.process_phase_end(&ev).await,
            Routed::Ignored(reason) => {
                info!(topic = %env.topic, %reason, "ignore message");
                Ok(Outcome::Ignored(reason))
            }
        }
    }
}

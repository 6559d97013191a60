//! Error taxonomy for the reconciliation engine.
//!
//! Ignorable mismatches are NOT errors; they surface as
//! [`Outcome::Ignored`](crate::Outcome). Everything here propagates to the
//! dispatch loop, which owns retry and dead-letter policy.

use thiserror::Error;

/// Errors raised by a Ledger Store or sequence store implementation.
///
/// `Duplicate` is structural: implementations map the backend's unique-key
/// violation onto it. Callers must never infer it from message text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        StoreError::Backend(msg.into())
    }
}

/// Failure reported by the submission lookup collaborator.
///
/// `message` is the collaborator's own message, passed through verbatim.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct LookupError {
    pub status: Option<u16>,
    pub message: String,
}

impl LookupError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

/// Coarse classification the dispatch loop can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Payload failed its schema; rejected before any transaction began.
    Validation,
    /// A row that must already exist does not (e.g. review before registration).
    Precondition,
    /// A create collided with an existing unique key.
    Duplicate,
    /// Submission or rating lookup failed.
    Collaborator,
    /// Durable identifier block refill failed; the in-memory cursor is unchanged.
    Allocator,
    /// Any other ledger store failure.
    Store,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Precondition => "PRECONDITION",
            ErrorKind::Duplicate => "DUPLICATE",
            ErrorKind::Collaborator => "COLLABORATOR",
            ErrorKind::Allocator => "ALLOCATOR",
            ErrorKind::Store => "STORE",
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("{0}")]
    Collaborator(String),

    #[error("id allocation failed: {0}")]
    Allocator(StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Precondition(_) => ErrorKind::Precondition,
            EngineError::Collaborator(_) => ErrorKind::Collaborator,
            EngineError::Allocator(_) => ErrorKind::Allocator,
            EngineError::Store(StoreError::Duplicate { .. }) => ErrorKind::Duplicate,
            EngineError::Store(_) => ErrorKind::Store,
        }
    }

    /// True when the event collided with rows it would have created; the
    /// dispatch loop may treat this as already applied.
    pub fn is_duplicate(&self) -> bool {
        self.kind() == ErrorKind::Duplicate
    }
}

impl From<LookupError> for EngineError {
    fn from(e: LookupError) -> Self {
        EngineError::Collaborator(e.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_store_error_classifies_as_duplicate() {
        let e: EngineError = StoreError::Duplicate {
            entity: "long_component_state",
            key: "round_id=1 coder_id=2".to_string(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::Duplicate);
        assert!(e.is_duplicate());
        assert_eq!(
            e.to_string(),
            "duplicate long_component_state: round_id=1 coder_id=2"
        );
    }

    #[test]
    fn backend_error_is_not_duplicate_even_if_message_says_so() {
        let e: EngineError = StoreError::backend("duplicate key value violates unique").into();
        assert_eq!(e.kind(), ErrorKind::Store);
        assert!(!e.is_duplicate());
    }

    #[test]
    fn allocator_failure_has_its_own_kind() {
        let e = EngineError::Allocator(StoreError::backend("connection reset"));
        assert_eq!(e.kind(), ErrorKind::Allocator);
        assert_eq!(e.to_string(), "id allocation failed: store error: connection reset");
    }

    #[test]
    fn lookup_error_message_passes_through() {
        let e: EngineError = LookupError::with_status(404, "Submission not found").into();
        assert_eq!(e.kind(), ErrorKind::Collaborator);
        assert_eq!(e.to_string(), "Submission not found");
    }
}

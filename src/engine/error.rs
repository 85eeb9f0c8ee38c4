use crate::model::BookingId;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input: non-positive ids, `start >= end`, missing fields.
    Validation(String),
    NotFound(BookingId),
    /// Carries the id of the existing booking the candidate overlaps.
    Conflict(BookingId),
    LimitExceeded(&'static str),
    /// Outcome unknown: callers should re-query before retrying a create.
    Storage(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(id) => write!(f, "no booking found with id {id}"),
            EngineError::Conflict(id) => write!(f, "period overlaps existing booking {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Storage(other),
        }
    }
}

use ulid::Ulid;

use crate::model::{format_day, Day};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input, caught before any state change.
    Invalid(&'static str),
    /// Referenced campsite/equipment/booking missing or deactivated.
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Admission failed: the first violating day plus remaining quantity at
    /// the time of failure.
    CapacityExceeded {
        resource_id: Ulid,
        day: Day,
        remaining: u32,
    },
    /// Caller is neither the booking's owner nor an admin.
    Forbidden,
    /// Equipment still referenced by a booking attachment.
    Conflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::CapacityExceeded { resource_id, day, remaining } => {
                write!(
                    f,
                    "capacity exceeded on {} for {resource_id}: remaining {remaining}",
                    format_day(*day)
                )
            }
            EngineError::Forbidden => write!(f, "forbidden"),
            EngineError::Conflict(id) => {
                write!(f, "equipment {id} is still referenced by a booking")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

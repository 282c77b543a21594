use ulid::Ulid;

use crate::model::{AppointmentStatus, ParseError};
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or incomplete booking input.
    Validation(String),
    UnknownProfessional(String),
    UnknownService(String),
    NotEligible {
        professional_id: String,
        service_id: String,
    },
    /// Requested interval overlaps the given confirmed or blocked appointment.
    Conflict(Ulid),
    /// The store's uniqueness backstop rejected the write.
    SlotTaken,
    NotFound(Ulid),
    InvalidTransition {
        id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    LimitExceeded(&'static str),
    Store(StoreError),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_) | EngineError::SlotTaken)
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::UnknownProfessional(_)
                | EngineError::UnknownService(_)
                | EngineError::NotEligible { .. }
                | EngineError::LimitExceeded(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid appointment: {msg}"),
            EngineError::UnknownProfessional(id) => write!(f, "unknown professional: {id}"),
            EngineError::UnknownService(id) => write!(f, "unknown service: {id}"),
            EngineError::NotEligible {
                professional_id,
                service_id,
            } => write!(f, "professional {professional_id} does not perform service {service_id}"),
            EngineError::Conflict(id) => {
                write!(f, "slot unavailable: conflicts with appointment {id}")
            }
            EngineError::SlotTaken => write!(f, "slot unavailable: already booked"),
            EngineError::NotFound(id) => write!(f, "appointment not found: {id}"),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "appointment {id} cannot go from {from} to {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ParseError> for EngineError {
    fn from(e: ParseError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => EngineError::SlotTaken,
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Store(other),
        }
    }
}

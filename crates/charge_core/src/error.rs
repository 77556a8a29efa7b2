use thiserror::Error;

use crate::models::{PileClass, RequestId, RequestStatus};

/// Coarse error categories exposed to callers of the dispatch engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    CapacityExceeded,
    InvalidState,
    ClassMismatch,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Request {request_id} not found")]
    RequestNotFound { request_id: RequestId },
    #[error("Pile {pile} not found")]
    PileNotFound { pile: String },
    #[error("Waiting area is full ({capacity} requests)")]
    WaitingAreaFull { capacity: usize },
    #[error("Queue of pile {pile} is full ({capacity} requests)")]
    PileQueueFull { pile: String, capacity: usize },
    #[error("Cannot {operation} request {request_id} in state {status:?}")]
    InvalidState {
        request_id: RequestId,
        status: RequestStatus,
        operation: &'static str,
    },
    #[error("Cannot {operation} pile {pile}: {reason}")]
    InvalidPileState {
        pile: String,
        operation: &'static str,
        reason: String,
    },
    #[error("Request class {request:?} does not match pile {pile} of class {pile_class:?}")]
    ClassMismatch {
        request: PileClass,
        pile: String,
        pile_class: PileClass,
    },
    #[error("Invalid energy amount {amount}")]
    InvalidAmount { amount: f64 },
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::RequestNotFound { .. } | DispatchError::PileNotFound { .. } => {
                ErrorKind::NotFound
            }
            DispatchError::WaitingAreaFull { .. } | DispatchError::PileQueueFull { .. } => {
                ErrorKind::CapacityExceeded
            }
            DispatchError::InvalidState { .. }
            | DispatchError::InvalidPileState { .. }
            | DispatchError::InvalidAmount { .. } => ErrorKind::InvalidState,
            DispatchError::ClassMismatch { .. } => ErrorKind::ClassMismatch,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Pile code {code} is declared more than once")]
    DuplicatePile { code: String },
    #[error("Pile {code} must have a positive power, got {power}")]
    InvalidPower { code: String, power: f64 },
    #[error("{field} must be greater than zero")]
    ZeroCapacity { field: &'static str },
}

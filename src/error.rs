// src/error.rs
//
// =============================================================================
// GRIDMASTER: ERROR TAXONOMY
// =============================================================================
//
// One enum for everything the supervisors can refuse to do. The API layer
// maps each variant to an HTTP status; the scheduler contains
// `InvalidQuantity` inside its tick and never surfaces it over HTTP.

use crate::core::JobStatus;
use crate::resources::QuantityError;
use thiserror::Error;

pub type MasterResult<T> = Result<T, MasterError>;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("worker {0} not registered")]
    UnknownWorker(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    InvalidQuantity(#[from] QuantityError),

    #[error("job {id} is {from} and cannot transition to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("missing X-API-Key header")]
    Unauthenticated,

    #[error("invalid API key")]
    Forbidden,

    #[error("internal error: {0}")]
    Internal(String),
}

impl MasterError {
    /// Stable machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            MasterError::JobNotFound(_) | MasterError::NodeNotFound(_) => "NOT_FOUND",
            MasterError::UnknownWorker(_) => "UNKNOWN_WORKER",
            MasterError::Validation(_) => "VALIDATION",
            MasterError::InvalidQuantity(_) => "INVALID_QUANTITY",
            MasterError::InvalidTransition { .. } => "INVALID_TRANSITION",
            MasterError::Unauthenticated => "UNAUTHENTICATED",
            MasterError::Forbidden => "FORBIDDEN",
            MasterError::Internal(_) => "INTERNAL",
        }
    }
}

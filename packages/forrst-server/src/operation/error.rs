//! Errors raised by the operation store and manager.

use forrst_core::ForrstError;

use super::record::OperationStatus;

/// Failure reported by an [`OperationRepository`](super::OperationRepository).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("operation {id} belongs to another owner")]
    Forbidden { id: String },
    #[error("operation store failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Failure of an [`AsyncOperationManager`](super::AsyncOperationManager) call.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("operation not found: {id}")]
    NotFound { id: String },

    #[error("operation {id} belongs to another owner")]
    Forbidden { id: String },

    #[error("operation {id} cannot be cancelled in status {status}")]
    CannotCancel { id: String, status: OperationStatus },

    #[error("operation {id} is {status}; cannot {action}")]
    InvalidState {
        id: String,
        status: OperationStatus,
        action: &'static str,
    },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("metadata is {size} bytes, limit is {limit}")]
    MetadataTooLarge { size: usize, limit: usize },

    #[error("invalid callback url: {reason}")]
    InvalidCallbackUrl { reason: String },

    #[error("operation {id} was modified concurrently")]
    Conflict { id: String },

    #[error("no unique operation id after {attempts} attempts")]
    IdSpaceExhausted { attempts: u32 },

    #[error("operation store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Forbidden { id } => Self::Forbidden { id },
            StoreError::Backend(err) => Self::Store(err),
        }
    }
}

impl From<OperationError> for ForrstError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::NotFound { id } => ForrstError::OperationNotFound { id },
            OperationError::Forbidden { .. } => ForrstError::Forbidden {
                message: err.to_string(),
            },
            OperationError::CannotCancel { id, status } => ForrstError::OperationCannotCancel {
                id,
                status: status.to_string(),
            },
            OperationError::InvalidState { id, status, action } => {
                ForrstError::InvalidOperationState {
                    id,
                    status: status.to_string(),
                    action: action.to_string(),
                }
            }
            OperationError::InvalidArgument { .. }
            | OperationError::MetadataTooLarge { .. }
            | OperationError::InvalidCallbackUrl { .. } => {
                ForrstError::invalid_arguments(err.to_string())
            }
            OperationError::Conflict { .. } => ForrstError::Conflict {
                message: err.to_string(),
            },
            OperationError::IdSpaceExhausted { .. } => {
                ForrstError::Internal(anyhow::anyhow!(err.to_string()))
            }
            OperationError::Store(err) => ForrstError::Internal(err),
        }
    }
}

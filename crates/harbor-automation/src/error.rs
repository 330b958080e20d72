use harbor_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("message {0} not found")]
    MessageNotFound(Uuid),
    #[error("invalid snooze: {0}")]
    InvalidSnooze(String),
}

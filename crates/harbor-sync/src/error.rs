use harbor_automation::AutomationError;
use harbor_provider::ProviderError;
use harbor_security::SecurityError;
use harbor_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no credentials stored for account {0}")]
    MissingCredentials(Uuid),
    #[error("timed out waiting for the credential lock of account {0}")]
    LockTimeout(Uuid),
    /// The provider rejected the refresh; the user has to sign in again.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("security error: {0}")]
    Security(#[from] SecurityError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl TokenError {
    /// Errors that only user action can clear.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::RefreshFailed(_) | Self::MissingCredentials(_))
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("account {0} not found")]
    AccountNotFound(Uuid),
    #[error("account {0} is archived")]
    AccountArchived(Uuid),
    #[error("message {0} not found")]
    MessageNotFound(Uuid),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("security error: {0}")]
    Security(#[from] SecurityError),
    #[error("automation error: {0}")]
    Automation(#[from] AutomationError),
}

mod accounts;
mod error;
mod mailbox;
mod orchestrator;
mod scheduler;
mod tokens;

pub use accounts::AccountService;
pub use error::{SyncError, TokenError};
pub use mailbox::MailboxService;
pub use orchestrator::{SyncOrchestrator, SyncReport, SyncSettings};
pub use scheduler::{CycleSummary, SchedulerSettings, SyncScheduler};
pub use tokens::{TokenManager, TokenSettings, REAUTH_MESSAGE};

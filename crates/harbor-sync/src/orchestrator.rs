use crate::tokens::{TokenManager, REAUTH_MESSAGE};
use crate::SyncError;
use harbor_automation::{AutomationEngine, AutomationEvent, DEFAULT_ERROR_THRESHOLD};
use harbor_core::{EmailAccount, MessageChange, NormalizedMessage, SyncKind, SyncStatus};
use harbor_provider::{DeltaResult, ListQuery, MailboxAccess, ProviderAdapter, ProviderError, ProviderRegistry};
use harbor_storage::{Storage, UpsertOutcome};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub initial_page_size: u32,
    pub contact_limit: u32,
    pub error_threshold: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            initial_page_size: 50,
            contact_limit: 100,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }
}

/// Counters for one sync run of one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub folders: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub contacts: u32,
    /// The stored cursor had expired and the mailbox was re-listed.
    pub resynced: bool,
    /// The account was not in a syncable state; nothing ran.
    pub skipped: bool,
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    storage: Storage,
    registry: ProviderRegistry,
    tokens: TokenManager,
    automation: AutomationEngine,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        storage: Storage,
        registry: ProviderRegistry,
        tokens: TokenManager,
        automation: AutomationEngine,
        settings: SyncSettings,
    ) -> Self {
        Self {
            storage,
            registry,
            tokens,
            automation: automation.with_error_threshold(settings.error_threshold),
            settings,
        }
    }

    pub fn automation(&self) -> &AutomationEngine {
        &self.automation
    }

    // -- initial sync ---------------------------------------------------------

    /// Folders, the first page of messages and a best-effort contact import.
    /// Any failure leaves the account in `error` with a user-facing message.
    pub async fn initial_sync(&self, account_id: Uuid) -> Result<SyncReport, SyncError> {
        let account = self.load_account(account_id).await?;
        self.storage
            .set_sync_status(account.id, SyncStatus::Syncing, None)
            .await?;

        match self.run_initial(&account).await {
            Ok(report) => {
                self.storage.mark_account_synced(account.id).await?;
                info!(
                    account_id = %account.id,
                    folders = report.folders,
                    messages = report.created + report.updated,
                    contacts = report.contacts,
                    "initial sync complete"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(account_id = %account.id, error = %err, "initial sync failed");
                let flagged = if is_credential_error(&err) {
                    self.escalate_credential_error(&account).await
                } else {
                    self.storage
                        .set_sync_status(account.id, SyncStatus::Error, Some(&account_message(&err)))
                        .await
                        .map_err(SyncError::from)
                };
                if let Err(flag_err) = flagged {
                    warn!(account_id = %account.id, error = %flag_err, "failed to flag account");
                }
                Err(err)
            }
        }
    }

    async fn run_initial(&self, account: &EmailAccount) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let access = self.tokens.access_for(account).await?;
        let adapter = self.registry.adapter(account.provider)?;

        report.folders = self.sync_folders(account, adapter.as_ref(), &access).await?;

        let baseline = self.relist_messages(account, adapter.as_ref(), &access, &mut report).await?;
        self.storage
            .record_checkpoint_success(account.id, SyncKind::Messages, Some(&baseline.new_cursor))
            .await?;

        match self.sync_contacts(account, adapter.as_ref(), &access).await {
            Ok(merged) => report.contacts = merged,
            Err(err) => {
                warn!(account_id = %account.id, error = %err, "contact import failed; continuing");
                if let Err(err) = self
                    .storage
                    .record_checkpoint_failure(account.id, SyncKind::Contacts, &err.to_string())
                    .await
                {
                    warn!(account_id = %account.id, error = %err, "failed to record contact checkpoint");
                }
            }
        }

        Ok(report)
    }

    pub async fn sync_folders(
        &self,
        account: &EmailAccount,
        adapter: &dyn ProviderAdapter,
        access: &MailboxAccess,
    ) -> Result<usize, SyncError> {
        let folders = adapter.list_folders(access).await?;
        for folder in &folders {
            self.storage.upsert_folder(account.id, folder).await?;
        }
        self.storage
            .record_checkpoint_success(account.id, SyncKind::Folders, None)
            .await?;
        Ok(folders.len())
    }

    async fn sync_contacts(
        &self,
        account: &EmailAccount,
        adapter: &dyn ProviderAdapter,
        access: &MailboxAccess,
    ) -> Result<u32, SyncError> {
        let contacts = adapter.list_contacts(access, self.settings.contact_limit).await?;
        let mut merged = 0;
        for contact in &contacts {
            merged += self.storage.merge_provider_contact(account.user_id, contact).await?;
        }
        self.storage
            .record_checkpoint_success(account.id, SyncKind::Contacts, None)
            .await?;
        Ok(merged)
    }

    /// Takes a delta baseline, then lists and stores the newest page. The
    /// baseline comes first so mail arriving during the listing is picked
    /// up by the next delta run.
    async fn relist_messages(
        &self,
        account: &EmailAccount,
        adapter: &dyn ProviderAdapter,
        access: &MailboxAccess,
        report: &mut SyncReport,
    ) -> Result<DeltaResult, SyncError> {
        let baseline = adapter.delta_sync(access, None).await?;

        let page = adapter
            .list_messages(
                access,
                &ListQuery {
                    limit: self.settings.initial_page_size,
                    ..ListQuery::default()
                },
            )
            .await?;
        for message in page.messages {
            let outcome = self.persist_message(account, message).await?;
            if outcome.inserted {
                report.created += 1;
            } else {
                report.updated += 1;
            }
        }

        Ok(baseline)
    }

    // -- delta sync -----------------------------------------------------------

    /// Applies provider changes since the stored cursor. Accounts in `error`
    /// or `paused` are skipped. Failures are counted on the checkpoint and
    /// escalated once they reach the threshold.
    pub async fn delta_sync(&self, account_id: Uuid) -> Result<SyncReport, SyncError> {
        let account = self.load_account(account_id).await?;
        if matches!(account.sync_status, SyncStatus::Error | SyncStatus::Paused) {
            debug!(%account_id, status = %account.sync_status, "delta sync skipped");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        }

        self.storage
            .set_sync_status(account.id, SyncStatus::Syncing, None)
            .await?;

        match self.run_delta(&account).await {
            Ok(report) => {
                self.storage.mark_account_synced(account.id).await?;
                debug!(
                    %account_id,
                    created = report.created,
                    updated = report.updated,
                    deleted = report.deleted,
                    resynced = report.resynced,
                    "delta sync complete"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(%account_id, error = %err, "delta sync failed");
                self.record_delta_failure(&account, &err).await;
                Err(err)
            }
        }
    }

    async fn run_delta(&self, account: &EmailAccount) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let cursor = self
            .storage
            .get_checkpoint(account.id, SyncKind::Messages)
            .await?
            .and_then(|checkpoint| checkpoint.cursor);

        let access = self.tokens.access_for(account).await?;
        let adapter = self.registry.adapter(account.provider)?;

        let delta = match adapter.delta_sync(&access, cursor.as_deref()).await {
            Ok(delta) => delta,
            Err(ProviderError::CursorExpired) => {
                warn!(account_id = %account.id, "sync cursor expired; relisting mailbox");
                self.storage
                    .clear_checkpoint_cursor(account.id, SyncKind::Messages)
                    .await?;
                report.resynced = true;
                self.relist_messages(account, adapter.as_ref(), &access, &mut report)
                    .await?
            }
            Err(err) => return Err(err.into()),
        };

        for change in delta.changes {
            self.apply_change(account, change, &mut report).await?;
        }

        self.storage
            .record_checkpoint_success(account.id, SyncKind::Messages, Some(&delta.new_cursor))
            .await?;
        Ok(report)
    }

    async fn apply_change(
        &self,
        account: &EmailAccount,
        change: MessageChange,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        match change {
            MessageChange::Deleted { provider_message_id } => {
                let archived = self
                    .storage
                    .archive_message_by_provider_id(account.id, &provider_message_id)
                    .await?;
                match archived {
                    Some(message) => {
                        report.deleted += 1;
                        self.automation
                            .dispatch(AutomationEvent::MessageDeleted {
                                account_id: account.id,
                                message_id: message.id,
                                folder_id: message.folder_id,
                            })
                            .await;
                    }
                    None => debug!(account_id = %account.id, "delete for a message never stored"),
                }
            }
            MessageChange::Created { message } | MessageChange::Updated { message } => {
                let outcome = self.persist_message(account, message).await?;
                if outcome.inserted {
                    report.created += 1;
                } else {
                    report.updated += 1;
                }
            }
        }
        Ok(())
    }

    /// Upserts under the (account, provider id) key and hands the stored row
    /// to the automation engine.
    async fn persist_message(
        &self,
        account: &EmailAccount,
        mut message: NormalizedMessage,
    ) -> Result<UpsertOutcome, SyncError> {
        message.account_id = account.id;
        if let Some(folder_id) = message.folder_id.as_deref() {
            if let Some(mapping) = self.storage.get_folder(account.id, folder_id).await? {
                message.folder_type = mapping.folder_type;
            }
        }

        let outcome = self.storage.upsert_message(&message).await?;
        let stored = self
            .storage
            .get_message(outcome.message_id)
            .await?
            .ok_or(SyncError::MessageNotFound(outcome.message_id))?;

        self.automation
            .dispatch(AutomationEvent::MessageReceived {
                user_id: account.user_id,
                message: stored,
                newly_inserted: outcome.inserted,
                previous_folder_id: outcome.previous_folder_id.clone(),
            })
            .await;

        Ok(outcome)
    }

    async fn record_delta_failure(&self, account: &EmailAccount, err: &SyncError) {
        if is_credential_error(err) {
            if let Err(flag_err) = self.escalate_credential_error(account).await {
                warn!(account_id = %account.id, error = %flag_err, "failed to flag account");
            }
            return;
        }

        let count = match self
            .storage
            .record_checkpoint_failure(account.id, SyncKind::Messages, &err.to_string())
            .await
        {
            Ok(count) => count,
            Err(storage_err) => {
                warn!(account_id = %account.id, error = %storage_err, "failed to record sync failure");
                if let Err(status_err) = self
                    .storage
                    .set_sync_status(account.id, SyncStatus::Idle, Some(&account_message(err)))
                    .await
                {
                    warn!(account_id = %account.id, error = %status_err, "failed to reset sync status");
                }
                return;
            }
        };

        self.automation
            .dispatch(AutomationEvent::SyncError {
                user_id: account.user_id,
                account_id: account.id,
                error_count: count,
                error: account_message(err),
            })
            .await;
    }

    /// Credential failures skip the error counter: the account is flagged and
    /// the reconnect notification queued right away.
    async fn escalate_credential_error(&self, account: &EmailAccount) -> Result<(), SyncError> {
        self.automation
            .handle(AutomationEvent::TokenRefreshFailed {
                user_id: account.user_id,
                account_id: account.id,
                error: REAUTH_MESSAGE.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn load_account(&self, account_id: Uuid) -> Result<EmailAccount, SyncError> {
        let account = self
            .storage
            .get_account(account_id)
            .await?
            .ok_or(SyncError::AccountNotFound(account_id))?;
        if !account.is_active() {
            return Err(SyncError::AccountArchived(account_id));
        }
        Ok(account)
    }
}

fn is_credential_error(err: &SyncError) -> bool {
    matches!(err, SyncError::Token(token) if token.requires_reauth())
}

/// Text safe to show on the account; raw provider bodies stay in the logs.
fn account_message(err: &SyncError) -> String {
    match err {
        SyncError::Token(token) if token.requires_reauth() => REAUTH_MESSAGE.to_string(),
        SyncError::Provider(provider) if provider.is_transient() => {
            "The mail provider is temporarily unavailable; sync will retry.".to_string()
        }
        SyncError::Provider(provider) if provider.is_unauthorized() => {
            "The mail provider refused access to this mailbox.".to_string()
        }
        _ => "Mailbox sync failed; sync will retry.".to_string(),
    }
}

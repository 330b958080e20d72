use crate::tokens::TokenManager;
use crate::SyncError;
use chrono::Utc;
use harbor_automation::{AutomationEngine, AutomationEvent};
use harbor_core::{EmailAccount, FolderType, NormalizedMessage, Participant};
use harbor_provider::{
    ForwardDraft, MailboxAccess, MessageUpdate, OutgoingMessage, ProviderAdapter, ProviderRegistry,
    ReplyDraft, SentMessage,
};
use harbor_storage::Storage;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// User-initiated mailbox writes. Each call goes to the provider first and
/// mirrors the result locally once the provider accepted it.
#[derive(Clone)]
pub struct MailboxService {
    storage: Storage,
    registry: ProviderRegistry,
    tokens: TokenManager,
    automation: AutomationEngine,
}

impl MailboxService {
    pub fn new(
        storage: Storage,
        registry: ProviderRegistry,
        tokens: TokenManager,
        automation: AutomationEngine,
    ) -> Self {
        Self {
            storage,
            registry,
            tokens,
            automation,
        }
    }

    pub async fn send(&self, account_id: Uuid, message: &OutgoingMessage) -> Result<SentMessage, SyncError> {
        let (account, adapter, access) = self.connect(account_id).await?;
        let sent = adapter.send_message(&access, message).await?;
        self.after_send(&account, message.recipients().cloned().collect()).await;
        Ok(sent)
    }

    pub async fn reply(&self, message_id: Uuid, draft: &ReplyDraft) -> Result<SentMessage, SyncError> {
        let original = self.load_message(message_id).await?;
        let (account, adapter, access) = self.connect(original.account_id).await?;

        let sent = adapter
            .reply_to_message(&access, &original.provider_message_id, draft)
            .await?;
        let recipients = reply_recipients(&original, &account.email_address, draft.reply_all);
        self.after_send(&account, recipients).await;
        Ok(sent)
    }

    pub async fn forward(&self, message_id: Uuid, draft: &ForwardDraft) -> Result<SentMessage, SyncError> {
        let original = self.load_message(message_id).await?;
        let (account, adapter, access) = self.connect(original.account_id).await?;

        let sent = adapter
            .forward_message(&access, &original.provider_message_id, draft)
            .await?;
        self.after_send(&account, draft.to.clone()).await;
        Ok(sent)
    }

    pub async fn move_to_folder(&self, message_id: Uuid, folder_id: &str) -> Result<NormalizedMessage, SyncError> {
        let mut message = self.load_message(message_id).await?;
        let (_, adapter, access) = self.connect(message.account_id).await?;

        adapter
            .move_message(&access, &message.provider_message_id, folder_id)
            .await?;

        let previous = message.folder_id.replace(folder_id.to_string());
        if let Some(mapping) = self.storage.get_folder(message.account_id, folder_id).await? {
            message.folder_type = mapping.folder_type;
        }
        self.storage.save_message_state(&message).await?;
        self.recount(message.account_id, previous.into_iter().chain(message.folder_id.clone()))
            .await;
        Ok(message)
    }

    /// Trashes the message remotely and mirrors it into the local trash.
    pub async fn delete(&self, message_id: Uuid) -> Result<(), SyncError> {
        let mut message = self.load_message(message_id).await?;
        let (account, adapter, access) = self.connect(message.account_id).await?;

        adapter
            .delete_message(&access, &message.provider_message_id)
            .await?;

        let previous = message.folder_id.clone();
        let trash = self
            .storage
            .find_folder_by_type(account.id, FolderType::Trash)
            .await?;
        message.folder_type = FolderType::Trash;
        message.folder_id = trash.map(|folder| folder.provider_folder_id);
        self.storage.save_message_state(&message).await?;

        self.automation
            .dispatch(AutomationEvent::MessageDeleted {
                account_id: account.id,
                message_id,
                folder_id: previous,
            })
            .await;
        self.recount(account.id, message.folder_id.clone()).await;
        Ok(())
    }

    pub async fn update_flags(&self, message_id: Uuid, update: MessageUpdate) -> Result<NormalizedMessage, SyncError> {
        let mut message = self.load_message(message_id).await?;
        if update.unread.is_none() && update.starred.is_none() {
            return Ok(message);
        }
        let (_, adapter, access) = self.connect(message.account_id).await?;

        adapter
            .update_message(&access, &message.provider_message_id, update)
            .await?;

        if let Some(unread) = update.unread {
            message.flags.unread = unread;
        }
        if let Some(starred) = update.starred {
            message.flags.starred = starred;
        }
        self.storage.save_message_state(&message).await?;
        self.recount(message.account_id, message.folder_id.clone()).await;
        Ok(message)
    }

    async fn after_send(&self, account: &EmailAccount, recipients: Vec<Participant>) {
        let sent_folder = match self.storage.find_folder_by_type(account.id, FolderType::Sent).await {
            Ok(folder) => folder.map(|folder| folder.provider_folder_id),
            Err(err) => {
                warn!(account_id = %account.id, error = %err, "sent folder lookup failed");
                None
            }
        };

        self.automation
            .dispatch(AutomationEvent::MessageSent {
                user_id: account.user_id,
                account_id: account.id,
                recipients,
                sent_at: Utc::now(),
                folder_id: sent_folder,
            })
            .await;
    }

    async fn connect(
        &self,
        account_id: Uuid,
    ) -> Result<(EmailAccount, Arc<dyn ProviderAdapter>, MailboxAccess), SyncError> {
        let account = self
            .storage
            .get_account(account_id)
            .await?
            .ok_or(SyncError::AccountNotFound(account_id))?;
        if !account.is_active() {
            return Err(SyncError::AccountArchived(account_id));
        }

        let adapter = self.registry.adapter(account.provider)?;
        let access = self.tokens.access_for(&account).await?;
        Ok((account, adapter, access))
    }

    async fn load_message(&self, message_id: Uuid) -> Result<NormalizedMessage, SyncError> {
        self.storage
            .get_message(message_id)
            .await?
            .ok_or(SyncError::MessageNotFound(message_id))
    }

    async fn recount(&self, account_id: Uuid, folders: impl IntoIterator<Item = String>) {
        let folders: BTreeSet<String> = folders.into_iter().collect();
        for folder_id in folders {
            if let Err(err) = self.storage.recompute_folder_counts(account_id, &folder_id).await {
                warn!(%account_id, folder_id, error = %err, "folder count recompute failed");
            } else {
                debug!(%account_id, folder_id, "folder counts refreshed");
            }
        }
    }
}

/// Who a reply reaches: `Reply-To` (or the sender), plus every other visible
/// recipient for reply-all. The account's own address is never included.
fn reply_recipients(original: &NormalizedMessage, own_address: &str, reply_all: bool) -> Vec<Participant> {
    let primary = if original.reply_to.is_empty() {
        &original.from
    } else {
        &original.reply_to
    };

    let extra: &[Participant] = if reply_all { &original.to } else { &[] };
    let cc: &[Participant] = if reply_all { &original.cc } else { &[] };

    let mut seen = BTreeSet::new();
    primary
        .iter()
        .chain(extra)
        .chain(cc)
        .filter(|participant| !participant.email.eq_ignore_ascii_case(own_address))
        .filter(|participant| seen.insert(participant.email.to_ascii_lowercase()))
        .cloned()
        .collect()
}

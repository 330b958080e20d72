use crate::tokens::TokenManager;
use crate::SyncError;
use chrono::Utc;
use harbor_core::{EmailAccount, ProviderKind, PushSubscription, SyncStatus};
use harbor_provider::{ProviderRegistry, SubscriptionRequest};
use harbor_security::OAuthPkceSession;
use harbor_storage::Storage;
use tracing::{info, warn};
use uuid::Uuid;

/// Inbound account lifecycle: connect, primary selection, disconnect and
/// push registration.
#[derive(Clone)]
pub struct AccountService {
    storage: Storage,
    registry: ProviderRegistry,
    tokens: TokenManager,
}

impl AccountService {
    pub fn new(storage: Storage, registry: ProviderRegistry, tokens: TokenManager) -> Self {
        Self {
            storage,
            registry,
            tokens,
        }
    }

    pub fn begin_connect(&self, kind: ProviderKind) -> Result<OAuthPkceSession, SyncError> {
        Ok(self.registry.adapter(kind)?.authorization_url()?)
    }

    /// Exchanges the authorization code and stores the account with its
    /// encrypted credentials. Reconnecting an address the user already has
    /// replaces its credentials and clears the error state.
    pub async fn complete_connect(
        &self,
        user_id: Uuid,
        kind: ProviderKind,
        email_address: &str,
        display_name: Option<String>,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<EmailAccount, SyncError> {
        let adapter = self.registry.adapter(kind)?;
        let tokens = adapter.exchange_code(code, pkce_verifier).await?;

        let active = self.storage.list_active_accounts(user_id).await?;
        if let Some(existing) = active
            .iter()
            .find(|account| account.provider == kind && account.email_address.eq_ignore_ascii_case(email_address))
        {
            self.tokens.store_tokens(existing.id, &tokens).await?;
            self.storage.reset_checkpoint_errors(existing.id).await?;
            self.storage
                .set_sync_status(existing.id, SyncStatus::Idle, None)
                .await?;
            info!(account_id = %existing.id, provider = %kind, "account reconnected");
            return Ok(self.storage.require_account(existing.id).await?);
        }

        let now = Utc::now();
        let account = EmailAccount {
            id: Uuid::new_v4(),
            user_id,
            provider: kind,
            email_address: email_address.trim().to_string(),
            display_name,
            is_primary: active.is_empty(),
            sync_status: SyncStatus::Idle,
            last_error: None,
            last_synced_at: None,
            archived_at: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.insert_account(&account).await?;
        self.tokens.store_tokens(account.id, &tokens).await?;

        info!(account_id = %account.id, provider = %kind, primary = account.is_primary, "account connected");
        Ok(account)
    }

    pub async fn set_primary(&self, user_id: Uuid, account_id: Uuid) -> Result<(), SyncError> {
        self.storage.set_primary_account(user_id, account_id).await?;
        Ok(())
    }

    /// Drops push registrations and credentials, then archives the account.
    /// Message history is kept.
    pub async fn disconnect(&self, account_id: Uuid) -> Result<(), SyncError> {
        let account = self
            .storage
            .get_account(account_id)
            .await?
            .ok_or(SyncError::AccountNotFound(account_id))?;

        let subscriptions = self.storage.list_push_subscriptions(account_id).await?;
        if !subscriptions.is_empty() {
            self.unsubscribe_all(&account, &subscriptions).await;
        }

        self.tokens.delete_tokens(account_id).await?;
        self.storage.archive_account(account_id).await?;
        info!(%account_id, "account disconnected");
        Ok(())
    }

    /// Provider-side removal is best effort; local rows are always dropped.
    async fn unsubscribe_all(&self, account: &EmailAccount, subscriptions: &[PushSubscription]) {
        let remote = match (
            self.registry.adapter(account.provider),
            self.tokens.access_for(account).await,
        ) {
            (Ok(adapter), Ok(access)) => Some((adapter, access)),
            (Err(err), _) => {
                warn!(account_id = %account.id, error = %err, "no adapter to remove push subscriptions");
                None
            }
            (_, Err(err)) => {
                warn!(account_id = %account.id, error = %err, "no token to remove push subscriptions");
                None
            }
        };

        for subscription in subscriptions {
            if let Some((adapter, access)) = &remote {
                if let Err(err) = adapter.delete_subscription(access, subscription).await {
                    warn!(account_id = %account.id, error = %err, "push subscription removal failed");
                }
            }
            if let Err(err) = self
                .storage
                .delete_push_subscription(account.id, &subscription.subscription_id)
                .await
            {
                warn!(account_id = %account.id, error = %err, "failed to drop push subscription row");
            }
        }
    }

    pub async fn subscribe(
        &self,
        account_id: Uuid,
        request: &SubscriptionRequest,
    ) -> Result<PushSubscription, SyncError> {
        let account = self.storage.require_account(account_id).await?;
        let adapter = self.registry.adapter(account.provider)?;
        let access = self.tokens.access_for(&account).await?;

        let subscription = adapter.create_subscription(&access, request).await?;
        self.storage.upsert_push_subscription(&subscription).await?;
        info!(%account_id, expires_at = %subscription.expires_at, "push subscription created");
        Ok(subscription)
    }

    pub async fn renew_subscription(&self, subscription: &PushSubscription) -> Result<PushSubscription, SyncError> {
        let account = self.storage.require_account(subscription.account_id).await?;
        let adapter = self.registry.adapter(account.provider)?;
        let access = self.tokens.access_for(&account).await?;

        let renewed = adapter.renew_subscription(&access, subscription).await?;
        if renewed.subscription_id != subscription.subscription_id {
            self.storage
                .delete_push_subscription(subscription.account_id, &subscription.subscription_id)
                .await?;
        }
        self.storage.upsert_push_subscription(&renewed).await?;
        Ok(renewed)
    }
}

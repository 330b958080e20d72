use crate::TokenError;
use chrono::{Duration, Utc};
use harbor_core::{CredentialRecord, EmailAccount, SyncStatus, TokenSet};
use harbor_provider::{MailboxAccess, ProviderRegistry};
use harbor_security::TokenCipher;
use harbor_storage::Storage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const REAUTH_MESSAGE: &str = "The provider rejected the saved sign-in. Reconnect this account.";

/// Tokens without a reported lifetime are treated as valid for an hour.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
const MAX_TOKEN_LIFETIME_SECS: u64 = 366 * 24 * 3600;

#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Tokens expiring within this window are refreshed before use.
    pub refresh_threshold: Duration,
    pub lock_ttl: Duration,
    pub lock_wait: std::time::Duration,
    pub lock_poll: std::time::Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::minutes(5),
            lock_ttl: Duration::seconds(60),
            lock_wait: std::time::Duration::from_secs(30),
            lock_poll: std::time::Duration::from_millis(50),
        }
    }
}

/// Hands out live access tokens, refreshing them under a per-account lease
/// so concurrent callers never race on the refresh token.
#[derive(Clone)]
pub struct TokenManager {
    storage: Storage,
    registry: ProviderRegistry,
    cipher: Arc<TokenCipher>,
    settings: TokenSettings,
}

impl TokenManager {
    pub fn new(storage: Storage, registry: ProviderRegistry, cipher: TokenCipher, settings: TokenSettings) -> Self {
        Self {
            storage,
            registry,
            cipher: Arc::new(cipher),
            settings,
        }
    }

    /// Encrypts and persists a freshly exchanged token set.
    pub async fn store_tokens(&self, account_id: Uuid, tokens: &TokenSet) -> Result<(), TokenError> {
        let record = self.encrypt_record(account_id, tokens, None)?;
        self.storage.upsert_credentials(&record).await?;
        debug!(%account_id, "credentials stored");
        Ok(())
    }

    pub async fn delete_tokens(&self, account_id: Uuid) -> Result<bool, TokenError> {
        Ok(self.storage.delete_credentials(account_id).await?)
    }

    pub async fn access_for(&self, account: &EmailAccount) -> Result<MailboxAccess, TokenError> {
        let token = self.valid_token_for(account).await?;
        Ok(MailboxAccess::new(account.id, token))
    }

    pub async fn get_valid_token(&self, account_id: Uuid) -> Result<String, TokenError> {
        let account = self.storage.require_account(account_id).await?;
        self.valid_token_for(&account).await
    }

    async fn valid_token_for(&self, account: &EmailAccount) -> Result<String, TokenError> {
        let holder = format!("{}:{}", std::process::id(), Uuid::new_v4());
        self.acquire_lease(account.id, &holder).await?;

        let result = self.token_under_lease(account).await;

        if let Err(err) = self.storage.release_credential_lease(account.id, &holder).await {
            warn!(account_id = %account.id, error = %err, "failed to release credential lease");
        }
        result
    }

    async fn acquire_lease(&self, account_id: Uuid, holder: &str) -> Result<(), TokenError> {
        let started = Instant::now();
        loop {
            if self
                .storage
                .try_acquire_credential_lease(account_id, holder, self.settings.lock_ttl)
                .await?
            {
                return Ok(());
            }
            // No credential row means there is nothing to lock.
            if self.storage.get_credentials(account_id).await?.is_none() {
                return Err(TokenError::MissingCredentials(account_id));
            }
            if started.elapsed() >= self.settings.lock_wait {
                return Err(TokenError::LockTimeout(account_id));
            }
            tokio::time::sleep(self.settings.lock_poll).await;
        }
    }

    async fn token_under_lease(&self, account: &EmailAccount) -> Result<String, TokenError> {
        let record = self
            .storage
            .get_credentials(account.id)
            .await?
            .ok_or(TokenError::MissingCredentials(account.id))?;

        if !self.needs_refresh(&record) {
            return Ok(self.cipher.decrypt(&record.access_token_enc)?);
        }

        let Some(refresh_enc) = record.refresh_token_enc.clone() else {
            return self
                .fail_refresh(account, "no refresh token stored".to_string())
                .await;
        };
        let refresh_token = self.cipher.decrypt(&refresh_enc)?;

        let adapter = self.registry.adapter(account.provider)?;
        let tokens = match adapter.refresh_token(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(err) => return self.fail_refresh(account, err.to_string()).await,
        };

        let next = self.encrypt_record(account.id, &tokens, Some(refresh_enc))?;
        if self
            .storage
            .update_credentials_if_version(&next, record.version)
            .await?
        {
            if account.sync_status == SyncStatus::Error {
                self.storage
                    .set_sync_status(account.id, SyncStatus::Idle, None)
                    .await?;
            }
            info!(account_id = %account.id, "access token refreshed");
            return Ok(tokens.access_token);
        }

        // Another writer bumped the version; take its token if it is fresh.
        let winner = self
            .storage
            .get_credentials(account.id)
            .await?
            .ok_or(TokenError::MissingCredentials(account.id))?;
        if self.needs_refresh(&winner) {
            return Err(TokenError::RefreshFailed(
                "credential record changed during refresh".to_string(),
            ));
        }
        debug!(account_id = %account.id, "lost refresh race; using the stored token");
        Ok(self.cipher.decrypt(&winner.access_token_enc)?)
    }

    fn needs_refresh(&self, record: &CredentialRecord) -> bool {
        record.expires_at - Utc::now() < self.settings.refresh_threshold
    }

    async fn fail_refresh(&self, account: &EmailAccount, reason: String) -> Result<String, TokenError> {
        warn!(account_id = %account.id, error = %reason, "token refresh failed");
        self.storage
            .set_sync_status(account.id, SyncStatus::Error, Some(REAUTH_MESSAGE))
            .await?;
        Err(TokenError::RefreshFailed(reason))
    }

    /// `previous_refresh` is kept when the provider does not rotate the
    /// refresh token.
    fn encrypt_record(
        &self,
        account_id: Uuid,
        tokens: &TokenSet,
        previous_refresh: Option<String>,
    ) -> Result<CredentialRecord, TokenError> {
        let lifetime = tokens
            .expires_in_secs
            .map(|secs| secs.min(MAX_TOKEN_LIFETIME_SECS) as i64)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let refresh_token_enc = match &tokens.refresh_token {
            Some(token) => Some(self.cipher.encrypt(token)?),
            None => previous_refresh,
        };
        let now = Utc::now();

        Ok(CredentialRecord {
            account_id,
            access_token_enc: self.cipher.encrypt(&tokens.access_token)?,
            refresh_token_enc,
            expires_at: now + Duration::seconds(lifetime),
            scopes: tokens.scopes.clone(),
            version: 0,
            updated_at: now,
        })
    }
}

use crate::StorageError;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use harbor_core::{CredentialRecord, EmailAccount, SyncCheckpoint, SyncKind, SyncStatus};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct Storage {
    pub(crate) pool: SqlitePool,
}

impl Storage {
    pub async fn connect(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30))
            .pragma("temp_store", "memory")
            .pragma("cache_size", "-20000");

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(path = %db_path.display(), "database ready");

        Ok(Self { pool })
    }

    /// Single-connection in-memory database. The connection is never recycled,
    /// so the schema lives as long as the pool.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- accounts -----------------------------------------------------------

    pub async fn insert_account(&self, account: &EmailAccount) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO email_accounts (
              id, user_id, provider, email_address, display_name, is_primary,
              sync_status, last_error, last_synced_at, archived_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(account.id.to_string())
        .bind(account.user_id.to_string())
        .bind(account.provider.as_str())
        .bind(&account.email_address)
        .bind(&account.display_name)
        .bind(account.is_primary)
        .bind(account.sync_status.as_str())
        .bind(&account.last_error)
        .bind(account.last_synced_at.map(timestamp))
        .bind(account.archived_at.map(timestamp))
        .bind(timestamp(account.created_at))
        .bind(timestamp(account.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_account(&self, account_id: Uuid) -> Result<Option<EmailAccount>, StorageError> {
        let row = sqlx::query("SELECT * FROM email_accounts WHERE id = ?1")
            .bind(account_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_account).transpose()
    }

    pub async fn require_account(&self, account_id: Uuid) -> Result<EmailAccount, StorageError> {
        self.get_account(account_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("email account {account_id}")))
    }

    /// Non-archived accounts of one user, primary first.
    pub async fn list_active_accounts(&self, user_id: Uuid) -> Result<Vec<EmailAccount>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_accounts
            WHERE user_id = ?1 AND archived_at IS NULL
            ORDER BY is_primary DESC, created_at ASC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_account).collect()
    }

    /// Every account a scheduler may sync: not archived, not paused, not in error.
    pub async fn list_syncable_accounts(&self) -> Result<Vec<EmailAccount>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_accounts
            WHERE archived_at IS NULL AND sync_status NOT IN ('error', 'paused')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_account).collect()
    }

    pub async fn set_sync_status(
        &self,
        account_id: Uuid,
        status: SyncStatus,
        last_error: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE email_accounts
            SET sync_status = ?2, last_error = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(account_id.to_string())
        .bind(status.as_str())
        .bind(last_error)
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a successful sync run: back to `idle`, error text cleared.
    pub async fn mark_account_synced(&self, account_id: Uuid) -> Result<(), StorageError> {
        let now = now();
        sqlx::query(
            r#"
            UPDATE email_accounts
            SET sync_status = 'idle', last_error = NULL, last_synced_at = ?2, updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(account_id.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Moves the primary flag to `account_id` in one transaction.
    pub async fn set_primary_account(&self, user_id: Uuid, account_id: Uuid) -> Result<(), StorageError> {
        let now = now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE email_accounts SET is_primary = 0, updated_at = ?2 WHERE user_id = ?1 AND is_primary = 1",
        )
        .bind(user_id.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE email_accounts SET is_primary = 1, updated_at = ?3
            WHERE id = ?1 AND user_id = ?2 AND archived_at IS NULL
            "#,
        )
        .bind(account_id.to_string())
        .bind(user_id.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::NotFound(format!(
                "active account {account_id} for user {user_id}"
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Soft-archives an account; the primary flag is dropped with it.
    pub async fn archive_account(&self, account_id: Uuid) -> Result<(), StorageError> {
        let now = now();
        sqlx::query(
            r#"
            UPDATE email_accounts
            SET archived_at = COALESCE(archived_at, ?2), is_primary = 0,
                sync_status = 'paused', updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(account_id.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -- credentials ----------------------------------------------------------

    /// Creates or replaces the credential row, bumping its version.
    pub async fn upsert_credentials(&self, record: &CredentialRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO account_credentials (
              account_id, access_token_enc, refresh_token_enc, expires_at,
              scopes_json, version, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
            ON CONFLICT(account_id) DO UPDATE SET
              access_token_enc = excluded.access_token_enc,
              refresh_token_enc = excluded.refresh_token_enc,
              expires_at = excluded.expires_at,
              scopes_json = excluded.scopes_json,
              version = account_credentials.version + 1,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(record.account_id.to_string())
        .bind(&record.access_token_enc)
        .bind(&record.refresh_token_enc)
        .bind(timestamp(record.expires_at))
        .bind(serde_json::to_string(&record.scopes)?)
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_credentials(&self, account_id: Uuid) -> Result<Option<CredentialRecord>, StorageError> {
        let row = sqlx::query("SELECT * FROM account_credentials WHERE account_id = ?1")
            .bind(account_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_credentials).transpose()
    }

    pub async fn delete_credentials(&self, account_id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM account_credentials WHERE account_id = ?1")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Takes the credential lease for `holder` if it is free or expired.
    /// Returns `false` while another holder owns a live lease.
    pub async fn try_acquire_credential_lease(
        &self,
        account_id: Uuid,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE account_credentials
            SET locked_by = ?2, locked_until = ?3
            WHERE account_id = ?1
              AND (locked_by IS NULL OR locked_until IS NULL OR locked_until < ?4)
            "#,
        )
        .bind(account_id.to_string())
        .bind(holder)
        .bind(timestamp(now + ttl))
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn release_credential_lease(&self, account_id: Uuid, holder: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE account_credentials
            SET locked_by = NULL, locked_until = NULL
            WHERE account_id = ?1 AND locked_by = ?2
            "#,
        )
        .bind(account_id.to_string())
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Compare-and-swap write of refreshed credentials. Succeeds only when the
    /// stored version still equals `expected_version`.
    pub async fn update_credentials_if_version(
        &self,
        record: &CredentialRecord,
        expected_version: i64,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE account_credentials
            SET access_token_enc = ?2, refresh_token_enc = ?3, expires_at = ?4,
                scopes_json = ?5, version = version + 1, updated_at = ?6
            WHERE account_id = ?1 AND version = ?7
            "#,
        )
        .bind(record.account_id.to_string())
        .bind(&record.access_token_enc)
        .bind(&record.refresh_token_enc)
        .bind(timestamp(record.expires_at))
        .bind(serde_json::to_string(&record.scopes)?)
        .bind(now())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // -- checkpoints ----------------------------------------------------------

    pub async fn get_checkpoint(
        &self,
        account_id: Uuid,
        kind: SyncKind,
    ) -> Result<Option<SyncCheckpoint>, StorageError> {
        let row = sqlx::query("SELECT * FROM sync_checkpoints WHERE account_id = ?1 AND kind = ?2")
            .bind(account_id.to_string())
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_checkpoint).transpose()
    }

    pub async fn list_checkpoints(&self, account_id: Uuid) -> Result<Vec<SyncCheckpoint>, StorageError> {
        let rows = sqlx::query("SELECT * FROM sync_checkpoints WHERE account_id = ?1 ORDER BY kind")
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_checkpoint).collect()
    }

    /// Stores a new cursor and resets the consecutive error count.
    pub async fn record_checkpoint_success(
        &self,
        account_id: Uuid,
        kind: SyncKind,
        cursor: Option<&str>,
    ) -> Result<(), StorageError> {
        let now = now();
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (
              account_id, kind, cursor, last_success_at, error_count, last_error, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, NULL, ?4)
            ON CONFLICT(account_id, kind) DO UPDATE SET
              cursor = excluded.cursor,
              last_success_at = excluded.last_success_at,
              error_count = 0,
              last_error = NULL,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id.to_string())
        .bind(kind.as_str())
        .bind(cursor)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Increments the consecutive error count, keeping the cursor untouched,
    /// and returns the new count.
    pub async fn record_checkpoint_failure(
        &self,
        account_id: Uuid,
        kind: SyncKind,
        error: &str,
    ) -> Result<u32, StorageError> {
        let row = sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (
              account_id, kind, cursor, last_success_at, error_count, last_error, updated_at
            ) VALUES (?1, ?2, NULL, NULL, 1, ?3, ?4)
            ON CONFLICT(account_id, kind) DO UPDATE SET
              error_count = sync_checkpoints.error_count + 1,
              last_error = excluded.last_error,
              updated_at = excluded.updated_at
            RETURNING error_count
            "#,
        )
        .bind(account_id.to_string())
        .bind(kind.as_str())
        .bind(error)
        .bind(now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("error_count")? as u32)
    }

    /// Zeroes the consecutive error counts of every checkpoint on the account,
    /// keeping cursors. Used when the user reconnects.
    pub async fn reset_checkpoint_errors(&self, account_id: Uuid) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE sync_checkpoints SET error_count = 0, last_error = NULL, updated_at = ?2 WHERE account_id = ?1",
        )
        .bind(account_id.to_string())
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drops an expired cursor so the next run rebuilds its baseline.
    pub async fn clear_checkpoint_cursor(&self, account_id: Uuid, kind: SyncKind) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE sync_checkpoints SET cursor = NULL, updated_at = ?3 WHERE account_id = ?1 AND kind = ?2",
        )
        .bind(account_id.to_string())
        .bind(kind.as_str())
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_account(row: SqliteRow) -> Result<EmailAccount, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let user_raw: String = row.try_get("user_id")?;
        let provider_raw: String = row.try_get("provider")?;
        let status_raw: String = row.try_get("sync_status")?;
        let synced_raw: Option<String> = row.try_get("last_synced_at")?;
        let archived_raw: Option<String> = row.try_get("archived_at")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(EmailAccount {
            id: parse_uuid(&id_raw, "email_accounts.id")?,
            user_id: parse_uuid(&user_raw, "email_accounts.user_id")?,
            provider: parse_enum(&provider_raw, "email_accounts.provider")?,
            email_address: row.try_get("email_address")?,
            display_name: row.try_get("display_name")?,
            is_primary: row.try_get("is_primary")?,
            sync_status: parse_enum(&status_raw, "email_accounts.sync_status")?,
            last_error: row.try_get("last_error")?,
            last_synced_at: parse_optional_datetime(synced_raw, "email_accounts.last_synced_at")?,
            archived_at: parse_optional_datetime(archived_raw, "email_accounts.archived_at")?,
            created_at: parse_datetime(&created_raw, "email_accounts.created_at")?,
            updated_at: parse_datetime(&updated_raw, "email_accounts.updated_at")?,
        })
    }

    fn row_to_credentials(row: SqliteRow) -> Result<CredentialRecord, StorageError> {
        let account_raw: String = row.try_get("account_id")?;
        let expires_raw: String = row.try_get("expires_at")?;
        let scopes_raw: String = row.try_get("scopes_json")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(CredentialRecord {
            account_id: parse_uuid(&account_raw, "account_credentials.account_id")?,
            access_token_enc: row.try_get("access_token_enc")?,
            refresh_token_enc: row.try_get("refresh_token_enc")?,
            expires_at: parse_datetime(&expires_raw, "account_credentials.expires_at")?,
            scopes: parse_json(&scopes_raw, "account_credentials.scopes_json")?,
            version: row.try_get("version")?,
            updated_at: parse_datetime(&updated_raw, "account_credentials.updated_at")?,
        })
    }

    fn row_to_checkpoint(row: SqliteRow) -> Result<SyncCheckpoint, StorageError> {
        let account_raw: String = row.try_get("account_id")?;
        let kind_raw: String = row.try_get("kind")?;
        let success_raw: Option<String> = row.try_get("last_success_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(SyncCheckpoint {
            account_id: parse_uuid(&account_raw, "sync_checkpoints.account_id")?,
            kind: parse_enum(&kind_raw, "sync_checkpoints.kind")?,
            cursor: row.try_get("cursor")?,
            last_success_at: parse_optional_datetime(success_raw, "sync_checkpoints.last_success_at")?,
            error_count: row.try_get::<i64, _>("error_count")? as u32,
            last_error: row.try_get("last_error")?,
            updated_at: parse_datetime(&updated_raw, "sync_checkpoints.updated_at")?,
        })
    }
}

/// Fixed-width UTC timestamp used for every stored datetime.
pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now() -> String {
    timestamp(Utc::now())
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw)
        .map_err(|err| StorageError::Data(format!("invalid uuid for {field}: {err}")))
}

pub(crate) fn parse_datetime(raw: &str, field: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Data(format!("invalid datetime for {field}: {err}")))
}

pub(crate) fn parse_optional_datetime(
    raw: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    raw.as_deref().map(|raw| parse_datetime(raw, field)).transpose()
}

pub(crate) fn parse_enum<T>(raw: &str, field: &str) -> Result<T, StorageError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|err| StorageError::Data(format!("invalid value for {field}: {err}")))
}

pub(crate) fn parse_json<T>(raw: &str, field: &str) -> Result<T, StorageError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(raw)
        .map_err(|err| StorageError::Data(format!("invalid json for {field}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::account;

    fn credentials(account_id: Uuid) -> CredentialRecord {
        CredentialRecord {
            account_id,
            access_token_enc: "sealed-access".to_string(),
            refresh_token_enc: Some("sealed-refresh".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
            scopes: vec!["mail.read".to_string()],
            version: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let early = Utc::now();
        let late = early + Duration::milliseconds(1500);
        assert!(timestamp(early) < timestamp(late));
        assert_eq!(timestamp(early).len(), timestamp(late).len());
    }

    #[tokio::test]
    async fn at_most_one_primary_account_per_user() {
        let storage = Storage::in_memory().await.expect("storage");
        let user_id = Uuid::new_v4();
        let first = account(user_id, true);
        let second = account(user_id, false);
        storage.insert_account(&first).await.expect("insert first");
        storage.insert_account(&second).await.expect("insert second");

        assert!(storage.insert_account(&account(user_id, true)).await.is_err());

        storage
            .set_primary_account(user_id, second.id)
            .await
            .expect("move primary");
        let accounts = storage.list_active_accounts(user_id).await.expect("list");
        assert_eq!(accounts[0].id, second.id);
        assert!(accounts[0].is_primary);
        assert!(!accounts[1].is_primary);
    }

    #[tokio::test]
    async fn credential_lease_excludes_second_holder_until_released() {
        let storage = Storage::in_memory().await.expect("storage");
        let owner = account(Uuid::new_v4(), true);
        storage.insert_account(&owner).await.expect("insert account");
        storage
            .upsert_credentials(&credentials(owner.id))
            .await
            .expect("store credentials");

        let ttl = Duration::seconds(60);
        assert!(storage.try_acquire_credential_lease(owner.id, "a", ttl).await.expect("lease a"));
        assert!(!storage.try_acquire_credential_lease(owner.id, "b", ttl).await.expect("lease b"));

        storage.release_credential_lease(owner.id, "a").await.expect("release");
        assert!(storage.try_acquire_credential_lease(owner.id, "b", ttl).await.expect("lease b"));
    }

    #[tokio::test]
    async fn expired_lease_can_be_reclaimed() {
        let storage = Storage::in_memory().await.expect("storage");
        let owner = account(Uuid::new_v4(), true);
        storage.insert_account(&owner).await.expect("insert account");
        storage
            .upsert_credentials(&credentials(owner.id))
            .await
            .expect("store credentials");

        assert!(storage
            .try_acquire_credential_lease(owner.id, "crashed", Duration::seconds(-1))
            .await
            .expect("stale lease"));
        assert!(storage
            .try_acquire_credential_lease(owner.id, "next", Duration::seconds(60))
            .await
            .expect("reclaim"));
    }

    #[tokio::test]
    async fn version_cas_rejects_stale_writers() {
        let storage = Storage::in_memory().await.expect("storage");
        let owner = account(Uuid::new_v4(), true);
        storage.insert_account(&owner).await.expect("insert account");
        storage
            .upsert_credentials(&credentials(owner.id))
            .await
            .expect("store credentials");

        let stored = storage
            .get_credentials(owner.id)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(stored.version, 1);

        assert!(storage
            .update_credentials_if_version(&stored, stored.version)
            .await
            .expect("first write"));
        assert!(!storage
            .update_credentials_if_version(&stored, stored.version)
            .await
            .expect("stale write"));
    }

    #[tokio::test]
    async fn checkpoint_failures_count_up_and_success_resets() {
        let storage = Storage::in_memory().await.expect("storage");
        let owner = account(Uuid::new_v4(), true);
        storage.insert_account(&owner).await.expect("insert account");

        storage
            .record_checkpoint_success(owner.id, SyncKind::Messages, Some("C1"))
            .await
            .expect("baseline");
        for expected in 1..=3 {
            let count = storage
                .record_checkpoint_failure(owner.id, SyncKind::Messages, "timeout")
                .await
                .expect("failure");
            assert_eq!(count, expected);
        }

        let checkpoint = storage
            .get_checkpoint(owner.id, SyncKind::Messages)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(checkpoint.cursor.as_deref(), Some("C1"));
        assert_eq!(checkpoint.last_error.as_deref(), Some("timeout"));

        storage
            .record_checkpoint_success(owner.id, SyncKind::Messages, Some("C2"))
            .await
            .expect("success");
        let checkpoint = storage
            .get_checkpoint(owner.id, SyncKind::Messages)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(checkpoint.error_count, 0);
        assert_eq!(checkpoint.cursor.as_deref(), Some("C2"));
    }

    #[tokio::test]
    async fn reset_checkpoint_errors_keeps_cursors() {
        let storage = Storage::in_memory().await.expect("storage");
        let owner = account(Uuid::new_v4(), true);
        storage.insert_account(&owner).await.expect("insert account");

        storage
            .record_checkpoint_success(owner.id, SyncKind::Messages, Some("C1"))
            .await
            .expect("baseline");
        for _ in 0..3 {
            storage
                .record_checkpoint_failure(owner.id, SyncKind::Messages, "timeout")
                .await
                .expect("failure");
        }

        storage.reset_checkpoint_errors(owner.id).await.expect("reset");
        let checkpoint = storage
            .get_checkpoint(owner.id, SyncKind::Messages)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(checkpoint.error_count, 0);
        assert_eq!(checkpoint.last_error, None);
        assert_eq!(checkpoint.cursor.as_deref(), Some("C1"));

        let count = storage
            .record_checkpoint_failure(owner.id, SyncKind::Messages, "timeout")
            .await
            .expect("failure");
        assert_eq!(count, 1);
    }
}

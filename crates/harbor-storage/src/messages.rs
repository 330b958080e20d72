use crate::storage::{
    now, parse_datetime, parse_enum, parse_json, parse_optional_datetime, parse_uuid, timestamp,
};
use crate::{Storage, StorageError};
use harbor_core::{Folder, FolderMapping, FolderType, MessageFlags, NormalizedMessage};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Result of writing a message under its (account, provider id) dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Id of the stored row; differs from the input id when the row already existed.
    pub message_id: Uuid,
    pub inserted: bool,
    /// Folder the row sat in before an update, when it changed.
    pub previous_folder_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderCounts {
    pub unread: u32,
    pub total: u32,
}

impl Storage {
    // -- messages -------------------------------------------------------------

    /// Inserts a new message or refreshes the provider-owned fields of the
    /// existing row. Local state (categories, soft delete) survives updates.
    pub async fn upsert_message(&self, message: &NormalizedMessage) -> Result<UpsertOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id, folder_id FROM messages WHERE account_id = ?1 AND provider_message_id = ?2",
        )
        .bind(message.account_id.to_string())
        .bind(&message.provider_message_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO messages (
                      id, account_id, provider_message_id, provider_thread_id,
                      from_json, to_json, cc_json, bcc_json, reply_to_json,
                      subject, body_html, body_text, snippet,
                      folder_id, folder_type, labels_json, categories_json,
                      is_unread, is_starred, is_draft, has_attachments,
                      attachments_json, importance, sent_at, received_at,
                      archived_at, deleted_at, created_at, updated_at
                    ) VALUES (
                      ?1, ?2, ?3, ?4,
                      ?5, ?6, ?7, ?8, ?9,
                      ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17,
                      ?18, ?19, ?20, ?21,
                      ?22, ?23, ?24, ?25,
                      ?26, ?27, ?28, ?29
                    )
                    "#,
                )
                .bind(message.id.to_string())
                .bind(message.account_id.to_string())
                .bind(&message.provider_message_id)
                .bind(&message.provider_thread_id)
                .bind(serde_json::to_string(&message.from)?)
                .bind(serde_json::to_string(&message.to)?)
                .bind(serde_json::to_string(&message.cc)?)
                .bind(serde_json::to_string(&message.bcc)?)
                .bind(serde_json::to_string(&message.reply_to)?)
                .bind(&message.subject)
                .bind(&message.body_html)
                .bind(&message.body_text)
                .bind(&message.snippet)
                .bind(&message.folder_id)
                .bind(message.folder_type.as_str())
                .bind(serde_json::to_string(&message.labels)?)
                .bind(serde_json::to_string(&message.categories)?)
                .bind(message.flags.unread)
                .bind(message.flags.starred)
                .bind(message.flags.draft)
                .bind(message.flags.has_attachments)
                .bind(serde_json::to_string(&message.attachments)?)
                .bind(message.importance.as_str())
                .bind(message.sent_at.map(timestamp))
                .bind(timestamp(message.received_at))
                .bind(message.archived_at.map(timestamp))
                .bind(message.deleted_at.map(timestamp))
                .bind(timestamp(message.created_at))
                .bind(timestamp(message.updated_at))
                .execute(&mut *tx)
                .await?;

                UpsertOutcome {
                    message_id: message.id,
                    inserted: true,
                    previous_folder_id: None,
                }
            }
            Some(row) => {
                let id_raw: String = row.try_get("id")?;
                let previous_folder: Option<String> = row.try_get("folder_id")?;

                sqlx::query(
                    r#"
                    UPDATE messages SET
                      provider_thread_id = ?2,
                      from_json = ?3, to_json = ?4, cc_json = ?5, bcc_json = ?6, reply_to_json = ?7,
                      subject = ?8, body_html = ?9, body_text = ?10, snippet = ?11,
                      folder_id = ?12, folder_type = ?13, labels_json = ?14,
                      is_unread = ?15, is_starred = ?16, is_draft = ?17, has_attachments = ?18,
                      attachments_json = ?19, importance = ?20, sent_at = ?21, received_at = ?22,
                      archived_at = NULL, updated_at = ?23
                    WHERE id = ?1
                    "#,
                )
                .bind(&id_raw)
                .bind(&message.provider_thread_id)
                .bind(serde_json::to_string(&message.from)?)
                .bind(serde_json::to_string(&message.to)?)
                .bind(serde_json::to_string(&message.cc)?)
                .bind(serde_json::to_string(&message.bcc)?)
                .bind(serde_json::to_string(&message.reply_to)?)
                .bind(&message.subject)
                .bind(&message.body_html)
                .bind(&message.body_text)
                .bind(&message.snippet)
                .bind(&message.folder_id)
                .bind(message.folder_type.as_str())
                .bind(serde_json::to_string(&message.labels)?)
                .bind(message.flags.unread)
                .bind(message.flags.starred)
                .bind(message.flags.draft)
                .bind(message.flags.has_attachments)
                .bind(serde_json::to_string(&message.attachments)?)
                .bind(message.importance.as_str())
                .bind(message.sent_at.map(timestamp))
                .bind(timestamp(message.received_at))
                .bind(now())
                .execute(&mut *tx)
                .await?;

                UpsertOutcome {
                    message_id: parse_uuid(&id_raw, "messages.id")?,
                    inserted: false,
                    previous_folder_id: previous_folder.filter(|folder| {
                        message.folder_id.as_deref() != Some(folder.as_str())
                    }),
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn get_message(&self, message_id: Uuid) -> Result<Option<NormalizedMessage>, StorageError> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?1")
            .bind(message_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_message).transpose()
    }

    pub async fn get_message_by_provider_id(
        &self,
        account_id: Uuid,
        provider_message_id: &str,
    ) -> Result<Option<NormalizedMessage>, StorageError> {
        let row = sqlx::query(
            "SELECT * FROM messages WHERE account_id = ?1 AND provider_message_id = ?2",
        )
        .bind(account_id.to_string())
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    /// Visible messages (neither archived nor soft-deleted), newest first.
    pub async fn list_messages(
        &self,
        account_id: Uuid,
        folder_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<NormalizedMessage>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE account_id = ?1
              AND (?2 IS NULL OR folder_id = ?2)
              AND archived_at IS NULL AND deleted_at IS NULL
            ORDER BY received_at DESC
            LIMIT ?3
            "#,
        )
        .bind(account_id.to_string())
        .bind(folder_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    /// Every stored row for the account, archived ones included.
    pub async fn count_messages(&self, account_id: Uuid) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM messages WHERE account_id = ?1")
            .bind(account_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get::<i64, _>("total")? as u64)
    }

    /// Marks the message archived after a provider-side delete. Rows are never
    /// removed. Returns the archived message, if it was known locally.
    pub async fn archive_message_by_provider_id(
        &self,
        account_id: Uuid,
        provider_message_id: &str,
    ) -> Result<Option<NormalizedMessage>, StorageError> {
        let now = now();
        sqlx::query(
            r#"
            UPDATE messages
            SET archived_at = COALESCE(archived_at, ?3), updated_at = ?3
            WHERE account_id = ?1 AND provider_message_id = ?2
            "#,
        )
        .bind(account_id.to_string())
        .bind(provider_message_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_message_by_provider_id(account_id, provider_message_id)
            .await
    }

    /// Persists the locally mutable parts of a message: placement, labels,
    /// categories, flags and the archive / soft-delete markers.
    pub async fn save_message_state(&self, message: &NormalizedMessage) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET
              folder_id = ?2, folder_type = ?3, labels_json = ?4, categories_json = ?5,
              is_unread = ?6, is_starred = ?7, archived_at = ?8, deleted_at = ?9,
              updated_at = ?10
            WHERE id = ?1
            "#,
        )
        .bind(message.id.to_string())
        .bind(&message.folder_id)
        .bind(message.folder_type.as_str())
        .bind(serde_json::to_string(&message.labels)?)
        .bind(serde_json::to_string(&message.categories)?)
        .bind(message.flags.unread)
        .bind(message.flags.starred)
        .bind(message.archived_at.map(timestamp))
        .bind(message.deleted_at.map(timestamp))
        .bind(now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("message {}", message.id)));
        }
        Ok(())
    }

    // -- folders --------------------------------------------------------------

    pub async fn upsert_folder(&self, account_id: Uuid, folder: &Folder) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO folders (
              account_id, provider_folder_id, name, folder_type,
              unread_count, total_count, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(account_id, provider_folder_id) DO UPDATE SET
              name = excluded.name,
              folder_type = excluded.folder_type,
              unread_count = excluded.unread_count,
              total_count = excluded.total_count,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id.to_string())
        .bind(&folder.id)
        .bind(&folder.name)
        .bind(folder.folder_type.as_str())
        .bind(i64::from(folder.unread_count))
        .bind(i64::from(folder.total_count))
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_folder(
        &self,
        account_id: Uuid,
        provider_folder_id: &str,
    ) -> Result<Option<FolderMapping>, StorageError> {
        let row = sqlx::query(
            "SELECT * FROM folders WHERE account_id = ?1 AND provider_folder_id = ?2",
        )
        .bind(account_id.to_string())
        .bind(provider_folder_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_folder).transpose()
    }

    pub async fn list_folders(&self, account_id: Uuid) -> Result<Vec<FolderMapping>, StorageError> {
        let rows = sqlx::query("SELECT * FROM folders WHERE account_id = ?1 ORDER BY name")
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_folder).collect()
    }

    pub async fn find_folder_by_type(
        &self,
        account_id: Uuid,
        folder_type: FolderType,
    ) -> Result<Option<FolderMapping>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM folders
            WHERE account_id = ?1 AND folder_type = ?2
            ORDER BY provider_folder_id
            LIMIT 1
            "#,
        )
        .bind(account_id.to_string())
        .bind(folder_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_folder).transpose()
    }

    /// Recounts a folder from the message table and stores the result on the
    /// folder row. Returns `None` when the folder has no mapping.
    pub async fn recompute_folder_counts(
        &self,
        account_id: Uuid,
        folder_id: &str,
    ) -> Result<Option<FolderCounts>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total, COALESCE(SUM(is_unread), 0) AS unread
            FROM messages
            WHERE account_id = ?1 AND folder_id = ?2
              AND archived_at IS NULL AND deleted_at IS NULL
            "#,
        )
        .bind(account_id.to_string())
        .bind(folder_id)
        .fetch_one(&self.pool)
        .await?;

        let counts = FolderCounts {
            total: row.try_get::<i64, _>("total")? as u32,
            unread: row.try_get::<i64, _>("unread")? as u32,
        };

        let updated = sqlx::query(
            r#"
            UPDATE folders SET unread_count = ?3, total_count = ?4, updated_at = ?5
            WHERE account_id = ?1 AND provider_folder_id = ?2
            "#,
        )
        .bind(account_id.to_string())
        .bind(folder_id)
        .bind(i64::from(counts.unread))
        .bind(i64::from(counts.total))
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok((updated.rows_affected() > 0).then_some(counts))
    }

    fn row_to_message(row: SqliteRow) -> Result<NormalizedMessage, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let account_raw: String = row.try_get("account_id")?;
        let folder_type_raw: String = row.try_get("folder_type")?;
        let importance_raw: String = row.try_get("importance")?;
        let sent_raw: Option<String> = row.try_get("sent_at")?;
        let received_raw: String = row.try_get("received_at")?;
        let archived_raw: Option<String> = row.try_get("archived_at")?;
        let deleted_raw: Option<String> = row.try_get("deleted_at")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(NormalizedMessage {
            id: parse_uuid(&id_raw, "messages.id")?,
            account_id: parse_uuid(&account_raw, "messages.account_id")?,
            provider_message_id: row.try_get("provider_message_id")?,
            provider_thread_id: row.try_get("provider_thread_id")?,
            from: parse_json(&row.try_get::<String, _>("from_json")?, "messages.from_json")?,
            to: parse_json(&row.try_get::<String, _>("to_json")?, "messages.to_json")?,
            cc: parse_json(&row.try_get::<String, _>("cc_json")?, "messages.cc_json")?,
            bcc: parse_json(&row.try_get::<String, _>("bcc_json")?, "messages.bcc_json")?,
            reply_to: parse_json(
                &row.try_get::<String, _>("reply_to_json")?,
                "messages.reply_to_json",
            )?,
            subject: row.try_get("subject")?,
            body_html: row.try_get("body_html")?,
            body_text: row.try_get("body_text")?,
            snippet: row.try_get("snippet")?,
            folder_id: row.try_get("folder_id")?,
            folder_type: parse_enum(&folder_type_raw, "messages.folder_type")?,
            labels: parse_json(&row.try_get::<String, _>("labels_json")?, "messages.labels_json")?,
            categories: parse_json(
                &row.try_get::<String, _>("categories_json")?,
                "messages.categories_json",
            )?,
            flags: MessageFlags {
                unread: row.try_get("is_unread")?,
                starred: row.try_get("is_starred")?,
                draft: row.try_get("is_draft")?,
                has_attachments: row.try_get("has_attachments")?,
            },
            attachments: parse_json(
                &row.try_get::<String, _>("attachments_json")?,
                "messages.attachments_json",
            )?,
            importance: parse_enum(&importance_raw, "messages.importance")?,
            sent_at: parse_optional_datetime(sent_raw, "messages.sent_at")?,
            received_at: parse_datetime(&received_raw, "messages.received_at")?,
            archived_at: parse_optional_datetime(archived_raw, "messages.archived_at")?,
            deleted_at: parse_optional_datetime(deleted_raw, "messages.deleted_at")?,
            created_at: parse_datetime(&created_raw, "messages.created_at")?,
            updated_at: parse_datetime(&updated_raw, "messages.updated_at")?,
        })
    }

    fn row_to_folder(row: SqliteRow) -> Result<FolderMapping, StorageError> {
        let account_raw: String = row.try_get("account_id")?;
        let folder_type_raw: String = row.try_get("folder_type")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(FolderMapping {
            account_id: parse_uuid(&account_raw, "folders.account_id")?,
            provider_folder_id: row.try_get("provider_folder_id")?,
            name: row.try_get("name")?,
            folder_type: parse_enum(&folder_type_raw, "folders.folder_type")?,
            unread_count: row.try_get::<i64, _>("unread_count")? as u32,
            total_count: row.try_get::<i64, _>("total_count")? as u32,
            updated_at: parse_datetime(&updated_raw, "folders.updated_at")?,
        })
    }
}

use crate::storage::{
    now, parse_datetime, parse_enum, parse_json, parse_optional_datetime, parse_uuid, timestamp,
};
use crate::{Storage, StorageError};
use chrono::{DateTime, Utc};
use harbor_core::{
    Contact, ContactSource, EmailRule, NewNotification, Notification, RemoteContact, Snooze,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Storage {
    // -- rules ----------------------------------------------------------------

    pub async fn upsert_rule(&self, rule: &EmailRule) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO email_rules (
              id, user_id, name, priority, match_mode, conditions_json, actions_json,
              is_active, applied_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
              name = excluded.name,
              priority = excluded.priority,
              match_mode = excluded.match_mode,
              conditions_json = excluded.conditions_json,
              actions_json = excluded.actions_json,
              is_active = excluded.is_active,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(rule.id.to_string())
        .bind(rule.user_id.to_string())
        .bind(&rule.name)
        .bind(rule.priority)
        .bind(rule.match_mode.as_str())
        .bind(serde_json::to_string(&rule.conditions)?)
        .bind(serde_json::to_string(&rule.actions)?)
        .bind(rule.is_active)
        .bind(rule.applied_count as i64)
        .bind(timestamp(rule.created_at))
        .bind(timestamp(rule.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_rule(&self, rule_id: Uuid) -> Result<Option<EmailRule>, StorageError> {
        let row = sqlx::query("SELECT * FROM email_rules WHERE id = ?1")
            .bind(rule_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_rule).transpose()
    }

    pub async fn list_rules(&self, user_id: Uuid) -> Result<Vec<EmailRule>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM email_rules WHERE user_id = ?1 ORDER BY priority ASC, created_at ASC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_rule).collect()
    }

    /// Active rules in evaluation order: ascending priority, oldest first on ties.
    pub async fn list_active_rules(&self, user_id: Uuid) -> Result<Vec<EmailRule>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_rules
            WHERE user_id = ?1 AND is_active = 1
            ORDER BY priority ASC, created_at ASC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_rule).collect()
    }

    pub async fn delete_rule(&self, rule_id: Uuid) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM email_rules WHERE id = ?1")
            .bind(rule_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn increment_rule_applied(&self, rule_id: Uuid) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE email_rules SET applied_count = applied_count + 1, updated_at = ?2 WHERE id = ?1",
        )
        .bind(rule_id.to_string())
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -- contacts -------------------------------------------------------------

    /// Inserts a contact unless one already exists for (user, email).
    /// Returns whether a row was created.
    pub async fn insert_contact_if_absent(
        &self,
        user_id: Uuid,
        email: &str,
        display_name: Option<&str>,
        source: ContactSource,
    ) -> Result<bool, StorageError> {
        let now = now();
        let result = sqlx::query(
            r#"
            INSERT INTO contacts (
              id, user_id, email, display_name, source, send_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
            ON CONFLICT(user_id, email) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id.to_string())
        .bind(normalize_email(email))
        .bind(display_name)
        .bind(source.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Creates or bumps a recipient contact after an outgoing message.
    pub async fn record_contact_send(
        &self,
        user_id: Uuid,
        email: &str,
        display_name: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let now = now();
        sqlx::query(
            r#"
            INSERT INTO contacts (
              id, user_id, email, display_name, source, send_count,
              last_contacted_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 'auto', 1, ?5, ?6, ?6)
            ON CONFLICT(user_id, email) DO UPDATE SET
              send_count = contacts.send_count + 1,
              display_name = COALESCE(contacts.display_name, excluded.display_name),
              last_contacted_at = excluded.last_contacted_at,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id.to_string())
        .bind(normalize_email(email))
        .bind(display_name)
        .bind(timestamp(sent_at))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Merges an address-book entry: new addresses are inserted with source
    /// `provider`, existing rows only have empty fields filled in.
    pub async fn merge_provider_contact(
        &self,
        user_id: Uuid,
        contact: &RemoteContact,
    ) -> Result<u32, StorageError> {
        let mut created = 0;
        for email in &contact.emails {
            let email = normalize_email(email);
            let now = now();
            let inserted = sqlx::query(
                r#"
                INSERT INTO contacts (
                  id, user_id, email, display_name, phone, organization, source,
                  send_count, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'provider', 0, ?7, ?7)
                ON CONFLICT(user_id, email) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id.to_string())
            .bind(&email)
            .bind(&contact.display_name)
            .bind(contact.phones.first())
            .bind(&contact.organization)
            .bind(&now)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 1 {
                created += 1;
                continue;
            }

            sqlx::query(
                r#"
                UPDATE contacts SET
                  display_name = COALESCE(display_name, ?3),
                  phone = COALESCE(phone, ?4),
                  organization = COALESCE(organization, ?5),
                  updated_at = ?6
                WHERE user_id = ?1 AND email = ?2
                "#,
            )
            .bind(user_id.to_string())
            .bind(&email)
            .bind(&contact.display_name)
            .bind(contact.phones.first())
            .bind(&contact.organization)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }

        Ok(created)
    }

    pub async fn get_contact(&self, user_id: Uuid, email: &str) -> Result<Option<Contact>, StorageError> {
        let row = sqlx::query("SELECT * FROM contacts WHERE user_id = ?1 AND email = ?2")
            .bind(user_id.to_string())
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_contact).transpose()
    }

    pub async fn list_contacts(&self, user_id: Uuid) -> Result<Vec<Contact>, StorageError> {
        let rows = sqlx::query("SELECT * FROM contacts WHERE user_id = ?1 ORDER BY email")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_contact).collect()
    }

    // -- notifications --------------------------------------------------------

    pub async fn enqueue_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<Notification, StorageError> {
        let stored = Notification {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            kind: notification.kind,
            title: notification.title.clone(),
            message: notification.message.clone(),
            link: notification.link.clone(),
            created_at: Utc::now(),
            read_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, message, link, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(stored.id.to_string())
        .bind(stored.user_id.to_string())
        .bind(stored.kind.as_str())
        .bind(&stored.title)
        .bind(&stored.message)
        .bind(&stored.link)
        .bind(timestamp(stored.created_at))
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    pub async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_notification).collect()
    }

    pub async fn mark_notification_read(&self, notification_id: Uuid) -> Result<(), StorageError> {
        sqlx::query("UPDATE notifications SET read_at = COALESCE(read_at, ?2) WHERE id = ?1")
            .bind(notification_id.to_string())
            .bind(now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // -- snoozes --------------------------------------------------------------

    /// One snooze per message; snoozing again replaces the wake time.
    pub async fn upsert_snooze(&self, snooze: &Snooze) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO snoozes (
              id, message_id, account_id, user_id, original_folder_id,
              original_folder_type, wake_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(message_id) DO UPDATE SET
              wake_at = excluded.wake_at
            "#,
        )
        .bind(snooze.id.to_string())
        .bind(snooze.message_id.to_string())
        .bind(snooze.account_id.to_string())
        .bind(snooze.user_id.to_string())
        .bind(&snooze.original_folder_id)
        .bind(snooze.original_folder_type.as_str())
        .bind(timestamp(snooze.wake_at))
        .bind(timestamp(snooze.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_snooze_for_message(&self, message_id: Uuid) -> Result<Option<Snooze>, StorageError> {
        let row = sqlx::query("SELECT * FROM snoozes WHERE message_id = ?1")
            .bind(message_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_snooze).transpose()
    }

    pub async fn due_snoozes(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Snooze>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM snoozes WHERE wake_at <= ?1 ORDER BY wake_at ASC LIMIT ?2",
        )
        .bind(timestamp(now))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_snooze).collect()
    }

    pub async fn delete_snooze(&self, snooze_id: Uuid) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM snoozes WHERE id = ?1")
            .bind(snooze_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete_snoozes_for_message(&self, message_id: Uuid) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM snoozes WHERE message_id = ?1")
            .bind(message_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn row_to_rule(row: SqliteRow) -> Result<EmailRule, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let user_raw: String = row.try_get("user_id")?;
        let mode_raw: String = row.try_get("match_mode")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(EmailRule {
            id: parse_uuid(&id_raw, "email_rules.id")?,
            user_id: parse_uuid(&user_raw, "email_rules.user_id")?,
            name: row.try_get("name")?,
            priority: row.try_get("priority")?,
            match_mode: parse_enum(&mode_raw, "email_rules.match_mode")?,
            conditions: parse_json(
                &row.try_get::<String, _>("conditions_json")?,
                "email_rules.conditions_json",
            )?,
            actions: parse_json(
                &row.try_get::<String, _>("actions_json")?,
                "email_rules.actions_json",
            )?,
            is_active: row.try_get("is_active")?,
            applied_count: row.try_get::<i64, _>("applied_count")? as u64,
            created_at: parse_datetime(&created_raw, "email_rules.created_at")?,
            updated_at: parse_datetime(&updated_raw, "email_rules.updated_at")?,
        })
    }

    fn row_to_contact(row: SqliteRow) -> Result<Contact, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let user_raw: String = row.try_get("user_id")?;
        let source_raw: String = row.try_get("source")?;
        let contacted_raw: Option<String> = row.try_get("last_contacted_at")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(Contact {
            id: parse_uuid(&id_raw, "contacts.id")?,
            user_id: parse_uuid(&user_raw, "contacts.user_id")?,
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            phone: row.try_get("phone")?,
            organization: row.try_get("organization")?,
            source: parse_enum(&source_raw, "contacts.source")?,
            send_count: row.try_get::<i64, _>("send_count")? as u32,
            last_contacted_at: parse_optional_datetime(contacted_raw, "contacts.last_contacted_at")?,
            created_at: parse_datetime(&created_raw, "contacts.created_at")?,
            updated_at: parse_datetime(&updated_raw, "contacts.updated_at")?,
        })
    }

    fn row_to_notification(row: SqliteRow) -> Result<Notification, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let user_raw: String = row.try_get("user_id")?;
        let kind_raw: String = row.try_get("kind")?;
        let created_raw: String = row.try_get("created_at")?;
        let read_raw: Option<String> = row.try_get("read_at")?;

        Ok(Notification {
            id: parse_uuid(&id_raw, "notifications.id")?,
            user_id: parse_uuid(&user_raw, "notifications.user_id")?,
            kind: parse_enum(&kind_raw, "notifications.kind")?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            link: row.try_get("link")?,
            created_at: parse_datetime(&created_raw, "notifications.created_at")?,
            read_at: parse_optional_datetime(read_raw, "notifications.read_at")?,
        })
    }

    fn row_to_snooze(row: SqliteRow) -> Result<Snooze, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let message_raw: String = row.try_get("message_id")?;
        let account_raw: String = row.try_get("account_id")?;
        let user_raw: String = row.try_get("user_id")?;
        let folder_type_raw: String = row.try_get("original_folder_type")?;
        let wake_raw: String = row.try_get("wake_at")?;
        let created_raw: String = row.try_get("created_at")?;

        Ok(Snooze {
            id: parse_uuid(&id_raw, "snoozes.id")?,
            message_id: parse_uuid(&message_raw, "snoozes.message_id")?,
            account_id: parse_uuid(&account_raw, "snoozes.account_id")?,
            user_id: parse_uuid(&user_raw, "snoozes.user_id")?,
            original_folder_id: row.try_get("original_folder_id")?,
            original_folder_type: parse_enum(&folder_type_raw, "snoozes.original_folder_type")?,
            wake_at: parse_datetime(&wake_raw, "snoozes.wake_at")?,
            created_at: parse_datetime(&created_raw, "snoozes.created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use harbor_core::{FolderType, MatchMode, NotificationKind};
    use serde_json::json;

    #[tokio::test]
    async fn contact_insert_is_unique_per_user_and_case_insensitive() {
        let storage = Storage::in_memory().await.expect("storage");
        let user_id = Uuid::new_v4();

        assert!(storage
            .insert_contact_if_absent(user_id, "Alice@Example.com", Some("Alice"), ContactSource::Auto)
            .await
            .expect("first insert"));
        assert!(!storage
            .insert_contact_if_absent(user_id, "alice@example.com ", None, ContactSource::Auto)
            .await
            .expect("second insert"));
        assert!(storage
            .insert_contact_if_absent(Uuid::new_v4(), "alice@example.com", None, ContactSource::Auto)
            .await
            .expect("other user"));

        let contacts = storage.list_contacts(user_id).await.expect("list");
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].email, "alice@example.com");
        assert_eq!(contacts[0].source, ContactSource::Auto);
    }

    #[tokio::test]
    async fn sends_increment_the_counter() {
        let storage = Storage::in_memory().await.expect("storage");
        let user_id = Uuid::new_v4();

        for _ in 0..2 {
            storage
                .record_contact_send(user_id, "bob@example.com", Some("Bob"), Utc::now())
                .await
                .expect("record send");
        }

        let contact = storage
            .get_contact(user_id, "bob@example.com")
            .await
            .expect("load")
            .expect("present");
        assert_eq!(contact.send_count, 2);
        assert!(contact.last_contacted_at.is_some());
    }

    #[tokio::test]
    async fn provider_contacts_fill_gaps_without_overwriting() {
        let storage = Storage::in_memory().await.expect("storage");
        let user_id = Uuid::new_v4();
        storage
            .insert_contact_if_absent(user_id, "carol@example.com", Some("Carol"), ContactSource::Manual)
            .await
            .expect("manual contact");

        let remote = RemoteContact {
            provider_contact_id: "people/c1".to_string(),
            display_name: Some("Carol C.".to_string()),
            emails: vec!["carol@example.com".to_string(), "carol@work.example".to_string()],
            phones: vec!["+1 555 0100".to_string()],
            organization: Some("Acme".to_string()),
        };
        let created = storage
            .merge_provider_contact(user_id, &remote)
            .await
            .expect("merge");
        assert_eq!(created, 1);

        let carol = storage
            .get_contact(user_id, "carol@example.com")
            .await
            .expect("load")
            .expect("present");
        assert_eq!(carol.display_name.as_deref(), Some("Carol"));
        assert_eq!(carol.phone.as_deref(), Some("+1 555 0100"));
        assert_eq!(carol.source, ContactSource::Manual);
    }

    #[tokio::test]
    async fn active_rules_come_back_in_priority_order() {
        let storage = Storage::in_memory().await.expect("storage");
        let user_id = Uuid::new_v4();
        for (name, priority, active) in [("late", 20, true), ("early", 10, true), ("off", 1, false)] {
            let now = Utc::now();
            storage
                .upsert_rule(&EmailRule {
                    id: Uuid::new_v4(),
                    user_id,
                    name: name.to_string(),
                    priority,
                    match_mode: MatchMode::All,
                    conditions: json!([]),
                    actions: json!([{ "type": "mark_read" }]),
                    is_active: active,
                    applied_count: 0,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .expect("upsert rule");
        }

        let names: Vec<String> = storage
            .list_active_rules(user_id)
            .await
            .expect("list")
            .into_iter()
            .map(|rule| rule.name)
            .collect();
        assert_eq!(names, vec!["early".to_string(), "late".to_string()]);
    }

    #[tokio::test]
    async fn due_snoozes_respect_wake_time() {
        let storage = Storage::in_memory().await.expect("storage");
        let now = Utc::now();
        let snooze = |wake_at| Snooze {
            id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            original_folder_id: Some("INBOX".to_string()),
            original_folder_type: FolderType::Inbox,
            wake_at,
            created_at: now,
        };
        let due = snooze(now - Duration::minutes(1));
        storage.upsert_snooze(&due).await.expect("due");
        storage
            .upsert_snooze(&snooze(now + Duration::hours(1)))
            .await
            .expect("future");

        let found = storage.due_snoozes(now, 10).await.expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message_id, due.message_id);

        assert_eq!(
            storage
                .delete_snoozes_for_message(due.message_id)
                .await
                .expect("delete"),
            1
        );
    }

    #[tokio::test]
    async fn notifications_are_queued_per_user() {
        let storage = Storage::in_memory().await.expect("storage");
        let user_id = Uuid::new_v4();
        let queued = storage
            .enqueue_notification(&NewNotification {
                user_id,
                kind: NotificationKind::SyncError,
                title: "Sync paused".to_string(),
                message: "Reconnect your account".to_string(),
                link: Some("/settings/accounts".to_string()),
            })
            .await
            .expect("enqueue");

        storage.mark_notification_read(queued.id).await.expect("read");
        let listed = storage.list_notifications(user_id).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, NotificationKind::SyncError);
        assert!(listed[0].read_at.is_some());
    }
}

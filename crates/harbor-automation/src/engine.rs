use crate::limiter::{UsageLimiter, RULE_EXECUTIONS_MONTHLY};
use crate::rules::{decode_actions, first_match, RuleAction};
use crate::AutomationError;
use chrono::{DateTime, Utc};
use harbor_core::{
    ContactSource, EmailRule, FolderType, NewNotification, NormalizedMessage, NotificationKind,
    Participant, Snooze, SyncStatus,
};
use harbor_storage::Storage;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_ERROR_THRESHOLD: u32 = 3;

/// Something that changed in the datastore and may need follow-up work.
#[derive(Debug, Clone)]
pub enum AutomationEvent {
    MessageReceived {
        user_id: Uuid,
        /// The row as stored, carrying the stored id.
        message: NormalizedMessage,
        newly_inserted: bool,
        previous_folder_id: Option<String>,
    },
    MessageSent {
        user_id: Uuid,
        account_id: Uuid,
        recipients: Vec<Participant>,
        sent_at: DateTime<Utc>,
        folder_id: Option<String>,
    },
    MessageDeleted {
        account_id: Uuid,
        message_id: Uuid,
        folder_id: Option<String>,
    },
    SnoozeExpired {
        snooze: Snooze,
    },
    SyncError {
        user_id: Uuid,
        account_id: Uuid,
        error_count: u32,
        error: String,
    },
    TokenRefreshFailed {
        user_id: Uuid,
        account_id: Uuid,
        error: String,
    },
    MembershipChanged {
        organization_id: Uuid,
        joined: bool,
    },
}

impl AutomationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::SnoozeExpired { .. } => "snooze_expired",
            Self::SyncError { .. } => "sync_error",
            Self::TokenRefreshFailed { .. } => "token_refresh_failed",
            Self::MembershipChanged { .. } => "membership_changed",
        }
    }
}

/// What happened when a message was run through the user's rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub rule_id: Uuid,
    /// False when the usage limiter denied the execution.
    pub executed: bool,
    pub actions_applied: usize,
    pub actions_failed: usize,
}

#[derive(Clone)]
pub struct AutomationEngine {
    storage: Storage,
    limiter: UsageLimiter,
    error_threshold: u32,
}

impl AutomationEngine {
    pub fn new(storage: Storage) -> Self {
        let limiter = UsageLimiter::new(storage.clone());
        Self {
            storage,
            limiter,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }

    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold.max(1);
        self
    }

    pub fn limiter(&self) -> &UsageLimiter {
        &self.limiter
    }

    pub fn error_threshold(&self) -> u32 {
        self.error_threshold
    }

    /// Runs the handler for an event, logging instead of propagating failure
    /// so callers inside a sync loop are never interrupted.
    pub async fn dispatch(&self, event: AutomationEvent) {
        let name = event.name();
        if let Err(err) = self.handle(event).await {
            error!(event = name, error = %err, "automation handler failed");
        }
    }

    pub async fn handle(&self, event: AutomationEvent) -> Result<(), AutomationError> {
        match event {
            AutomationEvent::MessageReceived {
                user_id,
                message,
                newly_inserted,
                previous_folder_id,
            } => {
                self.on_message_received(user_id, message, newly_inserted, previous_folder_id)
                    .await
            }
            AutomationEvent::MessageSent {
                user_id,
                account_id,
                recipients,
                sent_at,
                folder_id,
            } => {
                self.on_message_sent(user_id, account_id, &recipients, sent_at, folder_id.as_deref())
                    .await
            }
            AutomationEvent::MessageDeleted {
                account_id,
                message_id,
                folder_id,
            } => self.on_message_deleted(account_id, message_id, folder_id.as_deref()).await,
            AutomationEvent::SnoozeExpired { snooze } => self.on_snooze_expired(snooze).await,
            AutomationEvent::SyncError {
                user_id,
                account_id,
                error_count,
                error,
            } => self.on_sync_error(user_id, account_id, error_count, &error).await,
            AutomationEvent::TokenRefreshFailed {
                user_id,
                account_id,
                error,
            } => self.on_token_refresh_failed(user_id, account_id, &error).await,
            AutomationEvent::MembershipChanged {
                organization_id,
                joined,
            } => {
                let seats = if joined {
                    self.storage.increment_seats(organization_id).await?
                } else {
                    self.storage.decrement_seats(organization_id).await?
                };
                debug!(%organization_id, joined, seats, "seat usage adjusted");
                Ok(())
            }
        }
    }

    // -- rules ----------------------------------------------------------------

    /// Runs the first matching active rule (ascending priority) against the
    /// message and stops. Each action has its own error scope; `message` is
    /// updated with every action that was persisted.
    pub async fn evaluate_rules(
        &self,
        user_id: Uuid,
        message: &mut NormalizedMessage,
    ) -> Result<Option<RuleOutcome>, AutomationError> {
        let rules = self.storage.list_active_rules(user_id).await?;
        let Some(rule) = first_match(&rules, message) else {
            return Ok(None);
        };

        let decision = self.limiter.check_for_user(user_id, RULE_EXECUTIONS_MONTHLY).await;
        if !decision.allowed {
            info!(%user_id, rule_id = %rule.id, "rule execution quota reached; actions skipped");
            return Ok(Some(RuleOutcome {
                rule_id: rule.id,
                executed: false,
                actions_applied: 0,
                actions_failed: 0,
            }));
        }

        let mut applied = 0;
        let mut failed = 0;
        for action in decode_actions(rule) {
            match self.apply_action(rule, &action, message).await {
                Ok(()) => applied += 1,
                Err(err) => {
                    failed += 1;
                    warn!(rule_id = %rule.id, action = ?action, error = %err, "rule action failed");
                }
            }
        }

        if let Err(err) = self.limiter.track_feature_usage(user_id, RULE_EXECUTIONS_MONTHLY).await {
            warn!(%user_id, error = %err, "failed to record rule execution");
        }
        self.storage.increment_rule_applied(rule.id).await?;
        info!(rule_id = %rule.id, message_id = %message.id, applied, failed, "rule applied");

        Ok(Some(RuleOutcome {
            rule_id: rule.id,
            executed: true,
            actions_applied: applied,
            actions_failed: failed,
        }))
    }

    async fn apply_action(
        &self,
        rule: &EmailRule,
        action: &RuleAction,
        message: &mut NormalizedMessage,
    ) -> Result<(), AutomationError> {
        let mut next = message.clone();

        match action {
            RuleAction::MoveToFolder { folder_type: None } => {
                debug!(rule_id = %rule.id, "move_to_folder without folder_type; no-op");
                return Ok(());
            }
            RuleAction::MoveToFolder {
                folder_type: Some(folder_type),
            } => {
                let Some(mapping) = self
                    .storage
                    .find_folder_by_type(next.account_id, *folder_type)
                    .await?
                else {
                    debug!(rule_id = %rule.id, %folder_type, "no folder of that type on the account; move skipped");
                    return Ok(());
                };
                next.folder_type = *folder_type;
                next.folder_id = Some(mapping.provider_folder_id);
            }
            RuleAction::AddLabel { label } => {
                if !next.labels.iter().any(|existing| existing == label) {
                    next.labels.push(label.clone());
                }
            }
            RuleAction::RemoveLabel { label } => next.labels.retain(|existing| existing != label),
            RuleAction::MarkRead => next.flags.unread = false,
            RuleAction::MarkUnread => next.flags.unread = true,
            RuleAction::MarkStarred => next.flags.starred = true,
            RuleAction::Archive => self.archive_in_place(&mut next).await?,
            RuleAction::Delete => next.deleted_at = Some(Utc::now()),
            RuleAction::AddCategory { category } => {
                if !next.categories.iter().any(|existing| existing == category) {
                    next.categories.push(category.clone());
                }
            }
            RuleAction::Notify { title, message: body } => {
                let notification = NewNotification {
                    user_id: rule.user_id,
                    kind: NotificationKind::RuleAlert,
                    title: title
                        .clone()
                        .unwrap_or_else(|| format!("Rule \"{}\" matched", rule.name)),
                    message: body.clone().unwrap_or_else(|| message.subject.clone()),
                    link: Some(message_link(message.id)),
                };
                self.storage.enqueue_notification(&notification).await?;
                return Ok(());
            }
        }

        self.storage.save_message_state(&next).await?;
        *message = next;
        Ok(())
    }

    /// Points the message at the account's archive folder; without a mapping
    /// only the semantic type changes.
    async fn archive_in_place(&self, message: &mut NormalizedMessage) -> Result<(), AutomationError> {
        let mapping = self
            .storage
            .find_folder_by_type(message.account_id, FolderType::Archive)
            .await?;
        message.folder_type = FolderType::Archive;
        message.folder_id = mapping.map(|folder| folder.provider_folder_id);
        Ok(())
    }

    // -- handlers -------------------------------------------------------------

    async fn on_message_received(
        &self,
        user_id: Uuid,
        mut message: NormalizedMessage,
        newly_inserted: bool,
        previous_folder_id: Option<String>,
    ) -> Result<(), AutomationError> {
        let mut touched: BTreeSet<String> = BTreeSet::new();
        touched.extend(message.folder_id.clone());
        touched.extend(previous_folder_id);

        if newly_inserted {
            if let Err(err) = self.evaluate_rules(user_id, &mut message).await {
                warn!(message_id = %message.id, error = %err, "rule evaluation failed");
            }
            touched.extend(message.folder_id.clone());

            if let Err(err) = self.ensure_sender_contact(user_id, &message).await {
                warn!(message_id = %message.id, error = %err, "sender contact creation failed");
            }
        }

        self.recompute_counts(message.account_id, touched).await;
        Ok(())
    }

    async fn ensure_sender_contact(&self, user_id: Uuid, message: &NormalizedMessage) -> Result<(), AutomationError> {
        let Some(sender) = message.sender() else {
            return Ok(());
        };
        if sender.email.trim().is_empty() {
            return Ok(());
        }

        let own_address = self
            .storage
            .get_account(message.account_id)
            .await?
            .map(|account| account.email_address);
        if own_address.is_some_and(|own| own.eq_ignore_ascii_case(&sender.email)) {
            return Ok(());
        }

        let created = self
            .storage
            .insert_contact_if_absent(user_id, &sender.email, sender.name.as_deref(), ContactSource::Auto)
            .await?;
        if created {
            debug!(%user_id, "contact auto-created from sender");
        }
        Ok(())
    }

    async fn on_message_sent(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        recipients: &[Participant],
        sent_at: DateTime<Utc>,
        folder_id: Option<&str>,
    ) -> Result<(), AutomationError> {
        for recipient in recipients {
            if let Err(err) = self
                .storage
                .record_contact_send(user_id, &recipient.email, recipient.name.as_deref(), sent_at)
                .await
            {
                warn!(%user_id, error = %err, "recipient contact update failed");
            }
        }

        self.recompute_counts(account_id, folder_id.map(str::to_string)).await;
        Ok(())
    }

    async fn on_message_deleted(
        &self,
        account_id: Uuid,
        message_id: Uuid,
        folder_id: Option<&str>,
    ) -> Result<(), AutomationError> {
        let removed = self.storage.delete_snoozes_for_message(message_id).await?;
        if removed > 0 {
            debug!(%message_id, removed, "snooze dropped for deleted message");
        }

        self.recompute_counts(account_id, folder_id.map(str::to_string)).await;
        Ok(())
    }

    async fn on_snooze_expired(&self, snooze: Snooze) -> Result<(), AutomationError> {
        let Some(mut message) = self.storage.get_message(snooze.message_id).await? else {
            self.storage.delete_snooze(snooze.id).await?;
            return Ok(());
        };

        let snoozed_in = message.folder_id.clone();
        message.folder_id = snooze.original_folder_id.clone();
        message.folder_type = snooze.original_folder_type;
        message.flags.unread = true;
        self.storage.save_message_state(&message).await?;

        self.storage
            .enqueue_notification(&NewNotification {
                user_id: snooze.user_id,
                kind: NotificationKind::SnoozeExpired,
                title: "Snoozed message is back".to_string(),
                message: message.subject.clone(),
                link: Some(message_link(message.id)),
            })
            .await?;
        self.storage.delete_snooze(snooze.id).await?;

        let touched: BTreeSet<String> = snoozed_in.into_iter().chain(message.folder_id.clone()).collect();
        self.recompute_counts(message.account_id, touched).await;
        info!(message_id = %message.id, "snoozed message restored");
        Ok(())
    }

    async fn on_sync_error(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        error_count: u32,
        error: &str,
    ) -> Result<(), AutomationError> {
        if error_count < self.error_threshold {
            debug!(%account_id, error_count, "sync failure below escalation threshold");
            self.storage
                .set_sync_status(account_id, SyncStatus::Idle, Some(error))
                .await?;
            return Ok(());
        }

        self.storage
            .set_sync_status(account_id, SyncStatus::Error, Some(error))
            .await?;
        if error_count > self.error_threshold {
            debug!(%account_id, error_count, "account already escalated");
            return Ok(());
        }

        warn!(%account_id, error_count, "sync failures reached threshold; account needs attention");
        self.storage
            .enqueue_notification(&NewNotification {
                user_id,
                kind: NotificationKind::SyncError,
                title: "Mailbox sync keeps failing".to_string(),
                message: format!(
                    "Syncing stopped after {error_count} failed attempts. Reconnect the account to resume."
                ),
                link: Some(reconnect_link(account_id)),
            })
            .await?;
        Ok(())
    }

    async fn on_token_refresh_failed(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        error: &str,
    ) -> Result<(), AutomationError> {
        self.storage
            .set_sync_status(account_id, SyncStatus::Error, Some(error))
            .await?;

        let link = reconnect_link(account_id);
        let already_queued = self
            .storage
            .list_notifications(user_id)
            .await?
            .iter()
            .any(|n| {
                n.kind == NotificationKind::ReconnectRequired
                    && n.read_at.is_none()
                    && n.link.as_deref() == Some(link.as_str())
            });
        if already_queued {
            return Ok(());
        }

        self.storage
            .enqueue_notification(&NewNotification {
                user_id,
                kind: NotificationKind::ReconnectRequired,
                title: "Reconnect your mailbox".to_string(),
                message: "The provider rejected our saved sign-in. Sign in again to resume syncing."
                    .to_string(),
                link: Some(link),
            })
            .await?;
        warn!(%account_id, "token refresh failed; reconnect requested");
        Ok(())
    }

    // -- snoozes --------------------------------------------------------------

    /// Hides the message until `wake_at`, remembering where it came from.
    pub async fn snooze_message(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        wake_at: DateTime<Utc>,
    ) -> Result<Snooze, AutomationError> {
        if wake_at <= Utc::now() {
            return Err(AutomationError::InvalidSnooze(
                "wake time must be in the future".to_string(),
            ));
        }

        let mut message = self
            .storage
            .get_message(message_id)
            .await?
            .ok_or(AutomationError::MessageNotFound(message_id))?;

        // Re-snoozing keeps the folder recorded by the first snooze.
        let existing = self.storage.get_snooze_for_message(message_id).await?;
        let (original_folder_id, original_folder_type) = match &existing {
            Some(snooze) => (snooze.original_folder_id.clone(), snooze.original_folder_type),
            None => (message.folder_id.clone(), message.folder_type),
        };

        let snooze = Snooze {
            id: existing.as_ref().map(|s| s.id).unwrap_or_else(Uuid::new_v4),
            message_id,
            account_id: message.account_id,
            user_id,
            original_folder_id,
            original_folder_type,
            wake_at,
            created_at: existing.as_ref().map(|s| s.created_at).unwrap_or_else(Utc::now),
        };
        self.storage.upsert_snooze(&snooze).await?;

        let previous = message.folder_id.clone();
        self.archive_in_place(&mut message).await?;
        self.storage.save_message_state(&message).await?;

        let touched: BTreeSet<String> = previous.into_iter().chain(message.folder_id.clone()).collect();
        self.recompute_counts(message.account_id, touched).await;
        Ok(snooze)
    }

    async fn recompute_counts(&self, account_id: Uuid, folders: impl IntoIterator<Item = String>) {
        for folder_id in folders {
            if let Err(err) = self.storage.recompute_folder_counts(account_id, &folder_id).await {
                warn!(%account_id, folder_id, error = %err, "folder count recompute failed");
            }
        }
    }
}

fn message_link(message_id: Uuid) -> String {
    format!("harbor://messages/{message_id}")
}

fn reconnect_link(account_id: Uuid) -> String {
    format!("harbor://accounts/{account_id}/reconnect")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use harbor_core::{EmailAccount, Folder, Importance, MatchMode, MessageFlags, PlanTier, ProviderKind};
    use serde_json::{json, Value};

    async fn setup() -> (AutomationEngine, Storage, EmailAccount) {
        let storage = Storage::in_memory().await.expect("storage");
        let now = Utc::now();
        let account = EmailAccount {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider: ProviderKind::Gmail,
            email_address: "me@example.com".to_string(),
            display_name: None,
            is_primary: true,
            sync_status: SyncStatus::Idle,
            last_error: None,
            last_synced_at: None,
            archived_at: None,
            created_at: now,
            updated_at: now,
        };
        storage.insert_account(&account).await.expect("account");
        for (id, folder_type) in [("INBOX", FolderType::Inbox), ("Archive", FolderType::Archive)] {
            storage
                .upsert_folder(
                    account.id,
                    &Folder {
                        id: id.to_string(),
                        name: id.to_string(),
                        folder_type,
                        unread_count: 0,
                        total_count: 0,
                    },
                )
                .await
                .expect("folder");
        }
        (AutomationEngine::new(storage.clone()), storage, account)
    }

    async fn stored_message(storage: &Storage, account_id: Uuid, provider_id: &str, sender: &str) -> NormalizedMessage {
        let now = Utc::now();
        let message = NormalizedMessage {
            id: Uuid::new_v4(),
            account_id,
            provider_message_id: provider_id.to_string(),
            provider_thread_id: None,
            from: vec![Participant::named(sender, "Sender")],
            to: vec![Participant::new("me@example.com")],
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            subject: "Weekly newsletter".to_string(),
            body_html: None,
            body_text: Some("Top stories".to_string()),
            snippet: "Top stories".to_string(),
            folder_id: Some("INBOX".to_string()),
            folder_type: FolderType::Inbox,
            labels: vec!["INBOX".to_string()],
            categories: Vec::new(),
            flags: MessageFlags {
                unread: true,
                ..MessageFlags::default()
            },
            attachments: Vec::new(),
            importance: Importance::Normal,
            sent_at: Some(now),
            received_at: now,
            archived_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        let outcome = storage.upsert_message(&message).await.expect("upsert");
        storage
            .get_message(outcome.message_id)
            .await
            .expect("load")
            .expect("stored")
    }

    async fn add_rule(storage: &Storage, user_id: Uuid, priority: i32, conditions: Value, actions: Value) -> EmailRule {
        let now = Utc::now();
        let rule = EmailRule {
            id: Uuid::new_v4(),
            user_id,
            name: format!("rule {priority}"),
            priority,
            match_mode: MatchMode::All,
            conditions,
            actions,
            is_active: true,
            applied_count: 0,
            created_at: now,
            updated_at: now,
        };
        storage.upsert_rule(&rule).await.expect("rule");
        rule
    }

    fn newsletter() -> Value {
        json!([{ "field": "subject", "operator": "contains", "value": "newsletter" }])
    }

    #[tokio::test]
    async fn first_matching_rule_runs_and_later_rules_do_not() {
        let (engine, storage, account) = setup().await;
        let first = add_rule(
            &storage,
            account.user_id,
            1,
            newsletter(),
            json!([{ "type": "mark_read" }, { "type": "add_category", "category": "news" }]),
        )
        .await;
        let second = add_rule(
            &storage,
            account.user_id,
            2,
            newsletter(),
            json!([{ "type": "mark_starred" }]),
        )
        .await;

        let mut message = stored_message(&storage, account.id, "m-1", "news@paper.example").await;
        let outcome = engine
            .evaluate_rules(account.user_id, &mut message)
            .await
            .expect("evaluate")
            .expect("matched");

        assert_eq!(outcome.rule_id, first.id);
        assert_eq!(outcome.actions_applied, 2);

        let stored = storage.get_message(message.id).await.expect("load").expect("row");
        assert!(!stored.flags.unread);
        assert!(!stored.flags.starred);
        assert_eq!(stored.categories, vec!["news".to_string()]);

        assert_eq!(storage.get_rule(first.id).await.expect("rule").expect("row").applied_count, 1);
        assert_eq!(storage.get_rule(second.id).await.expect("rule").expect("row").applied_count, 0);
    }

    #[tokio::test]
    async fn move_without_folder_type_leaves_message_untouched() {
        let (engine, storage, account) = setup().await;
        add_rule(
            &storage,
            account.user_id,
            1,
            newsletter(),
            json!([{ "type": "move_to_folder" }, { "type": "teleport" }]),
        )
        .await;

        let mut message = stored_message(&storage, account.id, "m-1", "news@paper.example").await;
        let outcome = engine
            .evaluate_rules(account.user_id, &mut message)
            .await
            .expect("evaluate")
            .expect("matched");
        assert_eq!(outcome.actions_applied, 1);
        assert_eq!(outcome.actions_failed, 0);

        let stored = storage.get_message(message.id).await.expect("load").expect("row");
        assert_eq!(stored.folder_id.as_deref(), Some("INBOX"));
        assert_eq!(stored.folder_type, FolderType::Inbox);
    }

    #[tokio::test]
    async fn move_to_unmapped_folder_type_is_skipped() {
        let (engine, storage, account) = setup().await;
        add_rule(
            &storage,
            account.user_id,
            1,
            newsletter(),
            json!([
                { "type": "move_to_folder", "folder_type": "spam" },
                { "type": "mark_read" }
            ]),
        )
        .await;

        let mut message = stored_message(&storage, account.id, "m-1", "news@paper.example").await;
        let outcome = engine
            .evaluate_rules(account.user_id, &mut message)
            .await
            .expect("evaluate")
            .expect("matched");
        assert_eq!(outcome.actions_failed, 0);

        let stored = storage.get_message(message.id).await.expect("load").expect("row");
        assert_eq!(stored.folder_id.as_deref(), Some("INBOX"));
        assert_eq!(stored.folder_type, FolderType::Inbox);
        assert!(!stored.flags.unread);
    }

    #[tokio::test]
    async fn move_and_delete_actions_change_placement() {
        let (engine, storage, account) = setup().await;
        add_rule(
            &storage,
            account.user_id,
            1,
            newsletter(),
            json!([
                { "type": "move_to_folder", "folder_type": "archive" },
                { "type": "delete" },
                { "type": "notify", "title": "Filed" }
            ]),
        )
        .await;

        let mut message = stored_message(&storage, account.id, "m-1", "news@paper.example").await;
        engine
            .evaluate_rules(account.user_id, &mut message)
            .await
            .expect("evaluate");

        let stored = storage.get_message(message.id).await.expect("load").expect("row");
        assert_eq!(stored.folder_id.as_deref(), Some("Archive"));
        assert_eq!(stored.folder_type, FolderType::Archive);
        assert!(stored.deleted_at.is_some());

        let notifications = storage.list_notifications(account.user_id).await.expect("list");
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "Filed");
        assert_eq!(notifications[0].kind, NotificationKind::RuleAlert);
    }

    #[tokio::test]
    async fn exhausted_quota_skips_actions() {
        let (engine, storage, account) = setup().await;
        storage.set_user_plan(account.user_id, PlanTier::Free).await.expect("plan");
        let rule = add_rule(&storage, account.user_id, 1, newsletter(), json!([{ "type": "mark_read" }])).await;
        for _ in 0..500 {
            storage
                .record_usage_event(account.user_id, RULE_EXECUTIONS_MONTHLY, Utc::now())
                .await
                .expect("usage");
        }

        let mut message = stored_message(&storage, account.id, "m-1", "news@paper.example").await;
        let outcome = engine
            .evaluate_rules(account.user_id, &mut message)
            .await
            .expect("evaluate")
            .expect("matched");

        assert!(!outcome.executed);
        assert!(message.flags.unread);
        assert_eq!(storage.get_rule(rule.id).await.expect("rule").expect("row").applied_count, 0);
    }

    #[tokio::test]
    async fn received_message_creates_sender_contact_once() {
        let (engine, storage, account) = setup().await;

        for provider_id in ["m-1", "m-2"] {
            let message = stored_message(&storage, account.id, provider_id, "Friend@Example.com").await;
            engine
                .handle(AutomationEvent::MessageReceived {
                    user_id: account.user_id,
                    message,
                    newly_inserted: true,
                    previous_folder_id: None,
                })
                .await
                .expect("handle");
        }

        let contacts = storage.list_contacts(account.user_id).await.expect("contacts");
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].source, ContactSource::Auto);

        let inbox = storage.get_folder(account.id, "INBOX").await.expect("folder").expect("row");
        assert_eq!(inbox.total_count, 2);
        assert_eq!(inbox.unread_count, 2);
    }

    #[tokio::test]
    async fn sent_message_bumps_recipient_counters() {
        let (engine, storage, account) = setup().await;
        let event = || AutomationEvent::MessageSent {
            user_id: account.user_id,
            account_id: account.id,
            recipients: vec![Participant::named("bob@example.com", "Bob")],
            sent_at: Utc::now(),
            folder_id: None,
        };

        engine.handle(event()).await.expect("first");
        engine.handle(event()).await.expect("second");

        let contact = storage
            .get_contact(account.user_id, "bob@example.com")
            .await
            .expect("contact")
            .expect("row");
        assert_eq!(contact.send_count, 2);
    }

    #[tokio::test]
    async fn snooze_round_trip_restores_folder_and_notifies() {
        let (engine, storage, account) = setup().await;
        let mut message = stored_message(&storage, account.id, "m-1", "news@paper.example").await;
        message.flags.unread = false;
        storage.save_message_state(&message).await.expect("read");

        let snooze = engine
            .snooze_message(account.user_id, message.id, Utc::now() + Duration::hours(2))
            .await
            .expect("snooze");
        let hidden = storage.get_message(message.id).await.expect("load").expect("row");
        assert_eq!(hidden.folder_type, FolderType::Archive);

        engine
            .handle(AutomationEvent::SnoozeExpired { snooze })
            .await
            .expect("expire");

        let restored = storage.get_message(message.id).await.expect("load").expect("row");
        assert_eq!(restored.folder_id.as_deref(), Some("INBOX"));
        assert!(restored.flags.unread);
        assert!(storage.get_snooze_for_message(message.id).await.expect("snooze").is_none());

        let notifications = storage.list_notifications(account.user_id).await.expect("list");
        assert_eq!(notifications[0].kind, NotificationKind::SnoozeExpired);
    }

    #[tokio::test]
    async fn snooze_in_the_past_is_rejected() {
        let (engine, storage, account) = setup().await;
        let message = stored_message(&storage, account.id, "m-1", "news@paper.example").await;

        let result = engine
            .snooze_message(account.user_id, message.id, Utc::now() - Duration::minutes(1))
            .await;
        assert!(matches!(result, Err(AutomationError::InvalidSnooze(_))));
    }

    #[tokio::test]
    async fn sync_errors_escalate_exactly_at_threshold() {
        let (engine, storage, account) = setup().await;

        for count in 1..=4 {
            engine
                .handle(AutomationEvent::SyncError {
                    user_id: account.user_id,
                    account_id: account.id,
                    error_count: count,
                    error: "503 from provider".to_string(),
                })
                .await
                .expect("handle");

            let status = storage.require_account(account.id).await.expect("account").sync_status;
            let expected = if count < 3 { SyncStatus::Idle } else { SyncStatus::Error };
            assert_eq!(status, expected, "after failure {count}");
        }

        let notifications = storage.list_notifications(account.user_id).await.expect("list");
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::SyncError);
    }

    #[tokio::test]
    async fn token_refresh_failure_queues_one_reconnect_notice() {
        let (engine, storage, account) = setup().await;
        for _ in 0..2 {
            engine
                .handle(AutomationEvent::TokenRefreshFailed {
                    user_id: account.user_id,
                    account_id: account.id,
                    error: "invalid_grant".to_string(),
                })
                .await
                .expect("handle");
        }

        let notifications = storage.list_notifications(account.user_id).await.expect("list");
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::ReconnectRequired);
        assert_eq!(
            storage.require_account(account.id).await.expect("account").sync_status,
            SyncStatus::Error
        );
    }

    #[tokio::test]
    async fn seat_counter_never_goes_negative() {
        let (engine, storage, _) = setup().await;
        let org = Uuid::new_v4();

        engine
            .handle(AutomationEvent::MembershipChanged {
                organization_id: org,
                joined: true,
            })
            .await
            .expect("join");
        for _ in 0..2 {
            engine
                .handle(AutomationEvent::MembershipChanged {
                    organization_id: org,
                    joined: false,
                })
                .await
                .expect("leave");
        }

        assert_eq!(storage.seats_used(org).await.expect("seats"), 0);
    }
}

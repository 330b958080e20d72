#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harbor_automation::AutomationEngine;
use harbor_core::{
    CalendarEvent, EmailAccount, Folder, FolderType, Importance, MessageChange, MessageFlags,
    NewCalendarEvent, NormalizedMessage, Participant, ProviderKind, PushSubscription, RemoteContact,
    SyncStatus, TokenSet,
};
use harbor_provider::{
    DeltaResult, ForwardDraft, ListQuery, MailboxAccess, MessagePage, MessageUpdate, OutgoingMessage,
    ProviderAdapter, ProviderError, ProviderRegistry, ReplyDraft, SentMessage, SubscriptionRequest,
};
use harbor_security::{OAuthPkceSession, TokenCipher};
use harbor_storage::Storage;
use harbor_sync::{
    AccountService, MailboxService, SyncOrchestrator, SyncSettings, TokenManager, TokenSettings,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// One scripted answer to a cursor-based delta call.
pub enum ScriptedDelta {
    Changes(Vec<MessageChange>, String),
    Expired,
    Fail(u16),
}

#[derive(Default)]
struct FakeState {
    folders: Vec<Folder>,
    inbox: Vec<NormalizedMessage>,
    contacts: Vec<RemoteContact>,
    deltas: VecDeque<ScriptedDelta>,
    baselines: usize,
    deleted: Vec<String>,
}

/// In-memory provider with scripted deltas and observable call counts.
pub struct FakeProvider {
    state: Mutex<FakeState>,
    pub refresh_calls: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub fail_contacts: AtomicBool,
    refresh_delay: Duration,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::with_refresh_delay(Duration::ZERO)
    }

    pub fn with_refresh_delay(refresh_delay: Duration) -> Self {
        let state = FakeState {
            folders: vec![
                folder("INBOX", "Inbox", FolderType::Inbox),
                folder("SENT", "Sent", FolderType::Sent),
                folder("TRASH", "Trash", FolderType::Trash),
                folder("Label_7", "Receipts", FolderType::Custom),
            ],
            ..FakeState::default()
        };
        Self {
            state: Mutex::new(state),
            refresh_calls: AtomicUsize::new(0),
            fail_refresh: AtomicBool::new(false),
            fail_contacts: AtomicBool::new(false),
            refresh_delay,
        }
    }

    pub fn push_inbox(&self, message: NormalizedMessage) {
        self.state.lock().expect("state").inbox.push(message);
    }

    pub fn push_contact(&self, contact: RemoteContact) {
        self.state.lock().expect("state").contacts.push(contact);
    }

    pub fn script(&self, delta: ScriptedDelta) {
        self.state.lock().expect("state").deltas.push_back(delta);
    }

    pub fn baselines(&self) -> usize {
        self.state.lock().expect("state").baselines
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().expect("state").deleted.clone()
    }

    fn unsupported<T>() -> Result<T, ProviderError> {
        Err(ProviderError::Unsupported("fake provider".to_string()))
    }
}

fn folder(id: &str, name: &str, folder_type: FolderType) -> Folder {
    Folder {
        id: id.to_string(),
        name: name.to_string(),
        folder_type,
        unread_count: 0,
        total_count: 0,
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    fn authorization_url(&self) -> Result<OAuthPkceSession, ProviderError> {
        Ok(OAuthPkceSession {
            authorization_url: "https://accounts.example.test/auth?state=s1".to_string(),
            csrf_state: "s1".to_string(),
            pkce_verifier: "verifier".to_string(),
        })
    }

    async fn exchange_code(&self, code: &str, _pkce_verifier: &str) -> Result<TokenSet, ProviderError> {
        Ok(TokenSet {
            access_token: format!("access-for-{code}"),
            refresh_token: Some("refresh-1".to_string()),
            expires_in_secs: Some(3600),
            scopes: vec!["mail".to_string()],
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ProviderError::Http {
                status: 400,
                body: "{\"error\":\"invalid_grant\"}".to_string(),
            });
        }
        assert_eq!(refresh_token, "refresh-1");
        Ok(TokenSet {
            access_token: format!("refreshed-{call}"),
            refresh_token: None,
            expires_in_secs: Some(3600),
            scopes: vec!["mail".to_string()],
        })
    }

    async fn list_messages(&self, access: &MailboxAccess, query: &ListQuery) -> Result<MessagePage, ProviderError> {
        let state = self.state.lock().expect("state");
        let messages = state
            .inbox
            .iter()
            .take(query.limit as usize)
            .cloned()
            .map(|mut message| {
                message.account_id = access.account_id;
                message
            })
            .collect();
        Ok(MessagePage {
            messages,
            next_cursor: None,
        })
    }

    async fn get_message(&self, _access: &MailboxAccess, _id: &str) -> Result<NormalizedMessage, ProviderError> {
        Self::unsupported()
    }

    async fn send_message(&self, _access: &MailboxAccess, _message: &OutgoingMessage) -> Result<SentMessage, ProviderError> {
        Ok(SentMessage {
            provider_message_id: Some("sent-1".to_string()),
            provider_thread_id: None,
        })
    }

    async fn reply_to_message(
        &self,
        _access: &MailboxAccess,
        _id: &str,
        _draft: &ReplyDraft,
    ) -> Result<SentMessage, ProviderError> {
        Ok(SentMessage::default())
    }

    async fn forward_message(
        &self,
        _access: &MailboxAccess,
        _id: &str,
        _draft: &ForwardDraft,
    ) -> Result<SentMessage, ProviderError> {
        Ok(SentMessage::default())
    }

    async fn move_message(&self, _access: &MailboxAccess, _id: &str, _destination: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn delete_message(&self, _access: &MailboxAccess, id: &str) -> Result<(), ProviderError> {
        self.state.lock().expect("state").deleted.push(id.to_string());
        Ok(())
    }

    async fn update_message(&self, _access: &MailboxAccess, _id: &str, _update: MessageUpdate) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn list_folders(&self, _access: &MailboxAccess) -> Result<Vec<Folder>, ProviderError> {
        Ok(self.state.lock().expect("state").folders.clone())
    }

    async fn create_folder(&self, _access: &MailboxAccess, _name: &str) -> Result<Folder, ProviderError> {
        Self::unsupported()
    }

    async fn delta_sync(&self, _access: &MailboxAccess, cursor: Option<&str>) -> Result<DeltaResult, ProviderError> {
        let mut state = self.state.lock().expect("state");
        let Some(cursor) = cursor else {
            state.baselines += 1;
            return Ok(DeltaResult {
                changes: Vec::new(),
                new_cursor: format!("C{}", state.baselines),
            });
        };

        match state.deltas.pop_front() {
            Some(ScriptedDelta::Changes(changes, new_cursor)) => Ok(DeltaResult { changes, new_cursor }),
            Some(ScriptedDelta::Expired) => Err(ProviderError::CursorExpired),
            Some(ScriptedDelta::Fail(status)) => Err(ProviderError::Http {
                status,
                body: "upstream unavailable".to_string(),
            }),
            None => Ok(DeltaResult {
                changes: Vec::new(),
                new_cursor: cursor.to_string(),
            }),
        }
    }

    async fn list_contacts(&self, _access: &MailboxAccess, limit: u32) -> Result<Vec<RemoteContact>, ProviderError> {
        if self.fail_contacts.load(Ordering::SeqCst) {
            return Err(ProviderError::Http {
                status: 403,
                body: "people api disabled".to_string(),
            });
        }
        let state = self.state.lock().expect("state");
        Ok(state.contacts.iter().take(limit as usize).cloned().collect())
    }

    async fn list_calendar_events(
        &self,
        _access: &MailboxAccess,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        Ok(Vec::new())
    }

    async fn create_calendar_event(
        &self,
        _access: &MailboxAccess,
        _event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, ProviderError> {
        Self::unsupported()
    }

    async fn create_subscription(
        &self,
        access: &MailboxAccess,
        request: &SubscriptionRequest,
    ) -> Result<PushSubscription, ProviderError> {
        Ok(PushSubscription {
            account_id: access.account_id,
            subscription_id: request.topic_name.clone().unwrap_or_else(|| "sub-1".to_string()),
            resource: "users/me/messages".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(2),
            client_state: None,
        })
    }

    async fn renew_subscription(
        &self,
        _access: &MailboxAccess,
        subscription: &PushSubscription,
    ) -> Result<PushSubscription, ProviderError> {
        let mut renewed = subscription.clone();
        renewed.expires_at = Utc::now() + chrono::Duration::days(7);
        Ok(renewed)
    }

    async fn delete_subscription(
        &self,
        _access: &MailboxAccess,
        _subscription: &PushSubscription,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

pub fn message(provider_message_id: &str, sender: &str, subject: &str) -> NormalizedMessage {
    let now = Utc::now();
    NormalizedMessage {
        id: Uuid::new_v4(),
        account_id: Uuid::nil(),
        provider_message_id: provider_message_id.to_string(),
        provider_thread_id: Some(format!("t-{provider_message_id}")),
        from: vec![Participant::named(sender, "Sender")],
        to: vec![Participant::new("me@example.com")],
        cc: Vec::new(),
        bcc: Vec::new(),
        reply_to: Vec::new(),
        subject: subject.to_string(),
        body_html: None,
        body_text: Some("hello".to_string()),
        snippet: "hello".to_string(),
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
    }
}

pub struct Harness {
    pub storage: Storage,
    pub provider: Arc<FakeProvider>,
    pub tokens: TokenManager,
    pub orchestrator: SyncOrchestrator,
    pub accounts: AccountService,
    pub mailbox: MailboxService,
    pub account: EmailAccount,
}

pub fn token_settings() -> TokenSettings {
    TokenSettings {
        lock_poll: Duration::from_millis(10),
        ..TokenSettings::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(FakeProvider::new(), token_settings()).await
}

/// Storage, services and one connected account holding an hour-long token.
pub async fn harness_with(provider: FakeProvider, settings: TokenSettings) -> Harness {
    let storage = Storage::in_memory().await.expect("storage");
    let provider = Arc::new(provider);
    let registry = ProviderRegistry::new().with_adapter(provider.clone());
    let cipher = TokenCipher::from_base64(&TokenCipher::generate_key()).expect("cipher");
    let tokens = TokenManager::new(storage.clone(), registry.clone(), cipher, settings);
    let automation = AutomationEngine::new(storage.clone());

    let orchestrator = SyncOrchestrator::new(
        storage.clone(),
        registry.clone(),
        tokens.clone(),
        automation.clone(),
        SyncSettings::default(),
    );
    let accounts = AccountService::new(storage.clone(), registry.clone(), tokens.clone());
    let mailbox = MailboxService::new(storage.clone(), registry, tokens.clone(), automation);

    let account = insert_account(&storage, Uuid::new_v4(), true).await;
    tokens
        .store_tokens(
            account.id,
            &TokenSet {
                access_token: "access-1".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                expires_in_secs: Some(3600),
                scopes: vec!["mail".to_string()],
            },
        )
        .await
        .expect("store tokens");

    Harness {
        storage,
        provider,
        tokens,
        orchestrator,
        accounts,
        mailbox,
        account,
    }
}

pub async fn insert_account(storage: &Storage, user_id: Uuid, is_primary: bool) -> EmailAccount {
    let now = Utc::now();
    let account = EmailAccount {
        id: Uuid::new_v4(),
        user_id,
        provider: ProviderKind::Gmail,
        email_address: "me@example.com".to_string(),
        display_name: None,
        is_primary,
        sync_status: SyncStatus::Idle,
        last_error: None,
        last_synced_at: None,
        archived_at: None,
        created_at: now,
        updated_at: now,
    };
    storage.insert_account(&account).await.expect("insert account");
    account
}

use crate::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harbor_core::{
    CalendarEvent, Folder, MessageChange, NewCalendarEvent, NormalizedMessage, Participant,
    ProviderKind, PushSubscription, RemoteContact, TokenSet,
};
use harbor_security::OAuthPkceSession;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The mailbox an adapter call acts on: the local account id that
/// normalized records are tagged with, plus a live access token.
#[derive(Clone)]
pub struct MailboxAccess {
    pub account_id: Uuid,
    pub access_token: String,
}

impl MailboxAccess {
    pub fn new(account_id: Uuid, access_token: impl Into<String>) -> Self {
        Self {
            account_id,
            access_token: access_token.into(),
        }
    }
}

impl std::fmt::Debug for MailboxAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxAccess")
            .field("account_id", &self.account_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    /// Provider folder or label id; the inbox when absent.
    pub folder_id: Option<String>,
    pub limit: u32,
    /// Opaque page token from a previous [`MessagePage`].
    pub cursor: Option<String>,
    /// Provider-native search expression.
    pub filter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<NormalizedMessage>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeltaResult {
    pub changes: Vec<MessageChange>,
    /// Cursor to persist for the next incremental run.
    pub new_cursor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub content_base64: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub from: Participant,
    pub to: Vec<Participant>,
    pub cc: Vec<Participant>,
    pub bcc: Vec<Participant>,
    pub reply_to: Vec<Participant>,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub attachments: Vec<OutgoingAttachment>,
}

impl OutgoingMessage {
    pub fn recipients(&self) -> impl Iterator<Item = &Participant> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyDraft {
    pub from: Participant,
    pub body_text: String,
    pub body_html: Option<String>,
    pub reply_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardDraft {
    pub from: Participant,
    pub to: Vec<Participant>,
    pub comment_text: String,
    pub comment_html: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentMessage {
    /// Graph's `sendMail` does not report the created id.
    pub provider_message_id: Option<String>,
    pub provider_thread_id: Option<String>,
}

/// Partial flag update; `None` leaves a flag untouched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub unread: Option<bool>,
    pub starred: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Cloud Pub/Sub topic for Gmail watches.
    pub topic_name: Option<String>,
    /// HTTPS endpoint for Graph change notifications.
    pub webhook_url: Option<String>,
    pub client_state: Option<String>,
}

/// One implementation per provider; callers never branch on the provider kind.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    // -- oauth ---------------------------------------------------------------

    fn authorization_url(&self) -> Result<OAuthPkceSession, ProviderError>;

    async fn exchange_code(&self, code: &str, pkce_verifier: &str) -> Result<TokenSet, ProviderError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ProviderError>;

    // -- mail ----------------------------------------------------------------

    async fn list_messages(&self, access: &MailboxAccess, query: &ListQuery) -> Result<MessagePage, ProviderError>;

    async fn get_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
    ) -> Result<NormalizedMessage, ProviderError>;

    async fn send_message(&self, access: &MailboxAccess, message: &OutgoingMessage) -> Result<SentMessage, ProviderError>;

    async fn reply_to_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        draft: &ReplyDraft,
    ) -> Result<SentMessage, ProviderError>;

    async fn forward_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        draft: &ForwardDraft,
    ) -> Result<SentMessage, ProviderError>;

    async fn move_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        destination_folder_id: &str,
    ) -> Result<(), ProviderError>;

    /// Moves the message to the provider's trash; never a hard delete.
    async fn delete_message(&self, access: &MailboxAccess, provider_message_id: &str) -> Result<(), ProviderError>;

    async fn update_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        update: MessageUpdate,
    ) -> Result<(), ProviderError>;

    async fn list_folders(&self, access: &MailboxAccess) -> Result<Vec<Folder>, ProviderError>;

    async fn create_folder(&self, access: &MailboxAccess, name: &str) -> Result<Folder, ProviderError>;

    /// With no cursor, returns an empty change set and a baseline cursor.
    /// An expired cursor yields [`ProviderError::CursorExpired`].
    async fn delta_sync(&self, access: &MailboxAccess, cursor: Option<&str>) -> Result<DeltaResult, ProviderError>;

    // -- contacts and calendar -----------------------------------------------

    async fn list_contacts(&self, access: &MailboxAccess, limit: u32) -> Result<Vec<RemoteContact>, ProviderError>;

    async fn list_calendar_events(
        &self,
        access: &MailboxAccess,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, ProviderError>;

    async fn create_calendar_event(
        &self,
        access: &MailboxAccess,
        event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, ProviderError>;

    // -- push ----------------------------------------------------------------

    async fn create_subscription(
        &self,
        access: &MailboxAccess,
        request: &SubscriptionRequest,
    ) -> Result<PushSubscription, ProviderError>;

    async fn renew_subscription(
        &self,
        access: &MailboxAccess,
        subscription: &PushSubscription,
    ) -> Result<PushSubscription, ProviderError>;

    async fn delete_subscription(
        &self,
        access: &MailboxAccess,
        subscription: &PushSubscription,
    ) -> Result<(), ProviderError>;
}

/// Reply subject with a single `Re:` prefix.
pub fn reply_subject(subject: &str) -> String {
    prefixed_subject("Re:", subject)
}

pub fn forward_subject(subject: &str) -> String {
    prefixed_subject("Fwd:", subject)
}

fn prefixed_subject(prefix: &str, subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    {
        trimmed.to_string()
    } else {
        format!("{prefix} {trimmed}")
    }
}

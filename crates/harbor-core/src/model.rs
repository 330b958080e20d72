use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Declares a fieldless enum that round-trips through a fixed lowercase
/// string, both for serde and for the plain-text database columns.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {} `{}`", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

string_enum! {
    pub enum ProviderKind {
        Gmail => "gmail",
        Microsoft => "microsoft",
    }
}

string_enum! {
    pub enum SyncStatus {
        Idle => "idle",
        Syncing => "syncing",
        Error => "error",
        Paused => "paused",
    }
}

string_enum! {
    pub enum SyncKind {
        Folders => "folders",
        Messages => "messages",
        Contacts => "contacts",
    }
}

string_enum! {
    /// Coarse semantic class of a folder or label.
    pub enum FolderType {
        Inbox => "inbox",
        Sent => "sent",
        Drafts => "drafts",
        Trash => "trash",
        Spam => "spam",
        Archive => "archive",
        Starred => "starred",
        Important => "important",
        Custom => "custom",
    }
}

string_enum! {
    pub enum Importance {
        Low => "low",
        Normal => "normal",
        High => "high",
    }
}

string_enum! {
    pub enum MatchMode {
        All => "all",
        Any => "any",
    }
}

string_enum! {
    pub enum ContactSource {
        Auto => "auto",
        Provider => "provider",
        Manual => "manual",
    }
}

string_enum! {
    pub enum NotificationKind {
        SyncError => "sync_error",
        ReconnectRequired => "reconnect_required",
        SnoozeExpired => "snooze_expired",
        RuleAlert => "rule_alert",
    }
}

string_enum! {
    pub enum PlanTier {
        Free => "free",
        Pro => "pro",
        Business => "business",
    }
}

impl Default for Importance {
    fn default() -> Self {
        Self::Normal
    }
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Free
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProfile {
    pub client_id: String,
    pub auth_url: Url,
    pub token_url: Url,
    pub redirect_url: Url,
    pub scopes: Vec<String>,
}

/// One connected remote mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: ProviderKind,
    pub email_address: String,
    pub display_name: Option<String>,
    pub is_primary: bool,
    pub sync_status: SyncStatus,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailAccount {
    pub fn is_active(&self) -> bool {
        self.archived_at.is_none()
    }
}

/// Uniform OAuth token shape returned by every provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: Option<u64>,
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in_secs", &self.expires_in_secs)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Encrypted credential row; exactly zero or one per account.
#[derive(Clone)]
pub struct CredentialRecord {
    pub account_id: Uuid,
    pub access_token_enc: String,
    pub refresh_token_enc: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("account_id", &self.account_id)
            .field("access_token_enc", &"[REDACTED]")
            .field("refresh_token_enc", &self.refresh_token_enc.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("version", &self.version)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub account_id: Uuid,
    pub kind: SyncKind,
    pub cursor: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub email: String,
    pub name: Option<String>,
}

impl Participant {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn named(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }
}

/// Folder shape every adapter produces, whatever the provider calls it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub folder_type: FolderType,
    pub unread_count: u32,
    pub total_count: u32,
}

/// Persisted folder row keyed by (account, provider folder id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderMapping {
    pub account_id: Uuid,
    pub provider_folder_id: String,
    pub name: String,
    pub folder_type: FolderType,
    pub unread_count: u32,
    pub total_count: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    pub unread: bool,
    pub starred: bool,
    pub draft: bool,
    pub has_attachments: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub provider_attachment_id: Option<String>,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub inline: bool,
}

/// Provider-agnostic message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider_message_id: String,
    pub provider_thread_id: Option<String>,
    pub from: Vec<Participant>,
    pub to: Vec<Participant>,
    pub cc: Vec<Participant>,
    pub bcc: Vec<Participant>,
    pub reply_to: Vec<Participant>,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub snippet: String,
    pub folder_id: Option<String>,
    pub folder_type: FolderType,
    pub labels: Vec<String>,
    /// Local-only categories appended by rules; never sent to the provider.
    #[serde(default)]
    pub categories: Vec<String>,
    pub flags: MessageFlags,
    pub attachments: Vec<AttachmentMeta>,
    pub importance: Importance,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    /// Set when the provider reports the message gone.
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    /// Set by the soft-delete rule action.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NormalizedMessage {
    pub fn sender(&self) -> Option<&Participant> {
        self.from.first()
    }

    pub fn recipients(&self) -> impl Iterator<Item = &Participant> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }
}

/// One entry of a provider delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageChange {
    Created { message: NormalizedMessage },
    Updated { message: NormalizedMessage },
    Deleted { provider_message_id: String },
}

impl MessageChange {
    pub fn provider_message_id(&self) -> &str {
        match self {
            Self::Created { message } | Self::Updated { message } => &message.provider_message_id,
            Self::Deleted { provider_message_id } => provider_message_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub priority: i32,
    pub match_mode: MatchMode,
    /// Stored as an opaque JSON array; decoded at evaluation time.
    pub conditions: serde_json::Value,
    /// Stored as an opaque JSON array; decoded at evaluation time.
    pub actions: serde_json::Value,
    pub is_active: bool,
    pub applied_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub source: ContactSource,
    pub send_count: u32,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contact as returned by a provider address book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteContact {
    pub provider_contact_id: String,
    pub display_name: Option<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snooze {
    pub id: Uuid,
    pub message_id: Uuid,
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub original_folder_id: Option<String>,
    pub original_folder_type: FolderType,
    pub wake_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTiming {
    /// Date-only event; `end` is exclusive, as both providers report it.
    AllDay { start: NaiveDate, end: NaiveDate },
    Timed {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timezone: Option<String>,
    },
}

impl EventTiming {
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineMeeting {
    pub provider: Option<String>,
    pub join_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub provider_event_id: String,
    pub calendar_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub timing: EventTiming,
    pub organizer: Option<Participant>,
    pub attendees: Vec<Participant>,
    pub online_meeting: Option<OnlineMeeting>,
    pub recurrence: Option<String>,
    pub cancelled: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCalendarEvent {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub timing: EventTiming,
    pub attendees: Vec<Participant>,
    pub online_meeting: bool,
}

/// A provider push registration, renewed by the scheduler before expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub account_id: Uuid,
    pub subscription_id: String,
    pub resource: String,
    pub expires_at: DateTime<Utc>,
    pub client_state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_enums_round_trip_through_text() {
        for kind in FolderType::ALL {
            assert_eq!(kind.as_str().parse::<FolderType>().ok(), Some(*kind));
        }
        assert_eq!("error".parse::<SyncStatus>().ok(), Some(SyncStatus::Error));
        assert!("bogus".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn message_change_serializes_with_type_tag() {
        let change = MessageChange::Deleted {
            provider_message_id: "m-1".to_string(),
        };
        let json = serde_json::to_value(&change).expect("serialize change");
        assert_eq!(json["type"], "deleted");
        assert_eq!(change.provider_message_id(), "m-1");
    }
}

mod adapter;
mod calendar;
mod error;
mod folders;
mod gmail;
mod http;
mod microsoft;
mod mime;
mod registry;

pub use adapter::{
    forward_subject, reply_subject, DeltaResult, ForwardDraft, ListQuery, MailboxAccess, MessagePage,
    MessageUpdate, OutgoingAttachment, OutgoingMessage, ProviderAdapter, ReplyDraft, SentMessage,
    SubscriptionRequest,
};
pub use calendar::resolve_zone;
pub use error::ProviderError;
pub use folders::classify_folder;
pub use gmail::GmailAdapter;
pub use microsoft::MicrosoftGraphAdapter;
pub use mime::{parse_rfc822, ParsedRfc822};
pub use registry::{ProviderRegistry, ProviderSettings, RegistryConfig};

use chrono::Utc;
use harbor_core::{
    EmailAccount, FolderType, Importance, MessageFlags, NormalizedMessage, Participant,
    ProviderKind, SyncStatus,
};
use uuid::Uuid;

pub(crate) fn account(user_id: Uuid, is_primary: bool) -> EmailAccount {
    let now = Utc::now();
    EmailAccount {
        id: Uuid::new_v4(),
        user_id,
        provider: ProviderKind::Gmail,
        email_address: format!("{}@example.com", Uuid::new_v4().simple()),
        display_name: None,
        is_primary,
        sync_status: SyncStatus::Idle,
        last_error: None,
        last_synced_at: None,
        archived_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn message(account_id: Uuid, provider_message_id: &str, folder_id: &str) -> NormalizedMessage {
    let now = Utc::now();
    NormalizedMessage {
        id: Uuid::new_v4(),
        account_id,
        provider_message_id: provider_message_id.to_string(),
        provider_thread_id: Some(format!("thread-{provider_message_id}")),
        from: vec![Participant::named("alice@example.com", "Alice")],
        to: vec![Participant::new("me@example.com")],
        cc: Vec::new(),
        bcc: Vec::new(),
        reply_to: Vec::new(),
        subject: "Quarterly report".to_string(),
        body_html: None,
        body_text: Some("Numbers attached".to_string()),
        snippet: "Numbers attached".to_string(),
        folder_id: Some(folder_id.to_string()),
        folder_type: FolderType::Inbox,
        labels: vec![folder_id.to_string()],
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

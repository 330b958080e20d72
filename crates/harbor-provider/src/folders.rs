use harbor_core::FolderType;

/// Classifies a folder or label by name. Matching is exact and
/// case-insensitive; anything unrecognised is `Custom`.
pub fn classify_folder(name: &str) -> FolderType {
    match name.trim().to_ascii_lowercase().as_str() {
        "inbox" => FolderType::Inbox,
        "sent" | "sent items" | "sent mail" | "sentitems" => FolderType::Sent,
        "drafts" | "draft" => FolderType::Drafts,
        "trash" | "deleted items" | "deleteditems" | "bin" => FolderType::Trash,
        "spam" | "junk" | "junk email" | "junkemail" => FolderType::Spam,
        "archive" | "all mail" => FolderType::Archive,
        "starred" => FolderType::Starred,
        "important" => FolderType::Important,
        _ => FolderType::Custom,
    }
}

/// Picks the folder a Gmail message lives in from its label ids. Gmail has
/// no single folder, so the most specific system label wins; messages
/// without `INBOX` or any user label are archived.
pub(crate) fn gmail_placement(label_ids: &[String]) -> (Option<String>, FolderType) {
    const PRECEDENCE: [&str; 5] = ["TRASH", "SPAM", "DRAFT", "SENT", "INBOX"];

    for system in PRECEDENCE {
        if label_ids.iter().any(|label| label == system) {
            return (Some(system.to_string()), classify_folder(system));
        }
    }

    let user_label = label_ids.iter().find(|label| {
        !label.starts_with("CATEGORY_")
            && !matches!(label.as_str(), "UNREAD" | "STARRED" | "IMPORTANT" | "CHAT")
    });
    match user_label {
        Some(label) => (Some(label.clone()), FolderType::Custom),
        None => (None, FolderType::Archive),
    }
}

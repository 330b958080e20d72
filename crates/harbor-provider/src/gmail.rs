use crate::adapter::{
    forward_subject, reply_subject, DeltaResult, ForwardDraft, ListQuery, MailboxAccess, MessagePage,
    MessageUpdate, OutgoingMessage, ProviderAdapter, ReplyDraft, SentMessage, SubscriptionRequest,
};
use crate::calendar::{parse_date, parse_rfc3339_to_utc, parse_zoned_datetime};
use crate::folders::{classify_folder, gmail_placement};
use crate::http::{send_empty, send_json};
use crate::mime::{
    build_rfc822, decode_base64url, encode_base64url, parse_epoch_millis, parse_rfc822, snippet_from,
    ParsedRfc822, ThreadHeaders,
};
use crate::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use harbor_core::{
    CalendarEvent, EventTiming, Folder, MessageChange, MessageFlags, NewCalendarEvent, NormalizedMessage,
    OnlineMeeting, Participant, ProviderKind, PushSubscription, RemoteContact, TokenSet,
};
use harbor_security::{OAuthPkceSession, OAuthWorkflow};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
const PEOPLE_API: &str = "https://people.googleapis.com/v1";
const PRIMARY_CALENDAR: &str = "primary";
const WATCH_TTL_DAYS: i64 = 7;

pub struct GmailAdapter {
    oauth: OAuthWorkflow,
    http: reqwest::Client,
    gmail_api: String,
    calendar_api: String,
    people_api: String,
}

impl GmailAdapter {
    pub fn new(oauth: OAuthWorkflow) -> Result<Self, ProviderError> {
        Ok(Self {
            oauth,
            http: build_http_client()?,
            gmail_api: GMAIL_API.to_string(),
            calendar_api: CALENDAR_API.to_string(),
            people_api: PEOPLE_API.to_string(),
        })
    }

    /// Serves every Google API from one host; used for proxies and tests.
    pub fn with_api_base(oauth: OAuthWorkflow, base: &str) -> Result<Self, ProviderError> {
        let base = base.trim_end_matches('/');
        Ok(Self {
            oauth,
            http: build_http_client()?,
            gmail_api: format!("{base}/gmail/v1/users/me"),
            calendar_api: format!("{base}/calendar/v3"),
            people_api: format!("{base}/v1"),
        })
    }

    async fn fetch_raw(&self, access: &MailboxAccess, provider_message_id: &str) -> Result<GmailRawMessage, ProviderError> {
        send_json(
            self.http
                .get(format!("{}/messages/{provider_message_id}", self.gmail_api))
                .bearer_auth(&access.access_token)
                .query(&[("format", "raw")]),
        )
        .await
    }

    async fn fetch_parsed(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
    ) -> Result<(GmailRawMessage, ParsedRfc822), ProviderError> {
        let payload = self.fetch_raw(access, provider_message_id).await?;
        let parsed = decode_payload(&payload)?;
        Ok((payload, parsed))
    }

    async fn send_raw(
        &self,
        access: &MailboxAccess,
        outgoing: &OutgoingMessage,
        thread: &ThreadHeaders,
        thread_id: Option<&str>,
    ) -> Result<SentMessage, ProviderError> {
        let raw = encode_base64url(&build_rfc822(outgoing, thread)?);
        let mut body = json!({ "raw": raw });
        if let Some(thread_id) = thread_id {
            body["threadId"] = json!(thread_id);
        }

        let sent: GmailSendResponse = send_json(
            self.http
                .post(format!("{}/messages/send", self.gmail_api))
                .bearer_auth(&access.access_token)
                .json(&body),
        )
        .await?;

        Ok(SentMessage {
            provider_message_id: Some(sent.id),
            provider_thread_id: sent.thread_id,
        })
    }

    async fn modify_labels(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), ProviderError> {
        send_empty(
            self.http
                .post(format!("{}/messages/{provider_message_id}/modify", self.gmail_api))
                .bearer_auth(&access.access_token)
                .json(&json!({ "addLabelIds": add, "removeLabelIds": remove })),
        )
        .await
    }

    async fn label_counts(&self, access: &MailboxAccess, label_id: &str) -> Result<GmailLabel, ProviderError> {
        send_json(
            self.http
                .get(format!("{}/labels/{label_id}", self.gmail_api))
                .bearer_auth(&access.access_token),
        )
        .await
    }

    async fn watch(&self, access: &MailboxAccess, topic_name: &str) -> Result<PushSubscription, ProviderError> {
        let response: GmailWatchResponse = send_json(
            self.http
                .post(format!("{}/watch", self.gmail_api))
                .bearer_auth(&access.access_token)
                .json(&json!({
                    "topicName": topic_name,
                    "labelIds": ["INBOX"],
                    "labelFilterBehavior": "include",
                })),
        )
        .await?;

        let expires_at = response
            .expiration
            .as_deref()
            .and_then(parse_epoch_millis)
            .unwrap_or_else(|| Utc::now() + Duration::days(WATCH_TTL_DAYS));

        Ok(PushSubscription {
            account_id: access.account_id,
            subscription_id: topic_name.to_string(),
            resource: "users/me/messages".to_string(),
            expires_at,
            client_state: None,
        })
    }
}

#[async_trait]
impl ProviderAdapter for GmailAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    fn authorization_url(&self) -> Result<OAuthPkceSession, ProviderError> {
        Ok(self.oauth.begin_pkce_session()?)
    }

    async fn exchange_code(&self, code: &str, pkce_verifier: &str) -> Result<TokenSet, ProviderError> {
        Ok(self.oauth.exchange_code(code, pkce_verifier).await?)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        Ok(self.oauth.refresh(refresh_token).await?)
    }

    async fn list_messages(&self, access: &MailboxAccess, query: &ListQuery) -> Result<MessagePage, ProviderError> {
        let mut params = vec![
            ("maxResults", query.limit.clamp(1, 500).to_string()),
            ("labelIds", query.folder_id.clone().unwrap_or_else(|| "INBOX".to_string())),
        ];
        if let Some(cursor) = &query.cursor {
            params.push(("pageToken", cursor.clone()));
        }
        if let Some(filter) = &query.filter {
            params.push(("q", filter.clone()));
        }

        let list: GmailMessageList = send_json(
            self.http
                .get(format!("{}/messages", self.gmail_api))
                .bearer_auth(&access.access_token)
                .query(&params),
        )
        .await?;

        let mut messages = Vec::new();
        for item in list.messages.unwrap_or_default() {
            match self.get_message(access, &item.id).await {
                Ok(message) => messages.push(message),
                Err(err) if is_skippable(&err) => {
                    warn!(provider_message_id = %item.id, error = %err, "skipping unreadable Gmail message");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(MessagePage {
            messages,
            next_cursor: list.next_page_token,
        })
    }

    async fn get_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
    ) -> Result<NormalizedMessage, ProviderError> {
        let (payload, parsed) = self.fetch_parsed(access, provider_message_id).await?;
        Ok(normalize_message(access.account_id, payload, parsed))
    }

    async fn send_message(&self, access: &MailboxAccess, message: &OutgoingMessage) -> Result<SentMessage, ProviderError> {
        self.send_raw(access, message, &ThreadHeaders::default(), None).await
    }

    async fn reply_to_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        draft: &ReplyDraft,
    ) -> Result<SentMessage, ProviderError> {
        let (original, parsed) = self.fetch_parsed(access, provider_message_id).await?;
        let (to, cc) = reply_recipients(&parsed, draft);

        let outgoing = OutgoingMessage {
            from: draft.from.clone(),
            to,
            cc,
            bcc: Vec::new(),
            reply_to: Vec::new(),
            subject: reply_subject(&parsed.subject),
            body_text: draft.body_text.clone(),
            body_html: draft.body_html.clone(),
            attachments: Vec::new(),
        };
        let references = match (&parsed.references, &parsed.message_id) {
            (Some(references), Some(id)) => Some(format!("{references} {id}")),
            (None, Some(id)) => Some(id.clone()),
            (references, None) => references.clone(),
        };
        let thread = ThreadHeaders {
            in_reply_to: parsed.message_id.clone(),
            references,
        };

        self.send_raw(access, &outgoing, &thread, original.thread_id.as_deref()).await
    }

    async fn forward_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        draft: &ForwardDraft,
    ) -> Result<SentMessage, ProviderError> {
        let (_, parsed) = self.fetch_parsed(access, provider_message_id).await?;
        let (body_text, body_html) = forward_bodies(&parsed, draft);

        let outgoing = OutgoingMessage {
            from: draft.from.clone(),
            to: draft.to.clone(),
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            subject: forward_subject(&parsed.subject),
            body_text,
            body_html,
            attachments: Vec::new(),
        };

        self.send_raw(access, &outgoing, &ThreadHeaders::default(), None).await
    }

    async fn move_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        destination_folder_id: &str,
    ) -> Result<(), ProviderError> {
        match destination_folder_id {
            "TRASH" => self.delete_message(access, provider_message_id).await,
            "INBOX" => {
                self.modify_labels(access, provider_message_id, &["INBOX"], &["SPAM"])
                    .await
            }
            destination => {
                self.modify_labels(access, provider_message_id, &[destination], &["INBOX"])
                    .await
            }
        }
    }

    async fn delete_message(&self, access: &MailboxAccess, provider_message_id: &str) -> Result<(), ProviderError> {
        send_empty(
            self.http
                .post(format!("{}/messages/{provider_message_id}/trash", self.gmail_api))
                .bearer_auth(&access.access_token),
        )
        .await
    }

    async fn update_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        update: MessageUpdate,
    ) -> Result<(), ProviderError> {
        let mut add = Vec::new();
        let mut remove = Vec::new();
        match update.unread {
            Some(true) => add.push("UNREAD"),
            Some(false) => remove.push("UNREAD"),
            None => {}
        }
        match update.starred {
            Some(true) => add.push("STARRED"),
            Some(false) => remove.push("STARRED"),
            None => {}
        }
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }

        self.modify_labels(access, provider_message_id, &add, &remove).await
    }

    async fn list_folders(&self, access: &MailboxAccess) -> Result<Vec<Folder>, ProviderError> {
        let list: GmailLabelList = send_json(
            self.http
                .get(format!("{}/labels", self.gmail_api))
                .bearer_auth(&access.access_token),
        )
        .await?;

        let mut folders = Vec::new();
        for label in list.labels.unwrap_or_default() {
            if label.id.starts_with("CATEGORY_") || matches!(label.id.as_str(), "UNREAD" | "CHAT") {
                continue;
            }

            // The list endpoint omits counts.
            let detailed = match self.label_counts(access, &label.id).await {
                Ok(detailed) => detailed,
                Err(err) if err.is_unauthorized() => return Err(err),
                Err(err) => {
                    warn!(label_id = %label.id, error = %err, "Gmail label counts unavailable");
                    label
                }
            };
            folders.push(label_to_folder(detailed));
        }

        Ok(folders)
    }

    async fn create_folder(&self, access: &MailboxAccess, name: &str) -> Result<Folder, ProviderError> {
        let label: GmailLabel = send_json(
            self.http
                .post(format!("{}/labels", self.gmail_api))
                .bearer_auth(&access.access_token)
                .json(&json!({
                    "name": name,
                    "labelListVisibility": "labelShow",
                    "messageListVisibility": "show",
                })),
        )
        .await?;

        Ok(label_to_folder(label))
    }

    async fn delta_sync(&self, access: &MailboxAccess, cursor: Option<&str>) -> Result<DeltaResult, ProviderError> {
        let Some(cursor) = cursor else {
            let profile: GmailProfile = send_json(
                self.http
                    .get(format!("{}/profile", self.gmail_api))
                    .bearer_auth(&access.access_token),
            )
            .await?;
            return Ok(DeltaResult {
                changes: Vec::new(),
                new_cursor: profile.history_id,
            });
        };

        let mut records = Vec::new();
        let mut latest_history_id = cursor.to_string();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("startHistoryId", cursor.to_string()),
                ("maxResults", "500".to_string()),
                ("historyTypes", "messageAdded".to_string()),
                ("historyTypes", "messageDeleted".to_string()),
                ("historyTypes", "labelAdded".to_string()),
                ("historyTypes", "labelRemoved".to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let page: GmailHistoryPage = match send_json(
                self.http
                    .get(format!("{}/history", self.gmail_api))
                    .bearer_auth(&access.access_token)
                    .query(&params),
            )
            .await
            {
                Err(err) if err.is_not_found() => return Err(ProviderError::CursorExpired),
                other => other?,
            };

            if let Some(history_id) = page.history_id {
                latest_history_id = history_id;
            }
            records.extend(page.history.unwrap_or_default());

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let mut changes = Vec::new();
        for (provider_message_id, op) in collapse_history(&records) {
            if op == HistoryOp::Deleted {
                changes.push(MessageChange::Deleted { provider_message_id });
                continue;
            }

            match self.get_message(access, &provider_message_id).await {
                Ok(message) if op == HistoryOp::Added => changes.push(MessageChange::Created { message }),
                Ok(message) => changes.push(MessageChange::Updated { message }),
                Err(err) if err.is_not_found() => changes.push(MessageChange::Deleted { provider_message_id }),
                Err(err) if is_skippable(&err) => {
                    warn!(%provider_message_id, error = %err, "skipping unreadable Gmail message in delta");
                }
                Err(err) => return Err(err),
            }
        }

        debug!(account_id = %access.account_id, changes = changes.len(), "Gmail delta collected");
        Ok(DeltaResult {
            changes,
            new_cursor: latest_history_id,
        })
    }

    async fn list_contacts(&self, access: &MailboxAccess, limit: u32) -> Result<Vec<RemoteContact>, ProviderError> {
        let response: PeopleConnections = send_json(
            self.http
                .get(format!("{}/people/me/connections", self.people_api))
                .bearer_auth(&access.access_token)
                .query(&[
                    ("personFields", "names,emailAddresses,phoneNumbers,organizations".to_string()),
                    ("pageSize", limit.clamp(1, 1000).to_string()),
                ]),
        )
        .await?;

        Ok(response
            .connections
            .unwrap_or_default()
            .into_iter()
            .map(person_to_contact)
            .collect())
    }

    async fn list_calendar_events(
        &self,
        access: &MailboxAccess,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        let response: GoogleEventList = send_json(
            self.http
                .get(format!("{}/calendars/{PRIMARY_CALENDAR}/events", self.calendar_api))
                .bearer_auth(&access.access_token)
                .query(&[
                    ("timeMin", from.to_rfc3339()),
                    ("timeMax", to.to_rfc3339()),
                    ("singleEvents", "true".to_string()),
                    ("maxResults", "500".to_string()),
                ]),
        )
        .await?;

        Ok(response
            .items
            .unwrap_or_default()
            .into_iter()
            .filter_map(|event| normalize_event(PRIMARY_CALENDAR, event))
            .collect())
    }

    async fn create_calendar_event(
        &self,
        access: &MailboxAccess,
        event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, ProviderError> {
        let mut body = json!({
            "summary": event.title,
            "description": event.description,
            "location": event.location,
            "attendees": event.attendees.iter().map(|attendee| json!({
                "email": attendee.email,
                "displayName": attendee.name,
            })).collect::<Vec<_>>(),
        });
        match &event.timing {
            EventTiming::AllDay { start, end } => {
                body["start"] = json!({ "date": start.format("%Y-%m-%d").to_string() });
                body["end"] = json!({ "date": end.format("%Y-%m-%d").to_string() });
            }
            EventTiming::Timed { start, end, timezone } => {
                body["start"] = json!({ "dateTime": start.to_rfc3339(), "timeZone": timezone });
                body["end"] = json!({ "dateTime": end.to_rfc3339(), "timeZone": timezone });
            }
        }
        if event.online_meeting {
            body["conferenceData"] = json!({
                "createRequest": {
                    "requestId": Uuid::new_v4().to_string(),
                    "conferenceSolutionKey": { "type": "hangoutsMeet" },
                }
            });
        }

        let created: GoogleEvent = send_json(
            self.http
                .post(format!("{}/calendars/{PRIMARY_CALENDAR}/events", self.calendar_api))
                .bearer_auth(&access.access_token)
                .query(&[("conferenceDataVersion", "1")])
                .json(&body),
        )
        .await?;

        normalize_event(PRIMARY_CALENDAR, created)
            .ok_or_else(|| ProviderError::Data("created Google event is missing id or start".to_string()))
    }

    async fn create_subscription(
        &self,
        access: &MailboxAccess,
        request: &SubscriptionRequest,
    ) -> Result<PushSubscription, ProviderError> {
        let topic_name = request
            .topic_name
            .as_deref()
            .ok_or_else(|| ProviderError::Data("Gmail watch requires a Pub/Sub topic".to_string()))?;
        self.watch(access, topic_name).await
    }

    async fn renew_subscription(
        &self,
        access: &MailboxAccess,
        subscription: &PushSubscription,
    ) -> Result<PushSubscription, ProviderError> {
        self.watch(access, &subscription.subscription_id).await
    }

    async fn delete_subscription(
        &self,
        access: &MailboxAccess,
        _subscription: &PushSubscription,
    ) -> Result<(), ProviderError> {
        send_empty(
            self.http
                .post(format!("{}/stop", self.gmail_api))
                .bearer_auth(&access.access_token),
        )
        .await
    }
}

pub(crate) fn build_http_client() -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?)
}

/// Per-message failures that should not abort a page or a delta run.
pub(crate) fn is_skippable(err: &ProviderError) -> bool {
    matches!(
        err,
        ProviderError::MailParse(_) | ProviderError::Data(_) | ProviderError::Json(_)
    ) || err.is_not_found()
}

fn decode_payload(payload: &GmailRawMessage) -> Result<ParsedRfc822, ProviderError> {
    let raw = payload
        .raw
        .as_deref()
        .ok_or_else(|| ProviderError::Data(format!("Gmail message {} has no raw payload", payload.id)))?;
    parse_rfc822(&decode_base64url(raw)?)
}

fn normalize_message(account_id: Uuid, payload: GmailRawMessage, parsed: ParsedRfc822) -> NormalizedMessage {
    let now = Utc::now();
    let labels = payload.label_ids.unwrap_or_default();
    let (folder_id, folder_type) = gmail_placement(&labels);
    let has_label = |name: &str| labels.iter().any(|label| label == name);

    let snippet = payload
        .snippet
        .filter(|snippet| !snippet.trim().is_empty())
        .unwrap_or_else(|| snippet_from(parsed.body_text.as_deref().unwrap_or_default()));
    let received_at = payload
        .internal_date
        .as_deref()
        .and_then(parse_epoch_millis)
        .or(parsed.sent_at)
        .unwrap_or(now);
    let flags = MessageFlags {
        unread: has_label("UNREAD"),
        starred: has_label("STARRED"),
        draft: has_label("DRAFT"),
        has_attachments: !parsed.attachments.is_empty(),
    };

    NormalizedMessage {
        id: Uuid::new_v4(),
        account_id,
        provider_message_id: payload.id,
        provider_thread_id: payload.thread_id,
        from: parsed.from,
        to: parsed.to,
        cc: parsed.cc,
        bcc: parsed.bcc,
        reply_to: parsed.reply_to,
        subject: parsed.subject,
        body_html: parsed.body_html,
        body_text: parsed.body_text,
        snippet,
        folder_id,
        folder_type,
        labels,
        categories: Vec::new(),
        flags,
        attachments: parsed.attachments,
        importance: parsed.importance,
        sent_at: parsed.sent_at,
        received_at,
        archived_at: None,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Reply goes to `Reply-To` (or the sender); reply-all copies the other
/// recipients except ourselves.
fn reply_recipients(original: &ParsedRfc822, draft: &ReplyDraft) -> (Vec<Participant>, Vec<Participant>) {
    let to = if original.reply_to.is_empty() {
        original.from.clone()
    } else {
        original.reply_to.clone()
    };
    if !draft.reply_all {
        return (to, Vec::new());
    }

    let mut seen: Vec<String> = to.iter().map(|p| p.email.to_ascii_lowercase()).collect();
    seen.push(draft.from.email.to_ascii_lowercase());

    let mut cc = Vec::new();
    for participant in original.to.iter().chain(original.cc.iter()) {
        let email = participant.email.to_ascii_lowercase();
        if !seen.contains(&email) {
            seen.push(email);
            cc.push(participant.clone());
        }
    }

    (to, cc)
}

fn forward_bodies(original: &ParsedRfc822, draft: &ForwardDraft) -> (String, Option<String>) {
    let from = original
        .from
        .iter()
        .map(display_participant)
        .collect::<Vec<_>>()
        .join(", ");
    let to = original
        .to
        .iter()
        .map(display_participant)
        .collect::<Vec<_>>()
        .join(", ");
    let date = original.sent_at.map(|at| at.to_rfc2822()).unwrap_or_default();

    let header = format!(
        "---------- Forwarded message ---------\nFrom: {from}\nDate: {date}\nSubject: {}\nTo: {to}",
        original.subject
    );
    let text = format!(
        "{}\n\n{header}\n\n{}",
        draft.comment_text,
        original.body_text.as_deref().unwrap_or_default()
    );

    let html = original.body_html.as_ref().map(|original_html| {
        let comment = draft
            .comment_html
            .clone()
            .unwrap_or_else(|| ammonia::clean_text(&draft.comment_text));
        format!(
            "<div>{comment}</div><br><div>{}</div><blockquote>{original_html}</blockquote>",
            ammonia::clean_text(&header).replace('\n', "<br>")
        )
    });

    (text, html)
}

fn display_participant(participant: &Participant) -> String {
    match &participant.name {
        Some(name) => format!("{name} <{}>", participant.email),
        None => participant.email.clone(),
    }
}

fn label_to_folder(label: GmailLabel) -> Folder {
    let folder_type = if label.label_type.as_deref() == Some("system") {
        classify_folder(&label.id)
    } else {
        classify_folder(&label.name)
    };

    Folder {
        id: label.id,
        name: label.name,
        folder_type,
        unread_count: label.messages_unread.unwrap_or(0),
        total_count: label.messages_total.unwrap_or(0),
    }
}

fn person_to_contact(person: Person) -> RemoteContact {
    let values = |items: Option<Vec<PersonValue>>| {
        items
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| item.value)
            .filter(|value| !value.trim().is_empty())
            .collect::<Vec<_>>()
    };

    RemoteContact {
        provider_contact_id: person.resource_name,
        display_name: person
            .names
            .unwrap_or_default()
            .into_iter()
            .find_map(|name| name.display_name),
        emails: values(person.email_addresses),
        phones: values(person.phone_numbers),
        organization: person
            .organizations
            .unwrap_or_default()
            .into_iter()
            .find_map(|organization| organization.name),
    }
}

fn normalize_event(calendar_id: &str, event: GoogleEvent) -> Option<CalendarEvent> {
    let Some(id) = event.id else {
        warn!("skipping Google event without id");
        return None;
    };
    let Some(timing) = event_timing(event.start.as_ref(), event.end.as_ref()) else {
        warn!(event_id = %id, "skipping Google event without a usable start");
        return None;
    };

    let entry_point = event
        .conference_data
        .as_ref()
        .and_then(|data| data.entry_points.as_ref())
        .and_then(|points| {
            points
                .iter()
                .find(|point| point.entry_point_type.as_deref() == Some("video"))
        })
        .and_then(|point| point.uri.clone());
    let join_url = entry_point.or(event.hangout_link);
    let online_meeting = join_url.map(|url| OnlineMeeting {
        provider: event
            .conference_data
            .and_then(|data| data.conference_solution)
            .and_then(|solution| solution.name)
            .or_else(|| Some("Google Meet".to_string())),
        join_url: Some(url),
    });

    Some(CalendarEvent {
        provider_event_id: id,
        calendar_id: calendar_id.to_string(),
        title: event.summary.unwrap_or_default(),
        description: event.description,
        location: event.location,
        timing,
        organizer: event.organizer.and_then(attendee_participant),
        attendees: event
            .attendees
            .unwrap_or_default()
            .into_iter()
            .filter_map(attendee_participant)
            .collect(),
        online_meeting,
        recurrence: event.recurrence.map(|rules| rules.join("\n")),
        cancelled: event.status.as_deref() == Some("cancelled"),
        updated_at: event
            .updated
            .as_deref()
            .and_then(parse_rfc3339_to_utc)
            .unwrap_or_else(Utc::now),
    })
}

fn event_timing(start: Option<&GoogleDateTime>, end: Option<&GoogleDateTime>) -> Option<EventTiming> {
    let start = start?;

    if let Some(date) = start.date.as_deref().and_then(parse_date) {
        let end_date = end
            .and_then(|end| end.date.as_deref())
            .and_then(parse_date)
            .unwrap_or_else(|| date.succ_opt().unwrap_or(date));
        return Some(EventTiming::AllDay { start: date, end: end_date });
    }

    let starts_at = parse_zoned_datetime(start.date_time.as_deref()?, start.time_zone.as_deref())?;
    let ends_at = end
        .and_then(|end| parse_zoned_datetime(end.date_time.as_deref()?, end.time_zone.as_deref()))
        .unwrap_or(starts_at);

    Some(EventTiming::Timed {
        start: starts_at,
        end: ends_at,
        timezone: start.time_zone.clone(),
    })
}

fn attendee_participant(attendee: GoogleAttendee) -> Option<Participant> {
    let email = attendee.email?;
    Some(Participant {
        email,
        name: attendee.display_name,
    })
}

// -- history ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryOp {
    Added,
    Changed,
    Deleted,
}

/// Folds history records into one operation per message, in first-seen order.
fn collapse_history(records: &[GmailHistoryRecord]) -> Vec<(String, HistoryOp)> {
    let mut order: Vec<String> = Vec::new();
    let mut ops: HashMap<String, HistoryOp> = HashMap::new();

    let mut note = |id: &str, op: HistoryOp| {
        let merged = match (ops.get(id).copied(), op) {
            (None, op) => {
                order.push(id.to_string());
                op
            }
            (Some(_), HistoryOp::Deleted) => HistoryOp::Deleted,
            (Some(HistoryOp::Added), HistoryOp::Changed) => HistoryOp::Added,
            (Some(HistoryOp::Deleted), _) => HistoryOp::Deleted,
            (Some(_), op) => op,
        };
        ops.insert(id.to_string(), merged);
    };

    for record in records {
        for entry in record.messages_added.iter().flatten() {
            note(&entry.message.id, HistoryOp::Added);
        }
        for entry in record.labels_added.iter().flatten() {
            note(&entry.message.id, HistoryOp::Changed);
        }
        for entry in record.labels_removed.iter().flatten() {
            note(&entry.message.id, HistoryOp::Changed);
        }
        for entry in record.messages_deleted.iter().flatten() {
            note(&entry.message.id, HistoryOp::Deleted);
        }
    }

    order
        .into_iter()
        .filter_map(|id| ops.get(&id).copied().map(|op| (id, op)))
        .collect()
}

// -- wire types ------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessageList {
    messages: Option<Vec<GmailMessageRef>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GmailMessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailRawMessage {
    id: String,
    thread_id: Option<String>,
    label_ids: Option<Vec<String>>,
    snippet: Option<String>,
    internal_date: Option<String>,
    raw: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailSendResponse {
    id: String,
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GmailLabelList {
    labels: Option<Vec<GmailLabel>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailLabel {
    id: String,
    name: String,
    #[serde(rename = "type")]
    label_type: Option<String>,
    messages_total: Option<u32>,
    messages_unread: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailProfile {
    history_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailHistoryPage {
    history: Option<Vec<GmailHistoryRecord>>,
    next_page_token: Option<String>,
    history_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailHistoryRecord {
    messages_added: Option<Vec<GmailHistoryMessage>>,
    messages_deleted: Option<Vec<GmailHistoryMessage>>,
    labels_added: Option<Vec<GmailHistoryMessage>>,
    labels_removed: Option<Vec<GmailHistoryMessage>>,
}

#[derive(Debug, Deserialize)]
struct GmailHistoryMessage {
    message: GmailMessageRef,
}

#[derive(Debug, Deserialize)]
struct GmailWatchResponse {
    expiration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PeopleConnections {
    connections: Option<Vec<Person>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    resource_name: String,
    names: Option<Vec<PersonName>>,
    email_addresses: Option<Vec<PersonValue>>,
    phone_numbers: Option<Vec<PersonValue>>,
    organizations: Option<Vec<PersonOrganization>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonName {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PersonValue {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PersonOrganization {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleEventList {
    items: Option<Vec<GoogleEvent>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<GoogleDateTime>,
    end: Option<GoogleDateTime>,
    recurrence: Option<Vec<String>>,
    attendees: Option<Vec<GoogleAttendee>>,
    organizer: Option<GoogleAttendee>,
    updated: Option<String>,
    status: Option<String>,
    hangout_link: Option<String>,
    conference_data: Option<GoogleConferenceData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleDateTime {
    date_time: Option<String>,
    date: Option<String>,
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleAttendee {
    email: Option<String>,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleConferenceData {
    entry_points: Option<Vec<GoogleEntryPoint>>,
    conference_solution: Option<GoogleConferenceSolution>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEntryPoint {
    entry_point_type: Option<String>,
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleConferenceSolution {
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use harbor_core::{FolderType, OAuthProfile};
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RAW_MESSAGE: &str = "From: Ana <ana@example.com>\r\n\
To: me@example.com\r\n\
Cc: cy@example.com\r\n\
Subject: Trip plans\r\n\
Message-ID: <trip-1@example.com>\r\n\
Date: Tue, 14 May 2024 09:30:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Train leaves at nine.\r\n";

    fn adapter(base: &str) -> GmailAdapter {
        let profile = OAuthProfile {
            client_id: "client".to_string(),
            auth_url: Url::parse("https://accounts.google.com/o/oauth2/v2/auth").expect("url"),
            token_url: Url::parse("https://oauth2.googleapis.com/token").expect("url"),
            redirect_url: Url::parse("http://127.0.0.1:8765/oauth/callback").expect("url"),
            scopes: vec!["https://www.googleapis.com/auth/gmail.modify".to_string()],
        };
        let oauth = OAuthWorkflow::new(profile, None).expect("oauth");
        GmailAdapter::with_api_base(oauth, base).expect("adapter")
    }

    fn access() -> MailboxAccess {
        MailboxAccess::new(Uuid::new_v4(), "token")
    }

    fn raw_payload(id: &str, labels: &[&str]) -> serde_json::Value {
        json!({
            "id": id,
            "threadId": "thread-1",
            "labelIds": labels,
            "snippet": "Train leaves at nine.",
            "internalDate": "1715679000000",
            "raw": encode_base64url(RAW_MESSAGE.as_bytes()),
        })
    }

    #[test]
    fn normalizes_raw_message() {
        let account_id = Uuid::new_v4();
        let payload: GmailRawMessage =
            serde_json::from_value(raw_payload("m1", &["INBOX", "UNREAD", "STARRED"])).expect("payload");
        let parsed = decode_payload(&payload).expect("decode");
        let message = normalize_message(account_id, payload, parsed);

        assert_eq!(message.account_id, account_id);
        assert_eq!(message.provider_message_id, "m1");
        assert_eq!(message.provider_thread_id.as_deref(), Some("thread-1"));
        assert_eq!(message.folder_id.as_deref(), Some("INBOX"));
        assert_eq!(message.folder_type, FolderType::Inbox);
        assert!(message.flags.unread);
        assert!(message.flags.starred);
        assert_eq!(message.sender().map(|p| p.email.as_str()), Some("ana@example.com"));
        assert_eq!(message.received_at.timestamp_millis(), 1_715_679_000_000);
    }

    #[test]
    fn history_is_collapsed_per_message() {
        let records: Vec<GmailHistoryRecord> = serde_json::from_value(json!([
            { "messagesAdded": [{ "message": { "id": "a" } }] },
            { "labelsAdded": [{ "message": { "id": "a" } }, { "message": { "id": "b" } }] },
            { "messagesDeleted": [{ "message": { "id": "c" } }] },
            { "labelsRemoved": [{ "message": { "id": "c" } }] },
        ]))
        .expect("records");

        assert_eq!(
            collapse_history(&records),
            vec![
                ("a".to_string(), HistoryOp::Added),
                ("b".to_string(), HistoryOp::Changed),
                ("c".to_string(), HistoryOp::Deleted),
            ]
        );
    }

    #[test]
    fn reply_all_skips_self_and_duplicates() {
        let parsed = parse_rfc822(RAW_MESSAGE.as_bytes()).expect("parse");
        let draft = ReplyDraft {
            from: Participant::new("ME@example.com"),
            body_text: "Great".to_string(),
            body_html: None,
            reply_all: true,
        };

        let (to, cc) = reply_recipients(&parsed, &draft);
        assert_eq!(to, vec![Participant::named("ana@example.com", "Ana")]);
        assert_eq!(cc, vec![Participant::new("cy@example.com")]);
    }

    #[test]
    fn normalizes_all_day_and_meet_events() {
        let all_day: GoogleEvent = serde_json::from_value(json!({
            "id": "e1",
            "summary": "Offsite",
            "start": { "date": "2024-06-03" },
            "end": { "date": "2024-06-05" },
        }))
        .expect("event");
        let event = normalize_event("primary", all_day).expect("normalized");
        assert_eq!(
            event.timing,
            EventTiming::AllDay {
                start: NaiveDate::from_ymd_opt(2024, 6, 3).expect("date"),
                end: NaiveDate::from_ymd_opt(2024, 6, 5).expect("date"),
            }
        );

        let meeting: GoogleEvent = serde_json::from_value(json!({
            "id": "e2",
            "summary": "Standup",
            "start": { "dateTime": "2024-06-03T09:00:00", "timeZone": "Europe/Berlin" },
            "end": { "dateTime": "2024-06-03T09:15:00", "timeZone": "Europe/Berlin" },
            "conferenceData": {
                "entryPoints": [
                    { "entryPointType": "phone", "uri": "tel:+1-555" },
                    { "entryPointType": "video", "uri": "https://meet.google.com/abc-defg-hij" }
                ],
                "conferenceSolution": { "name": "Google Meet" }
            }
        }))
        .expect("event");
        let event = normalize_event("primary", meeting).expect("normalized");
        let EventTiming::Timed { start, timezone, .. } = &event.timing else {
            panic!("expected timed event");
        };
        assert_eq!(start.to_rfc3339(), "2024-06-03T07:00:00+00:00");
        assert_eq!(timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(
            event.online_meeting.and_then(|meeting| meeting.join_url).as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );
    }

    #[tokio::test]
    async fn expired_history_cursor_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/history"))
            .and(query_param("startHistoryId", "42"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Requested entity was not found."))
            .mount(&server)
            .await;

        let result = adapter(&server.uri()).delta_sync(&access(), Some("42")).await;
        assert!(matches!(result, Err(ProviderError::CursorExpired)));
    }

    #[tokio::test]
    async fn baseline_uses_profile_history_after_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/profile"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "emailAddress": "me@example.com",
                "historyId": "9001",
            })))
            .mount(&server)
            .await;

        let result = adapter(&server.uri()).delta_sync(&access(), None).await.expect("baseline");
        assert!(result.changes.is_empty());
        assert_eq!(result.new_cursor, "9001");
    }

    #[tokio::test]
    async fn delta_fetches_added_messages_and_reports_deletions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "history": [
                    { "messagesAdded": [{ "message": { "id": "new-1" } }] },
                    { "messagesDeleted": [{ "message": { "id": "old-1" } }] }
                ],
                "historyId": "120"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/new-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(raw_payload("new-1", &["INBOX"])))
            .mount(&server)
            .await;

        let result = adapter(&server.uri())
            .delta_sync(&access(), Some("100"))
            .await
            .expect("delta");

        assert_eq!(result.new_cursor, "120");
        assert_eq!(result.changes.len(), 2);
        assert!(matches!(&result.changes[0], MessageChange::Created { message } if message.provider_message_id == "new-1"));
        assert!(matches!(&result.changes[1], MessageChange::Deleted { provider_message_id } if provider_message_id == "old-1"));
    }
}

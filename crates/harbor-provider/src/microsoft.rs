use crate::adapter::{
    DeltaResult, ForwardDraft, ListQuery, MailboxAccess, MessagePage, MessageUpdate, OutgoingMessage,
    ProviderAdapter, ReplyDraft, SentMessage, SubscriptionRequest,
};
use crate::calendar::{parse_date, parse_rfc3339_to_utc, parse_zoned_datetime};
use crate::folders::classify_folder;
use crate::gmail::build_http_client;
use crate::http::{send_empty, send_json};
use crate::mime::{decode_attachment, sanitize_html, snippet_from};
use crate::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use harbor_core::{
    CalendarEvent, EventTiming, Folder, FolderType, Importance, MessageChange, MessageFlags, NewCalendarEvent,
    NormalizedMessage, OnlineMeeting, Participant, ProviderKind, PushSubscription, RemoteContact, TokenSet,
};
use harbor_security::{OAuthPkceSession, OAuthWorkflow};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

const GRAPH_API: &str = "https://graph.microsoft.com/v1.0";
const MESSAGE_SELECT: &str = "id,conversationId,subject,from,toRecipients,ccRecipients,bccRecipients,replyTo,\
body,bodyPreview,parentFolderId,isRead,isDraft,flag,hasAttachments,importance,sentDateTime,\
receivedDateTime,createdDateTime,lastModifiedDateTime,categories";
const INBOX_RESOURCE: &str = "me/mailFolders('inbox')/messages";
/// Graph caps mail subscriptions at 4230 minutes.
const SUBSCRIPTION_TTL_MINUTES: i64 = 4200;

pub struct MicrosoftGraphAdapter {
    oauth: OAuthWorkflow,
    http: reqwest::Client,
    api: String,
}

impl MicrosoftGraphAdapter {
    pub fn new(oauth: OAuthWorkflow) -> Result<Self, ProviderError> {
        Self::with_api_base(oauth, GRAPH_API)
    }

    pub fn with_api_base(oauth: OAuthWorkflow, base: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            oauth,
            http: build_http_client()?,
            api: base.trim_end_matches('/').to_string(),
        })
    }

    async fn post_action(&self, access: &MailboxAccess, path: &str, body: Value) -> Result<(), ProviderError> {
        send_empty(
            self.http
                .post(format!("{}/{path}", self.api))
                .bearer_auth(&access.access_token)
                .json(&body),
        )
        .await
    }
}

#[async_trait]
impl ProviderAdapter for MicrosoftGraphAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Microsoft
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
        let folder = query.folder_id.as_deref().unwrap_or("inbox");
        let folder_type = classify_folder(folder);

        // A cursor is a full nextLink that already carries the query.
        let request = match &query.cursor {
            Some(next_link) => self.http.get(next_link),
            None => {
                let mut params = vec![
                    ("$top", query.limit.clamp(1, 1000).to_string()),
                    ("$select", MESSAGE_SELECT.to_string()),
                    ("$orderby", "receivedDateTime desc".to_string()),
                ];
                if let Some(filter) = &query.filter {
                    params.push(("$filter", filter.clone()));
                }
                self.http
                    .get(format!("{}/me/mailFolders/{folder}/messages", self.api))
                    .query(&params)
            }
        };

        let page: GraphPage<GraphMessage> = send_json(request.bearer_auth(&access.access_token)).await?;
        let mut messages = Vec::new();
        for item in page.value {
            match normalize_message(access.account_id, item, folder_type) {
                Ok(message) => messages.push(message),
                Err(err) => warn!(error = %err, "skipping malformed Graph message"),
            }
        }

        Ok(MessagePage {
            messages,
            next_cursor: page.next_link,
        })
    }

    async fn get_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
    ) -> Result<NormalizedMessage, ProviderError> {
        let message: GraphMessage = send_json(
            self.http
                .get(format!("{}/me/messages/{provider_message_id}", self.api))
                .bearer_auth(&access.access_token)
                .query(&[("$select", MESSAGE_SELECT)]),
        )
        .await?;

        normalize_message(access.account_id, message, FolderType::Custom)
    }

    async fn send_message(&self, access: &MailboxAccess, message: &OutgoingMessage) -> Result<SentMessage, ProviderError> {
        let body = json!({
            "message": outgoing_to_graph(message)?,
            "saveToSentItems": true,
        });
        self.post_action(access, "me/sendMail", body).await?;

        Ok(SentMessage::default())
    }

    async fn reply_to_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        draft: &ReplyDraft,
    ) -> Result<SentMessage, ProviderError> {
        let action = if draft.reply_all { "replyAll" } else { "reply" };
        let comment = draft.body_html.clone().unwrap_or_else(|| draft.body_text.clone());
        self.post_action(
            access,
            &format!("me/messages/{provider_message_id}/{action}"),
            json!({ "comment": comment }),
        )
        .await?;

        Ok(SentMessage::default())
    }

    async fn forward_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        draft: &ForwardDraft,
    ) -> Result<SentMessage, ProviderError> {
        let comment = draft
            .comment_html
            .clone()
            .unwrap_or_else(|| draft.comment_text.clone());
        self.post_action(
            access,
            &format!("me/messages/{provider_message_id}/forward"),
            json!({
                "comment": comment,
                "toRecipients": recipients_to_graph(&draft.to),
            }),
        )
        .await?;

        Ok(SentMessage::default())
    }

    async fn move_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        destination_folder_id: &str,
    ) -> Result<(), ProviderError> {
        self.post_action(
            access,
            &format!("me/messages/{provider_message_id}/move"),
            json!({ "destinationId": destination_folder_id }),
        )
        .await
    }

    async fn delete_message(&self, access: &MailboxAccess, provider_message_id: &str) -> Result<(), ProviderError> {
        self.move_message(access, provider_message_id, "deleteditems").await
    }

    async fn update_message(
        &self,
        access: &MailboxAccess,
        provider_message_id: &str,
        update: MessageUpdate,
    ) -> Result<(), ProviderError> {
        let mut body = serde_json::Map::new();
        if let Some(unread) = update.unread {
            body.insert("isRead".to_string(), json!(!unread));
        }
        if let Some(starred) = update.starred {
            let status = if starred { "flagged" } else { "notFlagged" };
            body.insert("flag".to_string(), json!({ "flagStatus": status }));
        }
        if body.is_empty() {
            return Ok(());
        }

        send_empty(
            self.http
                .patch(format!("{}/me/messages/{provider_message_id}", self.api))
                .bearer_auth(&access.access_token)
                .json(&Value::Object(body)),
        )
        .await
    }

    async fn list_folders(&self, access: &MailboxAccess) -> Result<Vec<Folder>, ProviderError> {
        let mut folders = Vec::new();
        let mut request = self
            .http
            .get(format!("{}/me/mailFolders", self.api))
            .query(&[("$top", "100")]);

        loop {
            let page: GraphPage<GraphFolder> = send_json(request.bearer_auth(&access.access_token)).await?;
            folders.extend(page.value.into_iter().map(graph_folder));
            match page.next_link {
                Some(next_link) => request = self.http.get(next_link),
                None => break,
            }
        }

        Ok(folders)
    }

    async fn create_folder(&self, access: &MailboxAccess, name: &str) -> Result<Folder, ProviderError> {
        let folder: GraphFolder = send_json(
            self.http
                .post(format!("{}/me/mailFolders", self.api))
                .bearer_auth(&access.access_token)
                .json(&json!({ "displayName": name })),
        )
        .await?;

        Ok(graph_folder(folder))
    }

    async fn delta_sync(&self, access: &MailboxAccess, cursor: Option<&str>) -> Result<DeltaResult, ProviderError> {
        // Without a cursor the pages are walked only to reach a deltaLink.
        let baseline = cursor.is_none();
        let mut request = match cursor {
            Some(delta_link) => self.http.get(delta_link),
            None => self
                .http
                .get(format!("{}/me/mailFolders/inbox/messages/delta", self.api))
                .query(&[("$select", MESSAGE_SELECT)]),
        };

        let mut changes = Vec::new();
        loop {
            let page: GraphPage<GraphMessage> = match send_json(
                request
                    .bearer_auth(&access.access_token)
                    .header("Prefer", "odata.maxpagesize=50"),
            )
            .await
            {
                Err(err) if is_expired_delta(&err) => return Err(ProviderError::CursorExpired),
                other => other?,
            };

            if !baseline {
                for item in page.value {
                    match delta_change(access.account_id, item) {
                        Ok(change) => changes.push(change),
                        Err(err) => warn!(error = %err, "skipping malformed Graph delta item"),
                    }
                }
            }

            if let Some(next_link) = page.next_link {
                request = self.http.get(next_link);
                continue;
            }

            let new_cursor = page
                .delta_link
                .ok_or_else(|| ProviderError::Data("Graph delta page has neither nextLink nor deltaLink".to_string()))?;
            debug!(account_id = %access.account_id, changes = changes.len(), "Graph delta collected");
            return Ok(DeltaResult { changes, new_cursor });
        }
    }

    async fn list_contacts(&self, access: &MailboxAccess, limit: u32) -> Result<Vec<RemoteContact>, ProviderError> {
        let page: GraphPage<GraphContact> = send_json(
            self.http
                .get(format!("{}/me/contacts", self.api))
                .bearer_auth(&access.access_token)
                .query(&[
                    ("$top", limit.clamp(1, 1000).to_string()),
                    (
                        "$select",
                        "id,displayName,emailAddresses,mobilePhone,businessPhones,homePhones,companyName".to_string(),
                    ),
                ]),
        )
        .await?;

        Ok(page.value.into_iter().map(graph_contact).collect())
    }

    async fn list_calendar_events(
        &self,
        access: &MailboxAccess,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        let page: GraphPage<GraphEvent> = send_json(
            self.http
                .get(format!("{}/me/calendarView", self.api))
                .bearer_auth(&access.access_token)
                .query(&[
                    ("startDateTime", from.to_rfc3339()),
                    ("endDateTime", to.to_rfc3339()),
                    ("$top", "250".to_string()),
                ]),
        )
        .await?;

        Ok(page.value.into_iter().filter_map(normalize_event).collect())
    }

    async fn create_calendar_event(
        &self,
        access: &MailboxAccess,
        event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, ProviderError> {
        let (start, end, is_all_day) = match &event.timing {
            EventTiming::AllDay { start, end } => (
                format!("{}T00:00:00", start.format("%Y-%m-%d")),
                format!("{}T00:00:00", end.format("%Y-%m-%d")),
                true,
            ),
            EventTiming::Timed { start, end, .. } => (
                start.format("%Y-%m-%dT%H:%M:%S").to_string(),
                end.format("%Y-%m-%dT%H:%M:%S").to_string(),
                false,
            ),
        };

        let mut body = json!({
            "subject": event.title,
            "body": { "contentType": "Text", "content": event.description.clone().unwrap_or_default() },
            "start": { "dateTime": start, "timeZone": "UTC" },
            "end": { "dateTime": end, "timeZone": "UTC" },
            "isAllDay": is_all_day,
            "attendees": event.attendees.iter().map(|attendee| json!({
                "emailAddress": { "address": attendee.email, "name": attendee.name },
                "type": "required",
            })).collect::<Vec<_>>(),
        });
        if let Some(location) = &event.location {
            body["location"] = json!({ "displayName": location });
        }
        if event.online_meeting {
            body["isOnlineMeeting"] = json!(true);
            body["onlineMeetingProvider"] = json!("teamsForBusiness");
        }

        let created: GraphEvent = send_json(
            self.http
                .post(format!("{}/me/events", self.api))
                .bearer_auth(&access.access_token)
                .json(&body),
        )
        .await?;

        normalize_event(created)
            .ok_or_else(|| ProviderError::Data("created Graph event is missing id or start".to_string()))
    }

    async fn create_subscription(
        &self,
        access: &MailboxAccess,
        request: &SubscriptionRequest,
    ) -> Result<PushSubscription, ProviderError> {
        let webhook_url = request
            .webhook_url
            .as_deref()
            .ok_or_else(|| ProviderError::Data("Graph subscriptions require a webhook URL".to_string()))?;
        let client_state = request
            .client_state
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let created: GraphSubscription = send_json(
            self.http
                .post(format!("{}/subscriptions", self.api))
                .bearer_auth(&access.access_token)
                .json(&json!({
                    "changeType": "created,updated,deleted",
                    "notificationUrl": webhook_url,
                    "resource": INBOX_RESOURCE,
                    "expirationDateTime": subscription_expiry().to_rfc3339(),
                    "clientState": client_state,
                })),
        )
        .await?;

        graph_subscription(access.account_id, created, Some(client_state))
    }

    async fn renew_subscription(
        &self,
        access: &MailboxAccess,
        subscription: &PushSubscription,
    ) -> Result<PushSubscription, ProviderError> {
        let renewed: GraphSubscription = send_json(
            self.http
                .patch(format!("{}/subscriptions/{}", self.api, subscription.subscription_id))
                .bearer_auth(&access.access_token)
                .json(&json!({ "expirationDateTime": subscription_expiry().to_rfc3339() })),
        )
        .await?;

        graph_subscription(access.account_id, renewed, subscription.client_state.clone())
    }

    async fn delete_subscription(
        &self,
        access: &MailboxAccess,
        subscription: &PushSubscription,
    ) -> Result<(), ProviderError> {
        send_empty(
            self.http
                .delete(format!("{}/subscriptions/{}", self.api, subscription.subscription_id))
                .bearer_auth(&access.access_token),
        )
        .await
    }
}

/// `410 Gone`, or a sync-state error body, means the deltaLink is dead.
fn is_expired_delta(err: &ProviderError) -> bool {
    match err {
        ProviderError::Http { status: 410, .. } => true,
        ProviderError::Http { status, body } if *status == 400 || *status == 404 => {
            let body = body.to_ascii_lowercase();
            body.contains("syncstate") || body.contains("resyncrequired")
        }
        _ => false,
    }
}

fn delta_change(account_id: Uuid, item: GraphMessage) -> Result<MessageChange, ProviderError> {
    if item.removed.is_some() {
        let provider_message_id = item
            .id
            .ok_or_else(|| ProviderError::Data("removed Graph item has no id".to_string()))?;
        return Ok(MessageChange::Deleted { provider_message_id });
    }

    let created = item.created_date_time.is_some() && item.created_date_time == item.last_modified_date_time;
    let message = normalize_message(account_id, item, FolderType::Inbox)?;
    if created {
        Ok(MessageChange::Created { message })
    } else {
        Ok(MessageChange::Updated { message })
    }
}

fn normalize_message(
    account_id: Uuid,
    item: GraphMessage,
    folder_type: FolderType,
) -> Result<NormalizedMessage, ProviderError> {
    let provider_message_id = item
        .id
        .ok_or_else(|| ProviderError::Data("Graph message has no id".to_string()))?;
    let now = Utc::now();

    let (body_html, body_text) = match item.body {
        Some(GraphBody {
            content_type,
            content: Some(content),
        }) if content_type.as_deref().is_some_and(|kind| kind.eq_ignore_ascii_case("html")) => {
            (Some(sanitize_html(&content)), None)
        }
        Some(GraphBody { content, .. }) => (None, content),
        None => (None, None),
    };
    let snippet = item
        .body_preview
        .filter(|preview| !preview.trim().is_empty())
        .unwrap_or_else(|| snippet_from(body_text.as_deref().unwrap_or_default()));
    let is_draft = item.is_draft.unwrap_or(false);
    let flags = MessageFlags {
        unread: item.is_read == Some(false),
        starred: item
            .flag
            .and_then(|flag| flag.flag_status)
            .is_some_and(|status| status.eq_ignore_ascii_case("flagged")),
        draft: is_draft,
        has_attachments: item.has_attachments.unwrap_or(false),
    };
    let importance = match item.importance.as_deref() {
        Some(value) if value.eq_ignore_ascii_case("high") => Importance::High,
        Some(value) if value.eq_ignore_ascii_case("low") => Importance::Low,
        _ => Importance::Normal,
    };

    Ok(NormalizedMessage {
        id: Uuid::new_v4(),
        account_id,
        provider_message_id,
        provider_thread_id: item.conversation_id,
        from: item.from.and_then(recipient_participant).into_iter().collect(),
        to: participants(item.to_recipients),
        cc: participants(item.cc_recipients),
        bcc: participants(item.bcc_recipients),
        reply_to: participants(item.reply_to),
        subject: item.subject.unwrap_or_default(),
        body_html,
        body_text,
        snippet,
        folder_id: item.parent_folder_id,
        folder_type: if is_draft { FolderType::Drafts } else { folder_type },
        labels: Vec::new(),
        categories: item.categories.unwrap_or_default(),
        flags,
        attachments: Vec::new(),
        importance,
        sent_at: item.sent_date_time.as_deref().and_then(parse_rfc3339_to_utc),
        received_at: item
            .received_date_time
            .as_deref()
            .and_then(parse_rfc3339_to_utc)
            .unwrap_or(now),
        archived_at: None,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    })
}

fn participants(recipients: Option<Vec<GraphRecipient>>) -> Vec<Participant> {
    recipients
        .unwrap_or_default()
        .into_iter()
        .filter_map(recipient_participant)
        .collect()
}

fn recipient_participant(recipient: GraphRecipient) -> Option<Participant> {
    let address = recipient.email_address?;
    let email = address.address.filter(|email| !email.trim().is_empty())?;
    Some(Participant {
        email,
        name: address.name.filter(|name| !name.trim().is_empty()),
    })
}

fn recipients_to_graph(participants: &[Participant]) -> Vec<Value> {
    participants
        .iter()
        .map(|participant| {
            json!({
                "emailAddress": { "address": participant.email, "name": participant.name }
            })
        })
        .collect()
}

fn outgoing_to_graph(message: &OutgoingMessage) -> Result<Value, ProviderError> {
    let body = match &message.body_html {
        Some(html) => json!({ "contentType": "HTML", "content": html }),
        None => json!({ "contentType": "Text", "content": message.body_text }),
    };

    let mut attachments = Vec::new();
    for attachment in &message.attachments {
        // Validates the payload before it leaves the process.
        decode_attachment(attachment)?;
        attachments.push(json!({
            "@odata.type": "#microsoft.graph.fileAttachment",
            "name": attachment.file_name,
            "contentType": attachment.mime_type,
            "contentBytes": attachment.content_base64,
            "isInline": attachment.inline,
        }));
    }

    Ok(json!({
        "subject": message.subject,
        "body": body,
        "toRecipients": recipients_to_graph(&message.to),
        "ccRecipients": recipients_to_graph(&message.cc),
        "bccRecipients": recipients_to_graph(&message.bcc),
        "replyTo": recipients_to_graph(&message.reply_to),
        "attachments": attachments,
    }))
}

fn graph_folder(folder: GraphFolder) -> Folder {
    Folder {
        folder_type: classify_folder(&folder.display_name),
        id: folder.id,
        name: folder.display_name,
        unread_count: folder.unread_item_count.unwrap_or(0),
        total_count: folder.total_item_count.unwrap_or(0),
    }
}

fn graph_contact(contact: GraphContact) -> RemoteContact {
    let mut phones: Vec<String> = contact.mobile_phone.into_iter().collect();
    phones.extend(contact.business_phones.unwrap_or_default());
    phones.extend(contact.home_phones.unwrap_or_default());
    phones.retain(|phone| !phone.trim().is_empty());

    RemoteContact {
        provider_contact_id: contact.id,
        display_name: contact.display_name,
        emails: contact
            .email_addresses
            .unwrap_or_default()
            .into_iter()
            .filter_map(|address| address.address)
            .collect(),
        phones,
        organization: contact.company_name,
    }
}

fn normalize_event(event: GraphEvent) -> Option<CalendarEvent> {
    let Some(id) = event.id else {
        warn!("skipping Graph event without id");
        return None;
    };
    let Some(timing) = event_timing(&event.start, &event.end, event.is_all_day.unwrap_or(false)) else {
        warn!(event_id = %id, "skipping Graph event without a usable start");
        return None;
    };

    let online_meeting = if event.is_online_meeting.unwrap_or(false) {
        Some(OnlineMeeting {
            provider: event.online_meeting_provider,
            join_url: event.online_meeting.and_then(|meeting| meeting.join_url),
        })
    } else {
        None
    };

    Some(CalendarEvent {
        provider_event_id: id,
        calendar_id: "calendar".to_string(),
        title: event.subject.unwrap_or_default(),
        description: event.body_preview.filter(|preview| !preview.is_empty()),
        location: event
            .location
            .and_then(|location| location.display_name)
            .filter(|name| !name.is_empty()),
        timing,
        organizer: event.organizer.and_then(recipient_participant),
        attendees: participants(event.attendees),
        online_meeting,
        recurrence: event.recurrence.filter(|value| !value.is_null()).map(|value| value.to_string()),
        cancelled: event.is_cancelled.unwrap_or(false),
        updated_at: event
            .last_modified_date_time
            .as_deref()
            .and_then(parse_rfc3339_to_utc)
            .unwrap_or_else(Utc::now),
    })
}

fn event_timing(start: &Option<GraphDateTime>, end: &Option<GraphDateTime>, is_all_day: bool) -> Option<EventTiming> {
    let start = start.as_ref()?;
    let start_raw = start.date_time.as_deref()?;

    if is_all_day {
        let start_date = parse_date(start_raw)?;
        let end_date = end
            .as_ref()
            .and_then(|end| end.date_time.as_deref())
            .and_then(parse_date)
            .unwrap_or_else(|| start_date.succ_opt().unwrap_or(start_date));
        return Some(EventTiming::AllDay {
            start: start_date,
            end: end_date,
        });
    }

    let starts_at = parse_zoned_datetime(start_raw, start.time_zone.as_deref())?;
    let ends_at = end
        .as_ref()
        .and_then(|end| parse_zoned_datetime(end.date_time.as_deref()?, end.time_zone.as_deref()))
        .unwrap_or(starts_at);

    Some(EventTiming::Timed {
        start: starts_at,
        end: ends_at,
        timezone: start.time_zone.clone(),
    })
}

fn subscription_expiry() -> DateTime<Utc> {
    Utc::now() + Duration::minutes(SUBSCRIPTION_TTL_MINUTES)
}

fn graph_subscription(
    account_id: Uuid,
    subscription: GraphSubscription,
    client_state: Option<String>,
) -> Result<PushSubscription, ProviderError> {
    let expires_at = subscription
        .expiration_date_time
        .as_deref()
        .and_then(parse_rfc3339_to_utc)
        .ok_or_else(|| ProviderError::Data("Graph subscription has no expiration".to_string()))?;

    Ok(PushSubscription {
        account_id,
        subscription_id: subscription.id,
        resource: subscription.resource.unwrap_or_else(|| INBOX_RESOURCE.to_string()),
        expires_at,
        client_state,
    })
}

// -- wire types ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: Option<String>,
    conversation_id: Option<String>,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    to_recipients: Option<Vec<GraphRecipient>>,
    cc_recipients: Option<Vec<GraphRecipient>>,
    bcc_recipients: Option<Vec<GraphRecipient>>,
    reply_to: Option<Vec<GraphRecipient>>,
    body: Option<GraphBody>,
    body_preview: Option<String>,
    parent_folder_id: Option<String>,
    is_read: Option<bool>,
    is_draft: Option<bool>,
    flag: Option<GraphFlag>,
    has_attachments: Option<bool>,
    importance: Option<String>,
    sent_date_time: Option<String>,
    received_date_time: Option<String>,
    created_date_time: Option<String>,
    last_modified_date_time: Option<String>,
    categories: Option<Vec<String>>,
    #[serde(rename = "@removed")]
    removed: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphFlag {
    flag_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphFolder {
    id: String,
    display_name: String,
    unread_item_count: Option<u32>,
    total_item_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphContact {
    id: String,
    display_name: Option<String>,
    email_addresses: Option<Vec<GraphEmailAddress>>,
    mobile_phone: Option<String>,
    business_phones: Option<Vec<String>>,
    home_phones: Option<Vec<String>>,
    company_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: Option<String>,
    subject: Option<String>,
    body_preview: Option<String>,
    location: Option<GraphLocation>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    is_all_day: Option<bool>,
    is_cancelled: Option<bool>,
    organizer: Option<GraphRecipient>,
    attendees: Option<Vec<GraphRecipient>>,
    is_online_meeting: Option<bool>,
    online_meeting_provider: Option<String>,
    online_meeting: Option<GraphOnlineMeeting>,
    recurrence: Option<Value>,
    last_modified_date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: Option<String>,
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphLocation {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphOnlineMeeting {
    join_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphSubscription {
    id: String,
    resource: Option<String>,
    expiration_date_time: Option<String>,
}

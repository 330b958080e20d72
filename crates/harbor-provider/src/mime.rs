use crate::adapter::{OutgoingAttachment, OutgoingMessage};
use crate::ProviderError;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use harbor_core::{AttachmentMeta, Importance, Participant};
use lettre::message::{header, Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use mailparse::{parse_mail, ParsedMail};

const SNIPPET_CHARS: usize = 200;

/// The parts of an RFC 822 message the normalizers care about.
#[derive(Debug, Clone, Default)]
pub struct ParsedRfc822 {
    pub message_id: Option<String>,
    pub references: Option<String>,
    pub from: Vec<Participant>,
    pub to: Vec<Participant>,
    pub cc: Vec<Participant>,
    pub bcc: Vec<Participant>,
    pub reply_to: Vec<Participant>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<AttachmentMeta>,
    pub importance: Importance,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Threading headers for replies built locally.
#[derive(Debug, Clone, Default)]
pub struct ThreadHeaders {
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

pub fn decode_base64url(raw: &str) -> Result<Vec<u8>, ProviderError> {
    URL_SAFE_NO_PAD
        .decode(raw.as_bytes())
        .or_else(|_| URL_SAFE.decode(raw.as_bytes()))
        .map_err(|err| ProviderError::Data(format!("invalid base64url payload: {err}")))
}

pub fn encode_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn parse_rfc822(bytes: &[u8]) -> Result<ParsedRfc822, ProviderError> {
    let parsed = parse_mail(bytes)?;

    let html = extract_body(&parsed, "text/html").map(|html| sanitize_html(&html));
    let mut attachments = Vec::new();
    collect_attachments(&parsed, &mut attachments);

    Ok(ParsedRfc822 {
        message_id: header_value(&parsed, "Message-ID"),
        references: header_value(&parsed, "References"),
        from: parse_address_list(header_value(&parsed, "From")),
        to: parse_address_list(header_value(&parsed, "To")),
        cc: parse_address_list(header_value(&parsed, "Cc")),
        bcc: parse_address_list(header_value(&parsed, "Bcc")),
        reply_to: parse_address_list(header_value(&parsed, "Reply-To")),
        subject: header_value(&parsed, "Subject").unwrap_or_default(),
        body_text: extract_body(&parsed, "text/plain"),
        body_html: html,
        attachments,
        importance: header_importance(&parsed),
        sent_at: parsed_message_date(&parsed),
    })
}

pub fn sanitize_html(html: &str) -> String {
    ammonia::clean(html)
}

/// First characters of the text body with whitespace collapsed.
pub fn snippet_from(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(SNIPPET_CHARS)
        .collect()
}

/// Splits a header like `"Ana" <ana@example.com>, bob@example.com`.
pub fn parse_address_list(raw: Option<String>) -> Vec<Participant> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    raw.split(',')
        .filter_map(|segment| {
            let value = segment.trim();
            if value.is_empty() {
                return None;
            }

            let lt = value.rfind('<');
            let gt = value.rfind('>');
            if let (Some(lt), Some(gt)) = (lt, gt) {
                if lt < gt {
                    let name = value[..lt].trim().trim_matches('"').trim().to_string();
                    let address = value[lt + 1..gt].trim().to_string();
                    if address.is_empty() {
                        return None;
                    }

                    return Some(Participant {
                        email: address,
                        name: if name.is_empty() { None } else { Some(name) },
                    });
                }
            }

            Some(Participant::new(value.trim_matches('"')))
        })
        .collect()
}

pub fn parse_epoch_millis(raw: &str) -> Option<DateTime<Utc>> {
    let millis = raw.parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Renders an outgoing message as RFC 822 bytes.
pub fn build_rfc822(outgoing: &OutgoingMessage, thread: &ThreadHeaders) -> Result<Vec<u8>, ProviderError> {
    if outgoing.to.is_empty() && outgoing.cc.is_empty() && outgoing.bcc.is_empty() {
        return Err(ProviderError::Build("message has no recipients".to_string()));
    }

    let mut builder = Message::builder()
        .from(to_mailbox(&outgoing.from)?)
        .subject(outgoing.subject.clone());

    for to in &outgoing.to {
        builder = builder.to(to_mailbox(to)?);
    }
    for cc in &outgoing.cc {
        builder = builder.cc(to_mailbox(cc)?);
    }
    for bcc in &outgoing.bcc {
        builder = builder.bcc(to_mailbox(bcc)?);
    }
    for reply_to in &outgoing.reply_to {
        builder = builder.reply_to(to_mailbox(reply_to)?);
    }
    if let Some(in_reply_to) = &thread.in_reply_to {
        builder = builder.in_reply_to(in_reply_to.clone());
    }
    if let Some(references) = &thread.references {
        builder = builder.references(references.clone());
    }

    let alternative = match &outgoing.body_html {
        Some(html) => MultiPart::alternative()
            .singlepart(SinglePart::plain(outgoing.body_text.clone()))
            .singlepart(
                SinglePart::builder()
                    .header(header::ContentType::TEXT_HTML)
                    .body(html.clone()),
            ),
        None => MultiPart::alternative().singlepart(SinglePart::plain(outgoing.body_text.clone())),
    };

    let payload = if outgoing.attachments.is_empty() {
        alternative
    } else {
        let mut mixed = MultiPart::mixed().multipart(alternative);
        for attachment in &outgoing.attachments {
            mixed = mixed.singlepart(attachment_part(attachment)?);
        }
        mixed
    };

    let message = builder
        .multipart(payload)
        .map_err(|err| ProviderError::Build(err.to_string()))?;

    Ok(message.formatted())
}

pub fn decode_attachment(attachment: &OutgoingAttachment) -> Result<Vec<u8>, ProviderError> {
    STANDARD
        .decode(attachment.content_base64.as_bytes())
        .map_err(|err| ProviderError::Build(format!("invalid attachment base64: {err}")))
}

fn attachment_part(attachment: &OutgoingAttachment) -> Result<SinglePart, ProviderError> {
    let bytes = decode_attachment(attachment)?;
    let mime = attachment
        .mime_type
        .parse()
        .map_err(|err| ProviderError::Build(format!("invalid attachment mime type: {err}")))?;

    let part = if attachment.inline {
        Attachment::new_inline(attachment.file_name.clone()).body(bytes, mime)
    } else {
        Attachment::new(attachment.file_name.clone()).body(bytes, mime)
    };
    Ok(part)
}

fn to_mailbox(participant: &Participant) -> Result<Mailbox, ProviderError> {
    let email = participant
        .email
        .parse()
        .map_err(|err| ProviderError::Build(format!("invalid email {}: {err}", participant.email)))?;

    Ok(Mailbox::new(participant.name.clone(), email))
}

fn header_value(mail: &ParsedMail<'_>, key: &str) -> Option<String> {
    mail.get_headers()
        .into_iter()
        .find(|header| header.get_key_ref().eq_ignore_ascii_case(key))
        .map(|header| header.get_value())
}

fn header_importance(mail: &ParsedMail<'_>) -> Importance {
    if let Some(value) = header_value(mail, "Importance") {
        return match value.trim().to_ascii_lowercase().as_str() {
            "high" => Importance::High,
            "low" => Importance::Low,
            _ => Importance::Normal,
        };
    }

    match header_value(mail, "X-Priority")
        .and_then(|value| value.trim().chars().next())
        .and_then(|digit| digit.to_digit(10))
    {
        Some(1 | 2) => Importance::High,
        Some(4 | 5) => Importance::Low,
        _ => Importance::Normal,
    }
}

fn extract_body(mail: &ParsedMail<'_>, mime_type: &str) -> Option<String> {
    if mail.subparts.is_empty() {
        let disposition = header_value(mail, "Content-Disposition").unwrap_or_default();
        if mail.ctype.mimetype.eq_ignore_ascii_case(mime_type)
            && !disposition.to_ascii_lowercase().contains("attachment")
        {
            return mail.get_body().ok();
        }
        return None;
    }

    mail.subparts.iter().find_map(|part| extract_body(part, mime_type))
}

fn collect_attachments(mail: &ParsedMail<'_>, attachments: &mut Vec<AttachmentMeta>) {
    if mail.subparts.is_empty() {
        let disposition = header_value(mail, "Content-Disposition")
            .unwrap_or_default()
            .to_ascii_lowercase();
        let name = header_filename(&disposition).or_else(|| mail.ctype.params.get("name").cloned());
        let is_attachment =
            disposition.contains("attachment") || (disposition.contains("inline") && name.is_some());

        if is_attachment {
            let size = mail.get_body_raw().map(|body| body.len() as u64).unwrap_or(0);
            attachments.push(AttachmentMeta {
                provider_attachment_id: None,
                file_name: name.unwrap_or_else(|| "attachment.bin".to_string()),
                mime_type: mail.ctype.mimetype.clone(),
                size,
                inline: disposition.contains("inline"),
            });
        }
        return;
    }

    for part in &mail.subparts {
        collect_attachments(part, attachments);
    }
}

fn header_filename(disposition: &str) -> Option<String> {
    let key = "filename=";
    let idx = disposition.find(key)?;
    let raw = disposition[idx + key.len()..].trim();

    if let Some(stripped) = raw.strip_prefix('"') {
        let end = stripped.find('"')?;
        return Some(stripped[..end].to_string());
    }

    raw.split(';')
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parsed_message_date(parsed: &ParsedMail<'_>) -> Option<DateTime<Utc>> {
    let raw = header_value(parsed, "Date")?;
    let timestamp = mailparse::dateparse(&raw).ok()?;
    Utc.timestamp_opt(timestamp, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &str = "From: \"Ana Lima\" <ana@example.com>\r\n\
To: bob@example.com, \"Cy\" <cy@example.com>\r\n\
Subject: Quarterly numbers\r\n\
Message-ID: <abc123@example.com>\r\n\
Date: Tue, 14 May 2024 09:30:00 +0000\r\n\
X-Priority: 1\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Numbers are   attached.\r\n\
--inner\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Numbers are attached.</p><script>alert(1)</script>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"q2.pdf\"\r\n\
Content-Disposition: attachment; filename=\"q2.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--outer--\r\n";

    #[test]
    fn parses_multipart_message() {
        let parsed = parse_rfc822(MULTIPART.as_bytes()).expect("parse");

        assert_eq!(parsed.subject, "Quarterly numbers");
        assert_eq!(parsed.from, vec![Participant::named("ana@example.com", "Ana Lima")]);
        assert_eq!(parsed.to.len(), 2);
        assert_eq!(parsed.to[1], Participant::named("cy@example.com", "Cy"));
        assert_eq!(parsed.message_id.as_deref(), Some("<abc123@example.com>"));
        assert_eq!(parsed.importance, Importance::High);
        assert!(parsed.body_text.as_deref().unwrap_or_default().contains("Numbers are"));

        let html = parsed.body_html.expect("html body");
        assert!(html.contains("<p>"));
        assert!(!html.contains("script"));

        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].file_name, "q2.pdf");
        assert_eq!(parsed.attachments[0].mime_type, "application/pdf");
        assert_eq!(
            parsed.sent_at.map(|at| at.to_rfc3339()),
            Some("2024-05-14T09:30:00+00:00".to_string())
        );
    }

    #[test]
    fn snippet_collapses_whitespace() {
        assert_eq!(snippet_from("  hello \r\n\r\n  world "), "hello world");
        assert_eq!(snippet_from(&"x".repeat(500)).len(), SNIPPET_CHARS);
    }

    #[test]
    fn builds_reply_with_thread_headers() {
        let outgoing = OutgoingMessage {
            from: Participant::named("me@example.com", "Me"),
            to: vec![Participant::new("ana@example.com")],
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            subject: "Re: Quarterly numbers".to_string(),
            body_text: "Thanks!".to_string(),
            body_html: None,
            attachments: Vec::new(),
        };
        let thread = ThreadHeaders {
            in_reply_to: Some("<abc123@example.com>".to_string()),
            references: Some("<abc123@example.com>".to_string()),
        };

        let bytes = build_rfc822(&outgoing, &thread).expect("build");
        let reparsed = parse_rfc822(&bytes).expect("reparse");

        assert_eq!(reparsed.subject, "Re: Quarterly numbers");
        assert_eq!(reparsed.to, vec![Participant::new("ana@example.com")]);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("In-Reply-To: <abc123@example.com>"));
    }

    #[test]
    fn refuses_message_without_recipients() {
        let outgoing = OutgoingMessage {
            from: Participant::new("me@example.com"),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            subject: "Nobody".to_string(),
            body_text: String::new(),
            body_html: None,
            attachments: Vec::new(),
        };

        assert!(matches!(
            build_rfc822(&outgoing, &ThreadHeaders::default()),
            Err(ProviderError::Build(_))
        ));
    }
}

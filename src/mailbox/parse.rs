//! RFC 822 → `ParsedEmail` conversion on top of `mail_parser`.

use chrono::{DateTime, Utc};
use mail_parser::{HeaderValue, MessageParser};
use tracing::debug;

use crate::error::MailboxError;
use crate::pipeline::types::ParsedEmail;

/// Decode raw message bytes into the pipeline's parsed form.
///
/// Header-level absences (no Message-ID, no From) are preserved as
/// `None` so the driver can decide the message's fate; only a body
/// that `mail_parser` cannot make sense of at all is an error here.
pub fn parse_email(uid: u32, raw: &[u8]) -> Result<ParsedEmail, MailboxError> {
    let parsed = MessageParser::default().parse(raw).ok_or_else(|| {
        MailboxError::Fetch {
            uid,
            reason: "unparseable MIME structure".to_string(),
        }
    })?;

    let (sender_address, sender_name) = match parsed.from().and_then(|a| a.first()) {
        Some(addr) => (
            addr.address().map(|s| s.to_string()),
            addr.name().map(|s| s.to_string()),
        ),
        None => (None, None),
    };

    let body = String::from_utf8_lossy(raw).into_owned();
    let body_text = extract_text(&parsed);

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(|| {
            debug!(uid, "No parseable Date header, using current time");
            Utc::now()
        });

    Ok(ParsedEmail {
        uid,
        message_id: parsed.message_id().map(|s| s.to_string()),
        in_reply_to: first_reference(parsed.in_reply_to()),
        sender_address,
        sender_name,
        subject: parsed.subject().map(|s| s.to_string()),
        body,
        body_text,
        received_at,
    })
}

/// First Message-ID in an In-Reply-To header, if any.
fn first_reference(value: &HeaderValue) -> Option<String> {
    match value {
        HeaderValue::Text(t) => Some(t.to_string()),
        HeaderValue::TextList(list) => list.first().map(|t| t.to_string()),
        _ => None,
    }
}

/// Readable text of the message. `mail_parser` serves an HTML-to-text
/// conversion through `body_text` for HTML-only messages, so no separate
/// tag-stripping fallback is needed.
fn extract_text(parsed: &mail_parser::Message) -> String {
    parsed
        .body_text(0)
        .map(|t| t.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "\
From: Events Office <events@campus.edu>\r\n\
To: all@campus.edu\r\n\
Subject: Guest lecture Thursday\r\n\
Date: Thu, 07 Mar 2024 09:30:00 +0000\r\n\
Message-ID: <root@campus.edu>\r\n\
Content-Type: text/plain\r\n\
\r\n\
Join us Thursday at 6pm in Building 10.\r\n";

    const REPLY: &str = "\
From: student@campus.edu\r\n\
Subject: Re: Guest lecture Thursday\r\n\
Date: Thu, 07 Mar 2024 10:00:00 +0000\r\n\
Message-ID: <reply@campus.edu>\r\n\
In-Reply-To: <root@campus.edu>\r\n\
Content-Type: text/plain\r\n\
\r\n\
Moved to Building 12.\r\n";

    const HTML_ONLY: &str = "\
From: events@campus.edu\r\n\
Subject: Concert\r\n\
Message-ID: <html@campus.edu>\r\n\
Content-Type: text/html\r\n\
\r\n\
<html><body><p>Concert <b>Friday</b> on the quad</p></body></html>\r\n";

    #[test]
    fn parse_plain_message() {
        let email = parse_email(1, PLAIN.as_bytes()).unwrap();
        assert_eq!(email.uid, 1);
        assert_eq!(email.message_id.as_deref(), Some("root@campus.edu"));
        assert!(email.in_reply_to.is_none());
        assert_eq!(email.sender_address.as_deref(), Some("events@campus.edu"));
        assert_eq!(email.sender_name.as_deref(), Some("Events Office"));
        assert_eq!(email.subject.as_deref(), Some("Guest lecture Thursday"));
        assert!(email.body_text.contains("Building 10"));
        assert_eq!(email.received_at.to_rfc3339(), "2024-03-07T09:30:00+00:00");
    }

    #[test]
    fn parse_reply_captures_parent_reference() {
        let email = parse_email(2, REPLY.as_bytes()).unwrap();
        assert_eq!(email.in_reply_to.as_deref(), Some("root@campus.edu"));
        assert_eq!(email.message_id.as_deref(), Some("reply@campus.edu"));
    }

    #[test]
    fn parse_html_only_yields_converted_text() {
        let email = parse_email(3, HTML_ONLY.as_bytes()).unwrap();
        assert_eq!(email.body_text.trim(), "Concert Friday on the quad");
    }

    #[test]
    fn parse_missing_headers_yield_none() {
        let raw = "Content-Type: text/plain\r\n\r\nbare body\r\n";
        let email = parse_email(4, raw.as_bytes()).unwrap();
        assert!(email.message_id.is_none());
        assert!(email.sender_address.is_none());
        assert!(email.subject.is_none());
        assert_eq!(email.body_text.trim(), "bare body");
    }

}

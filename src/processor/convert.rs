//! Provider payload to stored `Message`: header parsing and body selection.

use chrono::{DateTime, Utc};

use crate::mail::RawMessage;
use crate::types::{Message, Participant};

/// Parse one RFC 2822 address: `Jane Roe <jane@x.com>`, `"Roe, Jane" <jane@x.com>`
/// or a bare `jane@x.com`. The name falls back to the local part.
pub fn parse_address(raw: &str) -> Participant {
    let raw = raw.trim();
    let (name, email) = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(open), Some(close)) if open < close => {
            (raw[..open].trim(), raw[open + 1..close].trim())
        }
        _ if raw.contains('@') => ("", raw),
        _ => (raw, ""),
    };

    let name = name.trim_matches('"').trim();
    let name = if name.is_empty() {
        email.split('@').next().unwrap_or("")
    } else {
        name
    };
    Participant::new(name, email)
}

/// Split a `To` header on commas that are outside quotes and angle brackets.
pub fn parse_recipients(raw: &str) -> Vec<Participant> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for c in raw.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);

    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(parse_address)
        .collect()
}

/// `None` when the header is absent; the current time when it cannot be parsed.
pub fn parse_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    // Providers often append a zone comment such as "(UTC)".
    let cleaned = match raw.rfind('(') {
        Some(idx) if raw.ends_with(')') => raw[..idx].trim_end(),
        _ => raw,
    };
    match DateTime::parse_from_rfc2822(cleaned) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            log::debug!("Unparseable Date header '{}': {}; using now", raw, e);
            Some(Utc::now())
        }
    }
}

/// Plain text when present, otherwise the HTML part rendered to text.
pub fn body_text(raw: &RawMessage) -> String {
    if !raw.body.plain.trim().is_empty() {
        return raw.body.plain.clone();
    }
    if raw.body.html.trim().is_empty() {
        return String::new();
    }
    match html2text::from_read(raw.body.html.as_bytes(), 80) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("Failed to render HTML body of {}: {}", raw.id, e);
            String::new()
        }
    }
}

/// The stored shape of a fetched message, before any analysis.
pub fn to_message(raw: &RawMessage) -> Message {
    Message {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        subject: raw.subject.clone(),
        sender: parse_address(&raw.from),
        recipients: parse_recipients(&raw.to),
        body_text: body_text(raw),
        body_html: Some(raw.body.html.clone()).filter(|h| !h.is_empty()),
        sent_at: parse_date(raw.date.as_deref()),
        received_at: Utc::now(),
        labels: raw.labels.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::RawBody;

    #[test]
    fn test_parse_named_address() {
        let p = parse_address("Jane Roe <jane@broker.com>");
        assert_eq!(p, Participant::new("Jane Roe", "jane@broker.com"));

        let p = parse_address("\"Roe, Jane\" <jane@broker.com>");
        assert_eq!(p.name, "Roe, Jane");
    }

    #[test]
    fn test_bare_address_uses_local_part() {
        assert_eq!(
            parse_address("sam@example.com"),
            Participant::new("sam", "sam@example.com")
        );
        assert_eq!(
            parse_address("<sam@example.com>"),
            Participant::new("sam", "sam@example.com")
        );
    }

    #[test]
    fn test_recipients_respect_quoted_commas() {
        let recipients = parse_recipients("\"Roe, Jane\" <jane@broker.com>, sam@example.com, ");
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0].email, "jane@broker.com");
        assert_eq!(recipients[1].name, "sam");
    }

    #[test]
    fn test_parse_date_variants() {
        assert!(parse_date(None).is_none());
        assert!(parse_date(Some("  ")).is_none());

        let dt = parse_date(Some("Mon, 3 Mar 2025 10:00:00 +0000 (UTC)")).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-03-03T10:00:00+00:00");

        let before = Utc::now();
        let fallback = parse_date(Some("sometime last week")).unwrap();
        assert!(fallback >= before);
    }

    #[test]
    fn test_html_body_fallback() {
        let raw = RawMessage {
            id: "m1".into(),
            body: RawBody {
                plain: "  ".into(),
                html: "<p>Offer <b>attached</b></p>".into(),
            },
            ..Default::default()
        };
        let text = body_text(&raw);
        assert!(text.contains("Offer"));
        assert!(text.contains("attached"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn test_to_message_keeps_plain_body() {
        let raw = RawMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            subject: "Tour".into(),
            from: "Jane Roe <jane@broker.com>".into(),
            to: "sam@example.com".into(),
            body: RawBody {
                plain: "See you at 10.".into(),
                html: String::new(),
            },
            ..Default::default()
        };
        let message = to_message(&raw);
        assert_eq!(message.body_text, "See you at 10.");
        assert!(message.body_html.is_none());
        assert!(message.sent_at.is_none());
        assert_eq!(message.recipients.len(), 1);
    }
}

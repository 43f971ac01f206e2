//! Gmail API v1 as a `MailSource`.
//!
//! Lists `is:unread` messages, fetches `format=full` payloads and walks the
//! MIME tree for `text/plain` and `text/html` bodies.

use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::{is_token_expired, load_token, refresh_access_token, send_with_retry, GoogleApiError};
use crate::mail::{MailError, MailSource, MessageRef, RawBody, RawMessage, RawThread};
use crate::retry::RetryPolicy;

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStub {
    id: String,
    #[serde(default)]
    thread_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    payload: Option<FullPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullPayload {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PayloadBody>,
    #[serde(default)]
    parts: Vec<FullPayload>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    messages: Vec<FullMessage>,
}

// ============================================================================
// Client
// ============================================================================

pub struct GmailClient {
    http: reqwest::blocking::Client,
    token_path: PathBuf,
    access_token: RefCell<Option<String>>,
    policy: RetryPolicy,
}

impl GmailClient {
    pub fn new(token_path: PathBuf) -> Result<Self, GoogleApiError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            token_path,
            access_token: RefCell::new(None),
            policy: RetryPolicy::http(),
        })
    }

    /// Cached access token, loading and refreshing from disk when needed.
    fn access_token(&self) -> Result<String, GoogleApiError> {
        if let Some(token) = self.access_token.borrow().as_ref() {
            return Ok(token.clone());
        }
        let token = load_token(&self.token_path)?;
        let token = if is_token_expired(&token) {
            refresh_access_token(&self.http, &token, &self.token_path)?
        } else {
            token
        };
        *self.access_token.borrow_mut() = Some(token.token.clone());
        Ok(token.token)
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, GoogleApiError> {
        let access_token = self.access_token()?;
        let resp = send_with_retry(
            self.http.get(url).bearer_auth(&access_token).query(query),
            &self.policy,
        )?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Drop the cached token so the next call reloads and refreshes.
            self.access_token.borrow_mut().take();
            return Err(GoogleApiError::AuthExpired);
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(GoogleApiError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.json()?)
    }
}

impl MailSource for GmailClient {
    fn is_authenticated(&self) -> bool {
        match self.access_token() {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Gmail not authenticated: {}", e);
                false
            }
        }
    }

    fn list_unread(&self, max: usize) -> Result<Vec<MessageRef>, MailError> {
        let list: MessageListResponse = self.get_json(
            &format!("{GMAIL_BASE}/messages"),
            &[
                ("q", "is:unread".to_string()),
                ("maxResults", max.to_string()),
            ],
        )?;
        Ok(list
            .messages
            .into_iter()
            .map(|stub| MessageRef {
                id: stub.id,
                thread_id: stub.thread_id,
            })
            .collect())
    }

    fn fetch_with_body(&self, id: &str) -> Result<RawMessage, MailError> {
        let message: FullMessage = self.get_json(
            &format!("{GMAIL_BASE}/messages/{id}"),
            &[("format", "full".to_string())],
        )?;
        Ok(to_raw_message(message))
    }

    fn fetch_thread(&self, id: &str) -> Result<RawThread, MailError> {
        let thread: ThreadResponse = self.get_json(
            &format!("{GMAIL_BASE}/threads/{id}"),
            &[("format", "full".to_string())],
        )?;
        Ok(RawThread {
            id: thread.id,
            messages: thread.messages.into_iter().map(to_raw_message).collect(),
        })
    }
}

// ============================================================================
// Payload conversion
// ============================================================================

fn to_raw_message(message: FullMessage) -> RawMessage {
    let headers = message
        .payload
        .as_ref()
        .map(|p| &p.headers[..])
        .unwrap_or(&[]);

    let get_header = |name: &str| -> Option<String> {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
    };

    let mut body = RawBody::default();
    if let Some(payload) = &message.payload {
        collect_bodies(payload, &mut body);
    }

    RawMessage {
        subject: get_header("Subject").unwrap_or_else(|| "(No subject)".to_string()),
        from: get_header("From").unwrap_or_else(|| "(Unknown sender)".to_string()),
        to: get_header("To").unwrap_or_default(),
        date: get_header("Date").filter(|d| !d.trim().is_empty()),
        id: message.id,
        thread_id: message.thread_id,
        body,
        snippet: message.snippet,
        labels: message.label_ids,
    }
}

/// Walk every MIME node; the last `text/plain` and `text/html` parts win.
fn collect_bodies(payload: &FullPayload, body: &mut RawBody) {
    if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
        if let Some(text) = decode_url_safe_base64(data) {
            if payload.mime_type.contains("text/plain") {
                body.plain = text;
            } else if payload.mime_type.contains("text/html") {
                body.html = text;
            }
        }
    }
    for part in &payload.parts {
        collect_bodies(part, body);
    }
}

/// Decode URL-safe base64 as used by the Gmail API, with or without padding.
fn decode_url_safe_base64(data: &str) -> Option<String> {
    use base64::Engine;
    let trimmed = data.trim_end_matches('=');
    match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(trimmed) {
        Ok(bytes) => String::from_utf8(bytes).ok(),
        Err(_) => None,
    }
}

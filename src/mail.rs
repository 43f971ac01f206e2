//! The mail provider seen from the engine: list unread, fetch one message with
//! its body, fetch a thread. Authentication belongs to the implementation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail source not authenticated")]
    NotAuthenticated,
    #[error("Message not found: {0}")]
    NotFound(String),
    #[error("Mail transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBody {
    pub plain: String,
    pub html: String,
}

/// A message as the provider returns it, before address/date parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    /// Raw `From` header, e.g. `Jane Roe <jane@broker.com>`.
    pub from: String,
    /// Raw `To` header, comma separated.
    pub to: String,
    /// Raw RFC 2822 `Date` header.
    pub date: Option<String>,
    pub body: RawBody,
    pub snippet: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawThread {
    pub id: String,
    pub messages: Vec<RawMessage>,
}

pub trait MailSource {
    fn is_authenticated(&self) -> bool;

    /// Up to `max` unread messages, newest first.
    fn list_unread(&self, max: usize) -> Result<Vec<MessageRef>, MailError>;

    fn fetch_with_body(&self, id: &str) -> Result<RawMessage, MailError>;

    fn fetch_thread(&self, id: &str) -> Result<RawThread, MailError>;
}

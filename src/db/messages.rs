use super::*;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::entity::EntityBag;
use crate::types::{CapsuleType, Message, Participant};

const MESSAGE_COLUMNS: &str = "m.id, m.thread_id, m.subject, m.sender_name, m.sender_email,
     m.recipients_json, m.body_text, m.body_html, m.sent_at, m.received_at, m.labels_json,
     m.extracted_json, m.summary, m.category, m.priority, m.category_explanation";

/// Raw column values; decoded outside the rusqlite row callback so codec
/// failures surface as `DbError` instead of being squeezed into rusqlite's type.
struct MessageRow {
    id: String,
    thread_id: String,
    subject: String,
    sender_name: String,
    sender_email: String,
    recipients_json: String,
    body_text: String,
    body_html: Option<String>,
    sent_at: Option<String>,
    received_at: String,
    labels_json: String,
    extracted_json: String,
    summary: Option<String>,
    category: Option<String>,
    priority: Option<i64>,
    category_explanation: Option<String>,
}

impl MessageRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            subject: row.get(2)?,
            sender_name: row.get(3)?,
            sender_email: row.get(4)?,
            recipients_json: row.get(5)?,
            body_text: row.get(6)?,
            body_html: row.get(7)?,
            sent_at: row.get(8)?,
            received_at: row.get(9)?,
            labels_json: row.get(10)?,
            extracted_json: row.get(11)?,
            summary: row.get(12)?,
            category: row.get(13)?,
            priority: row.get(14)?,
            category_explanation: row.get(15)?,
        })
    }

    fn decode(self) -> Result<Message, DbError> {
        let recipients: Vec<Participant> = serde_json::from_str(&self.recipients_json)?;
        let labels: Vec<String> = serde_json::from_str(&self.labels_json)?;
        let extracted: EntityBag = serde_json::from_str(&self.extracted_json)?;
        Ok(Message {
            id: self.id,
            thread_id: self.thread_id,
            subject: self.subject,
            sender: Participant::new(self.sender_name, self.sender_email),
            recipients,
            body_text: self.body_text,
            body_html: self.body_html,
            sent_at: parse_opt_ts(self.sent_at)?,
            received_at: parse_ts(&self.received_at)?,
            labels,
            extracted,
            summary: self.summary,
            category: self.category.as_deref().and_then(CapsuleType::parse),
            priority: self.priority.and_then(|p| u8::try_from(p).ok()),
            category_explanation: self.category_explanation,
        })
    }
}

impl CapsuleDb {
    // =========================================================================
    // Messages
    // =========================================================================

    pub fn message_exists(&self, id: &str) -> Result<bool, DbError> {
        let mut stmt = self.conn.prepare("SELECT 1 FROM messages WHERE id = ?1")?;
        Ok(stmt.exists(params![id])?)
    }

    /// Insert a new message. Fails if the id is already stored.
    pub fn insert_message(&self, message: &Message) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO messages (
                id, thread_id, subject, sender_name, sender_email, recipients_json,
                body_text, body_html, sent_at, received_at, labels_json, extracted_json,
                summary, category, priority, category_explanation
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                message.id,
                message.thread_id,
                message.subject,
                message.sender.name,
                message.sender.email,
                serde_json::to_string(&message.recipients)?,
                message.body_text,
                message.body_html,
                message.sent_at.as_ref().map(ts),
                ts(&message.received_at),
                serde_json::to_string(&message.labels)?,
                serde_json::to_string(&message.extracted)?,
                message.summary,
                message.category.map(|c| c.as_str()),
                message.priority.map(i64::from),
                message.category_explanation,
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>, DbError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], MessageRow::read)
            .optional()?;
        row.map(MessageRow::decode).transpose()
    }

    /// Messages sharing a thread, in insertion order.
    pub fn messages_by_thread(&self, thread_id: &str) -> Result<Vec<Message>, DbError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.thread_id = ?1 ORDER BY m.rowid"
        );
        self.query_messages(&sql, params![thread_id])
    }

    pub fn thread_size(&self, thread_id: &str) -> Result<usize, DbError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Messages received within the last `days` days, in insertion order.
    pub fn recent_messages(&self, days: i64) -> Result<Vec<Message>, DbError> {
        self.recent_messages_since(Utc::now() - Duration::days(days))
    }

    fn recent_messages_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Message>, DbError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.received_at >= ?1 ORDER BY m.rowid"
        );
        self.query_messages(&sql, params![ts(&cutoff)])
    }

    /// Recent messages that no capsule links to yet.
    pub fn unlinked_recent_messages(&self, days: i64) -> Result<Vec<Message>, DbError> {
        let cutoff = Utc::now() - Duration::days(days);
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE m.received_at >= ?1
               AND NOT EXISTS (SELECT 1 FROM capsule_messages cm WHERE cm.message_id = m.id)
             ORDER BY m.rowid"
        );
        self.query_messages(&sql, params![ts(&cutoff)])
    }

    fn query_messages(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Message>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, MessageRow::read)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?.decode()?);
        }
        Ok(messages)
    }
}

//! Message ingestion pipeline.
//!
//! Orchestrates: list unread → skip known ids → fetch → convert →
//! extract / summarize / categorize → store with the analysis attached.
//!
//! Every semantic step has a local fallback, so a message is always stored
//! with some analysis. Fetch and store failures skip that one message.

pub mod convert;

use crate::db::{CapsuleDb, DbError};
use crate::entity::{EntityBag, PersonEntity};
use crate::error::PipelineError;
use crate::intelligence::{heuristics, Semantic};
use crate::mail::{MailError, MailSource, RawMessage};
use crate::types::{CapsuleType, Message, Participant};

/// What the semantic service (or its fallbacks) found in one message.
#[derive(Debug, Clone, Default)]
pub struct MessageAnalysis {
    pub extracted: EntityBag,
    pub summary: Option<String>,
    pub category: Option<CapsuleType>,
    pub priority: Option<u8>,
    pub category_explanation: Option<String>,
}

impl MessageAnalysis {
    pub fn attach_to(self, message: &mut Message) {
        message.extracted = self.extracted;
        message.summary = self.summary;
        message.category = self.category;
        message.priority = self.priority;
        message.category_explanation = self.category_explanation;
    }
}

pub struct EmailProcessor<'a> {
    db: &'a CapsuleDb,
    semantic: Semantic<'a>,
}

impl<'a> EmailProcessor<'a> {
    pub fn new(db: &'a CapsuleDb, semantic: Semantic<'a>) -> Self {
        Self { db, semantic }
    }

    /// Ingest up to `max` unread messages. Returns the ids stored by this call.
    ///
    /// The "already stored" check and the insert are separate statements, so
    /// two concurrent runs can both pick up the same message; the second
    /// insert then fails on the primary key and is skipped.
    pub fn process_new_messages(
        &self,
        mail: &dyn MailSource,
        max: usize,
    ) -> Result<Vec<String>, PipelineError> {
        let refs = mail.list_unread(max).map_err(mail_error)?;
        log::info!("Found {} unread messages", refs.len());

        let mut stored = Vec::new();
        for message_ref in refs {
            match self.db.message_exists(&message_ref.id) {
                Ok(true) => {
                    log::debug!("Message {} already stored, skipping", message_ref.id);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Existence check failed for {}: {}", message_ref.id, e);
                    continue;
                }
            }

            let raw = match mail.fetch_with_body(&message_ref.id) {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!("Failed to fetch message {}: {}", message_ref.id, e);
                    continue;
                }
            };

            match self.ingest(&raw) {
                Ok(message) => stored.push(message.id),
                Err(e) => log::warn!("Failed to store message {}: {}", raw.id, e),
            }
        }
        Ok(stored)
    }

    /// Ingest every not-yet-stored message of one thread.
    pub fn process_thread(
        &self,
        mail: &dyn MailSource,
        thread_id: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let thread = mail.fetch_thread(thread_id).map_err(mail_error)?;

        let mut stored = Vec::new();
        for raw in &thread.messages {
            match self.db.message_exists(&raw.id) {
                Ok(false) => {}
                Ok(true) => continue,
                Err(e) => {
                    log::warn!("Existence check failed for {}: {}", raw.id, e);
                    continue;
                }
            }
            match self.ingest(raw) {
                Ok(message) => stored.push(message.id),
                Err(e) => log::warn!("Failed to store message {}: {}", raw.id, e),
            }
        }
        log::info!(
            "Thread {}: stored {} of {} messages",
            thread_id,
            stored.len(),
            thread.messages.len()
        );
        Ok(stored)
    }

    /// Analyse the message, then store it with the analysis in one insert.
    pub fn ingest(&self, raw: &RawMessage) -> Result<Message, DbError> {
        let mut message = convert::to_message(raw);
        self.analyze(&message).attach_to(&mut message);
        self.db.insert_message(&message)?;
        log::info!(
            "Stored message {} ({})",
            message.id,
            message.category.map(|c| c.as_str()).unwrap_or("uncategorised")
        );
        Ok(message)
    }

    pub fn analyze(&self, message: &Message) -> MessageAnalysis {
        let mut extracted = self
            .semantic
            .extract_entities(&message.body_text, &message.subject)
            .unwrap_or_else(|| heuristics::extract(&message.body_text));
        add_participants(&mut extracted, message);

        let summary = self
            .semantic
            .summarize(&message.body_text, &message.subject)
            .unwrap_or_else(|| fallback_summary(message));

        let mut analysis = MessageAnalysis {
            extracted,
            summary: Some(summary),
            ..Default::default()
        };
        if let Some(categorization) = self
            .semantic
            .categorize(&message.body_text, &message.subject)
        {
            analysis.category = Some(categorization.category);
            analysis.priority = Some(categorization.priority);
            analysis.category_explanation = Some(categorization.explanation);
        }
        analysis
    }
}

fn mail_error(e: MailError) -> PipelineError {
    match e {
        MailError::NotAuthenticated => PipelineError::NotAuthenticated,
        other => PipelineError::Mail(other.to_string()),
    }
}

fn fallback_summary(message: &Message) -> String {
    let name = if message.sender.name.is_empty() {
        &message.sender.email
    } else {
        &message.sender.name
    };
    format!("Email from {} about {}", name, message.subject)
}

/// Add the sender and recipients to `people`, skipping anyone already listed
/// under the same email and anyone without both a name and an address.
fn add_participants(bag: &mut EntityBag, message: &Message) {
    let participants = std::iter::once((&message.sender, "sender"))
        .chain(message.recipients.iter().map(|r| (r, "recipient")));

    for (participant, role) in participants {
        if !is_complete(participant) {
            continue;
        }
        let known = bag.people.iter().any(|p| {
            p.email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(&participant.email))
        });
        if !known {
            bag.people.push(PersonEntity {
                name: Some(participant.name.clone()),
                email: Some(participant.email.clone()),
                role: Some(role.to_string()),
                company: None,
                confidence: Some(1.0),
            });
        }
    }
}

fn is_complete(participant: &Participant) -> bool {
    !participant.name.trim().is_empty() && !participant.email.trim().is_empty()
}

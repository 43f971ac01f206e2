//! Materializing capsules: title, entities, summary, follow-ups and priority,
//! then membership links for every source message.

use std::collections::HashSet;

use super::summary::CapsuleSummary;
use crate::db::{CapsuleDb, DbError};
use crate::entity::CapsuleEntities;
use crate::followups::FollowUpEngine;
use crate::intelligence::Semantic;
use crate::types::{Capsule, CapsuleMessage, CapsuleType, FollowUp, Message, NewCapsule};

const DEFAULT_PRIORITY: u8 = 3;
const HIGH_PRIORITY_KEYWORDS: &[&str] =
    &["urgent", "important", "asap", "immediately", "deadline", "critical"];
const MEDIUM_PRIORITY_KEYWORDS: &[&str] = &["soon", "priority", "attention", "needed", "required"];
const LOW_PRIORITY_KEYWORDS: &[&str] = &[
    "fyi",
    "for your information",
    "update",
    "newsletter",
    "no action",
];

pub struct CapsuleBuilder<'a> {
    db: &'a CapsuleDb,
    follow_ups: FollowUpEngine<'a>,
    summary: CapsuleSummary<'a>,
}

impl<'a> CapsuleBuilder<'a> {
    pub fn new(db: &'a CapsuleDb, semantic: Semantic<'a>, follow_up_default_days: i64) -> Self {
        Self {
            db,
            follow_ups: FollowUpEngine::new(db, semantic.clone(), follow_up_default_days),
            summary: CapsuleSummary::new(db, semantic),
        }
    }

    pub fn follow_ups(&self) -> &FollowUpEngine<'a> {
        &self.follow_ups
    }

    pub fn summary(&self) -> &CapsuleSummary<'a> {
        &self.summary
    }

    /// A single-message capsule, linked to its message.
    pub fn create_from_message(
        &self,
        message: &Message,
        capsule_type: CapsuleType,
    ) -> Result<Capsule, DbError> {
        let prefix = (capsule_type == CapsuleType::Property)
            .then(|| property_label(message))
            .flatten();
        let title = titled(prefix, &message.subject);

        let summary = message
            .summary
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("Created from email: {}", message.subject));

        let new = NewCapsule {
            title,
            capsule_type,
            priority: message.priority.unwrap_or_else(|| determine_priority(message)),
            entities: CapsuleEntities::from_bag(&message.extracted),
            summary,
            follow_ups: self.follow_ups.detect(message),
        };
        let mut capsule = self.db.create_capsule(&new)?;
        log::info!(
            "Created {} capsule {} '{}' from message {}",
            capsule.capsule_type,
            capsule.id,
            capsule.title,
            message.id
        );
        capsule.messages.push(self.link_capsule(&capsule.id, &message.id)?);
        Ok(capsule)
    }

    /// A capsule spanning several messages. `None` for an empty set.
    pub fn create_from_cluster(
        &self,
        messages: &[&Message],
        capsule_type: CapsuleType,
    ) -> Result<Option<Capsule>, DbError> {
        let mut sorted = messages.to_vec();
        sorted.sort_by_key(|m| m.sent_at);
        let Some(latest) = sorted.last() else {
            log::warn!("Refusing to build a capsule from an empty cluster");
            return Ok(None);
        };

        let prefix = (capsule_type == CapsuleType::Property)
            .then(|| messages.iter().find_map(|m| property_label(m)))
            .flatten();
        let title = titled(prefix, &latest.subject);

        let entities = CapsuleEntities::merge(messages.iter().map(|m| &m.extracted));

        let mut seen = HashSet::new();
        let follow_ups: Vec<FollowUp> = messages
            .iter()
            .flat_map(|m| self.follow_ups.detect(m))
            .filter(|f| seen.insert(f.title.clone()))
            .collect();

        let priority = messages
            .iter()
            .map(|m| m.priority.unwrap_or_else(|| determine_priority(m)))
            .min()
            .unwrap_or(DEFAULT_PRIORITY);

        let summary = self
            .summary
            .generate_for(capsule_type, &entities, &follow_ups, &sorted);

        let new = NewCapsule {
            title,
            capsule_type,
            priority,
            entities,
            summary,
            follow_ups,
        };
        let mut capsule = self.db.create_capsule(&new)?;
        log::info!(
            "Created {} capsule {} '{}' from {} messages",
            capsule.capsule_type,
            capsule.id,
            capsule.title,
            messages.len()
        );
        for message in messages {
            capsule.messages.push(self.link_capsule(&capsule.id, &message.id)?);
        }
        Ok(Some(capsule))
    }

    /// Append a membership record. Callers check for existing membership.
    pub fn link_capsule(&self, capsule_id: &str, message_id: &str) -> Result<CapsuleMessage, DbError> {
        self.db.link_message(capsule_id, message_id)
    }
}

fn property_label(message: &Message) -> Option<&str> {
    message
        .extracted
        .properties
        .first()
        .map(|p| p.label())
        .filter(|label| !label.is_empty())
}

fn titled(prefix: Option<&str>, subject: &str) -> String {
    match prefix {
        Some(label) => format!("{label} - {subject}"),
        None => subject.to_string(),
    }
}

/// Keyword priority for messages without an assigned one. Low-priority
/// keywords win over everything else, even "urgent".
pub fn determine_priority(message: &Message) -> u8 {
    let subject = message.subject.to_lowercase();
    let body = message.body_text.to_lowercase();
    let mentions = |keywords: &[&str]| {
        keywords
            .iter()
            .any(|k| subject.contains(*k) || body.contains(*k))
    };

    let mut priority = DEFAULT_PRIORITY;
    if mentions(HIGH_PRIORITY_KEYWORDS) {
        priority = 1;
    } else if mentions(MEDIUM_PRIORITY_KEYWORDS) {
        priority = 2;
    }
    if mentions(LOW_PRIORITY_KEYWORDS) {
        priority = 5;
    }
    priority
}

//! Capsule summaries generated from the member messages.

use crate::db::{CapsuleDb, DbError};
use crate::entity::CapsuleEntities;
use crate::intelligence::prompts::capsule_summary_prompt;
use crate::intelligence::Semantic;
use crate::types::{Capsule, CapsuleType, FollowUp, Message};

pub struct CapsuleSummary<'a> {
    db: &'a CapsuleDb,
    semantic: Semantic<'a>,
}

impl<'a> CapsuleSummary<'a> {
    pub fn new(db: &'a CapsuleDb, semantic: Semantic<'a>) -> Self {
        Self { db, semantic }
    }

    /// Summary of a stored capsule, loading its member messages.
    pub fn generate(&self, capsule: &Capsule) -> Result<String, DbError> {
        if capsule.messages.is_empty() {
            return Ok("No emails in this capsule.".to_string());
        }

        let mut messages = Vec::with_capacity(capsule.messages.len());
        for member in &capsule.messages {
            if messages.iter().any(|m: &Message| m.id == member.message_id) {
                continue;
            }
            match self.db.get_message(&member.message_id)? {
                Some(message) => messages.push(message),
                None => log::warn!(
                    "Capsule {} links missing message {}",
                    capsule.id,
                    member.message_id
                ),
            }
        }
        if messages.is_empty() {
            return Ok("No email content available.".to_string());
        }

        let refs: Vec<&Message> = messages.iter().collect();
        Ok(self.generate_for(
            capsule.capsule_type,
            &capsule.entities,
            &capsule.follow_ups,
            &refs,
        ))
    }

    /// Summary of a message set that may not be stored as a capsule yet.
    pub fn generate_for(
        &self,
        capsule_type: CapsuleType,
        entities: &CapsuleEntities,
        follow_ups: &[FollowUp],
        messages: &[&Message],
    ) -> String {
        if messages.is_empty() {
            return "No emails in this capsule.".to_string();
        }
        let mut sorted = messages.to_vec();
        sorted.sort_by_key(|m| m.sent_at);

        let prompt = capsule_summary_prompt(capsule_type, entities, follow_ups, &sorted);
        match self.semantic.complete(&prompt) {
            Some(text) if !text.trim().is_empty() => text,
            _ => failure_text(capsule_type, sorted.len()),
        }
    }
}

fn failure_text(capsule_type: CapsuleType, count: usize) -> String {
    let about = match capsule_type {
        CapsuleType::Property => " about a property",
        CapsuleType::Deal => " about a deal",
        CapsuleType::Task => " about tasks",
        CapsuleType::Meeting => " about a meeting",
        CapsuleType::General => "",
    };
    format!("Summary generation failed. This capsule contains {count} emails{about}.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::retry::RetryPolicy;
    use crate::testing::{at, message, ScriptedService};
    use crate::types::NewCapsule;

    fn new_capsule(capsule_type: CapsuleType) -> NewCapsule {
        NewCapsule {
            title: "Deal".into(),
            capsule_type,
            priority: 2,
            entities: CapsuleEntities::default(),
            summary: String::new(),
            follow_ups: Vec::new(),
        }
    }

    #[test]
    fn test_empty_capsule() {
        let db = test_db();
        let service = ScriptedService::new().complete_always("never used");
        let summary = CapsuleSummary::new(&db, Semantic::new(&service, RetryPolicy::immediate(1)));
        let capsule = db.create_capsule(&new_capsule(CapsuleType::Deal)).unwrap();

        assert_eq!(summary.generate(&capsule).unwrap(), "No emails in this capsule.");
        assert_eq!(service.complete_calls(), 0);
    }

    #[test]
    fn test_missing_messages() {
        let db = test_db();
        let service = ScriptedService::new();
        let summary = CapsuleSummary::new(&db, Semantic::new(&service, RetryPolicy::immediate(1)));
        let capsule = db.create_capsule(&new_capsule(CapsuleType::Deal)).unwrap();
        db.link_message(&capsule.id, "gone").unwrap();
        let capsule = db.get_capsule(&capsule.id).unwrap().unwrap();

        assert_eq!(summary.generate(&capsule).unwrap(), "No email content available.");
    }

    #[test]
    fn test_failure_text_names_type() {
        let db = test_db();
        let service = ScriptedService::failing();
        let summary = CapsuleSummary::new(&db, Semantic::new(&service, RetryPolicy::immediate(2)));
        let a = message("a", "t", "Offer", "");
        let b = message("b", "t", "Counter", "");

        let text = summary.generate_for(CapsuleType::Deal, &CapsuleEntities::default(), &[], &[&a, &b]);
        assert_eq!(
            text,
            "Summary generation failed. This capsule contains 2 emails about a deal."
        );
        let text = summary.generate_for(CapsuleType::General, &CapsuleEntities::default(), &[], &[&a]);
        assert_eq!(text, "Summary generation failed. This capsule contains 1 emails.");
    }

    #[test]
    fn test_prompt_orders_by_sent_at() {
        let db = test_db();
        let service = ScriptedService::new().complete_always("Counter accepted.");
        let summary = CapsuleSummary::new(&db, Semantic::new(&service, RetryPolicy::immediate(1)));
        let mut later = message("b", "t", "Counter", "");
        later.sent_at = Some(at("2025-03-04T09:00:00Z"));
        let mut earlier = message("a", "t", "Offer", "");
        earlier.sent_at = Some(at("2025-03-03T09:00:00Z"));

        let text = summary.generate_for(CapsuleType::Deal, &CapsuleEntities::default(), &[], &[&later, &earlier]);
        assert_eq!(text, "Counter accepted.");
        let prompt = &service.prompts()[0];
        assert!(prompt.find("Subject: Offer").unwrap() < prompt.find("Subject: Counter").unwrap());
    }
}

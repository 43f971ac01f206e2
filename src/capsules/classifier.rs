//! Whether a message (or a cluster of messages) warrants a capsule, and of
//! which type.
//!
//! An assigned category always decides the type. Without one, rules apply in
//! this precedence: extracted property → deal keyword in the subject → task
//! phrase in the body → nothing.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::db::{CapsuleDb, DbError};
use crate::types::{CapsuleType, Message};

/// Meeting and General capsules are only opened at this priority or better.
const CASUAL_PRIORITY_THRESHOLD: u8 = 3;
/// Threads this long always get a capsule.
const BUSY_THREAD_SIZE: usize = 3;

const DEAL_KEYWORDS: &[&str] = &[
    "offer",
    "contract",
    "purchase",
    "sale",
    "lease",
    "proposal",
    "deal",
    "transaction",
];

const MEETING_KEYWORDS: &[&str] = &[
    "meeting",
    "call",
    "conference",
    "zoom",
    "teams",
    "webex",
    "hangout",
    "calendar",
];

fn task_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:follow(?:\s|-)?up|action(?:\s|-)?item|task|to-do|deadline|due\s+date)\b",
        )
        .expect("task phrase regex should compile")
    })
}

fn has_deal_keyword(subject: &str) -> bool {
    let subject = subject.to_lowercase();
    DEAL_KEYWORDS.iter().any(|k| subject.contains(*k))
}

fn has_meeting_keyword(subject: &str) -> bool {
    let subject = subject.to_lowercase();
    MEETING_KEYWORDS.iter().any(|k| subject.contains(*k))
}

pub fn mentions_task(body: &str) -> bool {
    task_re().is_match(body)
}

/// The per-message decision, ignoring thread length.
pub fn classify(message: &Message) -> (bool, CapsuleType) {
    if let Some(category) = message.category {
        let create = match category {
            CapsuleType::Property | CapsuleType::Deal | CapsuleType::Task => true,
            CapsuleType::Meeting | CapsuleType::General => {
                message.priority.unwrap_or(CASUAL_PRIORITY_THRESHOLD) <= CASUAL_PRIORITY_THRESHOLD
            }
        };
        return (create, category);
    }

    if message.has_property() {
        (true, CapsuleType::Property)
    } else if has_deal_keyword(&message.subject) {
        (true, CapsuleType::Deal)
    } else if mentions_task(&message.body_text) {
        (true, CapsuleType::Task)
    } else {
        (false, CapsuleType::General)
    }
}

/// `classify`, then force creation for threads of three or more stored
/// messages (the type is kept).
pub fn should_create_capsule(
    db: &CapsuleDb,
    message: &Message,
) -> Result<(bool, CapsuleType), DbError> {
    let (create, capsule_type) = classify(message);
    if create {
        return Ok((true, capsule_type));
    }
    let thread_size = db.thread_size(&message.thread_id)?;
    if thread_size >= BUSY_THREAD_SIZE {
        log::debug!(
            "Thread {} has {} messages; opening a {} capsule",
            message.thread_id,
            thread_size,
            capsule_type
        );
        return Ok((true, capsule_type));
    }
    Ok((false, capsule_type))
}

/// Type for a cluster: the plurality category when it covers at least half
/// the messages, otherwise the first rule any message triggers.
pub fn determine_cluster_type(messages: &[&Message]) -> CapsuleType {
    if messages.is_empty() {
        return CapsuleType::General;
    }

    let mut counts: HashMap<CapsuleType, usize> = HashMap::new();
    for category in messages.iter().filter_map(|m| m.category) {
        *counts.entry(category).or_default() += 1;
    }
    // Ties go to the category listed first in `CapsuleType::ALL`.
    let plurality = CapsuleType::ALL
        .into_iter()
        .filter_map(|t| counts.get(&t).map(|&n| (t, n)))
        .fold(None, |best: Option<(CapsuleType, usize)>, (t, n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((t, n)),
        });
    if let Some((category, count)) = plurality {
        if count * 2 >= messages.len() {
            return category;
        }
    }

    if messages.iter().any(|m| m.has_property()) {
        CapsuleType::Property
    } else if messages.iter().any(|m| has_deal_keyword(&m.subject)) {
        CapsuleType::Deal
    } else if messages.iter().any(|m| mentions_task(&m.body_text)) {
        CapsuleType::Task
    } else if messages.iter().any(|m| has_meeting_keyword(&m.subject)) {
        CapsuleType::Meeting
    } else {
        CapsuleType::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::entity::PropertyEntity;
    use crate::testing::message;

    fn categorized(id: &str, category: CapsuleType, priority: u8) -> Message {
        Message {
            category: Some(category),
            priority: Some(priority),
            ..message(id, id, "Subject", "Body")
        }
    }

    #[test]
    fn test_category_rule_dominates_priority() {
        assert_eq!(
            classify(&categorized("m", CapsuleType::Task, 5)),
            (true, CapsuleType::Task)
        );
        assert_eq!(
            classify(&categorized("m", CapsuleType::Meeting, 4)),
            (false, CapsuleType::Meeting)
        );
        assert_eq!(
            classify(&categorized("m", CapsuleType::General, 3)),
            (true, CapsuleType::General)
        );
    }

    #[test]
    fn test_rule_precedence_without_category() {
        let mut m = message("m", "t", "Lease proposal", "Please add this to the task list.");
        m.extracted.properties.push(PropertyEntity::with_address("9 Elm Rd"));
        assert_eq!(classify(&m), (true, CapsuleType::Property));

        m.extracted.properties.clear();
        assert_eq!(classify(&m), (true, CapsuleType::Deal));

        m.subject = "Checking in".into();
        assert_eq!(classify(&m), (true, CapsuleType::Task));

        m.body_text = "Multitasking is hard.".into();
        assert_eq!(classify(&m), (false, CapsuleType::General));
    }

    #[test]
    fn test_busy_thread_forces_creation() {
        let db = test_db();
        for id in ["a", "b", "c"] {
            db.insert_message(&message(id, "t1", "Hello", "Nothing here")).unwrap();
        }
        let m = db.get_message("c").unwrap().unwrap();
        assert_eq!(classify(&m), (false, CapsuleType::General));
        assert_eq!(
            should_create_capsule(&db, &m).unwrap(),
            (true, CapsuleType::General)
        );

        db.insert_message(&message("x", "t2", "Hello", "Nothing here")).unwrap();
        let lone = db.get_message("x").unwrap().unwrap();
        assert_eq!(
            should_create_capsule(&db, &lone).unwrap(),
            (false, CapsuleType::General)
        );
    }

    #[test]
    fn test_cluster_vote() {
        let messages = vec![
            categorized("a", CapsuleType::Deal, 2),
            categorized("b", CapsuleType::Deal, 2),
            categorized("c", CapsuleType::Meeting, 3),
            categorized("d", CapsuleType::Deal, 1),
        ];
        let refs: Vec<&Message> = messages.iter().collect();
        assert_eq!(determine_cluster_type(&refs), CapsuleType::Deal);
    }

    #[test]
    fn test_cluster_falls_back_to_rules_without_majority() {
        let messages = vec![
            categorized("a", CapsuleType::Deal, 2),
            message("b", "b", "Zoom call Tuesday", ""),
            message("c", "c", "Notes", ""),
        ];
        let refs: Vec<&Message> = messages.iter().collect();
        // 1 of 3 is below half; "Subject" of `a` has no deal keyword.
        assert_eq!(determine_cluster_type(&refs), CapsuleType::Meeting);
    }
}

//! Follow-up detection and completion matching.
//!
//! Detection tries, in order: the message's extracted action items, a
//! semantic-service extraction, and finally a fixed set of request phrases.
//! Completion compares an open follow-up's words with a later message and
//! requires an explicit completion phrase on top.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::db::{CapsuleDb, DbError};
use crate::intelligence::prompts::follow_up_prompt;
use crate::intelligence::{parse_json_array, Semantic};
use crate::types::{FollowUp, Message, PendingFollowUp};

/// Phrase-detected follow-ups kept per message.
const MAX_PATTERN_FOLLOW_UPS: usize = 3;
const TITLE_CONTEXT_CHARS: usize = 100;
/// Share of a follow-up's terms that must appear in the message.
const COMPLETION_TERM_RATIO: f64 = 0.5;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "with", "by", "from",
    "up", "about", "into", "over", "after",
];

const COMPLETION_PHRASES: &[&str] = &[
    "completed",
    "done",
    "finished",
    "resolved",
    "addressed",
    "taken care of",
    "here it is",
    "as requested",
    "as asked",
    "attached is",
    "please find",
    "i've completed",
    "i have completed",
    "task complete",
];

fn request_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"(?i)\bfollow(?:\s|-)?up\b",
            r"(?i)\baction(?:\s|-)?item\b",
            r"(?i)\btask\b",
            r"(?i)\bto-do\b",
            r"(?i)\bdeadline\b",
            r"(?i)\bdue\s+date\b",
            r"(?i)\bplease\s+(?:send|provide|get|prepare|review)\b",
            r"(?i)\blet\s+me\s+know\b",
            r"(?i)\bget\s+back\s+to\s+me\b",
            r"(?i)\brespond\s+by\b",
            r"(?i)\bby\s+(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
            r"(?i)\bneed\s+(?:to|from)\s+you\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("follow-up phrase regex should compile"))
        .collect()
    })
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\b").expect("word regex should compile"))
}

/// One entry of the JSON array the semantic service is asked for.
#[derive(Debug, Deserialize)]
struct SuggestedFollowUp {
    #[serde(default)]
    title: String,
    #[serde(default)]
    responsible: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
}

pub struct FollowUpEngine<'a> {
    db: &'a CapsuleDb,
    semantic: Semantic<'a>,
    default_days: i64,
}

impl<'a> FollowUpEngine<'a> {
    pub fn new(db: &'a CapsuleDb, semantic: Semantic<'a>, default_days: i64) -> Self {
        Self {
            db,
            semantic,
            default_days,
        }
    }

    // =========================================================================
    // Detection
    // =========================================================================

    pub fn detect(&self, message: &Message) -> Vec<FollowUp> {
        if !message.extracted.action_items.is_empty() {
            return self.from_action_items(message);
        }
        if let Some(follow_ups) = self.from_semantic(message) {
            return follow_ups;
        }
        self.from_phrases(message)
    }

    fn from_action_items(&self, message: &Message) -> Vec<FollowUp> {
        message
            .extracted
            .action_items
            .iter()
            .map(|item| {
                let title = non_blank(item.action.as_deref())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Follow up on: {}", message.subject));
                FollowUp::new(
                    title,
                    format!("Action item from email: {}", message.subject),
                    non_blank(item.responsible.as_deref()).map(str::to_string),
                    self.due_date(item.deadline.as_deref()),
                    &message.id,
                )
            })
            .collect()
    }

    /// `None` when the service is unavailable, its answer holds no parseable
    /// array, or the array is empty, so the phrase scan runs instead.
    fn from_semantic(&self, message: &Message) -> Option<Vec<FollowUp>> {
        let output = self.semantic.complete(&follow_up_prompt(message))?;
        let Some(suggestions) = parse_json_array::<SuggestedFollowUp>(&output) else {
            log::warn!(
                "Malformed follow-up output for message {}; scanning phrases",
                message.id
            );
            return None;
        };
        if suggestions.is_empty() {
            return None;
        }
        Some(
            suggestions
                .into_iter()
                .map(|s| {
                    let title = if s.title.trim().is_empty() {
                        format!("Follow up on: {}", message.subject)
                    } else {
                        s.title.trim().to_string()
                    };
                    FollowUp::new(
                        title,
                        format!("Action item from email: {}", message.subject),
                        non_blank(s.responsible.as_deref()).map(str::to_string),
                        self.due_date(s.due_date.as_deref()),
                        &message.id,
                    )
                })
                .collect(),
        )
    }

    fn from_phrases(&self, message: &Message) -> Vec<FollowUp> {
        let body = &message.body_text;
        let mut seen = HashSet::new();
        let mut follow_ups = Vec::new();

        'patterns: for re in request_res() {
            for m in re.find_iter(body) {
                let sentence = enclosing_sentence(body, m.start(), m.end());
                let context: String = sentence.chars().take(TITLE_CONTEXT_CHARS).collect();
                let title = format!("Follow up: {context}...");
                if !seen.insert(title.clone()) {
                    continue;
                }
                follow_ups.push(FollowUp::new(
                    title,
                    format!(
                        "Detected in email: {}\n\nContext: {}",
                        message.subject, sentence
                    ),
                    None,
                    self.default_due(),
                    &message.id,
                ));
                if follow_ups.len() >= MAX_PATTERN_FOLLOW_UPS {
                    break 'patterns;
                }
            }
        }
        follow_ups
    }

    fn due_date(&self, raw: Option<&str>) -> DateTime<Utc> {
        raw.and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or_else(|| self.default_due())
    }

    fn default_due(&self) -> DateTime<Utc> {
        Utc::now() + Duration::days(self.default_days)
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Mark open follow-ups satisfied by `message` as completed, on every
    /// capsule related to it by thread or by an extracted property name.
    /// Each completion is written immediately. A message never completes a
    /// follow-up it created itself.
    pub fn detect_completed(&self, message: &Message) -> Result<Vec<FollowUp>, DbError> {
        let mut capsule_ids = self.db.capsules_for_thread(&message.thread_id)?;
        for property in &message.extracted.properties {
            if let Some(name) = non_blank(property.name.as_deref()) {
                for id in self.db.capsules_by_property(name)? {
                    if !capsule_ids.contains(&id) {
                        capsule_ids.push(id);
                    }
                }
            }
        }

        let mut completed = Vec::new();
        for capsule_id in capsule_ids {
            let Some(capsule) = self.db.get_capsule(&capsule_id)? else {
                continue;
            };
            for follow_up in capsule.open_follow_ups() {
                if follow_up.source_message_id == message.id || !is_satisfied_by(follow_up, message)
                {
                    continue;
                }
                let now = Utc::now();
                if self.db.complete_follow_up(&capsule.id, &follow_up.id, now)? {
                    log::info!(
                        "Follow-up '{}' on capsule {} completed by message {}",
                        follow_up.title,
                        capsule.id,
                        message.id
                    );
                    let mut done = follow_up.clone();
                    done.completed = true;
                    done.completed_at = Some(now);
                    completed.push(done);
                }
            }
        }
        Ok(completed)
    }

    /// Open follow-ups at least `days_overdue` days past due (0 = due now).
    pub fn pending(&self, days_overdue: i64) -> Result<Vec<PendingFollowUp>, DbError> {
        let cutoff = Utc::now() - Duration::days(days_overdue.max(0));
        self.db.pending_follow_ups(cutoff)
    }
}

/// At least half of the follow-up's significant words appear in the message,
/// and the message says something is done.
pub fn is_satisfied_by(follow_up: &FollowUp, message: &Message) -> bool {
    let source = format!("{} {}", follow_up.title, follow_up.description).to_lowercase();
    let terms: HashSet<&str> = word_re()
        .find_iter(&source)
        .map(|m| m.as_str())
        .filter(|w| !STOP_WORDS.contains(w))
        .collect();
    if terms.is_empty() {
        return false;
    }

    let text = format!("{} {}", message.subject, message.body_text).to_lowercase();
    let matched = terms.iter().filter(|t| text.contains(**t)).count();
    if (matched as f64) / (terms.len() as f64) < COMPLETION_TERM_RATIO {
        return false;
    }
    COMPLETION_PHRASES.iter().any(|p| text.contains(*p))
}

/// The sentence around a match: from just after the previous period to the
/// next one (or the end of the text), trimmed.
fn enclosing_sentence(text: &str, start: usize, end: usize) -> &str {
    let from = text[..start].rfind('.').map(|i| i + 1).unwrap_or(0);
    let to = text[end..].find('.').map(|i| end + i).unwrap_or(text.len());
    text[from..to].trim()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::entity::{ActionItem, PropertyEntity};
    use crate::intelligence::ServiceError;
    use crate::retry::RetryPolicy;
    use crate::testing::{message, ScriptedService};
    use crate::types::{CapsuleType, NewCapsule};

    fn engine<'a>(db: &'a CapsuleDb, service: &'a ScriptedService) -> FollowUpEngine<'a> {
        FollowUpEngine::new(db, Semantic::new(service, RetryPolicy::immediate(1)), 7)
    }

    fn follow_up(title: &str, description: &str) -> FollowUp {
        FollowUp::new(title, description, None, Utc::now(), "source")
    }

    #[test]
    fn test_brochure_completion() {
        let f = follow_up("Send property brochure", "");
        let done = message("m", "t", "", "Attached is the property brochure you requested.");
        let unrelated = message("m", "t", "", "Thanks for the update.");
        assert!(is_satisfied_by(&f, &done));
        assert!(!is_satisfied_by(&f, &unrelated));
    }

    #[test]
    fn test_completion_needs_a_phrase() {
        let f = follow_up("Send property brochure", "");
        let m = message("m", "t", "", "Where is the property brochure?");
        assert!(!is_satisfied_by(&f, &m));
    }

    #[test]
    fn test_action_items_come_first() {
        let db = test_db();
        let service = ScriptedService::new().complete_always("[]");
        let mut m = message("m1", "t1", "Lease Offer", "");
        m.extracted.action_items = vec![
            ActionItem {
                action: Some("Sign the LOI".into()),
                responsible: Some("Sam".into()),
                deadline: Some("2025-04-01".into()),
            },
            ActionItem {
                action: None,
                responsible: None,
                deadline: Some("next week".into()),
            },
        ];

        let follow_ups = engine(&db, &service).detect(&m);
        assert_eq!(follow_ups.len(), 2);
        assert_eq!(follow_ups[0].title, "Sign the LOI");
        assert_eq!(follow_ups[0].responsible.as_deref(), Some("Sam"));
        assert_eq!(follow_ups[0].due_date.to_rfc3339(), "2025-04-01T00:00:00+00:00");
        assert_eq!(follow_ups[0].description, "Action item from email: Lease Offer");
        assert_eq!(follow_ups[1].title, "Follow up on: Lease Offer");
        assert!(follow_ups[1].due_date > Utc::now() + Duration::days(6));
        assert_eq!(service.complete_calls(), 0);
    }

    #[test]
    fn test_semantic_follow_ups() {
        let db = test_db();
        let service = ScriptedService::new().complete_ok(
            "```json\n[{\"title\": \"Send rent roll\", \"responsible\": \"\", \"due_date\": \"\"}]\n```",
        );
        let follow_ups = engine(&db, &service).detect(&message("m1", "t1", "Rent roll", "Need it."));
        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].title, "Send rent roll");
        assert!(follow_ups[0].responsible.is_none());
        assert_eq!(follow_ups[0].source_message_id, "m1");
    }

    #[test]
    fn test_empty_semantic_answer_falls_back_to_phrases() {
        let db = test_db();
        let service = ScriptedService::new().complete_ok("[]");
        let m = message("m1", "t1", "Hi", "Please send the rent roll by Friday.");
        let follow_ups = engine(&db, &service).detect(&m);
        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].title, "Follow up: Please send the rent roll by Friday...");
        assert_eq!(service.complete_calls(), 1);

        let quiet = message("m2", "t1", "Hi", "Thanks for the tour.");
        let service = ScriptedService::new().complete_ok("[]");
        assert!(engine(&db, &service).detect(&quiet).is_empty());
    }

    #[test]
    fn test_malformed_or_failed_semantic_falls_back_to_phrases() {
        let db = test_db();
        let body = "Thanks for the tour. Please send the rent roll by Friday. Also let me know about parking";
        let m = message("m1", "t1", "Tour", body);

        let service = ScriptedService::new().complete_ok("I found some tasks!");
        let follow_ups = engine(&db, &service).detect(&m);
        let titles: Vec<&str> = follow_ups.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Follow up: Please send the rent roll by Friday...",
                "Follow up: Also let me know about parking...",
            ]
        );
        assert_eq!(
            follow_ups[0].description,
            "Detected in email: Tour\n\nContext: Please send the rent roll by Friday"
        );

        let service = ScriptedService::new().complete_err(ServiceError::Malformed("x".into()));
        assert_eq!(engine(&db, &service).detect(&m).len(), 2);
    }

    #[test]
    fn test_phrase_follow_ups_are_capped() {
        let db = test_db();
        let service = ScriptedService::new();
        let body = "Follow up on A. Action item B. Task C. Deadline D. Due date E.";
        let follow_ups = engine(&db, &service).detect(&message("m1", "t1", "List", body));
        assert_eq!(follow_ups.len(), 3);
        assert_eq!(follow_ups[2].title, "Follow up: Task C...");
    }

    #[test]
    fn test_detect_completed_persists() {
        let db = test_db();
        let service = ScriptedService::new();
        let capsule = db
            .create_capsule(&NewCapsule {
                title: "Brochure".into(),
                capsule_type: CapsuleType::Task,
                priority: 3,
                entities: Default::default(),
                summary: String::new(),
                follow_ups: vec![follow_up("Send property brochure", "")],
            })
            .unwrap();
        let first = message("m1", "t1", "Brochure?", "Can you send it?");
        db.insert_message(&first).unwrap();
        db.link_message(&capsule.id, "m1").unwrap();

        let reply = message("m2", "t1", "Re: Brochure?", "Attached is the property brochure.");
        db.insert_message(&reply).unwrap();

        let completed = engine(&db, &service).detect_completed(&reply).unwrap();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].completed_at.is_some());

        let stored = db.get_capsule(&capsule.id).unwrap().unwrap();
        assert!(stored.follow_ups[0].completed);
        assert!(engine(&db, &service).detect_completed(&reply).unwrap().is_empty());
    }

    #[test]
    fn test_detect_completed_by_property_name() {
        let db = test_db();
        let service = ScriptedService::new();
        let capsule = db
            .create_capsule(&NewCapsule {
                title: "Downtown Tower".into(),
                capsule_type: CapsuleType::Property,
                priority: 2,
                entities: crate::entity::CapsuleEntities {
                    properties: vec![PropertyEntity::with_name("Downtown Tower")],
                    ..Default::default()
                },
                summary: String::new(),
                follow_ups: vec![follow_up("Review lease draft", "")],
            })
            .unwrap();

        let mut m = message("m9", "t9", "Lease draft", "I have reviewed the lease draft, done.");
        m.extracted
            .properties
            .push(PropertyEntity::with_name("downtown tower"));
        let completed = engine(&db, &service).detect_completed(&m).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].title, "Review lease draft");
        let stored = db.get_capsule(&capsule.id).unwrap().unwrap();
        assert_eq!(stored.open_follow_ups().count(), 0);
    }

    #[test]
    fn test_enclosing_sentence_bounds() {
        let text = "First. Please review the memo. Last";
        let start = text.find("Please").unwrap();
        assert_eq!(enclosing_sentence(text, start, start + 13), "Please review the memo");
        assert_eq!(enclosing_sentence("no periods here", 3, 6), "no periods here");
    }
}

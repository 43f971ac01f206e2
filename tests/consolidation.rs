//! End to end over the public API with no network: an offline semantic
//! service (so every step uses its local fallback) and an in-memory mailbox.

use chrono::Utc;

use inbox_capsules::capsules::{CapsuleEngine, EngineSettings};
use inbox_capsules::db::CapsuleDb;
use inbox_capsules::entity::EntityBag;
use inbox_capsules::intelligence::{Semantic, SemanticService, ServiceError};
use inbox_capsules::mail::{MailError, MailSource, MessageRef, RawBody, RawMessage, RawThread};
use inbox_capsules::pipeline::EmailPipeline;
use inbox_capsules::retry::RetryPolicy;
use inbox_capsules::types::{CapsuleType, Categorization, Message, Participant};

struct Offline;

impl SemanticService for Offline {
    fn extract_entities(&self, _body: &str, _subject: &str) -> Result<EntityBag, ServiceError> {
        Err(ServiceError::NotConfigured("offline".into()))
    }

    fn summarize(&self, _body: &str, _subject: &str) -> Result<String, ServiceError> {
        Err(ServiceError::NotConfigured("offline".into()))
    }

    fn categorize(&self, _body: &str, _subject: &str) -> Result<Categorization, ServiceError> {
        Err(ServiceError::NotConfigured("offline".into()))
    }

    fn complete(&self, _prompt: &str) -> Result<String, ServiceError> {
        Err(ServiceError::NotConfigured("offline".into()))
    }
}

struct Inbox(Vec<RawMessage>);

impl MailSource for Inbox {
    fn is_authenticated(&self) -> bool {
        true
    }

    fn list_unread(&self, max: usize) -> Result<Vec<MessageRef>, MailError> {
        Ok(self
            .0
            .iter()
            .take(max)
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect())
    }

    fn fetch_with_body(&self, id: &str) -> Result<RawMessage, MailError> {
        self.0
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| MailError::NotFound(id.to_string()))
    }

    fn fetch_thread(&self, id: &str) -> Result<RawThread, MailError> {
        Ok(RawThread {
            id: id.to_string(),
            messages: self.0.iter().filter(|m| m.thread_id == id).cloned().collect(),
        })
    }
}

fn raw(id: &str, thread_id: &str, from: &str, to: &str, subject: &str, body: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        subject: subject.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        date: Some("Tue, 4 Mar 2025 09:30:00 -0500".to_string()),
        body: RawBody {
            plain: body.to_string(),
            html: String::new(),
        },
        snippet: String::new(),
        labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
    }
}

fn stored(id: &str, thread_id: &str, subject: &str) -> Message {
    Message {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        subject: subject.to_string(),
        sender: Participant::new("", "reports@finance.example"),
        received_at: Utc::now(),
        ..Default::default()
    }
}

#[test]
fn test_inbox_to_capsules_and_completed_follow_up() {
    let dir = tempfile::tempdir().unwrap();
    let db = CapsuleDb::open_at(dir.path().join("capsules.db")).unwrap();
    let service = Offline;
    let engine = CapsuleEngine::new(
        &db,
        Semantic::new(&service, RetryPolicy::immediate(1)),
        EngineSettings::default(),
    );

    let broker = "Jane Roe <jane@broker.com>";
    let me = "Sam Lee <sam@example.com>";
    let inbox = Inbox(vec![
        raw(
            "m1",
            "t1",
            broker,
            me,
            "Lease offer for 123 Main Street",
            "Our offer for 123 Main Street is attached. Please send the signed lease by Friday.",
        ),
        raw(
            "m2",
            "t1",
            me,
            broker,
            "Re: Lease offer for 123 Main Street",
            "Attached is the signed lease. Sorry it took until Friday to send.",
        ),
        raw(
            "m3",
            "t3",
            "Pat Kim <pat@cafe.example>",
            "Lee Wong <lee@cafe.example>",
            "Lunch?",
            "Are you free?",
        ),
    ]);
    let pipeline = EmailPipeline::new(&inbox, engine);

    // Ingest and place.
    let report = pipeline.process_once(10);
    assert!(report.success);
    assert_eq!(report.email_ids, vec!["m1", "m2", "m3"]);
    assert_eq!(report.capsule_ids.len(), 1);

    let capsule = db.get_capsule(&report.capsule_ids[0]).unwrap().unwrap();
    assert_eq!(capsule.capsule_type, CapsuleType::Property);
    assert!(capsule.title.starts_with("123 Main Street - "));
    assert!(capsule.contains_message("m1"));
    assert!(capsule.contains_message("m2"));
    assert_eq!(capsule.messages.len(), 2);

    // The reply satisfied the request made in the first message.
    assert_eq!(capsule.follow_ups.len(), 1);
    let follow_up = &capsule.follow_ups[0];
    assert!(follow_up.title.starts_with("Follow up: Please send the signed lease"));
    assert!(follow_up.completed);
    assert_eq!(follow_up.source_message_id, "m1");

    let engine = pipeline.engine();
    assert!(!engine.mark_follow_up_completed(&capsule.id, &follow_up.id).unwrap());
    assert!(engine.get_pending_follow_ups(0).unwrap().is_empty());

    // Placing a message twice keeps one membership.
    assert_eq!(engine.process_message("m2").unwrap(), Some(capsule.id.clone()));
    assert_eq!(db.get_capsule(&capsule.id).unwrap().unwrap().messages.len(), 2);

    // The lunch note shares nothing with the lease thread.
    assert!(!db.is_message_linked("m3").unwrap());

    // Sweep: two forwarded reports with the same subject cluster together.
    db.insert_message(&stored("r1", "t7", "Monthly budget")).unwrap();
    db.insert_message(&stored("r2", "t8", "FW: Monthly budget")).unwrap();
    let created = engine.process_clusters(7, 2).unwrap();
    assert_eq!(created.len(), 1);
    let budget = db.get_capsule(&created[0]).unwrap().unwrap();
    assert_eq!(budget.capsule_type, CapsuleType::General);
    assert_eq!(budget.messages.len(), 2);
    assert!(budget.summary.starts_with("Summary generation failed."));
    assert!(!db.is_message_linked("m3").unwrap());

    // Already-cased messages are not swept again.
    assert!(engine.process_clusters(7, 2).unwrap().is_empty());
}

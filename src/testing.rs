//! In-crate fakes for the two collaborators: a scripted semantic service and
//! an in-memory mailbox.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::entity::EntityBag;
use crate::intelligence::{SemanticService, ServiceError};
use crate::mail::{MailError, MailSource, MessageRef, RawBody, RawMessage, RawThread};
use crate::types::{CapsuleType, Categorization, Message, Participant};

// =============================================================================
// Semantic service
// =============================================================================

/// Answers from a script. Queued `complete` answers are used once each, in
/// order; the other scripted answers repeat. Anything not scripted fails with
/// a non-retryable `NotConfigured`, or a retryable `EmptyResponse` when built
/// with `failing()`.
#[derive(Default)]
pub struct ScriptedService {
    fail_all: bool,
    entities: Option<EntityBag>,
    summary: Option<String>,
    category: Option<Categorization>,
    completions: RefCell<VecDeque<Result<String, ServiceError>>>,
    default_completion: Option<String>,
    prompts: RefCell<Vec<String>>,
    complete_calls: Cell<usize>,
    extract_calls: Cell<usize>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn entities(mut self, bag: EntityBag) -> Self {
        self.entities = Some(bag);
        self
    }

    pub fn summary(mut self, text: &str) -> Self {
        self.summary = Some(text.to_string());
        self
    }

    pub fn category(mut self, category: CapsuleType, priority: u8) -> Self {
        self.category = Some(Categorization {
            category,
            priority,
            explanation: format!("Scripted {category}"),
        });
        self
    }

    pub fn complete_ok(self, text: &str) -> Self {
        self.completions.borrow_mut().push_back(Ok(text.to_string()));
        self
    }

    pub fn complete_err(self, err: ServiceError) -> Self {
        self.completions.borrow_mut().push_back(Err(err));
        self
    }

    /// Answer used once the `complete` queue is empty.
    pub fn complete_always(mut self, text: &str) -> Self {
        self.default_completion = Some(text.to_string());
        self
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.get()
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.get()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    fn unscripted<T>(&self) -> Result<T, ServiceError> {
        if self.fail_all {
            Err(ServiceError::EmptyResponse)
        } else {
            Err(ServiceError::NotConfigured("unscripted call".into()))
        }
    }
}

impl SemanticService for ScriptedService {
    fn extract_entities(&self, _body: &str, _subject: &str) -> Result<EntityBag, ServiceError> {
        self.extract_calls.set(self.extract_calls.get() + 1);
        match &self.entities {
            Some(bag) => Ok(bag.clone()),
            None => self.unscripted(),
        }
    }

    fn summarize(&self, _body: &str, _subject: &str) -> Result<String, ServiceError> {
        match &self.summary {
            Some(text) => Ok(text.clone()),
            None => self.unscripted(),
        }
    }

    fn categorize(&self, _body: &str, _subject: &str) -> Result<Categorization, ServiceError> {
        match &self.category {
            Some(c) => Ok(c.clone()),
            None => self.unscripted(),
        }
    }

    fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        self.complete_calls.set(self.complete_calls.get() + 1);
        self.prompts.borrow_mut().push(prompt.to_string());
        if let Some(next) = self.completions.borrow_mut().pop_front() {
            return next;
        }
        match &self.default_completion {
            Some(text) => Ok(text.clone()),
            None => self.unscripted(),
        }
    }
}

// =============================================================================
// Mailbox
// =============================================================================

/// Unread messages in listing order, plus any extra thread-only messages.
pub struct FakeMail {
    authenticated: bool,
    unread: Vec<RawMessage>,
    thread_only: Vec<RawMessage>,
    broken: HashSet<String>,
    fetches: RefCell<HashMap<String, usize>>,
}

impl FakeMail {
    pub fn new(unread: Vec<RawMessage>) -> Self {
        Self {
            authenticated: true,
            unread,
            thread_only: Vec::new(),
            broken: HashSet::new(),
            fetches: RefCell::new(HashMap::new()),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            authenticated: false,
            ..Self::new(Vec::new())
        }
    }

    /// Messages only reachable through `fetch_thread`.
    pub fn with_thread_messages(mut self, messages: Vec<RawMessage>) -> Self {
        self.thread_only = messages;
        self
    }

    /// Fetching this id fails with a transport error.
    pub fn broken(mut self, id: &str) -> Self {
        self.broken.insert(id.to_string());
        self
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        self.fetches.borrow().get(id).copied().unwrap_or(0)
    }

    fn all(&self) -> impl Iterator<Item = &RawMessage> {
        self.unread.iter().chain(self.thread_only.iter())
    }
}

impl MailSource for FakeMail {
    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn list_unread(&self, max: usize) -> Result<Vec<MessageRef>, MailError> {
        if !self.authenticated {
            return Err(MailError::NotAuthenticated);
        }
        Ok(self
            .unread
            .iter()
            .take(max)
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect())
    }

    fn fetch_with_body(&self, id: &str) -> Result<RawMessage, MailError> {
        *self.fetches.borrow_mut().entry(id.to_string()).or_default() += 1;
        if self.broken.contains(id) {
            return Err(MailError::Transport(format!("connection reset fetching {id}")));
        }
        self.all()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| MailError::NotFound(id.to_string()))
    }

    fn fetch_thread(&self, id: &str) -> Result<RawThread, MailError> {
        let messages: Vec<RawMessage> = self.all().filter(|m| m.thread_id == id).cloned().collect();
        if messages.is_empty() {
            return Err(MailError::NotFound(id.to_string()));
        }
        Ok(RawThread {
            id: id.to_string(),
            messages,
        })
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn raw_message(id: &str, thread_id: &str, subject: &str, body: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        subject: subject.to_string(),
        from: "Jane Roe <jane@broker.com>".to_string(),
        to: "Sam Lee <sam@example.com>".to_string(),
        date: Some("Mon, 3 Mar 2025 10:00:00 +0000".to_string()),
        body: RawBody {
            plain: body.to_string(),
            html: String::new(),
        },
        snippet: String::new(),
        labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
    }
}

/// A stored-shape message received now, with no analysis attached.
pub fn message(id: &str, thread_id: &str, subject: &str, body: &str) -> Message {
    Message {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        subject: subject.to_string(),
        sender: Participant::new("Jane Roe", "jane@broker.com"),
        recipients: vec![Participant::new("Sam Lee", "sam@example.com")],
        body_text: body.to_string(),
        received_at: Utc::now(),
        ..Default::default()
    }
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("fixture timestamp should parse")
        .with_timezone(&Utc)
}

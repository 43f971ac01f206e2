//! The natural-language service: entity extraction, summaries,
//! categorisation and free-form completions.
//!
//! Every call can fail. `Semantic` wraps a service with the retry policy and
//! turns exhausted calls into `None`, so each caller picks its own fallback
//! explicitly instead of handling transport errors.

pub mod client;
pub mod heuristics;
pub mod prompts;

use thiserror::Error;

use crate::entity::EntityBag;
use crate::retry::{with_retry, RetryPolicy};
use crate::types::Categorization;

pub use client::OpenAiService;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Semantic service not configured: {0}")]
    NotConfigured(String),
    #[error("Empty response from semantic service")]
    EmptyResponse,
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// Transport failures, timeouts, rate limits and server errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ServiceError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            ServiceError::EmptyResponse => true,
            ServiceError::NotConfigured(_) | ServiceError::Malformed(_) => false,
        }
    }
}

pub trait SemanticService {
    /// All list fields of the returned bag are present, possibly empty.
    fn extract_entities(&self, body: &str, subject: &str) -> Result<EntityBag, ServiceError>;

    fn summarize(&self, body: &str, subject: &str) -> Result<String, ServiceError>;

    fn categorize(&self, body: &str, subject: &str) -> Result<Categorization, ServiceError>;

    fn complete(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// A semantic service behind the retry policy.
#[derive(Clone)]
pub struct Semantic<'a> {
    service: &'a dyn SemanticService,
    policy: RetryPolicy,
}

impl<'a> Semantic<'a> {
    pub fn new(service: &'a dyn SemanticService, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    pub fn extract_entities(&self, body: &str, subject: &str) -> Option<EntityBag> {
        self.call("extract_entities", || self.service.extract_entities(body, subject))
    }

    /// `None` also when the service answers with blank text.
    pub fn summarize(&self, body: &str, subject: &str) -> Option<String> {
        self.call("summarize", || self.service.summarize(body, subject))
            .filter(|s| !s.trim().is_empty())
    }

    pub fn categorize(&self, body: &str, subject: &str) -> Option<Categorization> {
        self.call("categorize", || self.service.categorize(body, subject))
    }

    pub fn complete(&self, prompt: &str) -> Option<String> {
        self.call("complete", || self.service.complete(prompt))
    }

    fn call<T>(&self, label: &str, op: impl FnMut() -> Result<T, ServiceError>) -> Option<T> {
        match with_retry(label, &self.policy, ServiceError::is_retryable, op) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("semantic {} failed, using fallback: {}", label, e);
                None
            }
        }
    }
}

/// Parse the first JSON array embedded in free text (models like to wrap
/// arrays in prose or code fences). `None` when nothing parses.
pub fn parse_json_array<T: serde::de::DeserializeOwned>(output: &str) -> Option<Vec<T>> {
    let start = output.find('[')?;
    let end = output.rfind(']')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Vec<T>>(&output[start..=end]) {
        Ok(items) => Some(items),
        Err(e) => {
            log::debug!("Failed to parse JSON array from model output: {}", e);
            None
        }
    }
}

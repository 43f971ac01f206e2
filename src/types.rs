use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{CapsuleEntities, EntityBag};

/// Configuration stored in ~/.capsules/config.json
///
/// Every field has a default, so `{}` (or no file at all) is a working config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// SQLite file. Defaults to ~/.capsules/capsules.db.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_max_emails")]
    pub max_emails: usize,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Lookback window for the batch cluster sweep.
    #[serde(default = "default_cluster_days")]
    pub cluster_days: i64,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    #[serde(default = "default_related_max_results")]
    pub related_max_results: usize,
    #[serde(default = "default_related_lookback_days")]
    pub related_lookback_days: i64,
    #[serde(default = "default_semantic_batch_size")]
    pub semantic_batch_size: usize,
    /// Run the pairwise semantic pass in the batch sweep (one service call per pair).
    #[serde(default)]
    pub semantic_clustering: bool,
    #[serde(default = "default_follow_up_days")]
    pub follow_up_default_days: i64,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            max_emails: default_max_emails(),
            interval_seconds: default_interval_seconds(),
            cluster_days: default_cluster_days(),
            min_cluster_size: default_min_cluster_size(),
            related_max_results: default_related_max_results(),
            related_lookback_days: default_related_lookback_days(),
            semantic_batch_size: default_semantic_batch_size(),
            semantic_clustering: false,
            follow_up_default_days: default_follow_up_days(),
            openai: OpenAiConfig::default(),
            google: GoogleConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_max_emails() -> usize {
    10
}

fn default_interval_seconds() -> u64 {
    300
}

fn default_cluster_days() -> i64 {
    7
}

fn default_min_cluster_size() -> usize {
    2
}

fn default_related_max_results() -> usize {
    5
}

fn default_related_lookback_days() -> i64 {
    30
}

fn default_semantic_batch_size() -> usize {
    10
}

fn default_follow_up_days() -> i64 {
    7
}

// =============================================================================
// Collaborator configuration
// =============================================================================

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model for structured work: extraction, categorisation, follow-ups.
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,
    /// Model for free text: summaries, similarity judgments.
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            extraction_model: default_extraction_model(),
            completion_model: default_completion_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_extraction_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleConfig {
    /// OAuth token JSON. Defaults to ~/.capsules/google/token.json.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_path: Option<PathBuf>,
}

/// Backoff around every semantic-service call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    2000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub email: String,
}

impl Participant {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// A stored inbound message. Only the analysis fields (`extracted`, `summary`,
/// `category`, `priority`, `category_explanation`) change after insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub sender: Participant,
    #[serde(default)]
    pub recipients: Vec<Participant>,
    #[serde(default)]
    pub body_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub extracted: EntityBag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CapsuleType>,
    /// 1 = highest .. 5 = lowest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_explanation: Option<String>,
}

impl Message {
    pub fn has_property(&self) -> bool {
        !self.extracted.properties.is_empty()
    }
}

/// Result of categorising a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorization {
    pub category: CapsuleType,
    pub priority: u8,
    pub explanation: String,
}

impl Default for Categorization {
    fn default() -> Self {
        Self {
            category: CapsuleType::General,
            priority: 3,
            explanation: "Default categorization".to_string(),
        }
    }
}

// =============================================================================
// Capsules
// =============================================================================

/// The kind of ongoing topic a capsule tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapsuleType {
    Property,
    Deal,
    Task,
    Meeting,
    General,
}

impl CapsuleType {
    pub const ALL: [CapsuleType; 5] = [
        CapsuleType::Property,
        CapsuleType::Deal,
        CapsuleType::Task,
        CapsuleType::Meeting,
        CapsuleType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapsuleType::Property => "Property",
            CapsuleType::Deal => "Deal",
            CapsuleType::Task => "Task",
            CapsuleType::Meeting => "Meeting",
            CapsuleType::General => "General",
        }
    }

    /// Case-insensitive parse; `None` for anything unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for CapsuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const STATUS_ACTIVE: &str = "Active";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleMessage {
    pub message_id: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capsule {
    pub id: String,
    pub title: String,
    pub capsule_type: CapsuleType,
    pub status: String,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<CapsuleMessage>,
    pub entities: CapsuleEntities,
    pub summary: String,
    pub follow_ups: Vec<FollowUp>,
    #[serde(default)]
    pub user_notes: String,
}

impl Capsule {
    pub fn contains_message(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.message_id == message_id)
    }

    pub fn open_follow_ups(&self) -> impl Iterator<Item = &FollowUp> {
        self.follow_ups.iter().filter(|f| !f.completed)
    }
}

/// Everything needed to create a capsule; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCapsule {
    pub title: String,
    pub capsule_type: CapsuleType,
    pub priority: u8,
    pub entities: CapsuleEntities,
    pub summary: String,
    pub follow_ups: Vec<FollowUp>,
}

/// A tracked commitment. `id` is assigned at creation and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUp {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
    pub due_date: DateTime<Utc>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub source_message_id: String,
}

impl FollowUp {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        responsible: Option<String>,
        due_date: DateTime<Utc>,
        source_message_id: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            responsible,
            due_date,
            completed: false,
            created_at: Utc::now(),
            completed_at: None,
            source_message_id: source_message_id.to_string(),
        }
    }
}

/// An open follow-up that is due, with the capsule it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFollowUp {
    pub capsule_id: String,
    pub capsule_title: String,
    #[serde(flatten)]
    pub follow_up: FollowUp,
}

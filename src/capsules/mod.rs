//! Capsule consolidation engine.
//!
//! Orchestrates, per message: thread capsule → classifier → related-message
//! cluster → unlinked. The batch sweep (`process_clusters`) runs separately
//! over recent messages no capsule links to yet.

pub mod builder;
pub mod classifier;
pub mod summary;

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;

use crate::clustering;
use crate::db::{CapsuleDb, DbError};
use crate::error::PipelineError;
use crate::intelligence::Semantic;
use crate::mail::MailSource;
use crate::processor::EmailProcessor;
use crate::types::{Config, Message, PendingFollowUp};
use builder::CapsuleBuilder;

/// Knobs the engine reads from `Config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub related_max_results: usize,
    pub related_lookback_days: i64,
    pub semantic_batch_size: usize,
    pub semantic_clustering: bool,
    pub follow_up_default_days: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            related_max_results: config.related_max_results,
            related_lookback_days: config.related_lookback_days,
            semantic_batch_size: config.semantic_batch_size,
            semantic_clustering: config.semantic_clustering,
            follow_up_default_days: config.follow_up_default_days,
        }
    }
}

/// Messages stored by one ingestion pass and the capsules they landed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub email_ids: Vec<String>,
    pub capsule_ids: Vec<String>,
}

pub struct CapsuleEngine<'a> {
    db: &'a CapsuleDb,
    semantic: Semantic<'a>,
    settings: EngineSettings,
    builder: CapsuleBuilder<'a>,
}

impl<'a> CapsuleEngine<'a> {
    pub fn new(db: &'a CapsuleDb, semantic: Semantic<'a>, settings: EngineSettings) -> Self {
        let builder = CapsuleBuilder::new(db, semantic.clone(), settings.follow_up_default_days);
        Self {
            db,
            semantic,
            settings,
            builder,
        }
    }

    pub fn builder(&self) -> &CapsuleBuilder<'a> {
        &self.builder
    }

    // =========================================================================
    // Per-message reconciliation
    // =========================================================================

    /// Place one stored message. Returns the capsule it ended up in, or
    /// `None` when it stays unlinked.
    pub fn process_message(&self, message_id: &str) -> Result<Option<String>, DbError> {
        let Some(message) = self.db.get_message(message_id)? else {
            log::warn!("Message {} not found; nothing to process", message_id);
            return Ok(None);
        };

        if let Some(capsule_id) = self.db.capsules_for_thread(&message.thread_id)?.first() {
            return self.add_to_capsule(capsule_id, &message).map(Some);
        }

        let (create, capsule_type) = classifier::should_create_capsule(self.db, &message)?;
        if create {
            let capsule = self.builder.create_from_message(&message, capsule_type)?;
            return Ok(Some(capsule.id));
        }

        let related = clustering::related_messages(
            self.db,
            &message,
            self.settings.related_max_results,
            self.settings.related_lookback_days,
        )?;
        if !related.is_empty() {
            let mut members: Vec<&Message> = vec![&message];
            members.extend(related.iter());
            let capsule_type = classifier::determine_cluster_type(&members);
            if let Some(capsule) = self.builder.create_from_cluster(&members, capsule_type)? {
                return Ok(Some(capsule.id));
            }
        }

        log::debug!("Message {} left unlinked", message.id);
        Ok(None)
    }

    /// Thread path: link, refresh the summary, append new follow-ups, then
    /// check whether the message completes anything.
    fn add_to_capsule(&self, capsule_id: &str, message: &Message) -> Result<String, DbError> {
        let capsule = self
            .db
            .get_capsule(capsule_id)?
            .ok_or_else(|| DbError::NotFound(format!("capsule {capsule_id}")))?;
        if capsule.contains_message(&message.id) {
            log::debug!("Message {} already in capsule {}", message.id, capsule_id);
            return Ok(capsule.id);
        }

        self.builder.link_capsule(&capsule.id, &message.id)?;

        let follow_ups = self.builder.follow_ups().detect(message);
        self.db.append_follow_ups(&capsule.id, &follow_ups)?;

        // Reload so the summary sees the new member and follow-ups.
        if let Some(updated) = self.db.get_capsule(&capsule.id)? {
            let summary = self.builder.summary().generate(&updated)?;
            self.db.update_capsule_summary(&updated.id, &summary)?;
        }

        let completed = self.builder.follow_ups().detect_completed(message)?;
        log::info!(
            "Added message {} to capsule {} ({} new follow-ups, {} completed)",
            message.id,
            capsule.id,
            follow_ups.len(),
            completed.len()
        );
        Ok(capsule.id)
    }

    /// Ingest up to `max` unread messages and place each one.
    pub fn process_new(
        &self,
        mail: &dyn MailSource,
        max: usize,
    ) -> Result<ProcessOutcome, PipelineError> {
        let processor = EmailProcessor::new(self.db, self.semantic.clone());
        let email_ids = processor.process_new_messages(mail, max)?;
        let capsule_ids = self.place_messages(&email_ids);
        Ok(ProcessOutcome {
            email_ids,
            capsule_ids,
        })
    }

    /// Place each stored message in turn. A failure is logged for that
    /// message and the rest of the batch continues. Returns the distinct
    /// capsule ids the messages landed in.
    pub fn place_messages(&self, message_ids: &[String]) -> Vec<String> {
        let mut capsule_ids: Vec<String> = Vec::new();
        for id in message_ids {
            match self.process_message(id) {
                Ok(Some(capsule_id)) => {
                    if !capsule_ids.contains(&capsule_id) {
                        capsule_ids.push(capsule_id);
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("Failed to place message {}: {}", id, e),
            }
        }
        capsule_ids
    }

    // =========================================================================
    // Batch sweep
    // =========================================================================

    /// Cluster recent unlinked messages into new capsules: thread clusters,
    /// then entity-overlap clusters, then subject clusters, then (when
    /// enabled) semantic clusters. Members already cased earlier in this sweep
    /// are dropped from later clusters, and what remains must still reach
    /// `min_cluster_size`. Returns the new capsule ids.
    pub fn process_clusters(&self, days: i64, min_cluster_size: usize) -> Result<Vec<String>, DbError> {
        let messages = self.db.unlinked_recent_messages(days)?;
        log::info!("Clustering {} unlinked messages from the last {} days", messages.len(), days);

        let mut passes: Vec<(&str, Vec<Vec<&Message>>)> = vec![
            (
                "thread",
                clustering::cluster_by_thread(&messages)
                    .into_iter()
                    .map(|(_, group)| group)
                    .collect(),
            ),
            ("entity", clustering::cluster_by_entity_overlap(&messages, 1)),
            ("subject", clustering::cluster_by_subject(&messages, 0.8)),
        ];
        if self.settings.semantic_clustering {
            passes.push((
                "semantic",
                clustering::cluster_by_semantic_similarity(
                    &messages,
                    self.settings.semantic_batch_size,
                    &self.semantic,
                ),
            ));
        }

        let mut cased: HashSet<&str> = HashSet::new();
        let mut created = Vec::new();
        for (pass, clusters) in passes {
            for cluster in clusters {
                let cluster: Vec<&Message> = cluster
                    .into_iter()
                    .filter(|m| !cased.contains(m.id.as_str()))
                    .collect();
                if cluster.len() < min_cluster_size.max(1) {
                    continue;
                }
                let capsule_type = classifier::determine_cluster_type(&cluster);
                match self.builder.create_from_cluster(&cluster, capsule_type) {
                    Ok(Some(capsule)) => {
                        log::debug!("{} cluster of {} → capsule {}", pass, cluster.len(), capsule.id);
                        cased.extend(cluster.iter().copied().map(|m| m.id.as_str()));
                        created.push(capsule.id);
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("Failed to build {} cluster capsule: {}", pass, e),
                }
            }
        }

        log::info!("Cluster sweep created {} capsules", created.len());
        Ok(created)
    }

    // =========================================================================
    // Follow-ups
    // =========================================================================

    pub fn get_pending_follow_ups(&self, days_overdue: i64) -> Result<Vec<PendingFollowUp>, DbError> {
        self.builder.follow_ups().pending(days_overdue)
    }

    /// Returns false when the follow-up does not exist or was already completed.
    pub fn mark_follow_up_completed(&self, capsule_id: &str, follow_up_id: &str) -> Result<bool, DbError> {
        self.db.complete_follow_up(capsule_id, follow_up_id, Utc::now())
    }
}

//! Grouping messages into candidate capsules.
//!
//! All groupings are greedy and order-dependent: a message joins the first
//! seed it is compared against that qualifies, and is never re-evaluated
//! against a better-fitting seed later on. Clusters are ephemeral; they only
//! drive capsule creation.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::db::{CapsuleDb, DbError};
use crate::entity::{entity_keys, overlap};
use crate::intelligence::prompts::similarity_prompt;
use crate::intelligence::Semantic;
use crate::types::Message;

/// Messages grouped by thread id. Groups appear in order of first
/// appearance; members keep input order.
pub fn cluster_by_thread(messages: &[Message]) -> Vec<(&str, Vec<&Message>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&Message>)> = Vec::new();
    for message in messages {
        let slot = *index.entry(message.thread_id.as_str()).or_insert_with(|| {
            groups.push((message.thread_id.as_str(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(message);
    }
    groups
}

fn reply_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:re|fwd|fw)(?:\s*:|\s)\s*").expect("reply prefix regex should compile")
    })
}

/// Strip one leading `Re:` / `Fwd:` / `FW:` marker, then trim and lower-case.
/// The marker must be followed by a colon or whitespace, so "Recap" stays intact.
pub fn normalize_subject(subject: &str) -> String {
    reply_prefix_re()
        .replace(subject, "")
        .trim()
        .to_lowercase()
}

/// Group by exact normalized subject, groups in order of first appearance.
///
/// `_similarity_threshold` is reserved: subjects are compared exactly and no
/// fuzzy matching happens yet.
pub fn cluster_by_subject(messages: &[Message], _similarity_threshold: f64) -> Vec<Vec<&Message>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<&Message>> = Vec::new();
    for message in messages {
        let key = normalize_subject(&message.subject);
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(message);
    }
    groups
}

/// Greedy seed-and-scan over entity key sets. Only clusters of two or more
/// messages are returned.
pub fn cluster_by_entity_overlap(messages: &[Message], min_overlap: usize) -> Vec<Vec<&Message>> {
    let keys: Vec<_> = messages.iter().map(|m| entity_keys(&m.extracted)).collect();
    greedy_clusters(messages, |i, j| overlap(&keys[i], &keys[j]) >= min_overlap)
}

/// Greedy pairwise grouping within fixed-size batches, using a yes/no
/// judgement from the semantic service. Pairs in different batches are never
/// compared. A failed call counts as "not related".
pub fn cluster_by_semantic_similarity<'m>(
    messages: &'m [Message],
    batch_size: usize,
    semantic: &Semantic<'_>,
) -> Vec<Vec<&'m Message>> {
    let mut clusters = Vec::new();
    for batch in messages.chunks(batch_size.max(1)) {
        clusters.extend(greedy_clusters(batch, |i, j| {
            semantic
                .complete(&similarity_prompt(&batch[i], &batch[j]))
                .is_some_and(|answer| answer.to_lowercase().contains("yes"))
        }));
    }
    clusters
}

fn greedy_clusters<'m>(
    messages: &'m [Message],
    mut related: impl FnMut(usize, usize) -> bool,
) -> Vec<Vec<&'m Message>> {
    let mut processed = vec![false; messages.len()];
    let mut clusters = Vec::new();

    for i in 0..messages.len() {
        if processed[i] {
            continue;
        }
        processed[i] = true;
        let mut cluster = vec![&messages[i]];
        for j in (i + 1)..messages.len() {
            if !processed[j] && related(i, j) {
                processed[j] = true;
                cluster.push(&messages[j]);
            }
        }
        if cluster.len() > 1 {
            clusters.push(cluster);
        }
    }
    clusters
}

/// Up to `max_results` messages related to `target`: thread mates first,
/// then messages from the last `lookback_days` days sharing at least one
/// entity key, in scan order.
pub fn related_messages(
    db: &CapsuleDb,
    target: &Message,
    max_results: usize,
    lookback_days: i64,
) -> Result<Vec<Message>, DbError> {
    let mut related: Vec<Message> = db
        .messages_by_thread(&target.thread_id)?
        .into_iter()
        .filter(|m| m.id != target.id)
        .take(max_results)
        .collect();

    if related.len() < max_results {
        let target_keys = entity_keys(&target.extracted);
        if !target_keys.is_empty() {
            for candidate in db.recent_messages(lookback_days)? {
                if related.len() >= max_results {
                    break;
                }
                if candidate.id == target.id || related.iter().any(|r| r.id == candidate.id) {
                    continue;
                }
                if overlap(&target_keys, &entity_keys(&candidate.extracted)) >= 1 {
                    related.push(candidate);
                }
            }
        }
    }

    Ok(related)
}

//! Prompt construction for every semantic-service call.
//!
//! Bodies are truncated by characters (never mid code point) before they go
//! into a prompt: 500 for thread digests and similarity checks, 1000 for
//! follow-up extraction.

use crate::entity::CapsuleEntities;
use crate::types::{CapsuleType, FollowUp, Message};

/// Messages included in a capsule summary prompt.
pub const SUMMARY_MESSAGE_LIMIT: usize = 5;
pub const DIGEST_BODY_CHARS: usize = 500;
pub const FOLLOW_UP_BODY_CHARS: usize = 1000;

pub const ENTITY_SYSTEM_PROMPT: &str = "\
You extract structured information from commercial real estate (CRE) emails.

Return one JSON object with exactly these lowercase keys, each an array (empty when nothing is found):
- \"properties\": [{\"name\", \"address\", \"value\", \"type\", \"confidence\"}] real estate properties mentioned
- \"people\": [{\"name\", \"email\", \"role\", \"company\", \"confidence\"}] individuals mentioned
- \"companies\": [{\"name\", \"type\", \"confidence\"}] organisations, named exactly as written (\"ABC Properties\", not \"ABC Properties Inc.\")
- \"dates\": [{\"date\", \"description\", \"confidence\"}] important dates and what they refer to
- \"financial_details\": [{\"amount\", \"currency\", \"description\", \"confidence\"}] prices, rents and other monetary terms
- \"action_items\": [{\"action\", \"responsible\", \"deadline\"}] tasks or requests, deadline as YYYY-MM-DD when known
- \"keywords\": [\"term\"] important CRE terms

Confidence is a number from 0.0 to 1.0.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "\
You summarize commercial real estate (CRE) emails. Capture the main purpose, the key points, \
any action items or next steps, and important details about properties, deals or meetings. \
Keep the summary under 100 words.";

pub const CATEGORIZE_SYSTEM_PROMPT: &str = "\
You categorize commercial real estate (CRE) emails.

Choose one primary category:
- Property: specific properties (listings, updates)
- Deal: transactions, offers, negotiations
- Meeting: scheduling or recapping meetings
- Task: emails requiring specific actions or follow-ups
- General: anything else

Choose a priority from 1 (highest) to 5 (lowest) considering urgency, deadlines and financial impact.

Return JSON with lowercase keys: {\"category\": \"<one of the categories above, capitalized>\", \
\"priority\": <1-5>, \"explanation\": \"<one sentence>\"}";

pub const COMPLETION_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// User turn shared by extraction, summary and categorisation.
pub fn message_prompt(subject: &str, body: &str) -> String {
    format!("Subject: {subject}\n\nBody:\n{body}")
}

pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// =============================================================================
// Capsule summaries
// =============================================================================

fn thread_digest(messages: &[&Message]) -> String {
    messages
        .iter()
        .take(SUMMARY_MESSAGE_LIMIT)
        .enumerate()
        .map(|(i, m)| {
            let date = m
                .sent_at
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            let name = if m.sender.name.is_empty() {
                "Unknown"
            } else {
                m.sender.name.as_str()
            };
            format!(
                "Email {} - From: {} ({})\nSubject: {}\nDate: {}\n\n{}...",
                i + 1,
                name,
                m.sender.email,
                m.subject,
                date,
                truncate_chars(&m.body_text, DIGEST_BODY_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn follow_up_block(follow_ups: &[FollowUp]) -> String {
    if follow_ups.is_empty() {
        return String::new();
    }
    let mut block = String::from("Current follow-up items:\n");
    for (i, follow_up) in follow_ups.iter().enumerate() {
        let status = if follow_up.completed { "COMPLETED" } else { "PENDING" };
        block.push_str(&format!("{}. {} - {}\n", i + 1, follow_up.title, status));
        if !follow_up.description.is_empty() {
            block.push_str(&format!("   Description: {}\n", follow_up.description));
        }
        block.push_str(&format!("   Due: {}\n", follow_up.due_date.format("%Y-%m-%d")));
    }
    block
}

/// Per-type prompt over the (already `sent_at`-sorted) messages of a capsule.
pub fn capsule_summary_prompt(
    capsule_type: CapsuleType,
    entities: &CapsuleEntities,
    follow_ups: &[FollowUp],
    messages: &[&Message],
) -> String {
    let digest = thread_digest(messages);
    let property_line = entities
        .properties
        .first()
        .map(|p| format!("Property: {}\n", p.label()))
        .unwrap_or_default();

    let (topic, context, asks) = match capsule_type {
        CapsuleType::Property => (
            "about a real estate property",
            property_line,
            "1. Key property details (address, size, price if mentioned)\n\
             2. Current status of discussions\n\
             3. Any pending actions or decisions\n\
             4. Timeline of key events",
        ),
        CapsuleType::Deal => (
            "about a real estate deal",
            property_line,
            "1. Deal type (purchase, sale, lease, etc.)\n\
             2. Key financial terms mentioned\n\
             3. Current status of the deal\n\
             4. Next steps and pending actions\n\
             5. Key stakeholders involved",
        ),
        CapsuleType::Task => (
            "about tasks or action items",
            follow_up_block(follow_ups),
            "1. Main task or action item\n\
             2. Who is responsible\n\
             3. Current status\n\
             4. Due dates or deadlines\n\
             5. Any dependencies or blockers",
        ),
        CapsuleType::Meeting => (
            "about a meeting",
            String::new(),
            "1. Meeting purpose and topic\n\
             2. Date, time, and location/format (if mentioned)\n\
             3. Attendees (if mentioned)\n\
             4. Key discussion points\n\
             5. Action items or decisions",
        ),
        CapsuleType::General => (
            "",
            String::new(),
            "1. Main topic or purpose of the conversation\n\
             2. Key points discussed\n\
             3. Any decisions made\n\
             4. Any pending actions or next steps",
        ),
    };

    let heading = if topic.is_empty() {
        "Create a concise summary of this email thread.".to_string()
    } else {
        format!("Create a concise summary of this email thread {topic}.")
    };

    format!(
        "{heading}\n\n{context}\nEmail Thread:\n{digest}\n\nPlease include:\n{asks}\n\n\
         Format the summary in clear paragraphs with bullet points for actions."
    )
}

// =============================================================================
// Similarity and follow-ups
// =============================================================================

/// Yes/no question asked for each candidate pair in semantic clustering.
pub fn similarity_prompt(a: &Message, b: &Message) -> String {
    format!(
        "Determine if these two emails are semantically related and should be grouped together.\n\n\
         Email 1:\nSubject: {}\nBody: {}...\n\n\
         Email 2:\nSubject: {}\nBody: {}...\n\n\
         Are these emails related to the same topic, property, deal, or task?\n\
         Answer with just 'yes' or 'no'.",
        a.subject,
        truncate_chars(&a.body_text, DIGEST_BODY_CHARS),
        b.subject,
        truncate_chars(&b.body_text, DIGEST_BODY_CHARS),
    )
}

pub fn follow_up_prompt(message: &Message) -> String {
    let name = if message.sender.name.is_empty() {
        "Unknown"
    } else {
        message.sender.name.as_str()
    };
    format!(
        "Analyze this email and identify any follow-up tasks, action items, or requests.\n\n\
         Subject: {}\nFrom: {} ({})\n\nEmail Body:\n{}...\n\n\
         Extract any follow-up tasks with these details:\n\
         1. Task description\n2. Who is responsible (if mentioned)\n3. Due date or deadline (if mentioned)\n\n\
         Format your response as a JSON array of objects with these fields:\n\
         [{{\"title\": \"Task description\", \"responsible\": \"Person responsible\", \"due_date\": \"YYYY-MM-DD\" or \"\"}}]\n\n\
         If no follow-up tasks are found, return an empty array: []",
        message.subject,
        name,
        message.sender.email,
        truncate_chars(&message.body_text, FOLLOW_UP_BODY_CHARS),
    )
}

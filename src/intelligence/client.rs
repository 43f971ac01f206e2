//! OpenAI-compatible chat completions client (blocking).

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::prompts::{
    message_prompt, CATEGORIZE_SYSTEM_PROMPT, COMPLETION_SYSTEM_PROMPT, ENTITY_SYSTEM_PROMPT,
    SUMMARY_SYSTEM_PROMPT,
};
use super::{SemanticService, ServiceError};
use crate::entity::EntityBag;
use crate::types::{CapsuleType, Categorization, OpenAiConfig};

pub struct OpenAiService {
    http: reqwest::blocking::Client,
    api_key: Option<String>,
    base_url: String,
    extraction_model: String,
    completion_model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

struct ChatRequest<'a> {
    model: &'a str,
    system: &'a str,
    user: &'a str,
    json_mode: bool,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiService {
    pub fn new(config: &OpenAiConfig) -> Result<Self, ServiceError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        if config.api_key.is_none() {
            log::warn!("No OpenAI API key configured; semantic calls will fall back to heuristics");
        }
        Ok(Self {
            http,
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            extraction_model: config.extraction_model.clone(),
            completion_model: config.completion_model.clone(),
        })
    }

    fn chat(&self, request: ChatRequest<'_>) -> Result<String, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::NotConfigured("OPENAI_API_KEY not set".into()))?;

        let mut body = json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user}
            ],
            "temperature": request.temperature
        });
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response.json()?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(ServiceError::EmptyResponse)
    }
}

impl SemanticService for OpenAiService {
    fn extract_entities(&self, body: &str, subject: &str) -> Result<EntityBag, ServiceError> {
        let content = self.chat(ChatRequest {
            model: &self.extraction_model,
            system: ENTITY_SYSTEM_PROMPT,
            user: &message_prompt(subject, body),
            json_mode: true,
            temperature: 0.2,
            max_tokens: None,
        })?;
        parse_entity_bag(&content)
    }

    fn summarize(&self, body: &str, subject: &str) -> Result<String, ServiceError> {
        self.chat(ChatRequest {
            model: &self.completion_model,
            system: SUMMARY_SYSTEM_PROMPT,
            user: &message_prompt(subject, body),
            json_mode: false,
            temperature: 0.3,
            max_tokens: None,
        })
    }

    fn categorize(&self, body: &str, subject: &str) -> Result<Categorization, ServiceError> {
        let content = self.chat(ChatRequest {
            model: &self.extraction_model,
            system: CATEGORIZE_SYSTEM_PROMPT,
            user: &message_prompt(subject, body),
            json_mode: true,
            temperature: 0.2,
            max_tokens: None,
        })?;
        parse_categorization(&content)
    }

    fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        self.chat(ChatRequest {
            model: &self.completion_model,
            system: COMPLETION_SYSTEM_PROMPT,
            user: prompt,
            json_mode: false,
            temperature: 0.3,
            max_tokens: Some(600),
        })
    }
}

// =============================================================================
// Response codec
// =============================================================================

/// Lower-case every object key, recursively.
fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_lowercase(), lowercase_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

pub(crate) fn parse_entity_bag(content: &str) -> Result<EntityBag, ServiceError> {
    let raw: Value =
        serde_json::from_str(content).map_err(|e| ServiceError::Malformed(e.to_string()))?;
    let mut normalized = lowercase_keys(raw);

    // `company_name` is accepted as `name`, but both at once would be a
    // duplicate field for serde; the explicit `name` wins.
    if let Some(companies) = normalized.get_mut("companies").and_then(Value::as_array_mut) {
        for company in companies.iter_mut().filter_map(Value::as_object_mut) {
            if company.contains_key("name") {
                company.remove("company_name");
            }
        }
    }

    serde_json::from_value(normalized).map_err(|e| ServiceError::Malformed(e.to_string()))
}

pub(crate) fn parse_categorization(content: &str) -> Result<Categorization, ServiceError> {
    let raw: Value =
        serde_json::from_str(content).map_err(|e| ServiceError::Malformed(e.to_string()))?;
    let normalized = lowercase_keys(raw);
    let defaults = Categorization::default();

    let category = normalized
        .get("category")
        .and_then(Value::as_str)
        .and_then(CapsuleType::parse)
        .unwrap_or(defaults.category);
    let priority = match normalized.get("priority") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .map(|p| p.round().clamp(1.0, 5.0) as u8)
    .unwrap_or(defaults.priority);
    let explanation = normalized
        .get("explanation")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(defaults.explanation);

    Ok(Categorization {
        category,
        priority,
        explanation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_bag_keys_are_normalized() {
        let content = r#"{
            "Properties": [{"Address": "123 Main St"}],
            "Companies": [{"company_name": "ABC Properties", "name": "ABC Properties LLC"}],
            "Keywords": ["lease"]
        }"#;
        let bag = parse_entity_bag(content).unwrap();
        assert_eq!(bag.properties[0].address.as_deref(), Some("123 Main St"));
        assert_eq!(bag.companies[0].name.as_deref(), Some("ABC Properties LLC"));
        assert!(bag.people.is_empty());
        assert!(bag.action_items.is_empty());
    }

    #[test]
    fn test_entity_bag_rejects_non_json() {
        assert!(matches!(
            parse_entity_bag("sorry, I can't"),
            Err(ServiceError::Malformed(_))
        ));
    }

    #[test]
    fn test_categorization_defaults_and_mapping() {
        let c = parse_categorization(r#"{"Category": "deal", "Priority": 2, "Explanation": "Offer"}"#)
            .unwrap();
        assert_eq!(c.category, CapsuleType::Deal);
        assert_eq!(c.priority, 2);
        assert_eq!(c.explanation, "Offer");

        let c = parse_categorization(r#"{"category": "Spam", "priority": "9"}"#).unwrap();
        assert_eq!(c.category, CapsuleType::General);
        assert_eq!(c.priority, 5);
        assert_eq!(c.explanation, "Default categorization");

        let c = parse_categorization("{}").unwrap();
        assert_eq!(c, Categorization::default());
    }

    #[test]
    fn test_missing_api_key_is_not_configured() {
        let service = OpenAiService::new(&OpenAiConfig::default()).unwrap();
        assert!(matches!(
            service.complete("hello"),
            Err(ServiceError::NotConfigured(_))
        ));
    }
}

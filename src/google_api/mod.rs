//! Google API client (blocking).
//!
//! Token format is compatible with the `token.json` written by Google's
//! Python OAuth library, so an existing token can be dropped in place. The
//! consent flow itself is not implemented here: without a usable token the
//! client simply reports itself unauthenticated.
//!
//! Modules:
//! - gmail: Gmail API v1, exposed as a `MailSource`

pub mod gmail;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mail::MailError;
use crate::retry::RetryPolicy;

pub use gmail::GmailClient;

// ============================================================================
// Token types
// ============================================================================

/// OAuth2 token payload persisted at the configured token path.
///
/// Both `token` and `access_token` are accepted on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    #[serde(alias = "access_token")]
    pub token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// ISO 8601
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default, alias = "email")]
    pub account: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Token not found at {0}")]
    TokenNotFound(PathBuf),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<GoogleApiError> for MailError {
    fn from(err: GoogleApiError) -> Self {
        match err {
            GoogleApiError::AuthExpired | GoogleApiError::TokenNotFound(_) => {
                MailError::NotAuthenticated
            }
            GoogleApiError::ApiError { status: 404, message } => MailError::NotFound(message),
            other => MailError::Transport(other.to_string()),
        }
    }
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    NonRetryable,
}

fn retry_decision_for_status(status: reqwest::StatusCode) -> RetryDecision {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs.min(30));
        }
    }
    policy.delay(attempt)
}

pub fn send_with_retry(
    request: reqwest::blocking::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::blocking::Response, GoogleApiError> {
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().map_err(GoogleApiError::Http);
        };

        match cloned.send() {
            Ok(response) => {
                let status = response.status();
                let decision = retry_decision_for_status(status);
                if decision == RetryDecision::Retryable && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "google_api retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    std::thread::sleep(delay);
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "google_api retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    std::thread::sleep(delay);
                    continue;
                }
                return Err(GoogleApiError::Http(err));
            }
        }
    }

    Err(GoogleApiError::RefreshFailed(
        "request exhausted retries".to_string(),
    ))
}

// ============================================================================
// Token I/O and refresh
// ============================================================================

pub fn load_token(path: &Path) -> Result<GoogleToken, GoogleApiError> {
    if !path.exists() {
        return Err(GoogleApiError::TokenNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_token(path: &Path, token: &GoogleToken) -> Result<(), GoogleApiError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(token)?)?;
    Ok(())
}

/// Expired, unparseable, or within 60 seconds of expiry.
pub fn is_token_expired(token: &GoogleToken) -> bool {
    match &token.expiry {
        None => true,
        Some(expiry_str) => match chrono::DateTime::parse_from_rfc3339(expiry_str) {
            Ok(expiry) => expiry <= chrono::Utc::now() + chrono::Duration::seconds(60),
            Err(_) => true,
        },
    }
}

/// Exchange the refresh token for a new access token and persist the result.
pub fn refresh_access_token(
    client: &reqwest::blocking::Client,
    token: &GoogleToken,
    path: &Path,
) -> Result<GoogleToken, GoogleApiError> {
    let refresh_token = token
        .refresh_token
        .as_ref()
        .ok_or(GoogleApiError::AuthExpired)?;

    let mut form = vec![
        ("client_id", token.client_id.as_str()),
        ("refresh_token", refresh_token.as_str()),
        ("grant_type", "refresh_token"),
    ];
    if let Some(secret) = token.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let resp = client.post(&token.token_uri).form(&form).send()?;
    let status = resp.status();
    let body_text = resp.text().unwrap_or_default();
    if !status.is_success() {
        return Err(map_refresh_error(status.as_u16(), &body_text));
    }

    let body: serde_json::Value = serde_json::from_str(&body_text)?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| GoogleApiError::RefreshFailed("No access_token in response".into()))?;
    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    let expiry = chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64);

    let mut new_token = token.clone();
    new_token.token = access_token.to_string();
    new_token.expiry = Some(expiry.to_rfc3339());

    save_token(path, &new_token)?;
    log::info!("Refreshed Google access token");
    Ok(new_token)
}

fn map_refresh_error(status: u16, body: &str) -> GoogleApiError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return GoogleApiError::AuthExpired;
    }
    GoogleApiError::RefreshFailed(format!("HTTP {}: {}", status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_expiry(expiry: Option<&str>) -> GoogleToken {
        GoogleToken {
            token: "ya29.test".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: default_token_uri(),
            client_id: "client".to_string(),
            client_secret: None,
            scopes: vec![],
            expiry: expiry.map(str::to_string),
            account: None,
        }
    }

    #[test]
    fn test_token_access_token_alias() {
        let json = r#"{
            "access_token": "ya29.alias-token",
            "refresh_token": "1//refresh",
            "client_id": "client"
        }"#;
        let token: GoogleToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.token, "ya29.alias-token");
        assert_eq!(token.token_uri, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn test_token_expiry() {
        assert!(is_token_expired(&token_with_expiry(None)));
        assert!(is_token_expired(&token_with_expiry(Some("garbage"))));
        assert!(is_token_expired(&token_with_expiry(Some("2020-01-01T00:00:00Z"))));
        let future = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        assert!(!is_token_expired(&token_with_expiry(Some(&future))));
    }

    #[test]
    fn test_retry_decision_for_status() {
        assert_eq!(
            retry_decision_for_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            RetryDecision::Retryable
        );
        assert_eq!(
            retry_decision_for_status(reqwest::StatusCode::BAD_GATEWAY),
            RetryDecision::Retryable
        );
        assert_eq!(
            retry_decision_for_status(reqwest::StatusCode::NOT_FOUND),
            RetryDecision::NonRetryable
        );
    }

    #[test]
    fn test_retry_after_header_wins() {
        let value = reqwest::header::HeaderValue::from_static("4");
        let delay = retry_delay(1, &RetryPolicy::http(), Some(&value));
        assert_eq!(delay, Duration::from_secs(4));
    }

    #[test]
    fn test_map_refresh_error() {
        assert!(matches!(
            map_refresh_error(400, r#"{"error":"invalid_grant"}"#),
            GoogleApiError::AuthExpired
        ));
        assert!(matches!(
            map_refresh_error(500, "oops"),
            GoogleApiError::RefreshFailed(_)
        ));
    }

    #[test]
    fn test_load_and_save_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("google").join("token.json");
        assert!(matches!(load_token(&path), Err(GoogleApiError::TokenNotFound(_))));

        save_token(&path, &token_with_expiry(None)).unwrap();
        assert_eq!(load_token(&path).unwrap().client_id, "client");
    }

    #[test]
    fn test_auth_errors_map_to_not_authenticated() {
        let mail: MailError = GoogleApiError::AuthExpired.into();
        assert!(matches!(mail, MailError::NotAuthenticated));
        let mail: MailError = GoogleApiError::ApiError {
            status: 404,
            message: "gone".into(),
        }
        .into();
        assert!(matches!(mail, MailError::NotFound(_)));
    }
}

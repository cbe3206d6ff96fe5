pub mod replicate;
pub mod yookassa;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::AppError;

const ERROR_BODY_LOG_LIMIT: usize = 2000;

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated = value.chars().take(limit).collect::<String>();
    format!("{truncated}...")
}

/// Pulls a human readable message out of a provider error body.
pub fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("detail"))
            .or_else(|| value.get("description"))
            .or_else(|| value.get("message"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        return (message, truncate_for_log(&value.to_string(), ERROR_BODY_LOG_LIMIT));
    }

    (None, truncate_for_log(trimmed, ERROR_BODY_LOG_LIMIT))
}

/// Sends a request and decodes a JSON body, classifying failures.
///
/// 4xx answers become `UpstreamRejected` carrying the raw body; 5xx answers
/// and transport errors become `UpstreamUnavailable`.
pub async fn send_json(provider: &'static str, request: RequestBuilder) -> Result<Value, AppError> {
    let response = request.send().await.map_err(|err| {
        warn!(
            "{} request failed to send: {} (timeout={}, connect={})",
            provider,
            err,
            err.is_timeout(),
            err.is_connect()
        );
        AppError::UpstreamUnavailable {
            provider,
            detail: err.to_string(),
        }
    })?;
    read_json(provider, response).await
}

async fn read_json(provider: &'static str, response: Response) -> Result<Value, AppError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| AppError::UpstreamUnavailable {
            provider,
            detail: format!("failed to read response body: {err}"),
        })?;

    if !status.is_success() {
        let (_, body_summary) = summarize_error_body(&body);
        warn!("{} API error: status={}, body={}", provider, status, body_summary);
        if status.is_client_error() {
            return Err(AppError::UpstreamRejected {
                provider,
                status: status.as_u16(),
                body,
            });
        }
        return Err(AppError::UpstreamUnavailable {
            provider,
            detail: format!("status {status}: {body}"),
        });
    }

    serde_json::from_str::<Value>(&body).map_err(|err| AppError::UpstreamUnavailable {
        provider,
        detail: format!("invalid JSON ({err}): {}", truncate_for_log(&body, 500)),
    })
}

pub fn decode<T: DeserializeOwned>(provider: &'static str, value: Value) -> Result<T, AppError> {
    serde_json::from_value(value).map_err(|err| AppError::UpstreamUnavailable {
        provider,
        detail: format!("unexpected response shape: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarizes_nested_and_flat_error_messages() {
        let (message, _) = summarize_error_body(r#"{"error":{"message":"bad input"}}"#);
        assert_eq!(message.as_deref(), Some("bad input"));

        let (message, _) = summarize_error_body(r#"{"detail":"Invalid version"}"#);
        assert_eq!(message.as_deref(), Some("Invalid version"));

        let (message, summary) = summarize_error_body("  ");
        assert!(message.is_none());
        assert_eq!(summary, "empty response body");

        let (message, summary) = summarize_error_body("<html>gateway</html>");
        assert!(message.is_none());
        assert_eq!(summary, "<html>gateway</html>");
    }
}

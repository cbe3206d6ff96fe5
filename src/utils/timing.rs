use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

/// Times one conversation action (command or button) from receipt to reply.
#[derive(Debug)]
pub struct ActionTimer {
    action: String,
    chat_id: Option<i64>,
    user_id: i64,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl ActionTimer {
    pub fn new(action: &str, user_id: i64, chat_id: Option<i64>) -> Self {
        ActionTimer {
            action: action.to_string(),
            chat_id,
            user_id,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn log_received(&self) {
        info!(
            target: "bot.timing",
            "event=action_received action={} chat_id={:?} user_id={} received_at={}",
            self.action,
            self.chat_id,
            self.user_id,
            self.started_at.to_rfc3339()
        );
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: "bot.timing",
            "event=action_completed action={} chat_id={:?} user_id={} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.action,
            self.chat_id,
            self.user_id,
            self.started_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

impl Drop for ActionTimer {
    fn drop(&mut self) {
        self.log_completed();
    }
}

pub fn start_action_timer(action: &str, user_id: i64, chat_id: Option<i64>) -> ActionTimer {
    let timer = ActionTimer::new(action, user_id, chat_id);
    timer.log_received();
    timer
}

pub async fn log_upstream_timing<T, E, F, Fut>(
    provider: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "bot.timing",
        "event=upstream_request provider={} operation={} started_at={} metadata={}",
        provider,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "bot.timing",
        "event=upstream_response provider={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        operation,
        Utc::now().to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}

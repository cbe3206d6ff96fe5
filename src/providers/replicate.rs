use reqwest::Client;
use serde_json::{json, Value};

use crate::config::require;
use crate::db::models::JobStatus;
use crate::error::AppError;
use crate::providers::send_json;
use crate::utils::timing::log_upstream_timing;

pub const PROVIDER: &str = "replicate";

/// Where a prediction is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRef {
    /// A pinned version hash, posted to `/v1/predictions`.
    Version(String),
    /// An official model, posted to `/v1/models/{owner}/{name}/predictions`.
    Model { owner: String, name: String },
}

impl ModelRef {
    /// Accepts `owner/name:version`, `owner/name` or a bare version hash.
    pub fn parse(reference: &str) -> Result<Self, AppError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(AppError::Validation("empty model reference".to_string()));
        }
        if let Some((_, version)) = reference.rsplit_once(':') {
            let version = version.trim();
            if version.is_empty() {
                return Err(AppError::Validation(format!(
                    "model reference '{reference}' has an empty version"
                )));
            }
            return Ok(ModelRef::Version(version.to_string()));
        }
        match reference.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(ModelRef::Model {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            Some(_) => Err(AppError::Validation(format!(
                "malformed model reference '{reference}'"
            ))),
            None => Ok(ModelRef::Version(reference.to_string())),
        }
    }

    /// Timing-log fields naming the model a prediction ran against.
    pub fn log_metadata(&self) -> Value {
        match self {
            ModelRef::Version(version) => json!({ "version": version }),
            ModelRef::Model { owner, name } => json!({ "model": format!("{owner}/{name}") }),
        }
    }
}

/// A trainer pinned as `owner/name:version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerVersion {
    pub owner: String,
    pub name: String,
    pub version: String,
}

impl TrainerVersion {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        let invalid = || {
            AppError::Configuration(format!(
                "REPLICATE_TRAINER_VERSION '{value}' must look like owner/name:version"
            ))
        };
        let (model, version) = value.trim().split_once(':').ok_or_else(invalid)?;
        let (owner, name) = model.split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || version.is_empty() {
            return Err(invalid());
        }
        Ok(TrainerVersion {
            owner: owner.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

/// Maps the provider's task vocabulary onto [`JobStatus`].
///
/// Unknown values are an error so new provider states surface immediately.
pub fn map_replicate_status(status: &str) -> Result<JobStatus, AppError> {
    match status.trim().to_ascii_lowercase().as_str() {
        "starting" | "queued" => Ok(JobStatus::Pending),
        "processing" => Ok(JobStatus::Running),
        "succeeded" => Ok(JobStatus::Succeeded),
        "failed" => Ok(JobStatus::Failed),
        "canceled" | "cancelled" => Ok(JobStatus::Canceled),
        other => Err(AppError::UnmappedStatus {
            provider: PROVIDER,
            status: other.to_string(),
        }),
    }
}

pub fn task_status(task: &Value) -> Result<JobStatus, AppError> {
    let status = task
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::UnmappedStatus {
            provider: PROVIDER,
            status: "<missing>".to_string(),
        })?;
    map_replicate_status(status)
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn is_version_pointer(value: &str) -> bool {
    value.contains(':') && !value.contains("://")
}

/// Finds the fine-tuned model reference in a finished training.
///
/// Checked in order: `output.model`, `output.version`, a bare `output`
/// string carrying a version, then `destination`.
pub fn extract_model_reference(training: &Value) -> Option<String> {
    let output = training.get("output");
    if let Some(output) = output.filter(|value| value.is_object()) {
        if let Some(model) = non_empty_str(output.get("model")) {
            return Some(model);
        }
        if let Some(version) = non_empty_str(output.get("version")) {
            return Some(version);
        }
    }
    if let Some(pointer) = non_empty_str(output).filter(|value| is_version_pointer(value)) {
        return Some(pointer);
    }
    non_empty_str(training.get("destination")).filter(|value| value.contains('/'))
}

/// Normalizes prediction output into a list of URLs.
pub fn prediction_outputs(prediction: &Value) -> Vec<String> {
    match prediction.get("output") {
        Some(Value::String(url)) if !url.trim().is_empty() => vec![url.trim().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub fn task_error(task: &Value) -> String {
    match task.get("error") {
        Some(Value::String(message)) if !message.trim().is_empty() => message.clone(),
        Some(Value::Null) | None => "no error message from provider".to_string(),
        Some(other) => other.to_string(),
    }
}

pub fn task_id(task: &Value) -> Result<String, AppError> {
    non_empty_str(task.get("id")).ok_or_else(|| AppError::UpstreamUnavailable {
        provider: PROVIDER,
        detail: format!("response without an id: {task}"),
    })
}

#[derive(Clone)]
pub struct ReplicateClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ReplicateClient {
    pub fn new(http: Client, base_url: &str, token: &str) -> Self {
        ReplicateClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        }
    }

    fn token(&self) -> Result<&str, AppError> {
        require(&self.token, "REPLICATE_API_TOKEN")
    }

    pub async fn create_training(
        &self,
        trainer: &TrainerVersion,
        destination: &str,
        input: Value,
    ) -> Result<Value, AppError> {
        let token = self.token()?;
        let url = format!(
            "{}/v1/models/{}/{}/versions/{}/trainings",
            self.base_url, trainer.owner, trainer.name, trainer.version
        );
        let request = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "destination": destination, "input": input }));
        log_upstream_timing(
            PROVIDER,
            "create_training",
            Some(json!({ "destination": destination })),
            || send_json(PROVIDER, request),
        )
        .await
    }

    pub async fn get_training(&self, training_id: &str) -> Result<Value, AppError> {
        let token = self.token()?;
        let request = self
            .http
            .get(format!("{}/v1/trainings/{}", self.base_url, training_id))
            .bearer_auth(token);
        log_upstream_timing(
            PROVIDER,
            "get_training",
            Some(json!({ "training_id": training_id })),
            || send_json(PROVIDER, request),
        )
        .await
    }

    pub async fn create_prediction(&self, model: &ModelRef, input: Value) -> Result<Value, AppError> {
        let token = self.token()?;
        let (url, body) = match model {
            ModelRef::Version(version) => (
                format!("{}/v1/predictions", self.base_url),
                json!({ "version": version, "input": input }),
            ),
            ModelRef::Model { owner, name } => (
                format!("{}/v1/models/{}/{}/predictions", self.base_url, owner, name),
                json!({ "input": input }),
            ),
        };
        let request = self.http.post(url).bearer_auth(token).json(&body);
        log_upstream_timing(
            PROVIDER,
            "create_prediction",
            Some(model.log_metadata()),
            || send_json(PROVIDER, request),
        )
        .await
    }

    pub async fn get_prediction(&self, prediction_id: &str) -> Result<Value, AppError> {
        let token = self.token()?;
        let request = self
            .http
            .get(format!("{}/v1/predictions/{}", self.base_url, prediction_id))
            .bearer_auth(token);
        log_upstream_timing(
            PROVIDER,
            "get_prediction",
            Some(json!({ "prediction_id": prediction_id })),
            || send_json(PROVIDER, request),
        )
        .await
    }
}

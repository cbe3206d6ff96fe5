use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use teloxide::types::Update;
use tracing::{info, warn};

use crate::api::ApiState;
use crate::db::models::{JobRecord, JobStatus, PaymentStatus};
use crate::error::AppError;
use crate::handlers;
use crate::services::payments::NewPayment;

/// Telegram-facing callers send ids as strings, others as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Flexible {
    Int(i64),
    Text(String),
}

fn flexible_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Flexible::deserialize(deserializer)? {
        Flexible::Int(value) => Ok(value),
        Flexible::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

fn flexible_count<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Flexible>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Flexible::Int(value)) => usize::try_from(value).map(Some).map_err(de::Error::custom),
        Some(Flexible::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Flexible::Text(text)) => text.trim().parse().map(Some).map_err(de::Error::custom),
    }
}

fn parse_user_id(value: &str) -> Result<i64, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid user_id '{}'", value.trim())))
}

#[derive(Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: i64,
    pub model_id: Option<String>,
}

impl From<JobRecord> for JobStatusResponse {
    fn from(job: JobRecord) -> Self {
        JobStatusResponse {
            job_id: job.job_id,
            status: job.status,
            progress: job.progress,
            model_id: job.model_id,
        }
    }
}

pub async fn index() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn healthz(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    let db = &state.app.db;
    db.ping().await?;
    let pending = db.count_jobs_by_status(JobStatus::Pending).await?;
    let running = db.count_jobs_by_status(JobStatus::Running).await?;
    Ok(Json(json!({
        "ok": true,
        "training": { "pending": pending, "running": running },
    })))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Validation(format!("invalid multipart body: {err}"))
}

pub async fn upload_photo(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut user_id = None;
    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("user_id") => {
                let text = field.text().await.map_err(multipart_error)?;
                user_id = Some(parse_user_id(&text)?);
            }
            Some("file") => file = Some(field.bytes().await.map_err(multipart_error)?),
            _ => {}
        }
    }
    let user_id = user_id.ok_or_else(|| AppError::Validation("user_id is required".to_string()))?;
    let file = file.ok_or_else(|| AppError::Validation("file is required".to_string()))?;

    state.app.db.get_user(user_id).await?;
    let (path, count) = state.app.photos.save_photo(user_id, &file).await?;
    Ok(Json(json!({
        "ok": true,
        "path": path.display().to_string(),
        "count": count,
    })))
}

#[derive(Deserialize)]
pub struct TrainForm {
    #[serde(deserialize_with = "flexible_i64")]
    pub user_id: i64,
}

pub async fn train(
    State(state): State<ApiState>,
    Form(form): Form<TrainForm>,
) -> Result<Json<Value>, AppError> {
    state.app.db.get_user(form.user_id).await?;
    let job = state.app.training.train(form.user_id, Some(form.user_id)).await?;
    Ok(Json(json!({ "job_id": job.job_id, "status": job.status })))
}

pub async fn job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let job = state.app.training.refresh(&job_id).await?;
    Ok(Json(job.into()))
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    #[serde(deserialize_with = "flexible_i64")]
    pub user_id: i64,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, deserialize_with = "flexible_count")]
    pub num_images: Option<usize>,
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Accepts the same fields as JSON or as an urlencoded form.
pub async fn generate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let request: GenerateRequest = if content_type.starts_with("application/x-www-form-urlencoded") {
        serde_urlencoded::from_bytes(&body)
            .map_err(|err| AppError::Validation(format!("invalid form body: {err}")))?
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| AppError::Validation(format!("invalid JSON body: {err}")))?
    };

    let prompt = request
        .prompt
        .filter(|prompt| !prompt.trim().is_empty())
        .ok_or_else(|| AppError::Validation("prompt is required".to_string()))?;
    let count = request
        .num_images
        .unwrap_or(state.app.config.images_per_generation)
        .clamp(1, 10);

    let outcome = state
        .app
        .generation
        .generate_for_user(request.user_id, &prompt, count, request.job_id.as_deref())
        .await?;
    Ok(Json(json!({ "images": outcome.images, "balance": outcome.balance })))
}

#[derive(Deserialize)]
pub struct PayRequest {
    #[serde(deserialize_with = "flexible_i64")]
    pub user_id: i64,
    #[serde(deserialize_with = "flexible_i64")]
    pub qty: i64,
    pub amount: f64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub offer: Option<String>,
}

pub async fn pay(
    State(state): State<ApiState>,
    Json(request): Json<PayRequest>,
) -> Result<Json<Value>, AppError> {
    let title = request
        .title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| crate::services::payments::offer_title(request.qty));
    let offer = request.offer.unwrap_or_else(|| "custom".to_string());
    let created = state
        .app
        .payments
        .create_payment(&NewPayment {
            user_id: request.user_id,
            qty: request.qty,
            amount: request.amount,
            title: &title,
            offer: &offer,
        })
        .await?;
    Ok(Json(json!({
        "payment_id": created.payment_id,
        "confirmation_url": created.confirmation_url,
    })))
}

#[derive(Deserialize)]
pub struct PayStatusQuery {
    pub payment_id: String,
}

pub async fn pay_status(
    State(state): State<ApiState>,
    Query(query): Query<PayStatusQuery>,
) -> Result<Json<Value>, AppError> {
    let check = state.app.payments.check_payment(&query.payment_id).await?;
    let credited = check.credit.is_some();
    if let Some(credit) = check.credit {
        let bot = state.bot.clone();
        let app = state.app.clone();
        tokio::spawn(async move {
            handlers::payments::notify_payment_credited(&bot, &app, &credit).await;
        });
    }
    Ok(Json(json!({
        "payment_id": check.payment_id,
        "status": check.status,
        "credited": credited,
        "paid": check.status == PaymentStatus::Succeeded,
    })))
}

pub async fn telegram_webhook(
    State(state): State<ApiState>,
    Path(secret): Path<String>,
    body: Bytes,
) -> Response {
    if secret != state.app.config.webhook_secret {
        warn!("Rejected webhook call with a wrong secret");
        return StatusCode::FORBIDDEN.into_response();
    }
    let update = match serde_json::from_slice::<Update>(&body) {
        Ok(update) => update,
        Err(err) => {
            warn!("Unreadable Telegram update: {err}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    info!("Webhook update {}", update.id.0);
    tokio::spawn(handlers::dispatch_update(state.bot.clone(), state.app.clone(), update));
    Json(json!({ "ok": true })).into_response()
}

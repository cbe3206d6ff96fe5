pub mod error;
pub mod routes;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use teloxide::Bot;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::state::AppState;

const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub app: AppState,
    pub bot: Bot,
}

pub fn router(state: ApiState) -> Router {
    let files = ServeDir::new(state.app.photos.public_dir());
    Router::new()
        .route("/", get(routes::index))
        .route("/healthz", get(routes::healthz))
        .route("/api/upload_photo", post(routes::upload_photo))
        .route("/api/train", post(routes::train))
        .route("/api/status/{job_id}", get(routes::job_status))
        .route("/api/generate", post(routes::generate))
        .route("/api/pay", post(routes::pay))
        .route("/api/pay/status", get(routes::pay_status))
        .route("/webhook/{secret}", post(routes::telegram_webhook))
        .nest_service("/files", files)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::error::AppError;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Configuration(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamRejected { .. }
            | AppError::UpstreamUnavailable { .. }
            | AppError::UnmappedStatus { .. }
            | AppError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = match &self {
            AppError::Internal(err) => {
                error!("internal error: {err:?}");
                "internal server error".to_string()
            }
            other if status.is_server_error() => {
                warn!("request failed with {}: {other}", status.as_u16());
                other.to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_onto_http_statuses() {
        let cases = [
            (AppError::Validation("x".into()), 400),
            (AppError::InsufficientCredits { balance: 2, cost: 3 }, 402),
            (AppError::NotFound("x".into()), 404),
            (AppError::Configuration("x".into()), 500),
            (
                AppError::UpstreamRejected {
                    provider: "replicate",
                    status: 422,
                    body: "{}".into(),
                },
                502,
            ),
            (
                AppError::UpstreamUnavailable {
                    provider: "yookassa",
                    detail: "reset".into(),
                },
                502,
            ),
            (AppError::GenerationFailed("x".into()), 502),
            (AppError::Timeout("x".into()), 504),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_code().as_u16(), expected, "{err}");
        }
    }

    #[test]
    fn rejected_upstream_body_is_part_of_the_detail() {
        let err = AppError::UpstreamRejected {
            provider: "replicate",
            status: 422,
            body: r#"{"detail":"version does not exist"}"#.into(),
        };
        assert!(err.to_string().contains("version does not exist"));
    }
}

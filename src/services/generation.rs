use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::database::Database;
use crate::db::models::JobStatus;
use crate::error::AppError;
use crate::providers::replicate::{
    prediction_outputs, task_error, task_id, task_status, ModelRef, ReplicateClient,
};

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub images: Vec<String>,
    pub balance: i64,
}

fn validate_prompt(prompt: &str) -> Result<(), AppError> {
    if prompt.trim().is_empty() {
        return Err(AppError::Validation("prompt is required".to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct GenerationService {
    config: Arc<Config>,
    db: Database,
    replicate: ReplicateClient,
}

impl GenerationService {
    pub fn new(config: Arc<Config>, db: Database, replicate: ReplicateClient) -> Self {
        GenerationService {
            config,
            db,
            replicate,
        }
    }

    /// Runs one prediction to completion and returns its image URLs.
    ///
    /// Without a fine-tuned model reference the configured base model is used.
    /// A failed or canceled prediction is `GenerationFailed`; running out of
    /// polls is `Timeout`, which callers may retry.
    pub async fn generate(
        &self,
        prompt: &str,
        model_ref: Option<&str>,
        count: usize,
    ) -> Result<Vec<String>, AppError> {
        validate_prompt(prompt)?;
        let reference = model_ref
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.config.replicate_base_model.as_str());
        let model = ModelRef::parse(reference)?;

        let input = json!({ "prompt": prompt, "num_outputs": count.max(1) });
        let mut prediction = self.replicate.create_prediction(&model, input).await?;
        let prediction_id = task_id(&prediction)?;
        let interval = Duration::from_millis(self.config.prediction_poll_interval_ms);

        let max_polls = self.config.prediction_max_polls;
        let mut polls = 0;
        loop {
            match task_status(&prediction)? {
                JobStatus::Succeeded => {
                    let images = prediction_outputs(&prediction);
                    if images.is_empty() {
                        return Err(AppError::GenerationFailed("no output".to_string()));
                    }
                    info!(
                        "Prediction {} finished after {} polls with {} images",
                        prediction_id,
                        polls,
                        images.len()
                    );
                    return Ok(images);
                }
                JobStatus::Failed | JobStatus::Canceled => {
                    let message = task_error(&prediction);
                    warn!("Prediction {} failed: {}", prediction_id, message);
                    return Err(AppError::GenerationFailed(message));
                }
                JobStatus::Pending | JobStatus::Running if polls >= max_polls => {
                    return Err(AppError::Timeout(format!(
                        "prediction {prediction_id} did not finish after {max_polls} polls"
                    )));
                }
                JobStatus::Pending | JobStatus::Running => {
                    tokio::time::sleep(interval).await;
                    prediction = self.replicate.get_prediction(&prediction_id).await?;
                    polls += 1;
                }
            }
        }
    }

    /// Spends the generation cost and generates with the best model the user has.
    ///
    /// Credits are taken before the provider is called and returned if the
    /// generation does not produce images.
    pub async fn generate_for_user(
        &self,
        user_id: i64,
        prompt: &str,
        count: usize,
        job_id: Option<&str>,
    ) -> Result<GenerationOutcome, AppError> {
        validate_prompt(prompt)?;
        let user = self.db.get_user(user_id).await?;

        let mut model_ref = None;
        if let Some(job_id) = job_id.map(str::trim).filter(|value| !value.is_empty()) {
            model_ref = self
                .db
                .get_job(job_id)
                .await?
                .filter(|job| job.user_id == user_id)
                .and_then(|job| job.model_id);
        }
        if model_ref.is_none() && user.has_model {
            model_ref = user.model_id.clone();
        }

        let cost = self.config.generation_cost;
        let Some(balance) = self.db.reserve_credits(user_id, cost).await? else {
            info!(
                "User {} has {} credits, generation costs {}",
                user_id, user.balance, cost
            );
            return Err(AppError::InsufficientCredits {
                balance: user.balance,
                cost,
            });
        };

        match self.generate(prompt, model_ref.as_deref(), count).await {
            Ok(images) => Ok(GenerationOutcome { images, balance }),
            Err(err) => {
                self.db.refund_credits(user_id, cost).await?;
                warn!("Refunded {} credits to user {}: {err}", cost, user_id);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{prompt, Category, Gender};
    use crate::config::test_config;
    use serde_json::Value;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn service(server: &MockServer, overrides: &[(&str, &str)]) -> (GenerationService, Database) {
        let base_url = server.uri();
        let mut vars = vec![
            ("REPLICATE_API_TOKEN", "r8_test"),
            ("REPLICATE_BASE_URL", base_url.as_str()),
            ("PREDICTION_POLL_INTERVAL_MS", "0"),
            ("PREDICTION_MAX_POLLS", "3"),
        ];
        vars.extend_from_slice(overrides);
        let config = Arc::new(test_config(&vars));
        let db = Database::init("sqlite::memory:").await.unwrap();
        let replicate = ReplicateClient::new(
            reqwest::Client::new(),
            &config.replicate_base_url,
            &config.replicate_api_token,
        );
        (GenerationService::new(config, db.clone(), replicate), db)
    }

    async fn with_balance(db: &Database, user_id: i64, balance: i64) {
        let mut user = db.get_user(user_id).await.unwrap();
        user.balance = balance;
        db.save_user(&user).await.unwrap();
    }

    #[tokio::test]
    async fn catalog_prompt_reaches_the_provider_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models/black-forest-labs/flux-schnell/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pr_1",
                "status": "succeeded",
                "output": ["https://cdn.example/1.png", "https://cdn.example/2.png"]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (service, _db) = service(&server, &[]).await;

        let selected = prompt(Gender::Female, Category::Cinematic, 1).unwrap();
        let images = service.generate(selected.text, None, 2).await.unwrap();
        assert_eq!(images.len(), 2);

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["input"]["prompt"].as_str(), Some(selected.text));
        assert_eq!(body["input"]["num_outputs"], 2);
    }

    #[tokio::test]
    async fn fine_tuned_version_is_posted_to_predictions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "pr_2", "status": "starting"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/predictions/pr_2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pr_2",
                "status": "succeeded",
                "output": "https://cdn.example/only.png"
            })))
            .mount(&server)
            .await;
        let (service, _db) = service(&server, &[]).await;

        let images = service
            .generate("portrait", Some("owner/model:abc123"), 1)
            .await
            .unwrap();
        assert_eq!(images, vec!["https://cdn.example/only.png".to_string()]);
        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["version"], "abc123");
    }

    #[tokio::test]
    async fn insufficient_balance_never_reaches_the_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;
        let (service, db) = service(&server, &[]).await;
        with_balance(&db, 5, 2).await;

        let err = service
            .generate_for_user(5, "portrait", 3, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientCredits { balance: 2, cost: 3 }));
        assert_eq!(db.get_user(5).await.unwrap().balance, 2);
    }

    #[tokio::test]
    async fn charged_generation_spends_the_cost() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pr_3",
                "status": "succeeded",
                "output": ["https://cdn.example/a.png"]
            })))
            .mount(&server)
            .await;
        let (service, db) = service(&server, &[]).await;
        with_balance(&db, 6, 10).await;

        let outcome = service
            .generate_for_user(6, "portrait", 3, None)
            .await
            .unwrap();
        assert_eq!(outcome.balance, 7);
        assert_eq!(db.get_user(6).await.unwrap().balance, 7);
    }

    #[tokio::test]
    async fn failed_prediction_refunds_credits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pr_4",
                "status": "failed",
                "error": "NSFW content detected"
            })))
            .mount(&server)
            .await;
        let (service, db) = service(&server, &[]).await;
        with_balance(&db, 7, 3).await;

        let err = service
            .generate_for_user(7, "portrait", 3, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GenerationFailed(message) if message.contains("NSFW")));
        assert_eq!(db.get_user(7).await.unwrap().balance, 3);
    }

    #[tokio::test]
    async fn poll_exhaustion_is_a_timeout_not_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "pr_5", "status": "starting"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/predictions/pr_5"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "pr_5", "status": "processing"})),
            )
            .expect(3)
            .mount(&server)
            .await;
        let (service, _db) = service(&server, &[]).await;

        let err = service.generate("portrait", None, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn result_of_the_last_allowed_poll_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "pr_7", "status": "starting"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/predictions/pr_7"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "pr_7", "status": "processing"})),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/predictions/pr_7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pr_7",
                "status": "succeeded",
                "output": ["https://cdn.example/late.png"]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (service, _db) = service(&server, &[]).await;

        let images = service.generate("portrait", None, 1).await.unwrap();
        assert_eq!(images, vec!["https://cdn.example/late.png".to_string()]);
    }

    #[tokio::test]
    async fn succeeded_without_output_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "pr_6", "status": "succeeded", "output": []})),
            )
            .mount(&server)
            .await;
        let (service, _db) = service(&server, &[]).await;
        let err = service.generate("portrait", None, 1).await.unwrap_err();
        assert!(matches!(err, AppError::GenerationFailed(message) if message == "no output"));
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let server = MockServer::start().await;
        let (service, _db) = service(&server, &[]).await;
        assert!(matches!(
            service.generate("   ", None, 1).await,
            Err(AppError::Validation(_))
        ));
    }
}

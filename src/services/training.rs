use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{require, Config};
use crate::db::database::Database;
use crate::db::models::{JobRecord, JobStatus};
use crate::error::AppError;
use crate::providers::replicate::{
    extract_model_reference, task_error, task_id, task_status, ReplicateClient, TrainerVersion,
};
use crate::storage::PhotoStore;

pub const POLLING_EXHAUSTED: &str = "polling exhausted";
const MAX_BACKOFF_FACTOR: i64 = 6;

fn new_job_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("job_{}", &id[..8])
}

fn backoff_seconds(interval: u64, attempts: i64) -> i64 {
    interval as i64 * attempts.clamp(1, MAX_BACKOFF_FACTOR)
}

/// Starts fine-tunes and keeps their durable job records in step with the provider.
#[derive(Clone)]
pub struct TrainingService {
    config: Arc<Config>,
    db: Database,
    photos: PhotoStore,
    replicate: ReplicateClient,
}

impl TrainingService {
    pub fn new(
        config: Arc<Config>,
        db: Database,
        photos: PhotoStore,
        replicate: ReplicateClient,
    ) -> Self {
        TrainingService {
            config,
            db,
            photos,
            replicate,
        }
    }

    fn destination_for(&self, user_id: i64) -> Result<String, AppError> {
        let template = require(&self.config.replicate_destination, "REPLICATE_DESTINATION")?;
        Ok(template.replace("{user_id}", &user_id.to_string()))
    }

    /// Archives the user's photos and submits a fine-tune for them.
    pub async fn train(&self, user_id: i64, chat_id: Option<i64>) -> Result<JobRecord, AppError> {
        // API callers may never have talked to the bot.
        self.db.get_user(user_id).await?;
        let count = self.photos.count(user_id).await?;
        if count == 0 {
            return Err(AppError::Validation("No photos uploaded".to_string()));
        }
        let minimum = self.config.min_training_photos;
        if count < minimum {
            return Err(AppError::Validation(format!(
                "At least {minimum} photos are required for training, {count} uploaded"
            )));
        }

        require(&self.config.replicate_api_token, "REPLICATE_API_TOKEN")?;
        let trainer = TrainerVersion::parse(&self.config.replicate_trainer_version)?;
        let destination = self.destination_for(user_id)?;
        let archive = self.photos.build_archive(user_id).await?;

        let input = json!({
            "input_images": archive.url,
            "steps": self.config.train_steps,
        });
        let training = self
            .replicate
            .create_training(&trainer, &destination, input)
            .await?;
        let training_id = task_id(&training)?;
        let status = task_status(&training).unwrap_or_else(|err| {
            warn!("Training {} created with {err}, tracking it as pending", training_id);
            JobStatus::Pending
        });

        let now = Utc::now();
        let job = JobRecord {
            job_id: new_job_id(),
            user_id,
            chat_id,
            training_id,
            status,
            progress: status.progress(),
            model_id: None,
            next_poll_at: now.timestamp() + self.config.training_poll_interval_seconds as i64,
            poll_attempts: 0,
            notified: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_job(&job).await?;
        self.db.set_user_job(user_id, &job.job_id).await?;
        info!(
            "Training {} started for user {} as {} with {} photos",
            job.training_id, user_id, job.job_id, archive.photo_count
        );
        Ok(job)
    }

    /// Current state of a job, polling the provider while it is still running.
    pub async fn refresh(&self, job_id: &str) -> Result<JobRecord, AppError> {
        let mut job = self
            .db
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Unknown job {job_id}")))?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        job.poll_attempts += 1;
        let now_ts = Utc::now().timestamp();
        let observed = match self.replicate.get_training(&job.training_id).await {
            Ok(training) => task_status(&training).map(|status| (status, training)),
            Err(err) => Err(err),
        };
        let (status, training) = match observed {
            Ok(observed) => observed,
            Err(err) => {
                warn!(
                    "Polling {} ({}) failed on attempt {}: {err}",
                    job.job_id, job.training_id, job.poll_attempts
                );
                job.last_error = Some(err.to_string());
                job.next_poll_at = now_ts
                    + backoff_seconds(
                        self.config.training_poll_interval_seconds,
                        job.poll_attempts,
                    );
                self.give_up_if_exhausted(&mut job);
                self.db.update_job(&job).await?;
                return Err(err);
            }
        };

        job.observe(status);
        job.last_error = None;
        match status {
            JobStatus::Succeeded => self.complete(&mut job, &training).await?,
            JobStatus::Failed | JobStatus::Canceled => {
                job.last_error = Some(task_error(&training));
                warn!(
                    "Training {} for user {} ended as {}: {}",
                    job.training_id,
                    job.user_id,
                    status,
                    job.last_error.as_deref().unwrap_or_default()
                );
            }
            JobStatus::Pending | JobStatus::Running => {
                job.next_poll_at = now_ts + self.config.training_poll_interval_seconds as i64;
                self.give_up_if_exhausted(&mut job);
            }
        }
        self.db.update_job(&job).await?;
        Ok(job)
    }

    async fn complete(&self, job: &mut JobRecord, training: &Value) -> Result<(), AppError> {
        match extract_model_reference(training) {
            Some(model_id) => {
                self.db
                    .mark_model_ready(job.user_id, &model_id, &job.job_id)
                    .await?;
                info!(
                    "Training {} for user {} produced model {}",
                    job.training_id, job.user_id, model_id
                );
                job.model_id = Some(model_id);
            }
            None => {
                warn!(
                    "Training {} succeeded without a model reference: {}",
                    job.training_id, training
                );
                job.observe(JobStatus::Failed);
                job.last_error = Some("training succeeded without a model reference".to_string());
            }
        }
        Ok(())
    }

    fn give_up_if_exhausted(&self, job: &mut JobRecord) {
        if job.status.is_terminal() || job.poll_attempts < self.config.training_max_polls {
            return;
        }
        warn!(
            "Giving up on {} after {} polls",
            job.job_id, job.poll_attempts
        );
        job.observe(JobStatus::Failed);
        job.last_error = Some(POLLING_EXHAUSTED.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::storage::TINY_PNG;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        service: TrainingService,
        db: Database,
        photos: PhotoStore,
        _dir: tempfile::TempDir,
    }

    async fn fixture(server: &MockServer, overrides: &[(&str, &str)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_string_lossy().to_string();
        let base_url = server.uri();
        let mut vars = vec![
            ("DATA_DIR", data_dir.as_str()),
            ("PUBLIC_BASE_URL", "https://bot.example.com"),
            ("REPLICATE_API_TOKEN", "r8_test"),
            ("REPLICATE_BASE_URL", base_url.as_str()),
            ("REPLICATE_DESTINATION", "photofly/user-{user_id}"),
            ("MIN_TRAINING_PHOTOS", "2"),
        ];
        vars.extend_from_slice(overrides);
        let config = Arc::new(test_config(&vars));
        let db = Database::init("sqlite::memory:").await.unwrap();
        let photos = PhotoStore::new(&config);
        let replicate = ReplicateClient::new(
            reqwest::Client::new(),
            &config.replicate_base_url,
            &config.replicate_api_token,
        );
        let service = TrainingService::new(config, db.clone(), photos.clone(), replicate);
        Fixture {
            service,
            db,
            photos,
            _dir: dir,
        }
    }

    async fn upload(photos: &PhotoStore, user_id: i64, count: usize) {
        for _ in 0..count {
            photos.save_photo(user_id, TINY_PNG).await.unwrap();
        }
    }

    async fn mount_training_poll(server: &MockServer, body: Value) {
        Mock::given(method("GET"))
            .and(path("/v1/trainings/tr_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    async fn started_job(fx: &Fixture, server: &MockServer) -> JobRecord {
        Mock::given(method("POST"))
            .and(path(
                "/v1/models/replicate/fast-flux-trainer/versions/8b10794665aed907bb98a1a5324cd1d3a8bea0e9b31e65210967fb9c9e2e08ed/trainings",
            ))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "tr_1", "status": "starting"})),
            )
            .mount(server)
            .await;
        upload(&fx.photos, 9, 2).await;
        fx.service.train(9, Some(9)).await.unwrap()
    }

    #[tokio::test]
    async fn zero_photos_is_rejected_without_a_provider_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;
        let fx = fixture(&server, &[]).await;

        let err = fx.service.train(1, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(message) if message.contains("No photos")));

        upload(&fx.photos, 1, 1).await;
        let err = fx.service.train(1, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(message) if message.contains("At least 2")));
    }

    #[tokio::test]
    async fn missing_destination_is_a_configuration_error() {
        let server = MockServer::start().await;
        let fx = fixture(&server, &[("REPLICATE_DESTINATION", "")]).await;
        upload(&fx.photos, 1, 2).await;
        let err = fx.service.train(1, None).await.unwrap_err();
        assert!(matches!(err, AppError::Configuration(message) if message.contains("REPLICATE_DESTINATION")));
    }

    #[tokio::test]
    async fn train_submits_archive_and_records_the_job() {
        let server = MockServer::start().await;
        let fx = fixture(&server, &[]).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "destination": "photofly/user-9",
                "input": {"steps": 800}
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "tr_1", "status": "starting"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        upload(&fx.photos, 9, 2).await;

        let job = fx.service.train(9, Some(9)).await.unwrap();
        assert!(job.job_id.starts_with("job_"));
        assert_eq!(job.training_id, "tr_1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 5);

        let stored = fx.db.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.training_id, "tr_1");
        let user = fx.db.get_user(9).await.unwrap();
        assert_eq!(user.job_id.as_deref(), Some(job.job_id.as_str()));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body["input"]["input_images"]
            .as_str()
            .unwrap()
            .starts_with("https://bot.example.com/files/archives/"));
    }

    #[tokio::test]
    async fn rejected_submission_keeps_the_raw_body() {
        let server = MockServer::start().await;
        let fx = fixture(&server, &[]).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string(r#"{"detail":"input_images: bad url"}"#))
            .mount(&server)
            .await;
        upload(&fx.photos, 1, 2).await;
        let err = fx.service.train(1, None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::UpstreamRejected { status: 422, ref body, .. } if body.contains("input_images: bad url")
        ));
    }

    #[tokio::test]
    async fn succeeded_training_stores_the_model_reference() {
        let server = MockServer::start().await;
        let fx = fixture(&server, &[]).await;
        let job = started_job(&fx, &server).await;

        mount_training_poll(&server, json!({"id": "tr_1", "status": "processing"})).await;
        let running = fx.service.refresh(&job.job_id).await.unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.progress, 50);

        mount_training_poll(
            &server,
            json!({"id": "tr_1", "status": "succeeded", "output": {"model": "owner/model:abc123"}}),
        )
        .await;
        let done = fx.service.refresh(&job.job_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.progress, 100);
        assert_eq!(done.model_id.as_deref(), Some("owner/model:abc123"));

        let user = fx.db.get_user(9).await.unwrap();
        assert!(user.has_model);
        assert_eq!(user.model_id.as_deref(), Some("owner/model:abc123"));

        // Terminal jobs are served from the store.
        let again = fx.service.refresh(&job.job_id).await.unwrap();
        assert_eq!(again.model_id.as_deref(), Some("owner/model:abc123"));
        let polls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.method.as_str() == "GET")
            .count();
        assert_eq!(polls, 2);
    }

    #[tokio::test]
    async fn progress_never_regresses_across_polls() {
        let server = MockServer::start().await;
        let fx = fixture(&server, &[]).await;
        let job = started_job(&fx, &server).await;

        mount_training_poll(&server, json!({"id": "tr_1", "status": "processing"})).await;
        assert_eq!(fx.service.refresh(&job.job_id).await.unwrap().progress, 50);
        mount_training_poll(&server, json!({"id": "tr_1", "status": "starting"})).await;
        let polled = fx.service.refresh(&job.job_id).await.unwrap();
        assert_eq!(polled.status, JobStatus::Pending);
        assert_eq!(polled.progress, 50);
    }

    #[tokio::test]
    async fn unmapped_status_fails_loudly_and_reschedules() {
        let server = MockServer::start().await;
        let fx = fixture(&server, &[]).await;
        let job = started_job(&fx, &server).await;

        mount_training_poll(&server, json!({"id": "tr_1", "status": "paused"})).await;
        let err = fx.service.refresh(&job.job_id).await.unwrap_err();
        assert!(matches!(err, AppError::UnmappedStatus { ref status, .. } if status == "paused"));

        let stored = fx.db.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.poll_attempts, 1);
        assert!(stored.last_error.is_some());
        assert!(stored.next_poll_at > job.created_at.timestamp());
    }

    #[tokio::test]
    async fn polling_gives_up_after_the_limit() {
        let server = MockServer::start().await;
        let fx = fixture(&server, &[("TRAINING_MAX_POLLS", "1")]).await;
        let job = started_job(&fx, &server).await;

        mount_training_poll(&server, json!({"id": "tr_1", "status": "processing"})).await;
        let polled = fx.service.refresh(&job.job_id).await.unwrap();
        assert_eq!(polled.status, JobStatus::Failed);
        assert_eq!(polled.progress, 100);
        assert_eq!(polled.last_error.as_deref(), Some(POLLING_EXHAUSTED));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let server = MockServer::start().await;
        let fx = fixture(&server, &[]).await;
        assert!(matches!(
            fx.service.refresh("job_missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn backoff_grows_linearly_and_caps() {
        assert_eq!(backoff_seconds(20, 0), 20);
        assert_eq!(backoff_seconds(20, 3), 60);
        assert_eq!(backoff_seconds(20, 50), 120);
    }
}

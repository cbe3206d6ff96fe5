use std::time::Duration;

use chrono::Utc;
use teloxide::Bot;
use tracing::{info, warn};

use crate::db::models::JobRecord;
use crate::handlers::training::notify_training_finished;
use crate::state::AppState;

const BATCH_SIZE: i64 = 20;

/// Polls due jobs and returns the finished ones whose owner was not told yet.
pub async fn refresh_due(state: &AppState) -> anyhow::Result<Vec<JobRecord>> {
    let due = state.db.due_jobs(Utc::now().timestamp(), BATCH_SIZE).await?;
    let mut finished = Vec::new();
    for job in due {
        let job = if job.status.is_terminal() {
            job
        } else {
            match state.training.refresh(&job.job_id).await {
                Ok(job) => job,
                Err(err) => {
                    warn!("Refreshing {} failed: {err}", job.job_id);
                    continue;
                }
            }
        };
        if job.status.is_terminal() && !job.notified {
            finished.push(job);
        }
    }
    Ok(finished)
}

pub async fn run_once(bot: Bot, state: AppState) -> anyhow::Result<usize> {
    let finished = refresh_due(&state).await?;
    let mut notified = 0;
    for job in finished {
        if let Err(err) = notify_training_finished(&bot, &job).await {
            warn!("Notifying user {} about {} failed: {err}", job.user_id, job.job_id);
            continue;
        }
        state.db.mark_job_notified(&job.job_id).await?;
        info!("User {} notified that {} is {}", job.user_id, job.job_id, job.status);
        notified += 1;
    }
    Ok(notified)
}

/// Removes training archives the provider no longer needs.
pub async fn prune_archives(state: AppState) -> anyhow::Result<usize> {
    let max_age = Duration::from_secs(state.config.archive_retention_hours * 3600);
    Ok(state.photos.prune_archives(max_age).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::db::database::Database;
    use crate::db::models::JobStatus;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(job_id: &str, training_id: &str, status: JobStatus, notified: bool) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            job_id: job_id.to_string(),
            user_id: 5,
            chat_id: Some(5),
            training_id: training_id.to_string(),
            status,
            progress: status.progress(),
            model_id: None,
            next_poll_at: 0,
            poll_attempts: 0,
            notified,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn state(server: &MockServer) -> AppState {
        let base_url = server.uri();
        let config = test_config(&[
            ("REPLICATE_API_TOKEN", "r8_test"),
            ("REPLICATE_BASE_URL", base_url.as_str()),
        ]);
        let db = Database::init("sqlite::memory:").await.unwrap();
        AppState::new(config, db, "photofly_bot").unwrap()
    }

    #[tokio::test]
    async fn finished_jobs_are_handed_out_until_notified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/trainings/tr_done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"id": "tr_done", "status": "failed", "error": "bad photos"}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/trainings/tr_busy"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "tr_busy", "status": "processing"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let state = state(&server).await;
        state.db.get_user(5).await.unwrap();
        state.db.insert_job(&job("job_done", "tr_done", JobStatus::Running, false)).await.unwrap();
        state.db.insert_job(&job("job_busy", "tr_busy", JobStatus::Pending, false)).await.unwrap();
        state.db.insert_job(&job("job_old", "tr_old", JobStatus::Succeeded, true)).await.unwrap();

        let finished = refresh_due(&state).await.unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].job_id, "job_done");
        assert_eq!(finished[0].status, JobStatus::Failed);
        assert_eq!(finished[0].last_error.as_deref(), Some("bad photos"));

        // The busy job is rescheduled into the future; the failed one waits for its notice.
        let again = refresh_due(&state).await.unwrap();
        assert_eq!(again.len(), 1);
        state.db.mark_job_notified("job_done").await.unwrap();
        assert!(refresh_due(&state).await.unwrap().is_empty());
    }
}

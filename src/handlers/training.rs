use teloxide::prelude::*;
use tracing::{error, info, warn};

use crate::db::models::{JobRecord, JobStatus};
use crate::error::AppError;
use crate::handlers::responses::show;
use crate::handlers::{keyboards, texts, HandlerResult, Origin};
use crate::state::AppState;
use crate::utils::telegram::send_html_with_retry;

/// "Photos uploaded": starts a training unless one is already running.
pub async fn photos_done(bot: &Bot, state: &AppState, origin: Origin) -> HandlerResult {
    let user = state.db.get_user(origin.user_id).await?;
    if !user.paid_any {
        show(
            bot,
            origin.chat_id,
            origin.message_id,
            texts::GENERATIONS_LOCKED,
            Some(keyboards::buy_or_back()),
        )
        .await?;
        return Ok(());
    }

    if let Some(job_id) = &user.job_id {
        if let Some(job) = state.db.get_job(job_id).await? {
            if !job.status.is_terminal() {
                return show_job(bot, origin, &job).await;
            }
        }
    }

    let minimum = state.config.min_training_photos;
    let count = state.photos.count(origin.user_id).await?;
    if count < minimum {
        show(
            bot,
            origin.chat_id,
            origin.message_id,
            &texts::not_enough_photos(count, minimum),
            Some(keyboards::upload()),
        )
        .await?;
        return Ok(());
    }

    match state.training.train(origin.user_id, Some(origin.chat_id.0)).await {
        Ok(job) => {
            info!("User {} started training job {}", origin.user_id, job.job_id);
            show(
                bot,
                origin.chat_id,
                origin.message_id,
                texts::TRAINING_STARTED,
                Some(keyboards::training_in_progress()),
            )
            .await?;
        }
        Err(AppError::Validation(reason)) => {
            show(bot, origin.chat_id, origin.message_id, &reason, Some(keyboards::upload())).await?;
        }
        Err(err) => {
            error!("Training start failed for user {}: {err}", origin.user_id);
            show(
                bot,
                origin.chat_id,
                origin.message_id,
                texts::TRAINING_START_FAILED,
                Some(keyboards::upload()),
            )
            .await?;
        }
    }
    Ok(())
}

async fn show_job(bot: &Bot, origin: Origin, job: &JobRecord) -> HandlerResult {
    let keyboard = match job.status {
        JobStatus::Succeeded => keyboards::genders(),
        JobStatus::Failed | JobStatus::Canceled => keyboards::upload(),
        JobStatus::Pending | JobStatus::Running => keyboards::training_in_progress(),
    };
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        &texts::training_status(job),
        Some(keyboard),
    )
    .await?;
    Ok(())
}

/// Shows the latest training job, refreshing it from the provider first.
pub async fn show_status(bot: &Bot, state: &AppState, origin: Origin) -> HandlerResult {
    let user = state.db.get_user(origin.user_id).await?;
    let Some(job_id) = user.job_id else {
        show(
            bot,
            origin.chat_id,
            origin.message_id,
            texts::NO_TRAINING,
            Some(keyboards::upload()),
        )
        .await?;
        return Ok(());
    };

    let job = match state.training.refresh(&job_id).await {
        Ok(job) => job,
        Err(AppError::NotFound(_)) => {
            show(bot, origin.chat_id, origin.message_id, texts::NO_TRAINING, Some(keyboards::upload())).await?;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    show_job(bot, origin, &job).await
}

/// Sends the one-time "model ready" or "training failed" message.
pub async fn notify_training_finished(bot: &Bot, job: &JobRecord) -> anyhow::Result<()> {
    let chat_id = ChatId(job.chat_id.unwrap_or(job.user_id));
    let (text, keyboard) = if job.status == JobStatus::Succeeded {
        (texts::TRAINING_READY, keyboards::genders())
    } else {
        if let Some(reason) = &job.last_error {
            warn!("Training job {} ended as {}: {reason}", job.job_id, job.status);
        }
        (texts::TRAINING_FAILED, keyboards::upload())
    };
    send_html_with_retry(bot, chat_id, text, Some(keyboard)).await?;
    Ok(())
}

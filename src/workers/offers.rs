use chrono::Utc;
use teloxide::Bot;
use tracing::{info, warn};

use crate::handlers::payments::send_flash_offer;
use crate::state::AppState;

const BATCH_SIZE: i64 = 25;

/// Users whose first contact is old enough for the one-shot offer.
pub async fn due_recipients(state: &AppState, now_ts: i64) -> anyhow::Result<Vec<i64>> {
    let delay = state.config.flash_offer_delay_hours as i64 * 3600;
    state
        .db
        .users_due_for_flash_offer(now_ts - delay, BATCH_SIZE)
        .await
}

pub async fn run_once(bot: Bot, state: AppState) -> anyhow::Result<usize> {
    let Some(offer) = state.config.flash_offer.clone() else {
        return Ok(0);
    };
    let recipients = due_recipients(&state, Utc::now().timestamp()).await?;
    let mut sent = 0;
    for user_id in recipients {
        // Marked first so a user who blocked the bot is not retried forever.
        state.db.mark_flash_sent(user_id).await?;
        match send_flash_offer(&bot, user_id, &offer).await {
            Ok(()) => {
                info!("Flash offer sent to user {}", user_id);
                sent += 1;
            }
            Err(err) => warn!("Flash offer to user {} failed: {err}", user_id),
        }
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::db::database::Database;

    #[tokio::test]
    async fn offer_waits_for_the_delay_and_goes_out_once() {
        let config = test_config(&[("FLASH_OFFER_DELAY_HOURS", "24")]);
        let db = Database::init("sqlite::memory:").await.unwrap();
        let state = AppState::new(config, db, "photofly_bot").unwrap();

        let user = state.db.get_user(11).await.unwrap();
        let first_seen = user.first_seen_ts;
        assert!(due_recipients(&state, first_seen + 3600).await.unwrap().is_empty());
        assert_eq!(
            due_recipients(&state, first_seen + 24 * 3600).await.unwrap(),
            vec![11]
        );

        state.db.mark_flash_sent(11).await.unwrap();
        assert!(due_recipients(&state, first_seen + 48 * 3600).await.unwrap().is_empty());
    }
}

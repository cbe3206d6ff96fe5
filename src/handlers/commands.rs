use teloxide::prelude::*;
use tracing::info;

use crate::db::models::parse_referral_code;
use crate::handlers::responses::show;
use crate::handlers::{menus, texts, training, HandlerResult, Origin};
use crate::state::AppState;

/// `/start [ref_<id>]`: registers the user and attaches a referrer once.
pub async fn start_handler(bot: Bot, state: AppState, origin: Origin, arg: String) -> HandlerResult {
    let user = state.db.get_user(origin.user_id).await?;
    if let Some(referrer_id) = parse_referral_code(&arg) {
        if user.referred_by.is_none() && state.db.set_referrer_if_absent(user.id, referrer_id).await? {
            info!("User {} joined via referral of {}", user.id, referrer_id);
        }
    }
    menus::home(&bot, origin, &texts::welcome()).await
}

pub async fn help_handler(bot: Bot, state: AppState, origin: Origin) -> HandlerResult {
    show(&bot, origin.chat_id, None, &texts::help(&state.config), None).await?;
    Ok(())
}

pub async fn account_handler(bot: Bot, state: AppState, origin: Origin) -> HandlerResult {
    menus::account(&bot, &state, origin).await
}

pub async fn status_handler(bot: Bot, state: AppState, origin: Origin) -> HandlerResult {
    training::show_status(&bot, &state, origin).await
}

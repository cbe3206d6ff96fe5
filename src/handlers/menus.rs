use teloxide::prelude::*;

use crate::handlers::keyboards::{self, telegram_link};
use crate::handlers::responses::show;
use crate::handlers::texts;
use crate::handlers::{HandlerResult, Origin};
use crate::state::AppState;

pub async fn home(bot: &Bot, origin: Origin, text: &str) -> HandlerResult {
    show(bot, origin.chat_id, origin.message_id, text, Some(keyboards::home())).await?;
    Ok(())
}

pub async fn tariffs(bot: &Bot, state: &AppState, origin: Origin) -> HandlerResult {
    let user = state.db.get_user(origin.user_id).await?;
    let discounted = user.referred_by.is_some();
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        &texts::tariffs(&state.config, discounted),
        Some(keyboards::tariffs(&state.config, discounted)),
    )
    .await?;
    Ok(())
}

pub async fn account(bot: &Bot, state: &AppState, origin: Origin) -> HandlerResult {
    let user = state.db.get_user(origin.user_id).await?;
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        &texts::account(&user),
        Some(keyboards::buy_or_back()),
    )
    .await?;
    Ok(())
}

pub async fn examples(bot: &Bot, state: &AppState, origin: Origin) -> HandlerResult {
    let channel = &state.config.examples_channel;
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        &texts::examples(channel),
        Some(keyboards::link_with_back("📸 Открыть канал", &telegram_link(channel))),
    )
    .await?;
    Ok(())
}

pub async fn support(bot: &Bot, state: &AppState, origin: Origin) -> HandlerResult {
    let username = &state.config.support_username;
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        &texts::support(username),
        Some(keyboards::link_with_back("✉️ Написать", &telegram_link(username))),
    )
    .await?;
    Ok(())
}

pub async fn referral(bot: &Bot, state: &AppState, origin: Origin) -> HandlerResult {
    let user = state.db.get_user(origin.user_id).await?;
    let link = state.referral_link(&user.ref_code);
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        &texts::referral(&state.config, &link),
        Some(keyboards::referral_menu()),
    )
    .await?;
    Ok(())
}

pub async fn referral_income(bot: &Bot, state: &AppState, origin: Origin) -> HandlerResult {
    let user = state.db.get_user(origin.user_id).await?;
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        &texts::referral_income(&user, state.config.payout_minimum),
        Some(keyboards::referral_menu()),
    )
    .await?;
    Ok(())
}

pub async fn referral_payout(bot: &Bot, state: &AppState, origin: Origin) -> HandlerResult {
    let config = &state.config;
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        &texts::referral_payout(&config.support_username, config.payout_minimum),
        Some(keyboards::link_with_back(
            "✉️ Написать в поддержку",
            &telegram_link(&config.support_username),
        )),
    )
    .await?;
    Ok(())
}

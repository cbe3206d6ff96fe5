use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, InputMedia, InputMediaPhoto, ParseMode};
use tracing::{error, info, warn};
use url::Url;

use crate::catalog::{prompt, Category, Gender, Prompt};
use crate::db::models::UserState;
use crate::error::AppError;
use crate::handlers::responses::show;
use crate::handlers::{keyboards, menus, texts, HandlerResult, Origin};
use crate::state::AppState;
use crate::utils::telegram::{send_html_with_retry, start_chat_action_heartbeat};

/// Entry to the generation screens, gated on payment and a trained model.
pub async fn generations_menu(bot: &Bot, state: &AppState, origin: Origin) -> HandlerResult {
    let user = state.db.get_user(origin.user_id).await?;
    if gate(bot, state, origin, &user).await? {
        show(
            bot,
            origin.chat_id,
            origin.message_id,
            texts::PICK_GENDER,
            Some(keyboards::genders()),
        )
        .await?;
    }
    Ok(())
}

/// Returns true when the user may browse prompts; otherwise shows why not.
async fn gate(bot: &Bot, state: &AppState, origin: Origin, user: &UserState) -> anyhow::Result<bool> {
    if user.has_model {
        return Ok(true);
    }
    if !user.paid_any {
        show(
            bot,
            origin.chat_id,
            origin.message_id,
            texts::GENERATIONS_LOCKED,
            Some(keyboards::buy_or_back()),
        )
        .await?;
        return Ok(false);
    }

    let mut training = false;
    if let Some(job_id) = &user.job_id {
        training = state
            .db
            .get_job(job_id)
            .await?
            .is_some_and(|job| !job.status.is_terminal());
    }
    if training {
        show(
            bot,
            origin.chat_id,
            origin.message_id,
            texts::MODEL_TRAINING,
            Some(keyboards::training_in_progress()),
        )
        .await?;
    } else {
        show(
            bot,
            origin.chat_id,
            origin.message_id,
            &texts::requirements(&state.config),
            Some(keyboards::upload()),
        )
        .await?;
    }
    Ok(false)
}

pub async fn pick_gender(bot: &Bot, origin: Origin, gender: Gender) -> HandlerResult {
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        texts::PICK_CATEGORY,
        Some(keyboards::categories(gender)),
    )
    .await?;
    Ok(())
}

pub async fn pick_category(bot: &Bot, origin: Origin, gender: Gender, category: Category) -> HandlerResult {
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        texts::PICK_PROMPT,
        Some(keyboards::prompt_list(gender, category)),
    )
    .await?;
    Ok(())
}

async fn show_recharge(bot: &Bot, state: &AppState, chat_id: ChatId, user_id: i64, balance: i64) -> anyhow::Result<()> {
    let discounted = state.db.get_user(user_id).await?.referred_by.is_some();
    let text = format!(
        "{}\n\n{}",
        texts::out_of_credits(balance, state.config.generation_cost),
        texts::tariffs(&state.config, discounted)
    );
    send_html_with_retry(bot, chat_id, &text, Some(keyboards::tariffs(&state.config, discounted))).await?;
    Ok(())
}

/// A prompt tap: checks credits and the debounce, then generates in the background.
pub async fn generate(
    bot: &Bot,
    state: &AppState,
    origin: Origin,
    gender: Gender,
    category: Category,
    index: usize,
) -> HandlerResult {
    let Some(selected) = prompt(gender, category, index) else {
        return menus::home(bot, origin, texts::STALE_BUTTON).await;
    };
    let user = state.db.get_user(origin.user_id).await?;
    if !gate(bot, state, origin, &user).await? {
        return Ok(());
    }
    let cost = state.config.generation_cost;
    if user.balance < cost {
        show_recharge(bot, state, origin.chat_id, origin.user_id, user.balance).await?;
        return Ok(());
    }
    if !state.generation_cooldowns.try_acquire(origin.user_id) {
        send_html_with_retry(bot, origin.chat_id, texts::GENERATION_BUSY, None).await?;
        return Ok(());
    }

    let bot = bot.clone();
    let state = state.clone();
    tokio::spawn(async move {
        if let Err(err) = run_generation(&bot, &state, origin, gender, category, selected).await {
            error!("generation task failed: {err}");
        }
        state.generation_cooldowns.release(origin.user_id);
    });
    Ok(())
}

async fn run_generation(
    bot: &Bot,
    state: &AppState,
    origin: Origin,
    gender: Gender,
    category: Category,
    selected: &'static Prompt,
) -> anyhow::Result<()> {
    let count = state.config.images_per_generation;
    send_html_with_retry(bot, origin.chat_id, &texts::generating(count), None).await?;
    let _heartbeat = start_chat_action_heartbeat(bot.clone(), origin.chat_id, ChatAction::UploadPhoto);

    let outcome = match state
        .generation
        .generate_for_user(origin.user_id, selected.text, count, None)
        .await
    {
        Ok(outcome) => outcome,
        Err(AppError::InsufficientCredits { balance, .. }) => {
            return show_recharge(bot, state, origin.chat_id, origin.user_id, balance).await;
        }
        Err(AppError::Timeout(detail)) => {
            warn!("Generation for user {} timed out: {detail}", origin.user_id);
            send_html_with_retry(bot, origin.chat_id, texts::GENERATION_TIMEOUT, None).await?;
            return Ok(());
        }
        Err(err) => {
            error!("Generation for user {} failed: {err}", origin.user_id);
            send_html_with_retry(bot, origin.chat_id, texts::GENERATION_FAILED, None).await?;
            return Ok(());
        }
    };
    info!(
        "User {} received {} images for '{}', balance {}",
        origin.user_id,
        outcome.images.len(),
        selected.title,
        outcome.balance
    );

    send_images(bot, origin.chat_id, selected.title, &outcome.images).await?;

    if outcome.balance < state.config.generation_cost {
        show_recharge(bot, state, origin.chat_id, origin.user_id, outcome.balance).await
    } else {
        let text = format!(
            "{}\n{}",
            texts::generation_done(outcome.balance),
            texts::ANOTHER_PROMPT
        );
        send_html_with_retry(bot, origin.chat_id, &text, Some(keyboards::prompt_list(gender, category))).await?;
        Ok(())
    }
}

/// Sends the batch as one album, or as plain links when Telegram refuses the URLs.
async fn send_images(bot: &Bot, chat_id: ChatId, title: &str, images: &[String]) -> anyhow::Result<()> {
    let media = images
        .iter()
        .filter_map(|image| Url::parse(image).ok())
        .enumerate()
        .map(|(index, url)| {
            let photo = InputMediaPhoto::new(InputFile::url(url));
            let photo = if index == 0 {
                photo.caption(format!("<b>{title}</b>")).parse_mode(ParseMode::Html)
            } else {
                photo
            };
            InputMedia::Photo(photo)
        })
        .collect::<Vec<_>>();

    if !media.is_empty() {
        match bot.send_media_group(chat_id, media).await {
            Ok(_) => return Ok(()),
            Err(err) => warn!("send_media_group failed, sending links instead: {err}"),
        }
    }

    let links = images
        .iter()
        .enumerate()
        .map(|(index, image)| format!("<a href=\"{image}\">Фото {}</a>", index + 1))
        .collect::<Vec<_>>()
        .join("\n");
    send_html_with_retry(bot, chat_id, &format!("<b>{title}</b>\n{links}"), None).await?;
    Ok(())
}

use teloxide::prelude::*;
use tracing::{info, warn};

use crate::config::{Offer, FLASH_OFFER_TAG};
use crate::db::models::{PaymentCredit, PaymentStatus};
use crate::handlers::responses::show;
use crate::handlers::{keyboards, menus, texts, HandlerResult, Origin};
use crate::state::AppState;
use crate::utils::telegram::send_html_with_retry;

pub async fn buy(bot: &Bot, state: &AppState, origin: Origin, tag: &str) -> HandlerResult {
    let Some(offer) = state.config.offer(tag).cloned() else {
        return menus::home(bot, origin, texts::STALE_BUTTON).await;
    };
    if offer.tag == FLASH_OFFER_TAG {
        let user = state.db.get_user(origin.user_id).await?;
        if user.flash_bought {
            return menus::home(bot, origin, texts::FLASH_ALREADY_USED).await;
        }
    }

    let created = state.payments.create_offer_payment(origin.user_id, &offer).await?;
    info!(
        "User {} opened payment {} for offer {}",
        origin.user_id, created.payment_id, offer.tag
    );
    show(
        bot,
        origin.chat_id,
        origin.message_id,
        &texts::checkout(offer.qty, created.amount, &state.config.payment_currency),
        Some(keyboards::checkout(&created.confirmation_url, &created.payment_id)),
    )
    .await?;
    Ok(())
}

pub async fn check(bot: &Bot, state: &AppState, origin: Origin, payment_id: &str) -> HandlerResult {
    let check = state.payments.check_payment(payment_id).await?;
    if let Some(credit) = check.credit {
        notify_payment_credited(bot, state, &credit).await;
        return Ok(());
    }
    match check.status {
        PaymentStatus::Succeeded => {
            let user = state.db.get_user(origin.user_id).await?;
            show(
                bot,
                origin.chat_id,
                origin.message_id,
                &format!(
                    "{}\n\n{}",
                    texts::PAYMENT_ALREADY_CREDITED,
                    texts::requirements(&state.config)
                ),
                Some(next_step_keyboard(user.has_model)),
            )
            .await?;
        }
        PaymentStatus::Pending => {
            send_html_with_retry(bot, origin.chat_id, texts::PAYMENT_PENDING, None).await?;
        }
        PaymentStatus::Canceled => {
            show(
                bot,
                origin.chat_id,
                origin.message_id,
                texts::PAYMENT_CANCELED,
                Some(keyboards::buy_or_back()),
            )
            .await?;
        }
    }
    Ok(())
}

fn next_step_keyboard(has_model: bool) -> teloxide::types::InlineKeyboardMarkup {
    if has_model {
        keyboards::genders()
    } else {
        keyboards::upload()
    }
}

/// Tells the buyer about the credit and the referrer about their reward.
///
/// Called once per credited payment, from whichever path observed it first.
pub async fn notify_payment_credited(bot: &Bot, state: &AppState, credit: &PaymentCredit) {
    let chat_id = ChatId(credit.user_id);
    let has_model = match state.db.get_user(credit.user_id).await {
        Ok(user) => user.has_model,
        Err(err) => {
            warn!("Failed to load user {} after payment: {err}", credit.user_id);
            false
        }
    };
    let text = if has_model {
        format!(
            "{}\n\n{}",
            texts::payment_credited(credit.qty, credit.balance),
            texts::PICK_GENDER
        )
    } else {
        format!(
            "{}\n\n{}",
            texts::payment_credited(credit.qty, credit.balance),
            texts::requirements(&state.config)
        )
    };
    if let Err(err) = send_html_with_retry(bot, chat_id, &text, Some(next_step_keyboard(has_model))).await {
        warn!("Failed to notify user {} about payment: {err}", credit.user_id);
    }

    if let Some(referral) = &credit.referral {
        let text = texts::referral_reward(referral.amount);
        if let Err(err) = send_html_with_retry(bot, ChatId(referral.referrer_id), &text, None).await {
            warn!("Failed to notify referrer {}: {err}", referral.referrer_id);
        }
    }
}

pub async fn send_flash_offer(bot: &Bot, user_id: i64, offer: &Offer) -> anyhow::Result<()> {
    send_html_with_retry(
        bot,
        ChatId(user_id),
        &texts::flash_offer(offer),
        Some(keyboards::flash_offer(offer)),
    )
    .await?;
    Ok(())
}

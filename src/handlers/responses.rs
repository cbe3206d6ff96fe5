use std::time::Duration;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use tracing::{error, warn};

use crate::handlers::texts;
use crate::state::AppState;
use crate::utils::telegram::{send_html_with_retry, telegram_retryable_error};

const ADMIN_ALERT_LIMIT: usize = 3500;

async fn edit_text_with_retry(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    text: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<()> {
    let mut delay = Duration::from_secs_f32(1.5);
    for attempt in 0..3 {
        let mut request = bot
            .edit_message_text(chat_id, message_id, text.to_string())
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard.clone() {
            request = request.reply_markup(keyboard);
        }

        match request.await {
            Ok(_) => return Ok(()),
            Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(()),
            Err(err) => {
                if attempt == 2 || !telegram_retryable_error(&err) {
                    return Err(err.into());
                }
                warn!("edit_message_text failed: {err}");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }

    Ok(())
}

/// Replaces the menu a button was pressed on, or sends a new message when
/// there is nothing to edit (commands, old or deleted messages).
pub async fn show(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    text: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<()> {
    if let Some(message_id) = message_id {
        match edit_text_with_retry(bot, chat_id, message_id, text, keyboard.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => warn!("Falling back to a new message in chat {}: {err}", chat_id.0),
        }
    }
    send_html_with_retry(bot, chat_id, text, keyboard).await?;
    Ok(())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let mut iter = text.chars();
    let truncated: String = iter.by_ref().take(max_chars).collect();
    if iter.next().is_some() {
        format!("{truncated}…")
    } else {
        truncated
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Logs a failed action, tells the user something went wrong and alerts the
/// admin chat when one is configured.
pub async fn report_failure(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    action: &str,
    detail: &str,
) {
    error!("{action} failed in chat {}: {detail}", chat_id.0);
    if let Err(send_err) = send_html_with_retry(bot, chat_id, texts::GENERIC_ERROR, None).await {
        warn!("Failed to send error notice to chat {}: {send_err}", chat_id.0);
    }

    let Some(admin_chat_id) = state.config.admin_chat_id else {
        return;
    };
    let alert = format!(
        "⚠️ <b>{}</b> failed for chat <code>{}</code>\n<pre>{}</pre>",
        escape_html(action),
        chat_id.0,
        escape_html(&truncate_chars(detail, ADMIN_ALERT_LIMIT))
    );
    if let Err(send_err) = send_html_with_retry(bot, ChatId(admin_chat_id), &alert, None).await {
        warn!("Failed to alert admin chat: {send_err}");
    }
}

pub mod access;
pub mod callbacks;
pub mod commands;
pub mod generation;
pub mod keyboards;
pub mod menus;
pub mod payments;
pub mod photos;
pub mod responses;
pub mod texts;
pub mod training;

use std::error::Error;

use teloxide::prelude::*;
use teloxide::types::{MessageId, UpdateKind};
use teloxide::utils::command::BotCommands;
use tracing::warn;

use crate::handlers::callbacks::CallbackAction;
use crate::handlers::responses::report_failure;
use crate::state::AppState;
use crate::utils::telegram::{send_html_with_retry, user_id_of};
use crate::utils::timing::start_action_timer;

pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    Start(String),
    Help,
    Account,
    Status,
}

/// Where a reply goes: the chat, the menu message to replace (if any) and the user.
#[derive(Debug, Clone, Copy)]
pub struct Origin {
    pub chat_id: ChatId,
    pub message_id: Option<MessageId>,
    pub user_id: i64,
}

/// Single entry for both webhook and long-polling updates.
pub async fn dispatch_update(bot: Bot, state: AppState, update: Update) {
    match update.kind {
        UpdateKind::Message(message) => handle_message(bot, state, message).await,
        UpdateKind::CallbackQuery(query) => handle_callback_query(bot, state, query).await,
        _ => {}
    }
}

async fn handle_message(bot: Bot, state: AppState, message: Message) {
    if !message.chat.is_private() {
        return;
    }
    let Some(user) = message.from.as_ref() else {
        return;
    };
    let origin = Origin {
        chat_id: message.chat.id,
        message_id: None,
        user_id: user_id_of(user),
    };

    let (action, result) = if let Some(text) = message.text() {
        match Command::parse(text, &state.bot_username) {
            Ok(command) => run_command(bot.clone(), state.clone(), origin, command).await,
            Err(_) => ("text", unknown_input(&bot, origin).await),
        }
    } else if let Some(file_id) = photos::training_file(&message) {
        let mut timer = start_action_timer("photo", origin.user_id, Some(origin.chat_id.0));
        let result = photos::photo_handler(bot.clone(), state.clone(), origin, file_id).await;
        if result.is_err() {
            timer.mark_status("error", None);
        }
        ("photo", result)
    } else {
        ("message", unknown_input(&bot, origin).await)
    };

    if let Err(err) = result {
        report_failure(&bot, &state, origin.chat_id, action, &err.to_string()).await;
    }
}

async fn run_command(
    bot: Bot,
    state: AppState,
    origin: Origin,
    command: Command,
) -> (&'static str, HandlerResult) {
    let action = match &command {
        Command::Start(_) => "start",
        Command::Help => "help",
        Command::Account => "account",
        Command::Status => "status",
    };
    let mut timer = start_action_timer(action, origin.user_id, Some(origin.chat_id.0));
    let result = match command {
        Command::Start(arg) => commands::start_handler(bot, state, origin, arg).await,
        Command::Help => commands::help_handler(bot, state, origin).await,
        Command::Account => commands::account_handler(bot, state, origin).await,
        Command::Status => commands::status_handler(bot, state, origin).await,
    };
    if let Err(err) = &result {
        timer.mark_status("error", Some(err.to_string()));
    }
    (action, result)
}

async fn unknown_input(bot: &Bot, origin: Origin) -> HandlerResult {
    send_html_with_retry(bot, origin.chat_id, texts::UNKNOWN_INPUT, Some(keyboards::home())).await?;
    Ok(())
}

async fn handle_callback_query(bot: Bot, state: AppState, query: CallbackQuery) {
    if let Err(err) = bot.answer_callback_query(query.id.clone()).await {
        warn!("answer_callback_query failed: {err}");
    }
    let Some(message) = query.message.as_ref() else {
        return;
    };
    let origin = Origin {
        chat_id: message.chat().id,
        message_id: Some(message.id()),
        user_id: user_id_of(&query.from),
    };
    let data = query.data.clone().unwrap_or_default();

    let Some(action) = CallbackAction::parse(&data) else {
        warn!("Stale callback '{}' from user {}", data, origin.user_id);
        if let Err(err) = menus::home(&bot, origin, texts::STALE_BUTTON).await {
            report_failure(&bot, &state, origin.chat_id, "stale_callback", &err.to_string()).await;
        }
        return;
    };

    let mut timer = start_action_timer(action.name(), origin.user_id, Some(origin.chat_id.0));
    let result = route_callback(&bot, &state, origin, &action).await;
    if let Err(err) = result {
        timer.mark_status("error", Some(err.to_string()));
        report_failure(&bot, &state, origin.chat_id, action.name(), &err.to_string()).await;
    }
}

async fn route_callback(bot: &Bot, state: &AppState, origin: Origin, action: &CallbackAction) -> HandlerResult {
    match action {
        CallbackAction::Home => menus::home(bot, origin, texts::MAIN_MENU).await,
        CallbackAction::Tariffs => menus::tariffs(bot, state, origin).await,
        CallbackAction::Buy(tag) => payments::buy(bot, state, origin, tag).await,
        CallbackAction::CheckPayment(payment_id) => payments::check(bot, state, origin, payment_id).await,
        CallbackAction::PhotosDone => training::photos_done(bot, state, origin).await,
        CallbackAction::TrainingStatus => training::show_status(bot, state, origin).await,
        CallbackAction::Generations => generation::generations_menu(bot, state, origin).await,
        CallbackAction::PickGender(gender) => generation::pick_gender(bot, origin, *gender).await,
        CallbackAction::PickCategory(gender, category) => {
            generation::pick_category(bot, origin, *gender, *category).await
        }
        CallbackAction::Generate(gender, category, index) => {
            generation::generate(bot, state, origin, *gender, *category, *index).await
        }
        CallbackAction::Examples => menus::examples(bot, state, origin).await,
        CallbackAction::Support => menus::support(bot, state, origin).await,
        CallbackAction::Account => menus::account(bot, state, origin).await,
        CallbackAction::Referral => menus::referral(bot, state, origin).await,
        CallbackAction::ReferralIncome => menus::referral_income(bot, state, origin).await,
        CallbackAction::ReferralPayout => menus::referral_payout(bot, state, origin).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_dispatch_can_run_on_spawned_tasks() {
        fn require_send<H, F>(_: H)
        where
            H: Fn(Bot, AppState, Update) -> F,
            F: std::future::Future<Output = ()> + Send + 'static,
        {
        }
        require_send(dispatch_update);
    }

    #[test]
    fn start_command_keeps_the_referral_argument() {
        match Command::parse("/start ref_42", "photofly_bot") {
            Ok(Command::Start(arg)) => assert_eq!(arg, "ref_42"),
            _ => panic!("expected /start"),
        }
        match Command::parse("/start@photofly_bot", "photofly_bot") {
            Ok(Command::Start(arg)) => assert!(arg.is_empty()),
            _ => panic!("expected bare /start"),
        }
        assert!(Command::parse("hello", "photofly_bot").is_err());
    }
}

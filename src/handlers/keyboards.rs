use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use url::Url;

use crate::catalog::{prompts, Category, Gender};
use crate::config::{discounted_price, Config, Offer};
use crate::handlers::callbacks::CallbackAction;

fn button(text: &str, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text.to_string(), action.token())
}

fn back_row() -> Vec<InlineKeyboardButton> {
    vec![button("⬅️ Назад", CallbackAction::Home)]
}

fn url_row(text: &str, link: &str) -> Vec<InlineKeyboardButton> {
    match Url::parse(link) {
        Ok(url) => vec![InlineKeyboardButton::url(text.to_string(), url)],
        Err(_) => Vec::new(),
    }
}

fn markup(rows: Vec<Vec<InlineKeyboardButton>>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows.into_iter().filter(|row| !row.is_empty()))
}

pub fn telegram_link(username: &str) -> String {
    format!("https://t.me/{username}")
}

pub fn home() -> InlineKeyboardMarkup {
    markup(vec![
        vec![button("🎯 Попробовать", CallbackAction::Tariffs)],
        vec![button("🖼 Генерации", CallbackAction::Generations)],
        vec![button("📸 Примеры", CallbackAction::Examples)],
        vec![button("🤝 Реферальная программа", CallbackAction::Referral)],
        vec![button("👤 Мой аккаунт", CallbackAction::Account)],
        vec![button("🆘 Поддержка", CallbackAction::Support)],
    ])
}

pub fn offer_price(config: &Config, offer: &Offer, discounted: bool) -> i64 {
    if discounted {
        discounted_price(offer.price, config.referral_discount_percent)
    } else {
        offer.price
    }
}

pub fn tariffs(config: &Config, discounted: bool) -> InlineKeyboardMarkup {
    let mut rows = config
        .tariffs
        .iter()
        .map(|offer| {
            vec![button(
                &format!(
                    "{} генераций — {} ₽",
                    offer.qty,
                    offer_price(config, offer, discounted)
                ),
                CallbackAction::Buy(offer.tag.clone()),
            )]
        })
        .collect::<Vec<_>>();
    rows.push(back_row());
    markup(rows)
}

pub fn flash_offer(offer: &Offer) -> InlineKeyboardMarkup {
    markup(vec![
        vec![button("🛒 Приобрести", CallbackAction::Buy(offer.tag.clone()))],
        back_row(),
    ])
}

pub fn checkout(confirmation_url: &str, payment_id: &str) -> InlineKeyboardMarkup {
    markup(vec![
        url_row("💳 Оплатить", confirmation_url),
        vec![button(
            "🔄 Проверить оплату",
            CallbackAction::CheckPayment(payment_id.to_string()),
        )],
        back_row(),
    ])
}

pub fn upload() -> InlineKeyboardMarkup {
    markup(vec![
        vec![button("✅ Фото загружены", CallbackAction::PhotosDone)],
        back_row(),
    ])
}

pub fn training_in_progress() -> InlineKeyboardMarkup {
    markup(vec![
        vec![button("📊 Проверить прогресс", CallbackAction::TrainingStatus)],
        back_row(),
    ])
}

pub fn buy_or_back() -> InlineKeyboardMarkup {
    markup(vec![
        vec![button("🛒 Купить генерации", CallbackAction::Tariffs)],
        back_row(),
    ])
}

pub fn genders() -> InlineKeyboardMarkup {
    let mut rows = Gender::ALL
        .into_iter()
        .map(|gender| vec![button(gender.label(), CallbackAction::PickGender(gender))])
        .collect::<Vec<_>>();
    rows.push(back_row());
    markup(rows)
}

pub fn categories(gender: Gender) -> InlineKeyboardMarkup {
    let mut rows = Category::ALL
        .chunks(2)
        .map(|chunk| {
            chunk
                .iter()
                .map(|category| {
                    button(
                        category.label(),
                        CallbackAction::PickCategory(gender, *category),
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    rows.push(vec![button("⬅️ Назад", CallbackAction::Generations)]);
    markup(rows)
}

pub fn prompt_list(gender: Gender, category: Category) -> InlineKeyboardMarkup {
    let mut rows = prompts(gender, category)
        .iter()
        .enumerate()
        .map(|(index, prompt)| {
            vec![button(
                prompt.title,
                CallbackAction::Generate(gender, category, index),
            )]
        })
        .collect::<Vec<_>>();
    rows.push(vec![button("⬅️ Назад", CallbackAction::PickGender(gender))]);
    markup(rows)
}

pub fn referral_menu() -> InlineKeyboardMarkup {
    markup(vec![
        vec![button("📈 Мои доходы", CallbackAction::ReferralIncome)],
        vec![button("💳 Вывести средства", CallbackAction::ReferralPayout)],
        back_row(),
    ])
}

pub fn link_with_back(text: &str, link: &str) -> InlineKeyboardMarkup {
    markup(vec![url_row(text, link), back_row()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn callback_tokens(markup: &InlineKeyboardMarkup) -> Vec<String> {
        markup
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|button| match &button.kind {
                teloxide::types::InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn every_button_parses_back_into_an_action() {
        let config = test_config(&[]);
        let keyboards = [
            home(),
            tariffs(&config, true),
            upload(),
            genders(),
            categories(Gender::Female),
            prompt_list(Gender::Male, Category::City),
            referral_menu(),
            checkout("https://yoomoney.ru/checkout/x", "pay_1"),
        ];
        for keyboard in &keyboards {
            for token in callback_tokens(keyboard) {
                assert!(CallbackAction::parse(&token).is_some(), "{token}");
            }
        }
    }

    #[test]
    fn tariff_buttons_show_discounted_prices() {
        let config = test_config(&[]);
        let labels = tariffs(&config, true)
            .inline_keyboard
            .iter()
            .flatten()
            .map(|button| button.text.clone())
            .collect::<Vec<_>>();
        assert_eq!(labels[0], "20 генераций — 386 ₽");
        assert_eq!(labels[2], "70 генераций — 647 ₽");
    }

    #[test]
    fn invalid_urls_drop_the_row() {
        let keyboard = checkout("not a url", "pay_1");
        assert_eq!(keyboard.inline_keyboard.len(), 2);
    }
}

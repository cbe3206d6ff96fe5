use crate::config::{Config, Offer};
use crate::db::models::{JobRecord, JobStatus, UserState};
use crate::handlers::keyboards::offer_price;

pub const GENERIC_ERROR: &str = "❌ Упс, произошла ошибка. Уже чиним. Попробуйте ещё раз.";
pub const STALE_BUTTON: &str = "Эта кнопка устарела, открываю главное меню.";
pub const MAIN_MENU: &str = "📍 Главное меню";

pub fn welcome() -> String {
    "👋 <b>Привет!</b> Это <b>PhotoFly</b> — твоя персональная фотостудия с ИИ.\n\n\
     Что мы сделаем:\n\
     • превратим твои обычные фото в профессиональные портреты\n\
     • сгенерируем образы в разных стилях (Нью-Йорк, Москва-Сити, студийные сетапы и т.д.)\n\
     • без долгого ожидания и сложностей\n\n\
     Начнём?"
        .to_string()
}

pub fn help(config: &Config) -> String {
    format!(
        "ℹ️ <b>Как это работает</b>\n\n\
         1. Выбери пакет генераций в разделе «🎯 Попробовать».\n\
         2. Загрузи от {} фото и нажми «Фото загружены».\n\
         3. Дождись обучения модели (10–30 минут).\n\
         4. Выбирай темы и получай по {} портрета за {} генерации.\n\n\
         Команды: /start, /account, /status, /help\n\
         Поддержка: @{}",
        config.min_training_photos,
        config.images_per_generation,
        config.generation_cost,
        config.support_username
    )
}

pub fn tariffs(config: &Config, discounted: bool) -> String {
    let mut text = if discounted {
        format!(
            "💎 <b>Тарифы генераций</b> <i>(скидка −{}% по реферальной ссылке)</i>\n\n",
            config.referral_discount_percent
        )
    } else {
        "💎 <b>Тарифы генераций</b>\n\n".to_string()
    };
    for offer in &config.tariffs {
        let price = offer_price(config, offer, discounted);
        if discounted && price != offer.price {
            text.push_str(&format!(
                "• {} генераций — <s>{} ₽</s> <b>{} ₽</b>\n",
                offer.qty, offer.price, price
            ));
        } else {
            text.push_str(&format!("• {} генераций — <b>{} ₽</b>\n", offer.qty, price));
        }
    }
    text.push_str("\nВыбери пакет — и сразу перейдём к загрузке фото.");
    text
}

pub fn checkout(qty: i64, amount: f64, currency: &str) -> String {
    format!(
        "🧾 <b>Счёт сформирован</b>\n\n\
         Пакет: <b>{qty}</b> генераций\n\
         К оплате: <b>{amount:.0} {}</b>\n\n\
         Нажми «Оплатить», а после оплаты — «Проверить оплату».",
        currency_sign(currency)
    )
}

fn currency_sign(currency: &str) -> &str {
    match currency {
        "RUB" => "₽",
        other => other,
    }
}

pub fn payment_credited(qty: i64, balance: i64) -> String {
    format!(
        "✅ <b>Оплата прошла успешно!</b>\n\n\
         Начислено на баланс: <b>{qty}</b> генераций.\n\
         Текущий баланс: <b>{balance}</b>."
    )
}

pub const PAYMENT_PENDING: &str =
    "⏳ Оплата ещё не поступила. Если ты уже оплатил, подожди минуту и проверь снова.";
pub const PAYMENT_CANCELED: &str = "❌ Платёж отменён. Можно выбрать пакет заново.";
pub const PAYMENT_ALREADY_CREDITED: &str = "✅ Этот платёж уже зачислен на баланс.";
pub const FLASH_ALREADY_USED: &str = "Это предложение уже использовано.";

pub fn referral_reward(amount: f64) -> String {
    format!("💸 Тебе начислено <b>{amount:.2} ₽</b> по реферальной программе!")
}

pub fn requirements(config: &Config) -> String {
    format!(
        "📥 <b>Загрузка фото для обучения</b>\n\n\
         Загрузи <b>от {} до {}</b> фотографий, где тебя хорошо видно. Лучше — 25–35 шт., разные ракурсы и сцены.\n\n\
         <b>Требования:</b>\n\
         • без очков, масок, кепок и сильных аксессуаров\n\
         • без тяжёлых фильтров/ретуши, без коллажей\n\
         • лицо и плечи — чётко; разные эмоции и свет\n\
         • вертикальные кадры предпочтительнее (но не критично)\n\
         • можно селфи и фото в полный рост\n\
         • избегай размытия и пересвета\n\n\
         Когда закончишь загрузку, нажми кнопку ниже 👇",
        config.min_training_photos, config.max_photos_per_user
    )
}

pub fn photo_received(count: usize, minimum: usize) -> String {
    if count >= minimum {
        format!(
            "Фото принято ✅ Загружено: <b>{count}</b>.\n\
             Можно добавить ещё или нажать «Фото загружены»."
        )
    } else {
        format!(
            "Фото принято ✅ Загружено: <b>{count}</b> из <b>{minimum}</b>.\n\
             Загрузи ещё и нажми «Фото загружены», когда будешь готов."
        )
    }
}

pub fn not_enough_photos(count: usize, minimum: usize) -> String {
    format!(
        "📸 Для обучения нужно минимум <b>{minimum}</b> фото, сейчас загружено <b>{count}</b>.\n\
         Загрузи ещё <b>{}</b> и нажми «Фото загружены».",
        minimum.saturating_sub(count)
    )
}

pub const PHOTO_REJECTED: &str = "⚠️ Не удалось сохранить фото. Пришли изображение ещё раз.";

pub const TRAINING_STARTED: &str = "🚀 Обучение запущено!\n\n\
     Это может занять <b>10–30 минут</b>. Мы напишем, когда всё будет готово.";
pub const TRAINING_START_FAILED: &str = "❌ Не удалось запустить обучение. Попробуйте ещё раз.";
pub const TRAINING_READY: &str =
    "✨ <b>Готово!</b> Модель обучена.\n\nВыбери образ — сгенерим сразу несколько вариантов.";
pub const TRAINING_FAILED: &str =
    "❌ Обучение не удалось. Попробуй ещё раз загрузить фото или напиши в поддержку.";
pub const NO_TRAINING: &str =
    "Модель ещё не обучалась. Загрузи фото по требованиям и нажми «Фото загружены».";

pub fn training_status(job: &JobRecord) -> String {
    let state = match job.status {
        JobStatus::Pending => "в очереди",
        JobStatus::Running => "идёт обучение",
        JobStatus::Succeeded => "готово",
        JobStatus::Failed => "ошибка",
        JobStatus::Canceled => "отменено",
    };
    format!(
        "📊 <b>Обучение модели</b>\n\nСтатус: <b>{state}</b>\nПрогресс: <b>{}%</b>",
        job.progress
    )
}

pub const GENERATIONS_LOCKED: &str =
    "🖼 <b>Генерации</b>\n\nСначала приобретите пакет генераций.";
pub const MODEL_TRAINING: &str =
    "⏳ Модель обучается. Мы пришлём уведомление, как только всё будет готово.";
pub const PICK_GENDER: &str = "Для кого генерируем?";
pub const PICK_CATEGORY: &str = "Выберите тему:";
pub const PICK_PROMPT: &str = "Выберите образ:";
pub const ANOTHER_PROMPT: &str = "Хочешь другую тему? Выбери ещё:";
pub const GENERATION_BUSY: &str = "⏳ Уже генерируем, подожди немного.";
pub const GENERATION_TIMEOUT: &str =
    "⌛ Генерация заняла слишком много времени. Генерации возвращены на баланс, попробуй ещё раз.";
pub const GENERATION_FAILED: &str =
    "❌ Упс, произошла ошибка при генерации. Генерации возвращены на баланс, попробуйте ещё раз.";

pub fn generating(count: usize) -> String {
    format!("🎨 Генерируем {count} изображения… это займёт ~30–60 секунд.")
}

pub fn generation_done(balance: i64) -> String {
    format!("Готово! Баланс: {balance}")
}

pub fn out_of_credits(balance: i64, cost: i64) -> String {
    format!(
        "😕 На балансе <b>{balance}</b> генераций, а нужно <b>{cost}</b>.\n\n\
         Приобретите пакет — и продолжим."
    )
}

pub fn account(user: &UserState) -> String {
    let model = if user.has_model {
        "обучена ✅"
    } else if user.job_id.is_some() {
        "обучается ⏳"
    } else {
        "не обучена"
    };
    format!(
        "👤 <b>Мой аккаунт</b>\n\n\
         • Ваш ID в боте: <code>{}</code>\n\
         • Доступно генераций: <b>{}</b>\n\
         • Модель: {model}\n\
         • Реферальный доход: <b>{:.2} ₽</b>\n\n\
         Нужны ещё генерации? Откройте раздел «🎯 Попробовать».",
        user.id, user.balance, user.ref_earn_total
    )
}

pub fn examples(channel: &str) -> String {
    format!(
        "📸 Примеры работ\n\n\
         Подписывайся на наш канал с примерами и вдохновением:\n@{channel}"
    )
}

pub fn support(username: &str) -> String {
    format!(
        "🆘 <b>Поддержка</b>\n\n\
         Если возник вопрос — мы на связи: @{username}\n\n\
         Пишите коротко и по делу — так быстрее поможем."
    )
}

pub fn referral(config: &Config, link: &str) -> String {
    format!(
        "🤝 <b>Реферальная программа</b>\n\n\
         • Делись своей ссылкой — получай <b>{}%</b> с покупок друзей\n\
         • Друзьям — <b>скидка {}%</b> на пакеты\n\
         • Вывод средств от <b>{} ₽</b>\n\n\
         Твоя ссылка:\n<code>{link}</code>",
        config.referral_percent, config.referral_discount_percent, config.payout_minimum
    )
}

pub fn referral_income(user: &UserState, payout_minimum: i64) -> String {
    format!(
        "📈 <b>Мои доходы</b>\n\n\
         Заработано всего: <b>{:.2} ₽</b>\n\
         Доступно к выводу: <b>{:.2} ₽</b>\n\
         Выплачено: <b>{:.2} ₽</b>\n\n\
         Минимальная сумма вывода: <b>{payout_minimum} ₽</b>.",
        user.ref_earn_total,
        user.ref_earn_ready,
        (user.ref_earn_total - user.ref_earn_ready).max(0.0)
    )
}

pub fn referral_payout(support_username: &str, payout_minimum: i64) -> String {
    format!(
        "💳 <b>Вывод средств</b>\n\n\
         Пожалуйста, напиши нам @{support_username} — укажи:\n\
         • сумму к выводу\n• свой @ник и ID в боте\n\
         • удобный способ получения\n\n\
         ⚠️ Вывод доступен от <b>{payout_minimum} ₽</b>."
    )
}

pub fn flash_offer(offer: &Offer) -> String {
    format!(
        "🔥 <b>Только сейчас!</b>\n\n\
         Вам доступно <b>{} генераций</b> за <b>{} ₽</b>.\n\
         Предложение ограничено по времени.\n\n\
         Нажмите ниже, чтобы приобрести и перейти к загрузке фото.",
        offer.qty, offer.price
    )
}

pub const UNKNOWN_INPUT: &str = "Я понимаю кнопки меню и фото для обучения 🙂";

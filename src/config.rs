use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::error::AppError;

pub const FLASH_OFFER_TAG: &str = "flash";
pub const DEFAULT_TRAINER_VERSION: &str =
    "replicate/fast-flux-trainer:8b10794665aed907bb98a1a5324cd1d3a8bea0e9b31e65210967fb9c9e2e08ed";

/// A purchasable credit package.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub tag: String,
    pub qty: i64,
    pub price: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub bot_username: String,
    pub public_base_url: String,
    pub webhook_secret: String,
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub database_url: String,
    pub log_level: String,
    pub replicate_api_token: String,
    pub replicate_base_url: String,
    pub replicate_trainer_version: String,
    pub replicate_destination: String,
    pub train_steps: u64,
    pub replicate_base_model: String,
    pub yookassa_shop_id: String,
    pub yookassa_secret_key: String,
    pub yookassa_base_url: String,
    pub payment_return_url: String,
    pub payment_currency: String,
    pub tariffs: Vec<Offer>,
    pub flash_offer: Option<Offer>,
    pub flash_offer_delay_hours: u64,
    pub generation_cost: i64,
    pub images_per_generation: usize,
    pub min_training_photos: usize,
    pub max_photos_per_user: usize,
    pub referral_percent: f64,
    pub referral_discount_percent: f64,
    pub payout_minimum: i64,
    pub prediction_poll_interval_ms: u64,
    pub prediction_max_polls: usize,
    pub training_poll_interval_seconds: u64,
    pub training_max_polls: i64,
    pub worker_tick_seconds: u64,
    pub archive_retention_hours: u64,
    pub http_timeout_seconds: u64,
    pub generation_cooldown_seconds: u64,
    pub admin_chat_id: Option<i64>,
    pub support_username: String,
    pub examples_channel: String,
}

struct Vars<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Vars<'_> {
    /// Set values, empty ones included.
    fn present(&self, name: &str) -> Option<String> {
        (self.lookup)(name).map(|value| value.trim().to_string())
    }

    fn raw(&self, name: &str) -> Option<String> {
        self.present(name).filter(|value| !value.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn u64(&self, name: &str, default: u64) -> u64 {
        self.raw(name)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(default)
    }

    fn i64(&self, name: &str, default: i64) -> i64 {
        self.raw(name)
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(default)
    }

    fn usize(&self, name: &str, default: usize) -> usize {
        self.raw(name)
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(default)
    }

    fn f64(&self, name: &str, default: f64) -> f64 {
        self.raw(name)
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(default)
    }

    fn optional_i64(&self, name: &str) -> Option<i64> {
        self.raw(name).and_then(|value| value.parse::<i64>().ok())
    }
}

fn parse_offer(tag: String, entry: &str) -> Result<Offer> {
    let (qty, price) = entry
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid offer entry '{entry}', expected credits:price"))?;
    let qty = qty
        .trim()
        .parse::<i64>()
        .map_err(|_| anyhow!("Invalid credit count in offer entry '{entry}'"))?;
    let price = price
        .trim()
        .parse::<i64>()
        .map_err(|_| anyhow!("Invalid price in offer entry '{entry}'"))?;
    if qty <= 0 || price <= 0 {
        return Err(anyhow!("Offer entry '{entry}' must be positive"));
    }
    Ok(Offer { tag, qty, price })
}

pub fn parse_price_table(value: &str) -> Result<Vec<Offer>> {
    let mut offers = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let qty = entry.split(':').next().unwrap_or_default().trim();
        let offer = parse_offer(format!("t{qty}"), entry)?;
        if offers.iter().any(|existing: &Offer| existing.tag == offer.tag) {
            return Err(anyhow!("Duplicate tariff for {} credits", offer.qty));
        }
        offers.push(offer);
    }
    if offers.is_empty() {
        return Err(anyhow!("PRICE_TABLE must contain at least one tariff"));
    }
    Ok(offers)
}

fn trim_base_url(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let data_dir = PathBuf::from(vars.string("DATA_DIR", "./data"));
        let default_database_url = format!("sqlite://{}/photofly.db", data_dir.display());
        let bind_addr = vars
            .raw("BIND_ADDR")
            .unwrap_or_else(|| format!("0.0.0.0:{}", vars.u64("PORT", 8080)));
        let public_base_url = vars
            .raw("PUBLIC_BASE_URL")
            .or_else(|| vars.raw("PUBLIC_URL"))
            .map(trim_base_url)
            .unwrap_or_default();

        let tariffs = parse_price_table(&vars.string("PRICE_TABLE", "20:429,40:590,70:719"))?;
        // An explicitly empty FLASH_OFFER disables the offer.
        let flash_offer = match vars.present("FLASH_OFFER") {
            Some(value) if value.is_empty() || value.eq_ignore_ascii_case("off") => None,
            Some(value) => Some(parse_offer(FLASH_OFFER_TAG.to_string(), &value)?),
            None => Some(parse_offer(FLASH_OFFER_TAG.to_string(), "50:379")?),
        };

        Ok(Config {
            bot_token: vars.string("BOT_TOKEN", ""),
            bot_username: vars.string("BOT_USERNAME", "").trim_start_matches('@').to_string(),
            public_base_url,
            webhook_secret: vars.string("WEBHOOK_SECRET", "hook"),
            bind_addr,
            database_url: vars.string("DATABASE_URL", &default_database_url),
            data_dir,
            log_level: vars.string("LOG_LEVEL", "info").to_lowercase(),
            replicate_api_token: vars.string("REPLICATE_API_TOKEN", ""),
            replicate_base_url: trim_base_url(
                vars.string("REPLICATE_BASE_URL", "https://api.replicate.com"),
            ),
            replicate_trainer_version: vars
                .string("REPLICATE_TRAINER_VERSION", DEFAULT_TRAINER_VERSION),
            replicate_destination: vars.string("REPLICATE_DESTINATION", ""),
            train_steps: vars.u64("TRAIN_STEPS", 800),
            replicate_base_model: vars
                .string("REPLICATE_BASE_MODEL", "black-forest-labs/flux-schnell"),
            yookassa_shop_id: vars.string("YOOKASSA_SHOP_ID", ""),
            yookassa_secret_key: vars.string("YOOKASSA_SECRET_KEY", ""),
            yookassa_base_url: trim_base_url(
                vars.string("YOOKASSA_BASE_URL", "https://api.yookassa.ru/v3"),
            ),
            payment_return_url: vars.string("PAYMENT_RETURN_URL", ""),
            payment_currency: vars.string("PAYMENT_CURRENCY", "RUB").to_uppercase(),
            tariffs,
            flash_offer,
            flash_offer_delay_hours: vars.u64("FLASH_OFFER_DELAY_HOURS", 24),
            generation_cost: vars.i64("GENERATION_COST", 3).max(1),
            images_per_generation: vars.usize("IMAGES_PER_GENERATION", 3).clamp(1, 10),
            min_training_photos: vars.usize("MIN_TRAINING_PHOTOS", 10).max(1),
            max_photos_per_user: vars.usize("MAX_PHOTOS_PER_USER", 50).max(1),
            referral_percent: vars.f64("REFERRAL_PERCENT", 20.0),
            referral_discount_percent: vars.f64("REFERRAL_DISCOUNT_PERCENT", 10.0),
            payout_minimum: vars.i64("PAYOUT_MINIMUM", 500),
            prediction_poll_interval_ms: vars.u64("PREDICTION_POLL_INTERVAL_MS", 2000),
            prediction_max_polls: vars.usize("PREDICTION_MAX_POLLS", 90).max(1),
            training_poll_interval_seconds: vars.u64("TRAINING_POLL_INTERVAL_SECONDS", 20).max(1),
            training_max_polls: vars.i64("TRAINING_MAX_POLLS", 540).max(1),
            worker_tick_seconds: vars.u64("WORKER_TICK_SECONDS", 10).max(1),
            archive_retention_hours: vars.u64("ARCHIVE_RETENTION_HOURS", 48).max(1),
            http_timeout_seconds: vars.u64("HTTP_TIMEOUT_SECONDS", 60).max(1),
            generation_cooldown_seconds: vars.u64("GENERATION_COOLDOWN_SECONDS", 5),
            admin_chat_id: vars.optional_i64("ADMIN_CHAT_ID"),
            support_username: vars
                .string("SUPPORT_USERNAME", "photofly_ai")
                .trim_start_matches('@')
                .to_string(),
            examples_channel: vars
                .string("EXAMPLES_CHANNEL", "PhotoFly_Examples")
                .trim_start_matches('@')
                .to_string(),
        })
    }

    pub fn webhook_enabled(&self) -> bool {
        !self.public_base_url.is_empty()
    }

    pub fn webhook_url(&self) -> String {
        format!("{}/webhook/{}", self.public_base_url, self.webhook_secret)
    }

    pub fn photos_dir(&self) -> PathBuf {
        self.data_dir.join("photos")
    }

    pub fn public_dir(&self) -> PathBuf {
        self.data_dir.join("public")
    }

    /// Looks up a tariff or the flash offer by its callback tag.
    pub fn offer(&self, tag: &str) -> Option<&Offer> {
        self.tariffs
            .iter()
            .chain(self.flash_offer.iter())
            .find(|offer| offer.tag == tag)
    }

    pub fn payment_return_url(&self, bot_username: &str) -> String {
        if !self.payment_return_url.is_empty() {
            return self.payment_return_url.clone();
        }
        format!("https://t.me/{bot_username}")
    }
}

/// Returns the credential or a configuration error naming the variable.
pub fn require<'a>(value: &'a str, name: &str) -> Result<&'a str, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Configuration(format!("{name} is not set")));
    }
    Ok(value)
}

/// Referral buyers pay `round(price * (100 - discount) / 100)`.
pub fn discounted_price(price: i64, discount_percent: f64) -> i64 {
    let factor = (100.0 - discount_percent).clamp(0.0, 100.0) / 100.0;
    (price as f64 * factor).round() as i64
}

#[cfg(test)]
pub(crate) fn test_config(overrides: &[(&str, &str)]) -> Config {
    let map = overrides
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect::<std::collections::HashMap<_, _>>();
    Config::from_lookup(|name| map.get(name).cloned()).expect("test config")
}

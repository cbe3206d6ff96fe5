use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::Config;
use crate::db::database::Database;
use crate::handlers::access::Cooldowns;
use crate::providers::replicate::ReplicateClient;
use crate::providers::yookassa::YooKassaClient;
use crate::services::generation::GenerationService;
use crate::services::payments::PaymentService;
use crate::services::training::TrainingService;
use crate::storage::PhotoStore;
use crate::utils::http::build_http_client;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub photos: PhotoStore,
    pub training: TrainingService,
    pub generation: GenerationService,
    pub payments: PaymentService,
    pub bot_username: String,
    pub generation_cooldowns: Arc<Cooldowns>,
}

impl AppState {
    pub fn new(config: Config, db: Database, bot_username: &str) -> Result<Self> {
        let config = Arc::new(config);
        let http = build_http_client(config.http_timeout_seconds)?;
        let replicate = ReplicateClient::new(
            http.clone(),
            &config.replicate_base_url,
            &config.replicate_api_token,
        );
        let yookassa = YooKassaClient::new(
            http,
            &config.yookassa_base_url,
            &config.yookassa_shop_id,
            &config.yookassa_secret_key,
        );
        let photos = PhotoStore::new(&config);

        Ok(AppState {
            training: TrainingService::new(
                config.clone(),
                db.clone(),
                photos.clone(),
                replicate.clone(),
            ),
            generation: GenerationService::new(config.clone(), db.clone(), replicate),
            payments: PaymentService::new(config.clone(), db.clone(), yookassa, bot_username),
            generation_cooldowns: Arc::new(Cooldowns::new(Duration::from_secs(
                config.generation_cooldown_seconds,
            ))),
            bot_username: bot_username.to_string(),
            photos,
            db,
            config,
        })
    }

    pub fn referral_link(&self, ref_code: &str) -> String {
        format!("https://t.me/{}?start={}", self.bot_username, ref_code)
    }
}

use std::error::Error;

use dotenvy::dotenv;
use teloxide::prelude::*;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use url::Url;

mod api;
mod catalog;
mod config;
mod db;
mod error;
mod handlers;
mod providers;
mod services;
mod state;
mod storage;
mod utils;
mod workers;

use config::Config;
use db::database::Database;
use handlers::{dispatch_update, HandlerResult};
use state::AppState;
use utils::logging::init_logging;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

async fn handle_update(bot: Bot, state: AppState, update: Update) -> HandlerResult {
    dispatch_update(bot, state, update).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    let config = Config::from_env()?;
    let _guards = init_logging(&config.log_level);

    if config.bot_token.trim().is_empty() {
        return Err("BOT_TOKEN is required".into());
    }
    std::fs::create_dir_all(&config.data_dir)?;

    let bot = Bot::new(config.bot_token.clone());
    let bot_username = if config.bot_username.is_empty() {
        let me = bot.get_me().await?;
        me.username().to_string()
    } else {
        config.bot_username.clone()
    };
    info!("Starting PhotoFly bot as @{bot_username}");

    let db = Database::init(&config.database_url).await?;
    let state = AppState::new(config, db, &bot_username)?;
    let config = state.config.clone();

    workers::spawn_workers(bot.clone(), state.clone());

    let router = api::router(api::ApiState {
        app: state.clone(),
        bot: bot.clone(),
    });
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("HTTP API listening on {}", config.bind_addr);

    if config.webhook_enabled() {
        let webhook_url = Url::parse(&config.webhook_url())?;
        bot.set_webhook(webhook_url).await?;
        info!("Webhook registered under {}/webhook/", config.public_base_url);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        return Ok(());
    }

    if let Err(err) = bot.delete_webhook().await {
        warn!("delete_webhook failed: {err}");
    }
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!("HTTP server failed: {err}");
        }
    });

    info!("Long polling for updates");
    Dispatcher::builder(bot, dptree::endpoint(handle_update))
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    server.abort();
    Ok(())
}

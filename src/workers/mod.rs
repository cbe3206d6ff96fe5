pub mod offers;
pub mod payments;
pub mod training;

use std::future::Future;
use std::time::Duration;

use teloxide::Bot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::state::AppState;

const ARCHIVE_SWEEP_PERIOD: Duration = Duration::from_secs(3600);

/// Starts the background loops. They keep no state of their own, so a
/// restart picks up wherever the store says they were.
pub fn spawn_workers(bot: Bot, state: AppState) {
    let tick = Duration::from_secs(state.config.worker_tick_seconds.max(1));
    info!("Starting background workers, tick {:?}", tick);

    spawn_loop("training", tick, {
        let (bot, state) = (bot.clone(), state.clone());
        move || training::run_once(bot.clone(), state.clone())
    });
    spawn_loop("archives", ARCHIVE_SWEEP_PERIOD, {
        let state = state.clone();
        move || training::prune_archives(state.clone())
    });
    spawn_loop("payments", tick, {
        let (bot, state) = (bot.clone(), state.clone());
        move || payments::run_once(bot.clone(), state.clone())
    });
    if state.config.flash_offer.is_some() {
        spawn_loop("flash_offer", tick, move || {
            offers::run_once(bot.clone(), state.clone())
        });
    }
}

fn spawn_loop<F, Fut>(name: &'static str, tick: Duration, mut run: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match run().await {
                Ok(0) => {}
                Ok(handled) => debug!("{name} worker handled {handled} item(s)"),
                Err(err) => error!("{name} worker failed: {err}"),
            }
        }
    });
}

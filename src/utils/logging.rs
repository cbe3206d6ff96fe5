use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Flush guards of the non-blocking file writers; keep alive for the whole run.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

fn general_targets(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level)
        .with_target("bot.timing", LevelFilter::OFF)
        .with_target("hyper", LevelFilter::WARN)
        .with_target("hyper_util", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
        .with_target("sqlx", LevelFilter::WARN)
        .with_target("teloxide", LevelFilter::WARN)
}

fn rolling_writer(
    logs_dir: &Path,
    file_name: &str,
    guards: &mut Vec<WorkerGuard>,
) -> NonBlocking {
    let appender = tracing_appender::rolling::daily(logs_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    writer
}

/// Stdout plus daily files under `logs/`: text and JSON copies of the
/// general log, and separate sinks for the `bot.timing` target.
pub fn init_logging(log_level: &str) -> LoggingGuards {
    let logs_dir = Path::new("logs");
    if let Err(err) = fs::create_dir_all(logs_dir) {
        eprintln!("Failed to create logs directory: {err}");
    }

    let mut guards = Vec::with_capacity(4);
    let general_filter = general_targets(parse_log_level(log_level));
    let timing_filter = Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target("bot.timing", LevelFilter::INFO);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(general_filter.clone());
    let general_layer = tracing_subscriber::fmt::layer()
        .with_writer(rolling_writer(logs_dir, "bot.log", &mut guards))
        .with_ansi(false)
        .with_filter(general_filter.clone());
    let general_json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(rolling_writer(logs_dir, "bot.jsonl", &mut guards))
        .with_filter(general_filter);
    let timing_layer = tracing_subscriber::fmt::layer()
        .with_writer(rolling_writer(logs_dir, "timing.log", &mut guards))
        .with_ansi(false)
        .with_filter(timing_filter.clone());
    let timing_json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(rolling_writer(logs_dir, "timing.jsonl", &mut guards))
        .with_filter(timing_filter);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(general_layer)
        .with(general_json_layer)
        .with(timing_layer)
        .with(timing_json_layer)
        .init();

    LoggingGuards { _guards: guards }
}

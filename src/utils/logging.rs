use env_logger::{Builder, Target};
use log::{Level, LevelFilter, SetLoggerError};
use std::env;
use std::io::Write;
use std::time::Duration;

use crate::error::SyncError;
use crate::models::ChangeKind;

fn parse_level(value: &str) -> LevelFilter {
    match value.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

pub fn init_logging() -> Result<(), SetLoggerError> {
    let log_level = parse_level(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));

    let mut builder = Builder::from_default_env();

    builder.format(|buf, record| {
        let timestamp = buf.timestamp();
        let target = record.target();
        let file = record.file().unwrap_or("unknown");
        let line = record.line().unwrap_or(0);

        match record.level() {
            Level::Info => writeln!(buf, "{} [INFO] [{}]: {}", timestamp, target, record.args()),
            level => writeln!(
                buf,
                "{} [{}] [{}:{}] {}: {}",
                timestamp,
                level.as_str(),
                file,
                line,
                target,
                record.args()
            ),
        }
    });

    // Backends are chatty at debug level
    if env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string()) == "production" {
        builder.filter_module("reqwest", LevelFilter::Warn);
        builder.filter_module("hyper", LevelFilter::Warn);
        builder.filter_module("tokio", LevelFilter::Info);
        builder.filter_module("sqlx", LevelFilter::Warn);
    }

    builder.filter_level(log_level).target(Target::Stdout).try_init()
}

pub fn log_error_with_context(error: &SyncError, context: &str) {
    log::error!("[{}] {}", context, error);

    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        log::error!("  Caused by: {}", err);
        source = err.source();
    }
}

pub fn log_mutation(table: &str, operation: &str, id: &str, elapsed: Duration) {
    log::debug!("[Sync] {} {} on {} settled in {}ms", operation, id, table, elapsed.as_millis());
}

pub fn log_change_event(table: &str, kind: ChangeKind, id: &str, applied: bool) {
    if applied {
        log::debug!("[Stream] {} {} merged into {}", kind.as_str(), id, table);
    } else {
        log::trace!("[Stream] {} {} on {} was a no-op", kind.as_str(), id, table);
    }
}

pub fn log_initial_load(table: &str, owner_id: &str, count: usize, elapsed: Duration) {
    log::info!(
        "[Sync] Loaded {} rows from {} for owner '{}' in {}ms",
        count,
        table,
        owner_id,
        elapsed.as_millis()
    );
}

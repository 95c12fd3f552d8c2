use std::collections::BTreeSet;
use std::env::VarError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::app_config::{AppConfig, Environment};
use crate::engine_config::EngineConfig;
use crate::platform::Platform;
use crate::ConfigError;

/// Load service configuration from the environment.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if values are unparseable or the engine settings fail
/// validation.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load service configuration from variables already in the process.
///
/// # Errors
///
/// Returns `ConfigError` if values are unparseable or invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Load only the engine tunables from the process environment.
///
/// # Errors
///
/// Returns `ConfigError` if values are unparseable or invalid.
pub fn load_engine_config_from_env() -> Result<EngineConfig, ConfigError> {
    build_engine_config(&|key| std::env::var(key))
}

fn parse_var<T, F>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Result<String, VarError>,
{
    match lookup(var) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let or_default =
        |var: &str, default: &str| -> String { lookup(var).unwrap_or_else(|_| default.to_string()) };

    let env = parse_environment(&or_default("TRENDSCOPE_ENV", "development"))?;
    let bind_addr = parse_var(
        &lookup,
        "TRENDSCOPE_BIND_ADDR",
        SocketAddr::from(([0, 0, 0, 0], 3000)),
    )?;
    let log_level = or_default("TRENDSCOPE_LOG_LEVEL", "info");
    let database_url = lookup("DATABASE_URL").ok().filter(|s| !s.trim().is_empty());
    let api_keys = lookup("TRENDSCOPE_API_KEYS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect();

    let db_max_connections = parse_var(&lookup, "TRENDSCOPE_DB_MAX_CONNECTIONS", 10u32)?;
    let store_max_retries = parse_var(&lookup, "TRENDSCOPE_STORE_MAX_RETRIES", 5u32)?;
    let store_retry_backoff_base_ms =
        parse_var(&lookup, "TRENDSCOPE_STORE_RETRY_BACKOFF_BASE_MS", 500u64)?;

    let engine = build_engine_config(&lookup)?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        api_keys,
        db_max_connections,
        store_max_retries,
        store_retry_backoff_base_ms,
        engine,
    })
}

/// Build and validate [`EngineConfig`] from `TRENDSCOPE_*` variables, taking
/// defaults for anything unset.
fn build_engine_config<F>(lookup: &F) -> Result<EngineConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let d = EngineConfig::default();
    let mut cfg = EngineConfig {
        bot_score_threshold: parse_var(lookup, "TRENDSCOPE_BOT_SCORE_THRESHOLD", d.bot_score_threshold)?,
        queue_capacity: parse_var(lookup, "TRENDSCOPE_QUEUE_CAPACITY", d.queue_capacity)?,
        signal_queue_capacity: parse_var(
            lookup,
            "TRENDSCOPE_SIGNAL_QUEUE_CAPACITY",
            d.signal_queue_capacity,
        )?,
        backpressure: parse_var(lookup, "TRENDSCOPE_BACKPRESSURE", d.backpressure)?,
        window_secs: parse_var(lookup, "TRENDSCOPE_WINDOW_SECS", d.window_secs)?,
        window_capacity: parse_var(lookup, "TRENDSCOPE_WINDOW_CAPACITY", d.window_capacity)?,
        ema_alpha: parse_var(lookup, "TRENDSCOPE_EMA_ALPHA", d.ema_alpha)?,
        stale_after_secs: parse_var(lookup, "TRENDSCOPE_STALE_AFTER_SECS", d.stale_after_secs)?,
        merge_threshold: parse_var(lookup, "TRENDSCOPE_MERGE_THRESHOLD", d.merge_threshold)?,
        temporal_window_secs: parse_var(
            lookup,
            "TRENDSCOPE_TEMPORAL_WINDOW_SECS",
            d.temporal_window_secs,
        )?,
        cycle_interval_secs: parse_var(
            lookup,
            "TRENDSCOPE_CYCLE_INTERVAL_SECS",
            d.cycle_interval_secs,
        )?,
        emerging_percentile: parse_var(
            lookup,
            "TRENDSCOPE_EMERGING_PERCENTILE",
            d.emerging_percentile,
        )?,
        trending_cycles: parse_var(lookup, "TRENDSCOPE_TRENDING_CYCLES", d.trending_cycles)?,
        peak_confirm_cycles: parse_var(
            lookup,
            "TRENDSCOPE_PEAK_CONFIRM_CYCLES",
            d.peak_confirm_cycles,
        )?,
        declining_cycles: parse_var(lookup, "TRENDSCOPE_DECLINING_CYCLES", d.declining_cycles)?,
        cooldown_secs: parse_var(lookup, "TRENDSCOPE_COOLDOWN_SECS", d.cooldown_secs)?,
        max_trend_age_secs: parse_var(
            lookup,
            "TRENDSCOPE_MAX_TREND_AGE_SECS",
            d.max_trend_age_secs,
        )?,
        ..d.clone()
    };

    cfg.metric_weights.likes = parse_var(lookup, "TRENDSCOPE_WEIGHT_LIKES", d.metric_weights.likes)?;
    cfg.metric_weights.shares =
        parse_var(lookup, "TRENDSCOPE_WEIGHT_SHARES", d.metric_weights.shares)?;
    cfg.metric_weights.comments =
        parse_var(lookup, "TRENDSCOPE_WEIGHT_COMMENTS", d.metric_weights.comments)?;
    cfg.metric_weights.views = parse_var(lookup, "TRENDSCOPE_WEIGHT_VIEWS", d.metric_weights.views)?;

    cfg.similarity.tags = parse_var(lookup, "TRENDSCOPE_SIMILARITY_TAGS", d.similarity.tags)?;
    cfg.similarity.shingles =
        parse_var(lookup, "TRENDSCOPE_SIMILARITY_SHINGLES", d.similarity.shingles)?;
    cfg.similarity.temporal =
        parse_var(lookup, "TRENDSCOPE_SIMILARITY_TEMPORAL", d.similarity.temporal)?;

    cfg.virality.velocity = parse_var(lookup, "TRENDSCOPE_VIRALITY_VELOCITY", d.virality.velocity)?;
    cfg.virality.spread = parse_var(lookup, "TRENDSCOPE_VIRALITY_SPREAD", d.virality.spread)?;
    cfg.virality.influence =
        parse_var(lookup, "TRENDSCOPE_VIRALITY_INFLUENCE", d.virality.influence)?;
    cfg.virality.pattern = parse_var(lookup, "TRENDSCOPE_VIRALITY_PATTERN", d.virality.pattern)?;

    cfg.crisis_bands.watch = parse_var(lookup, "TRENDSCOPE_CRISIS_WATCH", d.crisis_bands.watch)?;
    cfg.crisis_bands.warning =
        parse_var(lookup, "TRENDSCOPE_CRISIS_WARNING", d.crisis_bands.warning)?;
    cfg.crisis_bands.critical =
        parse_var(lookup, "TRENDSCOPE_CRISIS_CRITICAL", d.crisis_bands.critical)?;

    for platform in Platform::ALL {
        let var = format!(
            "TRENDSCOPE_VOLUME_THRESHOLD_{}",
            platform.as_str().to_ascii_uppercase()
        );
        let threshold = parse_var(lookup, &var, cfg.volume_threshold(platform))?;
        cfg.volume_thresholds.insert(platform, threshold);
    }

    if let Ok(raw) = lookup("TRENDSCOPE_BRANDED_KEYWORDS") {
        cfg.branded_keywords = raw
            .split(',')
            .map(|k| k.trim().trim_start_matches('#').to_lowercase())
            .filter(|k| !k.is_empty())
            .collect::<BTreeSet<_>>();
    }
    cfg.pattern_library_path = lookup("TRENDSCOPE_PATTERN_LIBRARY_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);

    cfg.validate()?;
    Ok(cfg)
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnvVar`] for unrecognized values.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "TRENDSCOPE_ENV".to_string(),
            reason: format!("expected development, test, or production; got \"{other}\""),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

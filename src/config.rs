//! Configuration loader: merges config.toml, .env file, and env vars.

use common::config::AppConfig;
use common::Error;
use std::path::Path;

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn validate_config(config: &AppConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.cache.ttl_minutes == 0 {
        issues.push("cache.ttl_minutes must be > 0".into());
    }

    let url = config.source.url.trim();
    if url.is_empty() {
        issues.push("source.url must not be empty".into());
    } else if !(url.starts_with("http://") || url.starts_with("https://")) {
        issues.push("source.url must be an http(s) URL".into());
    }
    if config.source.user_agent.trim().is_empty() {
        issues.push("source.user_agent must not be empty".into());
    }
    if config.source.page_ready_timeout_secs == 0 {
        issues.push("source.page_ready_timeout_secs must be > 0".into());
    }
    if config.source.page_poll_interval_secs == 0 {
        issues.push("source.page_poll_interval_secs must be > 0".into());
    }
    if config.source.request_timeout_secs == 0 {
        issues.push("source.request_timeout_secs must be > 0".into());
    }
    if config.source.page_poll_interval_secs > config.source.page_ready_timeout_secs {
        issues.push(
            "source.page_poll_interval_secs must be <= source.page_ready_timeout_secs".into(),
        );
    }

    if config.server.poll_interval_secs == 0 {
        issues.push("server.poll_interval_secs must be > 0".into());
    }
    if config.server.snapshot_path.as_os_str().is_empty() {
        issues.push("server.snapshot_path must not be empty".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply environment overrides (highest priority). `var` looks up one
/// variable.
fn apply_env_overrides<F>(config: &mut AppConfig, var: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = var("CACHE_TTL_MIN") {
        config.cache.ttl_minutes = parse_positive_u64(&raw, "CACHE_TTL_MIN")?;
    }
    if let Some(url) = var("STANDINGS_URL").and_then(non_empty) {
        config.source.url = url;
    }
    if let Some(referer) = var("STANDINGS_REFERER").and_then(non_empty) {
        config.source.referer = referer;
    }
    if let Some(ua) = var("STANDINGS_USER_AGENT").and_then(non_empty) {
        config.source.user_agent = ua;
    }
    if let Some(raw) = var("STANDINGS_READY_TIMEOUT_SECS") {
        config.source.page_ready_timeout_secs =
            parse_positive_u64(&raw, "STANDINGS_READY_TIMEOUT_SECS")?;
    }
    if let Some(raw) = var("STANDINGS_POLL_SECS") {
        config.server.poll_interval_secs = parse_positive_u64(&raw, "STANDINGS_POLL_SECS")?;
    }
    if let Some(path) = var("SNAPSHOT_PATH").and_then(non_empty) {
        config.server.snapshot_path = path.into();
    }
    Ok(())
}

/// Load server configuration from an optional config file and environment.
pub fn load_config(config_path: &Path) -> Result<AppConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = AppConfig::default();

    // 3. Try loading the config file if it exists.
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
    }

    // 4. Override with environment variables.
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;

    Ok(config)
}

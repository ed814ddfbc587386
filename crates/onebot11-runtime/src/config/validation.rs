//! Configuration validation utilities.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{AppConfig, BackpressureMode, BotEntry, LogOutput, ReconnectConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &AppConfig) -> ConfigResult<()> {
    validate_logging(config)?;
    validate_bots(&config.bots)?;
    Ok(())
}

fn validate_logging(config: &AppConfig) -> ConfigResult<()> {
    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

fn validate_bots(bots: &[BotEntry]) -> ConfigResult<()> {
    let mut seen_ids = HashSet::new();

    for bot in bots {
        if !seen_ids.insert(&bot.id) {
            return Err(ConfigError::DuplicateBotId(bot.id.clone()));
        }

        validate_bot(bot)?;
    }

    Ok(())
}

/// Validates a single bot entry.
fn validate_bot(bot: &BotEntry) -> ConfigResult<()> {
    if bot.id.is_empty() {
        return Err(ConfigError::missing_field("bots.id"));
    }

    if bot.id.contains(char::is_whitespace) {
        return Err(ConfigError::validation(format!(
            "Bot ID cannot contain whitespace: '{}'",
            bot.id
        )));
    }

    if bot.event_url.is_none() && bot.api_url.is_none() {
        return Err(ConfigError::validation(format!(
            "Bot '{}' needs an event_url or an api_url",
            bot.id
        )));
    }
    if let Some(url) = &bot.event_url {
        validate_url(url, &["ws://", "wss://"])?;
    }
    if let Some(url) = &bot.api_url {
        validate_url(url, &["http://", "https://"])?;
    }

    if bot.api_timeout_ms == 0 {
        return Err(ConfigError::validation("api_timeout_ms must be greater than 0"));
    }

    validate_reconnect(&bot.reconnect)?;

    if bot.heartbeat.missed_beats == 0 {
        return Err(ConfigError::validation("heartbeat.missed_beats must be at least 1"));
    }
    if bot.heartbeat.timeout_ms == Some(0) {
        return Err(ConfigError::validation("heartbeat.timeout_ms must be greater than 0"));
    }

    if bot.dispatch.queue_capacity == 0 {
        return Err(ConfigError::validation("dispatch.queue_capacity must be at least 1"));
    }
    if bot.dispatch.backpressure == BackpressureMode::Block && bot.dispatch.block_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "dispatch.block_timeout_ms must be greater than 0 with the block policy",
        ));
    }

    Ok(())
}

fn validate_reconnect(retry: &ReconnectConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}

/// Checks the scheme of a URL.
fn validate_url(url: &str, schemes: &[&str]) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("url"));
    }

    if !schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {schemes:?}"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LoggingConfig;

    fn config_with(bots: Vec<BotEntry>) -> AppConfig {
        AppConfig {
            logging: LoggingConfig::default(),
            bots,
        }
    }

    #[test]
    fn test_validate_empty_config() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_duplicate_bot_id() {
        let bot = BotEntry::websocket("test-bot", "ws://localhost:8080");
        let result = validate_config(&config_with(vec![bot.clone(), bot]));
        assert!(matches!(result, Err(ConfigError::DuplicateBotId(_))));
    }

    #[test]
    fn test_validate_url_schemes() {
        let ok = BotEntry::websocket("a", "wss://gateway.example");
        assert!(validate_config(&config_with(vec![ok])).is_ok());

        let wrong = BotEntry::websocket("b", "http://gateway.example");
        assert!(matches!(
            validate_config(&config_with(vec![wrong])),
            Err(ConfigError::InvalidUrl { .. })
        ));

        let wrong = BotEntry::http("c", "ws://gateway.example");
        assert!(matches!(
            validate_config(&config_with(vec![wrong])),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_validate_requires_a_url() {
        let mut bot = BotEntry::websocket("a", "ws://x");
        bot.event_url = None;
        assert!(matches!(
            validate_config(&config_with(vec![bot])),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_bounds() {
        let mut bot = BotEntry::websocket("a", "ws://x");
        bot.reconnect.max_delay_ms = 10;
        assert!(validate_config(&config_with(vec![bot])).is_err());

        let mut bot = BotEntry::websocket("a", "ws://x");
        bot.reconnect.backoff_multiplier = 0.5;
        assert!(validate_config(&config_with(vec![bot])).is_err());

        let mut bot = BotEntry::websocket("a", "ws://x");
        bot.dispatch.queue_capacity = 0;
        assert!(validate_config(&config_with(vec![bot])).is_err());

        let mut bot = BotEntry::websocket("a b", "ws://x");
        bot.heartbeat.missed_beats = 1;
        assert!(validate_config(&config_with(vec![bot])).is_err());
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = AppConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }
}

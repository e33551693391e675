//! Application configuration, loaded from the environment (and `.env`).

use rehearse_core::{CallSettings, CreditMeter};
use secrecy::SecretString;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Frames per callback requested from the microphone.
pub const INPUT_CHUNK_SIZE: usize = 1024;
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// How much agent speech the playback ring buffer can hold, in milliseconds.
pub const OUTPUT_LATENCY_MS: usize = 1000;

pub const DEFAULT_API_URL: &str = "http://localhost:7860";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub id_token: SecretString,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub convai_base_url: Option<String>,
    pub credit_rate_per_minute: u32,
    pub credit_grace: Duration,
    pub credit_poll: Duration,
    pub finalize_timeout: Duration,
    pub min_session: Duration,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `PRACTICE_API_URL`: (Optional) Scoring backend. Defaults to "http://localhost:7860".
    // *   `PRACTICE_ID_TOKEN`: Bearer token for the signed-in user. Required.
    // *   `PRACTICE_USER_ID` / `PRACTICE_DISPLAY_NAME`: (Optional) Identity shown to the agent.
    // *   `CONVAI_BASE_URL`: (Optional) Agent endpoint override.
    // *   `CREDIT_RATE_PER_MINUTE`, `CREDIT_GRACE_SECONDS`, `CREDIT_POLL_SECONDS`: Credit meter. Default 3 / 59 / 5.
    // *   `FINALIZE_TIMEOUT_SECONDS`, `MIN_SESSION_SECONDS`: Session save. Default 15 / 5.
    // *   `INPUT_DEVICE` / `OUTPUT_DEVICE`: (Optional) Audio device names.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let id_token = var("PRACTICE_ID_TOKEN")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("PRACTICE_ID_TOKEN".to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        let poll_seconds: u64 = parse_or(&var, "CREDIT_POLL_SECONDS", 5)?;
        if poll_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                var: "CREDIT_POLL_SECONDS".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Self {
            api_url: var("PRACTICE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            id_token,
            user_id: var("PRACTICE_USER_ID"),
            display_name: var("PRACTICE_DISPLAY_NAME"),
            convai_base_url: var("CONVAI_BASE_URL"),
            credit_rate_per_minute: parse_or(&var, "CREDIT_RATE_PER_MINUTE", 3)?,
            credit_grace: Duration::from_secs(parse_or(&var, "CREDIT_GRACE_SECONDS", 59)?),
            credit_poll: Duration::from_secs(poll_seconds),
            finalize_timeout: Duration::from_secs(parse_or(&var, "FINALIZE_TIMEOUT_SECONDS", 15)?),
            min_session: Duration::from_secs(parse_or(&var, "MIN_SESSION_SECONDS", 5)?),
            input_device: var("INPUT_DEVICE"),
            output_device: var("OUTPUT_DEVICE"),
            log_level,
        })
    }

    pub fn call_settings(&self) -> CallSettings {
        let meter = CreditMeter::new(
            self.credit_rate_per_minute,
            self.credit_grace,
            self.credit_poll,
        );
        CallSettings::default()
            .with_meter(meter)
            .with_min_start_balance(i64::from(self.credit_rate_per_minute))
            .with_finalize_timeout(self.finalize_timeout)
            .with_min_session_duration(self.min_session)
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: name.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let config = Config::from_lookup(lookup(&[("PRACTICE_ID_TOKEN", "tok")])).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.id_token.expose_secret(), "tok");
        assert_eq!(config.log_level, Level::INFO);

        let settings = config.call_settings();
        assert_eq!(*settings.meter(), CreditMeter::default());
        assert_eq!(settings.min_start_balance(), 3);
        assert_eq!(settings.finalize_timeout(), Duration::from_secs(15));
        assert_eq!(settings.min_session_duration(), Duration::from_secs(5));
    }

    #[test]
    fn token_is_required() {
        let err = Config::from_lookup(lookup(&[("PRACTICE_ID_TOKEN", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "PRACTICE_ID_TOKEN"));
    }

    #[test]
    fn numeric_overrides_are_validated() {
        let config = Config::from_lookup(lookup(&[
            ("PRACTICE_ID_TOKEN", "tok"),
            ("CREDIT_RATE_PER_MINUTE", "2"),
            ("CREDIT_GRACE_SECONDS", "0"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.credit_rate_per_minute, 2);
        assert_eq!(config.call_settings().meter().projected_credits(Duration::from_secs(61)), 4);
        assert_eq!(config.log_level, Level::DEBUG);

        let err = Config::from_lookup(lookup(&[
            ("PRACTICE_ID_TOKEN", "tok"),
            ("FINALIZE_TIMEOUT_SECONDS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "FINALIZE_TIMEOUT_SECONDS"));

        let err = Config::from_lookup(lookup(&[
            ("PRACTICE_ID_TOKEN", "tok"),
            ("CREDIT_POLL_SECONDS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}

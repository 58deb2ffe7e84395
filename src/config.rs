use {
    crate::{dispatcher::DEFAULT_EXPLORER_TX_URL, feed_core::{connection::DEFAULT_FEED_URL, SupervisorConfig}},
    std::{env, path::PathBuf, str::FromStr, time::Duration},
    thiserror::Error,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateSource {
    /// Live rates polled from Coinbase
    Coinbase,
    /// Built-in EUR/JPY table
    Fixed,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub onesignal_app_key: String,
    pub onesignal_app_id: String,
    pub addresses_path: PathBuf,
    pub speech_path: PathBuf,
    pub feed_url: String,
    pub explorer_tx_url: String,
    pub listen_addr: String,
    pub rate_source: RateSource,
    pub rate_poll_interval: Duration,
    /// Speech announcements are disabled when unset
    pub google_tts_api_key: Option<String>,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub dispatch_channel_buffer: usize,
    pub rust_log: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    ///
    /// Required: `ONESIGNAL_APP_KEY`, `ONESIGNAL_APP_ID`. Everything else has
    /// a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let onesignal_app_key = required("ONESIGNAL_APP_KEY")?;
        let onesignal_app_id = required("ONESIGNAL_APP_ID")?;

        let feed_url = or_default("FEED_URL", DEFAULT_FEED_URL);
        if !feed_url.starts_with("http://") && !feed_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "FEED_URL must start with http:// or https://".to_string(),
            ));
        }

        let rate_source = match or_default("RATE_SOURCE", "coinbase").to_lowercase().as_str() {
            "coinbase" => RateSource::Coinbase,
            "fixed" => RateSource::Fixed,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "RATE_SOURCE must be coinbase or fixed, got {}",
                    other
                )))
            }
        };

        let reconnect_initial_delay =
            Duration::from_millis(parse_or(&lookup, "RECONNECT_INITIAL_DELAY_MS", 1_000)?);
        let reconnect_max_delay = Duration::from_millis(parse_or(&lookup, "RECONNECT_MAX_DELAY_MS", 30_000)?);
        if reconnect_initial_delay.is_zero() || reconnect_max_delay < reconnect_initial_delay {
            return Err(ConfigError::InvalidValue(
                "reconnect delays must be positive with RECONNECT_MAX_DELAY_MS >= RECONNECT_INITIAL_DELAY_MS"
                    .to_string(),
            ));
        }

        let rate_poll_interval = Duration::from_secs(parse_or(&lookup, "RATE_POLL_INTERVAL_SECS", 100)?);
        if rate_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RATE_POLL_INTERVAL_SECS must be positive".to_string(),
            ));
        }

        let dispatch_channel_buffer: usize = parse_or(&lookup, "DISPATCH_CHANNEL_BUFFER", 1_000)?;
        if dispatch_channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "DISPATCH_CHANNEL_BUFFER must be positive".to_string(),
            ));
        }

        Ok(Self {
            onesignal_app_key,
            onesignal_app_id,
            addresses_path: PathBuf::from(or_default("ADDRESSES_PATH", "addresses.json")),
            speech_path: PathBuf::from(or_default("SPEECH_PATH", "speech")),
            feed_url,
            explorer_tx_url: or_default("EXPLORER_TX_URL", DEFAULT_EXPLORER_TX_URL),
            listen_addr: or_default("LISTEN_ADDR", "0.0.0.0:7010"),
            rate_source,
            rate_poll_interval,
            google_tts_api_key: lookup("GOOGLE_TTS_API_KEY").filter(|key| !key.trim().is_empty()),
            reconnect_initial_delay,
            reconnect_max_delay,
            dispatch_channel_buffer,
            rust_log: or_default("RUST_LOG", "info"),
        })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            initial_backoff: self.reconnect_initial_delay,
            max_backoff: self.reconnect_max_delay,
            channel_buffer: self.dispatch_channel_buffer,
            ..SupervisorConfig::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{} is not a valid number: {}", key, raw))),
    }
}

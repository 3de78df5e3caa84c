use crate::peer::types::{ServerConfig, SessionConfig};
use std::time::Duration;

// Default log filter: verbose while developing, quiet in release builds.
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "warn";

pub const ENV_PREFIX: &str = "RTC_CONSOLE_";

/// Driver settings. Timeouts bound each wait; `wait_retries` is how many
/// extra waits the driver grants a description before giving up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub description_timeout: Duration,
    pub candidates_timeout: Duration,
    pub connect_timeout: Duration,
    pub wait_retries: u32,
    pub channel_label: String,
    pub ice_servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            description_timeout: Duration::from_secs(1),
            candidates_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            wait_retries: 1,
            channel_label: "Hello".to_string(),
            ice_servers: Vec::new(),
        }
    }
}

impl Config {
    /// Defaults overridden by `RTC_CONSOLE_*` variables. Unparsable values
    /// keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        if let Some(v) = millis("DESCRIPTION_TIMEOUT_MS") {
            config.description_timeout = v;
        }
        if let Some(v) = millis("CANDIDATES_TIMEOUT_MS") {
            config.candidates_timeout = v;
        }
        if let Some(v) = millis("CONNECT_TIMEOUT_MS") {
            config.connect_timeout = v;
        }
        if let Some(v) = lookup("WAIT_RETRIES").and_then(|v| v.trim().parse().ok()) {
            config.wait_retries = v;
        }
        if let Some(label) = lookup("CHANNEL_LABEL").filter(|l| !l.trim().is_empty()) {
            config.channel_label = label.trim().to_string();
        }
        if let Some(list) = lookup("STUN") {
            config.ice_servers = list
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(ServerConfig::stun)
                .collect();
        }
        config
    }

    pub fn session(&self, name: &str) -> SessionConfig {
        SessionConfig {
            name: name.to_string(),
            ice_servers: self.ice_servers.clone(),
        }
    }
}

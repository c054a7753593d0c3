//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so an embedding application can start the
//! client with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Database file.
    /// Env: `SOFA_DB_PATH`
    /// Default: `sofa.db` in the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Period of the confirmation polling loop.
    /// Env: `SOFA_POLL_INTERVAL_MS`
    /// Default: `5000`
    pub poll_interval: Duration,

    /// Maximum number of delivery tasks executing at once, across all
    /// recipients.
    /// Env: `SOFA_WORKER_POOL`
    /// Default: `4`
    pub worker_pool: usize,

    /// Check the wallet balance before signing a direct send.
    /// Env: `SOFA_CHECK_BALANCE` (true/false)
    /// Default: `true`
    pub check_balance: bool,

    /// Look up the wallet's address history when it is unlocked, to pick
    /// up payments that arrived while the client was offline.
    /// Env: `SOFA_HISTORY_CATCHUP` (true/false)
    /// Default: `true`
    pub history_catchup: bool,

    /// Language announced to peers in Init replies.
    /// Env: `SOFA_LANGUAGE`
    /// Default: `en`
    pub language: String,

    /// How long a tracked hash may stay unknown to the network before its
    /// message is marked failed and tracking stops.
    /// Env: `SOFA_UNKNOWN_TX_GRACE_SECS`
    /// Default: `600`
    pub unknown_tx_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            poll_interval: Duration::from_millis(5000),
            worker_pool: 4,
            check_balance: true,
            history_catchup: true,
            language: sofa_shared::constants::DEFAULT_LANGUAGE.to_string(),
            unknown_tx_grace: Duration::from_secs(600),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SOFA_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(value) = std::env::var("SOFA_POLL_INTERVAL_MS") {
            match value.parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval = Duration::from_millis(ms),
                _ => tracing::warn!(value = %value, "Invalid SOFA_POLL_INTERVAL_MS, using default"),
            }
        }

        if let Ok(value) = std::env::var("SOFA_WORKER_POOL") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => config.worker_pool = n,
                _ => tracing::warn!(value = %value, "Invalid SOFA_WORKER_POOL, using default"),
            }
        }

        if let Ok(value) = std::env::var("SOFA_CHECK_BALANCE") {
            match parse_bool(&value) {
                Some(flag) => config.check_balance = flag,
                None => tracing::warn!(value = %value, "Invalid SOFA_CHECK_BALANCE, using default"),
            }
        }

        if let Ok(value) = std::env::var("SOFA_HISTORY_CATCHUP") {
            match parse_bool(&value) {
                Some(flag) => config.history_catchup = flag,
                None => {
                    tracing::warn!(value = %value, "Invalid SOFA_HISTORY_CATCHUP, using default")
                }
            }
        }

        if let Ok(language) = std::env::var("SOFA_LANGUAGE") {
            if language.trim().is_empty() {
                tracing::warn!("Empty SOFA_LANGUAGE, using default");
            } else {
                config.language = language;
            }
        }

        if let Ok(value) = std::env::var("SOFA_UNKNOWN_TX_GRACE_SECS") {
            match value.parse::<u64>() {
                Ok(secs) => config.unknown_tx_grace = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(value = %value, "Invalid SOFA_UNKNOWN_TX_GRACE_SECS, using default")
                }
            }
        }

        config
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.worker_pool, 4);
        assert!(config.check_balance);
        assert!(config.history_catchup);
        assert_eq!(config.language, "en");
        assert_eq!(config.unknown_tx_grace, Duration::from_secs(600));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}

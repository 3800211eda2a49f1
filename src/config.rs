use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    /// Requests lapse this long after submission
    #[serde(default = "default_expiry_window_secs")]
    pub expiry_window_secs: u64,

    /// Confirmations required when an account carries no override
    #[serde(default = "default_threshold")]
    pub default_threshold: u32,

    /// Transient effect failures retried at most this many times
    #[serde(default = "default_max_effect_retries")]
    pub max_effect_retries: u32,

    /// Base backoff between effect retries; doubles per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_expiry_window_secs() -> u64 {
    1800
}

fn default_threshold() -> u32 {
    2
}

fn default_max_effect_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiry_window_secs: default_expiry_window_secs(),
            default_threshold: default_threshold(),
            max_effect_retries: default_max_effect_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl EngineConfig {
    pub fn expiry_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expiry_window_secs as i64)
    }

    pub fn load_or_default(path: &str) -> Self {
        if std::path::Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => {
                        info!("Config loaded from {}", path);
                        c
                    }
                    Err(e) => {
                        warn!("Error parsing config: {}. Using defaults.", e);
                        Self::default()
                    }
                },
                Err(e) => {
                    warn!("Error reading config: {}. Using defaults.", e);
                    Self::default()
                }
            }
        } else {
            info!("Config file not found at '{}'. Creating default.", path);
            let config = Self::default();
            if let Ok(s) = toml::to_string_pretty(&config) {
                let _ = std::fs::write(path, s);
            }
            config
        }
    }
}

use std::env;
use std::time::Duration;

pub const DEFAULT_RECOGNITION_HOST: &str =
    "https://amp.shazam.com/discovery/v5/fr/FR/android/-/tag/";
pub const DEFAULT_IP_ECHO_URL: &str = "https://api.country.is";

/// Configuration for external tools, endpoints and timing
#[derive(Debug, Clone)]
pub struct Config {
    pub fingerprint_cmd: String,
    pub ffprobe_cmd: String,
    pub recognition_host: String,
    pub ip_echo_url: String,
    pub request_timeout: u64,
    pub probe_timeout: u64,
    pub autosave_interval: u64,
    pub tor_control: String,
    pub tor_password: Option<String>,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fingerprint_cmd: env::var("VIBRA_FINGERPRINT_CMD")
                .unwrap_or(defaults.fingerprint_cmd),
            ffprobe_cmd: env::var("VIBRA_FFPROBE").unwrap_or(defaults.ffprobe_cmd),
            recognition_host: env::var("VIBRA_RECOGNITION_HOST")
                .unwrap_or(defaults.recognition_host),
            ip_echo_url: env::var("VIBRA_IP_ECHO_URL").unwrap_or(defaults.ip_echo_url),
            request_timeout: env_secs("VIBRA_REQUEST_TIMEOUT", defaults.request_timeout),
            probe_timeout: env_secs("VIBRA_PROBE_TIMEOUT", defaults.probe_timeout),
            autosave_interval: env_secs("VIBRA_AUTOSAVE_INTERVAL", defaults.autosave_interval),
            tor_control: env::var("VIBRA_TOR_CONTROL").unwrap_or(defaults.tor_control),
            tor_password: env::var("VIBRA_TOR_PASSWORD")
                .ok()
                .filter(|p| !p.is_empty()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval.max(1))
    }
}

fn env_secs(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fingerprint_cmd: "vibra-fingerprint".to_string(),
            ffprobe_cmd: "ffprobe".to_string(),
            recognition_host: DEFAULT_RECOGNITION_HOST.to_string(),
            ip_echo_url: DEFAULT_IP_ECHO_URL.to_string(),
            request_timeout: 20,
            probe_timeout: 10,
            autosave_interval: 5,
            tor_control: "127.0.0.1:9051".to_string(),
            tor_password: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        env::remove_var("VIBRA_FINGERPRINT_CMD");
        env::remove_var("VIBRA_AUTOSAVE_INTERVAL");
        let config = Config::from_env();
        assert_eq!(config.fingerprint_cmd, "vibra-fingerprint");
        assert_eq!(config.autosave_interval(), Duration::from_secs(5));
        assert_eq!(config.recognition_host, DEFAULT_RECOGNITION_HOST);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        env::set_var("VIBRA_FINGERPRINT_CMD", "/opt/bin/fp");
        env::set_var("VIBRA_PROBE_TIMEOUT", "3");
        env::set_var("VIBRA_REQUEST_TIMEOUT", "not-a-number");
        let config = Config::from_env();
        env::remove_var("VIBRA_FINGERPRINT_CMD");
        env::remove_var("VIBRA_PROBE_TIMEOUT");
        env::remove_var("VIBRA_REQUEST_TIMEOUT");

        assert_eq!(config.fingerprint_cmd, "/opt/bin/fp");
        assert_eq!(config.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.request_timeout, 20);
    }
}

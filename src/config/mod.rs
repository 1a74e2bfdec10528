//! Configuration management for voxline
//!
//! Priority: CLI flags > environment > TOML file > defaults. CLI overrides
//! are applied by the binary after [`Config::load`].

pub mod file;

use std::time::Duration;

use serde::Serialize;

use self::file::ConfigFile;
use crate::playback::{DEFAULT_LOOKAHEAD, DEFAULT_OUTPUT_RATE, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::{Error, Result};

/// Default response server
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5001";

/// Default query endpoint
pub const DEFAULT_ENDPOINT: &str = "/process";

/// Lowest accepted output rate in Hz
pub const MIN_OUTPUT_RATE: u32 = MIN_SAMPLE_RATE;

/// Highest accepted output rate in Hz
pub const MAX_OUTPUT_RATE: u32 = MAX_SAMPLE_RATE;

/// voxline configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Response server
    pub server: ServerConfig,

    /// Decoding and output
    pub playback: PlaybackConfig,

    /// Transcript capture
    pub capture: CaptureConfig,
}

/// Response server configuration
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// Base URL, no trailing slash needed
    pub url: String,

    /// Query endpoint path
    pub endpoint: String,

    /// How long to wait for the connection to open
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
}

impl ServerConfig {
    /// Full URL queries are sent to
    #[must_use]
    pub fn query_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let endpoint = self.endpoint.trim_start_matches('/');
        format!("{base}/{endpoint}")
    }
}

/// Playback configuration
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackConfig {
    /// Chunks decoded ahead of the cursor
    pub lookahead: usize,

    /// Output sample rate in Hz
    pub output_rate: u32,

    /// Play a short silent buffer at startup to warm the device
    pub prime_output: bool,
}

/// Transcript capture configuration
#[derive(Debug, Clone, Serialize)]
pub struct CaptureConfig {
    /// Minimum time between accepted transcripts
    #[serde(with = "millis")]
    pub debounce: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                url: DEFAULT_SERVER_URL.to_string(),
                endpoint: DEFAULT_ENDPOINT.to_string(),
                connect_timeout: Duration::from_secs(10),
            },
            playback: PlaybackConfig {
                lookahead: DEFAULT_LOOKAHEAD,
                output_rate: DEFAULT_OUTPUT_RATE,
                prime_output: true,
            },
            capture: CaptureConfig {
                debounce: Duration::from_secs(1),
            },
        }
    }
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting is present but invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a setting is present but invalid
    pub fn from_sources(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let default = Self::default();

        let server = ServerConfig {
            url: env("VOXLINE_SERVER_URL")
                .or(fc.server.url)
                .unwrap_or(default.server.url),
            endpoint: env("VOXLINE_ENDPOINT")
                .or(fc.server.endpoint)
                .unwrap_or(default.server.endpoint),
            connect_timeout: parse_env(&env, "VOXLINE_CONNECT_TIMEOUT_MS")?
                .or(fc.server.connect_timeout_ms)
                .map_or(default.server.connect_timeout, Duration::from_millis),
        };

        let playback = PlaybackConfig {
            lookahead: parse_env(&env, "VOXLINE_LOOKAHEAD")?
                .or(fc.playback.lookahead)
                .unwrap_or(default.playback.lookahead),
            output_rate: parse_env(&env, "VOXLINE_OUTPUT_RATE")?
                .or(fc.playback.output_rate)
                .unwrap_or(default.playback.output_rate),
            prime_output: env("VOXLINE_PRIME_OUTPUT")
                .map(|s| parse_bool("VOXLINE_PRIME_OUTPUT", &s))
                .transpose()?
                .or(fc.playback.prime_output)
                .unwrap_or(default.playback.prime_output),
        };

        let capture = CaptureConfig {
            debounce: parse_env(&env, "VOXLINE_DEBOUNCE_MS")?
                .or(fc.capture.debounce_ms)
                .map_or(default.capture.debounce, Duration::from_millis),
        };

        let config = Self {
            server,
            playback,
            capture,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is usable
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first bad setting
    pub fn validate(&self) -> Result<()> {
        if self.playback.lookahead == 0 {
            return Err(Error::Config("lookahead must be at least 1".to_string()));
        }

        if !(MIN_OUTPUT_RATE..=MAX_OUTPUT_RATE).contains(&self.playback.output_rate) {
            return Err(Error::Config(format!(
                "output rate {} Hz is outside {MIN_OUTPUT_RATE}-{MAX_OUTPUT_RATE} Hz",
                self.playback.output_rate
            )));
        }

        let url = self.server.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "server url must start with http:// or https://, got {url:?}"
            )));
        }

        Ok(())
    }
}

/// Parse an optional numeric environment variable
fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key}: invalid value {raw:?}")))
        })
        .transpose()
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key}: expected a boolean, got {raw:?}"))),
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(ConfigFile::default(), env(&[])).unwrap();

        assert_eq!(config.server.query_url(), "http://localhost:5001/process");
        assert_eq!(config.playback.lookahead, 3);
        assert_eq!(config.playback.output_rate, 24_000);
        assert!(config.playback.prime_output);
        assert_eq!(config.capture.debounce, Duration::from_secs(1));
    }

    #[test]
    fn env_overrides_file() {
        let fc: ConfigFile = toml::from_str(
            "[playback]\nlookahead = 5\noutput_rate = 48000\n[capture]\ndebounce_ms = 2000\n",
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env(&[("VOXLINE_LOOKAHEAD", "2"), ("VOXLINE_PRIME_OUTPUT", "off")]),
        )
        .unwrap();

        assert_eq!(config.playback.lookahead, 2);
        assert_eq!(config.playback.output_rate, 48_000);
        assert!(!config.playback.prime_output);
        assert_eq!(config.capture.debounce, Duration::from_secs(2));
    }

    #[test]
    fn rejects_zero_lookahead() {
        let result = Config::from_sources(ConfigFile::default(), env(&[("VOXLINE_LOOKAHEAD", "0")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_out_of_range_rate() {
        for rate in ["4000", "384000"] {
            let result =
                Config::from_sources(ConfigFile::default(), env(&[("VOXLINE_OUTPUT_RATE", rate)]));
            assert!(matches!(result, Err(Error::Config(_))), "rate {rate}");
        }
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let result =
            Config::from_sources(ConfigFile::default(), env(&[("VOXLINE_DEBOUNCE_MS", "soon")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_non_http_server() {
        let result = Config::from_sources(
            ConfigFile::default(),
            env(&[("VOXLINE_SERVER_URL", "ftp://example.com")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn query_url_joins_slashes() {
        let mut server = Config::default().server;
        server.url = "http://host:1/".to_string();
        server.endpoint = "process".to_string();
        assert_eq!(server.query_url(), "http://host:1/process");
    }

    #[test]
    fn serializes_durations_as_millis() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["capture"]["debounce"], 1000);
        assert_eq!(json["server"]["connect_timeout"], 10_000);
    }
}

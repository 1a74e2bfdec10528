//! TOML configuration file loading
//!
//! Reads `$VOXLINE_CONFIG` or `<config dir>/voxline/config.toml`. Every
//! field is optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Response server settings
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Playback settings
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Transcript capture settings
    #[serde(default)]
    pub capture: CaptureFileConfig,
}

/// `[server]` table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerFileConfig {
    /// Base URL (e.g. "http://localhost:5001")
    pub url: Option<String>,

    /// Query endpoint path (e.g. "/process")
    pub endpoint: Option<String>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// `[playback]` table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaybackFileConfig {
    /// Chunks decoded ahead of the cursor
    pub lookahead: Option<usize>,

    /// Output sample rate in Hz
    pub output_rate: Option<u32>,

    /// Play a short silent buffer at startup
    pub prime_output: Option<bool>,
}

/// `[capture]` table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureFileConfig {
    /// Minimum milliseconds between accepted transcripts
    pub debounce_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be
/// read or parsed.
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ConfigFile::default()
        }
    }
}

/// Read and parse one config file
///
/// # Errors
///
/// Returns error if the file can't be read or isn't valid config TOML
pub fn read_config_file(path: &Path) -> crate::Result<ConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `$VOXLINE_CONFIG`, else
/// `<config dir>/voxline/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("VOXLINE_CONFIG") {
        return Some(PathBuf::from(path));
    }

    directories::ProjectDirs::from("dev", "voxline", "voxline")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [server]
            url = "http://10.0.0.2:5001"

            [playback]
            lookahead = 5
            "#,
        )
        .unwrap();

        assert_eq!(file.server.url.as_deref(), Some("http://10.0.0.2:5001"));
        assert_eq!(file.server.endpoint, None);
        assert_eq!(file.playback.lookahead, Some(5));
        assert_eq!(file.capture.debounce_ms, None);
    }

    #[test]
    fn empty_file_is_default() {
        let file: ConfigFile = toml::from_str("").unwrap();
        assert!(file.server.url.is_none());
        assert!(file.playback.output_rate.is_none());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<ConfigFile>("[playback]\nlookahed = 2\n").is_err());
    }
}

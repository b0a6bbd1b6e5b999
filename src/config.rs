use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_CATALOG_URL;
use crate::error::CategoryError;
use crate::staleness::DEFAULT_STALE_DAYS;
use crate::store::StatePaths;

pub const DEFAULT_CONFIG_FILE: &str = "svtplay-category.json";

/// On-disk configuration. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub catalog_url: Option<String>,
    #[serde(default)]
    pub output_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub seen_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub episodes_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub series_state_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub errors_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub sleep_secs: Option<f64>,
    #[serde(default)]
    pub stale_days: Option<u32>,
    #[serde(default)]
    pub max_downloads: Option<usize>,
    #[serde(default)]
    pub downloader: Option<String>,
}

impl Config {
    /// Fields set in `overrides` win over fields set in `self`.
    pub fn merge(self, overrides: Config) -> Config {
        Config {
            catalog_url: overrides.catalog_url.or(self.catalog_url),
            output_dir: overrides.output_dir.or(self.output_dir),
            seen_file: overrides.seen_file.or(self.seen_file),
            episodes_file: overrides.episodes_file.or(self.episodes_file),
            series_state_file: overrides.series_state_file.or(self.series_state_file),
            errors_file: overrides.errors_file.or(self.errors_file),
            sleep_secs: overrides.sleep_secs.or(self.sleep_secs),
            stale_days: overrides.stale_days.or(self.stale_days),
            max_downloads: overrides.max_downloads.or(self.max_downloads),
            downloader: overrides.downloader.or(self.downloader),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub catalog_url: String,
    pub output_dir: Utf8PathBuf,
    pub state: StatePaths,
    pub delay: Duration,
    pub stale_days: u32,
    /// 0 means unlimited.
    pub max_downloads: usize,
    pub downloader: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or the default file when present. An explicitly named
    /// file must exist.
    pub fn load(path: Option<&str>) -> Result<Config, CategoryError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| CategoryError::ConfigRead(config_path.clone().into_std_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| CategoryError::ConfigParse(err.to_string()))
    }

    pub fn resolve(path: Option<&str>, overrides: Config) -> Result<Settings, CategoryError> {
        let file = Self::load(path)?;
        Self::resolve_config(file.merge(overrides))
    }

    pub fn resolve_config(config: Config) -> Result<Settings, CategoryError> {
        let sleep_secs = config.sleep_secs.unwrap_or(1.0);
        if !sleep_secs.is_finite() || sleep_secs < 0.0 {
            return Err(CategoryError::InvalidArgument(format!(
                "sleep must be a non-negative number of seconds, got {sleep_secs}"
            )));
        }
        let catalog_url = config
            .catalog_url
            .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string());
        if catalog_url.trim().is_empty() {
            return Err(CategoryError::InvalidArgument(
                "catalog url must not be empty".to_string(),
            ));
        }

        Ok(Settings {
            catalog_url,
            output_dir: config
                .output_dir
                .unwrap_or_else(|| Utf8PathBuf::from("Downloads")),
            state: StatePaths {
                seen: config
                    .seen_file
                    .unwrap_or_else(|| Utf8PathBuf::from("seen_urls.txt")),
                episodes: config
                    .episodes_file
                    .unwrap_or_else(|| Utf8PathBuf::from("seen_episodes.txt")),
                ledger: config
                    .errors_file
                    .unwrap_or_else(|| Utf8PathBuf::from("errors.json")),
                series: config
                    .series_state_file
                    .unwrap_or_else(|| Utf8PathBuf::from("series_state.json")),
            },
            delay: Duration::from_secs_f64(sleep_secs),
            stale_days: config.stale_days.unwrap_or(DEFAULT_STALE_DAYS),
            max_downloads: config.max_downloads.unwrap_or(0),
            downloader: config
                .downloader
                .unwrap_or_else(|| "svtplay-dl".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_use_standard_file_names() {
        let settings = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(settings.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(settings.state.seen, Utf8PathBuf::from("seen_urls.txt"));
        assert_eq!(settings.state.ledger, Utf8PathBuf::from("errors.json"));
        assert_eq!(settings.delay, Duration::from_secs(1));
        assert_eq!(settings.stale_days, 365);
        assert_eq!(settings.max_downloads, 0);
    }

    #[test]
    fn overrides_win_over_file() {
        let file = Config {
            sleep_secs: Some(5.0),
            max_downloads: Some(3),
            ..Config::default()
        };
        let cli = Config {
            max_downloads: Some(1),
            ..Config::default()
        };
        let settings = ConfigLoader::resolve_config(file.merge(cli)).unwrap();
        assert_eq!(settings.delay, Duration::from_secs(5));
        assert_eq!(settings.max_downloads, 1);
    }

    #[test]
    fn negative_sleep_is_rejected() {
        let config = Config {
            sleep_secs: Some(-1.0),
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, CategoryError::InvalidArgument(_));
    }
}

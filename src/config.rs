//! Run configuration, loadable from TOML.
//!
//! Lookup order for the default file:
//! 1. `$XDG_CONFIG_HOME/harvester/config.toml`
//! 2. `$HOME/.config/harvester/config.toml`
//!
//! Every field is optional in the file; missing ones take the defaults
//! below. The binary layers CLI flags on top.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::download::HttpClientOptions;
use crate::download::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::error::HarvestError;
use crate::postprocess::DEFAULT_TOOL_TIMEOUT;
use crate::retry::{DEFAULT_DOWNLOAD_RETRIES, DEFAULT_RETRY_DELAY, RetryPolicy};
use crate::scheduler::{
    DEFAULT_CONCURRENCY, DEFAULT_HIGH_WATERMARK, DEFAULT_LOW_WATERMARK, SchedulerLimits,
};

const MAX_RETRIES: u32 = 10;
const MAX_RETRY_DELAY_MS: u64 = 600_000;
const TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 1..=3600;

/// Everything a run needs besides its tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Directory artifacts are written to.
    pub destination_dir: PathBuf,
    /// Maximum simultaneous transfers (1..=100).
    pub concurrency_limit: usize,
    /// Load above which discovery pauses.
    pub high_watermark: usize,
    /// Load below which discovery resumes.
    pub low_watermark: usize,
    /// Retries after the first attempt (0..=10).
    pub download_retries: u32,
    /// Fixed delay before a failed task re-enters the queue.
    pub retry_delay_ms: u64,
    /// Silence tolerated before a transfer counts as stalled (1..=3600).
    pub stall_timeout_secs: u64,
    /// Connection establishment timeout (1..=3600).
    pub connect_timeout_secs: u64,
    /// Run exiftool/ffmpeg on finished artifacts.
    pub embed_metadata: bool,
    /// Wall-clock limit for one exiftool/ffmpeg invocation (1..=3600).
    pub tool_timeout_secs: u64,
    /// Keep retrying 4xx responses (logged as client errors).
    pub retry_client_errors: bool,
    /// Extra request headers, e.g. an auth `Cookie`.
    pub headers: BTreeMap<String, String>,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            destination_dir: PathBuf::from("."),
            concurrency_limit: DEFAULT_CONCURRENCY,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            low_watermark: DEFAULT_LOW_WATERMARK,
            download_retries: DEFAULT_DOWNLOAD_RETRIES,
            retry_delay_ms: u64::try_from(DEFAULT_RETRY_DELAY.as_millis()).unwrap_or(2_000),
            stall_timeout_secs: 30,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            embed_metadata: true,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT.as_secs(),
            retry_client_errors: true,
            headers: BTreeMap::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HarvestConfig {
    /// Validates ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violation found, naming the field and its range.
    pub fn validate(&self) -> Result<(), HarvestError> {
        self.scheduler_limits().validate()?;

        if self.download_retries > MAX_RETRIES {
            return Err(HarvestError::invalid_config(
                "download_retries",
                self.download_retries,
                format!("range 0..={MAX_RETRIES}"),
            ));
        }
        if self.retry_delay_ms > MAX_RETRY_DELAY_MS {
            return Err(HarvestError::invalid_config(
                "retry_delay_ms",
                self.retry_delay_ms,
                format!("range 0..={MAX_RETRY_DELAY_MS}"),
            ));
        }
        validate_timeout_secs("stall_timeout_secs", self.stall_timeout_secs)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("tool_timeout_secs", self.tool_timeout_secs)?;
        Ok(())
    }

    /// Concurrency and watermark settings.
    #[must_use]
    pub fn scheduler_limits(&self) -> SchedulerLimits {
        SchedulerLimits {
            concurrency_limit: self.concurrency_limit,
            high_watermark: self.high_watermark,
            low_watermark: self.low_watermark,
        }
    }

    /// Retry policy built from this config.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.download_retries,
            Duration::from_millis(self.retry_delay_ms),
            self.retry_client_errors,
        )
    }

    /// Stall timeout as a duration.
    #[must_use]
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    /// Metadata tool timeout as a duration.
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// HTTP client options built from this config.
    #[must_use]
    pub fn client_options(&self) -> HttpClientOptions {
        HttpClientOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            user_agent: self.user_agent.clone(),
            headers: self
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    /// Reads and validates a TOML config file.
    ///
    /// # Errors
    ///
    /// [`HarvestError::Config`] when the file cannot be read or parsed,
    /// otherwise any [`HarvestConfig::validate`] error.
    pub fn load(path: &Path) -> Result<Self, HarvestError> {
        let contents = std::fs::read_to_string(path).map_err(|e| HarvestError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: Self = toml::from_str(&contents).map_err(|e| HarvestError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Loads the default config file if one exists.
    ///
    /// Returns `Ok(None)` when no file is present.
    ///
    /// # Errors
    ///
    /// Same as [`HarvestConfig::load`] for a file that exists.
    pub fn load_default() -> Result<Option<(PathBuf, Self)>, HarvestError> {
        let Some(path) = resolve_default_config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let config = Self::load(&path)?;
        Ok(Some((path, config)))
    }
}

/// Resolves the default config path, if a base directory is known.
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("harvester")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("harvester")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), HarvestError> {
    if !TIMEOUT_RANGE_SECS.contains(&value) {
        return Err(HarvestError::invalid_config(
            field,
            value,
            "range 1..=3600",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = HarvestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency_limit, 4);
        assert_eq!(config.download_retries, 3);
        assert_eq!(config.retry_delay_ms, 2_000);
        assert_eq!(config.stall_timeout(), Duration::from_secs(30));
        assert_eq!(config.tool_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_tool_timeout_is_read_and_validated() {
        let config: HarvestConfig = toml::from_str("tool_timeout_secs = 15").unwrap();
        assert_eq!(config.tool_timeout(), Duration::from_secs(15));

        let config = HarvestConfig {
            tool_timeout_secs: 0,
            ..HarvestConfig::default()
        };
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("tool_timeout_secs"), "{message}");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: HarvestConfig = toml::from_str(
            r#"
            destination_dir = "/media/out"
            concurrency_limit = 8

            [headers]
            Cookie = "session=abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.destination_dir, PathBuf::from("/media/out"));
        assert_eq!(config.concurrency_limit, 8);
        assert_eq!(config.high_watermark, 32);
        assert_eq!(config.headers.get("Cookie").unwrap(), "session=abc");
        assert_eq!(config.client_options().headers.len(), 1);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let config = HarvestConfig {
            stall_timeout_secs: 0,
            ..HarvestConfig::default()
        };
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("stall_timeout_secs"), "{message}");

        let config = HarvestConfig {
            download_retries: 11,
            ..HarvestConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HarvestError::InvalidConfig {
                field: "download_retries",
                ..
            })
        ));

        let config = HarvestConfig {
            low_watermark: 40,
            ..HarvestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "concurrency_limit = \"many\"").unwrap();

        match HarvestConfig::load(&path) {
            Err(HarvestError::Config { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_validates_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "concurrency_limit = 0").unwrap();
        assert!(matches!(
            HarvestConfig::load(&path),
            Err(HarvestError::InvalidConcurrency { value: 0 })
        ));
    }

    #[test]
    fn test_retry_policy_follows_config() {
        let config = HarvestConfig {
            download_retries: 5,
            retry_delay_ms: 10,
            ..HarvestConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.retries(), 5);
        assert_eq!(policy.delay(), Duration::from_millis(10));
    }
}

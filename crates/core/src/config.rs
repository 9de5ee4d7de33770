//! Client configuration: defaults, optional `config.json`, environment overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::paths::AppPaths;

pub const ENV_API_BASE: &str = "LIDARNAV_API_BASE";
pub const ENV_AUTORUN_MS: &str = "LIDARNAV_AUTORUN_MS";

const MIN_AUTORUN_MS: u64 = 50;
const MAX_AUTORUN_MS: u64 = 10_000;

fn default_api_base() -> String {
    "http://localhost:8000".to_string()
}

fn default_autorun_period_ms() -> u64 {
    350
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_autorun_period_ms")]
    pub autorun_period_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whole-request limit. Streaming inference on large scans takes minutes.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            autorun_period_ms: default_autorun_period_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClientConfig {
    /// Defaults, then the config file under `paths` if it exists, then the environment.
    pub fn load(paths: Option<&AppPaths>) -> Result<Self, ConfigError> {
        let file = paths.map(AppPaths::config_file).filter(|p| p.is_file());
        let mut cfg = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.api_base = normalize_base(&cfg.api_base);
        info!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `LIDARNAV_*` overrides found through `lookup`. Invalid values are
    /// skipped with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base) = lookup(ENV_API_BASE) {
            let base = normalize_base(&base);
            if base.is_empty() {
                warn!("Ignoring empty {}", ENV_API_BASE);
            } else {
                self.api_base = base;
            }
        }

        if let Some(raw) = lookup(ENV_AUTORUN_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.autorun_period_ms = ms,
                _ => warn!("Ignoring invalid {} value: {:?}", ENV_AUTORUN_MS, raw),
            }
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = normalize_base(base);
        self
    }

    pub fn with_autorun_period_ms(mut self, ms: u64) -> Self {
        self.autorun_period_ms = ms;
        self
    }

    pub fn autorun_period(&self) -> Duration {
        Duration::from_millis(self.autorun_period_ms.clamp(MIN_AUTORUN_MS, MAX_AUTORUN_MS))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Absolute URL of `path` under `api_base`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }
}

fn normalize_base(base: &str) -> String {
    base.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: ClientConfig = serde_json::from_str(r#"{"api_base": "http://nav:9000"}"#).unwrap();
        assert_eq!(cfg.api_base, "http://nav:9000");
        assert_eq!(cfg.autorun_period(), Duration::from_millis(350));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn env_overrides_apply_and_invalid_ones_are_ignored() {
        let env: HashMap<&str, &str> = [
            (ENV_API_BASE, "http://gpu-box:8000/"),
            (ENV_AUTORUN_MS, "fast"),
        ]
        .into_iter()
        .collect();

        let mut cfg = ClientConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.api_base, "http://gpu-box:8000");
        assert_eq!(cfg.autorun_period_ms, 350);

        cfg.apply_overrides(|k| (k == ENV_AUTORUN_MS).then(|| "200".to_string()));
        assert_eq!(cfg.autorun_period_ms, 200);
    }

    #[test]
    fn period_is_clamped() {
        let cfg = ClientConfig::default().with_autorun_period_ms(1);
        assert_eq!(cfg.autorun_period(), Duration::from_millis(MIN_AUTORUN_MS));
    }

    #[test]
    fn endpoint_joins_cleanly() {
        let cfg = ClientConfig::default().with_api_base("http://localhost:8000/");
        assert_eq!(cfg.endpoint("/rl_step"), "http://localhost:8000/rl_step");
        assert_eq!(cfg.endpoint("health"), "http://localhost:8000/health");
    }

    #[test]
    fn file_errors_are_reported_with_path() {
        let dir = std::env::temp_dir().join(format!("lidarnav-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let paths = AppPaths::at(&dir);

        std::fs::write(paths.config_file(), "{ not json").unwrap();
        assert!(matches!(
            ClientConfig::from_file(&paths.config_file()),
            Err(ConfigError::Parse { .. })
        ));

        std::fs::write(paths.config_file(), r#"{"autorun_period_ms": 500}"#).unwrap();
        let cfg = ClientConfig::from_file(&paths.config_file()).unwrap();
        assert_eq!(cfg.autorun_period_ms, 500);

        std::fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(
            ClientConfig::from_file(&paths.config_file()),
            Err(ConfigError::Read { .. })
        ));
    }
}

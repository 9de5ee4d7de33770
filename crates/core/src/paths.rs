//! Cross-platform application paths

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const APP_DIR: &str = "lidarnav";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    /// Per-user paths under the OS config directory. Nothing is created.
    pub fn new() -> Result<Self, ConfigError> {
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::at(base.join(APP_DIR)))
    }

    pub fn at(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_lives_in_config_dir() {
        let paths = AppPaths::at("/tmp/lidarnav-test");
        assert_eq!(paths.config_file(), Path::new("/tmp/lidarnav-test/config.json"));
    }
}

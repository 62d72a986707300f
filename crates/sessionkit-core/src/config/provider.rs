use std::path::{Path, PathBuf};

use super::Config;

/// Trait for configuration providers.
///
/// Allows loading configuration from different sources (file, environment, ...).
pub trait ConfigProvider: Send + Sync {
    /// Load the full configuration.
    fn load_config(&self) -> Config;
}

/// File-based config provider (the default for CLI usage).
pub struct FileConfigProvider {
    config_path: Option<PathBuf>,
}

impl FileConfigProvider {
    pub fn new(config_path: Option<&Path>) -> Self {
        Self {
            config_path: config_path.map(|p| p.to_path_buf()),
        }
    }
}

impl ConfigProvider for FileConfigProvider {
    fn load_config(&self) -> Config {
        super::load_config(self.config_path.as_deref())
    }
}

/// Environment-first provider: `SESSIONKIT_CONFIG`, then `SESSION_*` overrides.
pub struct EnvConfigProvider;

impl ConfigProvider for EnvConfigProvider {
    fn load_config(&self) -> Config {
        super::load_config_from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_provider_reads_given_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"session":{"storage":"cookie"}}"#).unwrap();

        let provider = FileConfigProvider::new(Some(path.as_path()));
        assert_eq!(provider.load_config().session.storage, "cookie");
    }
}

use crate::{AppConfig, ConfigError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const ORG: &str = "io";
const AUTHOR: &str = "Harbor";
const APP: &str = "Harbor";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
    data_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from(ORG, AUTHOR, APP).ok_or(ConfigError::MissingDirectories)?;
        Self::with_dirs(dirs.config_dir(), dirs.data_dir())
    }

    /// Uses explicit directories instead of the platform defaults.
    pub fn with_dirs(config_dir: &Path, data_dir: &Path) -> Result<Self, ConfigError> {
        fs::create_dir_all(config_dir)?;
        fs::create_dir_all(data_dir)?;

        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            let initial = AppConfig::default();
            let content = toml::to_string_pretty(&initial)?;
            fs::write(&config_path, content)?;
            info!(path = %config_path.display(), "wrote default configuration");
        }

        Ok(Self {
            config_path,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let content = fs::read_to_string(&self.config_path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content)?;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn database_path(&self, config: &AppConfig) -> PathBuf {
        self.data_dir.join(&config.database.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_writes_default_file_and_save_persists() {
        let root = tempfile::tempdir().expect("temp dir");
        let manager = ConfigManager::with_dirs(&root.path().join("config"), &root.path().join("data"))
            .expect("manager");
        assert!(manager.config_path().exists());

        let mut config = manager.load().expect("load defaults");
        config.sync.poll_interval_secs = 30;
        manager.save(&config).expect("save");

        let reloaded = manager.load().expect("reload");
        assert_eq!(reloaded.sync.poll_interval_secs, 30);
        assert_eq!(
            manager.database_path(&reloaded),
            root.path().join("data").join("harbor.sqlite3")
        );
    }
}

//! Portfolio configurations persisted as `<dir>/<name>.json`.

use std::fs;
use std::path::PathBuf;

use crate::domain::config::PortfolioConfig;
use crate::domain::error::{ConfigError, ConfigIssue, CoreError};
use crate::ports::portfolio_store::PortfolioConfigStore;

pub struct JsonPortfolioStore {
    dir: PathBuf,
}

impl JsonPortfolioStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, CoreError> {
        let usable = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !usable {
            return Err(ConfigError::single(ConfigIssue::invalid(
                "portfolio",
                "name",
                format!("'{name}' cannot be used as a file name"),
            ))
            .into());
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

impl PortfolioConfigStore for JsonPortfolioStore {
    fn load(&self, name: &str) -> Result<PortfolioConfig, CoreError> {
        let path = self.path_for(name)?;
        let content = fs::read_to_string(&path)?;
        let config: PortfolioConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!(name, path = %path.display(), "portfolio config loaded");
        Ok(config)
    }

    fn save(&self, config: &PortfolioConfig) -> Result<(), CoreError> {
        config.validate()?;
        let path = self.path_for(&config.name)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, serde_json::to_string_pretty(config)?)?;
        tracing::debug!(name = %config.name, path = %path.display(), "portfolio config saved");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, CoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        names.sort();
        Ok(names)
    }
}

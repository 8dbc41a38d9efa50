//! Persistence of named portfolio configurations.

use crate::domain::config::PortfolioConfig;
use crate::domain::error::CoreError;

pub trait PortfolioConfigStore {
    fn load(&self, name: &str) -> Result<PortfolioConfig, CoreError>;
    fn save(&self, config: &PortfolioConfig) -> Result<(), CoreError>;
    fn list(&self) -> Result<Vec<String>, CoreError>;
}

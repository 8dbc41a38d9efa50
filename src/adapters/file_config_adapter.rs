//! INI file configuration adapter.

use configparser::ini::Ini;
use std::path::Path;

use crate::domain::config::{PortfolioConfig, StrategyConfig};
use crate::domain::error::{ConfigError, ConfigIssue, CoreError};
use crate::ports::config_port::ConfigPort;

#[derive(Debug)]
pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_string(&content).map_err(|reason| {
            CoreError::Config(ConfigError::single(ConfigIssue::invalid(
                "file",
                &path.display().to_string(),
                reason,
            )))
        })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new();
        config.read(content.to_string())?;
        Ok(Self { config })
    }

    /// Render a portfolio configuration in the layout `PortfolioConfig::from_config` reads.
    pub fn render(portfolio: &PortfolioConfig) -> String {
        let mut ini = Ini::new();
        let mut set = |section: &str, key: &str, value: String| {
            ini.set(section, key, Some(value));
        };

        set("portfolio", "name", portfolio.name.clone());
        set("portfolio", "universe", portfolio.universe.join(","));
        set("portfolio", "start_date", portfolio.start_date.to_string());
        set("portfolio", "end_date", portfolio.end_date.to_string());

        let b = &portfolio.backtest;
        set("backtest", "initial_capital", b.initial_capital.to_string());
        set("backtest", "commission_per_trade", b.commission_per_trade.to_string());
        set("backtest", "commission_pct", b.commission_pct.to_string());
        set("backtest", "slippage_pct", b.slippage_pct.to_string());
        set("backtest", "allow_shorting", b.allow_shorting.to_string());
        set("backtest", "risk_free_rate", b.risk_free_rate.to_string());
        set("backtest", "position_size", b.position_size.to_string());
        set("backtest", "lot_size", b.lot_size.to_string());

        let r = &portfolio.risk;
        set("risk", "max_position_pct", r.max_position_pct.to_string());
        set("risk", "max_portfolio_drawdown_pct", r.max_portfolio_drawdown_pct.to_string());
        set("risk", "max_positions_count", r.max_positions_count.to_string());
        set("risk", "stop_loss_pct", r.stop_loss_pct.to_string());
        set("risk", "take_profit_pct", r.take_profit_pct.to_string());

        set("strategy", "kind", portfolio.strategy.kind().to_string());
        match &portfolio.strategy {
            StrategyConfig::MovingAverage {
                fast,
                slow,
                average,
                exit,
                filters,
            } => {
                set("strategy", "fast_window", fast.to_string());
                set("strategy", "slow_window", slow.to_string());
                set("strategy", "average", average.to_string());
                let exit = match exit {
                    crate::domain::strategy::ExitDirection::Flat => "flat",
                    crate::domain::strategy::ExitDirection::Short => "short",
                };
                set("strategy", "exit", exit.to_string());
                set("strategy", "trend_filter_window", filters.trend_window.to_string());
                set("strategy", "max_volatility_pct", filters.max_volatility_pct.to_string());
            }
            StrategyConfig::AiPicker {
                top_k,
                min_history,
                rebalance_every,
                weights,
            } => {
                set("strategy", "top_k", top_k.to_string());
                set("strategy", "min_history", min_history.to_string());
                set("strategy", "rebalance_every", rebalance_every.to_string());
                set("strategy", "weight_momentum", weights.momentum.to_string());
                set("strategy", "weight_trend", weights.trend.to_string());
                set("strategy", "weight_volume", weights.volume.to_string());
                set("strategy", "weight_volatility", weights.volatility.to_string());
                set("strategy", "weight_technical", weights.technical.to_string());
            }
        }
        ini.writes()
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_deref()
            .and_then(Self::parse_bool)
            .unwrap_or(default)
    }
}

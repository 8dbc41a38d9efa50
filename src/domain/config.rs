//! Portfolio configuration: load, validate and turn into runnable parts.
//!
//! Validation never stops at the first problem; every missing or invalid key
//! is collected into one [`ConfigError`].
//!
//! INI layout:
//!
//! ```ini
//! [portfolio]
//! name = demo
//! universe = 600519,000001
//! start_date = 2023-01-01
//! end_date = 2023-12-31
//!
//! [backtest]
//! initial_capital = 100000
//!
//! [risk]
//! max_positions_count = 5
//!
//! [strategy]
//! kind = moving_average
//! trend_filter_window = 60
//! max_volatility_pct = 5
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::backtest::BacktestConfig;
use super::error::{ConfigError, ConfigIssue};
use super::execution::ExecutionConfig;
use super::risk::RiskLimit;
use super::strategy::{
    AiStockPicker, AverageKind, EntryFilters, ExitDirection, FactorWeights, MovingAverageStrategy,
    Strategy, WeightedSum,
};
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub initial_capital: f64,
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    pub slippage_pct: f64,
    pub allow_shorting: bool,
    pub risk_free_rate: f64,
    pub position_size: f64,
    pub lot_size: u32,
}

impl Default for BacktestParams {
    fn default() -> Self {
        BacktestParams {
            initial_capital: 100_000.0,
            commission_per_trade: 0.0,
            commission_pct: 0.0,
            slippage_pct: 0.0,
            allow_shorting: false,
            risk_free_rate: 0.0,
            position_size: 0.25,
            lot_size: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    MovingAverage {
        fast: usize,
        slow: usize,
        average: AverageKind,
        exit: ExitDirection,
        #[serde(default)]
        filters: EntryFilters,
    },
    AiPicker {
        top_k: usize,
        min_history: usize,
        rebalance_every: usize,
        weights: FactorWeights,
    },
}

impl StrategyConfig {
    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::MovingAverage {
                fast,
                slow,
                average,
                exit,
                filters,
            } => Box::new(MovingAverageStrategy::new(*fast, *slow, *average, *exit).with_filters(*filters)),
            StrategyConfig::AiPicker {
                top_k,
                min_history,
                rebalance_every,
                weights,
            } => Box::new(AiStockPicker::new(
                *top_k,
                *min_history,
                *rebalance_every,
                Box::new(WeightedSum::new(*weights)),
            )),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StrategyConfig::MovingAverage { .. } => "moving_average",
            StrategyConfig::AiPicker { .. } => "ai_picker",
        }
    }
}

/// A named, fully specified run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub name: String,
    pub universe: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub backtest: BacktestParams,
    pub risk: RiskLimit,
    pub strategy: StrategyConfig,
}

impl PortfolioConfig {
    /// Read and validate a configuration from a key/value store.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ConfigError> {
        let mut r = Reader {
            config,
            issues: Vec::new(),
        };

        let name = r
            .string("portfolio", "name")
            .unwrap_or_else(|| "default".to_string());
        let universe = match r.required("portfolio", "universe") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => Vec::new(),
        };
        let start_date = r.date("portfolio", "start_date");
        let end_date = r.date("portfolio", "end_date");

        let defaults = BacktestParams::default();
        let initial_capital = match r.required("backtest", "initial_capital") {
            Some(_) => r.parse("backtest", "initial_capital", defaults.initial_capital),
            None => defaults.initial_capital,
        };
        let backtest = BacktestParams {
            initial_capital,
            commission_per_trade: r.parse("backtest", "commission_per_trade", defaults.commission_per_trade),
            commission_pct: r.parse("backtest", "commission_pct", defaults.commission_pct),
            slippage_pct: r.parse("backtest", "slippage_pct", defaults.slippage_pct),
            allow_shorting: r.boolean("backtest", "allow_shorting", defaults.allow_shorting),
            risk_free_rate: r.parse("backtest", "risk_free_rate", defaults.risk_free_rate),
            position_size: r.parse("backtest", "position_size", defaults.position_size),
            lot_size: r.parse("backtest", "lot_size", defaults.lot_size),
        };

        let limit_defaults = RiskLimit::default();
        let max_positions_count = match r.required("risk", "max_positions_count") {
            Some(_) => r.parse("risk", "max_positions_count", limit_defaults.max_positions_count),
            None => limit_defaults.max_positions_count,
        };
        let risk = RiskLimit {
            max_position_pct: r.parse("risk", "max_position_pct", limit_defaults.max_position_pct),
            max_portfolio_drawdown_pct: r.parse(
                "risk",
                "max_portfolio_drawdown_pct",
                limit_defaults.max_portfolio_drawdown_pct,
            ),
            max_positions_count,
            stop_loss_pct: r.parse("risk", "stop_loss_pct", limit_defaults.stop_loss_pct),
            take_profit_pct: r.parse("risk", "take_profit_pct", limit_defaults.take_profit_pct),
        };

        let strategy = match r.required("strategy", "kind").as_deref() {
            Some("moving_average") => Some(StrategyConfig::MovingAverage {
                fast: r.parse("strategy", "fast_window", 5),
                slow: r.parse("strategy", "slow_window", 20),
                average: r.choice("strategy", "average", AverageKind::Sma, &[
                    ("sma", AverageKind::Sma),
                    ("ema", AverageKind::Ema),
                ]),
                exit: r.choice("strategy", "exit", ExitDirection::Flat, &[
                    ("flat", ExitDirection::Flat),
                    ("short", ExitDirection::Short),
                ]),
                filters: EntryFilters {
                    trend_window: r.parse("strategy", "trend_filter_window", 0),
                    max_volatility_pct: r.parse("strategy", "max_volatility_pct", 0.0),
                },
            }),
            Some("ai_picker") => {
                let w = FactorWeights::default();
                Some(StrategyConfig::AiPicker {
                    top_k: r.parse("strategy", "top_k", 5),
                    min_history: r.parse("strategy", "min_history", 30),
                    rebalance_every: r.parse("strategy", "rebalance_every", 1),
                    weights: FactorWeights {
                        momentum: r.parse("strategy", "weight_momentum", w.momentum),
                        trend: r.parse("strategy", "weight_trend", w.trend),
                        volume: r.parse("strategy", "weight_volume", w.volume),
                        volatility: r.parse("strategy", "weight_volatility", w.volatility),
                        technical: r.parse("strategy", "weight_technical", w.technical),
                    },
                })
            }
            Some(other) => {
                r.issues.push(ConfigIssue::invalid(
                    "strategy",
                    "kind",
                    format!("unknown strategy '{other}', expected moving_average or ai_picker"),
                ));
                None
            }
            None => None,
        };

        let mut issues = r.issues;
        let complete = start_date.is_some() && end_date.is_some() && strategy.is_some();
        // Placeholders let the range checks still run on what did parse.
        let parsed = PortfolioConfig {
            name,
            universe,
            start_date: start_date.unwrap_or(NaiveDate::MIN),
            end_date: end_date.unwrap_or(NaiveDate::MAX),
            backtest,
            risk,
            strategy: strategy.unwrap_or(StrategyConfig::MovingAverage {
                fast: 1,
                slow: 2,
                average: AverageKind::Sma,
                exit: ExitDirection::Flat,
                filters: EntryFilters::default(),
            }),
        };
        parsed.collect_issues(&mut issues);
        if complete && issues.is_empty() {
            Ok(parsed)
        } else {
            Err(ConfigError { issues })
        }
    }

    /// Check value ranges, e.g. after loading from a store.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        self.collect_issues(&mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { issues })
        }
    }

    fn collect_issues(&self, issues: &mut Vec<ConfigIssue>) {
        let mut check = |ok: bool, section: &str, key: &str, reason: &str| {
            if !ok {
                issues.push(ConfigIssue::invalid(section, key, reason));
            }
        };

        check(!self.name.trim().is_empty(), "portfolio", "name", "must not be empty");
        check(!self.universe.is_empty(), "portfolio", "universe", "must name at least one instrument");
        let mut seen = std::collections::BTreeSet::new();
        check(
            self.universe.iter().all(|id| seen.insert(id.as_str())),
            "portfolio",
            "universe",
            "duplicate instrument",
        );
        check(self.start_date < self.end_date, "portfolio", "start_date", "must be before end_date");

        let b = &self.backtest;
        check(b.initial_capital > 0.0 && b.initial_capital.is_finite(), "backtest", "initial_capital", "must be positive");
        check(b.commission_per_trade >= 0.0, "backtest", "commission_per_trade", "must be non-negative");
        check(b.commission_pct >= 0.0, "backtest", "commission_pct", "must be non-negative");
        check((0.0..100.0).contains(&b.slippage_pct), "backtest", "slippage_pct", "must be in [0, 100)");
        check((0.0..1.0).contains(&b.risk_free_rate), "backtest", "risk_free_rate", "must be between 0 and 1");
        check(b.position_size > 0.0 && b.position_size <= 1.0, "backtest", "position_size", "must be in (0, 1]");
        check(b.lot_size >= 1, "backtest", "lot_size", "must be at least 1");

        let l = &self.risk;
        check((0.0..=100.0).contains(&l.max_position_pct), "risk", "max_position_pct", "must be in [0, 100]");
        check(
            (0.0..=100.0).contains(&l.max_portfolio_drawdown_pct),
            "risk",
            "max_portfolio_drawdown_pct",
            "must be in [0, 100]",
        );
        check(l.max_positions_count >= 1, "risk", "max_positions_count", "must be at least 1");
        check((0.0..100.0).contains(&l.stop_loss_pct), "risk", "stop_loss_pct", "must be in [0, 100)");
        check(l.take_profit_pct >= 0.0 && l.take_profit_pct.is_finite(), "risk", "take_profit_pct", "must be non-negative");

        match &self.strategy {
            StrategyConfig::MovingAverage {
                fast,
                slow,
                filters,
                ..
            } => {
                check(*fast >= 1, "strategy", "fast_window", "must be at least 1");
                check(*slow >= 1, "strategy", "slow_window", "must be at least 1");
                check(fast < slow, "strategy", "fast_window", "must be less than slow_window");
                check(
                    filters.max_volatility_pct >= 0.0 && filters.max_volatility_pct.is_finite(),
                    "strategy",
                    "max_volatility_pct",
                    "must be non-negative (0 disables)",
                );
            }
            StrategyConfig::AiPicker {
                top_k,
                min_history,
                rebalance_every,
                weights,
            } => {
                check(*top_k >= 1, "strategy", "top_k", "must be at least 1");
                check(*min_history >= 1, "strategy", "min_history", "must be at least 1");
                check(*rebalance_every >= 1, "strategy", "rebalance_every", "must be at least 1");
                check(
                    weights.parts().iter().all(|w| w.is_finite() && *w >= 0.0) && weights.sum() > 0.0,
                    "strategy",
                    "weights",
                    "must be non-negative with a positive sum",
                );
            }
        }
    }

    pub fn backtest_config(&self) -> BacktestConfig {
        let b = &self.backtest;
        BacktestConfig {
            initial_capital: b.initial_capital,
            execution: ExecutionConfig {
                commission_per_trade: b.commission_per_trade,
                commission_pct: b.commission_pct,
                slippage_pct: b.slippage_pct,
            },
            limits: self.risk.clone(),
            position_size: b.position_size,
            lot_size: b.lot_size,
            allow_shorting: b.allow_shorting,
            risk_free_rate: b.risk_free_rate,
        }
    }

    pub fn build_strategy(&self) -> Box<dyn Strategy> {
        self.strategy.build()
    }
}

/// Reads typed values, recording every problem instead of failing fast.
struct Reader<'a> {
    config: &'a dyn ConfigPort,
    issues: Vec<ConfigIssue>,
}

impl Reader<'_> {
    fn string(&self, section: &str, key: &str) -> Option<String> {
        self.config
            .get_string(section, key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn required(&mut self, section: &str, key: &str) -> Option<String> {
        let value = self.string(section, key);
        if value.is_none() {
            self.issues.push(ConfigIssue::missing(section, key));
        }
        value
    }

    fn parse<T: FromStr>(&mut self, section: &str, key: &str, default: T) -> T {
        match self.string(section, key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                self.issues
                    .push(ConfigIssue::invalid(section, key, format!("cannot parse '{raw}'")));
                default
            }),
        }
    }

    fn boolean(&mut self, section: &str, key: &str, default: bool) -> bool {
        let Some(raw) = self.string(section, key) else {
            return default;
        };
        // The port falls back to the default on anything it cannot read.
        let value = self.config.get_bool(section, key, default);
        if value == self.config.get_bool(section, key, !default) {
            value
        } else {
            self.issues
                .push(ConfigIssue::invalid(section, key, format!("not a boolean: '{raw}'")));
            default
        }
    }

    fn date(&mut self, section: &str, key: &str) -> Option<NaiveDate> {
        let raw = self.required(section, key)?;
        match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                self.issues
                    .push(ConfigIssue::invalid(section, key, "expected YYYY-MM-DD"));
                None
            }
        }
    }

    fn choice<T: Copy>(&mut self, section: &str, key: &str, default: T, options: &[(&str, T)]) -> T {
        let Some(raw) = self.string(section, key) else {
            return default;
        };
        let lowered = raw.to_lowercase();
        match options.iter().find(|(name, _)| *name == lowered) {
            Some((_, value)) => *value,
            None => {
                let names: Vec<&str> = options.iter().map(|(n, _)| *n).collect();
                self.issues.push(ConfigIssue::invalid(
                    section,
                    key,
                    format!("'{raw}' is not one of {}", names.join(", ")),
                ));
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const VALID: &str = r#"
[portfolio]
name = demo
universe = 600519, 000001
start_date = 2023-01-01
end_date = 2023-12-31

[backtest]
initial_capital = 100000
commission_pct = 0.03
slippage_pct = 0.1
allow_shorting = no
lot_size = 100

[risk]
max_position_pct = 20
max_positions_count = 5
stop_loss_pct = 8

[strategy]
kind = moving_average
fast_window = 5
slow_window = 20
average = ema
"#;

    #[test]
    fn valid_config_loads() {
        let cfg = PortfolioConfig::from_config(&make_config(VALID)).unwrap();
        assert_eq!(cfg.name, "demo");
        assert_eq!(cfg.universe, vec!["600519".to_string(), "000001".to_string()]);
        assert_eq!(cfg.backtest.lot_size, 100);
        assert!(!cfg.backtest.allow_shorting);
        assert_eq!(cfg.risk.max_positions_count, 5);
        assert_eq!(
            cfg.strategy,
            StrategyConfig::MovingAverage {
                fast: 5,
                slow: 20,
                average: AverageKind::Ema,
                exit: ExitDirection::Flat,
                filters: EntryFilters::default(),
            }
        );
        assert_eq!(cfg.build_strategy().id(), "ma_cross_ema_5_20");
        let bt = cfg.backtest_config();
        assert_eq!(bt.sizing().lot_size, 100);
        assert!((bt.sizing().cost_pct - 0.13).abs() < 1e-12);
    }

    #[test]
    fn every_problem_is_reported() {
        let err = PortfolioConfig::from_config(&make_config(
            "[portfolio]\nuniverse = A\nstart_date = 2023/01/01\n\n[backtest]\ninitial_capital = -5\nposition_size = 2\n\n[strategy]\nkind = moving_average\nfast_window = 30\nslow_window = 10\n",
        ))
        .unwrap_err();
        assert!(err.has_key("portfolio", "start_date"));
        assert!(err.has_key("portfolio", "end_date"));
        assert!(err.has_key("backtest", "initial_capital"));
        assert!(err.has_key("backtest", "position_size"));
        assert!(err.has_key("risk", "max_positions_count"));
        assert!(err.has_key("strategy", "fast_window"));
    }

    #[test]
    fn strategy_window_order_checked() {
        let content = VALID.replace("fast_window = 5", "fast_window = 30");
        let err = PortfolioConfig::from_config(&make_config(&content)).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert!(err.has_key("strategy", "fast_window"));
    }

    #[test]
    fn unparsable_values_are_invalid() {
        let content = VALID
            .replace("lot_size = 100", "lot_size = lots")
            .replace("allow_shorting = no", "allow_shorting = maybe")
            .replace("average = ema", "average = wma");
        let err = PortfolioConfig::from_config(&make_config(&content)).unwrap_err();
        assert!(err.has_key("backtest", "lot_size"));
        assert!(err.has_key("backtest", "allow_shorting"));
        assert!(err.has_key("strategy", "average"));
    }

    #[test]
    fn unknown_strategy_kind() {
        let content = VALID.replace("kind = moving_average", "kind = astrology");
        let err = PortfolioConfig::from_config(&make_config(&content)).unwrap_err();
        assert!(err.has_key("strategy", "kind"));
    }

    #[test]
    fn ai_picker_defaults() {
        let content = VALID.replace("kind = moving_average", "kind = ai_picker");
        let cfg = PortfolioConfig::from_config(&make_config(&content)).unwrap();
        match cfg.strategy {
            StrategyConfig::AiPicker {
                top_k,
                min_history,
                rebalance_every,
                weights,
            } => {
                assert_eq!(top_k, 5);
                assert_eq!(min_history, 30);
                assert_eq!(rebalance_every, 1);
                assert_eq!(weights, FactorWeights::default());
            }
            other => panic!("expected ai picker, got {other:?}"),
        }
    }

    #[test]
    fn ma_entry_filters_load_and_validate() {
        let content = VALID.replace(
            "average = ema",
            "average = ema\ntrend_filter_window = 60\nmax_volatility_pct = 5",
        );
        let cfg = PortfolioConfig::from_config(&make_config(&content)).unwrap();
        let StrategyConfig::MovingAverage { filters, .. } = cfg.strategy else {
            panic!("expected moving average");
        };
        assert_eq!(
            filters,
            EntryFilters {
                trend_window: 60,
                max_volatility_pct: 5.0,
            }
        );
        assert!(cfg
            .build_strategy()
            .required_indicators()
            .contains(&crate::domain::indicator::IndicatorType::Sma(60)));

        let negative = VALID.replace("average = ema", "average = ema\nmax_volatility_pct = -1");
        let err = PortfolioConfig::from_config(&make_config(&negative)).unwrap_err();
        assert!(err.has_key("strategy", "max_volatility_pct"));
    }

    #[test]
    fn technical_weight_is_read() {
        let content = VALID.replace(
            "kind = moving_average",
            "kind = ai_picker\nweight_technical = 0.2",
        );
        let cfg = PortfolioConfig::from_config(&make_config(&content)).unwrap();
        let StrategyConfig::AiPicker { weights, .. } = cfg.strategy else {
            panic!("expected ai picker");
        };
        assert_eq!(weights.technical, 0.2);
        assert_eq!(weights.momentum, FactorWeights::default().momentum);
    }

    #[test]
    fn json_round_trip_validates() {
        let cfg = PortfolioConfig::from_config(&make_config(VALID)).unwrap();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"kind\":\"moving_average\""));
        let back: PortfolioConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
        assert!(back.validate().is_ok());

        let mut broken = back;
        broken.universe.push("600519".into());
        assert!(broken.validate().unwrap_err().has_key("portfolio", "universe"));
    }
}

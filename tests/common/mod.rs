#![allow(dead_code)]

use alphadesk::domain::backtest::BacktestConfig;
use alphadesk::domain::error::CoreError;
use alphadesk::domain::indicator::IndicatorType;
use alphadesk::domain::market::MarketView;
pub use alphadesk::domain::ohlcv::Bar;
use alphadesk::domain::risk::RiskLimit;
use alphadesk::domain::signal::{Direction, Signal};
use alphadesk::domain::strategy::Strategy;
use alphadesk::ports::data_port::MarketDataFeed;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

pub struct MockFeed {
    pub data: BTreeMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, id: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(id.to_string(), bars);
        self
    }

    pub fn with_error(mut self, id: &str, reason: &str) -> Self {
        self.errors.insert(id.to_string(), reason.to_string());
        self
    }

    fn check(&self, id: &str) -> Result<(), CoreError> {
        match self.errors.get(id) {
            Some(reason) => Err(CoreError::data(id, None, reason.clone())),
            None => Ok(()),
        }
    }
}

impl MarketDataFeed for MockFeed {
    fn get_history(
        &self,
        instrument_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, CoreError> {
        self.check(instrument_id)?;
        Ok(self
            .data
            .get(instrument_id)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start_date && b.date <= end_date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_quote(&self, instrument_id: &str) -> Result<Bar, CoreError> {
        self.check(instrument_id)?;
        self.data
            .get(instrument_id)
            .and_then(|bars| bars.last().cloned())
            .ok_or_else(|| CoreError::data(instrument_id, None, "no quote"))
    }

    fn list_instruments(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.data.keys().cloned().collect())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(id: &str, date: &str, close: f64) -> Bar {
    Bar {
        instrument_id: id.to_string(),
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        open: close,
        high: close + 1.0,
        low: (close - 1.0).max(0.01),
        close,
        volume: 1000.0,
    }
}

/// One bar per calendar day from `start_date`, closing on each of `closes`.
pub fn bars_from_closes(id: &str, start_date: &str, closes: &[f64]) -> Vec<Bar> {
    let start = NaiveDate::parse_from_str(start_date, "%Y-%m-%d").unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            instrument_id: id.to_string(),
            date: start + chrono::Duration::days(i as i64),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1000.0 + (i % 7) as f64 * 150.0,
        })
        .collect()
}

/// Deterministic wavy series so different instruments rank differently.
pub fn generate_bars(id: &str, start_date: &str, count: usize, start_price: f64) -> Vec<Bar> {
    let seed = id.bytes().map(f64::from).sum::<f64>();
    let closes: Vec<f64> = (0..count)
        .map(|i| {
            let t = i as f64;
            start_price * (1.0 + 0.002 * t * (seed % 5.0 - 2.0) / 2.0) + 3.0 * (t / (4.0 + seed % 3.0)).sin()
        })
        .collect();
    bars_from_closes(id, start_date, &closes)
}

pub fn sample_config() -> BacktestConfig {
    BacktestConfig {
        initial_capital: 100_000.0,
        limits: RiskLimit {
            max_position_pct: 30.0,
            max_positions_count: 3,
            ..RiskLimit::default()
        },
        position_size: 0.25,
        ..BacktestConfig::default()
    }
}

pub const PORTFOLIO_INI: &str = r#"
[portfolio]
name = integration
universe = AAA,BBB,CCC,DDD
start_date = 2024-01-01
end_date = 2024-06-30

[backtest]
initial_capital = 100000
commission_per_trade = 5
commission_pct = 0.03
slippage_pct = 0.05
risk_free_rate = 0.02

[risk]
max_position_pct = 30
max_positions_count = 2
stop_loss_pct = 8

[strategy]
kind = ai_picker
top_k = 2
min_history = 20
rebalance_every = 5
"#;

/// Emits a fixed direction for every active instrument on every tick.
pub struct ConstantStrategy {
    pub direction: Direction,
}

impl Strategy for ConstantStrategy {
    fn id(&self) -> &str {
        "constant"
    }

    fn required_indicators(&self) -> Vec<IndicatorType> {
        Vec::new()
    }

    fn reset(&mut self) {}

    fn generate_signals(
        &mut self,
        as_of: NaiveDate,
        universe: &[String],
        _history: &MarketView<'_>,
    ) -> Vec<Signal> {
        universe
            .iter()
            .map(|id| Signal::new(id, as_of, self.direction, 1.0, "constant", "always"))
            .collect()
    }
}

/// Records what it was shown on each tick and never trades.
#[derive(Default)]
pub struct RecordingStrategy {
    /// (as_of, active universe, latest bar date per visible instrument)
    pub seen: Vec<(NaiveDate, Vec<String>, Vec<(String, NaiveDate, f64)>)>,
}

impl Strategy for RecordingStrategy {
    fn id(&self) -> &str {
        "recording"
    }

    fn required_indicators(&self) -> Vec<IndicatorType> {
        vec![IndicatorType::Sma(3)]
    }

    fn reset(&mut self) {
        self.seen.clear();
    }

    fn generate_signals(
        &mut self,
        as_of: NaiveDate,
        universe: &[String],
        history: &MarketView<'_>,
    ) -> Vec<Signal> {
        let visible = history
            .instruments()
            .filter_map(|v| {
                v.last_bar()
                    .map(|b| (v.instrument_id().to_string(), b.date, b.close))
            })
            .collect();
        self.seen.push((as_of, universe.to_vec(), visible));
        Vec::new()
    }
}

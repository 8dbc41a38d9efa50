//! Backtest engine and event loop.
//!
//! The engine replays the sorted union of all instrument dates. Each date is
//! one tick, processed by [`TickProcessor::process_tick`], the same routine
//! the live session uses:
//!
//! 1. Build the point-in-time view and check it for look-ahead
//! 2. Active universe = instruments with a bar on the date
//! 3. Protective exits for active instruments (stop-loss / take-profit)
//! 4. Strategy signals for the active universe
//! 5. Risk check and apply: forced exits first, then the strategy's order
//! 6. Mark to market; inactive instruments keep their last close

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::error::CoreError;
use super::execution::{ExecutionConfig, PortfolioManager, Trade};
use super::market::{build_unified_timeline, prepare_universe, InstrumentData, MarketView};
use super::metrics::{compute_instrument_results, InstrumentResult, Metrics};
use super::ohlcv::Bar;
use super::portfolio::{PriceMap, ValuationPoint};
use super::position::Position;
use super::risk::{RiskLimit, RiskManager, Sizing};
use super::strategy::Strategy;

/// Parameters fixed for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub execution: ExecutionConfig,
    pub limits: RiskLimit,
    pub position_size: f64,
    pub lot_size: u32,
    pub allow_shorting: bool,
    pub risk_free_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 100_000.0,
            execution: ExecutionConfig::default(),
            limits: RiskLimit::default(),
            position_size: 0.25,
            lot_size: 1,
            allow_shorting: false,
            risk_free_rate: 0.0,
        }
    }
}

impl BacktestConfig {
    pub fn sizing(&self) -> Sizing {
        Sizing {
            position_size: self.position_size,
            lot_size: self.lot_size,
            allow_shorting: self.allow_shorting,
            cost_pct: self.execution.slippage_pct + self.execution.commission_pct,
            cost_flat: self.execution.commission_per_trade,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Completed => write!(f, "completed"),
            EngineState::Failed => write!(f, "failed"),
        }
    }
}

/// Frozen outcome of a replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub strategy_id: String,
    pub initial_capital: f64,
    pub trades: Vec<Trade>,
    pub valuation_history: Vec<ValuationPoint>,
    pub final_cash: f64,
    pub final_positions: Vec<Position>,
    pub metrics: Metrics,
    pub instrument_results: Vec<InstrumentResult>,
}

impl BacktestResult {
    pub fn final_value(&self) -> f64 {
        self.valuation_history
            .last()
            .map(|p| p.total_value)
            .unwrap_or(self.initial_capital)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What happened on one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub date: NaiveDate,
    pub active: usize,
    pub signals: usize,
    pub trades: usize,
    pub rejected: usize,
    pub total_value: f64,
}

/// Strategy → RiskManager → PortfolioManager for one tick at a time.
#[derive(Debug, Clone)]
pub struct TickProcessor {
    portfolio: PortfolioManager,
    risk: RiskManager,
}

impl TickProcessor {
    pub fn new(config: &BacktestConfig) -> Self {
        TickProcessor {
            portfolio: PortfolioManager::new(config.initial_capital, config.execution.clone()),
            risk: RiskManager::new(config.limits.clone(), config.sizing()),
        }
    }

    pub fn portfolio(&self) -> &PortfolioManager {
        &self.portfolio
    }

    pub fn process_tick(
        &mut self,
        date: NaiveDate,
        instruments: &[InstrumentData],
        strategy: &mut dyn Strategy,
    ) -> Result<TickReport, CoreError> {
        let view = MarketView::new(date, instruments);
        view.check_no_lookahead()?;

        let mut active: Vec<String> = Vec::new();
        let mut prices = PriceMap::new();
        for data in instruments {
            if let Some(bar) = data.bar_on(date) {
                active.push(data.instrument_id.clone());
                prices.insert(data.instrument_id.clone(), bar.close);
            }
        }

        let forced = self
            .risk
            .protective_exits(self.portfolio.portfolio(), &prices, date);
        let forced_ids: BTreeSet<String> = forced.iter().map(|s| s.instrument_id.clone()).collect();

        let raw = strategy.generate_signals(date, &active, &view);
        let generated = raw.len();
        let mut queue = forced;
        for signal in raw {
            if !prices.contains_key(&signal.instrument_id) {
                tracing::warn!(
                    instrument = %signal.instrument_id,
                    %date,
                    strategy = strategy.id(),
                    "dropping signal for instrument outside the active universe"
                );
                continue;
            }
            if signal.date != date {
                tracing::warn!(
                    instrument = %signal.instrument_id,
                    signal_date = %signal.date,
                    %date,
                    "dropping signal dated off the current tick"
                );
                continue;
            }
            if forced_ids.contains(&signal.instrument_id) {
                tracing::debug!(
                    instrument = %signal.instrument_id,
                    direction = %signal.direction,
                    "signal overridden by protective exit"
                );
                continue;
            }
            queue.push(signal);
        }

        let mut trades = 0;
        let mut rejected = 0;
        for signal in &queue {
            let decision = self
                .risk
                .evaluate(signal, self.portfolio.portfolio(), &prices);
            let price = prices.get(&signal.instrument_id).copied().unwrap_or(0.0);
            let trade = self.portfolio.apply(&decision, signal, price);
            if trade.rejection.is_some() {
                rejected += 1;
                tracing::debug!(
                    instrument = %trade.instrument_id,
                    reason = %trade.reason,
                    rejection = ?trade.rejection,
                    "signal rejected"
                );
            } else {
                trades += 1;
                tracing::debug!(
                    instrument = %trade.instrument_id,
                    quantity = trade.quantity_delta,
                    price = trade.price,
                    action = ?trade.action,
                    "trade"
                );
            }
        }

        let total_value = self.portfolio.mark_to_market(date, &prices);
        Ok(TickReport {
            date,
            active: active.len(),
            signals: generated,
            trades,
            rejected,
            total_value,
        })
    }

    /// Freeze the session into a result.
    pub fn finish(self, strategy_id: &str, risk_free_rate: f64) -> BacktestResult {
        let (portfolio, trades) = self.portfolio.into_parts();
        let metrics = Metrics::compute(
            portfolio.initial_capital,
            &portfolio.valuation_history,
            &trades,
            risk_free_rate,
        )
        .with_exposure(portfolio.exposure());
        let instrument_results = compute_instrument_results(&trades);
        BacktestResult {
            strategy_id: strategy_id.to_string(),
            initial_capital: portfolio.initial_capital,
            trades,
            valuation_history: portfolio.valuation_history,
            final_cash: portfolio.cash,
            final_positions: portfolio.positions.into_values().collect(),
            metrics,
            instrument_results,
        }
    }
}

/// Single-use replay engine: Idle → Running → Completed | Failed.
#[derive(Debug)]
pub struct BacktestEngine {
    config: BacktestConfig,
    state: EngineState,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        BacktestEngine {
            config,
            state: EngineState::Idle,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Replay `market` through `strategy`. Can only be called once.
    pub fn run(
        &mut self,
        market: BTreeMap<String, Vec<Bar>>,
        strategy: &mut dyn Strategy,
    ) -> Result<BacktestResult, CoreError> {
        if self.state != EngineState::Idle {
            return Err(CoreError::InvalidState {
                reason: format!("engine already {}", self.state),
            });
        }
        self.state = EngineState::Running;

        let span = tracing::info_span!("backtest", strategy = strategy.id());
        let _guard = span.enter();

        match self.replay(market, strategy) {
            Ok(result) => {
                self.state = EngineState::Completed;
                tracing::info!(
                    trades = result.trades.len(),
                    final_value = result.final_value(),
                    "backtest completed"
                );
                Ok(result)
            }
            Err(err) => {
                self.state = EngineState::Failed;
                tracing::error!(error = %err, "backtest failed");
                Err(err)
            }
        }
    }

    fn replay(
        &self,
        market: BTreeMap<String, Vec<Bar>>,
        strategy: &mut dyn Strategy,
    ) -> Result<BacktestResult, CoreError> {
        if market.is_empty() {
            return Err(CoreError::data("*", None, "no market data"));
        }
        let indicators = strategy.required_indicators();
        let data = prepare_universe(market, &indicators)?;
        let timeline = build_unified_timeline(&data);
        tracing::info!(
            instruments = data.len(),
            dates = timeline.len(),
            "replay prepared"
        );

        strategy.reset();
        let mut processor = TickProcessor::new(&self.config);
        for date in timeline {
            let report = processor.process_tick(date, &data, strategy)?;
            tracing::trace!(
                %date,
                active = report.active,
                signals = report.signals,
                trades = report.trades,
                total_value = report.total_value,
                "tick"
            );
        }
        Ok(processor.finish(strategy.id(), self.config.risk_free_rate))
    }
}

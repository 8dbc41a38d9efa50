//! Fill simulation and portfolio accounting.
//!
//! The PortfolioManager owns the Portfolio and the trade log. Every Decision
//! that comes out of the RiskManager goes through [`PortfolioManager::apply`],
//! including rejections, which are logged as no-op trades.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::portfolio::{Portfolio, PriceMap};
use super::position::Position;
use super::risk::{Decision, RejectReason};
use super::signal::Signal;

/// Trading cost parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    pub slippage_pct: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            commission_per_trade: 0.0,
            commission_pct: 0.0,
            slippage_pct: 0.0,
        }
    }
}

/// Calculate commission: flat_fee + (trade_value * pct / 100).
pub fn calculate_commission(trade_value: f64, config: &ExecutionConfig) -> f64 {
    config.commission_per_trade + (trade_value * config.commission_pct / 100.0)
}

/// Buys fill above the market price, sells below it.
pub fn apply_slippage(market_price: f64, quantity_delta: i64, slippage_pct: f64) -> f64 {
    match quantity_delta.signum() {
        1 => market_price * (1.0 + slippage_pct / 100.0),
        -1 => market_price * (1.0 - slippage_pct / 100.0),
        _ => market_price,
    }
}

/// What a trade did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Open,
    Add,
    Reduce,
    Close,
    Reverse,
    Rejected,
}

impl TradeAction {
    /// True when the trade realized P&L on part or all of a position.
    pub fn is_closing(self) -> bool {
        matches!(
            self,
            TradeAction::Reduce | TradeAction::Close | TradeAction::Reverse
        )
    }
}

/// One entry of the append-only trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub instrument_id: String,
    pub date: NaiveDate,
    pub quantity_delta: i64,
    /// Fill price after slippage.
    pub price: f64,
    pub commission: f64,
    /// Average-cost P&L on the reduced quantity, net of its share of commission.
    pub realized_pnl: f64,
    pub action: TradeAction,
    /// Opening date of the position this trade reduced.
    pub position_opened: Option<NaiveDate>,
    pub source_strategy_id: String,
    pub reason: String,
    pub rejection: Option<RejectReason>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioManager {
    portfolio: Portfolio,
    config: ExecutionConfig,
    trades: Vec<Trade>,
}

impl PortfolioManager {
    pub fn new(initial_capital: f64, config: ExecutionConfig) -> Self {
        PortfolioManager {
            portfolio: Portfolio::new(initial_capital),
            config,
            trades: Vec::new(),
        }
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn into_parts(self) -> (Portfolio, Vec<Trade>) {
        (self.portfolio, self.trades)
    }

    /// Apply one decision for `signal` at market `price`, updating cash and
    /// the position together.
    ///
    /// Steps:
    /// 1. Rejections (and zero deltas) become no-op log entries
    /// 2. Apply slippage and commission to the fill
    /// 3. Realize average-cost P&L on any reduction
    /// 4. Update cash: cash -= delta × fill + commission
    /// 5. Update the position: weighted cost on increases, fresh cost when
    ///    opening or reversing through zero, removal at zero
    pub fn apply(&mut self, decision: &Decision, signal: &Signal, price: f64) -> Trade {
        let delta = decision.quantity();
        let mut reason = signal.reason.clone();
        if let Decision::Resize {
            requested,
            reason: why,
            ..
        } = decision
        {
            reason = format!("{reason} (resized from {requested}: {why})");
        }

        if delta == 0 {
            let trade = Trade {
                instrument_id: signal.instrument_id.clone(),
                date: signal.date,
                quantity_delta: 0,
                price,
                commission: 0.0,
                realized_pnl: 0.0,
                action: TradeAction::Rejected,
                position_opened: None,
                source_strategy_id: signal.source_strategy_id.clone(),
                reason,
                rejection: Some(decision.rejection().unwrap_or(RejectReason::ZeroQuantity)),
            };
            self.trades.push(trade.clone());
            return trade;
        }

        let fill = apply_slippage(price, delta, self.config.slippage_pct);
        let notional = delta.unsigned_abs() as f64 * fill;
        let commission = calculate_commission(notional, &self.config);

        let existing = self.portfolio.positions.get(&signal.instrument_id).cloned();
        let held = existing.as_ref().map(|p| p.quantity).unwrap_or(0);
        let new_quantity = held + delta;

        let mut realized_pnl = 0.0;
        let mut position_opened = None;
        if let Some(pos) = existing.as_ref() {
            if held.signum() != delta.signum() {
                let closed = delta.abs().min(held.abs());
                let share = closed as f64 / delta.abs() as f64;
                realized_pnl = closed as f64 * (fill - pos.average_cost) * held.signum() as f64
                    - commission * share;
                position_opened = Some(pos.opened_at);
            }
        }

        self.portfolio.cash -= delta as f64 * fill + commission;

        let action = match existing {
            None => {
                self.portfolio.positions.insert(
                    signal.instrument_id.clone(),
                    Position {
                        instrument_id: signal.instrument_id.clone(),
                        quantity: new_quantity,
                        average_cost: fill,
                        opened_at: signal.date,
                    },
                );
                TradeAction::Open
            }
            Some(_) if new_quantity == 0 => {
                self.portfolio.positions.remove(&signal.instrument_id);
                TradeAction::Close
            }
            Some(mut pos) => {
                let action = if new_quantity.signum() != held.signum() {
                    pos.average_cost = fill;
                    pos.opened_at = signal.date;
                    TradeAction::Reverse
                } else if new_quantity.abs() > held.abs() {
                    pos.average_cost = (held.abs() as f64 * pos.average_cost
                        + delta.abs() as f64 * fill)
                        / new_quantity.abs() as f64;
                    TradeAction::Add
                } else {
                    TradeAction::Reduce
                };
                pos.quantity = new_quantity;
                self.portfolio
                    .positions
                    .insert(signal.instrument_id.clone(), pos);
                action
            }
        };

        let trade = Trade {
            instrument_id: signal.instrument_id.clone(),
            date: signal.date,
            quantity_delta: delta,
            price: fill,
            commission,
            realized_pnl,
            action,
            position_opened,
            source_strategy_id: signal.source_strategy_id.clone(),
            reason,
            rejection: None,
        };
        self.trades.push(trade.clone());
        trade
    }

    /// Record the valuation for `date`. `prices` holds today's closes; any
    /// held instrument without one is valued at its last known price.
    pub fn mark_to_market(&mut self, date: NaiveDate, prices: &PriceMap) -> f64 {
        for (id, price) in prices {
            self.portfolio.marks.insert(id.clone(), *price);
        }
        let total = self.portfolio.total_value(&PriceMap::new());
        self.portfolio.record_valuation(date, total);
        total
    }
}

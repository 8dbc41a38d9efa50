//! Pre-trade risk checks and position sizing.
//!
//! The RiskManager reads a portfolio snapshot and turns a Signal into a
//! Decision. It never mutates the portfolio. Rules run in order:
//!
//! 0. Sizing: target = floor(total_value × position_size / price), rounded
//!    down to the lot size. Flat targets zero.
//! 1. Max positions: a new position beyond `max_positions_count` is rejected.
//! 2. Position cap and cash: the target is resized down to
//!    `max_position_pct` of total value and to what cash can pay for.
//! 3. Drawdown kill-switch: risk-increasing signals are rejected while the
//!    drawdown of today's value from the valuation peak exceeds
//!    `max_portfolio_drawdown_pct`.
//!
//! Protective exits (stop-loss / take-profit) are produced separately by
//! [`RiskManager::protective_exits`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::portfolio::{Portfolio, PriceMap};
use super::signal::{Direction, Signal};

pub const PROTECTIVE_SOURCE_ID: &str = "risk";

/// Portfolio limits in percent units (10.0 = 10 %). Zero disables a check,
/// except `max_positions_count` which must be at least 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimit {
    pub max_position_pct: f64,
    pub max_portfolio_drawdown_pct: f64,
    pub max_positions_count: usize,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for RiskLimit {
    fn default() -> Self {
        RiskLimit {
            max_position_pct: 20.0,
            max_portfolio_drawdown_pct: 0.0,
            max_positions_count: 10,
            stop_loss_pct: 0.0,
            take_profit_pct: 0.0,
        }
    }
}

/// How a target position is sized and what trading costs to budget for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sizing {
    /// Fraction of total value per new position, in (0, 1].
    pub position_size: f64,
    pub lot_size: u32,
    pub allow_shorting: bool,
    /// Slippage plus percentage commission, in percent.
    pub cost_pct: f64,
    /// Flat commission per trade.
    pub cost_flat: f64,
}

impl Default for Sizing {
    fn default() -> Self {
        Sizing {
            position_size: 0.25,
            lot_size: 1,
            allow_shorting: false,
            cost_pct: 0.0,
            cost_flat: 0.0,
        }
    }
}

/// The check responsible for a rejection or a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    AlreadyPositioned,
    NoPosition,
    NoPrice,
    MaxPositions,
    PositionCap,
    InsufficientCash,
    ZeroQuantity,
    DrawdownLimit,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::AlreadyPositioned => "already positioned in that direction",
            RejectReason::NoPosition => "no position to close",
            RejectReason::NoPrice => "no price available",
            RejectReason::MaxPositions => "max positions reached",
            RejectReason::PositionCap => "position value cap",
            RejectReason::InsufficientCash => "insufficient cash",
            RejectReason::ZeroQuantity => "sized to zero shares",
            RejectReason::DrawdownLimit => "portfolio drawdown limit",
        };
        f.write_str(text)
    }
}

/// Outcome of a risk check. Quantities are signed share deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    Accept(i64),
    Resize {
        quantity: i64,
        requested: i64,
        reason: RejectReason,
    },
    Reject(RejectReason),
}

impl Decision {
    /// Share delta to execute; zero for a rejection.
    pub fn quantity(&self) -> i64 {
        match self {
            Decision::Accept(q) => *q,
            Decision::Resize { quantity, .. } => *quantity,
            Decision::Reject(_) => 0,
        }
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        match self {
            Decision::Reject(reason) => Some(*reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskManager {
    limits: RiskLimit,
    sizing: Sizing,
}

impl RiskManager {
    pub fn new(limits: RiskLimit, sizing: Sizing) -> Self {
        RiskManager { limits, sizing }
    }

    pub fn limits(&self) -> &RiskLimit {
        &self.limits
    }

    pub fn sizing(&self) -> &Sizing {
        &self.sizing
    }

    fn round_to_lot(&self, shares: f64) -> i64 {
        if !shares.is_finite() || shares <= 0.0 {
            return 0;
        }
        let lot = i64::from(self.sizing.lot_size.max(1));
        (shares.floor() as i64 / lot) * lot
    }

    pub fn evaluate(&self, signal: &Signal, portfolio: &Portfolio, prices: &PriceMap) -> Decision {
        let Some(price) = prices
            .get(&signal.instrument_id)
            .copied()
            .filter(|p| p.is_finite() && *p > 0.0)
        else {
            return Decision::Reject(RejectReason::NoPrice);
        };

        let held = portfolio.quantity_of(&signal.instrument_id);
        let direction = match signal.direction {
            Direction::Short if !self.sizing.allow_shorting => Direction::Flat,
            other => other,
        };

        if direction == Direction::Flat {
            if held == 0 {
                return Decision::Reject(RejectReason::NoPosition);
            }
            return Decision::Accept(-held);
        }

        let side = direction.sign();
        if held.signum() == side {
            return Decision::Reject(RejectReason::AlreadyPositioned);
        }

        // Rule 1
        if held == 0 && portfolio.position_count() >= self.limits.max_positions_count.max(1) {
            return Decision::Reject(RejectReason::MaxPositions);
        }

        let total_value = portfolio.total_value(prices);
        let requested = self.round_to_lot(total_value * self.sizing.position_size / price);
        if requested == 0 {
            return Decision::Reject(RejectReason::ZeroQuantity);
        }

        // Rule 2
        let mut target = requested;
        let mut resized = None;
        if self.limits.max_position_pct > 0.0 {
            let cap = self.round_to_lot(total_value * self.limits.max_position_pct / 100.0 / price);
            if target > cap {
                target = cap;
                resized = Some(RejectReason::PositionCap);
            }
        }
        if side > 0 {
            // Covering an existing short consumes cash before the purchase.
            let cover_cost = held.unsigned_abs() as f64 * price * (1.0 + self.sizing.cost_pct / 100.0);
            let available = portfolio.cash - cover_cost - self.sizing.cost_flat;
            let affordable = self.round_to_lot(available / (price * (1.0 + self.sizing.cost_pct / 100.0)));
            if target > affordable {
                target = affordable;
                resized = Some(RejectReason::InsufficientCash);
            }
        }
        if target == 0 {
            return Decision::Reject(resized.unwrap_or(RejectReason::ZeroQuantity));
        }

        // Rule 3
        if self.limits.max_portfolio_drawdown_pct > 0.0
            && portfolio.drawdown_at(prices) > self.limits.max_portfolio_drawdown_pct
        {
            if held != 0 {
                // Reversal under the kill-switch only closes.
                return Decision::Resize {
                    quantity: -held,
                    requested: side * requested - held,
                    reason: RejectReason::DrawdownLimit,
                };
            }
            return Decision::Reject(RejectReason::DrawdownLimit);
        }

        let quantity = side * target - held;
        match resized {
            Some(reason) => Decision::Resize {
                quantity,
                requested: side * requested - held,
                reason,
            },
            None => Decision::Accept(quantity),
        }
    }

    /// Forced Flat signals for positions past the stop-loss or take-profit
    /// threshold. Only instruments present in `prices` are checked; triggers
    /// are inclusive.
    pub fn protective_exits(
        &self,
        portfolio: &Portfolio,
        prices: &PriceMap,
        date: NaiveDate,
    ) -> Vec<Signal> {
        let mut exits = Vec::new();
        for (id, position) in &portfolio.positions {
            let Some(&price) = prices.get(id) else {
                continue;
            };
            let ret = position.unrealized_return_pct(price);
            let reason = if self.limits.stop_loss_pct > 0.0 && ret <= -self.limits.stop_loss_pct {
                format!("stop-loss ({ret:.2}%)")
            } else if self.limits.take_profit_pct > 0.0 && ret >= self.limits.take_profit_pct {
                format!("take-profit ({ret:.2}%)")
            } else {
                continue;
            };
            exits.push(Signal::new(
                id,
                date,
                Direction::Flat,
                0.0,
                PROTECTIVE_SOURCE_ID,
                reason,
            ));
        }
        exits
    }
}

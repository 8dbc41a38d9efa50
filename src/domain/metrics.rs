//! Performance metrics computed once from a finished replay.
//!
//! Returns, drawdowns, volatility and VaR are fractions (0.10 = 10 %). Trade
//! statistics only count closing trades (reduce, close, reverse); rejected
//! signals are counted separately.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::execution::{Trade, TradeAction};
use super::portfolio::ValuationPoint;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration: i64,
    /// Annualized sample stddev of daily returns.
    pub volatility: f64,
    /// One-day historical value at risk at 95 %, as a positive loss.
    pub var_95: f64,
    pub calmar_ratio: f64,
    /// Largest open position as a fraction of final value.
    pub concentration: f64,
    pub cash_ratio: f64,
    pub risk_level: RiskLevel,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_holding_days: f64,
    pub total_commission: f64,
    pub rejected_signals: usize,
}

/// Coarse risk grade from drawdown and concentration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl RiskLevel {
    pub fn assess(max_drawdown: f64, concentration: f64) -> Self {
        if max_drawdown > 0.20 {
            RiskLevel::Extreme
        } else if max_drawdown > 0.10 || concentration > 0.4 {
            RiskLevel::High
        } else if max_drawdown > 0.05 || concentration > 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Extreme => "extreme",
        };
        f.write_str(text)
    }
}

/// Open exposure at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exposure {
    pub cash_ratio: f64,
    pub concentration: f64,
}

impl Default for Exposure {
    fn default() -> Self {
        Exposure {
            cash_ratio: 1.0,
            concentration: 0.0,
        }
    }
}

/// Per-instrument breakdown of closing trades.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentResult {
    pub instrument_id: String,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

impl Metrics {
    pub fn compute(
        initial_capital: f64,
        valuation_history: &[ValuationPoint],
        trades: &[Trade],
        risk_free_rate: f64,
    ) -> Self {
        let final_value = valuation_history
            .last()
            .map(|p| p.total_value)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            (final_value - initial_capital) / initial_capital
        } else {
            0.0
        };

        let years = valuation_history.len() as f64 / TRADING_DAYS_PER_YEAR;
        let annualized_return = if years > 0.0 && total_return.is_finite() && total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) =
            compute_drawdown(initial_capital, valuation_history);

        let returns = daily_returns(valuation_history);
        let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(&returns, daily_rf);
        let volatility = sample_stddev(&returns) * TRADING_DAYS_PER_YEAR.sqrt();
        let var_95 = historical_var(&returns, 0.95);
        let calmar_ratio = if max_drawdown > 0.0 {
            annualized_return / max_drawdown
        } else {
            0.0
        };

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_holding_days = 0i64;
        let mut total_commission = 0.0_f64;
        let mut rejected_signals = 0usize;

        for trade in trades {
            total_commission += trade.commission;
            if trade.action == TradeAction::Rejected {
                rejected_signals += 1;
                continue;
            }
            if !trade.action.is_closing() {
                continue;
            }
            let pnl = trade.realized_pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                trades_breakeven += 1;
            }
            if let Some(opened) = trade.position_opened {
                total_holding_days += (trade.date - opened).num_days();
            }
        }

        let total_trades = trades_won + trades_lost + trades_breakeven;
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };

        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };

        let avg_holding_days = if total_trades > 0 {
            total_holding_days as f64 / total_trades as f64
        } else {
            0.0
        };

        Metrics {
            total_return,
            annualized_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            volatility,
            var_95,
            calmar_ratio,
            concentration: 0.0,
            cash_ratio: 1.0,
            risk_level: RiskLevel::assess(max_drawdown, 0.0),
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_holding_days,
            total_commission,
            rejected_signals,
        }
    }

    /// Fold end-of-run exposure in and regrade the risk level.
    pub fn with_exposure(mut self, exposure: Exposure) -> Self {
        self.cash_ratio = exposure.cash_ratio;
        self.concentration = exposure.concentration;
        self.risk_level = RiskLevel::assess(self.max_drawdown, self.concentration);
        self
    }
}

/// Closing-trade statistics per instrument, in instrument-id order.
pub fn compute_instrument_results(trades: &[Trade]) -> Vec<InstrumentResult> {
    let mut by_instrument: BTreeMap<&str, InstrumentResult> = BTreeMap::new();
    for trade in trades.iter().filter(|t| t.action.is_closing()) {
        let entry = by_instrument
            .entry(trade.instrument_id.as_str())
            .or_insert_with(|| InstrumentResult {
                instrument_id: trade.instrument_id.clone(),
                total_trades: 0,
                winning_trades: 0,
                losing_trades: 0,
                win_rate: 0.0,
                total_pnl: 0.0,
            });
        entry.total_trades += 1;
        entry.total_pnl += trade.realized_pnl;
        if trade.realized_pnl > 0.0 {
            entry.winning_trades += 1;
        } else if trade.realized_pnl < 0.0 {
            entry.losing_trades += 1;
        }
    }
    by_instrument
        .into_values()
        .map(|mut r| {
            r.win_rate = r.winning_trades as f64 / r.total_trades as f64;
            r
        })
        .collect()
}

/// Max drawdown (fraction of peak) and the longest run of valuations spent
/// below a previous peak. The peak starts at the initial capital.
fn compute_drawdown(initial_capital: f64, history: &[ValuationPoint]) -> (f64, i64) {
    let mut peak = initial_capital;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0i64;
    let mut current_dd_duration = 0i64;

    for point in history {
        if point.total_value >= peak {
            peak = point.total_value;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            let dd = (peak - point.total_value) / peak;
            max_dd = max_dd.max(dd);
            current_dd_duration += 1;
            max_dd_duration = max_dd_duration.max(current_dd_duration);
        }
    }

    (max_dd, max_dd_duration)
}

fn daily_returns(history: &[ValuationPoint]) -> Vec<f64> {
    history
        .windows(2)
        .map(|w| {
            let prev = w[0].total_value;
            if prev > 0.0 {
                (w[1].total_value - prev) / prev
            } else {
                0.0
            }
        })
        .collect()
}

fn sample_stddev(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    (returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

/// Loss at the (1 - confidence) quantile of daily returns, linearly
/// interpolated. Zero when that quantile is a gain.
fn historical_var(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (1.0 - confidence) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let quantile = sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64);
    (-quantile).max(0.0)
}

fn compute_risk_adjusted(returns: &[f64], daily_rf: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;
    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let excess_return = mean - daily_rf;

    let sharpe = if stddev > 0.0 {
        (excess_return / stddev) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    let downside_sq: f64 = returns
        .iter()
        .filter(|&&r| r < daily_rf)
        .map(|&r| (r - daily_rf).powi(2))
        .sum();
    let downside_stddev = (downside_sq / n).sqrt();

    let sortino = if downside_stddev > 0.0 {
        (excess_return / downside_stddev) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    (sharpe, sortino)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(i: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i)
    }

    fn history(values: &[f64]) -> Vec<ValuationPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| ValuationPoint {
                date: day(i as i64),
                total_value: v,
            })
            .collect()
    }

    fn closing(id: &str, pnl: f64, held_days: i64) -> Trade {
        Trade {
            instrument_id: id.to_string(),
            date: day(held_days),
            quantity_delta: -100,
            price: 100.0,
            commission: 1.0,
            realized_pnl: pnl,
            action: TradeAction::Close,
            position_opened: Some(day(0)),
            source_strategy_id: "test".into(),
            reason: "exit".into(),
            rejection: None,
        }
    }

    fn rejected(id: &str) -> Trade {
        Trade {
            quantity_delta: 0,
            commission: 0.0,
            realized_pnl: 0.0,
            action: TradeAction::Rejected,
            position_opened: None,
            rejection: Some(crate::domain::risk::RejectReason::MaxPositions),
            ..closing(id, 0.0, 0)
        }
    }

    #[test]
    fn metrics_empty_run() {
        let metrics = Metrics::compute(100_000.0, &[], &[], 0.05);
        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.trades_won, 0);
        assert_eq!(metrics.rejected_signals, 0);
    }

    #[test]
    fn metrics_total_return() {
        let m = Metrics::compute(100_000.0, &history(&[100_000.0, 110_000.0]), &[], 0.0);
        assert!((m.total_return - 0.10).abs() < 1e-9);
        let m = Metrics::compute(100_000.0, &history(&[100_000.0, 90_000.0]), &[], 0.0);
        assert!((m.total_return + 0.10).abs() < 1e-9);
    }

    #[test]
    fn metrics_annualized_return_flat_year() {
        let m = Metrics::compute(100_000.0, &history(&[100_000.0; 252]), &[], 0.05);
        assert!(m.annualized_return.abs() < 1e-9);
    }

    #[test]
    fn metrics_trade_stats() {
        let trades = vec![
            closing("A", 100.0, 5),
            closing("B", -50.0, 3),
            closing("C", 200.0, 10),
            closing("D", 0.0, 2),
            rejected("E"),
        ];
        let m = Metrics::compute(100_000.0, &history(&[100_000.0, 100_250.0]), &trades, 0.0);
        assert_eq!(m.trades_won, 2);
        assert_eq!(m.trades_lost, 1);
        assert_eq!(m.trades_breakeven, 1);
        assert_eq!(m.rejected_signals, 1);
        assert!((m.win_rate - 0.5).abs() < f64::EPSILON);
        assert!((m.profit_factor - 6.0).abs() < 1e-9);
        assert!((m.avg_win - 150.0).abs() < 1e-9);
        assert!((m.largest_loss - 50.0).abs() < 1e-9);
        assert!((m.avg_holding_days - 5.0).abs() < 1e-9);
        assert!((m.total_commission - 4.0).abs() < 1e-9);
    }

    #[test]
    fn opening_trades_are_not_counted() {
        let mut open = closing("A", 0.0, 1);
        open.action = TradeAction::Open;
        open.position_opened = None;
        let m = Metrics::compute(1_000.0, &[], &[open], 0.0);
        assert_eq!(m.trades_breakeven, 0);
        assert_eq!(m.profit_factor, 0.0);
    }

    #[test]
    fn profit_factor_without_losses_is_infinite() {
        let m = Metrics::compute(1_000.0, &[], &[closing("A", 10.0, 1)], 0.0);
        assert!(m.profit_factor.is_infinite());
    }

    #[test]
    fn max_drawdown_and_duration() {
        let (dd, _) = compute_drawdown(100.0, &history(&[100.0, 110.0, 90.0, 95.0, 80.0, 100.0]));
        assert!((dd - (110.0 - 80.0) / 110.0).abs() < 1e-9);
        let (_, duration) =
            compute_drawdown(100.0, &history(&[100.0, 110.0, 100.0, 90.0, 85.0, 95.0]));
        assert_eq!(duration, 4);
    }

    #[test]
    fn first_tick_loss_counts_as_drawdown() {
        let m = Metrics::compute(100.0, &history(&[80.0, 80.0]), &[], 0.0);
        assert!((m.total_return + 0.2).abs() < 1e-9);
        assert!((m.max_drawdown - 0.2).abs() < 1e-9);
        assert_eq!(m.max_drawdown_duration, 2);
        assert_eq!(m.risk_level, RiskLevel::High);
    }

    #[test]
    fn risk_adjusted_ratios() {
        let values: Vec<f64> = (0..253).map(|i| 100_000.0 * (1.0 + 0.001 * i as f64)).collect();
        let (sharpe, _) = compute_risk_adjusted(&daily_returns(&history(&values)), 0.0);
        assert!(sharpe > 0.0);
        let returns = daily_returns(&history(&[100.0, 101.0, 100.5, 101.5, 100.0, 102.0]));
        let (sharpe, sortino) = compute_risk_adjusted(&returns, 0.0);
        assert!(sharpe.is_finite());
        assert!(sortino.is_finite());
    }

    #[test]
    fn volatility_var_and_calmar() {
        // daily returns 0.1, -0.1, 0.0, 0.1
        let m = Metrics::compute(100.0, &history(&[100.0, 110.0, 99.0, 99.0, 108.9]), &[], 0.0);
        let expected_vol = (0.0275_f64 / 3.0).sqrt() * 252.0_f64.sqrt();
        assert!((m.volatility - expected_vol).abs() < 1e-9);
        // 5th percentile of [-0.1, 0, 0.1, 0.1] interpolates to -0.085
        assert!((m.var_95 - 0.085).abs() < 1e-9);
        assert!((m.max_drawdown - 0.1).abs() < 1e-9);
        assert!((m.calmar_ratio - m.annualized_return / 0.1).abs() < 1e-9);

        let flat = Metrics::compute(100.0, &history(&[100.0, 101.0, 102.0]), &[], 0.0);
        assert_eq!(flat.var_95, 0.0);
        assert_eq!(flat.calmar_ratio, 0.0);
        assert_eq!(flat.risk_level, RiskLevel::Low);
    }

    #[test]
    fn risk_level_grades() {
        assert_eq!(RiskLevel::assess(0.25, 0.0), RiskLevel::Extreme);
        assert_eq!(RiskLevel::assess(0.12, 0.0), RiskLevel::High);
        assert_eq!(RiskLevel::assess(0.0, 0.45), RiskLevel::High);
        assert_eq!(RiskLevel::assess(0.06, 0.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::assess(0.0, 0.35), RiskLevel::Medium);
        assert_eq!(RiskLevel::assess(0.01, 0.1), RiskLevel::Low);
        assert_eq!(RiskLevel::High.to_string(), "high");
    }

    #[test]
    fn exposure_regrades_risk_level() {
        let m = Metrics::compute(100.0, &history(&[100.0, 101.0]), &[], 0.0);
        assert_eq!(m.cash_ratio, 1.0);
        let m = m.with_exposure(Exposure {
            cash_ratio: 0.5,
            concentration: 0.5,
        });
        assert_eq!(m.concentration, 0.5);
        assert_eq!(m.risk_level, RiskLevel::High);
    }

    #[test]
    fn instrument_breakdown_in_id_order() {
        let trades = vec![
            closing("B", 10.0, 1),
            closing("A", -5.0, 1),
            closing("B", -2.0, 1),
            rejected("C"),
        ];
        let results = compute_instrument_results(&trades);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].instrument_id, "A");
        assert_eq!(results[1].total_trades, 2);
        assert!((results[1].total_pnl - 8.0).abs() < 1e-9);
        assert!((results[1].win_rate - 0.5).abs() < 1e-9);
    }
}

//! Open position held by the portfolio.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Quantity is signed whole shares: positive long, negative short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument_id: String,
    pub quantity: i64,
    pub average_cost: f64,
    pub opened_at: NaiveDate,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    /// Signed value: negative for a short.
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity as f64 * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity as f64 * (price - self.average_cost)
    }

    /// Percent gain relative to average cost, from the holder's side.
    pub fn unrealized_return_pct(&self, price: f64) -> f64 {
        if self.average_cost <= 0.0 || self.quantity == 0 {
            return 0.0;
        }
        let raw = (price - self.average_cost) * 100.0 / self.average_cost;
        if self.is_short() { -raw } else { raw }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(quantity: i64) -> Position {
        Position {
            instrument_id: "600519".into(),
            quantity,
            average_cost: 50.0,
            opened_at: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        }
    }

    #[test]
    fn long_position_values() {
        let pos = position(100);
        assert!(pos.is_long());
        assert!((pos.market_value(55.0) - 5500.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_pnl(55.0) - 500.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_return_pct(55.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn short_position_values() {
        let pos = position(-100);
        assert!(pos.is_short());
        assert!((pos.market_value(45.0) + 4500.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_pnl(45.0) - 500.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_return_pct(55.0) + 10.0).abs() < 1e-9);
    }

    #[test]
    fn return_pct_of_empty_position_is_zero() {
        let pos = position(0);
        assert_eq!(pos.unrealized_return_pct(80.0), 0.0);
    }
}

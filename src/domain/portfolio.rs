//! Portfolio state and valuation history.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::metrics::Exposure;
use super::position::Position;

/// Latest price per instrument id.
pub type PriceMap = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationPoint {
    pub date: NaiveDate,
    pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: BTreeMap<String, Position>,
    pub valuation_history: Vec<ValuationPoint>,
    /// Last price seen per instrument, carried forward across gaps.
    #[serde(skip)]
    pub marks: PriceMap,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            valuation_history: Vec::new(),
            marks: PriceMap::new(),
        }
    }

    pub fn get_position(&self, instrument_id: &str) -> Option<&Position> {
        self.positions.get(instrument_id)
    }

    pub fn has_position(&self, instrument_id: &str) -> bool {
        self.positions.contains_key(instrument_id)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Signed quantity held, 0 when flat.
    pub fn quantity_of(&self, instrument_id: &str) -> i64 {
        self.positions
            .get(instrument_id)
            .map(|p| p.quantity)
            .unwrap_or(0)
    }

    /// Price for valuation: the given map first, then the carried mark,
    /// then the position's average cost.
    pub fn price_for(&self, instrument_id: &str, prices: &PriceMap) -> Option<f64> {
        prices
            .get(instrument_id)
            .or_else(|| self.marks.get(instrument_id))
            .copied()
            .or_else(|| self.positions.get(instrument_id).map(|p| p.average_cost))
    }

    /// cash + Σ quantity × price, summed in instrument-id order.
    pub fn total_value(&self, prices: &PriceMap) -> f64 {
        let mut total = self.cash;
        for (id, position) in &self.positions {
            let price = self.price_for(id, prices).unwrap_or(position.average_cost);
            total += position.market_value(price);
        }
        total
    }

    /// Highest recorded valuation, never below initial capital.
    pub fn peak_value(&self) -> f64 {
        self.valuation_history
            .iter()
            .map(|p| p.total_value)
            .fold(self.initial_capital, f64::max)
    }

    pub fn last_valuation(&self) -> Option<&ValuationPoint> {
        self.valuation_history.last()
    }

    /// Percent below the peak with the portfolio marked at `prices`. Today's
    /// value counts towards the peak.
    pub fn drawdown_at(&self, prices: &PriceMap) -> f64 {
        let current = self.total_value(prices);
        let peak = self.peak_value().max(current);
        if peak <= 0.0 {
            return 0.0;
        }
        (peak - current) / peak * 100.0
    }

    /// Cash share and largest absolute position weight, valued at the
    /// carried marks.
    pub fn exposure(&self) -> Exposure {
        let empty = PriceMap::new();
        let total = self.total_value(&empty);
        if total <= 0.0 {
            return Exposure::default();
        }
        let largest = self
            .positions
            .iter()
            .map(|(id, p)| {
                let price = self.price_for(id, &empty).unwrap_or(p.average_cost);
                p.market_value(price).abs()
            })
            .fold(0.0, f64::max);
        Exposure {
            cash_ratio: self.cash / total,
            concentration: largest / total,
        }
    }

    pub fn record_valuation(&mut self, date: NaiveDate, total_value: f64) {
        self.valuation_history.push(ValuationPoint { date, total_value });
    }
}

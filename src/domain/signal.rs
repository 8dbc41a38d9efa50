//! Strategy output: a per-instrument directional intent.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    /// +1 for Long, -1 for Short, 0 for Flat.
    pub fn sign(self) -> i64 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
            Direction::Flat => 0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
            Direction::Flat => write!(f, "FLAT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub instrument_id: String,
    pub date: NaiveDate,
    pub direction: Direction,
    /// Conviction in [-1, 1].
    pub strength: f64,
    pub source_strategy_id: String,
    pub reason: String,
}

impl Signal {
    pub fn new(
        instrument_id: &str,
        date: NaiveDate,
        direction: Direction,
        strength: f64,
        source_strategy_id: &str,
        reason: impl Into<String>,
    ) -> Self {
        Signal {
            instrument_id: instrument_id.to_string(),
            date,
            direction,
            strength: clamp_strength(strength),
            source_strategy_id: source_strategy_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Clamp to [-1, 1]; NaN becomes 0.
pub fn clamp_strength(strength: f64) -> f64 {
    if strength.is_nan() {
        0.0
    } else {
        strength.clamp(-1.0, 1.0)
    }
}

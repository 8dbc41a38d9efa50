//! OHLCV bar representation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::CoreError;

/// One daily OHLCV observation for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument_id: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// Check that a series is non-empty, belongs to one instrument, has strictly
/// increasing dates and carries usable prices.
pub fn validate_series(instrument_id: &str, bars: &[Bar]) -> Result<(), CoreError> {
    if bars.is_empty() {
        return Err(CoreError::data(instrument_id, None, "empty bar series"));
    }

    let mut prev: Option<NaiveDate> = None;
    for bar in bars {
        if bar.instrument_id != instrument_id {
            return Err(CoreError::data(
                instrument_id,
                Some(bar.date),
                format!("bar belongs to {}", bar.instrument_id),
            ));
        }
        if let Some(p) = prev {
            if bar.date <= p {
                return Err(CoreError::data(
                    instrument_id,
                    Some(bar.date),
                    format!("dates not strictly increasing (previous {p})"),
                ));
            }
        }
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(CoreError::data(
                instrument_id,
                Some(bar.date),
                "non-positive or non-finite price",
            ));
        }
        if !bar.volume.is_finite() || bar.volume < 0.0 {
            return Err(CoreError::data(instrument_id, Some(bar.date), "invalid volume"));
        }
        prev = Some(bar.date);
    }
    Ok(())
}

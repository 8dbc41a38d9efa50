//! Simple Moving Average indicator.
//!
//! SMA(n)[i] = sum(C[i-n+1..=i]) / n
//! Each window is summed afresh so values do not drift over long series.
//! Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub fn calculate_sma(bars: &[Bar], period: usize) -> IndicatorSeries {
    if period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Sma(period),
            values: Vec::new(),
        };
    }

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i + 1 < period {
                IndicatorPoint::warmup(bar.date, IndicatorValue::Simple(0.0))
            } else {
                let window = &bars[i + 1 - period..=i];
                let mean = window.iter().map(|b| b.close).sum::<f64>() / period as f64;
                IndicatorPoint::simple(bar.date, mean)
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Sma(period),
        values,
    }
}

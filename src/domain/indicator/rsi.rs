//! RSI (Relative Strength Index), the bounded momentum oscillator.
//!
//! Wilder smoothing of average gain/loss:
//! - First average: simple mean of the first n close-to-close changes
//! - Subsequent: avg = (prev_avg * (n-1) + current) / n
//!
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss), and 100 when avg_loss == 0.
//! The output is always within [0, 100].
//! Warmup: first n bars are invalid (n changes are needed for the seed).

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

fn rsi_from(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
    }
}

pub fn calculate_rsi(bars: &[Bar], period: usize) -> IndicatorSeries {
    let mut values = Vec::with_capacity(bars.len());
    let Some(first) = bars.first() else {
        return IndicatorSeries {
            indicator_type: IndicatorType::Rsi(period),
            values,
        };
    };
    values.push(IndicatorPoint::warmup(first.date, IndicatorValue::Simple(0.0)));

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    let mut seed_gain = 0.0;
    let mut seed_loss = 0.0;

    for (n, pair) in bars.windows(2).enumerate() {
        let change = pair[1].close - pair[0].close;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let changes_seen = n + 1;
        let date = pair[1].date;

        if period == 0 || changes_seen < period {
            seed_gain += gain;
            seed_loss += loss;
            values.push(IndicatorPoint::warmup(date, IndicatorValue::Simple(0.0)));
        } else if changes_seen == period {
            avg_gain = (seed_gain + gain) / period as f64;
            avg_loss = (seed_loss + loss) / period as f64;
            values.push(IndicatorPoint::simple(date, rsi_from(avg_gain, avg_loss)));
        } else {
            avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
            avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
            values.push(IndicatorPoint::simple(date, rsi_from(avg_gain, avg_loss)));
        }
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Rsi(period),
        values,
    }
}

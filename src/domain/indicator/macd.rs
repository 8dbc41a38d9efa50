//! MACD (Moving Average Convergence Divergence).
//!
//! MACD line = EMA(fast) - EMA(slow), signal = EMA(signal) of the MACD line,
//! histogram = line - signal. The signal EMA only starts once the slow EMA
//! is defined.
//! Warmup: (slow - 1) + (signal - 1) bars.

use crate::domain::indicator::ema::ema_points;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(bars: &[Bar], fast: usize, slow: usize, signal: usize) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd { fast, slow, signal };
    if fast == 0 || slow == 0 || signal == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let closes = || bars.iter().map(|b| (b.date, b.close));
    let fast_ema = ema_points(closes(), fast);
    let slow_ema = ema_points(closes(), slow);

    // MACD line is defined from the first bar where both EMAs are.
    let line_start = fast.max(slow) - 1;
    let line: Vec<(chrono::NaiveDate, f64)> = fast_ema
        .iter()
        .zip(&slow_ema)
        .skip(line_start)
        .map(|(f, s)| (f.date, f.value.primary() - s.value.primary()))
        .collect();
    let signal_ema = ema_points(line.iter().copied(), signal);

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let signal_point = i.checked_sub(line_start).and_then(|j| signal_ema.get(j));
            match signal_point {
                Some(sp) if sp.valid => {
                    let macd = line[i - line_start].1;
                    let sig = sp.value.primary();
                    IndicatorPoint {
                        date: bar.date,
                        valid: true,
                        value: IndicatorValue::Macd {
                            line: macd,
                            signal: sig,
                            histogram: macd - sig,
                        },
                    }
                }
                _ => IndicatorPoint::warmup(
                    bar.date,
                    IndicatorValue::Macd {
                        line: 0.0,
                        signal: 0.0,
                        histogram: 0.0,
                    },
                ),
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

//! Bollinger Bands.
//!
//! middle = SMA(n), upper/lower = middle ± k × population stddev.
//! Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

/// (mean, population stddev) of a window of closes.
fn mean_and_stddev(window: &[Bar]) -> (f64, f64) {
    let n = window.len() as f64;
    let mean = window.iter().map(|b| b.close).sum::<f64>() / n;
    let variance = window
        .iter()
        .map(|b| (b.close - mean) * (b.close - mean))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

pub fn calculate_bollinger(bars: &[Bar], period: usize, stddev_mult_x100: u32) -> IndicatorSeries {
    let mult = stddev_mult_x100 as f64 / 100.0;

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if period == 0 || i + 1 < period {
                return IndicatorPoint::warmup(
                    bar.date,
                    IndicatorValue::Bollinger {
                        upper: 0.0,
                        middle: 0.0,
                        lower: 0.0,
                    },
                );
            }
            let (middle, sd) = mean_and_stddev(&bars[i + 1 - period..=i]);
            IndicatorPoint {
                date: bar.date,
                valid: true,
                value: IndicatorValue::Bollinger {
                    upper: middle + mult * sd,
                    middle,
                    lower: middle - mult * sd,
                },
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Bollinger {
            period,
            stddev_mult_x100,
        },
        values,
    }
}

//! Exponential Moving Average indicator.
//!
//! k = 2/(n+1), seeded with the SMA of the first n closes, then
//! EMA[i] = C[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub fn calculate_ema(bars: &[Bar], period: usize) -> IndicatorSeries {
    IndicatorSeries {
        indicator_type: IndicatorType::Ema(period),
        values: ema_points(bars.iter().map(|b| (b.date, b.close)), period),
    }
}

/// EMA over arbitrary (date, value) pairs; shared with MACD's signal line.
pub(crate) fn ema_points<I>(input: I, period: usize) -> Vec<IndicatorPoint>
where
    I: IntoIterator<Item = (chrono::NaiveDate, f64)>,
{
    if period == 0 {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = 0.0;
    let mut seed_sum = 0.0;

    input
        .into_iter()
        .enumerate()
        .map(|(i, (date, value))| {
            if i + 1 < period {
                seed_sum += value;
                IndicatorPoint::warmup(date, IndicatorValue::Simple(0.0))
            } else if i + 1 == period {
                seed_sum += value;
                ema = seed_sum / period as f64;
                IndicatorPoint::simple(date, ema)
            } else {
                ema = value * k + ema * (1.0 - k);
                IndicatorPoint::simple(date, ema)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::{make_bars, simple};

    #[test]
    fn ema_warmup() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3);

        assert!(!series.values[0].valid);
        assert!(!series.values[1].valid);
        assert!(series.values[2].valid);
        assert!(series.values[4].valid);
    }

    #[test]
    fn ema_period_1_tracks_close() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 1);

        assert!(series.values.iter().all(|p| p.valid));
        assert!((simple(&series, 0) - 10.0).abs() < f64::EPSILON);
        assert!((simple(&series, 1) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_seed_is_sma() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 3);
        let expected_sma = (10.0 + 20.0 + 30.0) / 3.0;
        assert!((simple(&series, 2) - expected_sma).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_recursive_calculation() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3);

        let k = 2.0 / 4.0;
        let sma = 20.0;
        let ema_3 = 40.0 * k + sma * (1.0 - k);
        let ema_4 = 50.0 * k + ema_3 * (1.0 - k);

        assert!((simple(&series, 3) - ema_3).abs() < f64::EPSILON);
        assert!((simple(&series, 4) - ema_4).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_equal_prices() {
        let bars = make_bars(&[100.0; 5]);
        let series = calculate_ema(&bars, 3);
        for i in 2..5 {
            assert!((simple(&series, i) - 100.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn ema_period_0_is_empty() {
        let bars = make_bars(&[10.0, 20.0]);
        assert!(calculate_ema(&bars, 0).values.is_empty());
    }
}

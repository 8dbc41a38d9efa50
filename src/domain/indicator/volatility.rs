//! Historical volatility: rolling sample standard deviation of daily
//! close-to-close returns, in percent.
//!
//! VOLATILITY(n)[i] = stddev(R[i-n+1..=i]) * 100, R[j] = C[j] / C[j-1] - 1
//! Warmup: first n bars are invalid. A window of one return is 0.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

fn daily_return(prev: f64, close: f64) -> f64 {
    if prev == 0.0 { 0.0 } else { close / prev - 1.0 }
}

pub fn calculate_volatility(bars: &[Bar], period: usize) -> IndicatorSeries {
    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if period == 0 || i < period {
                return IndicatorPoint::warmup(bar.date, IndicatorValue::Simple(0.0));
            }
            let returns: Vec<f64> = bars[i - period..=i]
                .windows(2)
                .map(|w| daily_return(w[0].close, w[1].close))
                .collect();
            if returns.len() < 2 {
                return IndicatorPoint::simple(bar.date, 0.0);
            }
            let n = returns.len() as f64;
            let mean = returns.iter().sum::<f64>() / n;
            let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
            IndicatorPoint::simple(bar.date, variance.sqrt() * 100.0)
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Volatility(period),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::{make_bars, simple};

    #[test]
    fn volatility_constant_prices_is_zero() {
        let bars = make_bars(&[50.0; 5]);
        let series = calculate_volatility(&bars, 3);
        assert!(!series.values[2].valid);
        assert!(simple(&series, 3).abs() < f64::EPSILON);
    }

    #[test]
    fn volatility_known_values() {
        // returns +10 %, -10 %: mean 0, sample variance 0.02
        let bars = make_bars(&[100.0, 110.0, 99.0]);
        let series = calculate_volatility(&bars, 2);
        assert!(!series.values[1].valid);
        assert!((simple(&series, 2) - 0.02_f64.sqrt() * 100.0).abs() < 1e-9);
    }

    #[test]
    fn volatility_window_slides() {
        let bars = make_bars(&[100.0, 110.0, 99.0, 99.0, 99.0]);
        let series = calculate_volatility(&bars, 2);
        assert!(simple(&series, 3) > 0.0);
        assert!(simple(&series, 4).abs() < 1e-12);
    }
}

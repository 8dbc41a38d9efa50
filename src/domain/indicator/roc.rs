//! ROC (Rate of Change) momentum indicator.
//!
//! ROC(n)[i] = ((C[i] - C[i-n]) / C[i-n]) * 100, and 0 when C[i-n] == 0.
//! Warmup: first n bars invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub fn calculate_roc(bars: &[Bar], period: usize) -> IndicatorSeries {
    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if period == 0 || i < period {
                return IndicatorPoint::warmup(bar.date, IndicatorValue::Simple(0.0));
            }
            let base = bars[i - period].close;
            let roc = if base == 0.0 {
                0.0
            } else {
                (bar.close - base) / base * 100.0
            };
            IndicatorPoint::simple(bar.date, roc)
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Roc(period),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::{make_bars, simple};

    #[test]
    fn roc_warmup() {
        let bars = make_bars(&[100.0, 105.0, 110.0, 115.0, 120.0]);
        let series = calculate_roc(&bars, 3);

        assert!(!series.values[2].valid);
        assert!(series.values[3].valid);
    }

    #[test]
    fn roc_basic_calculation() {
        let bars = make_bars(&[100.0, 105.0, 110.0, 115.0]);
        let series = calculate_roc(&bars, 2);

        assert!((simple(&series, 2) - 10.0).abs() < 1e-12);
        let expected = (115.0 - 105.0) / 105.0 * 100.0;
        assert!((simple(&series, 3) - expected).abs() < 1e-12);
    }

    #[test]
    fn roc_negative_change() {
        let bars = make_bars(&[100.0, 90.0, 80.0]);
        let series = calculate_roc(&bars, 2);
        assert!((simple(&series, 2) + 20.0).abs() < 1e-12);
    }
}

//! Technical indicator engine.
//!
//! Every indicator is a pure function of a validated bar series. Points that
//! fall inside an indicator's warmup window are kept in the series with
//! `valid == false` and must be treated as absent, never as zero.
//!
//! - `IndicatorPoint`: A single point in an indicator time series
//! - `IndicatorValue`: Output shape (single value, MACD triple, bands)
//! - `IndicatorType`: Indicator identity + parameters (serves as cache key)
//! - `IndicatorSeries`: A time series of indicator values

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod volatility;

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::domain::error::CoreError;
use crate::domain::ohlcv::{validate_series, Bar};

pub use bollinger::calculate_bollinger;
pub use ema::calculate_ema;
pub use macd::calculate_macd;
pub use roc::calculate_roc;
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;
pub use volatility::calculate_volatility;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorPoint {
    pub date: NaiveDate,
    pub valid: bool,
    pub value: IndicatorValue,
}

impl IndicatorPoint {
    pub(crate) fn warmup(date: NaiveDate, value: IndicatorValue) -> Self {
        IndicatorPoint {
            date,
            valid: false,
            value,
        }
    }

    pub(crate) fn simple(date: NaiveDate, value: f64) -> Self {
        IndicatorPoint {
            date,
            valid: true,
            value: IndicatorValue::Simple(value),
        }
    }

    /// The primary scalar of this point, or `None` while warming up.
    pub fn primary(&self) -> Option<f64> {
        if !self.valid {
            return None;
        }
        Some(self.value.primary())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

impl IndicatorValue {
    /// Simple value, MACD histogram, or Bollinger middle band.
    pub fn primary(&self) -> f64 {
        match self {
            IndicatorValue::Simple(v) => *v,
            IndicatorValue::Macd { histogram, .. } => *histogram,
            IndicatorValue::Bollinger { middle, .. } => *middle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Roc(usize),
    Volatility(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

impl IndicatorType {
    /// Number of leading bars that are always invalid.
    pub fn warmup(&self) -> usize {
        match *self {
            IndicatorType::Sma(n) | IndicatorType::Ema(n) => n.saturating_sub(1),
            IndicatorType::Rsi(n) | IndicatorType::Roc(n) | IndicatorType::Volatility(n) => n,
            IndicatorType::Macd { slow, signal, .. } => {
                slow.saturating_sub(1) + signal.saturating_sub(1)
            }
            IndicatorType::Bollinger { period, .. } => period.saturating_sub(1),
        }
    }

    fn check_windows(&self) -> Result<(), CoreError> {
        let windows: &[usize] = match self {
            IndicatorType::Sma(n)
            | IndicatorType::Ema(n)
            | IndicatorType::Rsi(n)
            | IndicatorType::Roc(n)
            | IndicatorType::Volatility(n) => &[*n],
            IndicatorType::Macd { fast, slow, signal } => &[*fast, *slow, *signal],
            IndicatorType::Bollinger { period, .. } => &[*period],
        };
        if windows.contains(&0) {
            return Err(CoreError::Computation {
                indicator: self.to_string(),
                reason: "window must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Primary value at a bar index; `None` if out of range or warming up.
    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.values.get(index).and_then(IndicatorPoint::primary)
    }

    pub fn point_on(&self, date: NaiveDate) -> Option<&IndicatorPoint> {
        self.values
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| &self.values[i])
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Roc(period) => write!(f, "ROC({})", period),
            IndicatorType::Volatility(period) => write!(f, "VOLATILITY({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}

/// Compute one indicator over a validated bar series.
///
/// Fails with a data error when the series is empty or out of order, and with
/// a computation error when a window parameter is zero.
pub fn compute(bars: &[Bar], indicator: &IndicatorType) -> Result<IndicatorSeries, CoreError> {
    let instrument = bars.first().map(|b| b.instrument_id.as_str()).unwrap_or("");
    validate_series(instrument, bars)?;
    indicator.check_windows()?;
    Ok(compute_unchecked(bars, indicator))
}

pub(crate) fn compute_unchecked(bars: &[Bar], indicator: &IndicatorType) -> IndicatorSeries {
    match *indicator {
        IndicatorType::Sma(n) => calculate_sma(bars, n),
        IndicatorType::Ema(n) => calculate_ema(bars, n),
        IndicatorType::Rsi(n) => calculate_rsi(bars, n),
        IndicatorType::Roc(n) => calculate_roc(bars, n),
        IndicatorType::Volatility(n) => calculate_volatility(bars, n),
        IndicatorType::Macd { fast, slow, signal } => calculate_macd(bars, fast, slow, signal),
        IndicatorType::Bollinger {
            period,
            stddev_mult_x100,
        } => calculate_bollinger(bars, period, stddev_mult_x100),
    }
}

/// Compute a set of indicators for one instrument.
pub fn compute_all(bars: &[Bar], indicators: &[IndicatorType]) -> Result<IndicatorSet, CoreError> {
    let instrument = bars.first().map(|b| b.instrument_id.as_str()).unwrap_or("");
    validate_series(instrument, bars)?;
    let mut out = HashMap::with_capacity(indicators.len());
    for indicator in indicators {
        indicator.check_windows()?;
        out.entry(*indicator)
            .or_insert_with(|| compute_unchecked(bars, indicator));
    }
    Ok(out)
}

/// Indicators for one instrument, keyed by type.
pub type IndicatorSet = HashMap<IndicatorType, IndicatorSeries>;

/// Compute a set of indicators for many instruments.
///
/// With the `parallel` feature the instruments are processed on the rayon
/// pool. The output is always in instrument-id order, and when several
/// instruments fail the error of the first one in that order is returned.
pub fn compute_universe(
    series: &BTreeMap<String, Vec<Bar>>,
    indicators: &[IndicatorType],
) -> Result<Vec<(String, IndicatorSet)>, CoreError> {
    let prepare = |(id, bars): (&String, &Vec<Bar>)| -> Result<(String, IndicatorSet), CoreError> {
        validate_series(id, bars)?;
        Ok((id.clone(), compute_all(bars, indicators)?))
    };

    #[cfg(feature = "parallel")]
    let prepared: Vec<Result<(String, IndicatorSet), CoreError>> = {
        use rayon::prelude::*;
        let entries: Vec<(&String, &Vec<Bar>)> = series.iter().collect();
        entries.into_par_iter().map(prepare).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let prepared: Vec<Result<(String, IndicatorSet), CoreError>> =
        series.iter().map(prepare).collect();

    prepared.into_iter().collect()
}

//! Technical snapshot of one instrument at its latest visible bar.
//!
//! Reads moving averages, MACD, RSI and Bollinger bands from precomputed
//! indicator series and grades them into a 0-100 score:
//!
//! - base 50
//! - MA alignment: +20 uptrend, -20 downtrend
//! - MACD histogram: +10 above zero, -10 below
//! - RSI(12): +5 in 40..=60, +5 under 30, -5 over 70

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

use crate::domain::indicator::macd::{DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW};
use crate::domain::indicator::{IndicatorType, IndicatorValue};
use crate::domain::market::InstrumentView;

pub const MA_SHORT: IndicatorType = IndicatorType::Sma(5);
pub const MA_MID: IndicatorType = IndicatorType::Sma(20);
pub const MA_LONG: IndicatorType = IndicatorType::Sma(60);
pub const MACD: IndicatorType = IndicatorType::Macd {
    fast: DEFAULT_FAST,
    slow: DEFAULT_SLOW,
    signal: DEFAULT_SIGNAL,
};
pub const RSI_FAST: IndicatorType = IndicatorType::Rsi(6);
pub const RSI: IndicatorType = IndicatorType::Rsi(12);
pub const RSI_SLOW: IndicatorType = IndicatorType::Rsi(24);
pub const BOLLINGER: IndicatorType = IndicatorType::Bollinger {
    period: 20,
    stddev_mult_x100: 200,
};

/// Everything [`TechnicalSnapshot::from_view`] reads.
pub const INDICATORS: [IndicatorType; 8] = [
    MA_SHORT, MA_MID, MA_LONG, MACD, RSI_FAST, RSI, RSI_SLOW, BOLLINGER,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Uptrend,
    Downtrend,
    Sideways,
    Unknown,
}

impl Trend {
    /// Aligned averages with the short one at least 2 % clear of the middle
    /// one. Any missing average gives `Unknown`.
    pub fn judge(short: Option<f64>, mid: Option<f64>, long: Option<f64>) -> Self {
        let (Some(short), Some(mid), Some(long)) = (short, mid, long) else {
            return Trend::Unknown;
        };
        if short > mid && mid > long && short > mid * 1.02 {
            Trend::Uptrend
        } else if short < mid && mid < long && short < mid * 0.98 {
            Trend::Downtrend
        } else {
            Trend::Sideways
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Trend::Uptrend => "uptrend",
            Trend::Downtrend => "downtrend",
            Trend::Sideways => "sideways",
            Trend::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdReading {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerReading {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Band width in percent of the middle band.
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicalSnapshot {
    pub instrument_id: String,
    pub date: NaiveDate,
    pub close: f64,
    pub ma5: Option<f64>,
    pub ma20: Option<f64>,
    pub ma60: Option<f64>,
    pub macd: Option<MacdReading>,
    pub rsi6: Option<f64>,
    pub rsi12: Option<f64>,
    pub rsi24: Option<f64>,
    pub bollinger: Option<BollingerReading>,
    pub trend: Trend,
    pub score: f64,
}

pub fn comprehensive_score(trend: Trend, histogram: Option<f64>, rsi: Option<f64>) -> f64 {
    let mut score = 50.0;
    match trend {
        Trend::Uptrend => score += 20.0,
        Trend::Downtrend => score -= 20.0,
        Trend::Sideways | Trend::Unknown => {}
    }
    match histogram {
        Some(h) if h > 0.0 => score += 10.0,
        Some(h) if h < 0.0 => score -= 10.0,
        _ => {}
    }
    if let Some(rsi) = rsi {
        if (40.0..=60.0).contains(&rsi) || rsi < 30.0 {
            score += 5.0;
        } else if rsi > 70.0 {
            score -= 5.0;
        }
    }
    f64::clamp(score, 0.0, 100.0)
}

impl TechnicalSnapshot {
    /// Snapshot at the view's last bar; `None` for an empty view. Indicators
    /// missing from the view or still warming up read as absent.
    pub fn from_view(view: &InstrumentView<'_>) -> Option<Self> {
        let bar = view.last_bar()?;
        let ma5 = view.latest(&MA_SHORT);
        let ma20 = view.latest(&MA_MID);
        let ma60 = view.latest(&MA_LONG);
        let macd = match view.latest_value(&MACD) {
            Some(IndicatorValue::Macd {
                line,
                signal,
                histogram,
            }) => Some(MacdReading {
                line: *line,
                signal: *signal,
                histogram: *histogram,
            }),
            _ => None,
        };
        let bollinger = match view.latest_value(&BOLLINGER) {
            Some(IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
            }) => Some(BollingerReading {
                upper: *upper,
                middle: *middle,
                lower: *lower,
                width: if *middle != 0.0 {
                    (upper - lower) / middle * 100.0
                } else {
                    0.0
                },
            }),
            _ => None,
        };
        let rsi12 = view.latest(&RSI);
        let trend = Trend::judge(ma5, ma20, ma60);
        Some(TechnicalSnapshot {
            instrument_id: view.instrument_id().to_string(),
            date: bar.date,
            close: bar.close,
            ma5,
            ma20,
            ma60,
            score: comprehensive_score(trend, macd.map(|m| m.histogram), rsi12),
            macd,
            rsi6: view.latest(&RSI_FAST),
            rsi12,
            rsi24: view.latest(&RSI_SLOW),
            bollinger,
            trend,
        })
    }
}

//! Per-instrument market data and the point-in-time view handed to strategies.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::error::CoreError;
use crate::domain::indicator::{
    compute_all, compute_universe, IndicatorPoint, IndicatorSet, IndicatorType, IndicatorValue,
};
use crate::domain::ohlcv::{validate_series, Bar};

/// Bars and precomputed indicators for one instrument.
#[derive(Debug, Clone)]
pub struct InstrumentData {
    pub instrument_id: String,
    pub bars: Vec<Bar>,
    pub indicators: IndicatorSet,
    date_index: HashMap<NaiveDate, usize>,
}

impl InstrumentData {
    pub fn new(instrument_id: String, bars: Vec<Bar>, indicators: IndicatorSet) -> Self {
        let date_index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.date, i))
            .collect();
        Self {
            instrument_id,
            bars,
            indicators,
            date_index,
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn bar_on(&self, date: NaiveDate) -> Option<&Bar> {
        self.date_index.get(&date).map(|&i| &self.bars[i])
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// Number of bars dated on or before `date`.
    pub fn visible_len(&self, date: NaiveDate) -> usize {
        self.bars.partition_point(|b| b.date <= date)
    }

    /// Append a bar newer than the last one and recompute indicators.
    /// Returns `Ok(false)` and leaves the data untouched for a stale bar.
    pub fn push_bar(&mut self, bar: Bar, indicators: &[IndicatorType]) -> Result<bool, CoreError> {
        if self.last_date().is_some_and(|last| bar.date <= last) {
            return Ok(false);
        }
        let mut bars = self.bars.clone();
        bars.push(bar);
        validate_series(&self.instrument_id, &bars)?;
        let computed = compute_all(&bars, indicators)?;
        *self = InstrumentData::new(self.instrument_id.clone(), bars, computed);
        Ok(true)
    }
}

/// Validate every series and compute its indicators.
pub fn prepare_universe(
    series: BTreeMap<String, Vec<Bar>>,
    indicators: &[IndicatorType],
) -> Result<Vec<InstrumentData>, CoreError> {
    let computed = compute_universe(&series, indicators)?;
    let mut series = series;
    Ok(computed
        .into_iter()
        .map(|(id, set)| {
            let bars = series.remove(&id).unwrap_or_default();
            InstrumentData::new(id, bars, set)
        })
        .collect())
}

/// Sorted union of every instrument's bar dates.
pub fn build_unified_timeline(instruments: &[InstrumentData]) -> Vec<NaiveDate> {
    let unique_dates: BTreeSet<NaiveDate> = instruments
        .iter()
        .flat_map(|d| d.bars.iter().map(|bar| bar.date))
        .collect();
    unique_dates.into_iter().collect()
}

/// Read-only slice of one instrument's history.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentView<'a> {
    instrument_id: &'a str,
    bars: &'a [Bar],
    indicators: &'a IndicatorSet,
}

impl<'a> InstrumentView<'a> {
    pub fn new(instrument_id: &'a str, bars: &'a [Bar], indicators: &'a IndicatorSet) -> Self {
        Self {
            instrument_id,
            bars,
            indicators,
        }
    }

    pub fn instrument_id(&self) -> &'a str {
        self.instrument_id
    }

    pub fn bars(&self) -> &'a [Bar] {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last_bar(&self) -> Option<&'a Bar> {
        self.bars.last()
    }

    /// Indicator points aligned with the visible bars.
    pub fn indicator(&self, indicator: &IndicatorType) -> Option<&'a [IndicatorPoint]> {
        self.indicators
            .get(indicator)
            .map(|s| &s.values[..self.bars.len().min(s.values.len())])
    }

    /// Primary value `back` bars before the latest (0 = latest); `None` while
    /// warming up or before the start of history.
    pub fn value_back(&self, indicator: &IndicatorType, back: usize) -> Option<f64> {
        let points = self.indicator(indicator)?;
        let idx = points.len().checked_sub(1 + back)?;
        points[idx].primary()
    }

    pub fn latest(&self, indicator: &IndicatorType) -> Option<f64> {
        self.value_back(indicator, 0)
    }

    /// Full value of the latest point, for multi-value indicators.
    pub fn latest_value(&self, indicator: &IndicatorType) -> Option<&'a IndicatorValue> {
        let point = self.indicator(indicator)?.last()?;
        point.valid.then_some(&point.value)
    }
}

/// Everything a strategy may see at `as_of`: per instrument, bars and
/// indicator points up to and including that date.
#[derive(Debug, Clone)]
pub struct MarketView<'a> {
    as_of: NaiveDate,
    views: BTreeMap<&'a str, InstrumentView<'a>>,
}

impl<'a> MarketView<'a> {
    /// Slice each instrument to `as_of`. Instruments with no bar yet are left out.
    pub fn new(as_of: NaiveDate, instruments: &'a [InstrumentData]) -> Self {
        let views = instruments
            .iter()
            .filter_map(|d| {
                let n = d.visible_len(as_of);
                (n > 0).then(|| {
                    (
                        d.instrument_id.as_str(),
                        InstrumentView::new(&d.instrument_id, &d.bars[..n], &d.indicators),
                    )
                })
            })
            .collect();
        Self { as_of, views }
    }

    pub fn from_views(as_of: NaiveDate, views: Vec<InstrumentView<'a>>) -> Self {
        Self {
            as_of,
            views: views.into_iter().map(|v| (v.instrument_id, v)).collect(),
        }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn get(&self, instrument_id: &str) -> Option<&InstrumentView<'a>> {
        self.views.get(instrument_id)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentView<'a>> {
        self.views.values()
    }

    /// Fail with a data error if any bar or indicator point is dated after `as_of`.
    pub fn check_no_lookahead(&self) -> Result<(), CoreError> {
        for view in self.views.values() {
            if let Some(bar) = view.last_bar() {
                if bar.date > self.as_of {
                    return Err(CoreError::data(
                        view.instrument_id,
                        Some(bar.date),
                        format!("look-ahead: bar visible at {}", self.as_of),
                    ));
                }
            }
            for series in view.indicators.values() {
                let visible = &series.values[..view.len().min(series.values.len())];
                if let Some(point) = visible.last() {
                    if point.date > self.as_of {
                        return Err(CoreError::data(
                            view.instrument_id,
                            Some(point.date),
                            format!("look-ahead: {} point visible at {}", series.indicator_type, self.as_of),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

//! Moving-average crossover.
//!
//! The regime is "fast > slow" on an instrument's own bars. A Long fires on
//! the first bar in the regime; a bar without both averages counts as outside
//! it. The exit (Flat, or Short when configured) fires on the first bar out of
//! the regime after a defined bar inside it.
//!
//! Optional [`EntryFilters`] veto a Long: a trend filter (close must be above
//! SMA(n)) and a volatility ceiling on VOLATILITY(20). A filter whose
//! indicator is still warming up lets the entry through. Exits are never
//! filtered.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ai_picker::VOLATILITY;
use super::Strategy;
use crate::domain::indicator::IndicatorType;
use crate::domain::market::{InstrumentView, MarketView};
use crate::domain::signal::{Direction, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AverageKind {
    Sma,
    Ema,
}

impl AverageKind {
    pub fn indicator(self, window: usize) -> IndicatorType {
        match self {
            AverageKind::Sma => IndicatorType::Sma(window),
            AverageKind::Ema => IndicatorType::Ema(window),
        }
    }
}

impl fmt::Display for AverageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AverageKind::Sma => write!(f, "sma"),
            AverageKind::Ema => write!(f, "ema"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitDirection {
    Flat,
    Short,
}

impl ExitDirection {
    fn direction(self) -> Direction {
        match self {
            ExitDirection::Flat => Direction::Flat,
            ExitDirection::Short => Direction::Short,
        }
    }
}

/// Zero disables a filter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntryFilters {
    /// Longs only while the close is above SMA(trend_window).
    pub trend_window: usize,
    /// Longs skipped while daily return volatility (percent) is at or above this.
    pub max_volatility_pct: f64,
}

impl EntryFilters {
    fn trend(&self) -> Option<IndicatorType> {
        (self.trend_window > 0).then_some(IndicatorType::Sma(self.trend_window))
    }

    fn volatility_enabled(&self) -> bool {
        self.max_volatility_pct > 0.0
    }

    /// Why an entry on this view is vetoed, if it is.
    fn veto(&self, view: &InstrumentView<'_>) -> Option<String> {
        if let (Some(trend), Some(bar)) = (self.trend(), view.last_bar()) {
            if let Some(average) = view.latest(&trend) {
                if bar.close <= average {
                    return Some(format!("close {:.2} not above {trend} {average:.2}", bar.close));
                }
            }
        }
        if self.volatility_enabled() {
            if let Some(volatility) = view.latest(&VOLATILITY) {
                if volatility >= self.max_volatility_pct {
                    return Some(format!(
                        "volatility {volatility:.2}% at or above {:.2}%",
                        self.max_volatility_pct
                    ));
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverageStrategy {
    id: String,
    fast: IndicatorType,
    slow: IndicatorType,
    exit: ExitDirection,
    filters: EntryFilters,
}

impl MovingAverageStrategy {
    pub fn new(fast: usize, slow: usize, kind: AverageKind, exit: ExitDirection) -> Self {
        MovingAverageStrategy {
            id: format!("ma_cross_{kind}_{fast}_{slow}"),
            fast: kind.indicator(fast),
            slow: kind.indicator(slow),
            exit,
            filters: EntryFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: EntryFilters) -> Self {
        self.filters = filters;
        self
    }
}

impl Strategy for MovingAverageStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn required_indicators(&self) -> Vec<IndicatorType> {
        let mut indicators = vec![self.fast, self.slow];
        indicators.extend(self.filters.trend());
        if self.filters.volatility_enabled() {
            indicators.push(VOLATILITY);
        }
        indicators
    }

    fn reset(&mut self) {}

    fn generate_signals(
        &mut self,
        as_of: NaiveDate,
        universe: &[String],
        history: &MarketView<'_>,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();
        for instrument_id in universe {
            let Some(view) = history.get(instrument_id) else {
                continue;
            };
            if view.last_bar().map(|b| b.date) != Some(as_of) {
                continue;
            }
            let (Some(fast), Some(slow)) = (view.latest(&self.fast), view.latest(&self.slow)) else {
                continue;
            };
            let above = fast > slow;
            let was_above = match (view.value_back(&self.fast, 1), view.value_back(&self.slow, 1)) {
                (Some(f), Some(s)) => Some(f > s),
                _ => None,
            };
            let strength = if slow != 0.0 { (fast - slow) / slow } else { 0.0 };

            if above && was_above != Some(true) {
                if let Some(reason) = self.filters.veto(view) {
                    tracing::debug!(instrument = %instrument_id, %as_of, %reason, "entry filtered");
                    continue;
                }
                signals.push(Signal::new(
                    instrument_id,
                    as_of,
                    Direction::Long,
                    strength,
                    &self.id,
                    format!("{} crossed above {}", self.fast, self.slow),
                ));
            } else if !above && was_above == Some(true) {
                signals.push(Signal::new(
                    instrument_id,
                    as_of,
                    self.exit.direction(),
                    strength,
                    &self.id,
                    format!("{} crossed below {}", self.fast, self.slow),
                ));
            }
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;
    use crate::domain::market::{build_unified_timeline, prepare_universe, InstrumentData};
    use std::collections::BTreeMap;

    fn prepare(closes: &[f64], strategy: &MovingAverageStrategy) -> Vec<InstrumentData> {
        let mut series = BTreeMap::new();
        series.insert("TEST".to_string(), make_bars(closes));
        prepare_universe(series, &strategy.required_indicators()).unwrap()
    }

    fn replay(closes: &[f64], strategy: &mut MovingAverageStrategy) -> Vec<(usize, Signal)> {
        let data = prepare(closes, strategy);
        let universe = vec!["TEST".to_string()];
        strategy.reset();
        build_unified_timeline(&data)
            .into_iter()
            .enumerate()
            .flat_map(|(i, date)| {
                let view = MarketView::new(date, &data);
                strategy
                    .generate_signals(date, &universe, &view)
                    .into_iter()
                    .map(move |s| (i, s))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn sma_crossover_fixture() {
        let mut strategy = MovingAverageStrategy::new(2, 4, AverageKind::Sma, ExitDirection::Flat);
        let signals = replay(&[1.0, 2.0, 3.0, 2.0, 1.0], &mut strategy);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].0, 3);
        assert_eq!(signals[0].1.direction, Direction::Long);
        assert!((signals[0].1.strength - 0.25).abs() < 1e-12);
        assert_eq!(signals[0].1.reason, "SMA(2) crossed above SMA(4)");
        assert_eq!(signals[1].0, 4);
        assert_eq!(signals[1].1.direction, Direction::Flat);
    }

    #[test]
    fn no_duplicate_signals_while_gap_persists() {
        let mut strategy = MovingAverageStrategy::new(2, 4, AverageKind::Sma, ExitDirection::Flat);
        let signals = replay(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], &mut strategy);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].1.direction, Direction::Long);
    }

    #[test]
    fn exit_can_be_short() {
        let mut strategy = MovingAverageStrategy::new(2, 4, AverageKind::Sma, ExitDirection::Short);
        let signals = replay(&[1.0, 2.0, 3.0, 2.0, 1.0], &mut strategy);
        assert_eq!(signals[1].1.direction, Direction::Short);
        assert!(signals[1].1.strength < 0.0);
    }

    #[test]
    fn first_defined_bar_below_is_not_an_exit() {
        let mut strategy = MovingAverageStrategy::new(2, 4, AverageKind::Ema, ExitDirection::Flat);
        let signals = replay(&[5.0, 4.0, 3.0, 2.0, 1.0], &mut strategy);
        assert!(signals.is_empty());
    }

    #[test]
    fn trend_filter_blocks_entries_below_the_long_average() {
        // Long decline, then a bounce that crosses SMA(2) over SMA(4) while
        // the close is still under SMA(10).
        let mut closes: Vec<f64> = (0..12).map(|i| 30.0 - i as f64).collect();
        closes.extend([20.0, 21.0, 22.0]);
        let filters = EntryFilters {
            trend_window: 10,
            max_volatility_pct: 0.0,
        };
        let mut plain = MovingAverageStrategy::new(2, 4, AverageKind::Sma, ExitDirection::Flat);
        let mut filtered = plain.clone().with_filters(filters);
        assert_eq!(
            filtered.required_indicators(),
            vec![IndicatorType::Sma(2), IndicatorType::Sma(4), IndicatorType::Sma(10)]
        );

        let entries = replay(&closes, &mut plain);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.direction, Direction::Long);
        assert!(replay(&closes, &mut filtered).is_empty());
    }

    #[test]
    fn trend_filter_passes_while_warming_up() {
        let filters = EntryFilters {
            trend_window: 60,
            max_volatility_pct: 0.0,
        };
        let mut strategy =
            MovingAverageStrategy::new(2, 4, AverageKind::Sma, ExitDirection::Flat).with_filters(filters);
        let signals = replay(&[1.0, 2.0, 3.0, 2.0, 1.0], &mut strategy);
        assert_eq!(signals.len(), 2);
    }

    #[test]
    fn volatility_filter_blocks_choppy_entries_but_not_exits() {
        // 10 % swings for 24 bars, then a crossover up and back down.
        let mut closes: Vec<f64> = (0..24)
            .map(|i| if i % 2 == 0 { 100.0 } else { 110.0 })
            .collect();
        closes.extend([100.0, 100.0, 100.0, 100.0, 120.0, 130.0, 90.0, 80.0]);
        let filters = EntryFilters {
            trend_window: 0,
            max_volatility_pct: 5.0,
        };
        let mut plain = MovingAverageStrategy::new(2, 4, AverageKind::Sma, ExitDirection::Flat);
        let mut filtered = plain.clone().with_filters(filters);
        assert!(filtered.required_indicators().contains(&VOLATILITY));

        let unfiltered = replay(&closes, &mut plain);
        let kept = replay(&closes, &mut filtered);
        let entry_at = |signals: &[(usize, Signal)], i: usize| {
            signals
                .iter()
                .any(|(idx, s)| *idx == i && s.direction == Direction::Long)
        };
        assert!(entry_at(&unfiltered, 28));
        assert!(!entry_at(&kept, 28));
        assert!(kept
            .iter()
            .any(|(idx, s)| *idx == 30 && s.direction == Direction::Flat));
    }

    #[test]
    fn id_and_indicators() {
        let strategy = MovingAverageStrategy::new(5, 20, AverageKind::Ema, ExitDirection::Flat);
        assert_eq!(strategy.id(), "ma_cross_ema_5_20");
        assert_eq!(
            strategy.required_indicators(),
            vec![IndicatorType::Ema(5), IndicatorType::Ema(20)]
        );
    }
}

//! Near-real-time session.
//!
//! A poller thread asks the feed for the latest bar of every instrument on a
//! timer and queues each round on an mpsc channel. The session drains the
//! queue on the caller's thread, so the portfolio is only ever mutated from
//! one place, through the same [`TickProcessor`] the backtest uses.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::backtest::{BacktestConfig, BacktestResult, TickProcessor, TickReport};
use super::error::CoreError;
use super::indicator::IndicatorType;
use super::market::{prepare_universe, InstrumentData};
use super::ohlcv::Bar;
use super::strategy::Strategy;
use crate::ports::data_port::MarketDataFeed;

/// Spawn the quote poller. One message per round; rounds where every quote
/// failed are not sent. The thread exits when `stop` is set or the receiver
/// is gone.
pub fn spawn_poller(
    feed: Arc<dyn MarketDataFeed>,
    universe: Vec<String>,
    interval: Duration,
    tx: Sender<Vec<Bar>>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, CoreError> {
    let handle = thread::Builder::new()
        .name("alphadesk-poller".into())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let mut round = Vec::with_capacity(universe.len());
                for id in &universe {
                    match feed.get_quote(id) {
                        Ok(bar) => round.push(bar),
                        Err(err) => tracing::warn!(instrument = %id, error = %err, "quote failed"),
                    }
                }
                if !round.is_empty() && tx.send(round).is_err() {
                    break;
                }
                thread::sleep(interval);
            }
            tracing::debug!("poller stopped");
        })?;
    Ok(handle)
}

pub struct LiveSession {
    processor: TickProcessor,
    strategy: Box<dyn Strategy>,
    indicators: Vec<IndicatorType>,
    instruments: Vec<InstrumentData>,
    index: HashMap<String, usize>,
    last_tick: Option<NaiveDate>,
    risk_free_rate: f64,
}

impl LiveSession {
    /// Start a session over `universe`, warmed with whatever `history` holds.
    /// Instruments without history start empty.
    pub fn new(
        config: &BacktestConfig,
        mut strategy: Box<dyn Strategy>,
        universe: &[String],
        history: BTreeMap<String, Vec<Bar>>,
    ) -> Result<Self, CoreError> {
        let indicators = strategy.required_indicators();
        let mut history = history;
        history.retain(|id, bars| universe.contains(id) && !bars.is_empty());
        let mut instruments = prepare_universe(history, &indicators)?;
        let seeded: BTreeSet<String> = instruments.iter().map(|d| d.instrument_id.clone()).collect();
        for id in universe {
            if !seeded.contains(id) {
                instruments.push(InstrumentData::new(id.clone(), Vec::new(), HashMap::new()));
            }
        }
        instruments.sort_by(|a, b| a.instrument_id.cmp(&b.instrument_id));
        instruments.dedup_by(|a, b| a.instrument_id == b.instrument_id);
        let index = instruments
            .iter()
            .enumerate()
            .map(|(i, d)| (d.instrument_id.clone(), i))
            .collect();
        let last_tick = instruments.iter().filter_map(|d| d.last_date()).max();

        strategy.reset();
        Ok(LiveSession {
            processor: TickProcessor::new(config),
            strategy,
            indicators,
            instruments,
            index,
            last_tick,
            risk_free_rate: config.risk_free_rate,
        })
    }

    pub fn instruments(&self) -> &[InstrumentData] {
        &self.instruments
    }

    pub fn last_tick(&self) -> Option<NaiveDate> {
        self.last_tick
    }

    pub fn processor(&self) -> &TickProcessor {
        &self.processor
    }

    /// Fold one polling round into the market and run a tick for every new
    /// date it brings, oldest first.
    pub fn process_batch(&mut self, bars: Vec<Bar>) -> Result<Vec<TickReport>, CoreError> {
        let mut new_dates = BTreeSet::new();
        for bar in bars {
            let Some(&i) = self.index.get(&bar.instrument_id) else {
                tracing::warn!(instrument = %bar.instrument_id, "quote for instrument outside the universe");
                continue;
            };
            let (id, date) = (bar.instrument_id.clone(), bar.date);
            match self.instruments[i].push_bar(bar, &self.indicators) {
                Ok(true) => {
                    new_dates.insert(date);
                }
                Ok(false) => tracing::trace!(instrument = %id, %date, "stale quote ignored"),
                Err(err) => tracing::warn!(instrument = %id, %date, error = %err, "invalid quote dropped"),
            }
        }

        let mut reports = Vec::new();
        for date in new_dates {
            if self.last_tick.is_some_and(|last| date <= last) {
                continue;
            }
            let report =
                self.processor
                    .process_tick(date, &self.instruments, self.strategy.as_mut())?;
            tracing::info!(
                %date,
                active = report.active,
                trades = report.trades,
                rejected = report.rejected,
                total_value = report.total_value,
                "live tick"
            );
            self.last_tick = Some(date);
            reports.push(report);
        }
        Ok(reports)
    }

    /// Drain `rx` until it closes, `stop` is set or `max_ticks` ticks ran.
    pub fn drain(
        &mut self,
        rx: &Receiver<Vec<Bar>>,
        stop: &AtomicBool,
        max_ticks: Option<usize>,
    ) -> Result<usize, CoreError> {
        let mut ticks = 0;
        while !stop.load(Ordering::Relaxed) && max_ticks.is_none_or(|max| ticks < max) {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(batch) => ticks += self.process_batch(batch)?.len(),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(ticks)
    }

    /// Poll `feed` every `interval` until `max_ticks` ticks ran or `stop` is set.
    pub fn run(
        &mut self,
        feed: Arc<dyn MarketDataFeed>,
        interval: Duration,
        max_ticks: Option<usize>,
        stop: Arc<AtomicBool>,
    ) -> Result<usize, CoreError> {
        let span = tracing::info_span!("live", strategy = self.strategy.id());
        let _guard = span.enter();

        let universe: Vec<String> = self.instruments.iter().map(|d| d.instrument_id.clone()).collect();
        let (tx, rx) = mpsc::channel();
        let poller_stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_poller(feed, universe, interval, tx, Arc::clone(&poller_stop))?;

        let outcome = self.drain(&rx, &stop, max_ticks);
        poller_stop.store(true, Ordering::Relaxed);
        drop(rx);
        if handle.join().is_err() {
            return Err(CoreError::InvalidState {
                reason: "poller thread panicked".to_string(),
            });
        }
        let ticks = outcome?;
        tracing::info!(ticks, "live session stopped");
        Ok(ticks)
    }

    pub fn finish(self) -> BacktestResult {
        let id = self.strategy.id().to_string();
        self.processor.finish(&id, self.risk_free_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;
    use crate::domain::risk::RiskLimit;
    use crate::domain::strategy::{AverageKind, ExitDirection, MovingAverageStrategy};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn config() -> BacktestConfig {
        BacktestConfig {
            initial_capital: 10_000.0,
            limits: RiskLimit {
                max_position_pct: 0.0,
                ..RiskLimit::default()
            },
            position_size: 0.5,
            ..BacktestConfig::default()
        }
    }

    fn strategy() -> Box<dyn Strategy> {
        Box::new(MovingAverageStrategy::new(2, 4, AverageKind::Sma, ExitDirection::Flat))
    }

    fn universe() -> Vec<String> {
        vec!["TEST".to_string()]
    }

    /// Feed that hands out one scripted bar per quote, then repeats the last.
    struct ScriptedFeed {
        bars: Mutex<VecDeque<Bar>>,
        last: Mutex<Option<Bar>>,
    }

    impl ScriptedFeed {
        fn new(bars: Vec<Bar>) -> Self {
            ScriptedFeed {
                bars: Mutex::new(bars.into()),
                last: Mutex::new(None),
            }
        }
    }

    impl MarketDataFeed for ScriptedFeed {
        fn get_history(&self, _: &str, _: NaiveDate, _: NaiveDate) -> Result<Vec<Bar>, CoreError> {
            Ok(Vec::new())
        }

        fn get_quote(&self, instrument_id: &str) -> Result<Bar, CoreError> {
            let next = self.bars.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(bar) = next {
                *last = Some(bar);
            }
            last.clone()
                .ok_or_else(|| CoreError::data(instrument_id, None, "no quote yet"))
        }

        fn list_instruments(&self) -> Result<Vec<String>, CoreError> {
            Ok(universe())
        }
    }

    #[test]
    fn batches_match_backtest_crossover() {
        let bars = make_bars(&[1.0, 2.0, 3.0, 2.0, 1.0]);
        let mut session = LiveSession::new(&config(), strategy(), &universe(), BTreeMap::new()).unwrap();
        for bar in bars {
            assert_eq!(session.process_batch(vec![bar]).unwrap().len(), 1);
        }
        let result = session.finish();
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].quantity_delta, 2500);
        assert_eq!(result.trades[1].quantity_delta, -2500);
        assert_eq!(result.valuation_history.len(), 5);
    }

    #[test]
    fn stale_quotes_do_not_tick() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        let mut session = LiveSession::new(&config(), strategy(), &universe(), BTreeMap::new()).unwrap();
        session.process_batch(vec![bars[0].clone()]).unwrap();
        session.process_batch(vec![bars[1].clone()]).unwrap();
        assert!(session.process_batch(vec![bars[1].clone()]).unwrap().is_empty());
        assert!(session.process_batch(vec![bars[0].clone()]).unwrap().is_empty());
        assert_eq!(session.instruments()[0].bar_count(), 2);
        assert_eq!(session.last_tick(), Some(bars[1].date));
    }

    #[test]
    fn history_warms_without_ticking() {
        let bars = make_bars(&[1.0, 2.0, 3.0, 2.0, 1.0]);
        let mut history = BTreeMap::new();
        history.insert("TEST".to_string(), bars[..3].to_vec());
        let mut session = LiveSession::new(&config(), strategy(), &universe(), history).unwrap();
        assert_eq!(session.last_tick(), Some(bars[2].date));
        assert!(session.processor().portfolio().portfolio().valuation_history.is_empty());

        let reports = session.process_batch(vec![bars[3].clone()]).unwrap();
        assert_eq!(reports.len(), 1);
        // SMA(2) crosses above SMA(4) on the fourth bar
        assert_eq!(reports[0].trades, 1);
    }

    #[test]
    fn unknown_and_invalid_quotes_are_skipped() {
        let mut session = LiveSession::new(&config(), strategy(), &universe(), BTreeMap::new()).unwrap();
        let mut foreign = make_bars(&[5.0]).remove(0);
        foreign.instrument_id = "OTHER".into();
        let mut broken = make_bars(&[5.0]).remove(0);
        broken.close = -1.0;
        assert!(session.process_batch(vec![foreign, broken]).unwrap().is_empty());
        assert_eq!(session.instruments()[0].bar_count(), 0);
    }

    #[test]
    fn run_polls_feed_until_tick_limit() {
        let feed = Arc::new(ScriptedFeed::new(make_bars(&[1.0, 2.0, 3.0, 2.0, 1.0])));
        let mut session = LiveSession::new(&config(), strategy(), &universe(), BTreeMap::new()).unwrap();
        let ticks = session
            .run(feed, Duration::from_millis(1), Some(5), Arc::new(AtomicBool::new(false)))
            .unwrap();
        assert_eq!(ticks, 5);
        let result = session.finish();
        assert_eq!(result.valuation_history.len(), 5);
        assert_eq!(result.trades.len(), 2);
    }

    #[test]
    fn drain_stops_when_sender_closes() {
        let bars = make_bars(&[1.0, 2.0]);
        let mut session = LiveSession::new(&config(), strategy(), &universe(), BTreeMap::new()).unwrap();
        let (tx, rx) = mpsc::channel();
        tx.send(vec![bars[0].clone()]).unwrap();
        tx.send(vec![bars[1].clone()]).unwrap();
        drop(tx);
        let ticks = session.drain(&rx, &AtomicBool::new(false), None).unwrap();
        assert_eq!(ticks, 2);
    }
}

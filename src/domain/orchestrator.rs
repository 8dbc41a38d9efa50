//! Wires a [`PortfolioConfig`] to the data feed, the engine and a report sink.

use std::collections::BTreeMap;

use super::backtest::{BacktestEngine, BacktestResult};
use super::config::PortfolioConfig;
use super::error::CoreError;
use super::ohlcv::Bar;
use crate::ports::data_port::MarketDataFeed;
use crate::ports::report_port::ReportSink;

/// Fetch the configured universe over the configured window. Instruments
/// with no bars in the window are left out with a warning; an empty result
/// is a data error.
pub fn fetch_market(
    config: &PortfolioConfig,
    feed: &dyn MarketDataFeed,
) -> Result<BTreeMap<String, Vec<Bar>>, CoreError> {
    let mut market = BTreeMap::new();
    for id in &config.universe {
        let bars = feed.get_history(id, config.start_date, config.end_date)?;
        if bars.is_empty() {
            tracing::warn!(instrument = %id, "no bars in window, skipping");
            continue;
        }
        tracing::debug!(instrument = %id, bars = bars.len(), "history loaded");
        market.insert(id.clone(), bars);
    }
    if market.is_empty() {
        return Err(CoreError::data(
            "*",
            None,
            format!(
                "no data for any instrument between {} and {}",
                config.start_date, config.end_date
            ),
        ));
    }
    Ok(market)
}

/// Run the backtest a configuration describes.
pub fn run_backtest(
    config: &PortfolioConfig,
    feed: &dyn MarketDataFeed,
) -> Result<BacktestResult, CoreError> {
    let span = tracing::info_span!("portfolio", name = %config.name);
    let _guard = span.enter();

    config.validate()?;
    let market = fetch_market(config, feed)?;
    let mut strategy = config.build_strategy();
    tracing::info!(
        strategy = strategy.id(),
        instruments = market.len(),
        start = %config.start_date,
        end = %config.end_date,
        "starting backtest"
    );
    BacktestEngine::new(config.backtest_config()).run(market, strategy.as_mut())
}

/// Run and hand the frozen result to `sink`.
pub fn run_and_report(
    config: &PortfolioConfig,
    feed: &dyn MarketDataFeed,
    sink: &dyn ReportSink,
    destination: &str,
) -> Result<BacktestResult, CoreError> {
    let result = run_backtest(config, feed)?;
    sink.write(&result, config, destination)?;
    Ok(result)
}

//! Report sink writing a run into a directory of CSV files plus a JSON summary.
//!
//! Layout of `destination`:
//!
//! - `summary.json`: portfolio config, strategy id, final value and metrics
//! - `trades.csv`: the full trade log, rejections included
//! - `valuations.csv`: one row per tick
//! - `instruments.csv`: per-instrument closing-trade breakdown

use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::config::PortfolioConfig;
use crate::domain::error::CoreError;
use crate::domain::metrics::Metrics;
use crate::ports::report_port::ReportSink;

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        CsvReportAdapter
    }
}

#[derive(Serialize)]
struct Summary<'a> {
    portfolio: &'a PortfolioConfig,
    strategy_id: &'a str,
    initial_capital: f64,
    final_value: f64,
    final_cash: f64,
    open_positions: usize,
    trade_count: usize,
    metrics: &'a Metrics,
}

#[derive(Serialize)]
struct TradeRow<'a> {
    date: String,
    instrument_id: &'a str,
    action: String,
    quantity_delta: i64,
    price: f64,
    commission: f64,
    realized_pnl: f64,
    position_opened: String,
    source_strategy_id: &'a str,
    rejection: String,
    reason: &'a str,
}

#[derive(Serialize)]
struct ValuationRow {
    date: String,
    total_value: f64,
}

fn csv_err(err: csv::Error) -> CoreError {
    CoreError::Serialization {
        reason: err.to_string(),
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<(), CoreError> {
    let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
    for row in rows {
        wtr.serialize(row).map_err(csv_err)?;
    }
    wtr.flush()?;
    Ok(())
}

impl ReportSink for CsvReportAdapter {
    fn write(
        &self,
        result: &BacktestResult,
        config: &PortfolioConfig,
        destination: &str,
    ) -> Result<(), CoreError> {
        let dir = Path::new(destination);
        fs::create_dir_all(dir)?;

        let summary = Summary {
            portfolio: config,
            strategy_id: &result.strategy_id,
            initial_capital: result.initial_capital,
            final_value: result.final_value(),
            final_cash: result.final_cash,
            open_positions: result.final_positions.len(),
            trade_count: result.trades.len(),
            metrics: &result.metrics,
        };
        fs::write(dir.join("summary.json"), serde_json::to_string_pretty(&summary)?)?;

        write_rows(
            &dir.join("trades.csv"),
            result.trades.iter().map(|t| TradeRow {
                date: t.date.to_string(),
                instrument_id: &t.instrument_id,
                action: format!("{:?}", t.action),
                quantity_delta: t.quantity_delta,
                price: t.price,
                commission: t.commission,
                realized_pnl: t.realized_pnl,
                position_opened: t.position_opened.map(|d| d.to_string()).unwrap_or_default(),
                source_strategy_id: &t.source_strategy_id,
                rejection: t.rejection.map(|r| r.to_string()).unwrap_or_default(),
                reason: &t.reason,
            }),
        )?;

        write_rows(
            &dir.join("valuations.csv"),
            result.valuation_history.iter().map(|p| ValuationRow {
                date: p.date.to_string(),
                total_value: p.total_value,
            }),
        )?;

        write_rows(&dir.join("instruments.csv"), result.instrument_results.iter())?;

        tracing::info!(
            destination,
            trades = result.trades.len(),
            "report written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use crate::domain::backtest::{BacktestConfig, BacktestEngine};
    use crate::domain::indicator::test_support::make_bars;
    use crate::domain::strategy::{AverageKind, ExitDirection, MovingAverageStrategy};
    use std::collections::BTreeMap;

    fn sample_config() -> PortfolioConfig {
        let adapter = FileConfigAdapter::from_string(
            "[portfolio]\nname = report\nuniverse = TEST\nstart_date = 2024-01-01\nend_date = 2024-01-31\n\n[backtest]\ninitial_capital = 10000\n\n[risk]\nmax_positions_count = 1\n\n[strategy]\nkind = moving_average\nfast_window = 2\nslow_window = 4\n",
        )
        .unwrap();
        PortfolioConfig::from_config(&adapter).unwrap()
    }

    fn sample_result() -> BacktestResult {
        let mut market = BTreeMap::new();
        market.insert("TEST".to_string(), make_bars(&[1.0, 2.0, 3.0, 2.0, 1.0]));
        let mut strategy = MovingAverageStrategy::new(2, 4, AverageKind::Sma, ExitDirection::Flat);
        BacktestEngine::new(BacktestConfig {
            initial_capital: 10_000.0,
            position_size: 0.1,
            ..BacktestConfig::default()
        })
        .run(market, &mut strategy)
        .unwrap()
    }

    #[test]
    fn writes_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run");
        let result = sample_result();
        CsvReportAdapter::new()
            .write(&result, &sample_config(), out.to_str().unwrap())
            .unwrap();

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary["portfolio"]["name"], "report");
        assert_eq!(summary["strategy_id"], "ma_cross_sma_2_4");
        assert_eq!(summary["trade_count"], result.trades.len());

        let trades = fs::read_to_string(out.join("trades.csv")).unwrap();
        let mut lines = trades.lines();
        assert!(lines.next().unwrap().starts_with("date,instrument_id,action"));
        assert_eq!(lines.count(), result.trades.len());
        assert!(trades.contains("Open"));

        let valuations = fs::read_to_string(out.join("valuations.csv")).unwrap();
        assert_eq!(valuations.lines().count(), 1 + result.valuation_history.len());
        assert!(out.join("instruments.csv").exists());
    }
}

//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_portfolio_store::JsonPortfolioStore;
use crate::domain::backtest::BacktestResult;
use crate::domain::config::PortfolioConfig;
use crate::domain::error::{ConfigError, ConfigIssue, CoreError};
use crate::domain::indicator::compute_all;
use crate::domain::live::LiveSession;
use crate::domain::market::InstrumentView;
use crate::domain::orchestrator;
use crate::domain::technical::{self, TechnicalSnapshot};
use crate::ports::data_port::MarketDataFeed;
use crate::ports::portfolio_store::PortfolioConfigStore;

#[derive(Parser, Debug)]
#[command(name = "alphadesk", about = "Quant equity strategy backtester")]
pub struct Cli {
    /// Tracing filter, e.g. `info` or `alphadesk=debug`. ALPHADESK_LOG overrides it.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Where a portfolio configuration comes from.
#[derive(clap::Args, Debug, Clone)]
pub struct ConfigSource {
    /// INI or JSON portfolio configuration file
    #[arg(short, long, conflicts_with = "portfolio")]
    pub config: Option<PathBuf>,
    /// Name of a saved portfolio in the store
    #[arg(short, long, requires = "store")]
    pub portfolio: Option<String>,
    /// Directory of saved portfolio configurations
    #[arg(long)]
    pub store: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Ini,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[command(flatten)]
        source: ConfigSource,
        /// Directory of `<instrument>.csv` bar files
        #[arg(short, long)]
        data: PathBuf,
        /// Report directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the full result as JSON on stdout
        #[arg(long)]
        json: bool,
        /// Validate and describe the run without executing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Warm up on the configured window, then trade new bars as they appear
    Live {
        #[command(flatten)]
        source: ConfigSource,
        /// Directory of `<instrument>.csv` bar files, polled for new rows
        #[arg(short, long)]
        data: PathBuf,
        /// Milliseconds between quote polls
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Stop after this many ticks
        #[arg(long)]
        max_ticks: Option<usize>,
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Print the session result as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Validate a portfolio configuration
    Validate {
        #[command(flatten)]
        source: ConfigSource,
    },
    /// Convert a configuration, or save it into the store
    ExportConfig {
        #[command(flatten)]
        source: ConfigSource,
        #[arg(short, long, value_enum, default_value = "json")]
        format: ExportFormat,
        /// Save into this store directory instead of printing
        #[arg(long)]
        save_to: Option<PathBuf>,
    },
    /// Show data ranges in a CSV data directory
    Info {
        #[arg(short, long)]
        data: PathBuf,
        #[arg(short, long)]
        instrument: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    if let Err(e) = init_tracing(&cli.log_level) {
        return report_error(&e);
    }
    let outcome = match cli.command {
        Command::Backtest {
            source,
            data,
            output,
            json,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&source)
            } else {
                run_backtest(&source, &data, output.as_deref(), json)
            }
        }
        Command::Live {
            source,
            data,
            interval_ms,
            max_ticks,
            duration_secs,
            json,
        } => run_live(
            &source,
            &data,
            Duration::from_millis(interval_ms),
            max_ticks,
            duration_secs.map(Duration::from_secs),
            json,
        ),
        Command::Validate { source } => run_validate(&source),
        Command::ExportConfig {
            source,
            format,
            save_to,
        } => run_export(&source, format, save_to.as_deref()),
        Command::Info { data, instrument } => run_info(&data, instrument.as_deref()),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(&e),
    }
}

pub fn init_tracing(log_level: &str) -> Result<(), CoreError> {
    let filter = std::env::var("ALPHADESK_LOG").unwrap_or_else(|_| log_level.to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter).map_err(|err| {
        CoreError::Config(ConfigError::single(ConfigIssue::invalid(
            "cli",
            "log-level",
            format!("invalid log filter: {err}"),
        )))
    })?;
    // A subscriber may already be installed when called more than once in-process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}

fn report_error(err: &CoreError) -> ExitCode {
    match err {
        CoreError::Config(config) => {
            eprintln!("error: invalid configuration");
            for issue in &config.issues {
                eprintln!("  {issue}");
            }
        }
        other => eprintln!("error: {other}"),
    }
    ExitCode::from(err)
}

/// Load from an INI or JSON file, or by name from a store.
pub fn load_portfolio(source: &ConfigSource) -> Result<PortfolioConfig, CoreError> {
    if let Some(name) = &source.portfolio {
        let store = source.store.as_deref().unwrap_or(Path::new("."));
        eprintln!("Loading portfolio '{name}' from {}", store.display());
        return JsonPortfolioStore::new(store).load(name);
    }
    let Some(path) = &source.config else {
        return Err(ConfigError::single(ConfigIssue::missing("cli", "config")).into());
    };
    eprintln!("Loading config from {}", path.display());
    load_config_file(path)
}

pub fn load_config_file(path: &Path) -> Result<PortfolioConfig, CoreError> {
    if path.extension().is_some_and(|ext| ext == "json") {
        let config: PortfolioConfig = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    } else {
        let adapter = FileConfigAdapter::from_file(path)?;
        Ok(PortfolioConfig::from_config(&adapter)?)
    }
}

fn run_backtest(
    source: &ConfigSource,
    data: &Path,
    output: Option<&Path>,
    json: bool,
) -> Result<(), CoreError> {
    let config = load_portfolio(source)?;
    let feed = CsvAdapter::new(data.to_path_buf());

    eprintln!(
        "Running backtest '{}': {} instruments, {} to {}",
        config.name,
        config.universe.len(),
        config.start_date,
        config.end_date
    );
    let result = match output {
        Some(dir) => {
            let destination = dir.to_string_lossy();
            let result =
                orchestrator::run_and_report(&config, &feed, &CsvReportAdapter::new(), &destination)?;
            eprintln!("\nReport written to: {}", dir.display());
            result
        }
        None => orchestrator::run_backtest(&config, &feed)?,
    };

    print_summary(&result);
    if json {
        println!("{}", result.to_json()?);
    }
    Ok(())
}

fn run_live(
    source: &ConfigSource,
    data: &Path,
    interval: Duration,
    max_ticks: Option<usize>,
    duration: Option<Duration>,
    json: bool,
) -> Result<(), CoreError> {
    let config = load_portfolio(source)?;
    let feed: Arc<dyn MarketDataFeed> = Arc::new(CsvAdapter::new(data.to_path_buf()));
    let history = orchestrator::fetch_market(&config, feed.as_ref())?;
    let mut session = LiveSession::new(
        &config.backtest_config(),
        config.build_strategy(),
        &config.universe,
        history,
    )?;
    eprintln!(
        "Live session '{}': {} instruments, warmed up to {}",
        config.name,
        config.universe.len(),
        session
            .last_tick()
            .map_or_else(|| "nothing".to_string(), |d| d.to_string())
    );

    let stop = Arc::new(AtomicBool::new(false));
    if let Some(limit) = duration {
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("alphadesk-deadline".into())
            .spawn(move || {
                std::thread::sleep(limit);
                stop.store(true, Ordering::Relaxed);
            })?;
    }
    let ticks = session.run(feed, interval, max_ticks, stop)?;
    eprintln!("\nLive ticks:       {ticks}");

    let result = session.finish();
    print_summary(&result);
    if json {
        println!("{}", result.to_json()?);
    }
    Ok(())
}

pub fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("\n=== Results: {} ===", result.strategy_id);
    eprintln!("Final Value:      {:.2}", result.final_value());
    eprintln!("Total Return:     {:.2}%", m.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", m.annualized_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown * 100.0);
    eprintln!("Volatility:       {:.2}%", m.volatility * 100.0);
    eprintln!("VaR (95%, 1d):    {:.2}%", m.var_95 * 100.0);
    eprintln!("Calmar Ratio:     {:.2}", m.calmar_ratio);
    eprintln!("Risk Level:       {}", m.risk_level);
    eprintln!(
        "Closed Trades:    {}",
        m.trades_won + m.trades_lost + m.trades_breakeven
    );
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", m.profit_factor);
    eprintln!("Rejected Signals: {}", m.rejected_signals);
    eprintln!("Open Positions:   {}", result.final_positions.len());

    if !result.instrument_results.is_empty() {
        eprintln!("\n=== Per-Instrument Summary ===");
        for r in &result.instrument_results {
            let sign = if r.total_pnl >= 0.0 { "+" } else { "" };
            eprintln!(
                "  {}:  {} trades, {:.1}% win rate, {}{:.0}",
                r.instrument_id,
                r.total_trades,
                r.win_rate * 100.0,
                sign,
                r.total_pnl,
            );
        }
    }
}

fn describe(config: &PortfolioConfig) {
    let strategy = config.build_strategy();
    let mut indicators: Vec<String> = strategy
        .required_indicators()
        .iter()
        .map(|i| i.to_string())
        .collect();
    indicators.sort();

    eprintln!("\nPortfolio: {}", config.name);
    eprintln!("  window:   {} to {}", config.start_date, config.end_date);
    eprintln!("  universe: {}", config.universe.join(", "));
    eprintln!("  strategy: {} ({})", strategy.id(), config.strategy.kind());
    eprintln!("  indicators: {}", indicators.join(", "));
    eprintln!(
        "  risk: max {} positions, {}% per position, stop {}%, take profit {}%",
        config.risk.max_positions_count,
        config.risk.max_position_pct,
        config.risk.stop_loss_pct,
        config.risk.take_profit_pct
    );
}

pub fn run_dry_run(source: &ConfigSource) -> Result<(), CoreError> {
    let config = load_portfolio(source)?;
    describe(&config);
    eprintln!("\nDry run complete: configuration is valid");
    Ok(())
}

fn run_validate(source: &ConfigSource) -> Result<(), CoreError> {
    let config = load_portfolio(source)?;
    describe(&config);
    eprintln!("\nPortfolio configuration is valid.");
    Ok(())
}

fn run_export(
    source: &ConfigSource,
    format: ExportFormat,
    save_to: Option<&Path>,
) -> Result<(), CoreError> {
    let config = load_portfolio(source)?;
    if let Some(dir) = save_to {
        JsonPortfolioStore::new(dir).save(&config)?;
        eprintln!("Saved portfolio '{}' to {}", config.name, dir.display());
        return Ok(());
    }
    match format {
        ExportFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        ExportFormat::Ini => print!("{}", FileConfigAdapter::render(&config)),
    }
    Ok(())
}

fn run_info(data: &Path, instrument: Option<&str>) -> Result<(), CoreError> {
    let feed = CsvAdapter::new(data.to_path_buf());
    let ids = match instrument {
        Some(id) => vec![id.to_string()],
        None => feed.list_instruments()?,
    };
    if ids.is_empty() {
        eprintln!("No instruments found in {}", data.display());
        return Ok(());
    }
    for id in &ids {
        match feed.get_history(id, NaiveDate::MIN, NaiveDate::MAX) {
            Ok(bars) => match (bars.first(), bars.last()) {
                (Some(first), Some(last)) => {
                    println!("{id}: {} bars, {} to {}", bars.len(), first.date, last.date);
                    if instrument.is_some() {
                        print_technical(id, &bars)?;
                    }
                }
                _ => eprintln!("{id}: no data found"),
            },
            Err(e) if instrument.is_some() => return Err(e),
            Err(e) => eprintln!("error reading {id}: {e}"),
        }
    }
    Ok(())
}

fn print_technical(id: &str, bars: &[crate::domain::ohlcv::Bar]) -> Result<(), CoreError> {
    let indicators = compute_all(bars, &technical::INDICATORS)?;
    let Some(snap) = TechnicalSnapshot::from_view(&InstrumentView::new(id, bars, &indicators)) else {
        return Ok(());
    };
    let show = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"));
    println!("  close {:.2} on {}", snap.close, snap.date);
    println!(
        "  MA5 {}  MA20 {}  MA60 {}  trend {}",
        show(snap.ma5),
        show(snap.ma20),
        show(snap.ma60),
        snap.trend
    );
    if let Some(m) = snap.macd {
        println!("  MACD {:.3}  signal {:.3}  histogram {:.3}", m.line, m.signal, m.histogram);
    }
    println!(
        "  RSI6 {}  RSI12 {}  RSI24 {}",
        show(snap.rsi6),
        show(snap.rsi12),
        show(snap.rsi24)
    );
    if let Some(b) = snap.bollinger {
        println!(
            "  Bollinger {:.2} / {:.2} / {:.2}  width {:.2}%",
            b.upper, b.middle, b.lower, b.width
        );
    }
    println!("  technical score {:.0}", snap.score);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backtest_flags() {
        let cli = Cli::try_parse_from([
            "alphadesk",
            "--log-level",
            "debug",
            "backtest",
            "--config",
            "p.ini",
            "--data",
            "bars",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Command::Backtest {
                source, data, json, ..
            } => {
                assert_eq!(source.config, Some(PathBuf::from("p.ini")));
                assert_eq!(data, PathBuf::from("bars"));
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_live_flags() {
        let cli = Cli::try_parse_from([
            "alphadesk",
            "live",
            "--config",
            "p.ini",
            "--data",
            "bars",
            "--interval-ms",
            "250",
            "--max-ticks",
            "3",
        ])
        .unwrap();
        match cli.command {
            Command::Live {
                interval_ms,
                max_ticks,
                duration_secs,
                json,
                ..
            } => {
                assert_eq!(interval_ms, 250);
                assert_eq!(max_ticks, Some(3));
                assert_eq!(duration_secs, None);
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn portfolio_requires_store() {
        assert!(Cli::try_parse_from(["alphadesk", "validate", "--portfolio", "x"]).is_err());
        assert!(
            Cli::try_parse_from(["alphadesk", "validate", "--portfolio", "x", "--store", "s"])
                .is_ok()
        );
    }

    #[test]
    fn config_and_portfolio_conflict() {
        assert!(Cli::try_parse_from([
            "alphadesk",
            "validate",
            "--config",
            "a.ini",
            "--portfolio",
            "x",
            "--store",
            "s"
        ])
        .is_err());
    }

    #[test]
    fn missing_source_is_config_error() {
        let source = ConfigSource {
            config: None,
            portfolio: None,
            store: None,
        };
        match load_portfolio(&source) {
            Err(CoreError::Config(err)) => assert!(err.has_key("cli", "config")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn bad_log_filter_is_config_error() {
        assert!(matches!(
            init_tracing("alphadesk=verbose"),
            Err(CoreError::Config(_))
        ));
    }
}

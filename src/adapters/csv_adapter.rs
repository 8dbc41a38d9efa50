//! CSV directory market-data adapter.
//!
//! One file per instrument, `<instrument_id>.csv`, with the header
//! `date,open,high,low,close,volume` and dates formatted `YYYY-MM-DD`.

use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::domain::error::CoreError;
use crate::domain::ohlcv::Bar;
use crate::ports::data_port::MarketDataFeed;

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, instrument_id: &str) -> PathBuf {
        self.base_path.join(format!("{instrument_id}.csv"))
    }

    fn read_all(&self, instrument_id: &str) -> Result<Vec<Bar>, CoreError> {
        let path = self.csv_path(instrument_id);
        let content = fs::read_to_string(&path).map_err(|e| {
            CoreError::data(instrument_id, None, format!("failed to read {}: {e}", path.display()))
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();
        for (line, row) in rdr.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| {
                CoreError::data(instrument_id, None, format!("CSV parse error on row {}: {e}", line + 1))
            })?;
            let date = NaiveDate::parse_from_str(row.date.trim(), "%Y-%m-%d").map_err(|e| {
                CoreError::data(instrument_id, None, format!("invalid date '{}': {e}", row.date))
            })?;
            bars.push(Bar {
                instrument_id: instrument_id.to_string(),
                date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }
}

impl MarketDataFeed for CsvAdapter {
    fn get_history(
        &self,
        instrument_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, CoreError> {
        let mut bars = self.read_all(instrument_id)?;
        bars.retain(|b| b.date >= start_date && b.date <= end_date);
        Ok(bars)
    }

    fn get_quote(&self, instrument_id: &str) -> Result<Bar, CoreError> {
        self.read_all(instrument_id)?
            .pop()
            .ok_or_else(|| CoreError::data(instrument_id, None, "no bars available"))
    }

    fn list_instruments(&self) -> Result<Vec<String>, CoreError> {
        let entries = fs::read_dir(&self.base_path)?;

        let mut instruments = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    instruments.push(stem.to_string_lossy().into_owned());
                }
            }
        }

        instruments.sort();
        Ok(instruments)
    }
}

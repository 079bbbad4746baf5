//! CSV persistence for closed trades
//!
//! One row per closed position, appended to a dated log file. The header is
//! written only when the file is created empty, so restarts keep appending to
//! the same day's table. Every append is flushed immediately: the log is
//! at-least-once, and duplicate rows after a crash are acceptable.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

/// Flat trade row, mirroring the position's serialization contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub entry_time: String,
    pub entry_price: f64,
    pub exit_time: Option<String>,
    pub exit_price: Option<f64>,
    pub confidence: f64,
    pub atr_pct: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub pnl: Option<f64>,
    pub exit_reason: Option<String>,
    pub duration_minutes: Option<i64>,
}

/// Append-only trade log for one trading day
pub struct TradeLog {
    writer: csv::Writer<std::fs::File>,
    path: PathBuf,
}

impl TradeLog {
    /// Open (or create) the dated log file under `logs_dir`.
    pub fn open(logs_dir: &Path, date: NaiveDate) -> Result<Self> {
        fs::create_dir_all(logs_dir)
            .with_context(|| format!("failed to create logs dir {}", logs_dir.display()))?;

        let path = logs_dir.join(format!("live_trades_{}.csv", date.format("%Y%m%d")));
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open trade log {}", path.display()))?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        info!(path = %path.display(), "trade log ready");
        Ok(Self { writer, path })
    }

    /// Append one closed trade and flush.
    pub fn append(&mut self, record: &TradeRecord) -> Result<()> {
        self.writer
            .serialize(record)
            .context("failed to write trade record")?;
        self.writer.flush().context("failed to flush trade log")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

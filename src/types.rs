//! Core types used throughout PaperBot
//!
//! Defines the bar/candle shape shared by the broker client, the feature
//! calculator and the trading engine, plus the exit-reason taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV sample for a fixed interval (5 minutes in a live session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Start of the bar interval
    pub timestamp: DateTime<Utc>,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Traded volume over the interval
    pub volume: f64,
}

impl Bar {
    /// Typical price used for VWAP-style features
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Why a simulated position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeStop,
    EodClose,
}

impl ExitReason {
    /// Label used in the trade log CSV
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TimeStop => "time_stop",
            ExitReason::EodClose => "eod_close",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Round to two decimal places for price/P&L reporting
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to four decimal places for probabilities and percentages
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

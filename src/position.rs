//! Simulated position lifecycle
//!
//! A position is opened from a model signal and owns its own exit logic:
//! stop-loss and take-profit levels are derived once at entry, and every bar
//! thereafter is checked in stop -> target -> time-stop priority. The
//! open -> closed transition is one-way; `close` is the only mutator of exit
//! state and takes the exit price and reason explicitly, so an end-of-day
//! flatten is an ordinary close call rather than field surgery.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::TradingParams;
use crate::persistence::TradeRecord;
use crate::types::{round2, round4, ExitReason};

/// Exit state, set exactly once when the position closes
#[derive(Debug, Clone, PartialEq)]
pub struct PositionExit {
    pub price: f64,
    pub time: DateTime<Utc>,
    pub reason: ExitReason,
    /// Net P&L after costs, in account currency
    pub pnl: f64,
}

/// One simulated trade
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Model confidence at entry, in [0, 1]
    pub confidence: f64,
    /// Volatility (ATR as percent of price) at entry
    pub atr_pct: f64,
    /// Price floor derived at entry; a bar low at or below it exits
    pub stop_loss: f64,
    /// Price ceiling derived at entry; a bar high at or above it exits
    pub take_profit: f64,
    exit: Option<PositionExit>,
}

impl Position {
    /// Open a new position. Stop and target are derived here and never
    /// recomputed. Input ranges are not validated; the engine's volatility
    /// floor keeps degenerate `atr_pct` values out of live entries.
    pub fn open(
        symbol: impl Into<String>,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        confidence: f64,
        atr_pct: f64,
        params: &TradingParams,
    ) -> Self {
        let stop_loss = entry_price * (1.0 - params.stop_loss_atr_mult * atr_pct / 100.0);
        let take_profit = entry_price * (1.0 + params.take_profit_pct / 100.0);

        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            entry_price,
            entry_time,
            confidence,
            atr_pct,
            stop_loss,
            take_profit,
            exit: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.exit.is_none()
    }

    pub fn exit(&self) -> Option<&PositionExit> {
        self.exit.as_ref()
    }

    /// Net P&L, available once closed
    pub fn pnl(&self) -> Option<f64> {
        self.exit.as_ref().map(|e| e.pnl)
    }

    /// Minutes held so far (or total, once closed)
    pub fn held_minutes(&self, now: DateTime<Utc>) -> i64 {
        let until = self.exit.as_ref().map(|e| e.time).unwrap_or(now);
        (until - self.entry_time).num_minutes()
    }

    /// Evaluate exit conditions against one bar. First match wins:
    /// intrabar stop touch, then intrabar target touch, then time stop at the
    /// bar's close price. Returns true when the position closed on this call.
    pub fn check_exit(
        &mut self,
        current_price: f64,
        bar_high: f64,
        bar_low: f64,
        now: DateTime<Utc>,
        params: &TradingParams,
    ) -> bool {
        if self.exit.is_some() {
            return false;
        }

        if bar_low <= self.stop_loss {
            self.close(self.stop_loss, ExitReason::StopLoss, now, params);
            return true;
        }

        if bar_high >= self.take_profit {
            self.close(self.take_profit, ExitReason::TakeProfit, now, params);
            return true;
        }

        let held = (now - self.entry_time).num_minutes();
        if held >= params.time_stop_minutes {
            self.close(current_price, ExitReason::TimeStop, now, params);
            return true;
        }

        false
    }

    /// Finalize the trade. Computes net return after costs and the resulting
    /// P&L for the configured position size. Must be called at most once; a
    /// second call is ignored so exit state stays immutable once set.
    pub fn close(
        &mut self,
        exit_price: f64,
        reason: ExitReason,
        exit_time: DateTime<Utc>,
        params: &TradingParams,
    ) {
        if self.exit.is_some() {
            debug_assert!(false, "close called on an already-closed position");
            return;
        }

        let gross_return_pct = (exit_price - self.entry_price) / self.entry_price * 100.0;
        let net_return_pct = gross_return_pct - params.cost_pct;
        let pnl = net_return_pct * params.position_size / 100.0;

        self.exit = Some(PositionExit {
            price: exit_price,
            time: exit_time,
            reason,
            pnl,
        });
    }

    /// Flat row for the trade log CSV. Exit fields stay empty while open.
    pub fn to_record(&self) -> TradeRecord {
        const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";
        TradeRecord {
            symbol: self.symbol.clone(),
            entry_time: self.entry_time.format(TS_FMT).to_string(),
            entry_price: round2(self.entry_price),
            exit_time: self.exit.as_ref().map(|e| e.time.format(TS_FMT).to_string()),
            exit_price: self.exit.as_ref().map(|e| round2(e.price)),
            confidence: round4(self.confidence),
            atr_pct: round4(self.atr_pct),
            stop_loss: round2(self.stop_loss),
            take_profit: round2(self.take_profit),
            pnl: self.exit.as_ref().map(|e| round2(e.pnl)),
            exit_reason: self.exit.as_ref().map(|e| e.reason.to_string()),
            duration_minutes: self
                .exit
                .as_ref()
                .map(|e| (e.time - self.entry_time).num_minutes()),
        }
    }
}

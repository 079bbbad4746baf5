//! Session controller - the trading-day polling loop
//!
//! State machine over the day: outside the trading window it idles on a
//! coarse interval, inside it runs one sequential pass over the symbol set
//! per bar period, and at market close it drains every open position and
//! prints the day's summary. An operator interrupt (Ctrl-C) takes the same
//! drain path; the loop never exits with positions still open.

use anyhow::Result;
use chrono::{Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::broker::QuoteSource;
use crate::config::ResolvedHours;
use crate::engine::TradingEngine;
use crate::position::Position;

/// Run summary derived from closed trades only
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub trades: usize,
    pub wins: usize,
    pub win_rate_pct: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    /// Gross profit over gross loss; only defined when both exist
    pub profit_factor: Option<f64>,
}

/// Derive the end-of-day summary from the closed-trade list.
pub fn summarize(closed: &[Position]) -> SessionSummary {
    let pnls: Vec<f64> = closed.iter().filter_map(|p| p.pnl()).collect();
    let trades = pnls.len();
    if trades == 0 {
        return SessionSummary {
            trades: 0,
            wins: 0,
            win_rate_pct: 0.0,
            total_pnl: 0.0,
            avg_pnl: 0.0,
            profit_factor: None,
        };
    }

    let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();
    let total: f64 = pnls.iter().sum();

    let profit_factor = if !wins.is_empty() && !losses.is_empty() {
        Some(wins.iter().sum::<f64>() / losses.iter().sum::<f64>().abs())
    } else {
        None
    };

    SessionSummary {
        trades,
        wins: wins.len(),
        win_rate_pct: wins.len() as f64 / trades as f64 * 100.0,
        total_pnl: total,
        avg_pnl: total / trades as f64,
        profit_factor,
    }
}

pub struct SessionController {
    engine: TradingEngine,
    quotes: Arc<dyn QuoteSource>,
    symbols: Vec<String>,
    hours: ResolvedHours,
    poll_interval: Duration,
    idle_interval: Duration,
}

impl SessionController {
    pub fn new(
        engine: TradingEngine,
        quotes: Arc<dyn QuoteSource>,
        symbols: Vec<String>,
        hours: ResolvedHours,
        poll_interval: Duration,
        idle_interval: Duration,
    ) -> Self {
        Self {
            engine,
            quotes,
            symbols,
            hours,
            poll_interval,
            idle_interval,
        }
    }

    /// Run the trading day to completion. Returns after the end-of-day drain,
    /// whether the day ended at market close or on an operator interrupt.
    pub async fn run(mut self) -> Result<()> {
        info!(
            symbols = self.symbols.len(),
            poll_secs = self.poll_interval.as_secs(),
            "starting live paper trading (Ctrl-C to stop)"
        );

        loop {
            let wall = Local::now().time();

            if wall >= self.hours.market_close {
                info!("market close reached");
                return self.finish();
            }

            if wall < self.hours.trading_start || wall > self.hours.trading_end {
                // Best-effort exchange probe while idling outside the window.
                match self.quotes.is_market_open().await {
                    Ok(open) => debug!(market_open = open, "outside trading window"),
                    Err(error) => debug!(error = %error, "market status probe failed"),
                }
                if self.pause(self.idle_interval).await {
                    return self.interrupt();
                }
                continue;
            }

            for symbol in &self.symbols {
                if let Err(error) = self.engine.process_symbol(symbol, Utc::now()).await {
                    warn!(symbol = %symbol, error = %format!("{:#}", error), "symbol cycle failed");
                }
            }

            let state = self.engine.state();
            info!(
                active = state.active_positions.len(),
                trades_today = state.trade_count_today,
                daily_pnl = %format!("{:+.2}", state.daily_pnl),
                "status"
            );

            if self.pause(self.poll_interval).await {
                return self.interrupt();
            }
        }
    }

    /// Sleep for `duration`, returning true when Ctrl-C arrived instead.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = tokio::signal::ctrl_c() => true,
        }
    }

    fn interrupt(&mut self) -> Result<()> {
        info!("interrupt received, draining open positions");
        self.finish()
    }

    /// End-of-day: force-close everything, then report. Always emits a
    /// summary, even for a session with zero trades.
    fn finish(&mut self) -> Result<()> {
        self.engine.force_close_all(Utc::now())?;

        let summary = summarize(&self.engine.state().closed_trades);
        info!(trades = summary.trades, "END OF DAY SUMMARY");
        if summary.trades > 0 {
            info!(
                wins = summary.wins,
                win_rate = %format!("{:.1}%", summary.win_rate_pct),
                total_pnl = %format!("{:+.2}", summary.total_pnl),
                avg_pnl = %format!("{:+.2}", summary.avg_pnl),
                "performance"
            );
            if let Some(pf) = summary.profit_factor {
                info!(profit_factor = %format!("{:.2}", pf), "profit factor");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RiskProfile, TradingParams};
    use crate::types::ExitReason;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn closed_position(pnl_direction: f64) -> Position {
        let params = TradingParams::for_profile(RiskProfile::Balanced);
        let entry = Utc.with_ymd_and_hms(2026, 2, 3, 5, 0, 0).unwrap();
        let mut pos = Position::open("NSE_EQ|LT", 100.0, entry, 0.7, 1.0, &params);
        // Choose an exit price that lands the requested P&L sign after the
        // 0.1% cost drag.
        let exit_price = 100.0 + pnl_direction;
        pos.close(
            exit_price,
            ExitReason::TimeStop,
            entry + ChronoDuration::minutes(60),
            &params,
        );
        pos
    }

    #[test]
    fn test_summary_of_empty_session() {
        let summary = summarize(&[]);
        assert_eq!(summary.trades, 0);
        assert_eq!(summary.total_pnl, 0.0);
        assert!(summary.profit_factor.is_none());
    }

    #[test]
    fn test_summary_mixed_session() {
        let closed = vec![
            closed_position(2.0),  // winner
            closed_position(2.0),  // winner
            closed_position(-1.0), // loser
        ];
        let summary = summarize(&closed);
        assert_eq!(summary.trades, 3);
        assert_eq!(summary.wins, 2);
        assert!((summary.win_rate_pct - 66.666).abs() < 0.01);
        // Each winner: (2.0% - 0.1%) * 10000 / 100 = 190; loser: -110
        assert!((summary.total_pnl - (190.0 + 190.0 - 110.0)).abs() < 1e-6);
        let pf = summary.profit_factor.unwrap();
        assert!((pf - 380.0 / 110.0).abs() < 1e-6);
    }

    #[test]
    fn test_profit_factor_undefined_without_losers() {
        let closed = vec![closed_position(2.0)];
        let summary = summarize(&closed);
        assert_eq!(summary.wins, 1);
        assert!(summary.profit_factor.is_none());
    }

    #[test]
    fn test_open_positions_do_not_count() {
        let params = TradingParams::for_profile(RiskProfile::Balanced);
        let entry = Utc.with_ymd_and_hms(2026, 2, 3, 5, 0, 0).unwrap();
        let open = Position::open("NSE_EQ|LT", 100.0, entry, 0.7, 1.0, &params);
        let summary = summarize(&[open, closed_position(-1.0)]);
        assert_eq!(summary.trades, 1);
        assert_eq!(summary.wins, 0);
    }
}

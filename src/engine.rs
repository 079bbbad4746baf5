//! Decision engine - per-symbol trading cycle
//!
//! One call per symbol per polling tick: evaluate exits on the symbol's open
//! positions first, then walk the entry gates (risk limits, position caps,
//! history depth, volatility floor, model confidence) and open at most one
//! new position. All session state lives in an owned [`SessionState`] passed
//! around by reference; there is no ambient/static state anywhere.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::broker::QuoteSource;
use crate::config::TradingParams;
use crate::features::{FeatureCalculator, FeatureError};
use crate::model::Scorer;
use crate::persistence::TradeLog;
use crate::position::Position;
use crate::risk::{GateDecision, RiskGate};
use crate::types::ExitReason;

/// Mutable state of one trading day
#[derive(Debug, Default)]
pub struct SessionState {
    /// Open positions, in insertion order
    pub active_positions: Vec<Position>,
    /// Closed positions, append-only
    pub closed_trades: Vec<Position>,
    /// Realized P&L today
    pub daily_pnl: f64,
    /// Realized P&L for the whole process lifetime
    pub total_pnl: f64,
    /// Entries opened today
    pub trade_count_today: usize,
    /// When the most recent losing trade closed (for the cooldown gate)
    pub last_loss_time: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open positions currently held for one symbol
    pub fn open_positions_for(&self, symbol: &str) -> usize {
        self.active_positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .count()
    }
}

/// Orchestrates exits, risk gating, feature scoring and entries
pub struct TradingEngine {
    params: TradingParams,
    gate: RiskGate,
    quotes: Arc<dyn QuoteSource>,
    features: FeatureCalculator,
    scorer: Arc<dyn Scorer>,
    trade_log: TradeLog,
    /// Bars of history requested per entry evaluation
    history_bars: usize,
    state: SessionState,
}

impl TradingEngine {
    pub fn new(
        params: TradingParams,
        gate: RiskGate,
        quotes: Arc<dyn QuoteSource>,
        scorer: Arc<dyn Scorer>,
        trade_log: TradeLog,
        history_bars: usize,
    ) -> Self {
        Self {
            params,
            gate,
            quotes,
            features: FeatureCalculator::new(),
            scorer,
            trade_log,
            history_bars,
            state: SessionState::new(),
        }
    }

    pub fn params(&self) -> &TradingParams {
        &self.params
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run one full cycle for a symbol: exits first, then at most one entry.
    /// A quiet broker (no current bar, short history, undecidable features)
    /// skips the symbol until the next tick; real faults bubble up to the
    /// session loop, which logs them without disturbing other symbols.
    pub async fn process_symbol(&mut self, symbol: &str, now: DateTime<Utc>) -> Result<()> {
        let bar = match self
            .quotes
            .get_current_bar(symbol)
            .await
            .with_context(|| format!("current bar fetch failed for {}", symbol))?
        {
            Some(bar) => bar,
            None => {
                debug!(symbol, "no current bar, skipping");
                return Ok(());
            }
        };

        self.sweep_exits(symbol, bar.close, bar.high, bar.low, now)?;

        match self.gate.evaluate(&self.state, now) {
            GateDecision::Blocked(reason) => {
                debug!(symbol, %reason, "entry blocked");
                return Ok(());
            }
            GateDecision::Allowed => {}
        }

        if self.state.active_positions.len() >= self.params.max_total_positions {
            debug!(symbol, "max total positions held");
            return Ok(());
        }
        if self.state.open_positions_for(symbol) >= self.params.max_trades_per_symbol {
            debug!(symbol, "max positions for symbol held");
            return Ok(());
        }

        let history = self
            .quotes
            .get_latest_bars(symbol, self.history_bars)
            .await
            .with_context(|| format!("history fetch failed for {}", symbol))?;
        if history.is_empty() {
            debug!(symbol, "no bar history");
            return Ok(());
        }

        let features = match self.features.compute(&history) {
            Ok(features) => features,
            Err(FeatureError::InsufficientData { have, need }) => {
                debug!(symbol, have, need, "insufficient history for features");
                return Ok(());
            }
        };

        let atr_pct = features.atr_pct();
        if atr_pct < self.params.min_atr_pct {
            debug!(symbol, atr_pct, "below volatility floor");
            return Ok(());
        }

        let x = features.to_vector(self.scorer.feature_cols());
        let confidence = self.scorer.score(&x);
        if confidence < self.params.conf_threshold {
            debug!(symbol, confidence, "below confidence threshold");
            return Ok(());
        }

        let position = Position::open(symbol, bar.close, now, confidence, atr_pct, &self.params);
        info!(
            symbol,
            entry = %format!("{:.2}", position.entry_price),
            confidence = %format!("{:.2}%", confidence * 100.0),
            stop = %format!("{:.2}", position.stop_loss),
            target = %format!("{:.2}", position.take_profit),
            "ENTRY"
        );
        self.state.active_positions.push(position);
        self.state.trade_count_today += 1;

        Ok(())
    }

    /// Evaluate exits for every open position on this symbol against one
    /// bar. Closed positions move to the closed list and update the P&L
    /// counters and loss timestamp before any entry decision runs.
    fn sweep_exits(
        &mut self,
        symbol: &str,
        close: f64,
        high: f64,
        low: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut i = 0;
        while i < self.state.active_positions.len() {
            if self.state.active_positions[i].symbol != symbol {
                i += 1;
                continue;
            }
            let closed =
                self.state.active_positions[i].check_exit(close, high, low, now, &self.params);
            if !closed {
                i += 1;
                continue;
            }

            let position = self.state.active_positions.remove(i);
            if let Some(exit) = position.exit() {
                self.state.daily_pnl += exit.pnl;
                self.state.total_pnl += exit.pnl;
                if exit.pnl < 0.0 {
                    self.state.last_loss_time = Some(exit.time);
                }
                info!(
                    symbol = %position.symbol,
                    reason = %exit.reason,
                    price = %format!("{:.2}", exit.price),
                    pnl = %format!("{:+.2}", exit.pnl),
                    "EXIT"
                );
            }
            self.trade_log.append(&position.to_record())?;
            self.state.closed_trades.push(position);
        }
        Ok(())
    }

    /// Force-close every open position at its own entry price (cost-only
    /// loss) and log it. Used by the end-of-day drain and the interrupt path.
    pub fn force_close_all(&mut self, now: DateTime<Utc>) -> Result<()> {
        let open = std::mem::take(&mut self.state.active_positions);
        for mut position in open {
            let entry_price = position.entry_price;
            position.close(entry_price, ExitReason::EodClose, now, &self.params);
            if let Some(exit) = position.exit() {
                info!(
                    symbol = %position.symbol,
                    pnl = %format!("{:+.2}", exit.pnl),
                    "EOD_CLOSE"
                );
            }
            self.trade_log.append(&position.to_record())?;
            self.state.closed_trades.push(position);
        }
        Ok(())
    }
}

//! End-to-end tests for the trading engine and session accounting
//!
//! Drives the public crate API with scripted quote data: entries under
//! permissive gates, daily-limit latch-out, exit-before-entry ordering
//! within a tick, cooldown behavior after losses, and the end-of-day drain
//! down to the CSV trade log.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use paperbot::broker::{BrokerError, QuoteSource};
use paperbot::config::{RiskLimits, RiskProfile, TradingParams};
use paperbot::engine::TradingEngine;
use paperbot::model::Scorer;
use paperbot::persistence::TradeLog;
use paperbot::risk::RiskGate;
use paperbot::session::summarize;
use paperbot::types::{Bar, ExitReason};

// ─── fixtures ───────────────────────────────────────────────────

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 3, 4, 0, 0).unwrap()
}

/// Flat bar at `close` with a +/-0.35 range: atr_pct = 0.7, which clears the
/// balanced profile's 0.6 volatility floor without touching the 0.4% target.
fn make_bar(i: usize, close: f64) -> Bar {
    Bar {
        timestamp: base_time() + ChronoDuration::minutes(5 * i as i64),
        open: close,
        high: close + 0.35,
        low: close - 0.35,
        close,
        volume: 1_000.0,
    }
}

fn flat_history() -> Vec<Bar> {
    (0..120).map(|i| make_bar(i, 100.0)).collect()
}

/// Scripted quote source: one settable current bar per symbol, one shared
/// history. Symbols without a scripted bar read as unavailable.
#[derive(Default)]
struct ScriptedQuotes {
    current: Mutex<HashMap<String, Bar>>,
    history: Mutex<Vec<Bar>>,
}

impl ScriptedQuotes {
    fn new(symbols: &[&str]) -> Self {
        let quotes = Self {
            current: Mutex::new(HashMap::new()),
            history: Mutex::new(flat_history()),
        };
        for symbol in symbols {
            quotes.set_bar(symbol, make_bar(119, 100.0));
        }
        quotes
    }

    fn set_bar(&self, symbol: &str, bar: Bar) {
        self.current
            .lock()
            .unwrap()
            .insert(symbol.to_string(), bar);
    }
}

#[async_trait]
impl QuoteSource for ScriptedQuotes {
    async fn get_current_bar(&self, symbol: &str) -> Result<Option<Bar>, BrokerError> {
        Ok(self.current.lock().unwrap().get(symbol).cloned())
    }

    async fn get_latest_bars(&self, _symbol: &str, n: usize) -> Result<Vec<Bar>, BrokerError> {
        let history = self.history.lock().unwrap();
        let start = history.len().saturating_sub(n);
        Ok(history[start..].to_vec())
    }

    async fn is_market_open(&self) -> Result<bool, BrokerError> {
        Ok(true)
    }
}

struct FixedScorer {
    cols: Vec<String>,
    value: f64,
}

impl FixedScorer {
    fn new(value: f64) -> Self {
        Self {
            cols: vec!["atr_pct".to_string(), "rsi".to_string(), "clv".to_string()],
            value,
        }
    }
}

impl Scorer for FixedScorer {
    fn feature_cols(&self) -> &[String] {
        &self.cols
    }
    fn score(&self, _features: &[f64]) -> f64 {
        self.value
    }
}

struct Fixture {
    engine: TradingEngine,
    quotes: Arc<ScriptedQuotes>,
    logs_dir: tempfile::TempDir,
}

fn fixture(symbols: &[&str], limits: RiskLimits, confidence: f64) -> Fixture {
    let quotes = Arc::new(ScriptedQuotes::new(symbols));
    let logs_dir = tempfile::tempdir().unwrap();
    let trade_log = TradeLog::open(logs_dir.path(), base_time().date_naive()).unwrap();
    let engine = TradingEngine::new(
        TradingParams::for_profile(RiskProfile::Balanced),
        RiskGate::new(limits),
        Arc::clone(&quotes) as Arc<dyn QuoteSource>,
        Arc::new(FixedScorer::new(confidence)),
        trade_log,
        200,
    );
    Fixture {
        engine,
        quotes,
        logs_dir,
    }
}

fn balanced_limits() -> RiskLimits {
    RiskLimits::for_profile(RiskProfile::Balanced)
}

// ─── entries ────────────────────────────────────────────────────

#[tokio::test]
async fn one_entry_per_symbol_per_tick_under_permissive_gates() {
    let symbols = ["NSE_EQ|LT", "NSE_EQ|BEL", "NSE_EQ|TRENT"];
    let mut fx = fixture(&symbols, balanced_limits(), 0.9);

    let tick = base_time() + ChronoDuration::hours(10);
    for symbol in &symbols {
        fx.engine.process_symbol(symbol, tick).await.unwrap();
    }

    assert_eq!(fx.engine.state().active_positions.len(), symbols.len());
    assert_eq!(fx.engine.state().trade_count_today, symbols.len());
    for (symbol, position) in symbols.iter().zip(&fx.engine.state().active_positions) {
        assert_eq!(&position.symbol, symbol);
        assert!(position.is_open());
        assert!(position.stop_loss < position.entry_price);
        assert!(position.entry_price < position.take_profit);
    }
}

#[tokio::test]
async fn below_threshold_confidence_never_enters() {
    let mut fx = fixture(&["NSE_EQ|LT"], balanced_limits(), 0.54);
    let tick = base_time() + ChronoDuration::hours(10);
    fx.engine.process_symbol("NSE_EQ|LT", tick).await.unwrap();
    assert!(fx.engine.state().active_positions.is_empty());
    assert_eq!(fx.engine.state().trade_count_today, 0);
}

#[tokio::test]
async fn unknown_symbol_is_skipped_without_error() {
    let mut fx = fixture(&["NSE_EQ|LT"], balanced_limits(), 0.9);
    let tick = base_time() + ChronoDuration::hours(10);
    // No scripted bar for this symbol: the cycle must skip quietly.
    fx.engine.process_symbol("NSE_EQ|ACME", tick).await.unwrap();
    assert!(fx.engine.state().active_positions.is_empty());
}

// ─── daily limits ───────────────────────────────────────────────

#[tokio::test]
async fn daily_trade_cap_latches_for_the_session() {
    let limits = RiskLimits {
        max_daily_loss: -1_000.0,
        max_daily_trades: 2,
        cooldown_after_loss_minutes: 15,
    };
    let symbols = ["NSE_EQ|LT", "NSE_EQ|BEL", "NSE_EQ|TRENT"];
    let mut fx = fixture(&symbols, limits, 0.9);

    let tick = base_time() + ChronoDuration::hours(10);
    for symbol in &symbols {
        fx.engine.process_symbol(symbol, tick).await.unwrap();
    }
    assert_eq!(fx.engine.state().trade_count_today, 2);
    assert_eq!(fx.engine.state().active_positions.len(), 2);

    // Later ticks: the cap holds for the rest of the session, no reset.
    for minutes in [5i64, 10, 30, 55] {
        let later = tick + ChronoDuration::minutes(minutes);
        for symbol in &symbols {
            fx.engine.process_symbol(symbol, later).await.unwrap();
        }
    }
    assert_eq!(fx.engine.state().trade_count_today, 2);
}

// ─── exits ──────────────────────────────────────────────────────

#[tokio::test]
async fn stop_loss_exit_then_cooldown_blocks_reentry() {
    let mut fx = fixture(&["NSE_EQ|LT"], balanced_limits(), 0.9);
    let tick1 = base_time() + ChronoDuration::hours(10);
    fx.engine.process_symbol("NSE_EQ|LT", tick1).await.unwrap();
    let stop = fx.engine.state().active_positions[0].stop_loss;

    // Next bar trades through the stop.
    fx.quotes.set_bar(
        "NSE_EQ|LT",
        Bar {
            low: stop - 0.2,
            ..make_bar(120, 100.0)
        },
    );
    let tick2 = tick1 + ChronoDuration::minutes(5);
    fx.engine.process_symbol("NSE_EQ|LT", tick2).await.unwrap();

    let state = fx.engine.state();
    assert!(state.active_positions.is_empty());
    assert_eq!(state.closed_trades.len(), 1);
    let exit = state.closed_trades[0].exit().unwrap();
    assert_eq!(exit.reason, ExitReason::StopLoss);
    assert!((exit.price - stop).abs() < 1e-9);
    assert!(state.daily_pnl < 0.0);
    assert_eq!(state.last_loss_time, Some(tick2));

    // Within the 15-minute cooldown: no re-entry even on a clean bar.
    fx.quotes.set_bar("NSE_EQ|LT", make_bar(121, 100.0));
    let tick3 = tick2 + ChronoDuration::minutes(10);
    fx.engine.process_symbol("NSE_EQ|LT", tick3).await.unwrap();
    assert!(fx.engine.state().active_positions.is_empty());

    // After the cooldown expires the symbol is tradable again.
    let tick4 = tick2 + ChronoDuration::minutes(20);
    fx.engine.process_symbol("NSE_EQ|LT", tick4).await.unwrap();
    assert_eq!(fx.engine.state().active_positions.len(), 1);
    // The closed loser never reappears in the active list.
    assert_eq!(fx.engine.state().closed_trades.len(), 1);
    assert_ne!(
        fx.engine.state().active_positions[0].id,
        fx.engine.state().closed_trades[0].id
    );
}

#[tokio::test]
async fn winning_time_stop_exits_before_new_entry_in_same_tick() {
    let mut fx = fixture(&["NSE_EQ|LT"], balanced_limits(), 0.9);
    let tick1 = base_time() + ChronoDuration::hours(10);
    fx.engine.process_symbol("NSE_EQ|LT", tick1).await.unwrap();

    // One hour later the bar sits between stop and target: the time stop
    // fires at the bar close, profitably (no cooldown), and the freed slot
    // is re-entered in the same tick, after the exit.
    fx.quotes.set_bar(
        "NSE_EQ|LT",
        Bar {
            open: 100.3,
            high: 100.35,
            low: 100.25,
            close: 100.3,
            ..make_bar(132, 100.3)
        },
    );
    let tick2 = tick1 + ChronoDuration::minutes(60);
    fx.engine.process_symbol("NSE_EQ|LT", tick2).await.unwrap();

    let state = fx.engine.state();
    assert_eq!(state.closed_trades.len(), 1);
    let exit = state.closed_trades[0].exit().unwrap();
    assert_eq!(exit.reason, ExitReason::TimeStop);
    assert!((exit.price - 100.3).abs() < 1e-9);
    // gross 0.3% - 0.1% cost on 10k notional
    assert!((exit.pnl - 20.0).abs() < 1e-9);

    assert_eq!(state.active_positions.len(), 1);
    assert!((state.active_positions[0].entry_price - 100.3).abs() < 1e-9);
    assert_eq!(state.trade_count_today, 2);
}

// ─── end of day ─────────────────────────────────────────────────

#[tokio::test]
async fn eod_drain_flattens_everything_and_logs_it() {
    let symbols = ["NSE_EQ|LT", "NSE_EQ|BEL"];
    let mut fx = fixture(&symbols, balanced_limits(), 0.9);
    let tick = base_time() + ChronoDuration::hours(10);
    for symbol in &symbols {
        fx.engine.process_symbol(symbol, tick).await.unwrap();
    }

    fx.engine
        .force_close_all(tick + ChronoDuration::hours(3))
        .unwrap();

    let state = fx.engine.state();
    assert!(state.active_positions.is_empty());
    assert_eq!(state.closed_trades.len(), 2);
    for trade in &state.closed_trades {
        let exit = trade.exit().unwrap();
        assert_eq!(exit.reason, ExitReason::EodClose);
        assert!((exit.price - trade.entry_price).abs() < 1e-9);
        // Cost-only loss: -0.1% of 10k
        assert!((exit.pnl - (-10.0)).abs() < 1e-9);
    }

    // The CSV sink holds a header plus one row per closed trade.
    let log_path = fx.logs_dir.path().join("live_trades_20260203.csv");
    let contents = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("symbol,"));
    assert!(lines[1].contains("eod_close"));
    assert!(lines[2].contains("eod_close"));

    // Summary derives purely from closed trades: two cost-only losers.
    let summary = summarize(&state.closed_trades);
    assert_eq!(summary.trades, 2);
    assert_eq!(summary.wins, 0);
    assert!((summary.total_pnl - (-20.0)).abs() < 1e-9);
    assert!(summary.profit_factor.is_none());
}

#[tokio::test]
async fn empty_session_still_summarizes() {
    let fx = fixture(&["NSE_EQ|LT"], balanced_limits(), 0.9);
    let summary = summarize(&fx.engine.state().closed_trades);
    assert_eq!(summary.trades, 0);
    assert_eq!(summary.total_pnl, 0.0);
}

//! Risk gate - daily entry controls
//!
//! Pure evaluation of session state against the configured daily limits:
//! - Daily loss floor (inclusive boundary)
//! - Daily trade cap
//! - Post-loss cooldown
//!
//! The gate has no side effects and is re-evaluated on every entry attempt; a
//! block is a normal trading decision, not an error.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::config::RiskLimits;
use crate::engine::SessionState;

/// Why the gate refused a new entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    DailyLossLimit,
    DailyTradeLimit,
    LossCooldown,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::DailyLossLimit => write!(f, "daily loss limit reached"),
            BlockReason::DailyTradeLimit => write!(f, "daily trade limit reached"),
            BlockReason::LossCooldown => write!(f, "cooling down after loss"),
        }
    }
}

/// Outcome of a gate evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Blocked(BlockReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

/// Entry gate over the day's running totals
#[derive(Debug, Clone)]
pub struct RiskGate {
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Decide whether a new entry is permitted right now. Checks run in
    /// loss-floor, trade-cap, cooldown order; the first breach wins.
    pub fn evaluate(&self, state: &SessionState, now: DateTime<Utc>) -> GateDecision {
        if state.daily_pnl <= self.limits.max_daily_loss {
            return GateDecision::Blocked(BlockReason::DailyLossLimit);
        }

        if state.trade_count_today >= self.limits.max_daily_trades {
            return GateDecision::Blocked(BlockReason::DailyTradeLimit);
        }

        if let Some(last_loss) = state.last_loss_time {
            let since_loss = (now - last_loss).num_minutes();
            if since_loss < self.limits.cooldown_after_loss_minutes {
                return GateDecision::Blocked(BlockReason::LossCooldown);
            }
        }

        GateDecision::Allowed
    }
}

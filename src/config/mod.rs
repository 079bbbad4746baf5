//! Configuration management for PaperBot
//!
//! Loads from optional config files + environment variables via .env, and
//! resolves the selected risk profile into immutable trading parameters and
//! risk limits.

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::warn;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub hours: TradingHours,
    pub broker: BrokerConfig,
    pub model: ModelConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Symbols to trade (broker instrument keys)
    pub symbols: Vec<String>,
    /// Risk profile name (conservative / balanced / aggressive)
    pub risk_profile: String,
    /// Polling interval in seconds (~one bar period)
    pub poll_interval_secs: u64,
    /// Sleep interval outside trading hours in seconds
    pub idle_interval_secs: u64,
    /// Bars of history requested per entry evaluation
    pub history_bars: usize,
}

/// Wall-clock session boundaries (exchange local time, "HH:MM")
#[derive(Debug, Clone, Deserialize)]
pub struct TradingHours {
    pub market_open: String,
    pub trading_start: String,
    pub trading_end: String,
    pub market_close: String,
}

/// Parsed trading-hours boundaries
#[derive(Debug, Clone, Copy)]
pub struct ResolvedHours {
    pub market_open: NaiveTime,
    pub trading_start: NaiveTime,
    pub trading_end: NaiveTime,
    pub market_close: NaiveTime,
}

impl TradingHours {
    /// Parse all boundaries once at startup; malformed times are fatal.
    pub fn resolve(&self) -> Result<ResolvedHours> {
        let parse = |label: &str, value: &str| {
            NaiveTime::parse_from_str(value, "%H:%M")
                .with_context(|| format!("invalid {} time {:?} (expected HH:MM)", label, value))
        };
        let hours = ResolvedHours {
            market_open: parse("market_open", &self.market_open)?,
            trading_start: parse("trading_start", &self.trading_start)?,
            trading_end: parse("trading_end", &self.trading_end)?,
            market_close: parse("market_close", &self.market_close)?,
        };
        if hours.trading_start >= hours.trading_end {
            bail!(
                "trading_start {} must precede trading_end {}",
                self.trading_start,
                self.trading_end
            );
        }
        Ok(hours)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// REST API base URL
    pub base_url: String,
    /// Path to the saved access token (produced by the OAuth helper)
    pub access_token_file: String,
    /// Candle interval requested from the broker
    pub bar_interval: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Path to the exported model bundle (feature columns + coefficients)
    pub bundle_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Directory for trade log CSVs
    pub logs_dir: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Bot defaults
            .set_default(
                "bot.symbols",
                vec![
                    "NSE_EQ|SHRIRAMFIN",
                    "NSE_EQ|BEL",
                    "NSE_EQ|LT",
                    "NSE_EQ|TRENT",
                    "NSE_EQ|ADANIPORTS",
                    "NSE_EQ|ADANIENT",
                    "NSE_EQ|BHARTIARTL",
                    "NSE_EQ|INDUSINDBK",
                    "NSE_EQ|DRREDDY",
                    "NSE_EQ|HEROMOTOCO",
                ],
            )?
            .set_default("bot.risk_profile", "balanced")?
            .set_default("bot.poll_interval_secs", 300)?
            .set_default("bot.idle_interval_secs", 60)?
            .set_default("bot.history_bars", 200)?
            // Trading hours defaults (IST wall clock)
            .set_default("hours.market_open", "09:15")?
            .set_default("hours.trading_start", "09:25")?
            .set_default("hours.trading_end", "15:20")?
            .set_default("hours.market_close", "15:30")?
            // Broker defaults
            .set_default("broker.base_url", "https://api.upstox.com/v2")?
            .set_default("broker.access_token_file", "access_token.txt")?
            .set_default("broker.bar_interval", "5minute")?
            .set_default("broker.request_timeout_secs", 15)?
            // Model defaults
            .set_default("model.bundle_path", "models/model_v3.json")?
            // Persistence defaults
            .set_default("persistence.logs_dir", "./logs")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PAPERBOT_*)
            .add_source(Environment::with_prefix("PAPERBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if app_config.bot.symbols.is_empty() {
            bail!("bot.symbols must list at least one instrument");
        }

        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "symbols={} profile={} poll={}s window={}-{}",
            self.bot.symbols.len(),
            self.bot.risk_profile,
            self.bot.poll_interval_secs,
            self.hours.trading_start,
            self.hours.market_close
        )
    }
}

/// Named parameter set selecting trading-parameter and risk-limit overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskProfile {
    Conservative,
    Balanced,
    Aggressive,
}

impl RiskProfile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "conservative" => Some(RiskProfile::Conservative),
            "balanced" => Some(RiskProfile::Balanced),
            "aggressive" => Some(RiskProfile::Aggressive),
            _ => None,
        }
    }

    /// Resolve a profile name, falling back to the balanced base set when the
    /// name is unknown.
    pub fn resolve(name: &str) -> Self {
        RiskProfile::from_name(name).unwrap_or_else(|| {
            warn!(profile = name, "unknown risk profile, using balanced");
            RiskProfile::Balanced
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RiskProfile::Conservative => "conservative",
            RiskProfile::Balanced => "balanced",
            RiskProfile::Aggressive => "aggressive",
        }
    }
}

/// Entry/exit parameters, resolved once at startup and never mutated
#[derive(Debug, Clone)]
pub struct TradingParams {
    /// Minimum model confidence required to enter
    pub conf_threshold: f64,
    /// Round-trip cost deducted from gross return, in percent
    pub cost_pct: f64,
    /// Maximum simultaneous open positions per symbol
    pub max_trades_per_symbol: usize,
    /// Maximum simultaneous open positions across all symbols
    pub max_total_positions: usize,
    /// Notional size per position
    pub position_size: f64,
    /// Stop distance in ATR-percent multiples below entry
    pub stop_loss_atr_mult: f64,
    /// Target distance above entry, in percent
    pub take_profit_pct: f64,
    /// Maximum holding duration in minutes
    pub time_stop_minutes: i64,
    /// Volatility floor: skip entries when atr_pct is below this
    pub min_atr_pct: f64,
}

impl TradingParams {
    /// Base parameter set (the balanced profile).
    fn base() -> Self {
        Self {
            conf_threshold: 0.55,
            cost_pct: 0.10,
            max_trades_per_symbol: 2,
            max_total_positions: 8,
            position_size: 10_000.0,
            stop_loss_atr_mult: 2.0,
            take_profit_pct: 0.40,
            time_stop_minutes: 60,
            min_atr_pct: 0.6,
        }
    }

    /// Overlay profile-specific overrides onto the base set.
    pub fn for_profile(profile: RiskProfile) -> Self {
        let mut params = Self::base();
        match profile {
            RiskProfile::Balanced => {}
            RiskProfile::Conservative => {
                params.conf_threshold = 0.62;
                params.max_total_positions = 5;
                params.position_size = 8_000.0;
                params.stop_loss_atr_mult = 1.8;
                params.take_profit_pct = 0.30;
                params.time_stop_minutes = 45;
                params.min_atr_pct = 0.8;
            }
            RiskProfile::Aggressive => {
                params.conf_threshold = 0.48;
                params.max_trades_per_symbol = 3;
                params.max_total_positions = 12;
                params.position_size = 15_000.0;
                params.stop_loss_atr_mult = 2.5;
                params.take_profit_pct = 0.60;
                params.time_stop_minutes = 90;
                params.min_atr_pct = 0.4;
            }
        }
        params
    }
}

/// Daily risk limits, resolved once at startup and never mutated
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// Daily loss floor (negative); entries stop once daily P&L is at or
    /// below this
    pub max_daily_loss: f64,
    /// Maximum entries per day
    pub max_daily_trades: usize,
    /// Minimum wait after a losing trade before new entries, in minutes
    pub cooldown_after_loss_minutes: i64,
}

impl RiskLimits {
    fn base() -> Self {
        Self {
            max_daily_loss: -1_000.0,
            max_daily_trades: 20,
            cooldown_after_loss_minutes: 15,
        }
    }

    /// Overlay profile-specific overrides onto the base set.
    pub fn for_profile(profile: RiskProfile) -> Self {
        let mut limits = Self::base();
        match profile {
            RiskProfile::Balanced => {}
            RiskProfile::Conservative => {
                limits.max_daily_loss = -600.0;
                limits.max_daily_trades = 12;
                limits.cooldown_after_loss_minutes = 20;
            }
            RiskProfile::Aggressive => {
                limits.max_daily_loss = -2_000.0;
                limits.max_daily_trades = 30;
                limits.cooldown_after_loss_minutes = 5;
            }
        }
        limits
    }
}

//! PaperBot entry point
//!
//! Startup is fail-fast: configuration, the exported model bundle and the
//! broker access token must all validate before a session starts. After that
//! the session controller owns the process until end-of-day (or Ctrl-C).

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use paperbot::broker::{load_access_token, QuoteSource, UpstoxClient};
use paperbot::config::{AppConfig, RiskLimits, RiskProfile, TradingParams};
use paperbot::engine::TradingEngine;
use paperbot::model::LinearModel;
use paperbot::persistence::TradeLog;
use paperbot::risk::RiskGate;
use paperbot::session::SessionController;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    info!(config = %config.digest(), "configuration loaded");

    let hours = config.hours.resolve()?;

    // Fatal startup checks: no session without a model and credentials.
    let model = LinearModel::load(Path::new(&config.model.bundle_path))
        .context("a validated model bundle is required to start a session")?;
    let token = load_access_token(Path::new(&config.broker.access_token_file))
        .context("broker credentials are required to start a session")?;

    let profile = RiskProfile::resolve(&config.bot.risk_profile);
    let params = TradingParams::for_profile(profile);
    let limits = RiskLimits::for_profile(profile);

    info!(
        profile = profile.name(),
        symbols = config.bot.symbols.len(),
        conf_threshold = params.conf_threshold,
        max_positions = params.max_total_positions,
        position_size = params.position_size,
        "risk profile resolved"
    );

    let trade_log = TradeLog::open(
        Path::new(&config.persistence.logs_dir),
        chrono::Local::now().date_naive(),
    )?;

    let quotes: Arc<dyn QuoteSource> = Arc::new(UpstoxClient::new(
        config.broker.base_url.clone(),
        &token,
        Duration::from_secs(config.broker.request_timeout_secs),
    )?);

    let engine = TradingEngine::new(
        params,
        RiskGate::new(limits),
        Arc::clone(&quotes),
        Arc::new(model),
        trade_log,
        config.bot.history_bars,
    );

    let controller = SessionController::new(
        engine,
        quotes,
        config.bot.symbols.clone(),
        hours,
        Duration::from_secs(config.bot.poll_interval_secs),
        Duration::from_secs(config.bot.idle_interval_secs),
    );

    controller.run().await
}

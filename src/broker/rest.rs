//! Upstox REST market-data client
//!
//! Thin typed wrapper over the v2 market endpoints the bot needs: intraday
//! candle history and the exchange status probe. Every request carries the
//! bearer token and a bounded timeout; candle rows come back newest-first and
//! are normalized to oldest-first [`Bar`]s.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::debug;

use super::{BrokerError, QuoteSource};
use crate::types::Bar;

/// Days of intraday history requested per candle fetch
const HISTORY_WINDOW_DAYS: i64 = 5;

pub struct UpstoxClient {
    http: reqwest::Client,
    base_url: String,
}

/// Candle row as returned by the API:
/// `[timestamp, open, high, low, close, volume, open_interest]`
#[derive(Debug, Deserialize)]
struct CandleRow(
    String,
    f64,
    f64,
    f64,
    f64,
    f64,
    #[serde(default)] serde_json::Value,
);

impl CandleRow {
    fn into_bar(self) -> Result<Bar, BrokerError> {
        let timestamp = DateTime::parse_from_rfc3339(&self.0)
            .map_err(|e| BrokerError::Decode(format!("bad candle timestamp {:?}: {}", self.0, e)))?
            .with_timezone(&Utc);
        Ok(Bar {
            timestamp,
            open: self.1,
            high: self.2,
            low: self.3,
            close: self.4,
            volume: self.5,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CandleEnvelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Option<CandleData>,
}

#[derive(Debug, Deserialize)]
struct CandleData {
    #[serde(default)]
    candles: Vec<CandleRow>,
}

#[derive(Debug, Deserialize)]
struct MarketStatusEnvelope {
    #[serde(default)]
    data: Option<MarketStatusData>,
}

#[derive(Debug, Deserialize)]
struct MarketStatusData {
    #[serde(default)]
    market_open: bool,
}

impl UpstoxClient {
    pub fn new(
        base_url: impl Into<String>,
        access_token: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, BrokerError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|_| BrokerError::InvalidToken)?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Fetch the recent intraday candle window for a symbol, oldest first.
    async fn fetch_candles(&self, symbol: &str) -> Result<Vec<Bar>, BrokerError> {
        let to_date = Utc::now().date_naive();
        let from_date = to_date - Duration::days(HISTORY_WINDOW_DAYS);
        let url = format!(
            "{}/market/historical-candle?instrument_key={}&interval=5minute&from_date={}&to_date={}",
            self.base_url, symbol, from_date, to_date
        );

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BrokerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: CandleEnvelope = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;

        if envelope.status != "success" {
            debug!(symbol, status = %envelope.status, "candle request not successful");
            return Ok(Vec::new());
        }

        // Rows arrive newest-first; normalize to oldest-first.
        let mut bars = envelope
            .data
            .map(|d| d.candles)
            .unwrap_or_default()
            .into_iter()
            .map(CandleRow::into_bar)
            .collect::<Result<Vec<_>, _>>()?;
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }
}

#[async_trait]
impl QuoteSource for UpstoxClient {
    async fn get_current_bar(&self, symbol: &str) -> Result<Option<Bar>, BrokerError> {
        let bars = self.fetch_candles(symbol).await?;
        Ok(bars.into_iter().last())
    }

    async fn get_latest_bars(&self, symbol: &str, n: usize) -> Result<Vec<Bar>, BrokerError> {
        let mut bars = self.fetch_candles(symbol).await?;
        if bars.len() > n {
            bars.drain(..bars.len() - n);
        }
        Ok(bars)
    }

    async fn is_market_open(&self) -> Result<bool, BrokerError> {
        let url = format!("{}/market/status", self.base_url);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BrokerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: MarketStatusEnvelope = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;
        Ok(envelope.data.map(|d| d.market_open).unwrap_or(false))
    }
}

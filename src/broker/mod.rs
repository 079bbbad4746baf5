//! Broker market-data access
//!
//! One quote-source contract for the whole system: latest bar, bar history
//! and a market-open probe, all keyed by a single instrument-key convention.
//! Transient unavailability (`Ok(None)` / short history) is distinct from
//! transport or API faults (`Err`), so the engine's skip-this-symbol policy
//! is an explicit branch rather than a swallowed exception.

mod rest;

pub use rest::UpstoxClient;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::Bar;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("broker API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("access token file not found at {0} (run the token generator first)")]
    MissingToken(PathBuf),
    #[error("failed to read access token file: {0}")]
    TokenIo(#[from] std::io::Error),
    #[error("access token is not a valid header value")]
    InvalidToken,
    #[error("malformed broker response: {0}")]
    Decode(String),
}

/// Market-data source polled by the decision engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Latest bar for a symbol; `Ok(None)` when the broker has nothing yet
    async fn get_current_bar(&self, symbol: &str) -> Result<Option<Bar>, BrokerError>;

    /// Up to `n` most recent bars, oldest first; may return fewer
    async fn get_latest_bars(&self, symbol: &str, n: usize) -> Result<Vec<Bar>, BrokerError>;

    /// Whether the exchange is currently open
    async fn is_market_open(&self) -> Result<bool, BrokerError>;
}

/// Read the saved OAuth access token. Missing file is fatal at startup: a
/// session must not start without credentials.
pub fn load_access_token(path: &Path) -> Result<String, BrokerError> {
    if !path.exists() {
        return Err(BrokerError::MissingToken(path.to_path_buf()));
    }
    let token = std::fs::read_to_string(path)?;
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(BrokerError::MissingToken(path.to_path_buf()));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_token_file() {
        let err = load_access_token(Path::new("/nonexistent/access_token.txt")).unwrap_err();
        assert!(matches!(err, BrokerError::MissingToken(_)));
    }

    #[test]
    fn test_token_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access_token.txt");
        std::fs::write(&path, "  abc123\n").unwrap();
        assert_eq!(load_access_token(&path).unwrap(), "abc123");
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access_token.txt");
        std::fs::write(&path, "\n").unwrap();
        assert!(matches!(
            load_access_token(&path).unwrap_err(),
            BrokerError::MissingToken(_)
        ));
    }
}

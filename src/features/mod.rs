//! Live feature calculation over recent bars
//!
//! Reproduces the training-time feature set on the latest bar of a history
//! window: ATR percent and its z-score/slope/acceleration, RSI and slope,
//! EMAs, log returns, VWAP distance, volume statistics, candle anatomy and
//! time-of-day encodings. The caller supplies at least [`MIN_BARS`] bars
//! (oldest first); anything a rolling window cannot fill resolves to 0.0,
//! mirroring the NaN/Inf scrub applied during training.

use std::collections::HashMap;
use thiserror::Error;

use crate::types::Bar;

/// Minimum history needed before any feature is produced
pub const MIN_BARS: usize = 100;

/// Bars per trading session (75 five-minute bars), used for the
/// time-of-day phase encoding
const BARS_PER_SESSION: usize = 75;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error("insufficient history: {have} bars, need {need}")]
    InsufficientData { have: usize, need: usize },
}

/// Named feature values for one bar
#[derive(Debug, Clone, Default)]
pub struct Features {
    values: HashMap<String, f64>,
}

impl Features {
    /// Value by name; unknown names read as 0.0 (zero-filled columns)
    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    /// ATR percent with the neutral fallback used by the entry filter
    pub fn atr_pct(&self) -> f64 {
        self.values.get("atr_pct").copied().unwrap_or(1.0)
    }

    /// Extract values in the model's trained column order
    pub fn to_vector(&self, columns: &[String]) -> Vec<f64> {
        columns.iter().map(|c| self.get(c)).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn insert(&mut self, name: &str, value: f64) {
        let clean = if value.is_finite() { value } else { 0.0 };
        self.values.insert(name.to_string(), clean);
    }
}

/// Computes the live feature set from a bar history
#[derive(Debug, Clone, Default)]
pub struct FeatureCalculator;

impl FeatureCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Compute features on the most recent bar of `bars` (oldest first).
    pub fn compute(&self, bars: &[Bar]) -> Result<Features, FeatureError> {
        let n = bars.len();
        if n < MIN_BARS {
            return Err(FeatureError::InsufficientData {
                have: n,
                need: MIN_BARS,
            });
        }
        let t = n - 1;

        let open: Vec<f64> = bars.iter().map(|b| b.open).collect();
        let high: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let low: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volume: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let mut out = Features::default();

        // True range and ATR percent
        let tr: Vec<f64> = (0..n)
            .map(|i| {
                let range = high[i] - low[i];
                if i == 0 {
                    range
                } else {
                    range
                        .max((high[i] - close[i - 1]).abs())
                        .max((low[i] - close[i - 1]).abs())
                }
            })
            .collect();
        let atr_pct: Vec<f64> = (0..n)
            .map(|i| match rolling_mean(&tr, 14, i) {
                Some(atr) if close[i] != 0.0 => atr / close[i] * 100.0,
                _ => f64::NAN,
            })
            .collect();
        out.insert("atr_14", rolling_mean(&tr, 14, t).unwrap_or(f64::NAN));
        out.insert("atr_pct", atr_pct[t]);

        // RSI on simple rolling averages of gains and losses
        let rsi_at = |i: usize| -> f64 {
            if i + 1 < 15 {
                return f64::NAN;
            }
            let mut gain = 0.0;
            let mut loss = 0.0;
            for j in (i - 13)..=i {
                let delta = close[j] - close[j - 1];
                if delta > 0.0 {
                    gain += delta;
                } else {
                    loss -= delta;
                }
            }
            let rs = (gain / 14.0) / (loss / 14.0 + 1e-10);
            100.0 - 100.0 / (1.0 + rs)
        };
        let rsi_now = rsi_at(t);
        out.insert("rsi", rsi_now);
        out.insert("rsi_slope", rsi_now - rsi_at(t - 1));

        // EMAs of close
        let ema9 = ema_series(&close, 9);
        let ema21 = ema_series(&close, 21);
        let ema50 = ema_series(&close, 50);
        out.insert("ema_9", ema9[t]);
        out.insert("ema_21", ema21[t]);
        out.insert("ema_50", ema50[t]);

        // Log returns
        let idx_ret: Vec<f64> = (0..n)
            .map(|i| {
                if i == 0 || close[i - 1] <= 0.0 || close[i] <= 0.0 {
                    f64::NAN
                } else {
                    (close[i] / close[i - 1]).ln()
                }
            })
            .collect();
        out.insert("idx_ret", idx_ret[t]);
        out.insert(
            "idx_ret_3",
            idx_ret[t] + idx_ret[t - 1] + idx_ret[t - 2],
        );

        // Index-relative context, constant in live trading (no benchmark feed)
        out.insert("excess_ret", 0.0);
        out.insert("excess_ret_ema3", 0.0);
        out.insert("rolling_beta", 1.0);

        // ATR percent dynamics
        let atr_valid: Vec<f64> = atr_pct.iter().copied().filter(|v| v.is_finite()).collect();
        let av_last = atr_valid.len().saturating_sub(1);
        let atr_z = match (
            rolling_mean(&atr_valid, 100, av_last),
            rolling_std(&atr_valid, 100, av_last),
        ) {
            (Some(mean), Some(std)) => (atr_pct[t] - mean) / (std + 1e-6),
            _ => f64::NAN,
        };
        out.insert("atrpct_z", atr_z);
        let slope = atr_pct[t] - atr_pct[t - 5];
        out.insert("atrpct_slope", slope);
        out.insert(
            "atrpct_accel",
            slope - (atr_pct[t - 5] - atr_pct[t - 10]),
        );

        // Time-of-day phase over the session grid
        let tod_fraction = (t % BARS_PER_SESSION) as f64 / BARS_PER_SESSION as f64;
        out.insert("tod_fraction", tod_fraction);
        out.insert("tod_sin", (2.0 * std::f64::consts::PI * tod_fraction).sin());
        out.insert("tod_cos", (2.0 * std::f64::consts::PI * tod_fraction).cos());

        // VWAP distance
        let typical_vol: Vec<f64> = bars.iter().map(|b| b.typical_price() * b.volume).collect();
        let vwap_at = |i: usize| -> f64 {
            match (
                rolling_sum(&typical_vol, 20, i),
                rolling_sum(&volume, 20, i),
            ) {
                (Some(tv), Some(v)) if v != 0.0 => tv / v,
                _ => f64::NAN,
            }
        };
        let vwap_dist_at = |i: usize| {
            let vwap = vwap_at(i);
            (close[i] - vwap) / (vwap + 1e-6)
        };
        let vwap_now = vwap_at(t);
        out.insert("vwap_20", vwap_now);
        out.insert("vwap_dist", vwap_dist_at(t));
        out.insert("vwap_dist_change", vwap_dist_at(t) - vwap_dist_at(t - 1));

        // Volume statistics
        let vol_mean = rolling_mean(&volume, 20, t).unwrap_or(f64::NAN);
        let vol_std = rolling_std(&volume, 20, t).unwrap_or(f64::NAN);
        out.insert("vol_zscore", (volume[t] - vol_mean) / (vol_std + 1e-6));
        let vol_ratio: Vec<f64> = (19..n)
            .map(|i| volume[i] / (rolling_mean(&volume, 20, i).unwrap_or(f64::NAN) + 1e-6))
            .collect();
        let ratio_now = *vol_ratio.last().unwrap_or(&f64::NAN);
        out.insert("vol_ratio", ratio_now);
        out.insert("volume_ratio", ratio_now);
        let vol_trend = ema_series(&vol_ratio, 10);
        out.insert("vol_trend", vol_trend.last().copied().unwrap_or(f64::NAN) - 1.0);
        let vol_ema9 = ema_series(&volume, 9);
        out.insert(
            "volume_momentum",
            (volume[t] - vol_ema9[t]) / (vol_ema9[t] + 1e-6),
        );

        // Trend regime from EMA divergence
        let ema_div: Vec<f64> = (0..n)
            .map(|i| (ema21[i] - ema50[i]) / (close[i] + 1e-6))
            .collect();
        out.insert("ema_div", ema_div[t]);
        let div_z = match (
            rolling_mean(&ema_div, 100, t),
            rolling_std(&ema_div, 100, t),
        ) {
            (Some(mean), Some(std)) => (ema_div[t] - mean) / (std + 1e-6),
            _ => f64::NAN,
        };
        out.insert("ema_div_z", div_z);
        out.insert("trend_regime", div_z * (ema21[t] - ema50[t]).signum());

        // Close location value
        let clv_at = |i: usize| {
            ((close[i] - low[i]) - (high[i] - close[i])) / (high[i] - low[i] + 1e-6)
        };
        out.insert("clv", clv_at(t));
        out.insert("clv_sum3", clv_at(t) + clv_at(t - 1) + clv_at(t - 2));

        // Candle anatomy of the latest bar
        let body_top = open[t].max(close[t]);
        let body_bottom = open[t].min(close[t]);
        out.insert("bar_range", (high[t] - low[t]) / (close[t] + 1e-6));
        out.insert("bar_body", (close[t] - open[t]).abs() / (close[t] + 1e-6));
        out.insert("upper_wick", (high[t] - body_top) / (close[t] + 1e-6));
        out.insert("lower_wick", (body_bottom - low[t]) / (close[t] + 1e-6));

        Ok(out)
    }
}

fn rolling_mean(values: &[f64], window: usize, idx: usize) -> Option<f64> {
    if idx + 1 < window || values.is_empty() {
        return None;
    }
    let slice = &values[idx + 1 - window..=idx];
    Some(slice.iter().sum::<f64>() / window as f64)
}

fn rolling_sum(values: &[f64], window: usize, idx: usize) -> Option<f64> {
    if idx + 1 < window || values.is_empty() {
        return None;
    }
    Some(values[idx + 1 - window..=idx].iter().sum())
}

/// Sample standard deviation over a trailing window
fn rolling_std(values: &[f64], window: usize, idx: usize) -> Option<f64> {
    if window < 2 || idx + 1 < window || values.is_empty() {
        return None;
    }
    let slice = &values[idx + 1 - window..=idx];
    let mean = slice.iter().sum::<f64>() / window as f64;
    let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window as f64 - 1.0);
    Some(var.sqrt())
}

/// Exponential moving average with alpha = 2 / (span + 1), seeded from the
/// first value
fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];
    out.push(ema);
    for &v in &values[1..] {
        ema = alpha * v + (1.0 - alpha) * ema;
        out.push(ema);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_bar(i: usize, close: f64, range: f64, volume: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2026, 2, 3, 3, 45, 0).unwrap()
            + Duration::minutes(5 * i as i64);
        Bar {
            timestamp: ts,
            open: close,
            high: close + range / 2.0,
            low: close - range / 2.0,
            close,
            volume,
        }
    }

    fn flat_history(n: usize) -> Vec<Bar> {
        (0..n).map(|i| make_bar(i, 100.0, 2.0, 1_000.0)).collect()
    }

    #[test]
    fn test_insufficient_history_is_an_error() {
        let calc = FeatureCalculator::new();
        let err = calc.compute(&flat_history(99)).unwrap_err();
        assert_eq!(
            err,
            FeatureError::InsufficientData {
                have: 99,
                need: 100
            }
        );
    }

    #[test]
    fn test_atr_pct_on_constant_range() {
        let calc = FeatureCalculator::new();
        let features = calc.compute(&flat_history(120)).unwrap();
        // Every true range is 2.0 on a 100.0 close -> 2% ATR
        assert!((features.get("atr_pct") - 2.0).abs() < 1e-9);
        assert!((features.get("atr_14") - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_saturates_in_steady_uptrend() {
        let calc = FeatureCalculator::new();
        let bars: Vec<Bar> = (0..120)
            .map(|i| make_bar(i, 100.0 + i as f64, 1.0, 1_000.0))
            .collect();
        let features = calc.compute(&bars).unwrap();
        assert!(features.get("rsi") > 99.0);
        assert!(features.get("ema_9") > features.get("ema_50"));
        assert!(features.get("idx_ret") > 0.0);
    }

    #[test]
    fn test_flat_market_features_are_neutral() {
        let calc = FeatureCalculator::new();
        let features = calc.compute(&flat_history(150)).unwrap();
        assert!((features.get("ema_9") - 100.0).abs() < 1e-9);
        assert!((features.get("idx_ret")).abs() < 1e-12);
        // Zero dispersion: z-scores collapse to zero via the epsilon guard
        assert!(features.get("atrpct_z").abs() < 1e-6);
        assert!(features.get("vol_zscore").abs() < 1e-6);
        // Symmetric candle: close sits mid-range
        assert!(features.get("clv").abs() < 1e-6);
    }

    #[test]
    fn test_vector_extraction_follows_column_order() {
        let calc = FeatureCalculator::new();
        let features = calc.compute(&flat_history(120)).unwrap();
        let cols = vec![
            "atr_pct".to_string(),
            "no_such_feature".to_string(),
            "rolling_beta".to_string(),
        ];
        let x = features.to_vector(&cols);
        assert_eq!(x.len(), 3);
        assert!((x[0] - 2.0).abs() < 1e-9);
        assert_eq!(x[1], 0.0);
        assert_eq!(x[2], 1.0);
    }

    #[test]
    fn test_zero_volume_does_not_poison_features() {
        let calc = FeatureCalculator::new();
        let bars: Vec<Bar> = (0..120).map(|i| make_bar(i, 100.0, 2.0, 0.0)).collect();
        let features = calc.compute(&bars).unwrap();
        // VWAP is undefined without volume; the scrub maps it to 0.0
        assert_eq!(features.get("vwap_20"), 0.0);
        assert!(features.get("atr_pct").is_finite());
    }

    #[test]
    fn test_atr_fallback_when_absent() {
        let features = Features::default();
        assert_eq!(features.atr_pct(), 1.0);
        assert_eq!(features.get("atr_pct"), 0.0);
    }
}

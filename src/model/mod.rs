//! Pre-trained classifier scoring
//!
//! The model is trained offline and exported as a JSON bundle holding the
//! feature column order and linear coefficients. At runtime only scoring
//! remains: a dot product over the ordered feature vector squashed to a
//! probability. A missing or malformed bundle is fatal at startup; a session
//! must never run without a validated model and feature-column list.

use anyhow::{bail, Context, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Confidence scorer over an ordered feature vector
pub trait Scorer: Send + Sync {
    /// Column order the feature vector must follow
    fn feature_cols(&self) -> &[String];

    /// Probability-like confidence in [0, 1]
    fn score(&self, features: &[f64]) -> f64;
}

/// Exported model bundle format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    /// Feature column names, in training order
    pub feature_cols: Vec<String>,
    /// One coefficient per feature column
    pub weights: Vec<f64>,
    /// Bias term
    pub intercept: f64,
}

/// Logistic scorer backed by an exported coefficient bundle
#[derive(Debug)]
pub struct LinearModel {
    feature_cols: Vec<String>,
    weights: Array1<f64>,
    intercept: f64,
}

impl LinearModel {
    /// Load and validate a bundle from disk
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model bundle {}", path.display()))?;
        let bundle: ModelBundle = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse model bundle {}", path.display()))?;
        let model = Self::from_bundle(bundle)?;
        info!(
            path = %path.display(),
            features = model.feature_cols.len(),
            "model bundle loaded"
        );
        Ok(model)
    }

    pub fn from_bundle(bundle: ModelBundle) -> Result<Self> {
        if bundle.feature_cols.is_empty() {
            bail!("model bundle has no feature columns");
        }
        if bundle.weights.len() != bundle.feature_cols.len() {
            bail!(
                "model bundle has {} weights for {} feature columns",
                bundle.weights.len(),
                bundle.feature_cols.len()
            );
        }
        if bundle.weights.iter().any(|w| !w.is_finite()) || !bundle.intercept.is_finite() {
            bail!("model bundle contains non-finite coefficients");
        }

        Ok(Self {
            feature_cols: bundle.feature_cols,
            weights: Array1::from_vec(bundle.weights),
            intercept: bundle.intercept,
        })
    }
}

impl Scorer for LinearModel {
    fn feature_cols(&self) -> &[String] {
        &self.feature_cols
    }

    fn score(&self, features: &[f64]) -> f64 {
        debug_assert_eq!(features.len(), self.weights.len());
        let x = Array1::from_vec(features.to_vec());
        let z = self.weights.dot(&x) + self.intercept;
        let p = 1.0 / (1.0 + (-z).exp());
        p.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(weights: Vec<f64>, intercept: f64) -> ModelBundle {
        ModelBundle {
            feature_cols: (0..weights.len()).map(|i| format!("f{}", i)).collect(),
            weights,
            intercept,
        }
    }

    #[test]
    fn test_zero_model_scores_half() {
        let model = LinearModel::from_bundle(bundle(vec![0.0, 0.0], 0.0)).unwrap();
        assert!((model.score(&[3.0, -7.0]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_sigmoid_monotone_in_logit() {
        let model = LinearModel::from_bundle(bundle(vec![1.0], 0.0)).unwrap();
        let low = model.score(&[-2.0]);
        let mid = model.score(&[0.0]);
        let high = model.score(&[2.0]);
        assert!(low < mid && mid < high);
        assert!(low > 0.0 && high < 1.0);
        // sigmoid(2) = 0.8808
        assert!((high - 0.880797).abs() < 1e-5);
    }

    #[test]
    fn test_extreme_logits_stay_in_unit_interval() {
        let model = LinearModel::from_bundle(bundle(vec![100.0], 50.0)).unwrap();
        let p = model.score(&[100.0]);
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_bundle_validation() {
        assert!(LinearModel::from_bundle(ModelBundle {
            feature_cols: vec![],
            weights: vec![],
            intercept: 0.0,
        })
        .is_err());

        assert!(LinearModel::from_bundle(ModelBundle {
            feature_cols: vec!["a".into(), "b".into()],
            weights: vec![0.1],
            intercept: 0.0,
        })
        .is_err());

        assert!(LinearModel::from_bundle(bundle(vec![f64::NAN], 0.0)).is_err());
    }

    #[test]
    fn test_missing_bundle_file_is_fatal() {
        let err = LinearModel::load(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(err.to_string().contains("model bundle"));
    }
}

//! Drift detection module
//!
//! Compares a current sample of a feature (or of model predictions) with a
//! stored reference sample using the KS test, PSI or KL divergence.

mod statistics;

pub use statistics::{
    bin_fractions, kolmogorov_survival, ks_p_value, ks_statistic, percentile_edges, statistic_for,
    DriftStatistic, KlDivergence, KolmogorovSmirnovTest, PopulationStabilityIndex,
    PROBABILITY_EPSILON,
};

use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use crate::error::Result;

/// Statistical method used to score drift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftMethod {
    /// Two-sample Kolmogorov-Smirnov test; drift when the p-value is small
    KsTest,
    /// Population Stability Index; drift when the index is large
    Psi,
    /// KL divergence of current from reference; drift when large
    KlDivergence,
}

impl std::fmt::Display for DriftMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriftMethod::KsTest => "KS_TEST",
            DriftMethod::Psi => "PSI",
            DriftMethod::KlDivergence => "KL_DIVERGENCE",
        };
        f.write_str(s)
    }
}

/// Raw output of a drift statistic, before thresholding
#[derive(Debug, Clone, PartialEq)]
pub struct DriftScore {
    pub score: f64,
    pub p_value: Option<f64>,
    pub n_reference: usize,
    pub n_current: usize,
    pub n_bins: Option<usize>,
}

/// Drift verdict for one feature and one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftResult {
    pub feature_name: String,
    pub method: DriftMethod,
    /// KS statistic, PSI or KL divergence
    pub score: f64,
    /// p-value cutoff for KS, score cutoff otherwise
    pub threshold: f64,
    pub is_drift: bool,
    pub p_value: Option<f64>,
    pub details: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Per-method thresholds and binning used to turn scores into verdicts
#[derive(Debug, Clone, PartialEq)]
pub struct DriftEvaluator {
    /// KS drift when p-value < this
    pub ks_alpha: f64,
    /// PSI drift when index > this
    pub psi_threshold: f64,
    /// KL drift when divergence > this
    pub kl_threshold: f64,
    pub n_bins: usize,
}

impl Default for DriftEvaluator {
    fn default() -> Self {
        Self {
            ks_alpha: 0.05,
            psi_threshold: 0.2,
            kl_threshold: 0.1,
            n_bins: 10,
        }
    }
}

impl DriftEvaluator {
    pub fn threshold_for(&self, method: DriftMethod) -> f64 {
        match method {
            DriftMethod::KsTest => self.ks_alpha,
            DriftMethod::Psi => self.psi_threshold,
            DriftMethod::KlDivergence => self.kl_threshold,
        }
    }

    /// Score `current` against `reference` and apply the method's threshold
    pub fn evaluate(
        &self,
        feature_name: &str,
        method: DriftMethod,
        reference: &Array1<f64>,
        current: &Array1<f64>,
    ) -> Result<DriftResult> {
        let raw = statistic_for(method, self.n_bins).compute(reference, current)?;
        let threshold = self.threshold_for(method);

        let is_drift = match method {
            DriftMethod::KsTest => raw.p_value.map(|p| p < threshold).unwrap_or(false),
            DriftMethod::Psi | DriftMethod::KlDivergence => raw.score > threshold,
        };

        let mut details = HashMap::new();
        details.insert("n_reference".to_string(), json!(raw.n_reference));
        details.insert("n_current".to_string(), json!(raw.n_current));
        details.insert("reference_mean".to_string(), json!(finite_mean(reference)));
        details.insert("current_mean".to_string(), json!(finite_mean(current)));
        if let Some(n_bins) = raw.n_bins {
            details.insert("n_bins".to_string(), json!(n_bins));
        }

        Ok(DriftResult {
            feature_name: feature_name.to_string(),
            method,
            score: raw.score,
            threshold,
            is_drift,
            p_value: raw.p_value,
            details,
            timestamp: Utc::now(),
        })
    }
}

fn finite_mean(data: &Array1<f64>) -> f64 {
    let (sum, count) = data
        .iter()
        .filter(|x| x.is_finite())
        .fold((0.0, 0usize), |(s, n), &x| (s + x, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

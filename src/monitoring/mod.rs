//! Monitoring Module
//!
//! Watches prediction traffic for feature and prediction drift and for
//! performance degradation, raising alerts when thresholds are crossed.

pub mod alerts;
mod monitor;
mod records;

pub use alerts::{Alert, AlertQuery, AlertSeverity, AlertSink, AlertType};
pub use monitor::{DriftMonitor, MonitoringSummary};
pub use records::{PerformanceMetrics, PredictionEvent, PredictionRecord};

use serde::{Deserialize, Serialize};

use crate::drift::DriftEvaluator;

/// Thresholds for the [`DriftMonitor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// KS test p-value below which a feature has drifted
    pub drift_threshold: f64,
    /// PSI above which a feature has drifted
    pub psi_threshold: f64,
    /// KL divergence above which a feature has drifted
    pub kl_threshold: f64,
    /// Number of percentile bins for PSI and KL
    pub n_bins: usize,
    /// Per-prediction latency that raises HIGH_LATENCY
    pub latency_threshold_ms: f64,
    /// Windowed error rate that raises HIGH_ERROR_RATE
    pub error_rate_threshold: f64,
    /// Windowed accuracy below which PERFORMANCE_DEGRADATION is raised
    pub accuracy_threshold: Option<f64>,
    /// A labeled prediction is correct when |prediction - actual| < this
    pub correctness_tolerance: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 0.05,
            psi_threshold: 0.2,
            kl_threshold: 0.1,
            n_bins: 10,
            latency_threshold_ms: 1000.0,
            error_rate_threshold: 0.05,
            accuracy_threshold: None,
            correctness_tolerance: 0.5,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the KS p-value cutoff
    pub fn with_drift_threshold(mut self, threshold: f64) -> Self {
        self.drift_threshold = threshold;
        self
    }

    /// Builder method to set the PSI and KL cutoffs
    pub fn with_divergence_thresholds(mut self, psi: f64, kl: f64) -> Self {
        self.psi_threshold = psi;
        self.kl_threshold = kl;
        self
    }

    pub fn with_bins(mut self, n_bins: usize) -> Self {
        self.n_bins = n_bins.max(2);
        self
    }

    pub fn with_latency_threshold(mut self, latency_ms: f64) -> Self {
        self.latency_threshold_ms = latency_ms;
        self
    }

    pub fn with_error_rate_threshold(mut self, rate: f64) -> Self {
        self.error_rate_threshold = rate;
        self
    }

    pub fn with_accuracy_threshold(mut self, accuracy: f64) -> Self {
        self.accuracy_threshold = Some(accuracy);
        self
    }

    pub fn with_correctness_tolerance(mut self, tolerance: f64) -> Self {
        self.correctness_tolerance = tolerance;
        self
    }

    pub(crate) fn evaluator(&self) -> DriftEvaluator {
        DriftEvaluator {
            ks_alpha: self.drift_threshold,
            psi_threshold: self.psi_threshold,
            kl_threshold: self.kl_threshold,
            n_bins: self.n_bins,
        }
    }
}

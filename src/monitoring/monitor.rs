//! Drift and performance monitor
//!
//! Holds the reference snapshot and the append-only prediction, drift,
//! performance and alert histories behind one mutex. Statistics are computed
//! outside the lock; only snapshots and appends happen while holding it.

use chrono::{DateTime, Utc};
use ndarray::Array1;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::alerts::{deliver, Alert, AlertQuery, AlertSeverity, AlertSink, AlertType};
use super::records::{PerformanceMetrics, PredictionEvent, PredictionRecord};
use super::MonitorConfig;
use crate::drift::{DriftEvaluator, DriftMethod, DriftResult};

/// Feature name used for prediction drift results
const PREDICTION_FEATURE: &str = "prediction";

/// Longest window accepted by the windowed queries (100 years)
const MAX_WINDOW_HOURS: f64 = 24.0 * 365.0 * 100.0;

/// Baseline distributions drift is measured against
#[derive(Debug, Clone)]
pub struct ReferenceSnapshot {
    pub features: HashMap<String, Array1<f64>>,
    pub predictions: Option<Array1<f64>>,
    pub set_at: DateTime<Utc>,
}

/// Counts over the monitor's histories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub has_reference: bool,
    pub reference_features: Vec<String>,
    pub total_predictions: usize,
    pub drift_checks: usize,
    pub drifted_results: usize,
    pub total_alerts: usize,
    pub unacknowledged_alerts: usize,
    pub unacknowledged_critical: usize,
    pub last_performance: Option<PerformanceMetrics>,
}

#[derive(Default)]
struct MonitorState {
    reference: Option<Arc<ReferenceSnapshot>>,
    predictions: Vec<PredictionRecord>,
    drift_history: Vec<DriftResult>,
    performance_history: Vec<PerformanceMetrics>,
    alerts: Vec<Alert>,
}

/// Watches prediction traffic for drift and degradation
pub struct DriftMonitor {
    config: MonitorConfig,
    evaluator: DriftEvaluator,
    sink: Option<Arc<dyn AlertSink>>,
    state: Mutex<MonitorState>,
}

impl DriftMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            evaluator: config.evaluator(),
            config,
            sink: None,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Deliver every raised alert to `sink` as well
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Replace the reference snapshot wholesale
    pub fn set_reference(&self, features: HashMap<String, Array1<f64>>, predictions: Option<Array1<f64>>) {
        let n_features = features.len();
        let has_predictions = predictions.is_some();
        let snapshot = ReferenceSnapshot {
            features,
            predictions,
            set_at: Utc::now(),
        };
        self.state.lock().reference = Some(Arc::new(snapshot));
        info!(n_features, has_predictions, "Reference data set");
    }

    pub fn reference(&self) -> Option<Arc<ReferenceSnapshot>> {
        self.state.lock().reference.clone()
    }

    /// Append a prediction and check its latency and error status.
    ///
    /// Returns the alerts raised for this call.
    pub fn log_prediction(&self, event: PredictionEvent) -> Vec<Alert> {
        let record = PredictionRecord::from_event(event);
        let mut raised = Vec::new();

        if record.latency_ms > self.config.latency_threshold_ms {
            raised.push(
                Alert::new(
                    AlertType::HighLatency,
                    AlertSeverity::Warning,
                    format!(
                        "Prediction {} took {:.1} ms (threshold {:.1} ms)",
                        record.prediction_id, record.latency_ms, self.config.latency_threshold_ms
                    ),
                )
                .with_detail("prediction_id", record.prediction_id.as_str())
                .with_detail("latency_ms", record.latency_ms)
                .with_detail("threshold_ms", self.config.latency_threshold_ms),
            );
        }

        if let Some(error) = &record.error {
            raised.push(
                Alert::new(
                    AlertType::HighErrorRate,
                    AlertSeverity::Warning,
                    format!("Prediction {} failed: {}", record.prediction_id, error),
                )
                .with_detail("prediction_id", record.prediction_id.as_str())
                .with_detail("error", error.as_str())
                .with_detail("source", "prediction"),
            );
        }

        debug!(
            prediction_id = %record.prediction_id,
            latency_ms = record.latency_ms,
            failed = record.is_error(),
            "Prediction logged"
        );

        {
            let mut state = self.state.lock();
            state.predictions.push(record);
            state.alerts.extend(raised.iter().cloned());
        }
        self.dispatch(&raised);
        raised
    }

    /// Score each feature of `current_data` against the reference.
    ///
    /// With `features` unset every feature named on either side is checked.
    /// Features missing from one side, or whose samples cannot be scored,
    /// are skipped with a warning. Every result is recorded; drifted ones
    /// also raise FEATURE_DRIFT.
    pub fn detect_feature_drift(
        &self,
        current_data: &HashMap<String, Array1<f64>>,
        method: DriftMethod,
        features: Option<&[&str]>,
    ) -> Vec<DriftResult> {
        let Some(reference) = self.reference() else {
            warn!("No reference data set, skipping feature drift detection");
            return Vec::new();
        };

        let names: Vec<String> = match features {
            Some(list) => list.iter().map(|s| s.to_string()).collect(),
            None => reference
                .features
                .keys()
                .chain(current_data.keys())
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        };

        let mut results = Vec::with_capacity(names.len());
        for name in &names {
            let (Some(ref_sample), Some(cur_sample)) = (reference.features.get(name), current_data.get(name)) else {
                warn!(feature = %name, "Feature missing from reference or current data, skipping");
                continue;
            };
            match self.evaluator.evaluate(name, method, ref_sample, cur_sample) {
                Ok(result) => results.push(result),
                Err(e) => warn!(feature = %name, error = %e, "Drift computation failed, skipping"),
            }
        }

        let alerts: Vec<Alert> = results
            .iter()
            .filter(|r| r.is_drift)
            .map(|r| drift_alert(AlertType::FeatureDrift, r))
            .collect();

        self.record_drift(&results, &alerts);
        info!(
            method = %method,
            checked = results.len(),
            drifted = alerts.len(),
            "Feature drift check complete"
        );
        results
    }

    /// Score current predictions against the reference predictions
    pub fn detect_prediction_drift(&self, current_predictions: &Array1<f64>, method: DriftMethod) -> Option<DriftResult> {
        let reference = self.reference()?;
        let Some(ref_predictions) = reference.predictions.as_ref() else {
            warn!("No reference predictions set, skipping prediction drift detection");
            return None;
        };

        let result = match self
            .evaluator
            .evaluate(PREDICTION_FEATURE, method, ref_predictions, current_predictions)
        {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Prediction drift computation failed");
                return None;
            }
        };

        let alerts: Vec<Alert> = if result.is_drift {
            vec![drift_alert(AlertType::PredictionDrift, &result)]
        } else {
            Vec::new()
        };
        self.record_drift(std::slice::from_ref(&result), &alerts);
        Some(result)
    }

    /// Aggregate the prediction log over the trailing `window_hours`.
    ///
    /// An empty window yields zeroed metrics. The result is always appended
    /// to the performance history.
    pub fn calculate_performance(&self, window_hours: f64) -> PerformanceMetrics {
        let records = self.records_in_window(window_hours);
        let metrics = PerformanceMetrics::from_records(&records, window_hours, self.config.correctness_tolerance);

        let mut alerts = Vec::new();
        if metrics.total_predictions > 0 && metrics.error_rate > self.config.error_rate_threshold {
            alerts.push(
                Alert::new(
                    AlertType::HighErrorRate,
                    AlertSeverity::Critical,
                    format!(
                        "Error rate {:.2}% over the last {} h exceeds {:.2}%",
                        metrics.error_rate * 100.0,
                        window_hours,
                        self.config.error_rate_threshold * 100.0
                    ),
                )
                .with_detail("source", "window")
                .with_detail("error_rate", metrics.error_rate)
                .with_detail("threshold", self.config.error_rate_threshold)
                .with_detail("total_predictions", metrics.total_predictions)
                .with_detail("window_hours", window_hours),
            );
        }

        if let (Some(threshold), Some(accuracy)) = (self.config.accuracy_threshold, metrics.accuracy) {
            if accuracy < threshold {
                alerts.push(
                    Alert::new(
                        AlertType::PerformanceDegradation,
                        AlertSeverity::Warning,
                        format!("Accuracy {:.3} fell below {:.3}", accuracy, threshold),
                    )
                    .with_detail("accuracy", accuracy)
                    .with_detail("threshold", threshold)
                    .with_detail("labeled_count", metrics.labeled_count)
                    .with_detail("window_hours", window_hours),
                );
            }
        }

        {
            let mut state = self.state.lock();
            state.performance_history.push(metrics.clone());
            state.alerts.extend(alerts.iter().cloned());
        }
        self.dispatch(&alerts);
        metrics
    }

    /// Feature samples from successful predictions in the trailing window
    pub fn collect_features(&self, window_hours: f64) -> HashMap<String, Array1<f64>> {
        let mut columns: HashMap<String, Vec<f64>> = HashMap::new();
        for record in self.records_in_window(window_hours).iter().filter(|r| !r.is_error()) {
            for (name, value) in &record.features {
                columns.entry(name.clone()).or_default().push(*value);
            }
        }
        columns
            .into_iter()
            .map(|(name, values)| (name, Array1::from_vec(values)))
            .collect()
    }

    /// Predictions from successful requests in the trailing window
    pub fn collect_predictions(&self, window_hours: f64) -> Array1<f64> {
        self.records_in_window(window_hours)
            .iter()
            .filter(|r| !r.is_error())
            .map(|r| r.prediction)
            .collect()
    }

    pub fn get_alerts(&self, query: &AlertQuery) -> Vec<Alert> {
        self.state
            .lock()
            .alerts
            .iter()
            .filter(|a| query.matches(a))
            .cloned()
            .collect()
    }

    pub fn get_drift_history(&self, feature: Option<&str>, since: Option<DateTime<Utc>>) -> Vec<DriftResult> {
        self.state
            .lock()
            .drift_history
            .iter()
            .filter(|r| feature.map_or(true, |f| r.feature_name == f))
            .filter(|r| since.map_or(true, |t| r.timestamp >= t))
            .cloned()
            .collect()
    }

    pub fn get_performance_history(&self, since: Option<DateTime<Utc>>) -> Vec<PerformanceMetrics> {
        self.state
            .lock()
            .performance_history
            .iter()
            .filter(|m| match (since, m.computed_at) {
                (Some(t), Some(at)) => at >= t,
                _ => true,
            })
            .cloned()
            .collect()
    }

    /// Logged predictions, oldest first; `limit` keeps the most recent ones
    pub fn get_prediction_history(&self, since: Option<DateTime<Utc>>, limit: Option<usize>) -> Vec<PredictionRecord> {
        let state = self.state.lock();
        let matching: Vec<&PredictionRecord> = state
            .predictions
            .iter()
            .filter(|r| since.map_or(true, |t| r.timestamp >= t))
            .collect();
        let skip = limit.map_or(0, |n| matching.len().saturating_sub(n));
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Mark an alert acknowledged. Returns whether the id was found.
    pub fn acknowledge_alert(&self, alert_id: &str) -> bool {
        let found = {
            let mut state = self.state.lock();
            match state.alerts.iter_mut().find(|a| a.id == alert_id) {
                Some(alert) => {
                    alert.acknowledged = true;
                    true
                }
                None => false,
            }
        };
        if found {
            info!(alert_id, "Alert acknowledged");
        }
        found
    }

    pub fn summary(&self) -> MonitoringSummary {
        let state = self.state.lock();
        let mut reference_features: Vec<String> = state
            .reference
            .as_ref()
            .map(|r| r.features.keys().cloned().collect())
            .unwrap_or_default();
        reference_features.sort();

        let unacknowledged: Vec<&Alert> = state.alerts.iter().filter(|a| !a.acknowledged).collect();
        MonitoringSummary {
            has_reference: state.reference.is_some(),
            reference_features,
            total_predictions: state.predictions.len(),
            drift_checks: state.drift_history.len(),
            drifted_results: state.drift_history.iter().filter(|r| r.is_drift).count(),
            total_alerts: state.alerts.len(),
            unacknowledged_alerts: unacknowledged.len(),
            unacknowledged_critical: unacknowledged
                .iter()
                .filter(|a| a.severity == AlertSeverity::Critical)
                .count(),
            last_performance: state.performance_history.last().cloned(),
        }
    }

    fn records_in_window(&self, window_hours: f64) -> Vec<PredictionRecord> {
        let cutoff = window_start(window_hours);
        self.state
            .lock()
            .predictions
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    fn record_drift(&self, results: &[DriftResult], alerts: &[Alert]) {
        {
            let mut state = self.state.lock();
            state.drift_history.extend(results.iter().cloned());
            state.alerts.extend(alerts.iter().cloned());
        }
        self.dispatch(alerts);
    }

    fn dispatch(&self, alerts: &[Alert]) {
        for alert in alerts {
            alert.log();
            if let Some(sink) = &self.sink {
                deliver(sink.as_ref(), alert);
            }
        }
    }
}

impl Default for DriftMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

fn window_start(window_hours: f64) -> DateTime<Utc> {
    let hours = if window_hours.is_nan() {
        0.0
    } else {
        window_hours.clamp(0.0, MAX_WINDOW_HOURS)
    };
    let span = chrono::Duration::milliseconds((hours * 3_600_000.0) as i64);
    Utc::now()
        .checked_sub_signed(span)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn drift_severity(result: &DriftResult) -> AlertSeverity {
    let severe = match result.method {
        DriftMethod::KsTest => result.p_value.map_or(false, |p| p < result.threshold / 10.0),
        DriftMethod::Psi | DriftMethod::KlDivergence => result.score > 2.0 * result.threshold,
    };
    if severe {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Warning
    }
}

fn drift_alert(alert_type: AlertType, result: &DriftResult) -> Alert {
    let mut alert = Alert::new(
        alert_type,
        drift_severity(result),
        format!(
            "Drift detected in '{}' ({} score {:.4}, threshold {:.4})",
            result.feature_name, result.method, result.score, result.threshold
        ),
    )
    .with_detail("feature", result.feature_name.as_str())
    .with_detail("method", result.method.to_string())
    .with_detail("score", result.score)
    .with_detail("threshold", result.threshold);
    if let Some(p) = result.p_value {
        alert = alert.with_detail("p_value", p);
    }
    alert
}

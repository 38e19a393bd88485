//! Prediction log records and windowed performance metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A prediction to be logged, built by the caller.
#[derive(Debug, Clone)]
pub struct PredictionEvent {
    pub prediction_id: String,
    pub model_id: Option<String>,
    pub version: Option<String>,
    pub features: HashMap<String, f64>,
    pub prediction: f64,
    pub actual: Option<f64>,
    pub latency_ms: f64,
    pub error: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PredictionEvent {
    pub fn new(
        prediction_id: impl Into<String>,
        features: HashMap<String, f64>,
        prediction: f64,
        latency_ms: f64,
    ) -> Self {
        Self {
            prediction_id: prediction_id.into(),
            model_id: None,
            version: None,
            features,
            prediction,
            actual: None,
            latency_ms,
            error: None,
            timestamp: None,
        }
    }

    /// Builder method to tag the serving model
    pub fn with_model(mut self, model_id: impl Into<String>, version: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self.version = Some(version.into());
        self
    }

    /// Builder method to attach the observed outcome
    pub fn with_actual(mut self, actual: f64) -> Self {
        self.actual = Some(actual);
        self
    }

    /// Builder method to record a failed prediction
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Builder method to backdate the event; defaults to the logging time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Immutable entry in the prediction log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub prediction_id: String,
    pub model_id: Option<String>,
    pub version: Option<String>,
    pub features: HashMap<String, f64>,
    pub prediction: f64,
    pub actual: Option<f64>,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl PredictionRecord {
    pub(crate) fn from_event(event: PredictionEvent) -> Self {
        Self {
            prediction_id: event.prediction_id,
            model_id: event.model_id,
            version: event.version,
            features: event.features,
            prediction: event.prediction,
            actual: event.actual,
            latency_ms: event.latency_ms,
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
            error: event.error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregates over the prediction log for one trailing window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Share of labeled, successful predictions judged correct
    pub accuracy: Option<f64>,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub total_predictions: usize,
    pub error_count: usize,
    /// Predictions that had an actual value and no error
    pub labeled_count: usize,
    pub window_hours: f64,
    pub computed_at: Option<DateTime<Utc>>,
}

impl PerformanceMetrics {
    /// Aggregate the given records; `tolerance` decides correctness
    pub(crate) fn from_records(records: &[PredictionRecord], window_hours: f64, tolerance: f64) -> Self {
        let mut metrics = Self {
            window_hours,
            computed_at: Some(Utc::now()),
            ..Self::default()
        };
        if records.is_empty() {
            return metrics;
        }

        let total = records.len();
        let errors = records.iter().filter(|r| r.is_error()).count();
        let latency_sum: f64 = records.iter().map(|r| r.latency_ms).sum();

        let labeled: Vec<(f64, f64)> = records
            .iter()
            .filter(|r| !r.is_error())
            .filter_map(|r| r.actual.map(|a| (r.prediction, a)))
            .collect();
        let correct = labeled
            .iter()
            .filter(|(p, a)| (p - a).abs() < tolerance)
            .count();

        metrics.total_predictions = total;
        metrics.error_count = errors;
        metrics.error_rate = errors as f64 / total as f64;
        metrics.avg_latency_ms = latency_sum / total as f64;
        metrics.labeled_count = labeled.len();
        if !labeled.is_empty() {
            metrics.accuracy = Some(correct as f64 / labeled.len() as f64);
        }
        metrics
    }
}

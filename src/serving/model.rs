//! A single deployed model version and its request counters

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::predictor::PredictorRef;
use crate::error::{Result, ServingError};

/// Deadline helper threads a version may have running at once
pub const DEFAULT_HELPER_LIMIT: usize = 4;

/// Lifecycle status of a served model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    /// Deployed but not yet accepting traffic
    Loading,
    /// Healthy and serving
    Ready,
    /// Serving, but flagged unhealthy by an external signal
    Degraded,
    /// Permanently broken
    Failed,
    /// Withdrawn from service
    Retired,
}

impl ModelStatus {
    /// Whether the router may send traffic to a model in this status
    pub fn is_routable(self) -> bool {
        matches!(self, ModelStatus::Ready | ModelStatus::Degraded)
    }

    /// Transitions only move forward, except Ready and Degraded which may toggle
    pub fn can_transition_to(self, next: ModelStatus) -> bool {
        use ModelStatus::*;
        if self == next {
            return true;
        }
        match self {
            Loading => matches!(next, Ready | Failed | Retired),
            Ready => matches!(next, Degraded | Failed | Retired),
            Degraded => matches!(next, Ready | Failed | Retired),
            Failed => next == Retired,
            Retired => false,
        }
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelStatus::Loading => "LOADING",
            ModelStatus::Ready => "READY",
            ModelStatus::Degraded => "DEGRADED",
            ModelStatus::Failed => "FAILED",
            ModelStatus::Retired => "RETIRED",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a served model's counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub model_id: String,
    pub version: String,
    pub status: ModelStatus,
    pub request_count: u64,
    pub error_count: u64,
    /// errors / requests, 0 before the first request
    pub error_rate: f64,
    /// Cumulative successful latency / requests
    pub avg_latency_ms: f64,
    pub uptime_secs: f64,
    pub deployed_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct ModelState {
    status: ModelStatus,
    request_count: u64,
    error_count: u64,
    total_latency: Duration,
    last_error: Option<String>,
    /// Deadline helpers whose predictor call has not returned yet
    helpers_in_flight: usize,
}

/// Releases a helper slot when the helper thread finishes, panics included
struct HelperSlot(Arc<Mutex<ModelState>>);

impl Drop for HelperSlot {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.helpers_in_flight = state.helpers_in_flight.saturating_sub(1);
    }
}

/// One (model id, version, predictor) triple with its own counters.
///
/// Counters live behind a per-instance mutex. The predictor runs outside
/// that lock so a slow call never blocks metric reads.
pub struct ServedModel {
    model_id: String,
    version: String,
    predictor: PredictorRef,
    deployed_at: DateTime<Utc>,
    started: Instant,
    helper_limit: usize,
    state: Arc<Mutex<ModelState>>,
}

impl ServedModel {
    /// Wrap a predictor; the model starts in `Loading`
    pub fn new(model_id: impl Into<String>, version: impl Into<String>, predictor: PredictorRef) -> Self {
        Self {
            model_id: model_id.into(),
            version: version.into(),
            predictor,
            deployed_at: Utc::now(),
            started: Instant::now(),
            helper_limit: DEFAULT_HELPER_LIMIT,
            state: Arc::new(Mutex::new(ModelState {
                status: ModelStatus::Loading,
                request_count: 0,
                error_count: 0,
                total_latency: Duration::ZERO,
                last_error: None,
                helpers_in_flight: 0,
            })),
        }
    }

    /// Builder method to cap the deadline helpers running at once (minimum 1)
    pub fn with_helper_limit(mut self, limit: usize) -> Self {
        self.helper_limit = limit.max(1);
        self
    }

    pub fn helper_limit(&self) -> usize {
        self.helper_limit
    }

    /// Deadline helpers still running, including ones abandoned after a timeout
    pub fn helpers_in_flight(&self) -> usize {
        self.state.lock().helpers_in_flight
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn predictor_name(&self) -> &str {
        self.predictor.name()
    }

    pub fn status(&self) -> ModelStatus {
        self.state.lock().status
    }

    pub fn is_routable(&self) -> bool {
        self.status().is_routable()
    }

    /// Run the predictor, blocking for as long as it takes
    pub fn predict(&self, inputs: &Array2<f64>) -> Result<Array1<f64>> {
        self.state.lock().request_count += 1;

        let start = Instant::now();
        match self.predictor.predict(inputs) {
            Ok(output) => {
                self.record_success(start.elapsed());
                Ok(output)
            }
            Err(e) => Err(self.record_failure(e)),
        }
    }

    /// Run the predictor with an optional deadline.
    ///
    /// With a deadline the predictor runs on a helper thread and the caller
    /// stops waiting once it passes. The predictor itself cannot be cancelled
    /// and keeps running to completion in the background. At most
    /// `helper_limit` helpers run at once; further calls fail immediately
    /// until one of them returns.
    pub fn predict_with_timeout(&self, inputs: &Array2<f64>, timeout: Option<Duration>) -> Result<Array1<f64>> {
        let Some(timeout) = timeout else {
            return self.predict(inputs);
        };

        let admitted = {
            let mut state = self.state.lock();
            state.request_count += 1;
            if state.helpers_in_flight >= self.helper_limit {
                false
            } else {
                state.helpers_in_flight += 1;
                true
            }
        };
        if !admitted {
            return Err(self.record_failure(ServingError::PredictionFailed(format!(
                "{} predictions still running past their deadline",
                self.helper_limit
            ))));
        }
        let slot = HelperSlot(Arc::clone(&self.state));

        let (tx, rx) = mpsc::channel();
        let predictor = Arc::clone(&self.predictor);
        let owned_inputs = inputs.clone();
        let start = Instant::now();

        let spawned = thread::Builder::new()
            .name(format!("predict-{}-{}", self.model_id, self.version))
            .spawn(move || {
                let result = predictor.predict(&owned_inputs);
                drop(slot);
                // Receiver may be gone after a timeout
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return Err(self.record_failure(ServingError::PredictionFailed(format!(
                "failed to spawn predictor thread: {}",
                e
            ))));
        }

        match rx.recv_timeout(timeout) {
            Ok(Ok(output)) => {
                self.record_success(start.elapsed());
                Ok(output)
            }
            Ok(Err(e)) => Err(self.record_failure(e)),
            Err(RecvTimeoutError::Timeout) => Err(self.record_failure(ServingError::Timeout {
                model_id: self.model_id.clone(),
                version: self.version.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })),
            Err(RecvTimeoutError::Disconnected) => Err(self.record_failure(
                ServingError::PredictionFailed("predictor thread terminated without a result".to_string()),
            )),
        }
    }

    /// Move to `next` if the lifecycle allows it
    pub fn set_status(&self, next: ModelStatus) -> bool {
        let mut state = self.state.lock();
        let current = state.status;
        if !current.can_transition_to(next) {
            warn!(
                model_id = %self.model_id,
                version = %self.version,
                from = %current,
                to = %next,
                "Rejected model status transition"
            );
            return false;
        }
        state.status = next;
        drop(state);

        if current != next {
            info!(
                model_id = %self.model_id,
                version = %self.version,
                from = %current,
                to = %next,
                "Model status changed"
            );
        }
        true
    }

    /// Toggle between Ready and Degraded from an external health signal.
    ///
    /// Has no effect on models that are loading, failed or retired.
    pub fn report_health(&self, healthy: bool) -> bool {
        match (self.status(), healthy) {
            (ModelStatus::Ready, false) => self.set_status(ModelStatus::Degraded),
            (ModelStatus::Degraded, true) => self.set_status(ModelStatus::Ready),
            (ModelStatus::Ready, true) | (ModelStatus::Degraded, false) => true,
            _ => false,
        }
    }

    pub fn retire(&self) -> bool {
        self.set_status(ModelStatus::Retired)
    }

    pub fn mark_failed(&self, reason: &str) -> bool {
        let changed = self.set_status(ModelStatus::Failed);
        if changed {
            self.state.lock().last_error = Some(reason.to_string());
        }
        changed
    }

    pub fn get_metrics(&self) -> ModelMetrics {
        let state = self.state.lock();
        let requests = state.request_count;
        let (error_rate, avg_latency_ms) = if requests > 0 {
            (
                state.error_count as f64 / requests as f64,
                state.total_latency.as_secs_f64() * 1000.0 / requests as f64,
            )
        } else {
            (0.0, 0.0)
        };

        ModelMetrics {
            model_id: self.model_id.clone(),
            version: self.version.clone(),
            status: state.status,
            request_count: requests,
            error_count: state.error_count,
            error_rate,
            avg_latency_ms,
            uptime_secs: self.started.elapsed().as_secs_f64(),
            deployed_at: self.deployed_at,
            last_error: state.last_error.clone(),
        }
    }

    fn record_success(&self, elapsed: Duration) {
        self.state.lock().total_latency += elapsed;
        debug!(
            model_id = %self.model_id,
            version = %self.version,
            latency_ms = elapsed.as_secs_f64() * 1000.0,
            "Prediction served"
        );
    }

    fn record_failure(&self, err: ServingError) -> ServingError {
        {
            let mut state = self.state.lock();
            state.error_count += 1;
            state.last_error = Some(err.to_string());
        }
        warn!(
            model_id = %self.model_id,
            version = %self.version,
            error = %err,
            "Prediction failed"
        );
        err
    }
}

impl std::fmt::Debug for ServedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServedModel")
            .field("model_id", &self.model_id)
            .field("version", &self.version)
            .field("predictor", &self.predictor.name())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serving::predictor::{FnPredictor, LinearPredictor};
    use ndarray::array;

    fn linear() -> PredictorRef {
        Arc::new(LinearPredictor::new(array![1.0, 1.0], 0.0))
    }

    fn failing() -> PredictorRef {
        Arc::new(FnPredictor::new("broken", |_: &Array2<f64>| {
            Err(ServingError::PredictionFailed("model exploded".to_string()))
        }))
    }

    fn sleeping(ms: u64) -> PredictorRef {
        Arc::new(FnPredictor::new("slow", move |x: &Array2<f64>| {
            thread::sleep(Duration::from_millis(ms));
            Ok(Array1::zeros(x.nrows()))
        }))
    }

    #[test]
    fn test_predict_counts_requests() {
        let model = ServedModel::new("m", "v1", linear());
        model.set_status(ModelStatus::Ready);

        let out = model.predict(&array![[1.0, 2.0]]).unwrap();
        assert_eq!(out, array![3.0]);

        let metrics = model.get_metrics();
        assert_eq!(metrics.request_count, 1);
        assert_eq!(metrics.error_count, 0);
        assert_eq!(metrics.error_rate, 0.0);
        assert_eq!(metrics.status, ModelStatus::Ready);
    }

    #[test]
    fn test_predict_failure_propagates() {
        let model = ServedModel::new("m", "v1", failing());
        let err = model.predict(&array![[1.0]]).unwrap_err();
        assert_eq!(err, ServingError::PredictionFailed("model exploded".to_string()));

        let metrics = model.get_metrics();
        assert_eq!(metrics.request_count, 1);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.error_rate, 1.0);
        assert!(metrics.last_error.is_some());
    }

    #[test]
    fn test_predict_with_timeout_expires() {
        let model = ServedModel::new("m", "v1", sleeping(300));
        let err = model
            .predict_with_timeout(&array![[1.0]], Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, ServingError::Timeout { timeout_ms: 20, .. }));
        assert_eq!(model.get_metrics().error_count, 1);
    }

    #[test]
    fn test_helper_threads_are_capped() {
        let model = ServedModel::new("m", "v1", sleeping(300)).with_helper_limit(2);

        for _ in 0..2 {
            let err = model
                .predict_with_timeout(&array![[1.0]], Some(Duration::from_millis(5)))
                .unwrap_err();
            assert!(matches!(err, ServingError::Timeout { .. }));
        }
        assert_eq!(model.helpers_in_flight(), 2);

        for _ in 0..20 {
            let err = model
                .predict_with_timeout(&array![[1.0]], Some(Duration::from_millis(5)))
                .unwrap_err();
            assert!(matches!(err, ServingError::PredictionFailed(_)));
        }
        assert_eq!(model.helpers_in_flight(), 2);

        let metrics = model.get_metrics();
        assert_eq!(metrics.request_count, 22);
        assert_eq!(metrics.error_count, 22);

        // Slots free up once the abandoned calls return
        thread::sleep(Duration::from_millis(600));
        assert_eq!(model.helpers_in_flight(), 0);
        model
            .predict_with_timeout(&array![[1.0]], Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(model.helpers_in_flight(), 0);
    }

    #[test]
    fn test_predict_with_timeout_completes() {
        let model = ServedModel::new("m", "v1", sleeping(5));
        let out = model
            .predict_with_timeout(&array![[1.0], [2.0]], Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(out.len(), 2);

        let metrics = model.get_metrics();
        assert_eq!(metrics.error_count, 0);
        assert!(metrics.avg_latency_ms >= 5.0);
    }

    #[test]
    fn test_metrics_readable_during_slow_predict() {
        let model = Arc::new(ServedModel::new("m", "v1", sleeping(200)));
        let worker = {
            let model = Arc::clone(&model);
            thread::spawn(move || model.predict(&array![[1.0]]))
        };

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        let metrics = model.get_metrics();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(metrics.request_count, 1);

        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_status_lifecycle() {
        let model = ServedModel::new("m", "v1", linear());
        assert_eq!(model.status(), ModelStatus::Loading);
        assert!(!model.is_routable());

        assert!(model.set_status(ModelStatus::Ready));
        assert!(model.report_health(false));
        assert_eq!(model.status(), ModelStatus::Degraded);
        assert!(model.is_routable());
        assert!(model.report_health(true));
        assert_eq!(model.status(), ModelStatus::Ready);

        assert!(model.retire());
        assert!(!model.set_status(ModelStatus::Ready));
        assert!(!model.report_health(true));
        assert_eq!(model.status(), ModelStatus::Retired);
    }

    #[test]
    fn test_failed_only_retires() {
        let model = ServedModel::new("m", "v1", linear());
        assert!(model.mark_failed("weights corrupted"));
        assert!(!model.set_status(ModelStatus::Ready));
        assert!(model.retire());
        assert_eq!(model.get_metrics().last_error.as_deref(), Some("weights corrupted"));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ModelStatus::Degraded).unwrap();
        assert_eq!(json, "\"DEGRADED\"");
    }
}

//! Model Serving Module
//!
//! Hosts several concurrently deployed versions of each model and routes
//! prediction requests between them, either to the active version or by a
//! weighted A/B split of the unit interval.

mod model;
mod predictor;
mod registry;
mod router;

pub use model::{ModelMetrics, ModelStatus, ServedModel, DEFAULT_HELPER_LIMIT};
pub use predictor::{FnPredictor, LinearPredictor, Predictor, PredictorRef};
pub use registry::{InMemoryModelRegistry, ModelLoader, ModelRegistry};
pub use router::{RoutedPrediction, ServingRouter};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a configuration call on the router.
///
/// Rejections are data, not errors: a bad deployment request is a
/// recoverable configuration event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigOutcome {
    /// The change was applied
    Accepted,
    /// The change was applied and replaced an existing entry
    ReplacedExisting,
    /// Nothing changed
    Rejected(String),
}

impl ConfigOutcome {
    /// Whether the change took effect
    pub fn is_applied(&self) -> bool {
        !self.is_rejected()
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ConfigOutcome::Rejected(_))
    }
}

/// Configuration for the [`ServingRouter`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Allowed distance of A/B weight sums from 1.0
    pub ab_weight_tolerance: f64,
    /// Deadline applied to predictions that do not pass their own
    pub default_timeout_ms: Option<u64>,
    /// Route only Ready and Degraded versions; when false every deployment routes
    pub exclude_retired: bool,
    /// Deadline helper threads each version may have running at once
    pub max_helper_threads: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ab_weight_tolerance: 0.01,
            default_timeout_ms: None,
            exclude_retired: true,
            max_helper_threads: DEFAULT_HELPER_LIMIT,
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the A/B weight tolerance
    pub fn with_weight_tolerance(mut self, tolerance: f64) -> Self {
        self.ab_weight_tolerance = tolerance.abs();
        self
    }

    /// Builder method to set a default prediction deadline
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Builder method to keep retired versions routable
    pub fn with_retired_routable(mut self) -> Self {
        self.exclude_retired = false;
        self
    }

    /// Builder method to cap in-flight deadline helpers per version
    pub fn with_helper_limit(mut self, limit: usize) -> Self {
        self.max_helper_threads = limit.max(1);
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

//! Kolosal Serving - Multi-version model serving and monitoring
//!
//! This crate provides the online half of a model lifecycle:
//! - Multiple concurrently deployed versions per model
//! - Weighted A/B traffic splitting between versions
//! - Bounded LRU caching with optional TTL
//! - Feature and prediction drift detection (KS, PSI, KL)
//! - Windowed performance metrics and alerting
//!
//! # Modules
//!
//! - [`serving`] - Served models, routing, registry loading
//! - [`cache`] - Bounded LRU + TTL cache
//! - [`drift`] - Drift statistics and verdicts
//! - [`monitoring`] - Drift monitor, performance metrics, alerts

// Core error handling
pub mod error;

// Infrastructure
pub mod cache;

// Serving
pub mod serving;

// Monitoring
pub mod drift;
pub mod monitoring;

pub use error::{Result, ServingError};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{Result, ServingError};

    // Serving
    pub use crate::serving::{
        ConfigOutcome, FnPredictor, InMemoryModelRegistry, LinearPredictor, ModelLoader, ModelMetrics,
        ModelRegistry, ModelStatus, Predictor, PredictorRef, RoutedPrediction, RouterConfig, ServedModel,
        ServingRouter,
    };

    // Caching
    pub use crate::cache::{BoundedCache, CacheConfig, CacheStats};

    // Drift detection
    pub use crate::drift::{DriftEvaluator, DriftMethod, DriftResult};

    // Monitoring
    pub use crate::monitoring::{
        Alert, AlertQuery, AlertSeverity, AlertSink, AlertType, DriftMonitor, MonitorConfig,
        MonitoringSummary, PerformanceMetrics, PredictionEvent, PredictionRecord,
    };
}

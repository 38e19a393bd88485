//! Predictor capability and framework adapters

use ndarray::{Array1, Array2};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, ServingError};

/// Anything that can turn a feature matrix into one prediction per row.
///
/// Implementations must be shareable across threads; the router invokes the
/// same predictor concurrently from every caller thread.
pub trait Predictor: Send + Sync {
    /// Predict one value per input row
    fn predict(&self, inputs: &Array2<f64>) -> Result<Array1<f64>>;

    /// Short name of the underlying framework or model family
    fn name(&self) -> &str {
        "predictor"
    }
}

/// Shared handle to a predictor
pub type PredictorRef = Arc<dyn Predictor>;

impl<P: Predictor + ?Sized> Predictor for Arc<P> {
    fn predict(&self, inputs: &Array2<f64>) -> Result<Array1<f64>> {
        (**self).predict(inputs)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Adapter for a plain closure
pub struct FnPredictor<F> {
    name: String,
    func: F,
}

impl<F> FnPredictor<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Predictor for FnPredictor<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Send + Sync,
{
    fn predict(&self, inputs: &Array2<f64>) -> Result<Array1<f64>> {
        (self.func)(inputs)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for FnPredictor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPredictor").field("name", &self.name).finish()
    }
}

/// Adapter for exported linear models (`y = X·w + b`)
#[derive(Debug, Clone)]
pub struct LinearPredictor {
    weights: Array1<f64>,
    bias: f64,
}

impl LinearPredictor {
    pub fn new(weights: Array1<f64>, bias: f64) -> Self {
        Self { weights, bias }
    }

    pub fn n_features(&self) -> usize {
        self.weights.len()
    }
}

impl Predictor for LinearPredictor {
    fn predict(&self, inputs: &Array2<f64>) -> Result<Array1<f64>> {
        if inputs.ncols() != self.weights.len() {
            return Err(ServingError::InvalidInput(format!(
                "Expected {} features, got {}",
                self.weights.len(),
                inputs.ncols()
            )));
        }
        Ok(inputs.dot(&self.weights) + self.bias)
    }

    fn name(&self) -> &str {
        "linear"
    }
}

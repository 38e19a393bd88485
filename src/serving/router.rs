//! Version routing: active pointers, A/B tables and prediction dispatch

use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::model::{ModelMetrics, ModelStatus, ServedModel};
use super::predictor::PredictorRef;
use super::registry::ModelLoader;
use super::{ConfigOutcome, RouterConfig};
use crate::error::{Result, ServingError};

/// A prediction together with the version that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedPrediction {
    pub model_id: String,
    pub version: String,
    pub outputs: Array1<f64>,
    pub latency_ms: f64,
}

#[derive(Default)]
struct RouterState {
    /// Deployed versions per model, in deployment order
    models: HashMap<String, Vec<Arc<ServedModel>>>,
    /// Active version per model
    active: HashMap<String, String>,
    /// A/B weights per model, in insertion order
    ab_tests: HashMap<String, Vec<(String, f64)>>,
}

impl RouterState {
    fn find(&self, model_id: &str, version: &str) -> Option<&Arc<ServedModel>> {
        self.models
            .get(model_id)?
            .iter()
            .find(|m| m.version() == version)
    }
}

/// Owns every deployed model version and decides which one answers a request.
///
/// All indices sit behind one mutex, so check-then-insert during deployment
/// is atomic. The lock is released before any predictor runs.
pub struct ServingRouter {
    config: RouterConfig,
    state: Mutex<RouterState>,
}

impl ServingRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RouterState::default()),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Deploy a predictor as `model_id@version`.
    ///
    /// Redeploying an existing version replaces it in place. The first
    /// deployment of a model always becomes active.
    pub fn deploy(
        &self,
        model_id: &str,
        version: &str,
        predictor: PredictorRef,
        set_active: bool,
    ) -> ConfigOutcome {
        if model_id.trim().is_empty() || version.trim().is_empty() {
            warn!(model_id, version, "Rejected deployment with empty identifier");
            return ConfigOutcome::Rejected("model id and version must be non-empty".to_string());
        }

        let served = Arc::new(
            ServedModel::new(model_id, version, predictor).with_helper_limit(self.config.max_helper_threads),
        );
        served.set_status(ModelStatus::Ready);

        let mut state = self.state.lock();
        let deployed = state.models.entry(model_id.to_string()).or_default();
        let outcome = match deployed.iter().position(|m| m.version() == version) {
            Some(pos) => {
                deployed[pos] = served;
                ConfigOutcome::ReplacedExisting
            }
            None => {
                deployed.push(served);
                ConfigOutcome::Accepted
            }
        };

        let make_active = set_active || !state.active.contains_key(model_id);
        if make_active {
            state.active.insert(model_id.to_string(), version.to_string());
        }
        drop(state);

        match outcome {
            ConfigOutcome::ReplacedExisting => warn!(
                model_id,
                version,
                active = make_active,
                "Replaced existing deployment"
            ),
            _ => info!(model_id, version, active = make_active, "Deployed model"),
        }
        outcome
    }

    /// Fetch a predictor through `loader` and deploy it
    pub fn deploy_from_registry(
        &self,
        loader: &ModelLoader,
        model_id: &str,
        version: &str,
        set_active: bool,
    ) -> Result<ConfigOutcome> {
        let predictor = loader.load(model_id, version)?;
        Ok(self.deploy(model_id, version, predictor, set_active))
    }

    /// Deploy every registered version of a model; the last listed version becomes active
    pub fn deploy_all_from_registry(
        &self,
        loader: &ModelLoader,
        model_id: &str,
    ) -> Result<Vec<(String, ConfigOutcome)>> {
        let versions = loader.registry().list_versions(model_id)?;
        if versions.is_empty() {
            return Err(ServingError::ModelNotFound(model_id.to_string()));
        }

        let last = versions.len() - 1;
        versions
            .into_iter()
            .enumerate()
            .map(|(i, version)| -> Result<(String, ConfigOutcome)> {
                let outcome = self.deploy_from_registry(loader, model_id, &version, i == last)?;
                Ok((version, outcome))
            })
            .collect()
    }

    /// Point the active pointer at an already deployed version
    pub fn set_active_version(&self, model_id: &str, version: &str) -> ConfigOutcome {
        let model = {
            let state = self.state.lock();
            if !state.models.contains_key(model_id) {
                drop(state);
                warn!(model_id, version, "Cannot activate version of unknown model");
                return ConfigOutcome::Rejected(format!("unknown model '{}'", model_id));
            }
            state.find(model_id, version).cloned()
        };
        let Some(model) = model else {
            warn!(model_id, version, "Cannot activate unknown version");
            return ConfigOutcome::Rejected(format!("unknown version '{}@{}'", model_id, version));
        };

        let status = model.status();
        if !self.routable(status) {
            warn!(model_id, version, %status, "Cannot activate a version that is not routable");
            return ConfigOutcome::Rejected(format!("version '{}@{}' is {}", model_id, version, status));
        }

        let previous = {
            let mut state = self.state.lock();
            // Redeployed in between: the checked instance is gone
            if !state.find(model_id, version).is_some_and(|m| Arc::ptr_eq(m, &model)) {
                drop(state);
                warn!(model_id, version, "Version was replaced during activation");
                return ConfigOutcome::Rejected(format!("version '{}@{}' was replaced", model_id, version));
            }
            state.active.insert(model_id.to_string(), version.to_string())
        };

        info!(model_id, version, previous = ?previous, "Active version changed");
        ConfigOutcome::Accepted
    }

    /// Install a weighted A/B table.
    ///
    /// Every version must be deployed, weights must be finite and
    /// non-negative, and they must sum to 1.0 within the configured
    /// tolerance. A rejected table leaves the previous one in place.
    pub fn setup_ab_test<S>(&self, model_id: &str, weights: impl IntoIterator<Item = (S, f64)>) -> ConfigOutcome
    where
        S: Into<String>,
    {
        let table: Vec<(String, f64)> = weights.into_iter().map(|(v, w)| (v.into(), w)).collect();

        let mut state = self.state.lock();
        let validation = self.validate_ab_table(&state, model_id, &table);
        if let Err(reason) = validation {
            drop(state);
            warn!(model_id, reason = %reason, "Rejected A/B configuration");
            return ConfigOutcome::Rejected(reason);
        }

        let previous = state.ab_tests.insert(model_id.to_string(), table.clone());
        drop(state);

        info!(model_id, table = ?table, "A/B test configured");
        if previous.is_some() {
            ConfigOutcome::ReplacedExisting
        } else {
            ConfigOutcome::Accepted
        }
    }

    /// Remove the A/B table for a model. Returns whether one existed.
    pub fn clear_ab_test(&self, model_id: &str) -> bool {
        let removed = self.state.lock().ab_tests.remove(model_id).is_some();
        if removed {
            info!(model_id, "A/B test cleared");
        }
        removed
    }

    /// Resolve the served model that should answer a request.
    ///
    /// With an A/B table and a split in [0, 1], the table is walked in
    /// insertion order and the first version whose cumulative weight reaches
    /// the split wins. Otherwise the active version answers, then the first
    /// routable deployment.
    pub fn resolve(&self, model_id: &str, traffic_split: Option<f64>) -> Result<Arc<ServedModel>> {
        // Statuses are read after the router lock is released
        let (deployed, ab_version, active, ignored_split) = {
            let state = self.state.lock();
            let deployed = state
                .models
                .get(model_id)
                .filter(|d| !d.is_empty())
                .cloned()
                .ok_or_else(|| ServingError::ModelNotFound(model_id.to_string()))?;

            let (ab_version, ignored_split) = match (state.ab_tests.get(model_id), traffic_split) {
                (Some(table), Some(split)) if (0.0..=1.0).contains(&split) => {
                    (bin_version(table, split).map(str::to_string), None)
                }
                (Some(_), Some(split)) => (None, Some(split)),
                _ => (None, None),
            };
            (deployed, ab_version, state.active.get(model_id).cloned(), ignored_split)
        };

        if let Some(split) = ignored_split {
            warn!(model_id, split, "Traffic split outside [0, 1], ignoring A/B table");
        }

        let routable = |version: &str| {
            deployed
                .iter()
                .find(|m| m.version() == version && self.can_route(m))
        };

        if let Some(version) = ab_version.as_deref() {
            if let Some(model) = routable(version) {
                return Ok(Arc::clone(model));
            }
            debug!(model_id, version, "A/B bin points at an unroutable version");
        }

        if let Some(active) = active.as_deref() {
            if let Some(model) = routable(active) {
                return Ok(Arc::clone(model));
            }
            debug!(model_id, active, "Active version is unroutable, falling back");
        }

        deployed
            .iter()
            .find(|m| self.can_route(m))
            .cloned()
            .ok_or_else(|| ServingError::NoModelAvailable(model_id.to_string()))
    }

    /// Resolve only the version string
    pub fn resolve_version(&self, model_id: &str, traffic_split: Option<f64>) -> Result<String> {
        self.resolve(model_id, traffic_split).map(|m| m.version().to_string())
    }

    /// Route and run a prediction.
    ///
    /// `timeout` overrides the configured default deadline.
    pub fn predict(
        &self,
        model_id: &str,
        inputs: &Array2<f64>,
        traffic_split: Option<f64>,
        timeout: Option<Duration>,
    ) -> Result<RoutedPrediction> {
        let model = self.resolve(model_id, traffic_split)?;
        let timeout = timeout.or_else(|| self.config.default_timeout());

        let start = Instant::now();
        let outputs = model.predict_with_timeout(inputs, timeout)?;

        Ok(RoutedPrediction {
            model_id: model_id.to_string(),
            version: model.version().to_string(),
            outputs,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Mark a version retired. Retired versions are never deleted.
    pub fn retire(&self, model_id: &str, version: &str) -> ConfigOutcome {
        let (model, is_active) = {
            let state = self.state.lock();
            let Some(model) = state.find(model_id, version).cloned() else {
                drop(state);
                warn!(model_id, version, "Cannot retire unknown version");
                return ConfigOutcome::Rejected(format!("unknown version '{}@{}'", model_id, version));
            };
            let is_active = state.active.get(model_id).map(String::as_str) == Some(version);
            (model, is_active)
        };

        if model.status() == ModelStatus::Retired {
            return ConfigOutcome::Accepted;
        }
        if !model.retire() {
            return ConfigOutcome::Rejected(format!("version '{}@{}' cannot be retired", model_id, version));
        }
        if is_active {
            warn!(model_id, version, "Retired the active version");
        }
        ConfigOutcome::Accepted
    }

    /// Forward an external health signal to a version
    pub fn report_health(&self, model_id: &str, version: &str, healthy: bool) -> ConfigOutcome {
        match self.get_model(model_id, version) {
            Some(model) if model.report_health(healthy) => ConfigOutcome::Accepted,
            Some(model) => ConfigOutcome::Rejected(format!(
                "version '{}@{}' is {}",
                model_id,
                version,
                model.status()
            )),
            None => ConfigOutcome::Rejected(format!("unknown version '{}@{}'", model_id, version)),
        }
    }

    pub fn get_model(&self, model_id: &str, version: &str) -> Option<Arc<ServedModel>> {
        self.state.lock().find(model_id, version).cloned()
    }

    /// Model ids with at least one deployment, sorted
    pub fn list_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().models.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Versions of a model in deployment order
    pub fn list_versions(&self, model_id: &str) -> Vec<String> {
        self.state
            .lock()
            .models
            .get(model_id)
            .map(|d| d.iter().map(|m| m.version().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn active_version(&self, model_id: &str) -> Option<String> {
        self.state.lock().active.get(model_id).cloned()
    }

    pub fn ab_test(&self, model_id: &str) -> Option<Vec<(String, f64)>> {
        self.state.lock().ab_tests.get(model_id).cloned()
    }

    /// Metric snapshots for every version of a model
    pub fn model_metrics(&self, model_id: &str) -> Vec<ModelMetrics> {
        let deployed: Vec<Arc<ServedModel>> = self
            .state
            .lock()
            .models
            .get(model_id)
            .cloned()
            .unwrap_or_default();
        deployed.iter().map(|m| m.get_metrics()).collect()
    }

    fn can_route(&self, model: &ServedModel) -> bool {
        self.routable(model.status())
    }

    /// Single routing predicate shared by resolution and activation
    fn routable(&self, status: ModelStatus) -> bool {
        !self.config.exclude_retired || status.is_routable()
    }

    fn validate_ab_table(
        &self,
        state: &RouterState,
        model_id: &str,
        table: &[(String, f64)],
    ) -> std::result::Result<(), String> {
        if table.is_empty() {
            return Err("A/B table is empty".to_string());
        }
        if !state.models.contains_key(model_id) {
            return Err(format!("unknown model '{}'", model_id));
        }

        for (i, (version, weight)) in table.iter().enumerate() {
            if state.find(model_id, version).is_none() {
                return Err(format!("version '{}' is not deployed", version));
            }
            if !weight.is_finite() || *weight < 0.0 {
                return Err(format!("invalid weight {} for version '{}'", weight, version));
            }
            if table[..i].iter().any(|(v, _)| v == version) {
                return Err(format!("version '{}' listed twice", version));
            }
        }

        let total: f64 = table.iter().map(|(_, w)| w).sum();
        if (total - 1.0).abs() > self.config.ab_weight_tolerance {
            return Err(format!("weights sum to {:.4}, expected 1.0", total));
        }
        Ok(())
    }
}

impl Default for ServingRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

/// First version whose cumulative weight reaches `split`.
///
/// Falls back to the last entry when rounding leaves the total just under
/// the split.
fn bin_version(table: &[(String, f64)], split: f64) -> Option<&str> {
    let mut cumulative = 0.0;
    for (version, weight) in table {
        cumulative += weight;
        if cumulative >= split {
            return Some(version);
        }
    }
    table.last().map(|(v, _)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serving::predictor::LinearPredictor;
    use ndarray::array;

    fn constant(value: f64) -> PredictorRef {
        Arc::new(LinearPredictor::new(array![0.0], value))
    }

    fn router_with_versions(versions: &[&str]) -> ServingRouter {
        let router = ServingRouter::default();
        for (i, v) in versions.iter().enumerate() {
            router.deploy("m", v, constant(i as f64), false);
        }
        router
    }

    #[test]
    fn test_bin_version_walks_in_order() {
        let table = vec![("a".to_string(), 0.7), ("b".to_string(), 0.3)];
        assert_eq!(bin_version(&table, 0.0), Some("a"));
        assert_eq!(bin_version(&table, 0.7), Some("a"));
        assert_eq!(bin_version(&table, 0.71), Some("b"));
        assert_eq!(bin_version(&table, 1.0), Some("b"));
        assert_eq!(bin_version(&[], 0.5), None);
    }

    #[test]
    fn test_bin_version_rounding_fallback() {
        let table = vec![("a".to_string(), 0.1), ("b".to_string(), 0.2), ("c".to_string(), 0.69)];
        assert_eq!(bin_version(&table, 1.0), Some("c"));
    }

    #[test]
    fn test_first_deploy_becomes_active() {
        let router = router_with_versions(&["v1", "v2"]);
        assert_eq!(router.active_version("m").as_deref(), Some("v1"));
        assert_eq!(router.list_versions("m"), vec!["v1", "v2"]);
    }

    #[test]
    fn test_deploy_replace_keeps_position() {
        let router = router_with_versions(&["v1", "v2"]);
        let outcome = router.deploy("m", "v1", constant(9.0), false);
        assert_eq!(outcome, ConfigOutcome::ReplacedExisting);
        assert_eq!(router.list_versions("m"), vec!["v1", "v2"]);

        let out = router.predict("m", &array![[1.0]], None, None).unwrap();
        assert_eq!(out.outputs, array![9.0]);
    }

    #[test]
    fn test_deploy_rejects_empty_ids() {
        let router = ServingRouter::default();
        assert!(router.deploy("", "v1", constant(0.0), true).is_rejected());
        assert!(router.deploy("m", " ", constant(0.0), true).is_rejected());
        assert!(router.list_models().is_empty());
    }

    #[test]
    fn test_set_active_version() {
        let router = router_with_versions(&["v1", "v2"]);
        assert_eq!(router.set_active_version("m", "v2"), ConfigOutcome::Accepted);
        assert_eq!(router.resolve_version("m", None).unwrap(), "v2");

        assert!(router.set_active_version("m", "v9").is_rejected());
        assert!(router.set_active_version("other", "v1").is_rejected());
        assert_eq!(router.active_version("m").as_deref(), Some("v2"));
    }

    #[test]
    fn test_ab_resolution() {
        let router = router_with_versions(&["v1.0", "v1.1"]);
        let outcome = router.setup_ab_test("m", [("v1.0", 0.7), ("v1.1", 0.3)]);
        assert_eq!(outcome, ConfigOutcome::Accepted);

        assert_eq!(router.resolve_version("m", Some(0.5)).unwrap(), "v1.0");
        assert_eq!(router.resolve_version("m", Some(0.95)).unwrap(), "v1.1");
        // No split means the active pointer answers
        assert_eq!(router.resolve_version("m", None).unwrap(), "v1.0");
    }

    #[test]
    fn test_ab_rejects_bad_sum_and_keeps_previous() {
        let router = router_with_versions(&["v1", "v2"]);
        router.setup_ab_test("m", [("v1", 0.5), ("v2", 0.5)]);

        let outcome = router.setup_ab_test("m", [("v1", 0.6), ("v2", 0.3)]);
        assert!(outcome.is_rejected());
        assert_eq!(
            router.ab_test("m"),
            Some(vec![("v1".to_string(), 0.5), ("v2".to_string(), 0.5)])
        );
    }

    #[test]
    fn test_ab_rejects_unknown_version_and_negative_weight() {
        let router = router_with_versions(&["v1", "v2"]);
        assert!(router.setup_ab_test("m", [("v1", 0.5), ("v3", 0.5)]).is_rejected());
        assert!(router.setup_ab_test("m", [("v1", 1.5), ("v2", -0.5)]).is_rejected());
        assert!(router.setup_ab_test("m", [("v1", 0.5), ("v1", 0.5)]).is_rejected());
        assert!(router.setup_ab_test("m", Vec::<(String, f64)>::new()).is_rejected());
        assert!(router.setup_ab_test("nope", [("v1", 1.0)]).is_rejected());
        assert!(router.ab_test("m").is_none());
    }

    #[test]
    fn test_ab_within_tolerance() {
        let router = router_with_versions(&["v1", "v2"]);
        assert!(router.setup_ab_test("m", [("v1", 0.695), ("v2", 0.3)]).is_applied());
        assert_eq!(
            router.setup_ab_test("m", [("v1", 0.2), ("v2", 0.8)]),
            ConfigOutcome::ReplacedExisting
        );
        assert!(router.clear_ab_test("m"));
        assert!(!router.clear_ab_test("m"));
    }

    #[test]
    fn test_out_of_range_split_uses_active() {
        let router = router_with_versions(&["v1", "v2"]);
        router.setup_ab_test("m", [("v1", 0.0), ("v2", 1.0)]);
        assert_eq!(router.resolve_version("m", Some(0.5)).unwrap(), "v2");
        assert_eq!(router.resolve_version("m", Some(1.5)).unwrap(), "v1");
        assert_eq!(router.resolve_version("m", Some(-0.1)).unwrap(), "v1");
    }

    #[test]
    fn test_resolve_unknown_model() {
        let router = ServingRouter::default();
        let err = router.resolve("ghost", None).unwrap_err();
        assert_eq!(err, ServingError::ModelNotFound("ghost".to_string()));
    }

    #[test]
    fn test_retired_excluded_from_resolution() {
        let router = router_with_versions(&["v1", "v2"]);
        router.setup_ab_test("m", [("v1", 0.5), ("v2", 0.5)]);
        assert_eq!(router.retire("m", "v1"), ConfigOutcome::Accepted);

        // A/B bin for v1 and the active pointer both skip the retired version
        assert_eq!(router.resolve_version("m", Some(0.2)).unwrap(), "v2");
        assert_eq!(router.resolve_version("m", None).unwrap(), "v2");
        assert!(router.set_active_version("m", "v1").is_rejected());

        router.retire("m", "v2");
        let err = router.resolve("m", None).unwrap_err();
        assert_eq!(err, ServingError::NoModelAvailable("m".to_string()));
    }

    #[test]
    fn test_retired_routable_when_configured() {
        let router = ServingRouter::new(RouterConfig::new().with_retired_routable());
        router.deploy("m", "v1", constant(1.0), true);
        router.retire("m", "v1");
        assert_eq!(router.resolve_version("m", None).unwrap(), "v1");
    }

    #[test]
    fn test_activation_and_resolution_agree() {
        let router = router_with_versions(&["v1", "v2"]);
        router.get_model("m", "v2").unwrap().mark_failed("bad weights");

        assert!(router.set_active_version("m", "v2").is_rejected());
        assert_eq!(router.resolve_version("m", None).unwrap(), "v1");

        let permissive = ServingRouter::new(RouterConfig::new().with_retired_routable());
        permissive.deploy("m", "v1", constant(0.0), true);
        permissive.deploy("m", "v2", constant(1.0), false);
        permissive.get_model("m", "v2").unwrap().mark_failed("bad weights");

        assert_eq!(permissive.set_active_version("m", "v2"), ConfigOutcome::Accepted);
        assert_eq!(permissive.resolve_version("m", None).unwrap(), "v2");
    }

    #[test]
    fn test_resolve_while_health_changes() {
        let router = router_with_versions(&["v1", "v2"]);
        router.setup_ab_test("m", [("v1", 0.5), ("v2", 0.5)]);

        std::thread::scope(|s| {
            let router = &router;
            s.spawn(move || {
                for i in 0..500 {
                    router.report_health("m", "v1", i % 2 == 0);
                    router.set_active_version("m", if i % 2 == 0 { "v1" } else { "v2" });
                }
            });
            for _ in 0..4 {
                s.spawn(move || {
                    for i in 0..500 {
                        let split = (i % 100) as f64 / 100.0;
                        let version = router.resolve_version("m", Some(split)).unwrap();
                        assert!(version == "v1" || version == "v2");
                    }
                });
            }
        });
    }

    #[test]
    fn test_deploy_applies_helper_limit() {
        let router = ServingRouter::new(RouterConfig::new().with_helper_limit(3));
        router.deploy("m", "v1", constant(1.0), true);
        assert_eq!(router.get_model("m", "v1").unwrap().helper_limit(), 3);
    }

    #[test]
    fn test_retire_unknown_version() {
        let router = router_with_versions(&["v1"]);
        assert!(router.retire("m", "v7").is_rejected());
        assert_eq!(router.retire("m", "v1"), ConfigOutcome::Accepted);
        // Idempotent
        assert_eq!(router.retire("m", "v1"), ConfigOutcome::Accepted);
    }

    #[test]
    fn test_report_health() {
        let router = router_with_versions(&["v1"]);
        assert!(router.report_health("m", "v1", false).is_applied());
        assert_eq!(router.get_model("m", "v1").unwrap().status(), ModelStatus::Degraded);
        // Degraded models still serve
        assert_eq!(router.resolve_version("m", None).unwrap(), "v1");
        assert!(router.report_health("m", "v9", true).is_rejected());
    }

    #[test]
    fn test_model_metrics() {
        let router = router_with_versions(&["v1", "v2"]);
        router.predict("m", &array![[1.0], [2.0]], None, None).unwrap();

        let metrics = router.model_metrics("m");
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].request_count, 1);
        assert_eq!(metrics[1].request_count, 0);
        assert!(router.model_metrics("ghost").is_empty());
    }
}

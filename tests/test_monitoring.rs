//! Integration test: drift monitoring flow
//! Tests: reference → log predictions → drift per method → performance → alerts

use kolosal_serving::drift::{ks_p_value, ks_statistic};
use kolosal_serving::prelude::*;
use ndarray::Array1;
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Approximately standard normal samples (Irwin-Hall, 12 uniforms)
fn normal_sample(rng: &mut Xoshiro256PlusPlus, n: usize, mean: f64, std: f64) -> Array1<f64> {
    (0..n)
        .map(|_| {
            let z: f64 = (0..12).map(|_| rng.gen::<f64>()).sum::<f64>() - 6.0;
            mean + std * z
        })
        .collect()
}

fn monitor_with_reference(rng: &mut Xoshiro256PlusPlus) -> DriftMonitor {
    reference_monitor(rng, MonitorConfig::default())
}

fn reference_monitor(rng: &mut Xoshiro256PlusPlus, config: MonitorConfig) -> DriftMonitor {
    let monitor = DriftMonitor::new(config);
    let mut reference = HashMap::new();
    reference.insert("amount".to_string(), normal_sample(rng, 2000, 0.0, 1.0));
    reference.insert("age".to_string(), normal_sample(rng, 2000, 40.0, 10.0));
    monitor.set_reference(reference, Some(normal_sample(rng, 2000, 0.5, 0.1)));
    monitor
}

// ============================================================================
// Drift Detection Tests
// ============================================================================

#[test]
fn test_same_distribution_does_not_drift() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let monitor = reference_monitor(&mut rng, MonitorConfig::new().with_drift_threshold(0.001));

    let mut current = HashMap::new();
    current.insert("amount".to_string(), normal_sample(&mut rng, 2000, 0.0, 1.0));
    current.insert("age".to_string(), normal_sample(&mut rng, 2000, 40.0, 10.0));

    for method in [DriftMethod::KsTest, DriftMethod::Psi, DriftMethod::KlDivergence] {
        let results = monitor.detect_feature_drift(&current, method, None);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_drift), "{} flagged drift: {:?}", method, results);
    }
    assert!(monitor.get_alerts(&AlertQuery::new()).is_empty());
}

#[test]
fn test_mean_shift_drifts_under_every_method() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
    let monitor = monitor_with_reference(&mut rng);

    let mut current = HashMap::new();
    current.insert("amount".to_string(), normal_sample(&mut rng, 2000, 1.0, 1.0));

    for method in [DriftMethod::KsTest, DriftMethod::Psi, DriftMethod::KlDivergence] {
        let results = monitor.detect_feature_drift(&current, method, Some(&["amount"][..]));
        assert_eq!(results.len(), 1);
        assert!(results[0].is_drift, "{} missed a one-sigma shift", method);
    }

    let alerts = monitor.get_alerts(&AlertQuery::new().alert_type(AlertType::FeatureDrift));
    assert_eq!(alerts.len(), 3);
    assert_eq!(monitor.get_drift_history(Some("amount"), None).len(), 3);
}

#[test]
fn test_ks_statistic_of_identical_samples() {
    let sample: Vec<f64> = (0..500).map(|i| i as f64 / 500.0).collect();
    let d = ks_statistic(&sample, &sample);
    assert_eq!(d, 0.0);
    assert_eq!(ks_p_value(d, 500, 500), 1.0);

    let shifted: Vec<f64> = sample.iter().map(|x| x + 2.0).collect();
    assert_eq!(ks_statistic(&sample, &shifted), 1.0);
}

#[test]
fn test_prediction_drift_against_reference() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
    let monitor = monitor_with_reference(&mut rng);

    let stable = monitor
        .detect_prediction_drift(&normal_sample(&mut rng, 1000, 0.5, 0.1), DriftMethod::Psi)
        .unwrap();
    assert!(!stable.is_drift);

    let shifted = monitor
        .detect_prediction_drift(&normal_sample(&mut rng, 1000, 0.8, 0.1), DriftMethod::Psi)
        .unwrap();
    assert!(shifted.is_drift);
    assert_eq!(
        monitor
            .get_alerts(&AlertQuery::new().alert_type(AlertType::PredictionDrift))
            .len(),
        1
    );
}

#[test]
fn test_drift_on_logged_traffic() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
    let monitor = monitor_with_reference(&mut rng);

    for i in 0..500 {
        let features = HashMap::from([
            ("amount".to_string(), 3.0 + rng.gen::<f64>()),
            ("age".to_string(), 40.0),
        ]);
        monitor.log_prediction(PredictionEvent::new(format!("p{}", i), features, 0.5, 5.0));
    }

    let current = monitor.collect_features(1.0);
    assert_eq!(current["amount"].len(), 500);

    let results = monitor.detect_feature_drift(&current, DriftMethod::KsTest, Some(&["amount"][..]));
    assert!(results[0].is_drift);
    assert!(results[0].p_value.unwrap() < 1e-6);
}

// ============================================================================
// Performance And Alert Tests
// ============================================================================

#[test]
fn test_performance_window_and_error_alert() {
    let monitor = DriftMonitor::default();
    for i in 0..20 {
        let event = PredictionEvent::new(format!("p{}", i), HashMap::new(), 1.0, 10.0 + i as f64)
            .with_model("fraud", "v1.0")
            .with_actual(if i % 4 == 0 { 0.0 } else { 1.0 });
        monitor.log_prediction(event);
    }
    monitor.log_prediction(PredictionEvent::new("bad", HashMap::new(), 0.0, 10.0).with_error("timeout"));

    let metrics = monitor.calculate_performance(24.0);
    assert_eq!(metrics.total_predictions, 21);
    assert_eq!(metrics.error_count, 1);
    assert_eq!(metrics.labeled_count, 20);
    assert_eq!(metrics.accuracy, Some(0.75));
    assert!((metrics.error_rate - 1.0 / 21.0).abs() < 1e-12);

    // 1/21 is under the default 5% threshold: only the per-prediction warning exists
    assert!(monitor
        .get_alerts(&AlertQuery::new().severity(AlertSeverity::Critical))
        .is_empty());
    assert_eq!(
        monitor
            .get_alerts(&AlertQuery::new().alert_type(AlertType::HighErrorRate))
            .len(),
        1
    );
}

#[test]
fn test_alert_sink_and_acknowledgement() {
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    let monitor = DriftMonitor::new(MonitorConfig::new().with_latency_threshold(100.0)).with_alert_sink(
        Arc::new(move |_: &Alert| -> kolosal_serving::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    let raised = monitor.log_prediction(PredictionEvent::new("slow", HashMap::new(), 0.0, 250.0));
    assert_eq!(raised.len(), 1);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    assert!(monitor.acknowledge_alert(&raised[0].id));
    let summary = monitor.summary();
    assert_eq!(summary.total_alerts, 1);
    assert_eq!(summary.unacknowledged_alerts, 0);
}

#[test]
fn test_concurrent_logging_and_drift_checks() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
    let monitor = monitor_with_reference(&mut rng);
    let batch = HashMap::from([("amount".to_string(), normal_sample(&mut rng, 500, 0.0, 1.0))]);

    thread::scope(|s| {
        for t in 0..4 {
            let monitor = &monitor;
            s.spawn(move || {
                for i in 0..250 {
                    let features = HashMap::from([("amount".to_string(), i as f64 / 250.0)]);
                    monitor.log_prediction(PredictionEvent::new(format!("{}-{}", t, i), features, 0.5, 1.0));
                }
            });
        }
        for _ in 0..2 {
            let monitor = &monitor;
            let batch = &batch;
            s.spawn(move || {
                for _ in 0..10 {
                    monitor.detect_feature_drift(batch, DriftMethod::Psi, None);
                    monitor.calculate_performance(1.0);
                }
            });
        }
    });

    let summary = monitor.summary();
    assert_eq!(summary.total_predictions, 1000);
    assert_eq!(summary.drift_checks, 20);
    assert_eq!(monitor.get_performance_history(None).len(), 20);
    assert_eq!(monitor.get_prediction_history(None, None).len(), 1000);
}

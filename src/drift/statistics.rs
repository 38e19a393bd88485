//! Two-sample drift statistics
//!
//! Kolmogorov-Smirnov, Population Stability Index and KL divergence over a
//! reference sample and a current sample.

use ndarray::Array1;
use std::cmp::Ordering;

use super::{DriftMethod, DriftScore};
use crate::error::{Result, ServingError};

/// Smoothing added to every bin fraction before taking ratios or logs.
///
/// Part of the scoring contract: PSI and KL scores are only comparable
/// across runs when this value is fixed.
pub const PROBABILITY_EPSILON: f64 = 1e-10;

/// A statistic comparing a current sample against a reference sample
pub trait DriftStatistic: Send + Sync {
    /// Score the current sample against the reference
    fn compute(&self, reference: &Array1<f64>, current: &Array1<f64>) -> Result<DriftScore>;

    /// Method identifier recorded with results
    fn method(&self) -> DriftMethod;
}

/// Two-sample Kolmogorov-Smirnov test
#[derive(Debug, Clone, Default)]
pub struct KolmogorovSmirnovTest;

impl DriftStatistic for KolmogorovSmirnovTest {
    fn compute(&self, reference: &Array1<f64>, current: &Array1<f64>) -> Result<DriftScore> {
        let ref_sorted = sorted_finite(reference, "reference")?;
        let cur_sorted = sorted_finite(current, "current")?;

        let d = ks_statistic(&ref_sorted, &cur_sorted);
        let p_value = ks_p_value(d, ref_sorted.len(), cur_sorted.len());

        Ok(DriftScore {
            score: d,
            p_value: Some(p_value),
            n_reference: ref_sorted.len(),
            n_current: cur_sorted.len(),
            n_bins: None,
        })
    }

    fn method(&self) -> DriftMethod {
        DriftMethod::KsTest
    }
}

/// Population Stability Index over reference-percentile bins
#[derive(Debug, Clone)]
pub struct PopulationStabilityIndex {
    n_bins: usize,
}

impl PopulationStabilityIndex {
    pub fn new(n_bins: usize) -> Self {
        Self {
            n_bins: n_bins.max(2),
        }
    }
}

impl Default for PopulationStabilityIndex {
    fn default() -> Self {
        Self::new(10)
    }
}

impl DriftStatistic for PopulationStabilityIndex {
    fn compute(&self, reference: &Array1<f64>, current: &Array1<f64>) -> Result<DriftScore> {
        let binned = BinnedSamples::build(reference, current, self.n_bins)?;
        let psi = binned
            .reference
            .iter()
            .zip(binned.current.iter())
            .map(|(&r, &c)| (c - r) * (c / r).ln())
            .sum();
        Ok(binned.score(psi))
    }

    fn method(&self) -> DriftMethod {
        DriftMethod::Psi
    }
}

/// KL divergence of the current distribution from the reference, KL(current || reference)
#[derive(Debug, Clone)]
pub struct KlDivergence {
    n_bins: usize,
}

impl KlDivergence {
    pub fn new(n_bins: usize) -> Self {
        Self {
            n_bins: n_bins.max(2),
        }
    }
}

impl Default for KlDivergence {
    fn default() -> Self {
        Self::new(10)
    }
}

impl DriftStatistic for KlDivergence {
    fn compute(&self, reference: &Array1<f64>, current: &Array1<f64>) -> Result<DriftScore> {
        let binned = BinnedSamples::build(reference, current, self.n_bins)?;
        let kl = binned
            .reference
            .iter()
            .zip(binned.current.iter())
            .map(|(&r, &c)| c * (c / r).ln())
            .sum();
        Ok(binned.score(kl))
    }

    fn method(&self) -> DriftMethod {
        DriftMethod::KlDivergence
    }
}

/// Build the statistic for a method
pub fn statistic_for(method: DriftMethod, n_bins: usize) -> Box<dyn DriftStatistic> {
    match method {
        DriftMethod::KsTest => Box::new(KolmogorovSmirnovTest),
        DriftMethod::Psi => Box::new(PopulationStabilityIndex::new(n_bins)),
        DriftMethod::KlDivergence => Box::new(KlDivergence::new(n_bins)),
    }
}

/// Smoothed per-bin fractions of both samples
struct BinnedSamples {
    reference: Vec<f64>,
    current: Vec<f64>,
    n_reference: usize,
    n_current: usize,
}

impl BinnedSamples {
    fn build(reference: &Array1<f64>, current: &Array1<f64>, n_bins: usize) -> Result<Self> {
        let ref_sorted = sorted_finite(reference, "reference")?;
        let cur_sorted = sorted_finite(current, "current")?;

        let edges = percentile_edges(&ref_sorted, n_bins);
        Ok(Self {
            reference: bin_fractions(&ref_sorted, &edges),
            current: bin_fractions(&cur_sorted, &edges),
            n_reference: ref_sorted.len(),
            n_current: cur_sorted.len(),
        })
    }

    fn score(&self, value: f64) -> DriftScore {
        DriftScore {
            score: value,
            p_value: None,
            n_reference: self.n_reference,
            n_current: self.n_current,
            n_bins: Some(self.reference.len()),
        }
    }
}

/// Sort a sample, dropping NaN and infinite values
fn sorted_finite(data: &Array1<f64>, label: &str) -> Result<Vec<f64>> {
    let mut values: Vec<f64> = data.iter().copied().filter(|x| x.is_finite()).collect();
    if values.is_empty() {
        return Err(ServingError::ValidationError(format!(
            "{} sample has no finite values",
            label
        )));
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Ok(values)
}

/// Maximum distance between the two empirical CDFs. Inputs must be sorted.
pub fn ks_statistic(a: &[f64], b: &[f64]) -> f64 {
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;

    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        // Step past ties on both sides before comparing
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n1 - j as f64 / n2).abs());
    }
    d
}

/// Asymptotic p-value of a two-sample KS statistic
pub fn ks_p_value(d: f64, n1: usize, n2: usize) -> f64 {
    if n1 == 0 || n2 == 0 {
        return 1.0;
    }
    let ne = (n1 * n2) as f64 / (n1 + n2) as f64;
    let sqrt_ne = ne.sqrt();
    kolmogorov_survival((sqrt_ne + 0.12 + 0.11 / sqrt_ne) * d)
}

/// Survival function of the Kolmogorov distribution,
/// `Q(λ) = 2 Σ (-1)^(j-1) exp(-2 j² λ²)`.
pub fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }

    let a2 = -2.0 * lambda * lambda;
    let mut sign = 2.0;
    let mut sum = 0.0;
    let mut previous = 0.0;

    for j in 1..=100 {
        let j = j as f64;
        let term = sign * (a2 * j * j).exp();
        sum += term;
        if term.abs() <= 1e-3 * previous || term.abs() <= 1e-8 * sum {
            return sum.clamp(0.0, 1.0);
        }
        sign = -sign;
        previous = term.abs();
    }
    // Series did not converge, which only happens for tiny lambda
    1.0
}

/// Percentile bin edges of a sorted sample, duplicates removed.
///
/// Uses linear interpolation between order statistics.
pub fn percentile_edges(sorted: &[f64], n_bins: usize) -> Vec<f64> {
    let n = sorted.len();
    if n == 0 {
        return Vec::new();
    }

    let mut edges: Vec<f64> = (0..=n_bins)
        .map(|i| {
            let pos = (i as f64 / n_bins as f64) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        })
        .collect();
    edges.dedup();
    edges
}

/// Fraction of `values` falling in each bin, plus [`PROBABILITY_EPSILON`].
///
/// Bins are half-open `[e_i, e_i+1)` except the last, which is closed. The
/// outermost bins are open-ended so values beyond the reference range land
/// in the first or last bin.
pub fn bin_fractions(values: &[f64], edges: &[f64]) -> Vec<f64> {
    let n_bins = edges.len().saturating_sub(1).max(1);
    let interior = if edges.len() > 2 {
        &edges[1..edges.len() - 1]
    } else {
        &[][..]
    };

    let mut counts = vec![0usize; n_bins];
    for &x in values {
        let bin = interior.partition_point(|&e| e <= x);
        counts[bin] += 1;
    }

    let total = values.len().max(1) as f64;
    counts
        .into_iter()
        .map(|c| c as f64 / total + PROBABILITY_EPSILON)
        .collect()
}

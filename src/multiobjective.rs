//! Pareto utilities and the Dirichlet scalariser.
//!
//! Selection and crowding both occasionally need a scalar view over the
//! per-metric rating vectors.  The [`Scalarizer`] samples a random
//! weight vector (Dirichlet via normalised Gamma draws) once per
//! iteration so that selection and pruning agree on the trade-off they
//! are optimising within that iteration.
use rand_distr::{Distribution, Gamma};
use thiserror::Error;

use crate::random::RandomGenerator;

#[derive(Debug, Error)]
pub enum ScalarizerError {
    #[error("scalarizer requires at least one metric")]
    NoMetrics,
    #[error("dirichlet_alpha must be > 0, got {alpha}")]
    InvalidAlpha { alpha: f64 },
    #[error("balanced_probability must be in [0, 1], got {p}")]
    InvalidProbability { p: f64 },
}

/// Returns true if vector `a` Pareto-dominates `b` (with tolerance).
pub fn dominates(a: &[f64], b: &[f64], eps: f64) -> bool {
    debug_assert_eq!(a.len(), b.len());
    let mut gt_any = false;
    for (&av, &bv) in a.iter().zip(b.iter()) {
        if av < bv - eps {
            return false;
        }
        if av > bv + eps {
            gt_any = true;
        }
    }
    gt_any
}

/// Indices of vectors not dominated by any other vector.
pub fn nondominated_indices(vectors: &[Vec<f64>], eps: f64) -> Vec<usize> {
    let n = vectors.len();
    if n <= 1 {
        return (0..n).collect();
    }
    let mut out = Vec::new();
    for i in 0..n {
        let dominated = (0..n).any(|j| j != i && dominates(&vectors[j], &vectors[i], eps));
        if !dominated {
            out.push(i);
        }
    }
    out
}

/// Where the current weights came from; surfaced in events for
/// debugging selection behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightSource {
    Balanced,
    Dirichlet,
    Manual,
    Disabled,
}

/// Samples random metric weights for scalarisation.  One sample is
/// reused across an iteration by both selection and pruning.
#[derive(Debug)]
pub struct Scalarizer {
    metrics: Vec<String>,
    dirichlet_alpha: f64,
    balanced_probability: f64,
    enabled: bool,
    weights: Vec<f64>,
    last_source: WeightSource,
}

impl Scalarizer {
    pub fn new(
        metrics: &[String],
        dirichlet_alpha: f64,
        balanced_probability: f64,
        enabled: bool,
    ) -> Result<Self, ScalarizerError> {
        let metrics: Vec<String> = metrics
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if metrics.is_empty() {
            return Err(ScalarizerError::NoMetrics);
        }
        if dirichlet_alpha <= 0.0 {
            return Err(ScalarizerError::InvalidAlpha {
                alpha: dirichlet_alpha,
            });
        }
        if !(0.0..=1.0).contains(&balanced_probability) {
            return Err(ScalarizerError::InvalidProbability {
                p: balanced_probability,
            });
        }
        let weights = vec![1.0 / metrics.len() as f64; metrics.len()];
        Ok(Self {
            metrics,
            dirichlet_alpha,
            balanced_probability,
            enabled,
            weights,
            last_source: WeightSource::Balanced,
        })
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn last_source(&self) -> WeightSource {
        self.last_source
    }

    fn equal_weights(&self) -> Vec<f64> {
        vec![1.0 / self.metrics.len() as f64; self.metrics.len()]
    }

    fn sample_dirichlet(&self, rng: &mut impl RandomGenerator) -> Vec<f64> {
        if self.metrics.len() == 1 {
            return vec![1.0];
        }
        let gamma = match Gamma::new(self.dirichlet_alpha, 1.0) {
            Ok(g) => g,
            Err(_) => return self.equal_weights(),
        };
        let draws: Vec<f64> = (0..self.metrics.len())
            .map(|_| gamma.sample(rng.rng()))
            .collect();
        let total: f64 = draws.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return self.equal_weights();
        }
        draws.into_iter().map(|d| d / total).collect()
    }

    /// Draws and installs the weights for this iteration.
    pub fn sample(&mut self, rng: &mut impl RandomGenerator) -> &[f64] {
        if !self.enabled {
            self.weights = self.equal_weights();
            self.last_source = WeightSource::Disabled;
            return &self.weights;
        }
        if rng.gen_bool(self.balanced_probability) {
            self.weights = self.equal_weights();
            self.last_source = WeightSource::Balanced;
        } else {
            self.weights = self.sample_dirichlet(rng);
            self.last_source = WeightSource::Dirichlet;
        }
        &self.weights
    }

    /// Installs explicit weights (renormalised); used by deterministic
    /// tests.
    pub fn set_weights(&mut self, weights: &[f64]) {
        let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
        if weights.len() != self.metrics.len() || total <= 0.0 {
            self.weights = self.equal_weights();
        } else {
            self.weights = weights
                .iter()
                .map(|w| if *w > 0.0 { *w / total } else { 0.0 })
                .collect();
        }
        self.last_source = WeightSource::Manual;
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Weighted sum of a vector aligned to the metric order.
    pub fn scalarize(&self, vector: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(vector.iter())
            .map(|(w, v)| w * v)
            .sum()
    }
}

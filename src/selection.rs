//! # `selection` – Parent Choice
//!
//! A two-mode mixture: with probability `uniform_probability` the parent
//! is drawn uniformly (keeps cold members alive); otherwise a tournament
//! of `tournament_size` members is drawn and the winner is picked by an
//! optimistic criterion:
//!
//! * **Optimistic score** (no metrics configured) — mean over metrics of
//!   μ + β·σ, so uncertain members get explored;
//! * **Pareto-filtered scalarisation** — per-metric UCB vectors,
//!   restricted to the non-dominated set, then the Dirichlet-scalarised
//!   maximiser (ties uniform; a positive `temperature` softmax-samples
//!   instead of argmax).
use derive_builder::Builder;

use crate::elites::Elite;
use crate::multiobjective::{Scalarizer, nondominated_indices};
use crate::population::PopulationStore;
use crate::random::{EvoRandomGenerator, RandomGenerator};
use crate::rating::Ratings;

const DOMINANCE_EPS: f64 = 1e-12;

/// The selection seam the engine drives.  [`MixedParentSelector`] is
/// the stock implementation; tests substitute deterministic pickers.
pub trait ParentSelector: std::fmt::Debug {
    fn select_parent(
        &mut self,
        pool: &mut dyn PopulationStore,
        scalarizer: Option<&Scalarizer>,
    ) -> Option<Elite>;
}

/// Mean over metrics of μ + β·σ.
pub fn optimistic_score(ratings: &Ratings, beta: f64) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    ratings.iter().map(|r| r.mu + beta * r.sigma).sum::<f64>() / ratings.len() as f64
}

/// Per-metric UCB vector aligned to the rating order.
pub fn ucb_vector(ratings: &Ratings, beta: f64) -> Vec<f64> {
    ratings.iter().map(|r| r.mu + beta * r.sigma).collect()
}

#[derive(Debug, Builder)]
#[builder(pattern = "owned", build_fn(validate = "MixedParentSelectorBuilder::check"))]
pub struct MixedParentSelector {
    #[builder(default = "0.25")]
    uniform_probability: f64,
    #[builder(default = "4")]
    tournament_size: usize,
    #[builder(default = "1.0")]
    ucb_beta: f64,
    #[builder(default = "0.0")]
    temperature: f64,
    /// Restrict the tournament to the Pareto non-dominated set before
    /// scalarising.  Only meaningful with `multi_metric`.
    #[builder(default = "true")]
    pareto: bool,
    /// Use the per-metric Pareto/scalarised criterion instead of the
    /// plain optimistic mean.
    #[builder(default = "false")]
    multi_metric: bool,
    rng: EvoRandomGenerator,
}

impl MixedParentSelectorBuilder {
    fn check(&self) -> Result<(), String> {
        if let Some(p) = self.uniform_probability {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("uniform_probability must be in [0, 1], got {p}"));
            }
        }
        if let Some(size) = self.tournament_size {
            if size == 0 {
                return Err("tournament_size must be a positive integer".to_string());
            }
        }
        if let Some(beta) = self.ucb_beta {
            if beta < 0.0 {
                return Err(format!("ucb_beta must be >= 0, got {beta}"));
            }
        }
        if let Some(t) = self.temperature {
            if t < 0.0 {
                return Err(format!("temperature must be >= 0, got {t}"));
            }
        }
        Ok(())
    }
}

impl ParentSelector for MixedParentSelector {
    /// Selects a parent; `None` only on an empty population.
    fn select_parent(
        &mut self,
        pool: &mut dyn PopulationStore,
        scalarizer: Option<&Scalarizer>,
    ) -> Option<Elite> {
        if pool.is_empty() {
            return None;
        }
        if pool.len() == 1 || self.rng.gen_bool(self.uniform_probability) {
            return pool.random_elite();
        }

        let contenders = pool.sample(self.tournament_size);
        if contenders.is_empty() {
            return pool.random_elite();
        }

        if !self.multi_metric {
            return contenders.into_iter().max_by(|a, b| {
                optimistic_score(&a.ratings, self.ucb_beta)
                    .partial_cmp(&optimistic_score(&b.ratings, self.ucb_beta))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let vectors: Vec<Vec<f64>> = contenders
            .iter()
            .map(|e| ucb_vector(&e.ratings, self.ucb_beta))
            .collect();

        let mut chosen: Vec<usize> = if self.pareto {
            nondominated_indices(&vectors, DOMINANCE_EPS)
        } else {
            (0..contenders.len()).collect()
        };
        if chosen.is_empty() {
            chosen = (0..contenders.len()).collect();
        }

        let scalarized: Vec<f64> = chosen
            .iter()
            .map(|&idx| match scalarizer {
                Some(s) => s.scalarize(&vectors[idx]),
                None => {
                    let v = &vectors[idx];
                    if v.is_empty() {
                        f64::NEG_INFINITY
                    } else {
                        v.iter().sum::<f64>() / v.len() as f64
                    }
                }
            })
            .collect();

        let pick = if self.temperature > 0.0 {
            self.softmax_pick(&scalarized)
        } else {
            self.argmax_pick(&scalarized)
        };
        Some(contenders[chosen[pick]].clone())
    }
}

impl MixedParentSelector {
    fn argmax_pick(&mut self, scores: &[f64]) -> usize {
        let best = scores
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let tied: Vec<usize> = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| **s >= best - DOMINANCE_EPS)
            .map(|(i, _)| i)
            .collect();
        *self.rng.choose(&tied).unwrap_or(&0)
    }

    fn softmax_pick(&mut self, scores: &[f64]) -> usize {
        let max = scores
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = scores
            .iter()
            .map(|s| ((s - max) / self.temperature).exp())
            .collect();
        self.rng.choose_weighted_index(&weights).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::{CrowdedPool, CrowdingStrategy, ScoreFn};
    use crate::rating::{Rating, Ratings};
    use ndarray::array;

    fn pool_with(elites: Vec<Elite>) -> CrowdedPool {
        let mut pool = CrowdedPool::new(
            32,
            CrowdingStrategy::ClosestPair,
            EvoRandomGenerator::new_from_seed(Some(1)),
            ScoreFn::new(|r: &Ratings| r.get(0).map(|v| v.mu).unwrap_or(0.0)),
        );
        for elite in elites {
            pool.add(elite);
        }
        pool
    }

    fn elite(text: &str, ratings: Vec<Rating>) -> Elite {
        Elite::new(text, array![1.0], Ratings::from_values(ratings), 0)
    }

    fn selector(uniform_probability: f64, multi_metric: bool) -> MixedParentSelector {
        MixedParentSelectorBuilder::default()
            .uniform_probability(uniform_probability)
            .tournament_size(8)
            .ucb_beta(1.0)
            .multi_metric(multi_metric)
            .rng(EvoRandomGenerator::new_from_seed(Some(7)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_bad_knobs() {
        assert!(
            MixedParentSelectorBuilder::default()
                .uniform_probability(1.5)
                .rng(EvoRandomGenerator::new_from_seed(Some(0)))
                .build()
                .is_err()
        );
        assert!(
            MixedParentSelectorBuilder::default()
                .tournament_size(0)
                .rng(EvoRandomGenerator::new_from_seed(Some(0)))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_empty_pool_yields_none() {
        let mut pool = pool_with(vec![]);
        let mut selector = selector(0.0, false);
        assert!(selector.select_parent(&mut pool, None).is_none());
    }

    #[test]
    fn test_tournament_prefers_optimistic_score() {
        let mut pool = pool_with(vec![
            elite("low", vec![Rating::new(10.0, 1.0)]),
            elite("high", vec![Rating::new(20.0, 1.0)]),
            // High uncertainty beats slightly higher mean at beta = 1.
            elite("uncertain", vec![Rating::new(15.0, 10.0)]),
        ]);
        let mut selector = selector(0.0, false);
        for _ in 0..8 {
            let parent = selector.select_parent(&mut pool, None).unwrap();
            assert_eq!(parent.text, "uncertain");
        }
    }

    #[test]
    fn test_pareto_filter_excludes_dominated() {
        let mut pool = pool_with(vec![
            elite("dominated", vec![Rating::new(1.0, 0.1), Rating::new(1.0, 0.1)]),
            elite("a", vec![Rating::new(30.0, 0.1), Rating::new(5.0, 0.1)]),
            elite("b", vec![Rating::new(5.0, 0.1), Rating::new(30.0, 0.1)]),
        ]);
        let mut selector = selector(0.0, true);
        for _ in 0..16 {
            let parent = selector.select_parent(&mut pool, None).unwrap();
            assert_ne!(parent.text, "dominated");
        }
    }

    #[test]
    fn test_scalarizer_weights_steer_the_pick() {
        let mut pool = pool_with(vec![
            elite("a", vec![Rating::new(30.0, 0.1), Rating::new(5.0, 0.1)]),
            elite("b", vec![Rating::new(5.0, 0.1), Rating::new(30.0, 0.1)]),
        ]);
        let metrics = vec!["m1".to_string(), "m2".to_string()];
        let mut scalarizer = Scalarizer::new(&metrics, 1.0, 0.0, true).unwrap();
        scalarizer.set_weights(&[1.0, 0.0]);

        let mut selector = selector(0.0, true);
        for _ in 0..8 {
            let parent = selector.select_parent(&mut pool, Some(&scalarizer)).unwrap();
            assert_eq!(parent.text, "a");
        }
    }

    #[test]
    fn test_uniform_probability_one_is_pure_uniform() {
        let mut pool = pool_with(vec![
            elite("a", vec![Rating::new(1.0, 0.1)]),
            elite("b", vec![Rating::new(99.0, 0.1)]),
        ]);
        let mut selector = selector(1.0, false);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            seen.insert(selector.select_parent(&mut pool, None).unwrap().text);
        }
        assert_eq!(seen.len(), 2);
    }
}

//! # `rating` – Multi-Metric TrueSkill Estimation
//!
//! Every elite carries one skill estimate **per configured metric**; a
//! battle produces one tiered ranking per metric and the
//! [`RatingSystem`] turns those rankings into posterior `(μ, σ)` pairs.
//!
//! The update semantics are standard TrueSkill generalised to ranks
//! with ties: each battle participant is a one-player team, participants
//! in the same tier share a rank index, and the multi-team update of the
//! `skillratings` crate does the factor-graph math.  This module wraps
//! that backend behind the crate's own [`Rating`] type so nothing else
//! in the engine ever sees backend types.
//!
//! Two properties the engine relies on:
//!
//! * **Frozen participants** (anchors) contribute information to the
//!   update of everyone else but their own `(μ, σ)` is left
//!   byte-identical.
//! * **Atomicity** – the update across all metrics either commits as a
//!   whole or not at all; a failure on any metric leaves every
//!   participant untouched and surfaces [`RatingError::RatingUpdateFailed`].
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use skillratings::MultiTeamOutcome;
use skillratings::trueskill::{
    TrueSkillConfig, TrueSkillRating, match_quality, trueskill_multi_team,
};
use thiserror::Error;

/// Ratings never collapse below this; keeps near-certain anchors out of
/// degenerate divisions in the backend.
const SIGMA_FLOOR: f64 = 1e-4;

#[derive(Debug, Error)]
pub enum RatingError {
    #[error("rating system requires at least one metric")]
    NoMetrics,
    #[error("rating prior sigma must be > 0, got {sigma}")]
    InvalidPrior { sigma: f64 },
    #[error("ranking for metric '{metric}' is not a permutation of battle participants")]
    InvalidRanking { metric: String },
    #[error("ranking is missing metric '{metric}'")]
    MissingMetric { metric: String },
    #[error("rating update failed for metric '{metric}'")]
    RatingUpdateFailed { metric: String },
}

/// A single skill estimate: mean and uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub mu: f64,
    pub sigma: f64,
}

impl Rating {
    pub fn new(mu: f64, sigma: f64) -> Self {
        Self { mu, sigma }
    }

    fn to_backend(self) -> TrueSkillRating {
        TrueSkillRating {
            rating: self.mu,
            uncertainty: self.sigma.max(SIGMA_FLOOR),
        }
    }

    fn from_backend(rating: TrueSkillRating) -> Self {
        Self {
            mu: rating.rating,
            sigma: rating.uncertainty.max(SIGMA_FLOOR),
        }
    }
}

/// A dense per-metric rating vector, aligned to the order of the
/// [`RatingSystem`]'s metric list.  Kept dense so battle updates walk a
/// flat array instead of hashing metric names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ratings {
    values: Vec<Rating>,
}

impl Ratings {
    pub fn from_values(values: Vec<Rating>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, metric_index: usize) -> Option<Rating> {
        self.values.get(metric_index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Rating> + '_ {
        self.values.iter().copied()
    }

    pub fn mean_sigma(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().map(|r| r.sigma).sum::<f64>() / self.values.len() as f64
    }
}

/// Prior and dynamics parameters, all config-controlled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingParams {
    pub mu: f64,
    pub sigma: f64,
    pub beta: f64,
    pub tau: f64,
    pub draw_probability: f64,
    pub score_lcb_c: f64,
    pub child_prior_tau: f64,
}

impl Default for RatingParams {
    fn default() -> Self {
        Self {
            mu: 25.0,
            sigma: 25.0 / 3.0,
            beta: 25.0 / 6.0,
            tau: 25.0 / 300.0,
            draw_probability: 0.0,
            score_lcb_c: 2.0,
            child_prior_tau: 1.0,
        }
    }
}

/// One tiered ranking per metric.  Tier 0 is best; indices within a
/// tier are tied.  Construction validates that, per metric, the tiers
/// partition the participant index set exactly — an invalid ranking can
/// therefore never reach the rating update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleRanking {
    tiers_by_metric: BTreeMap<String, Vec<Vec<usize>>>,
}

impl BattleRanking {
    pub fn new(
        tiers_by_metric: BTreeMap<String, Vec<Vec<usize>>>,
        participants: usize,
    ) -> Result<Self, RatingError> {
        for (metric, tiers) in &tiers_by_metric {
            let mut seen: Vec<usize> = tiers.iter().flatten().copied().collect();
            seen.sort_unstable();
            let expected: Vec<usize> = (0..participants).collect();
            if seen != expected {
                return Err(RatingError::InvalidRanking {
                    metric: metric.clone(),
                });
            }
        }
        Ok(Self { tiers_by_metric })
    }

    /// Same tier layout for every metric; the common shape for mocked
    /// rankers and sparring tests.
    pub fn uniform(
        metrics: &[String],
        tiers: Vec<Vec<usize>>,
        participants: usize,
    ) -> Result<Self, RatingError> {
        let map = metrics
            .iter()
            .map(|m| (m.clone(), tiers.clone()))
            .collect();
        Self::new(map, participants)
    }

    pub fn tiers_for(&self, metric: &str) -> Option<&[Vec<usize>]> {
        self.tiers_by_metric.get(metric).map(|t| t.as_slice())
    }

    /// Whether the metric's ranking carries ordering information at all
    /// (at least two distinct tiers).
    pub fn has_strict_tiers(&self, metric: &str) -> bool {
        self.tiers_by_metric
            .get(metric)
            .map(|t| t.len() >= 2)
            .unwrap_or(false)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.tiers_by_metric.keys().map(|s| s.as_str())
    }

    pub fn to_map(&self) -> BTreeMap<String, Vec<Vec<usize>>> {
        self.tiers_by_metric.clone()
    }
}

/// Per-metric TrueSkill environments plus the scalarisation used by the
/// population stores and selectors.
#[derive(Debug, Clone)]
pub struct RatingSystem {
    metrics: Vec<String>,
    params: RatingParams,
}

impl RatingSystem {
    pub fn new(metrics: &[String], params: RatingParams) -> Result<Self, RatingError> {
        let metrics: Vec<String> = metrics
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if metrics.is_empty() {
            return Err(RatingError::NoMetrics);
        }
        if params.sigma <= 0.0 {
            return Err(RatingError::InvalidPrior {
                sigma: params.sigma,
            });
        }
        Ok(Self { metrics, params })
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn params(&self) -> &RatingParams {
        &self.params
    }

    fn backend_config(&self) -> TrueSkillConfig {
        TrueSkillConfig {
            draw_probability: self.params.draw_probability,
            beta: self.params.beta,
            default_dynamics: self.params.tau,
        }
    }

    fn prior(&self) -> Rating {
        Rating::new(self.params.mu, self.params.sigma)
    }

    /// One rating per configured metric at the prior.
    pub fn new_ratings(&self) -> Ratings {
        Ratings::from_values(vec![self.prior(); self.metrics.len()])
    }

    /// Pads (or truncates) a rating vector so it is aligned with the
    /// configured metric set; missing entries are filled at the prior.
    pub fn ensure_ratings(&self, ratings: &mut Ratings) {
        ratings.values.resize(self.metrics.len(), self.prior());
    }

    /// Child ratings inherit the parent's μ per metric and widen σ by
    /// the operator's uncertainty scale:
    /// σ_child = √(σ_parent² + (τ_c · scale)²).
    pub fn init_child_ratings(&self, parent: &Ratings, uncertainty_scale: f64) -> Ratings {
        let widen = (self.params.child_prior_tau * uncertainty_scale.max(0.0)).powi(2);
        let values = (0..self.metrics.len())
            .map(|idx| {
                let base = parent.get(idx).unwrap_or_else(|| self.prior());
                Rating::new(base.mu, (base.sigma.powi(2) + widen).sqrt())
            })
            .collect();
        Ratings::from_values(values)
    }

    /// Mean over metrics of the lower confidence bound μ − c·σ.
    pub fn score(&self, ratings: &Ratings) -> f64 {
        if ratings.is_empty() {
            return 0.0;
        }
        let c = self.params.score_lcb_c;
        ratings.iter().map(|r| r.mu - c * r.sigma).sum::<f64>() / ratings.len() as f64
    }

    /// LCB of a single metric.
    pub fn metric_lcb(&self, rating: Rating) -> f64 {
        rating.mu - self.params.score_lcb_c * rating.sigma
    }

    /// Mean over metrics of μ + beta·σ; the optimistic counterpart of
    /// [`RatingSystem::score`] used by tournament selection.
    pub fn optimistic_score(&self, ratings: &Ratings, beta: f64) -> f64 {
        if ratings.is_empty() {
            return 0.0;
        }
        ratings.iter().map(|r| r.mu + beta * r.sigma).sum::<f64>() / ratings.len() as f64
    }

    /// Probability-of-a-close-game proxy in `[0, 1]`, averaged over
    /// metrics.  Used by `far_but_close` opponent selection.
    pub fn match_quality(&self, a: &Ratings, b: &Ratings) -> f64 {
        if self.metrics.is_empty() {
            return 0.0;
        }
        let config = self.backend_config();
        let mut total = 0.0;
        for idx in 0..self.metrics.len() {
            let ra = a.get(idx).unwrap_or_else(|| self.prior()).to_backend();
            let rb = b.get(idx).unwrap_or_else(|| self.prior()).to_backend();
            total += match_quality(&ra, &rb, &config);
        }
        (total / self.metrics.len() as f64).clamp(0.0, 1.0)
    }

    /// Converts a named rating map (checkpoint form) into the dense
    /// in-memory vector.  Metrics missing on disk get the prior; disk
    /// metrics absent from config are dropped.
    pub fn from_named(&self, named: &BTreeMap<String, Rating>) -> Ratings {
        let values = self
            .metrics
            .iter()
            .map(|m| named.get(m).copied().unwrap_or_else(|| self.prior()))
            .collect();
        Ratings::from_values(values)
    }

    /// The inverse of [`RatingSystem::from_named`], for checkpoints.
    pub fn to_named(&self, ratings: &Ratings) -> BTreeMap<String, Rating> {
        self.metrics
            .iter()
            .enumerate()
            .map(|(idx, m)| {
                (
                    m.clone(),
                    ratings.get(idx).unwrap_or_else(|| self.prior()),
                )
            })
            .collect()
    }

    /// Applies a tiered ranking to a battle's participants.
    ///
    /// Indices in `frozen` take part in everyone else's update but are
    /// themselves left byte-identical.  The commit is all-or-nothing
    /// across metrics.
    pub fn apply_ranking(
        &self,
        mut participants: Vec<&mut Ratings>,
        ranking: &BattleRanking,
        frozen: &BTreeSet<usize>,
    ) -> Result<(), RatingError> {
        let n = participants.len();
        if n < 2 {
            return Ok(());
        }
        let config = self.backend_config();

        // Stage every metric before committing anything.
        let mut staged: Vec<Vec<(usize, Rating)>> = Vec::with_capacity(self.metrics.len());
        for (metric_index, metric) in self.metrics.iter().enumerate() {
            let tiers = ranking
                .tiers_for(metric)
                .ok_or_else(|| RatingError::MissingMetric {
                    metric: metric.clone(),
                })?;

            let mut seen: Vec<usize> = tiers.iter().flatten().copied().collect();
            seen.sort_unstable();
            if seen != (0..n).collect::<Vec<_>>() {
                return Err(RatingError::InvalidRanking {
                    metric: metric.clone(),
                });
            }

            let mut order: Vec<(usize, usize)> = Vec::with_capacity(n);
            for (tier_index, tier) in tiers.iter().enumerate() {
                for &participant in tier {
                    order.push((participant, tier_index));
                }
            }

            let current: Vec<TrueSkillRating> = order
                .iter()
                .map(|&(participant, _)| {
                    participants[participant]
                        .get(metric_index)
                        .unwrap_or_else(|| self.prior())
                        .to_backend()
                })
                .collect();
            let teams_and_ranks: Vec<(&[TrueSkillRating], MultiTeamOutcome)> = current
                .iter()
                .zip(order.iter())
                .map(|(rating, &(_, rank))| {
                    (std::slice::from_ref(rating), MultiTeamOutcome::new(rank))
                })
                .collect();

            let updated = trueskill_multi_team(&teams_and_ranks, &config);
            if updated.len() != order.len() {
                return Err(RatingError::RatingUpdateFailed {
                    metric: metric.clone(),
                });
            }

            let mut metric_stage: Vec<(usize, Rating)> = Vec::with_capacity(n);
            for (team, &(participant, _)) in updated.iter().zip(order.iter()) {
                let rating = Rating::from_backend(team[0]);
                if !rating.mu.is_finite() || !rating.sigma.is_finite() || rating.sigma <= 0.0 {
                    return Err(RatingError::RatingUpdateFailed {
                        metric: metric.clone(),
                    });
                }
                metric_stage.push((participant, rating));
            }
            staged.push(metric_stage);
        }

        // Commit.
        for (metric_index, metric_stage) in staged.into_iter().enumerate() {
            for (participant, rating) in metric_stage {
                if frozen.contains(&participant) {
                    continue;
                }
                participants[participant].values[metric_index] = rating;
            }
        }
        Ok(())
    }
}

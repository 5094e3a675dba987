//! # `mutation` – Job Planning and the Operator Runner
//!
//! Each iteration turns the mutation config into a concrete job list:
//!
//! 1. every operator gets its `min_jobs` (clamped to the budget);
//! 2. remaining slots are distributed by `weight` via weighted sampling;
//! 3. jobs are shuffled, then given a focus — explore jobs walk the
//!    critique's `routes`, exploit jobs its `issues` (each entry used
//!    once, then sampled with replacement), crossover jobs get partner
//!    elites instead of a focus.
//!
//! [`OperatorMutator`] is the stock [`Mutator`] implementation: it runs
//! the planned jobs on the engine's bounded executor, collects candidate
//! texts, and deduplicates them (dropping anything equal to the parent).
//! A job that errors is logged and skipped; workers touch no shared
//! state and receive no RNG.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::elites::{Critique, Elite, MutationCandidate};
use crate::population::{PopulationStore, farthest_ranked};
use crate::ports::{Mutator, TextOperator};
use crate::random::{EvoRandomGenerator, RandomGenerator};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("at least one operator is required")]
    NoOperators,
    #[error("operator names must be unique; '{name}' appears twice")]
    DuplicateName { name: String },
    #[error("operator '{name}' weight must be > 0, got {weight}")]
    InvalidWeight { name: String, weight: f64 },
    #[error("operator '{name}' uncertainty_scale must be >= 0, got {scale}")]
    InvalidUncertainty { name: String, scale: f64 },
    #[error("no registered implementation for operator '{name}'")]
    MissingOperator { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    Explore,
    Exploit,
    Crossover,
}

impl OperatorRole {
    pub fn label(&self) -> &'static str {
        match self {
            OperatorRole::Explore => "explore",
            OperatorRole::Exploit => "exploit",
            OperatorRole::Crossover => "crossover",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerSelection {
    Random,
    Farthest,
    FarRandom,
}

/// Per-operator planning config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub name: String,
    pub role: OperatorRole,
    #[serde(default)]
    pub min_jobs: usize,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_uncertainty_scale")]
    pub uncertainty_scale: f64,
    #[serde(default = "default_committee_size")]
    pub committee_size: usize,
    #[serde(default = "default_partner_selection")]
    pub partner_selection: PartnerSelection,
    #[serde(default = "default_partner_farthest_k")]
    pub partner_farthest_k: usize,
}

fn default_weight() -> f64 {
    1.0
}
fn default_uncertainty_scale() -> f64 {
    1.0
}
fn default_committee_size() -> usize {
    1
}
fn default_partner_selection() -> PartnerSelection {
    PartnerSelection::FarRandom
}
fn default_partner_farthest_k() -> usize {
    32
}

/// One planned oracle call.
#[derive(Debug, Clone)]
pub struct MutationJob {
    pub operator: String,
    pub focus: Option<String>,
    pub partners: Vec<Elite>,
}

/// Turns per-iteration config into a job list.
#[derive(Debug, Clone)]
pub struct MutationPlanner {
    specs: Vec<OperatorSpec>,
    jobs_per_iteration: usize,
}

impl MutationPlanner {
    pub fn new(specs: Vec<OperatorSpec>, jobs_per_iteration: usize) -> Result<Self, PlanError> {
        if specs.is_empty() {
            return Err(PlanError::NoOperators);
        }
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.clone()) {
                return Err(PlanError::DuplicateName {
                    name: spec.name.clone(),
                });
            }
            if spec.weight <= 0.0 || !spec.weight.is_finite() {
                return Err(PlanError::InvalidWeight {
                    name: spec.name.clone(),
                    weight: spec.weight,
                });
            }
            if spec.uncertainty_scale < 0.0 {
                return Err(PlanError::InvalidUncertainty {
                    name: spec.name.clone(),
                    scale: spec.uncertainty_scale,
                });
            }
        }
        Ok(Self {
            specs,
            jobs_per_iteration,
        })
    }

    pub fn specs(&self) -> &[OperatorSpec] {
        &self.specs
    }

    fn role_of(&self, operator: &str) -> Option<OperatorRole> {
        self.specs
            .iter()
            .find(|s| s.name == operator)
            .map(|s| s.role)
    }

    pub fn plan(
        &self,
        critique: Option<&Critique>,
        rng: &mut impl RandomGenerator,
    ) -> Vec<MutationJob> {
        if self.jobs_per_iteration == 0 {
            return Vec::new();
        }

        let mut names: Vec<String> = Vec::with_capacity(self.jobs_per_iteration);
        let mut remaining = self.jobs_per_iteration;

        // 1) Per-operator minimums, clamped to the budget.
        for spec in &self.specs {
            if remaining == 0 {
                break;
            }
            let count = spec.min_jobs.min(remaining);
            names.extend(std::iter::repeat_n(spec.name.clone(), count));
            remaining -= count;
        }

        // 2) Remaining slots by weight.
        let weights: Vec<f64> = self.specs.iter().map(|s| s.weight).collect();
        for _ in 0..remaining {
            if let Some(idx) = rng.choose_weighted_index(&weights) {
                names.push(self.specs[idx].name.clone());
            }
        }

        rng.shuffle(&mut names);

        // 3) Focus assignment: each route/issue used once in order,
        //    then sampled with replacement.
        let routes: Vec<String> = critique.map(|c| c.routes.clone()).unwrap_or_default();
        let issues: Vec<String> = critique.map(|c| c.issues.clone()).unwrap_or_default();
        let mut route_cursor = 0usize;
        let mut issue_cursor = 0usize;

        names
            .into_iter()
            .map(|operator| {
                let focus = match self.role_of(&operator) {
                    Some(OperatorRole::Explore) if !routes.is_empty() => {
                        if route_cursor < routes.len() {
                            route_cursor += 1;
                            Some(routes[route_cursor - 1].clone())
                        } else {
                            rng.choose(&routes).cloned()
                        }
                    }
                    Some(OperatorRole::Exploit) if !issues.is_empty() => {
                        if issue_cursor < issues.len() {
                            issue_cursor += 1;
                            Some(issues[issue_cursor - 1].clone())
                        } else {
                            rng.choose(&issues).cloned()
                        }
                    }
                    _ => None,
                };
                MutationJob {
                    operator,
                    focus,
                    partners: Vec::new(),
                }
            })
            .collect()
    }
}

/// The stock [`Mutator`]: planner + parallel operator runner.
#[derive(Debug)]
pub struct OperatorMutator {
    planner: MutationPlanner,
    operators: HashMap<String, Arc<dyn TextOperator>>,
    rng: EvoRandomGenerator,
}

impl OperatorMutator {
    pub fn new(
        operators: HashMap<String, Arc<dyn TextOperator>>,
        specs: Vec<OperatorSpec>,
        jobs_per_iteration: usize,
        rng: EvoRandomGenerator,
    ) -> Result<Self, PlanError> {
        let planner = MutationPlanner::new(specs, jobs_per_iteration)?;
        for spec in planner.specs() {
            if !operators.contains_key(&spec.name) {
                return Err(PlanError::MissingOperator {
                    name: spec.name.clone(),
                });
            }
        }
        Ok(Self {
            planner,
            operators,
            rng,
        })
    }

    fn spec_of(&self, operator: &str) -> Option<&OperatorSpec> {
        self.planner.specs().iter().find(|s| s.name == operator)
    }

    fn attach_partners(
        &mut self,
        jobs: Vec<MutationJob>,
        parent: &Elite,
        pool: &dyn PopulationStore,
    ) -> Vec<MutationJob> {
        let elites = pool.elites();
        jobs.into_iter()
            .map(|mut job| {
                let Some(spec) = self.spec_of(&job.operator).cloned() else {
                    return job;
                };
                if spec.role != OperatorRole::Crossover {
                    return job;
                }
                let count = spec.committee_size.saturating_sub(1);
                job.partners = self.sample_partners(
                    &elites,
                    parent,
                    count,
                    spec.partner_selection,
                    spec.partner_farthest_k,
                );
                job
            })
            .collect()
    }

    fn sample_partners(
        &mut self,
        elites: &[&Elite],
        parent: &Elite,
        count: usize,
        selection: PartnerSelection,
        farthest_k: usize,
    ) -> Vec<Elite> {
        if count == 0 {
            return Vec::new();
        }
        let candidates: Vec<&Elite> = elites
            .iter()
            .filter(|e| e.text != parent.text)
            .copied()
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        let k = count.min(candidates.len());
        match selection {
            PartnerSelection::Random => self
                .rng
                .sample_indices(candidates.len(), k)
                .into_iter()
                .map(|i| candidates[i].clone())
                .collect(),
            PartnerSelection::Farthest => {
                farthest_ranked(&candidates, parent, &HashSet::new())
                    .into_iter()
                    .take(k)
                    .map(|(_, e)| e.clone())
                    .collect()
            }
            PartnerSelection::FarRandom => {
                let ranked = farthest_ranked(&candidates, parent, &HashSet::new());
                let top: Vec<&Elite> = ranked
                    .into_iter()
                    .take(farthest_k.max(1))
                    .map(|(_, e)| e)
                    .collect();
                self.rng
                    .sample_indices(top.len(), k.min(top.len()))
                    .into_iter()
                    .map(|i| top[i].clone())
                    .collect()
            }
        }
    }
}

impl Mutator for OperatorMutator {
    fn propose(
        &mut self,
        parent: &Elite,
        critique: Option<&Critique>,
        max_candidates: usize,
        pool: &dyn PopulationStore,
        executor: &rayon::ThreadPool,
    ) -> Vec<MutationCandidate> {
        if max_candidates == 0 {
            return Vec::new();
        }
        let jobs = self.planner.plan(critique, &mut self.rng);
        if jobs.is_empty() {
            return Vec::new();
        }
        let jobs = self.attach_partners(jobs, parent, pool);

        let operators = &self.operators;
        let specs: HashMap<&str, &OperatorSpec> = self
            .planner
            .specs()
            .iter()
            .map(|s| (s.name.as_str(), s))
            .collect();

        let batches: Vec<Vec<MutationCandidate>> = executor.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let Some(spec) = specs.get(job.operator.as_str()) else {
                        return Vec::new();
                    };
                    let Some(operator) = operators.get(&job.operator) else {
                        return Vec::new();
                    };
                    // Crossover jobs work from partners, not the critique.
                    let (job_critique, job_focus) = if spec.role == OperatorRole::Crossover {
                        (None, None)
                    } else {
                        (critique, job.focus.as_deref())
                    };
                    let texts = match operator.propose_texts(
                        parent,
                        &job.partners,
                        job_critique,
                        job_focus,
                    ) {
                        Ok(texts) => texts,
                        Err(err) => {
                            warn!(operator = %job.operator, %err, "mutation job failed; skipping");
                            return Vec::new();
                        }
                    };
                    texts
                        .into_iter()
                        .filter_map(|text| {
                            let cleaned = text.trim().to_string();
                            if cleaned.is_empty() || cleaned == parent.text {
                                return None;
                            }
                            Some(MutationCandidate {
                                text: cleaned,
                                operator: spec.name.clone(),
                                uncertainty_scale: spec.uncertainty_scale,
                                focus: job.focus.clone(),
                                partner_texts: job
                                    .partners
                                    .iter()
                                    .map(|p| p.text.clone())
                                    .collect(),
                            })
                        })
                        .collect()
                })
                .collect()
        });

        // Dedupe preserving order.
        let mut seen: HashSet<String> = HashSet::new();
        let mut unique: Vec<MutationCandidate> = Vec::new();
        for candidate in batches.into_iter().flatten() {
            if seen.insert(candidate.text.clone()) {
                unique.push(candidate);
            }
        }

        if unique.len() > max_candidates {
            let mut keep = self.rng.sample_indices(unique.len(), max_candidates);
            keep.sort_unstable();
            unique = keep.into_iter().map(|i| unique[i].clone()).collect();
        }
        unique
    }
}

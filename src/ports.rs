//! # `ports` – Oracle Seams
//!
//! The engine never builds prompts and never parses model output; it
//! talks to the language-model oracle exclusively through these traits.
//! Adapters own retries, repair and parsing.  The contract the engine
//! relies on:
//!
//! * a failing **critic** or **mutator** is a transient condition — the
//!   adapter returns `None` / no candidates and the step is skipped;
//! * a **ranker** returning `None` means the adapter has exhausted its
//!   own retries — the engine treats that as fatal, because a step
//!   cannot continue without a ranking;
//! * a ranker must never return a structurally invalid ranking
//!   ([`BattleRanking`](crate::rating::BattleRanking) construction
//!   already refuses non-permutations).
use std::collections::BTreeMap;

use thiserror::Error;

use crate::battle::Battle;
use crate::elites::{Critique, Elite, MutationCandidate};
use crate::population::PopulationStore;
use crate::rating::BattleRanking;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle call failed: {0}")]
    Call(String),
}

/// Produces a structured critique of the parent, or `None` when the
/// oracle has nothing useful (or failed transiently).
pub trait Critic: std::fmt::Debug {
    fn critique(&mut self, parent: &Elite) -> Option<Critique>;
}

/// Turns a parent (plus optional critique) into candidate texts.  The
/// engine provides its bounded executor so implementations can fan out
/// cooperatively; implementations must not block on their own pools.
pub trait Mutator: std::fmt::Debug {
    fn propose(
        &mut self,
        parent: &Elite,
        critique: Option<&Critique>,
        max_candidates: usize,
        pool: &dyn PopulationStore,
        executor: &rayon::ThreadPool,
    ) -> Vec<MutationCandidate>;
}

/// The noisy judge: one tiered ranking per metric over a battle.
pub trait Ranker: std::fmt::Debug {
    fn rank(
        &mut self,
        metrics: &[String],
        battle: &Battle,
        metric_descriptions: &BTreeMap<String, String>,
    ) -> Option<BattleRanking>;
}

/// The per-operator oracle contract consumed by the operator runner:
/// one named operator (an exploit/explore/crossover "move") proposing
/// texts for a single job.  Implementations run on worker threads.
pub trait TextOperator: Send + Sync + std::fmt::Debug {
    fn propose_texts(
        &self,
        parent: &Elite,
        partners: &[Elite],
        critique: Option<&Critique>,
        focus: Option<&str>,
    ) -> Result<Vec<String>, OracleError>;
}

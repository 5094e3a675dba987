//! # fuzzyevolve – Text Evolution Over an LLM Oracle
//!
//! Given a seed text, a goal, and a set of quality metrics, *fuzzyevolve*
//! maintains an evolving population of candidate texts and improves them
//! iteration by iteration: an oracle-backed mutator proposes children, an
//! oracle-backed ranker judges multi-way battles, and a multi-metric
//! TrueSkill estimator turns those noisy tiered rankings into skill
//! estimates that drive selection and survival.
//!
//! | Subsystem | Module | Role |
//! |-----------|--------|------|
//! | Rating | [`rating`] | per-metric TrueSkill; tiered battle updates; LCB scoring |
//! | Population | [`population`] | `CrowdedPool` (embedding crowding) / `MapElitesArchive` (descriptor cells) |
//! | Descriptors | [`descriptor`], [`embedding`] | text → unit vector → behaviour-space cell |
//! | Anchors | [`anchors`] | frozen scale references (seed + ghosts) |
//! | Battles | [`battle`] | size-bounded, role-labelled judging events |
//! | Mutation | [`mutation`], [`ports`] | job planning + bounded parallel operator fan-out |
//! | Selection | [`selection`], [`multiobjective`] | uniform/tournament mixture, Pareto + Dirichlet scalarisation |
//! | Engine | [`engine`] | the per-iteration orchestrator |
//! | Persistence | [`store`], [`recorder`], [`reporting`] | texts, events, stats, checkpoints, resume, derived views |
//!
//! ## Quick example
//!
//! ```rust,no_run,ignore
//! use std::sync::Arc;
//! use fuzzyevolve::config::Config;
//! use fuzzyevolve::engine::{
//!     EvolutionEngine, build_anchor_manager, build_descriptor, build_embeddings,
//!     build_population, build_scalarizer, build_selector,
//! };
//! use fuzzyevolve::random::RngStreams;
//! use fuzzyevolve::rating::RatingSystem;
//! use fuzzyevolve::recorder::NoopRecorder;
//!
//! let cfg = Config::default();
//! let streams = RngStreams::split(cfg.run.random_seed);
//! let rating = RatingSystem::new(&cfg.metrics.names, cfg.rating.clone())?;
//! let embeddings = build_embeddings(&cfg);
//! let descriptor = build_descriptor(&cfg, &embeddings);
//!
//! let mut engine = EvolutionEngine::new(
//!     cfg.clone(),
//!     rating.clone(),
//!     build_population(&cfg, &rating, &descriptor, &streams),
//!     embeddings.clone(),
//!     build_selector(&cfg, &streams)?,
//!     build_scalarizer(&cfg)?,
//!     None,                       // critic (oracle adapter)
//!     my_mutator,                 // mutator (oracle adapter)
//!     my_ranker,                  // ranker (oracle adapter)
//!     Some(build_anchor_manager(&cfg, &embeddings, &streams)),
//!     Box::new(NoopRecorder),
//!     None,                       // RunStore for durable runs
//!     streams,
//! )?;
//! let result = engine.run("my seed text")?;
//! println!("best ({:.3}): {}", result.best_score, result.best_elite.text);
//! ```
//!
//! The LLM oracle itself — prompts, parsing, retries — lives behind the
//! [`ports`] traits and is supplied by the caller; the engine never sees
//! a raw prompt.

pub mod anchors;
pub mod battle;
pub mod config;
pub mod descriptor;
pub mod elites;
pub mod embedding;
pub mod engine;
pub mod helpers;
pub mod multiobjective;
pub mod mutation;
pub mod population;
pub mod ports;
pub mod random;
pub mod rating;
pub mod recorder;
pub mod reporting;
pub mod selection;
pub mod stats;
pub mod store;

pub use anchors::{AnchorManager, AnchorParams};
pub use battle::{Battle, BattleError, build_battle};
pub use config::{Config, ConfigError};
pub use elites::{Anchor, Combatant, Critique, Elite, MutationCandidate};
pub use engine::{EngineError, EvolutionEngine, EvolutionResult};
pub use mutation::{MutationPlanner, OperatorMutator, OperatorRole, OperatorSpec, PlanError};
pub use population::{
    AddOutcome, CrowdedPool, CrowdingStrategy, MapElitesArchive, PoolDelta, Population,
    PopulationStore, ScoreFn,
};
pub use ports::{Critic, Mutator, OracleError, Ranker, TextOperator};
pub use random::{EvoRandomGenerator, RandomGenerator, RngStreams};
pub use rating::{BattleRanking, Rating, RatingError, RatingParams, RatingSystem, Ratings};
pub use recorder::{Event, MemoryRecorder, NoopRecorder, Recorder};
pub use selection::{MixedParentSelector, ParentSelector};
pub use store::{LoadedRun, RunStore, StoreError, text_id};

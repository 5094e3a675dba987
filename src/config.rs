//! # `config` – Knob Tree
//!
//! All runtime knobs in one serde-deserialised tree, loadable from JSON
//! or TOML (JSON tried first, matching how run directories store their
//! `config.json`).  Every section carries defaults, so an empty file is
//! a valid config.  Validation runs once at start-up; the engine never
//! begins a loop on a malformed config.
use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::anchors::AnchorParams;
use crate::mutation::{OperatorRole, OperatorSpec, PartnerSelection};
use crate::rating::RatingParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config is neither valid JSON nor valid TOML: {json} / {toml}")]
    Parse { json: String, toml: String },
    #[error("invalid config: {0}")]
    InvalidParameter(String),
}

fn validate_probability(value: f64, name: &str) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidParameter(format!(
            "{name} must be in [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn validate_positive(value: usize, name: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidParameter(format!(
            "{name} must be a positive integer"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub iterations: usize,
    pub log_interval: usize,
    pub checkpoint_interval: usize,
    pub random_seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            log_interval: 1,
            checkpoint_interval: 1,
            random_seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationKind {
    Pool,
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrowdingKind {
    ClosestPair,
    KnnLocalCompetition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrowdingConfig {
    pub kind: CrowdingKind,
    pub knn_k: usize,
}

impl Default for CrowdingConfig {
    fn default() -> Self {
        Self {
            kind: CrowdingKind::ClosestPair,
            knn_k: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub kind: PopulationKind,
    /// CrowdedPool capacity.
    pub size: usize,
    /// Archive mode: number of islands.
    pub islands: usize,
    /// Archive mode: bucket capacity per cell.
    pub elites_per_cell: usize,
    pub crowding: CrowdingConfig,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            kind: PopulationKind::Pool,
            size: 64,
            islands: 1,
            elites_per_cell: 4,
            crowding: CrowdingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    Length,
    Embedding2d,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Embedding2dConfig {
    pub bins_x: Vec<f64>,
    pub bins_y: Vec<f64>,
    pub projection_seed: u64,
    pub embedding_dim: usize,
}

impl Default for Embedding2dConfig {
    fn default() -> Self {
        let bins = vec![-3.0, -1.5, -0.5, 0.5, 1.5, 3.0];
        Self {
            bins_x: bins.clone(),
            bins_y: bins,
            projection_seed: 7,
            embedding_dim: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    pub kind: DescriptorKind,
    pub length_bins: Vec<f64>,
    pub embedding_2d: Embedding2dConfig,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            kind: DescriptorKind::Length,
            length_bins: vec![0.0, 500.0, 1000.0, 2000.0, 1e9],
            embedding_2d: Embedding2dConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    /// Pure uniform sampling.
    Uniform,
    /// Mixture with an optimistic-score tournament.
    Optimistic,
    /// Mixture with a Pareto-filtered, Dirichlet-scalarised tournament.
    ParetoScalarized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub kind: SelectionKind,
    pub uniform_probability: f64,
    pub tournament_size: usize,
    pub ucb_beta: f64,
    pub temperature: f64,
    pub dirichlet_alpha: f64,
    pub balanced_probability: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            kind: SelectionKind::Optimistic,
            uniform_probability: 0.25,
            tournament_size: 4,
            ucb_beta: 1.0,
            temperature: 0.0,
            dirichlet_alpha: 1.0,
            balanced_probability: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    pub jobs_per_iteration: usize,
    pub max_workers: usize,
    pub max_children: usize,
    pub operators: Vec<OperatorSpec>,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            jobs_per_iteration: 4,
            max_workers: 4,
            max_children: 4,
            operators: vec![
                OperatorSpec {
                    name: "refine".into(),
                    role: OperatorRole::Exploit,
                    min_jobs: 1,
                    weight: 2.0,
                    uncertainty_scale: 0.5,
                    committee_size: 1,
                    partner_selection: PartnerSelection::FarRandom,
                    partner_farthest_k: 32,
                },
                OperatorSpec {
                    name: "diverge".into(),
                    role: OperatorRole::Explore,
                    min_jobs: 1,
                    weight: 1.0,
                    uncertainty_scale: 2.0,
                    committee_size: 1,
                    partner_selection: PartnerSelection::FarRandom,
                    partner_farthest_k: 32,
                },
                OperatorSpec {
                    name: "blend".into(),
                    role: OperatorRole::Crossover,
                    min_jobs: 0,
                    weight: 0.5,
                    uncertainty_scale: 1.5,
                    committee_size: 3,
                    partner_selection: PartnerSelection::FarRandom,
                    partner_farthest_k: 16,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpponentKind {
    None,
    Random,
    FarthestFromParent,
    FarButClose,
    CellChampion,
    GlobalBest,
    TopkOtherCellChampion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpponentConfig {
    pub kind: OpponentKind,
    pub probability: f64,
    pub top_k: usize,
    pub farthest_k: usize,
}

impl Default for OpponentConfig {
    fn default() -> Self {
        Self {
            kind: OpponentKind::None,
            probability: 0.5,
            top_k: 3,
            farthest_k: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgingConfig {
    /// Ranker adapter knobs; opaque to the engine, forwarded to the port.
    pub max_attempts: usize,
    pub repair_enabled: bool,
    pub max_battle_size: usize,
    pub include_inspirations: bool,
    pub opponent: OpponentConfig,
}

impl Default for JudgingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            repair_enabled: true,
            max_battle_size: 8,
            include_inspirations: false,
            opponent: OpponentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewCellGateKind {
    None,
    ParentLcb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewCellGateConfig {
    pub kind: NewCellGateKind,
    pub delta: f64,
}

impl Default for NewCellGateConfig {
    fn default() -> Self {
        Self {
            kind: NewCellGateKind::None,
            delta: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub names: Vec<String>,
    pub descriptions: BTreeMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            names: vec![
                "clarity".to_string(),
                "conciseness".to_string(),
                "creativity".to_string(),
            ],
            descriptions: BTreeMap::new(),
        }
    }
}

/// Oracle-side model knobs; the core never interprets them, it only
/// carries them to adapters and into `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmEntry {
    pub model: String,
    pub weight: f64,
    pub temperature: f64,
}

impl Default for LlmEntry {
    fn default() -> Self {
        Self {
            model: String::new(),
            weight: 1.0,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub ensemble: Vec<LlmEntry>,
    pub judge_model: String,
    pub critic_model: String,
    pub critic_temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub interval: usize,
    pub size: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            interval: 0,
            size: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparringConfig {
    pub interval: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub migration: MigrationConfig,
    pub sparring: SparringConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub population: PopulationConfig,
    pub rating: RatingParams,
    pub descriptor: DescriptorConfig,
    pub selection: SelectionConfig,
    pub mutation: MutationConfig,
    pub judging: JudgingConfig,
    pub anchors: AnchorParams,
    pub new_cell_gate: NewCellGateConfig,
    pub metrics: MetricsConfig,
    pub llm: LlmConfig,
    pub maintenance: MaintenanceConfig,
}

impl Config {
    /// Loads a config file, accepting JSON first and TOML as fallback.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self, ConfigError> {
        let json_err = match serde_json::from_str::<Self>(data) {
            Ok(cfg) => return Ok(cfg),
            Err(err) => err.to_string(),
        };
        match toml::from_str::<Self>(data) {
            Ok(cfg) => Ok(cfg),
            Err(toml_err) => Err(ConfigError::Parse {
                json: json_err,
                toml: toml_err.to_string(),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_positive(self.run.iterations, "run.iterations")?;
        validate_positive(self.population.size, "population.size")?;
        validate_positive(self.population.islands, "population.islands")?;
        validate_positive(self.population.elites_per_cell, "population.elites_per_cell")?;
        validate_positive(self.population.crowding.knn_k, "population.crowding.knn_k")?;
        validate_positive(self.selection.tournament_size, "selection.tournament_size")?;
        validate_probability(
            self.selection.uniform_probability,
            "selection.uniform_probability",
        )?;
        validate_probability(
            self.selection.balanced_probability,
            "selection.balanced_probability",
        )?;
        validate_probability(self.judging.opponent.probability, "judging.opponent.probability")?;
        validate_probability(
            self.anchors.injection_probability,
            "anchors.injection_probability",
        )?;
        validate_probability(self.rating.draw_probability, "rating.draw_probability")?;
        if self.rating.sigma <= 0.0 {
            return Err(ConfigError::InvalidParameter(
                "rating.sigma must be > 0".to_string(),
            ));
        }
        if self.judging.max_battle_size < 2 {
            return Err(ConfigError::InvalidParameter(
                "judging.max_battle_size must be >= 2".to_string(),
            ));
        }
        if self.metrics.names.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::InvalidParameter(
                "metrics.names must contain at least one metric".to_string(),
            ));
        }
        if self.mutation.operators.is_empty() {
            return Err(ConfigError::InvalidParameter(
                "mutation.operators must not be empty".to_string(),
            ));
        }
        if self.descriptor.length_bins.len() < 2 {
            return Err(ConfigError::InvalidParameter(
                "descriptor.length_bins needs at least two edges".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker-pool size for mutation jobs.
    pub fn mutation_workers(&self) -> usize {
        self.mutation
            .jobs_per_iteration
            .min(self.mutation.max_workers)
            .max(1)
    }
}

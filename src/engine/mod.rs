//! # `engine` – The Per-Iteration Orchestrator
//!
//! One iteration of the loop:
//!
//! 1. select a parent (uniform/tournament mixture);
//! 2. optionally critique it;
//! 3. plan and run mutation jobs on the bounded executor, dedup
//!    candidates against the pool;
//! 4. construct children (embedding, inherited-and-widened ratings);
//! 5. sample anchors and, with configured probability, an opponent
//!    (plus an inspiration when opted in);
//! 6. assemble the battle (≥ 2 participants or the step is skipped);
//! 7. ask the ranker — a `None` here is fatal, the step cannot
//!    continue without a ranking;
//! 8. apply the tiered rating update (all-or-nothing; frozen anchors
//!    untouched), recording before/after;
//! 9. admit children (archive mode gates brand-new cells by the
//!    parent's post-update LCB);
//! 10. write back re-sorted ratings for parent/opponent/inspiration;
//! 11. run maintenance (migration, sparring) on cadence;
//! 12. maybe ghost the champion, then record stats and checkpoint.
//!
//! The engine owns the RNG fan-out, the rayon executor and the event
//! recorder; mutation workers receive no RNG and touch no shared state
//! beyond the embedding cache.  A cooperative cancel flag stops the
//! loop at the next iteration boundary without checkpointing the
//! partial iteration.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::anchors::AnchorManager;
use crate::battle::{Battle, BattleError, build_battle};
use crate::config::{
    Config, ConfigError, CrowdingKind, DescriptorKind, NewCellGateKind, OpponentKind,
    PopulationKind, SelectionKind,
};
use crate::descriptor::{CellKey, DescriptorSystem};
use crate::elites::Elite;
use crate::embedding::EmbeddingService;
use crate::helpers::linalg::{cosine_distance, quantile};
use crate::multiobjective::{Scalarizer, ScalarizerError};
use crate::mutation::PlanError;
use crate::population::{
    CrowdedPool, CrowdingStrategy, MapElitesArchive, Population, PopulationStore, ScoreFn,
};
use crate::ports::{Critic, Mutator, Ranker};
use crate::random::{EvoRandomGenerator, RandomGenerator, RngStreams};
use crate::rating::{Rating, RatingError, RatingSystem, Ratings};
use crate::selection::ParentSelector;
use crate::recorder::{
    CandidateRecord, Event, LineageEdge, RatingsUpdateEntry, Recorder,
};
use crate::stats::EvolutionStats;
use crate::store::schema::{AnchorDoc, CheckpointDoc, IslandDoc, MemberDoc, PopulationDoc, StatsRecord};
use crate::store::{RunStore, text_id};

mod inspirations;
mod opponents;

pub use inspirations::{Inspiration, pick_inspirations};
pub use opponents::pick_opponent;

/// How many members feed the pairwise diversity quantiles per stats
/// record; keeps the O(n²) pass bounded on large pools.
const DIVERSITY_SAMPLE_CAP: usize = 48;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("seed text must not be empty")]
    EmptySeed,
    #[error("population is empty; cannot select a parent")]
    EmptyPopulation,
    #[error("ranker returned no ranking; cannot continue the step")]
    RankerFailed,
    #[error("selector construction failed: {0}")]
    Selector(String),
    #[error("mutation executor build failed: {0}")]
    Executor(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Rating(#[from] RatingError),
    #[error(transparent)]
    Battle(#[from] BattleError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Scalarizer(#[from] ScalarizerError),
}

/// Final outcome of a run.
#[derive(Debug, Clone)]
pub struct EvolutionResult {
    pub best_elite: Elite,
    pub best_score: f64,
}

pub struct EvolutionEngine {
    cfg: Config,
    rating: RatingSystem,
    population: Population,
    embeddings: Arc<EmbeddingService>,
    selector: Box<dyn ParentSelector>,
    scalarizer: Option<Scalarizer>,
    critic: Option<Box<dyn Critic>>,
    mutator: Box<dyn Mutator>,
    ranker: Box<dyn Ranker>,
    anchors: Option<AnchorManager>,
    recorder: Box<dyn Recorder>,
    store: Option<RunStore>,
    stats: EvolutionStats,
    streams: RngStreams,
    rng: EvoRandomGenerator,
    executor: rayon::ThreadPool,
    cancel: Arc<AtomicBool>,
}

impl EvolutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        rating: RatingSystem,
        population: Population,
        embeddings: Arc<EmbeddingService>,
        selector: Box<dyn ParentSelector>,
        scalarizer: Option<Scalarizer>,
        critic: Option<Box<dyn Critic>>,
        mutator: Box<dyn Mutator>,
        ranker: Box<dyn Ranker>,
        anchors: Option<AnchorManager>,
        recorder: Box<dyn Recorder>,
        store: Option<RunStore>,
        streams: RngStreams,
    ) -> Result<Self, EngineError> {
        cfg.validate()?;
        let executor = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.mutation_workers())
            .build()
            .map_err(|err| EngineError::Executor(err.to_string()))?;
        let rng = streams.engine();
        Ok(Self {
            cfg,
            rating,
            population,
            embeddings,
            selector,
            scalarizer,
            critic,
            mutator,
            ranker,
            anchors,
            recorder,
            store,
            stats: EvolutionStats::default(),
            streams,
            rng,
            executor,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Cooperative cancel flag: set it from anywhere to stop the loop
    /// at the next iteration boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn stats(&self) -> &EvolutionStats {
        &self.stats
    }

    pub fn store(&self) -> Option<&RunStore> {
        self.store.as_ref()
    }

    /// Seeds the population (and the seed anchor) then runs the
    /// configured number of iterations from zero.
    pub fn run(&mut self, seed_text: &str) -> Result<EvolutionResult, EngineError> {
        if seed_text.trim().is_empty() {
            return Err(EngineError::EmptySeed);
        }
        self.seed_population(seed_text);
        self.resume(0)
    }

    /// Runs `run.iterations` more iterations starting at
    /// `start_iteration`; population and anchors must already be live
    /// (freshly seeded or loaded from a checkpoint).
    pub fn resume(&mut self, start_iteration: usize) -> Result<EvolutionResult, EngineError> {
        for offset in 0..self.cfg.run.iterations {
            if self.cancel.load(Ordering::Relaxed) {
                info!("cancel requested; stopping at iteration boundary");
                break;
            }
            self.step(start_iteration + offset)?;
        }
        self.result()
    }

    fn result(&self) -> Result<EvolutionResult, EngineError> {
        let best = self.population.best().ok_or(EngineError::EmptyPopulation)?;
        Ok(EvolutionResult {
            best_elite: best.clone(),
            best_score: self.rating.score(&best.ratings),
        })
    }

    fn seed_population(&mut self, seed_text: &str) {
        if self.population.total_len() > 0 {
            return;
        }
        let embedding = self.embeddings.embed(seed_text).as_ref().clone();
        let seed = Elite::new(seed_text, embedding, self.rating.new_ratings(), 0);
        match &mut self.population {
            Population::Pool(pool) => {
                pool.add(seed);
            }
            Population::Islands(islands) => {
                for archive in islands.iter_mut() {
                    archive.add(seed.clone());
                }
            }
        }
        if let Some(anchors) = &mut self.anchors {
            anchors.seed(seed_text, &self.rating);
        }
        if let Some(store) = &self.store {
            if let Err(err) = store.put_text(seed_text) {
                warn!(%err, "failed to persist seed text");
            }
        }
    }

    /// Resolves a text to its content id, persisting it when a store is
    /// attached.
    fn text_ref(&self, text: &str) -> String {
        match &self.store {
            Some(store) => store.put_text(text).unwrap_or_else(|err| {
                warn!(%err, "text store write failed");
                text_id(text)
            }),
            None => text_id(text),
        }
    }

    fn record(&mut self, iteration: usize, event: Event) {
        if let Some(store) = &self.store {
            if let Err(err) = store.append_event(iteration, &event) {
                warn!(%err, "event append failed");
            }
        }
        self.recorder.record(iteration, &event);
    }

    fn step(&mut self, iteration: usize) -> Result<(), EngineError> {
        let island = if self.population.island_count() > 1 {
            self.rng.gen_range_usize(0, self.population.island_count())
        } else {
            0
        };

        // One weight draw per iteration, shared by selection and any
        // score-ordered decisions downstream.
        if let Some(scalarizer) = &mut self.scalarizer {
            scalarizer.sample(&mut self.rng);
        }

        let Some(parent) = self
            .selector
            .select_parent(self.population.store_mut(island), self.scalarizer.as_ref())
        else {
            return Err(EngineError::EmptyPopulation);
        };
        let parent_id = self.text_ref(&parent.text);
        self.record(
            iteration,
            Event::StepStart {
                parent_text_id: parent_id.clone(),
                island,
            },
        );

        let critique = match &mut self.critic {
            Some(critic) => critic.critique(&parent),
            None => None,
        };
        if let Some(c) = &critique {
            let event = Event::Critique {
                summary: c.summary.clone(),
                issues: c.issues.clone(),
                routes: c.routes.clone(),
            };
            self.record(iteration, event);
        }

        let mut candidates = self.mutator.propose(
            &parent,
            critique.as_ref(),
            self.cfg.mutation.max_children,
            self.population.store(island),
            &self.executor,
        );
        {
            let store = self.population.store(island);
            candidates.retain(|c| c.text != parent.text && !store.contains_text(&c.text));
        }
        self.stats.mutations_proposed += candidates.len() as u64;

        let candidate_records: Vec<CandidateRecord> = candidates
            .iter()
            .map(|c| CandidateRecord {
                text_id: self.text_ref(&c.text),
                operator: c.operator.clone(),
                focus: c.focus.clone(),
            })
            .collect();
        self.record(
            iteration,
            Event::Candidates {
                candidates: candidate_records,
            },
        );

        if candidates.is_empty() {
            debug!(iteration, "no viable candidates; skipping step");
            return self.finish_iteration(iteration);
        }

        let children: Vec<Elite> = candidates
            .iter()
            .map(|c| {
                let embedding = self.embeddings.embed(&c.text).as_ref().clone();
                Elite {
                    text: c.text.clone(),
                    embedding,
                    ratings: self
                        .rating
                        .init_child_ratings(&parent.ratings, c.uncertainty_scale),
                    age: iteration,
                }
            })
            .collect();

        let edges: Vec<LineageEdge> = candidates
            .iter()
            .zip(children.iter())
            .map(|(c, child)| LineageEdge {
                parent_text_id: parent_id.clone(),
                child_text_id: self.text_ref(&child.text),
                operator: c.operator.clone(),
                role: self
                    .cfg
                    .mutation
                    .operators
                    .iter()
                    .find(|s| s.name == c.operator)
                    .map(|s| s.role.label().to_string())
                    .unwrap_or_default(),
                embedding_distance: cosine_distance(&parent.embedding, &child.embedding),
                uncertainty_scale: c.uncertainty_scale,
            })
            .collect();
        self.record(iteration, Event::Lineage { edges });

        let mut exclude: HashSet<String> =
            children.iter().map(|child| child.text.clone()).collect();
        exclude.insert(parent.text.clone());

        let picked_anchors = match &mut self.anchors {
            Some(manager) => manager.maybe_sample(&exclude),
            None => Vec::new(),
        };
        for anchor in &picked_anchors {
            exclude.insert(anchor.text.clone());
        }
        self.stats.anchors_injected_total += picked_anchors.len() as u64;

        let opponent_cfg = self.cfg.judging.opponent.clone();
        let opponent = if opponent_cfg.kind != OpponentKind::None
            && self.rng.gen_bool(opponent_cfg.probability)
        {
            pick_opponent(
                opponent_cfg.kind,
                &mut self.population,
                island,
                &parent,
                &exclude,
                &self.rating,
                opponent_cfg.top_k,
                opponent_cfg.farthest_k,
                &mut self.rng,
            )
        } else {
            None
        };
        if let Some(op) = &opponent {
            exclude.insert(op.text.clone());
        }

        let inspiration = if self.cfg.judging.include_inspirations {
            pick_inspirations(
                self.population.store(island),
                &parent,
                &self.rating,
                &mut self.rng,
                1,
            )
            .into_iter()
            .next()
            .map(|i| i.elite)
            .filter(|e| !exclude.contains(&e.text))
        } else {
            None
        };

        let mut battle = build_battle(
            parent.clone(),
            children,
            picked_anchors,
            opponent,
            inspiration,
            self.cfg.judging.max_battle_size,
            &mut self.rng,
        )?;
        if battle.size() < 2 {
            debug!(iteration, "battle too small; skipping admission");
            return self.finish_iteration(iteration);
        }
        self.stats.record_battle_size(battle.size());
        self.stats.children_judged += battle.judged_children().len() as u64;

        let participant_ids: Vec<String> = battle
            .participants()
            .iter()
            .map(|p| self.text_ref(p.text()))
            .collect();
        self.record(
            iteration,
            Event::Battle {
                participant_text_ids: participant_ids.clone(),
                judged_children: battle.judged_children().to_vec(),
                frozen_indices: battle.frozen_indices().iter().copied().collect(),
            },
        );

        self.stats.judge_calls_total += 1;
        let ranking = match self.ranker.rank(
            self.rating.metrics(),
            &battle,
            &self.cfg.metrics.descriptions,
        ) {
            Some(ranking) => ranking,
            None => {
                self.stats.judge_calls_failed += 1;
                return Err(EngineError::RankerFailed);
            }
        };
        self.record(
            iteration,
            Event::Ranking {
                tiers_by_metric: ranking.to_map(),
            },
        );

        let before: Vec<BTreeMap<String, Rating>> = battle
            .participants()
            .iter()
            .map(|p| self.rating.to_named(p.ratings()))
            .collect();
        let frozen = battle.frozen_indices().clone();
        {
            let refs: Vec<&mut Ratings> = battle
                .participants_mut()
                .iter_mut()
                .map(|c| c.ratings_mut())
                .collect();
            if let Err(err) = self.rating.apply_ranking(refs, &ranking, &frozen) {
                warn!(iteration, %err, "rating update failed; step recorded as failed");
                return self.finish_iteration(iteration);
            }
        }

        let entries: Vec<RatingsUpdateEntry> = battle
            .participants()
            .iter()
            .enumerate()
            .map(|(idx, p)| RatingsUpdateEntry {
                text_id: participant_ids[idx].clone(),
                frozen: frozen.contains(&idx),
                before: before[idx].clone(),
                after: self.rating.to_named(p.ratings()),
            })
            .collect();
        self.record(iteration, Event::RatingsUpdate { entries });

        self.admit_children(iteration, island, &battle);

        for &idx in battle.resort_elites() {
            let participant = &battle.participants()[idx];
            self.population
                .store_mut(island)
                .update_ratings(participant.text(), participant.ratings());
        }

        let migration = self.cfg.maintenance.migration.clone();
        if migration.interval > 0 && (iteration + 1) % migration.interval == 0 {
            self.migrate(migration.size);
        }
        let sparring_interval = self.cfg.maintenance.sparring.interval;
        if sparring_interval > 0 && (iteration + 1) % sparring_interval == 0 {
            self.spar(iteration)?;
        }

        if let Some(anchors) = &mut self.anchors {
            if let Some(best) = self.population.best() {
                anchors.maybe_add_ghost(best, iteration + 1);
            }
        }

        self.finish_iteration(iteration)
    }

    /// Children survive admission unless the archive-mode new-cell gate
    /// rejects them: a child opening a brand-new cell must score at
    /// least the parent's post-update score plus delta.
    fn admit_children(&mut self, iteration: usize, island: usize, battle: &Battle) {
        let parent_after = self.rating.score(battle.participants()[0].ratings());
        let gate = self.cfg.new_cell_gate.clone();

        let mut admitted: Vec<Elite> = Vec::new();
        let mut new_cell_flags: HashMap<String, bool> = HashMap::new();
        let mut gate_rejections: Vec<(String, Option<CellKey>)> = Vec::new();

        for &idx in battle.judged_children() {
            let Some(child) = battle.participants()[idx].as_member() else {
                continue;
            };
            let child = child.clone();
            if let Population::Islands(islands) = &self.population {
                let archive = &islands[island.min(islands.len() - 1)];
                let new_cell = archive.is_new_cell(&child.text);
                new_cell_flags.insert(child.text.clone(), new_cell);
                if new_cell && gate.kind == NewCellGateKind::ParentLcb {
                    let child_score = self.rating.score(&child.ratings);
                    if child_score < parent_after + gate.delta {
                        self.stats.children_rejected_new_cell_gate += 1;
                        gate_rejections
                            .push((child.text.clone(), archive.cell_key_for(&child.text)));
                        continue;
                    }
                }
            }
            admitted.push(child);
        }

        let delta = self.population.store_mut(island).add_many(admitted);
        self.stats.children_inserted += delta.inserted.len() as u64;

        let as_ids = |texts: &[String]| -> Vec<String> {
            texts.iter().map(|t| self.text_ref(t)).collect()
        };
        let pool_delta = Event::PoolDelta {
            inserted: as_ids(&delta.inserted),
            kept: as_ids(&delta.kept),
            removed: as_ids(&delta.removed),
            rejected: as_ids(&delta.rejected),
        };
        self.record(iteration, pool_delta);

        let mut archive_events: Vec<Event> = Vec::new();
        if let Population::Islands(islands) = &self.population {
            let archive = &islands[island.min(islands.len() - 1)];
            for text in &delta.inserted {
                if let Some(cell_key) = archive.cell_of(text).cloned() {
                    archive_events.push(Event::ArchiveAdd {
                        text_id: self.text_ref(text),
                        cell_key,
                        new_cell: new_cell_flags.get(text).copied().unwrap_or(false),
                        gate_passed: true,
                    });
                }
            }
            for (text, cell_key) in &gate_rejections {
                if let Some(cell_key) = cell_key.clone() {
                    archive_events.push(Event::ArchiveAdd {
                        text_id: self.text_ref(text),
                        cell_key,
                        new_cell: true,
                        gate_passed: false,
                    });
                }
            }
        }
        for event in archive_events {
            self.record(iteration, event);
        }
    }

    /// Clones `size` random members from each island into its right
    /// neighbour (ring topology).
    fn migrate(&mut self, size: usize) {
        let Some(islands) = self.population.as_islands_mut() else {
            return;
        };
        let n = islands.len();
        if n < 2 || size == 0 {
            return;
        }
        let mut moves: Vec<(usize, Vec<Elite>)> = Vec::with_capacity(n);
        for idx in 0..n {
            let migrants = islands[idx].sample(size);
            moves.push(((idx + 1) % n, migrants));
        }
        for (dst, migrants) in moves {
            for migrant in migrants {
                islands[dst].add(migrant);
            }
        }
        debug!("migration complete");
    }

    /// Round-robin of one representative per occupied cell across all
    /// islands, judged in one large battle.
    fn spar(&mut self, iteration: usize) -> Result<(), EngineError> {
        let mut cast: Vec<(usize, Elite)> = Vec::new();
        {
            let Some(islands) = self.population.as_islands_mut() else {
                return Ok(());
            };
            for (island_index, archive) in islands.iter_mut().enumerate() {
                for elite in archive.sample_one_per_cell() {
                    cast.push((island_index, elite));
                }
            }
        }
        if cast.len() < 2 {
            return Ok(());
        }
        info!(participants = cast.len(), "global sparring");

        let mut battle =
            Battle::all_members(cast.iter().map(|(_, elite)| elite.clone()).collect());
        self.stats.judge_calls_total += 1;
        let ranking = match self.ranker.rank(
            self.rating.metrics(),
            &battle,
            &self.cfg.metrics.descriptions,
        ) {
            Some(ranking) => ranking,
            None => {
                self.stats.judge_calls_failed += 1;
                return Err(EngineError::RankerFailed);
            }
        };
        {
            let frozen = battle.frozen_indices().clone();
            let refs: Vec<&mut Ratings> = battle
                .participants_mut()
                .iter_mut()
                .map(|c| c.ratings_mut())
                .collect();
            if let Err(err) = self.rating.apply_ranking(refs, &ranking, &frozen) {
                warn!(iteration, %err, "sparring rating update failed; skipped");
                return Ok(());
            }
        }

        let Some(islands) = self.population.as_islands_mut() else {
            return Ok(());
        };
        for ((island_index, _), participant) in cast.iter().zip(battle.participants()) {
            islands[*island_index].update_ratings(participant.text(), participant.ratings());
        }
        Ok(())
    }

    fn finish_iteration(&mut self, iteration: usize) -> Result<(), EngineError> {
        let (best_score, pool_size, empty_cells, mean_sigma, quantiles) = {
            let best_score = self
                .population
                .best()
                .map(|e| self.rating.score(&e.ratings))
                .unwrap_or(0.0);
            let pool_size = self.population.total_len();
            let empty_cells = self.population.empty_cells();
            let elites = self.population.all_elites();
            let mean_sigma = if elites.is_empty() {
                0.0
            } else {
                elites.iter().map(|e| e.ratings.mean_sigma()).sum::<f64>() / elites.len() as f64
            };
            let cap = DIVERSITY_SAMPLE_CAP.min(elites.len());
            let mut distances = Vec::with_capacity(cap * cap / 2);
            for i in 0..cap {
                for j in (i + 1)..cap {
                    distances.push(cosine_distance(&elites[i].embedding, &elites[j].embedding));
                }
            }
            let quantiles = (
                quantile(&distances, 0.1),
                quantile(&distances, 0.5),
                quantile(&distances, 0.9),
            );
            (best_score, pool_size, empty_cells, mean_sigma, quantiles)
        };

        self.record(
            iteration,
            Event::Iteration {
                best_score,
                pool_size,
                empty_cells,
            },
        );

        if let Some(store) = &self.store {
            let record = StatsRecord {
                iteration: iteration + 1,
                best_score,
                pool_size,
                empty_cells,
                mean_sigma,
                diversity_q10: quantiles.0,
                diversity_q50: quantiles.1,
                diversity_q90: quantiles.2,
                counters: self.stats.clone(),
            };
            if let Err(err) = store.append_stats(&record) {
                warn!(%err, "stats append failed");
            }
        }

        let log_interval = self.cfg.run.log_interval;
        if log_interval > 0 && (iteration + 1) % log_interval == 0 {
            info!(
                iteration = iteration + 1,
                best_score, pool_size, "iteration complete"
            );
        }

        let checkpoint_interval = self.cfg.run.checkpoint_interval;
        if checkpoint_interval > 0 && (iteration + 1) % checkpoint_interval == 0 {
            self.write_checkpoint(iteration + 1);
        }
        Ok(())
    }

    /// Checkpoint write failures are logged, never fatal.
    fn write_checkpoint(&mut self, next_iteration: usize) {
        let Some(store) = &self.store else {
            return;
        };
        let rating = &self.rating;
        let population = match &self.population {
            Population::Pool(pool) => PopulationDoc::Pool {
                members: pool
                    .members()
                    .iter()
                    .map(|e| member_doc(store, rating, e, None))
                    .collect(),
            },
            Population::Islands(islands) => PopulationDoc::Archive {
                islands: islands
                    .iter()
                    .map(|archive| IslandDoc {
                        elites: archive
                            .iter_cells()
                            .flat_map(|(key, bucket)| {
                                bucket
                                    .iter()
                                    .map(move |e| member_doc(store, rating, e, Some(key)))
                            })
                            .collect(),
                    })
                    .collect(),
            },
        };
        let anchors = match &self.anchors {
            Some(manager) => {
                let seed_text = manager.seed_anchor().map(|a| a.text.clone());
                manager
                    .anchors()
                    .iter()
                    .map(|anchor| AnchorDoc {
                        text_id: persist_text(store, &anchor.text),
                        ratings: self.rating.to_named(&anchor.ratings),
                        age: anchor.age,
                        frozen: true,
                        seed: Some(&anchor.text) == seed_text.as_ref(),
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        let doc = CheckpointDoc {
            next_iteration,
            population,
            anchors,
            rng: self.streams.seeds().clone(),
        };
        if let Err(err) = store.write_checkpoint(&doc) {
            warn!(%err, "checkpoint write failed");
        }
    }
}

fn persist_text(store: &RunStore, text: &str) -> String {
    store.put_text(text).unwrap_or_else(|err| {
        warn!(%err, "text store write failed");
        text_id(text)
    })
}

fn member_doc(
    store: &RunStore,
    rating: &RatingSystem,
    elite: &Elite,
    cell_key: Option<&CellKey>,
) -> MemberDoc {
    MemberDoc {
        text_id: persist_text(store, &elite.text),
        ratings: rating.to_named(&elite.ratings),
        age: elite.age,
        cell_key: cell_key.cloned(),
        embedding: Some(elite.embedding.to_vec()),
    }
}

/// Embedding service sized by the descriptor config.
pub fn build_embeddings(cfg: &Config) -> Arc<EmbeddingService> {
    Arc::new(EmbeddingService::hash_fallback(
        cfg.descriptor.embedding_2d.embedding_dim,
    ))
}

pub fn build_descriptor(
    cfg: &Config,
    embeddings: &Arc<EmbeddingService>,
) -> Arc<DescriptorSystem> {
    match cfg.descriptor.kind {
        DescriptorKind::Length => Arc::new(DescriptorSystem::length(
            cfg.descriptor.length_bins.clone(),
            Arc::clone(embeddings),
        )),
        DescriptorKind::Embedding2d => Arc::new(DescriptorSystem::embedding_2d(
            cfg.descriptor.embedding_2d.bins_x.clone(),
            cfg.descriptor.embedding_2d.bins_y.clone(),
            cfg.descriptor.embedding_2d.projection_seed,
            Arc::clone(embeddings),
        )),
    }
}

/// The population's scalar view: the rating system's LCB score.
pub fn score_fn_from(rating: &RatingSystem) -> ScoreFn {
    let rating = rating.clone();
    ScoreFn::new(move |ratings| rating.score(ratings))
}

pub fn build_population(
    cfg: &Config,
    rating: &RatingSystem,
    descriptor: &Arc<DescriptorSystem>,
    streams: &RngStreams,
) -> Population {
    let score = score_fn_from(rating);
    match cfg.population.kind {
        PopulationKind::Pool => {
            let strategy = match cfg.population.crowding.kind {
                CrowdingKind::ClosestPair => CrowdingStrategy::ClosestPair,
                CrowdingKind::KnnLocalCompetition => CrowdingStrategy::KnnLocalCompetition {
                    k: cfg.population.crowding.knn_k,
                },
            };
            Population::Pool(CrowdedPool::new(
                cfg.population.size,
                strategy,
                streams.archive(0),
                score,
            ))
        }
        PopulationKind::Archive => Population::Islands(
            (0..cfg.population.islands)
                .map(|island| {
                    MapElitesArchive::new(
                        Arc::clone(descriptor),
                        cfg.population.elites_per_cell,
                        streams.archive(island),
                        score.clone(),
                    )
                })
                .collect(),
        ),
    }
}

pub fn build_selector(
    cfg: &Config,
    streams: &RngStreams,
) -> Result<Box<dyn ParentSelector>, EngineError> {
    let mut builder = crate::selection::MixedParentSelectorBuilder::default()
        .tournament_size(cfg.selection.tournament_size)
        .ucb_beta(cfg.selection.ucb_beta)
        .temperature(cfg.selection.temperature)
        .rng(streams.selection());
    builder = match cfg.selection.kind {
        SelectionKind::Uniform => builder.uniform_probability(1.0),
        SelectionKind::Optimistic => builder
            .uniform_probability(cfg.selection.uniform_probability)
            .multi_metric(false),
        SelectionKind::ParetoScalarized => builder
            .uniform_probability(cfg.selection.uniform_probability)
            .multi_metric(true)
            .pareto(true),
    };
    builder
        .build()
        .map(|selector| Box::new(selector) as Box<dyn ParentSelector>)
        .map_err(|err| EngineError::Selector(err.to_string()))
}

/// Only the Pareto-scalarised selection mode needs a scalariser.
pub fn build_scalarizer(cfg: &Config) -> Result<Option<Scalarizer>, EngineError> {
    match cfg.selection.kind {
        SelectionKind::ParetoScalarized => Ok(Some(Scalarizer::new(
            &cfg.metrics.names,
            cfg.selection.dirichlet_alpha,
            cfg.selection.balanced_probability,
            true,
        )?)),
        _ => Ok(None),
    }
}

pub fn build_anchor_manager(
    cfg: &Config,
    embeddings: &Arc<EmbeddingService>,
    streams: &RngStreams,
) -> AnchorManager {
    AnchorManager::new(
        cfg.anchors.clone(),
        Arc::clone(embeddings),
        streams.anchors(),
    )
}

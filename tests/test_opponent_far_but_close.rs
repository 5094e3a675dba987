//! Far-but-close opponent selection, observed through a full engine
//! iteration: among the K farthest members by embedding distance, the
//! one with the best match quality against the parent joins the battle.
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use fuzzyevolve::battle::Battle;
use fuzzyevolve::config::{Config, OpponentKind};
use fuzzyevolve::elites::{Critique, Elite, MutationCandidate};
use fuzzyevolve::engine::{EvolutionEngine, build_embeddings, score_fn_from};
use fuzzyevolve::multiobjective::Scalarizer;
use fuzzyevolve::population::{
    CrowdedPool, CrowdingStrategy, Population, PopulationStore,
};
use fuzzyevolve::ports::{Mutator, Ranker};
use fuzzyevolve::random::RngStreams;
use fuzzyevolve::rating::{BattleRanking, Rating, RatingSystem, Ratings};
use fuzzyevolve::recorder::NoopRecorder;
use fuzzyevolve::selection::ParentSelector;
use ndarray::array;

#[derive(Debug)]
struct OneShotMutator {
    batches: VecDeque<Vec<MutationCandidate>>,
}

impl Mutator for OneShotMutator {
    fn propose(
        &mut self,
        _parent: &Elite,
        _critique: Option<&Critique>,
        _max_candidates: usize,
        _pool: &dyn PopulationStore,
        _executor: &rayon::ThreadPool,
    ) -> Vec<MutationCandidate> {
        self.batches.pop_front().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct CapturingRanker {
    battles: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Ranker for CapturingRanker {
    fn rank(
        &mut self,
        metrics: &[String],
        battle: &Battle,
        _metric_descriptions: &BTreeMap<String, String>,
    ) -> Option<BattleRanking> {
        self.battles
            .lock()
            .unwrap()
            .push(battle.texts().iter().map(|t| t.to_string()).collect());
        let mut tiers = vec![vec![0usize]];
        tiers.extend((1..battle.size()).map(|i| vec![i]));
        BattleRanking::uniform(metrics, tiers, battle.size()).ok()
    }
}

#[derive(Debug)]
struct AlwaysSeed;

impl ParentSelector for AlwaysSeed {
    fn select_parent(
        &mut self,
        pool: &mut dyn PopulationStore,
        _scalarizer: Option<&Scalarizer>,
    ) -> Option<Elite> {
        pool.elites().into_iter().find(|e| e.text == "seed").cloned()
    }
}

#[test]
fn test_far_but_close_opponent_prefers_skill_close_among_far() {
    let mut cfg = Config::default();
    cfg.run.iterations = 1;
    cfg.population.size = 10;
    cfg.metrics.names = vec!["m1".to_string()];
    cfg.judging.opponent.kind = OpponentKind::FarButClose;
    cfg.judging.opponent.probability = 1.0;
    cfg.judging.opponent.farthest_k = 2;
    cfg.anchors.ghost_interval = 0;
    // Hand-placed member embeddings below are 2-D; keep the hash
    // embedding for children in the same space.
    cfg.descriptor.embedding_2d.embedding_dim = 2;

    let streams = RngStreams::split(Some(0));
    let rating = RatingSystem::new(&cfg.metrics.names, cfg.rating.clone()).unwrap();
    let embeddings = build_embeddings(&cfg);

    // Hand-placed embeddings: both candidates are far from the parent,
    // but only "close_far" has ratings anywhere near the parent's.
    let mut pool = CrowdedPool::new(
        cfg.population.size,
        CrowdingStrategy::ClosestPair,
        streams.archive(0),
        score_fn_from(&rating),
    );
    pool.add(Elite::new(
        "seed",
        array![1.0, 0.0],
        rating.new_ratings(),
        0,
    ));
    pool.add(Elite::new(
        "close_far",
        array![0.0, 1.0],
        Ratings::from_values(vec![Rating::new(25.0, 8.333)]),
        0,
    ));
    pool.add(Elite::new(
        "far_bad",
        array![-1.0, 0.0],
        Ratings::from_values(vec![Rating::new(100.0, 8.333)]),
        0,
    ));

    let ranker = CapturingRanker::default();
    let battles = Arc::clone(&ranker.battles);

    let mut engine = EvolutionEngine::new(
        cfg.clone(),
        rating,
        Population::Pool(pool),
        embeddings,
        Box::new(AlwaysSeed),
        None,
        None,
        Box::new(OneShotMutator {
            batches: VecDeque::from([vec![MutationCandidate::new("child")]]),
        }),
        Box::new(ranker),
        None,
        Box::new(NoopRecorder),
        None,
        streams,
    )
    .unwrap();
    engine.run("seed").unwrap();

    let battles = battles.lock().unwrap();
    assert_eq!(battles.len(), 1);
    let texts: HashSet<&str> = battles[0].iter().map(|t| t.as_str()).collect();
    assert_eq!(texts, HashSet::from(["seed", "child", "close_far"]));
}

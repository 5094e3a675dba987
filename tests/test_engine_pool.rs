//! End-to-end iterations of the engine over a crowded pool, with
//! scripted oracle ports.
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fuzzyevolve::battle::Battle;
use fuzzyevolve::config::{Config, OpponentKind};
use fuzzyevolve::elites::{Critique, Elite, MutationCandidate};
use fuzzyevolve::engine::{
    EngineError, EvolutionEngine, build_anchor_manager, build_descriptor, build_embeddings,
    build_population, build_scalarizer, build_selector,
};
use fuzzyevolve::multiobjective::Scalarizer;
use fuzzyevolve::population::PopulationStore;
use fuzzyevolve::ports::{Mutator, Ranker};
use fuzzyevolve::random::RngStreams;
use fuzzyevolve::rating::{BattleRanking, RatingSystem};
use fuzzyevolve::recorder::{Event, Recorder};
use fuzzyevolve::selection::ParentSelector;

#[derive(Debug)]
struct QueueMutator {
    queue: VecDeque<Vec<MutationCandidate>>,
}

impl QueueMutator {
    fn new(batches: Vec<Vec<&str>>) -> Self {
        Self {
            queue: batches
                .into_iter()
                .map(|batch| batch.into_iter().map(MutationCandidate::new).collect())
                .collect(),
        }
    }
}

impl Mutator for QueueMutator {
    fn propose(
        &mut self,
        _parent: &Elite,
        _critique: Option<&Critique>,
        _max_candidates: usize,
        _pool: &dyn PopulationStore,
        _executor: &rayon::ThreadPool,
    ) -> Vec<MutationCandidate> {
        self.queue.pop_front().unwrap_or_default()
    }
}

/// Ranks the parent first and everything else in listed order; counts
/// calls and captures each battle's texts.
#[derive(Debug, Default)]
struct RecordingRanker {
    calls: Arc<AtomicUsize>,
    battles: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Ranker for RecordingRanker {
    fn rank(
        &mut self,
        metrics: &[String],
        battle: &Battle,
        _metric_descriptions: &BTreeMap<String, String>,
    ) -> Option<BattleRanking> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.battles
            .lock()
            .unwrap()
            .push(battle.texts().iter().map(|t| t.to_string()).collect());
        let mut tiers = vec![vec![0usize]];
        tiers.extend((1..battle.size()).map(|i| vec![i]));
        BattleRanking::uniform(metrics, tiers, battle.size()).ok()
    }
}

#[derive(Debug, Default, Clone)]
struct SharedRecorder {
    events: Arc<Mutex<Vec<(usize, Event)>>>,
}

impl Recorder for SharedRecorder {
    fn record(&mut self, iteration: usize, event: &Event) {
        self.events.lock().unwrap().push((iteration, event.clone()));
    }
}

/// Deterministic selector: picks members by text, in order.
#[derive(Debug)]
struct PickByText {
    queue: VecDeque<String>,
}

impl ParentSelector for PickByText {
    fn select_parent(
        &mut self,
        pool: &mut dyn PopulationStore,
        _scalarizer: Option<&Scalarizer>,
    ) -> Option<Elite> {
        let text = self.queue.pop_front()?;
        pool.elites().into_iter().find(|e| e.text == text).cloned()
    }
}

fn base_cfg(iterations: usize) -> Config {
    let mut cfg = Config::default();
    cfg.run.iterations = iterations;
    cfg.population.size = 10;
    cfg.metrics.names = vec!["m1".to_string()];
    cfg.judging.opponent.kind = OpponentKind::None;
    cfg.anchors.ghost_interval = 0;
    cfg
}

fn make_engine(
    cfg: Config,
    mutator: QueueMutator,
    ranker: RecordingRanker,
    recorder: SharedRecorder,
    selector: Option<PickByText>,
    with_anchors: bool,
) -> EvolutionEngine {
    let streams = RngStreams::split(Some(0));
    let rating = RatingSystem::new(&cfg.metrics.names, cfg.rating.clone()).unwrap();
    let embeddings = build_embeddings(&cfg);
    let descriptor = build_descriptor(&cfg, &embeddings);
    let population = build_population(&cfg, &rating, &descriptor, &streams);
    let selector: Box<dyn ParentSelector> = match selector {
        Some(s) => Box::new(s),
        None => build_selector(&cfg, &streams).unwrap(),
    };
    let scalarizer = build_scalarizer(&cfg).unwrap();
    let anchors = with_anchors.then(|| build_anchor_manager(&cfg, &embeddings, &streams));
    EvolutionEngine::new(
        cfg,
        rating,
        population,
        embeddings,
        selector,
        scalarizer,
        None,
        Box::new(mutator),
        Box::new(ranker),
        anchors,
        Box::new(recorder),
        None,
        streams,
    )
    .unwrap()
}

#[test]
fn test_single_iteration_judges_parent_and_children() {
    let ranker = RecordingRanker::default();
    let calls = Arc::clone(&ranker.calls);
    let battles = Arc::clone(&ranker.battles);

    let mut engine = make_engine(
        base_cfg(1),
        QueueMutator::new(vec![vec!["child1", "child2"]]),
        ranker,
        SharedRecorder::default(),
        None,
        false,
    );
    engine.run("seed").unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let battles = battles.lock().unwrap();
    let texts: std::collections::HashSet<&str> =
        battles[0].iter().map(|t| t.as_str()).collect();
    assert_eq!(
        texts,
        std::collections::HashSet::from(["seed", "child1", "child2"])
    );

    let population = engine.population();
    assert_eq!(population.total_len(), 3);
    for text in ["seed", "child1", "child2"] {
        assert!(population.contains_text(text));
    }
}

#[test]
fn test_duplicate_children_never_reach_the_ranker() {
    let ranker = RecordingRanker::default();
    let calls = Arc::clone(&ranker.calls);

    let mut engine = make_engine(
        base_cfg(2),
        QueueMutator::new(vec![vec!["dup"], vec!["dup", "dup"]]),
        ranker,
        SharedRecorder::default(),
        None,
        false,
    );
    engine.run("seed").unwrap();

    // Second iteration's candidates all collapse into existing texts,
    // so only the first iteration judged anything.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.population().total_len(), 2);
}

#[test]
fn test_event_stream_follows_causal_order() {
    let recorder = SharedRecorder::default();
    let events = Arc::clone(&recorder.events);

    let mut engine = make_engine(
        base_cfg(1),
        QueueMutator::new(vec![vec!["child1"]]),
        RecordingRanker::default(),
        recorder,
        None,
        false,
    );
    engine.run("seed").unwrap();

    let kinds: Vec<&'static str> = events
        .lock()
        .unwrap()
        .iter()
        .map(|(_, e)| e.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "step_start",
            "candidates",
            "lineage",
            "battle",
            "ranking",
            "ratings_update",
            "pool_delta",
            "iteration",
        ]
    );
}

#[test]
fn test_anchor_ratings_stay_byte_identical() {
    let recorder = SharedRecorder::default();
    let events = Arc::clone(&recorder.events);

    let mut cfg = base_cfg(2);
    cfg.anchors.injection_probability = 1.0;
    cfg.anchors.max_per_battle = 1;

    // Parent "seed" first (its own anchor twin is excluded), then
    // "child1" so the seed anchor can join the second battle.
    let selector = PickByText {
        queue: VecDeque::from(["seed".to_string(), "child1".to_string()]),
    };
    let mut engine = make_engine(
        cfg,
        QueueMutator::new(vec![vec!["child1"], vec!["child2"]]),
        RecordingRanker::default(),
        recorder,
        Some(selector),
        true,
    );
    engine.run("seed").unwrap();

    let events = events.lock().unwrap();
    let frozen_entries: Vec<_> = events
        .iter()
        .filter_map(|(_, e)| match e {
            Event::RatingsUpdate { entries } => Some(entries),
            _ => None,
        })
        .flatten()
        .filter(|entry| entry.frozen)
        .collect();
    assert!(
        !frozen_entries.is_empty(),
        "expected at least one frozen battle participant"
    );
    for entry in frozen_entries {
        assert_eq!(entry.before, entry.after);
    }
}

#[test]
fn test_empty_seed_is_rejected() {
    let mut engine = make_engine(
        base_cfg(1),
        QueueMutator::new(vec![]),
        RecordingRanker::default(),
        SharedRecorder::default(),
        None,
        false,
    );
    assert!(matches!(engine.run("   "), Err(EngineError::EmptySeed)));
}

#[test]
fn test_cancel_stops_at_iteration_boundary() {
    let ranker = RecordingRanker::default();
    let calls = Arc::clone(&ranker.calls);

    let mut engine = make_engine(
        base_cfg(5),
        QueueMutator::new(vec![vec!["child1"]]),
        ranker,
        SharedRecorder::default(),
        None,
        false,
    );
    engine.cancel_handle().store(true, Ordering::SeqCst);
    let result = engine.run("seed").unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.best_elite.text, "seed");
    assert_eq!(engine.population().total_len(), 1);
}

#[test]
fn test_child_age_matches_admission_iteration() {
    let mut engine = make_engine(
        base_cfg(2),
        QueueMutator::new(vec![vec!["early"], vec!["late"]]),
        RecordingRanker::default(),
        SharedRecorder::default(),
        None,
        false,
    );
    engine.run("seed").unwrap();

    let population = engine.population();
    let age_of = |text: &str| {
        population
            .all_elites()
            .into_iter()
            .find(|e| e.text == text)
            .map(|e| e.age)
    };
    assert_eq!(age_of("early"), Some(0));
    assert_eq!(age_of("late"), Some(1));
    assert_eq!(age_of("seed"), Some(0));
}

#[derive(Debug)]
struct CannedCritic;

impl fuzzyevolve::ports::Critic for CannedCritic {
    fn critique(&mut self, _parent: &Elite) -> Option<Critique> {
        Some(Critique {
            summary: "solid but wordy".to_string(),
            issues: vec!["trim the intro".to_string()],
            routes: vec!["try a terser register".to_string()],
            ..Critique::default()
        })
    }
}

#[test]
fn test_critique_event_precedes_candidates() {
    let recorder = SharedRecorder::default();
    let events = Arc::clone(&recorder.events);

    let cfg = base_cfg(1);
    let streams = RngStreams::split(Some(0));
    let rating = RatingSystem::new(&cfg.metrics.names, cfg.rating.clone()).unwrap();
    let embeddings = build_embeddings(&cfg);
    let descriptor = build_descriptor(&cfg, &embeddings);
    let population = build_population(&cfg, &rating, &descriptor, &streams);
    let selector = build_selector(&cfg, &streams).unwrap();
    let mut engine = EvolutionEngine::new(
        cfg,
        rating,
        population,
        embeddings,
        selector,
        None,
        Some(Box::new(CannedCritic)),
        Box::new(QueueMutator::new(vec![vec!["child1"]])),
        Box::new(RecordingRanker::default()),
        None,
        Box::new(recorder),
        None,
        streams,
    )
    .unwrap();
    engine.run("seed").unwrap();

    let kinds: Vec<&'static str> = events
        .lock()
        .unwrap()
        .iter()
        .map(|(_, e)| e.kind())
        .collect();
    assert_eq!(&kinds[..3], &["step_start", "critique", "candidates"]);
    let events = events.lock().unwrap();
    let critique = events.iter().find_map(|(_, e)| match e {
        Event::Critique { routes, .. } => Some(routes.clone()),
        _ => None,
    });
    assert_eq!(critique, Some(vec!["try a terser register".to_string()]));
}

#[test]
fn test_pool_never_exceeds_capacity() {
    let mut cfg = base_cfg(6);
    cfg.population.size = 3;
    let batches = (0..6)
        .map(|i| vec![format!("child{i}")])
        .collect::<Vec<_>>();
    let mut engine = make_engine(
        cfg,
        QueueMutator {
            queue: batches
                .into_iter()
                .map(|b| b.into_iter().map(MutationCandidate::new).collect())
                .collect(),
        },
        RecordingRanker::default(),
        SharedRecorder::default(),
        None,
        false,
    );
    engine.run("seed").unwrap();
    assert!(engine.population().total_len() <= 3);
}

//! # `population` – Quality-Diverse Stores
//!
//! Two interchangeable population implementations share one consumer
//! contract ([`PopulationStore`]):
//!
//! | Store | Diversity mechanism | Capacity rule |
//! |-------|--------------------|---------------|
//! | [`CrowdedPool`] | embedding-space crowding (closest-pair or kNN local competition) | fixed `max_size` |
//! | [`MapElitesArchive`] | descriptor-space cells | top-k per cell |
//!
//! Both stores dedup by text, own their RNG stream, and score members
//! through an injected [`ScoreFn`] so the rating subsystem stays the
//! single source of truth for "better".
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use ordered_float::OrderedFloat;

use crate::elites::Elite;
use crate::helpers::linalg::cosine_distance;
use crate::rating::Ratings;

pub mod archive;
pub mod pool;

pub use archive::MapElitesArchive;
pub use pool::{CrowdedPool, CrowdingStrategy};

/// Scalarises a rating vector; injected into stores at construction so
/// crowding and champion queries agree with the engine's scoring.
#[derive(Clone)]
pub struct ScoreFn(Arc<dyn Fn(&Ratings) -> f64 + Send + Sync>);

impl ScoreFn {
    pub fn new(f: impl Fn(&Ratings) -> f64 + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn score(&self, ratings: &Ratings) -> f64 {
        (self.0)(ratings)
    }
}

impl fmt::Debug for ScoreFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScoreFn(..)")
    }
}

/// Result of a single admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Admitted; `removed` lists members evicted to make room.
    Inserted { removed: Vec<String> },
    /// The text is already a member; silent no-op.
    Duplicate,
    /// Lost its local competition (or had no valid cell) and was dropped.
    Rejected,
}

/// Aggregated admission outcome for a batch, in event-log form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolDelta {
    pub inserted: Vec<String>,
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    pub rejected: Vec<String>,
}

impl PoolDelta {
    fn absorb(&mut self, text: &str, outcome: AddOutcome) {
        match outcome {
            AddOutcome::Inserted { removed } => {
                self.inserted.push(text.to_string());
                self.removed.extend(removed);
            }
            AddOutcome::Duplicate => self.kept.push(text.to_string()),
            AddOutcome::Rejected => self.rejected.push(text.to_string()),
        }
    }
}

/// The consumer contract shared by both stores.  Object-safe: the
/// engine, selector and mutation planner all work against
/// `&mut dyn PopulationStore`.
pub trait PopulationStore: fmt::Debug {
    fn add(&mut self, elite: Elite) -> AddOutcome;

    fn add_many(&mut self, elites: Vec<Elite>) -> PoolDelta {
        let mut delta = PoolDelta::default();
        for elite in elites {
            let text = elite.text.clone();
            let outcome = self.add(elite);
            delta.absorb(&text, outcome);
        }
        delta
    }

    fn contains_text(&self, text: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every member exactly once.
    fn elites(&self) -> Vec<&Elite>;

    /// Uniform random member (cloned snapshot).
    fn random_elite(&mut self) -> Option<Elite>;

    /// Up to `k` distinct members, uniformly.
    fn sample(&mut self, k: usize) -> Vec<Elite>;

    /// The member maximising the injected score.
    fn best(&self) -> Option<&Elite>;

    /// Member maximising cosine distance to `parent`'s embedding.
    fn farthest_from(&self, parent: &Elite, exclude_texts: &HashSet<String>) -> Option<Elite> {
        farthest_ranked(&self.elites(), parent, exclude_texts)
            .first()
            .map(|(_, elite)| (*elite).clone())
    }

    /// Writes updated ratings back into the member with `text` and does
    /// any re-sort bookkeeping.  Returns false if no such member.
    fn update_ratings(&mut self, text: &str, ratings: &Ratings) -> bool;

    /// The injected score, exposed for consumers that order members.
    fn score_of(&self, ratings: &Ratings) -> f64;
}

/// The engine's population in one of its two modes.  Archive mode may
/// run several islands; pool mode is always a single store.
#[derive(Debug)]
pub enum Population {
    Pool(CrowdedPool),
    Islands(Vec<MapElitesArchive>),
}

impl Population {
    pub fn island_count(&self) -> usize {
        match self {
            Population::Pool(_) => 1,
            Population::Islands(islands) => islands.len(),
        }
    }

    pub fn store_mut(&mut self, island: usize) -> &mut dyn PopulationStore {
        match self {
            Population::Pool(pool) => pool,
            Population::Islands(islands) => {
                let idx = island.min(islands.len().saturating_sub(1));
                &mut islands[idx]
            }
        }
    }

    pub fn store(&self, island: usize) -> &dyn PopulationStore {
        match self {
            Population::Pool(pool) => pool,
            Population::Islands(islands) => {
                let idx = island.min(islands.len().saturating_sub(1));
                &islands[idx]
            }
        }
    }

    pub fn as_islands_mut(&mut self) -> Option<&mut Vec<MapElitesArchive>> {
        match self {
            Population::Pool(_) => None,
            Population::Islands(islands) => Some(islands),
        }
    }

    pub fn total_len(&self) -> usize {
        match self {
            Population::Pool(pool) => pool.len(),
            Population::Islands(islands) => islands.iter().map(|a| a.len()).sum(),
        }
    }

    pub fn contains_text(&self, text: &str) -> bool {
        match self {
            Population::Pool(pool) => pool.contains_text(text),
            Population::Islands(islands) => islands.iter().any(|a| a.contains_text(text)),
        }
    }

    /// Best member across every island.
    pub fn best(&self) -> Option<&Elite> {
        match self {
            Population::Pool(pool) => pool.best(),
            Population::Islands(islands) => islands
                .iter()
                .filter_map(|archive| archive.best().map(|e| (archive.score_of(&e.ratings), e)))
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(_, e)| e),
        }
    }

    /// Total empty cells across islands; `None` in pool mode.
    pub fn empty_cells(&self) -> Option<usize> {
        match self {
            Population::Pool(_) => None,
            Population::Islands(islands) => {
                Some(islands.iter().map(|a| a.empty_cells()).sum())
            }
        }
    }

    /// Every member of every island (texts may repeat across islands).
    pub fn all_elites(&self) -> Vec<&Elite> {
        match self {
            Population::Pool(pool) => pool.elites(),
            Population::Islands(islands) => {
                islands.iter().flat_map(|a| a.elites()).collect()
            }
        }
    }
}

/// Members ranked by descending cosine distance from `parent`,
/// excluding the parent itself and `exclude_texts`.  Ties break by text
/// so ordering is deterministic.
pub fn farthest_ranked<'a>(
    elites: &[&'a Elite],
    parent: &Elite,
    exclude_texts: &HashSet<String>,
) -> Vec<(f64, &'a Elite)> {
    let mut ranked: Vec<(f64, &Elite)> = elites
        .iter()
        .filter(|e| e.text != parent.text && !exclude_texts.contains(&e.text))
        .map(|e| (cosine_distance(&parent.embedding, &e.embedding), *e))
        .collect();
    ranked.sort_by(|a, b| {
        OrderedFloat(b.0)
            .cmp(&OrderedFloat(a.0))
            .then_with(|| a.1.text.cmp(&b.1.text))
    });
    ranked
}

//! MAP-Elites archive: cells keyed by descriptor axes, top-k per cell.
//!
//! The archive never stores descriptor values on the member itself; the
//! text → cell mapping is a sidecar index owned here, and cell keys are
//! recomputed from the descriptor system on admission.  Buckets stay
//! sorted best-first, so the champion of a cell is always `bucket[0]`.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ordered_float::OrderedFloat;
use tracing::warn;

use crate::descriptor::{CellKey, DescriptorSystem};
use crate::elites::Elite;
use crate::population::{AddOutcome, PopulationStore, ScoreFn};
use crate::random::{EvoRandomGenerator, RandomGenerator};
use crate::rating::Ratings;

#[derive(Debug)]
pub struct MapElitesArchive {
    descriptor: Arc<DescriptorSystem>,
    elites_per_cell: usize,
    cells: BTreeMap<CellKey, Vec<Elite>>,
    index: HashMap<String, CellKey>,
    total_cells: usize,
    rng: EvoRandomGenerator,
    score_fn: ScoreFn,
}

impl MapElitesArchive {
    pub fn new(
        descriptor: Arc<DescriptorSystem>,
        elites_per_cell: usize,
        rng: EvoRandomGenerator,
        score_fn: ScoreFn,
    ) -> Self {
        assert!(
            elites_per_cell > 0,
            "MapElitesArchive elites_per_cell must be positive"
        );
        let total_cells = descriptor.space().total_cells();
        Self {
            descriptor,
            elites_per_cell,
            cells: BTreeMap::new(),
            index: HashMap::new(),
            total_cells,
            rng,
            score_fn,
        }
    }

    pub fn total_cells(&self) -> usize {
        self.total_cells
    }

    pub fn empty_cells(&self) -> usize {
        self.total_cells.saturating_sub(self.cells.len())
    }

    pub fn elites_per_cell(&self) -> usize {
        self.elites_per_cell
    }

    /// Would this text land in a currently-empty cell?
    pub fn is_new_cell(&self, text: &str) -> bool {
        match self.descriptor.cell_key_for(text) {
            Ok(key) => !self.cells.contains_key(&key),
            Err(_) => false,
        }
    }

    pub fn cell_of(&self, text: &str) -> Option<&CellKey> {
        self.index.get(text)
    }

    /// The cell a text would land in, member or not.
    pub fn cell_key_for(&self, text: &str) -> Option<CellKey> {
        self.descriptor.cell_key_for(text).ok()
    }

    pub fn iter_cells(&self) -> impl Iterator<Item = (&CellKey, &[Elite])> {
        self.cells.iter().map(|(key, bucket)| (key, bucket.as_slice()))
    }

    /// The best member of a cell, if occupied.
    pub fn champion(&self, key: &CellKey) -> Option<&Elite> {
        self.cells.get(key).and_then(|bucket| bucket.first())
    }

    /// One uniformly drawn member per occupied cell (for sparring).
    pub fn sample_one_per_cell(&mut self) -> Vec<Elite> {
        let picks: Vec<(CellKey, usize)> = self
            .cells
            .iter()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(key, bucket)| (key.clone(), bucket.len()))
            .collect();
        picks
            .into_iter()
            .map(|(key, len)| {
                let idx = self.rng.gen_range_usize(0, len);
                self.cells[&key][idx].clone()
            })
            .collect()
    }

    fn score(&self, elite: &Elite) -> f64 {
        self.score_fn.score(&elite.ratings)
    }

    fn sort_bucket(score_fn: &ScoreFn, bucket: &mut [Elite]) {
        bucket.sort_by(|a, b| {
            OrderedFloat(score_fn.score(&b.ratings))
                .cmp(&OrderedFloat(score_fn.score(&a.ratings)))
                .then_with(|| a.text.cmp(&b.text))
        });
    }
}

impl PopulationStore for MapElitesArchive {
    fn add(&mut self, elite: Elite) -> AddOutcome {
        if self.index.contains_key(&elite.text) {
            return AddOutcome::Duplicate;
        }
        let key = match self.descriptor.cell_key_for(&elite.text) {
            Ok(key) => key,
            Err(err) => {
                warn!(text_len = elite.text.len(), %err, "dropping elite with no valid cell");
                return AddOutcome::Rejected;
            }
        };
        let text = elite.text.clone();
        let bucket = self.cells.entry(key.clone()).or_default();
        bucket.push(elite);
        Self::sort_bucket(&self.score_fn, bucket);

        let mut removed = Vec::new();
        while bucket.len() > self.elites_per_cell {
            let evicted = bucket.pop().expect("bucket cannot be empty here");
            removed.push(evicted.text);
        }
        for evicted in &removed {
            self.index.remove(evicted);
        }
        if removed.iter().any(|t| *t == text) {
            return AddOutcome::Rejected;
        }
        self.index.insert(text, key);
        AddOutcome::Inserted { removed }
    }

    fn contains_text(&self, text: &str) -> bool {
        self.index.contains_key(text)
    }

    fn len(&self) -> usize {
        self.cells.values().map(|bucket| bucket.len()).sum()
    }

    fn elites(&self) -> Vec<&Elite> {
        self.cells.values().flatten().collect()
    }

    fn random_elite(&mut self) -> Option<Elite> {
        let keys: Vec<CellKey> = self
            .cells
            .iter()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        if keys.is_empty() {
            return None;
        }
        let key = &keys[self.rng.gen_range_usize(0, keys.len())];
        let bucket = &self.cells[key];
        let idx = self.rng.gen_range_usize(0, bucket.len());
        Some(bucket[idx].clone())
    }

    fn sample(&mut self, k: usize) -> Vec<Elite> {
        let all: Vec<Elite> = self.cells.values().flatten().cloned().collect();
        let picked = self.rng.sample_indices(all.len(), k);
        picked.into_iter().map(|i| all[i].clone()).collect()
    }

    fn best(&self) -> Option<&Elite> {
        self.cells.values().flatten().max_by(|a, b| {
            OrderedFloat(self.score(a))
                .cmp(&OrderedFloat(self.score(b)))
                .then_with(|| b.text.cmp(&a.text))
        })
    }

    fn update_ratings(&mut self, text: &str, ratings: &Ratings) -> bool {
        let Some(key) = self.index.get(text).cloned() else {
            return false;
        };
        let score_fn = self.score_fn.clone();
        let Some(bucket) = self.cells.get_mut(&key) else {
            return false;
        };
        let Some(member) = bucket.iter_mut().find(|e| e.text == text) else {
            return false;
        };
        member.ratings = ratings.clone();
        Self::sort_bucket(&score_fn, bucket);
        true
    }

    fn score_of(&self, ratings: &Ratings) -> f64 {
        self.score_fn.score(ratings)
    }
}

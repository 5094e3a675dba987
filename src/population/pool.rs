//! Fixed-size pool with embedding-based crowding.
//!
//! Admission never breaks the size bound observably: a batch add runs
//! crowding until the pool is back at or under `max_size`.  Which member
//! gives way is decided purely in embedding space + score, so the pool
//! keeps spread-out, high-scoring texts and resolves near-duplicates.
use std::collections::HashMap;

use ordered_float::OrderedFloat;

use crate::elites::Elite;
use crate::helpers::linalg::cosine_distance;
use crate::population::{AddOutcome, PopulationStore, ScoreFn};
use crate::random::{EvoRandomGenerator, RandomGenerator};
use crate::rating::Ratings;

/// Crowding policy; exactly one per pool instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrowdingStrategy {
    /// Repeatedly drop the lower-scoring member of the closest pair
    /// until the pool fits.
    ClosestPair,
    /// An incoming candidate competes against the worst of its `k`
    /// nearest neighbours; it replaces that neighbour or is dropped.
    KnnLocalCompetition { k: usize },
}

#[derive(Debug)]
pub struct CrowdedPool {
    max_size: usize,
    strategy: CrowdingStrategy,
    members: Vec<Elite>,
    index: HashMap<String, usize>,
    rng: EvoRandomGenerator,
    score_fn: ScoreFn,
}

impl CrowdedPool {
    pub fn new(
        max_size: usize,
        strategy: CrowdingStrategy,
        rng: EvoRandomGenerator,
        score_fn: ScoreFn,
    ) -> Self {
        assert!(max_size > 0, "CrowdedPool max_size must be positive");
        Self {
            max_size,
            strategy,
            members: Vec::with_capacity(max_size + 1),
            index: HashMap::new(),
            rng,
            score_fn,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn members(&self) -> &[Elite] {
        &self.members
    }

    fn score(&self, elite: &Elite) -> f64 {
        self.score_fn.score(&elite.ratings)
    }

    fn insert_unchecked(&mut self, elite: Elite) {
        self.index.insert(elite.text.clone(), self.members.len());
        self.members.push(elite);
    }

    fn remove_at(&mut self, position: usize) -> Elite {
        let removed = self.members.swap_remove(position);
        self.index.remove(&removed.text);
        if position < self.members.len() {
            self.index
                .insert(self.members[position].text.clone(), position);
        }
        removed
    }

    /// Closest-pair elimination until the pool fits.  Pair selection
    /// ties break toward the pair whose weaker member scores lower;
    /// within the pair the lower score loses, then text order decides.
    fn crowd_to_capacity(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        while self.members.len() > self.max_size {
            let n = self.members.len();
            let mut best_pair: Option<(usize, usize, f64, f64)> = None;
            for i in 0..n {
                for j in (i + 1)..n {
                    let dist =
                        cosine_distance(&self.members[i].embedding, &self.members[j].embedding);
                    let weaker = self.score(&self.members[i]).min(self.score(&self.members[j]));
                    let better = match best_pair {
                        None => true,
                        Some((_, _, best_dist, best_weaker)) => {
                            dist < best_dist - 1e-12
                                || ((dist - best_dist).abs() <= 1e-12 && weaker < best_weaker)
                        }
                    };
                    if better {
                        best_pair = Some((i, j, dist, weaker));
                    }
                }
            }
            let Some((i, j, _, _)) = best_pair else { break };
            let (score_i, score_j) = (self.score(&self.members[i]), self.score(&self.members[j]));
            let loser = if score_i < score_j {
                i
            } else if score_j < score_i {
                j
            } else if self.members[i].text > self.members[j].text {
                i
            } else {
                j
            };
            removed.push(self.remove_at(loser).text);
        }
        removed
    }

    /// kNN local competition for one candidate against a full pool.
    fn knn_compete(&mut self, elite: Elite, k: usize) -> AddOutcome {
        let candidate_score = self.score(&elite);
        let mut neighbours: Vec<(f64, usize)> = self
            .members
            .iter()
            .enumerate()
            .map(|(idx, member)| {
                (
                    cosine_distance(&elite.embedding, &member.embedding),
                    idx,
                )
            })
            .collect();
        neighbours.sort_by(|a, b| {
            OrderedFloat(a.0)
                .cmp(&OrderedFloat(b.0))
                .then_with(|| self.members[a.1].text.cmp(&self.members[b.1].text))
        });
        neighbours.truncate(k.max(1));

        // Worst neighbour; equal scores break by text for determinism.
        let worst = neighbours
            .iter()
            .map(|&(_, idx)| idx)
            .min_by(|&a, &b| {
                OrderedFloat(self.score(&self.members[a]))
                    .cmp(&OrderedFloat(self.score(&self.members[b])))
                    .then_with(|| self.members[a].text.cmp(&self.members[b].text))
            });
        let Some(worst) = worst else {
            return AddOutcome::Rejected;
        };
        if candidate_score > self.score(&self.members[worst]) {
            let evicted = self.remove_at(worst).text;
            self.insert_unchecked(elite);
            AddOutcome::Inserted {
                removed: vec![evicted],
            }
        } else {
            AddOutcome::Rejected
        }
    }
}

impl PopulationStore for CrowdedPool {
    fn add(&mut self, elite: Elite) -> AddOutcome {
        if self.index.contains_key(&elite.text) {
            return AddOutcome::Duplicate;
        }
        match self.strategy {
            CrowdingStrategy::ClosestPair => {
                let text = elite.text.clone();
                self.insert_unchecked(elite);
                let removed = self.crowd_to_capacity();
                if removed.iter().any(|t| *t == text) {
                    AddOutcome::Rejected
                } else {
                    AddOutcome::Inserted { removed }
                }
            }
            CrowdingStrategy::KnnLocalCompetition { k } => {
                if self.members.len() < self.max_size {
                    self.insert_unchecked(elite);
                    AddOutcome::Inserted { removed: vec![] }
                } else {
                    self.knn_compete(elite, k)
                }
            }
        }
    }

    fn contains_text(&self, text: &str) -> bool {
        self.index.contains_key(text)
    }

    fn len(&self) -> usize {
        self.members.len()
    }

    fn elites(&self) -> Vec<&Elite> {
        self.members.iter().collect()
    }

    fn random_elite(&mut self) -> Option<Elite> {
        if self.members.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range_usize(0, self.members.len());
        Some(self.members[idx].clone())
    }

    fn sample(&mut self, k: usize) -> Vec<Elite> {
        let picked = self.rng.sample_indices(self.members.len(), k);
        picked.into_iter().map(|i| self.members[i].clone()).collect()
    }

    fn best(&self) -> Option<&Elite> {
        self.members.iter().max_by(|a, b| {
            OrderedFloat(self.score(a))
                .cmp(&OrderedFloat(self.score(b)))
                .then_with(|| b.text.cmp(&a.text))
        })
    }

    fn update_ratings(&mut self, text: &str, ratings: &Ratings) -> bool {
        match self.index.get(text) {
            Some(&idx) => {
                self.members[idx].ratings = ratings.clone();
                true
            }
            None => false,
        }
    }

    fn score_of(&self, ratings: &Ratings) -> f64 {
        self.score_fn.score(ratings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::Rating;
    use ndarray::array;
    use std::collections::HashSet;

    fn score_by_mu() -> ScoreFn {
        ScoreFn::new(|r: &Ratings| r.get(0).map(|v| v.mu).unwrap_or(0.0))
    }

    fn elite(text: &str, mu: f64, embedding: ndarray::Array1<f64>) -> Elite {
        Elite::new(
            text,
            embedding,
            Ratings::from_values(vec![Rating::new(mu, 1.0)]),
            0,
        )
    }

    fn pool(max_size: usize, strategy: CrowdingStrategy) -> CrowdedPool {
        CrowdedPool::new(
            max_size,
            strategy,
            EvoRandomGenerator::new_from_seed(Some(0)),
            score_by_mu(),
        )
    }

    #[test]
    fn test_pool_dedupes_by_text() {
        let mut pool = pool(10, CrowdingStrategy::ClosestPair);
        assert!(matches!(
            pool.add(elite("dup", 10.0, array![1.0, 0.0])),
            AddOutcome::Inserted { .. }
        ));
        assert_eq!(
            pool.add(elite("dup", 99.0, array![0.0, 1.0])),
            AddOutcome::Duplicate
        );
        assert_eq!(pool.len(), 1);
        assert!((pool.members()[0].ratings.get(0).unwrap().mu - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_closest_pair_removes_weaker_of_closest() {
        let mut pool = pool(2, CrowdingStrategy::ClosestPair);
        pool.add_many(vec![
            elite("e1", 10.0, array![1.0, 0.0]),
            elite("e2", 20.0, array![0.999, 0.0447]),
            elite("e3", 15.0, array![0.0, 1.0]),
        ]);
        let texts: HashSet<String> = pool.elites().iter().map(|e| e.text.clone()).collect();
        assert_eq!(texts, HashSet::from(["e2".to_string(), "e3".to_string()]));
        assert_eq!(pool.best().unwrap().text, "e2");
    }

    #[test]
    fn test_knn_replaces_worst_in_neighbourhood() {
        let mut pool = pool(3, CrowdingStrategy::KnnLocalCompetition { k: 2 });
        pool.add_many(vec![
            elite("e1", 10.0, array![1.0, 0.0]),
            elite("e2", 30.0, array![0.999, 0.0447]),
            elite("e3", 20.0, array![0.0, 1.0]),
        ]);
        let outcome = pool.add(elite("c", 25.0, array![0.998, 0.0632]));
        assert_eq!(
            outcome,
            AddOutcome::Inserted {
                removed: vec!["e1".to_string()]
            }
        );
        let texts: HashSet<String> = pool.elites().iter().map(|e| e.text.clone()).collect();
        assert_eq!(
            texts,
            HashSet::from(["e2".to_string(), "e3".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_knn_discards_worse_candidate() {
        let mut pool = pool(3, CrowdingStrategy::KnnLocalCompetition { k: 2 });
        pool.add_many(vec![
            elite("e1", 10.0, array![1.0, 0.0]),
            elite("e2", 30.0, array![0.999, 0.0447]),
            elite("e3", 20.0, array![0.0, 1.0]),
        ]);
        assert_eq!(
            pool.add(elite("c", 5.0, array![0.998, 0.0632])),
            AddOutcome::Rejected
        );
        assert_eq!(pool.len(), 3);
        assert!(!pool.contains_text("c"));
    }

    #[test]
    fn test_size_bound_holds_for_large_batches() {
        let mut pool = pool(4, CrowdingStrategy::ClosestPair);
        for i in 0..16 {
            let angle = i as f64 * 0.3;
            pool.add(elite(
                &format!("t{i}"),
                i as f64,
                array![angle.cos(), angle.sin()],
            ));
            assert!(pool.len() <= 4);
        }
    }

    #[test]
    fn test_farthest_from_honours_exclusions() {
        let mut pool = pool(10, CrowdingStrategy::ClosestPair);
        let parent = elite("p", 1.0, array![1.0, 0.0]);
        pool.add(parent.clone());
        pool.add(elite("near", 1.0, array![0.99, 0.141]));
        pool.add(elite("far", 1.0, array![-1.0, 0.0]));

        let farthest = pool.farthest_from(&parent, &HashSet::new()).unwrap();
        assert_eq!(farthest.text, "far");

        let excluded = HashSet::from(["far".to_string()]);
        let fallback = pool.farthest_from(&parent, &excluded).unwrap();
        assert_eq!(fallback.text, "near");
    }

    #[test]
    fn test_update_ratings_feeds_best() {
        let mut pool = pool(10, CrowdingStrategy::ClosestPair);
        pool.add(elite("a", 10.0, array![1.0, 0.0]));
        pool.add(elite("b", 20.0, array![0.0, 1.0]));
        assert_eq!(pool.best().unwrap().text, "b");

        let boosted = Ratings::from_values(vec![Rating::new(50.0, 1.0)]);
        assert!(pool.update_ratings("a", &boosted));
        assert_eq!(pool.best().unwrap().text, "a");
        assert!(!pool.update_ratings("missing", &boosted));
    }
}

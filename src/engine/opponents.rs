//! Opponent selection for battles.
//!
//! An opponent is an existing member injected into the battle so the
//! parent's neighbourhood is not the only rating context.  Pool-mode
//! kinds work from embedding distance; archive-mode kinds work from
//! cell champions.  Picking an archive-only kind in pool mode logs a
//! warning and yields no opponent.
use std::collections::HashSet;

use tracing::warn;

use crate::config::OpponentKind;
use crate::elites::Elite;
use crate::population::{Population, PopulationStore, farthest_ranked};
use crate::random::{EvoRandomGenerator, RandomGenerator};
use crate::rating::RatingSystem;

#[allow(clippy::too_many_arguments)]
pub fn pick_opponent(
    kind: OpponentKind,
    population: &mut Population,
    island: usize,
    parent: &Elite,
    exclude: &HashSet<String>,
    rating: &RatingSystem,
    top_k: usize,
    farthest_k: usize,
    rng: &mut EvoRandomGenerator,
) -> Option<Elite> {
    match kind {
        OpponentKind::None => None,
        OpponentKind::Random => {
            let store = population.store(island);
            let candidates: Vec<&Elite> = store
                .elites()
                .into_iter()
                .filter(|e| e.text != parent.text && !exclude.contains(&e.text))
                .collect();
            rng.choose(&candidates).map(|e| (*e).clone())
        }
        OpponentKind::FarthestFromParent => {
            population.store(island).farthest_from(parent, exclude)
        }
        OpponentKind::FarButClose => {
            let store = population.store(island);
            let elites = store.elites();
            let ranked = farthest_ranked(&elites, parent, exclude);
            // Among the K farthest by distance, prefer the one most
            // likely to give a close game against the parent.
            ranked
                .into_iter()
                .take(farthest_k.max(1))
                .max_by(|a, b| {
                    rating
                        .match_quality(&parent.ratings, &a.1.ratings)
                        .partial_cmp(&rating.match_quality(&parent.ratings, &b.1.ratings))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(_, e)| e.clone())
        }
        OpponentKind::GlobalBest => population
            .best()
            .filter(|e| e.text != parent.text && !exclude.contains(&e.text))
            .cloned(),
        OpponentKind::CellChampion | OpponentKind::TopkOtherCellChampion => {
            let Some(islands) = population.as_islands_mut() else {
                warn!(?kind, "archive-only opponent kind in pool mode; skipping");
                return None;
            };
            let archive = &islands[island.min(islands.len() - 1)];
            let parent_cell = archive.cell_of(&parent.text).cloned();
            let mut champions: Vec<&Elite> = archive
                .iter_cells()
                .filter(|(key, _)| Some(*key) != parent_cell.as_ref())
                .filter_map(|(_, bucket)| bucket.first())
                .filter(|e| e.text != parent.text && !exclude.contains(&e.text))
                .collect();
            if champions.is_empty() {
                return None;
            }
            match kind {
                OpponentKind::CellChampion => rng.choose(&champions).map(|e| (*e).clone()),
                _ => {
                    champions.sort_by(|a, b| {
                        archive
                            .score_of(&b.ratings)
                            .partial_cmp(&archive.score_of(&a.ratings))
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| a.text.cmp(&b.text))
                    });
                    champions.truncate(top_k.max(1));
                    rng.choose(&champions).map(|e| (*e).clone())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::{CrowdedPool, CrowdingStrategy, ScoreFn};
    use crate::rating::{Rating, RatingParams, Ratings};
    use ndarray::array;

    fn rating() -> RatingSystem {
        RatingSystem::new(&["m1".to_string()], RatingParams::default()).unwrap()
    }

    fn elite(text: &str, mu: f64, embedding: ndarray::Array1<f64>) -> Elite {
        Elite::new(
            text,
            embedding,
            Ratings::from_values(vec![Rating::new(mu, 8.333)]),
            0,
        )
    }

    fn pool_population(elites: Vec<Elite>) -> Population {
        let mut pool = CrowdedPool::new(
            16,
            CrowdingStrategy::ClosestPair,
            EvoRandomGenerator::new_from_seed(Some(3)),
            ScoreFn::new(|r: &Ratings| r.get(0).map(|v| v.mu).unwrap_or(0.0)),
        );
        for e in elites {
            pool.add(e);
        }
        Population::Pool(pool)
    }

    #[test]
    fn test_far_but_close_prefers_match_quality_among_farthest() {
        let parent = elite("seed", 25.0, array![1.0, 0.0]);
        let mut population = pool_population(vec![
            parent.clone(),
            elite("close_far", 25.0, array![0.0, 1.0]),
            elite("far_bad", 100.0, array![-1.0, 0.0]),
        ]);
        let mut rng = EvoRandomGenerator::new_from_seed(Some(0));
        let opponent = pick_opponent(
            OpponentKind::FarButClose,
            &mut population,
            0,
            &parent,
            &HashSet::new(),
            &rating(),
            3,
            2,
            &mut rng,
        )
        .unwrap();
        assert_eq!(opponent.text, "close_far");
    }

    #[test]
    fn test_global_best_skips_parent() {
        let parent = elite("best", 99.0, array![1.0, 0.0]);
        let mut population =
            pool_population(vec![parent.clone(), elite("other", 10.0, array![0.0, 1.0])]);
        let mut rng = EvoRandomGenerator::new_from_seed(Some(0));
        let opponent = pick_opponent(
            OpponentKind::GlobalBest,
            &mut population,
            0,
            &parent,
            &HashSet::new(),
            &rating(),
            3,
            2,
            &mut rng,
        );
        assert!(opponent.is_none());
    }

    #[test]
    fn test_archive_kind_in_pool_mode_yields_none() {
        let parent = elite("seed", 25.0, array![1.0, 0.0]);
        let mut population = pool_population(vec![parent.clone()]);
        let mut rng = EvoRandomGenerator::new_from_seed(Some(0));
        let opponent = pick_opponent(
            OpponentKind::CellChampion,
            &mut population,
            0,
            &parent,
            &HashSet::new(),
            &rating(),
            3,
            2,
            &mut rng,
        );
        assert!(opponent.is_none());
    }

    #[test]
    fn test_none_kind_never_picks() {
        let parent = elite("seed", 25.0, array![1.0, 0.0]);
        let mut population =
            pool_population(vec![parent.clone(), elite("other", 10.0, array![0.0, 1.0])]);
        let mut rng = EvoRandomGenerator::new_from_seed(Some(0));
        assert!(
            pick_opponent(
                OpponentKind::None,
                &mut population,
                0,
                &parent,
                &HashSet::new(),
                &rating(),
                3,
                2,
                &mut rng,
            )
            .is_none()
        );
    }
}

//! Labelled inspiration picks for the battle's inspiration slot.
//!
//! The ladder mirrors how a human would pick references to learn from:
//! a *mentor* that is demonstrably better on the parent's weakest
//! metric, the *champion* of the population (or the runner-up when the
//! parent is the champion), then random fill.
use std::collections::HashSet;

use crate::elites::Elite;
use crate::population::PopulationStore;
use crate::random::{EvoRandomGenerator, RandomGenerator};
use crate::rating::RatingSystem;

#[derive(Debug, Clone)]
pub struct Inspiration {
    pub elite: Elite,
    pub label: String,
}

pub fn pick_inspirations(
    store: &dyn PopulationStore,
    parent: &Elite,
    rating: &RatingSystem,
    rng: &mut EvoRandomGenerator,
    count: usize,
) -> Vec<Inspiration> {
    if count == 0 {
        return Vec::new();
    }
    let elites = store.elites();
    let candidates: Vec<&Elite> = elites
        .iter()
        .filter(|e| e.text != parent.text)
        .copied()
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }

    let budget = count.min(candidates.len());
    let mut chosen: Vec<Inspiration> = Vec::with_capacity(budget);
    let mut seen: HashSet<String> = HashSet::from([parent.text.clone()]);

    // 1) Mentor: best on the parent's weakest metric (both by LCB),
    //    only if strictly better there.
    let weakest_metric = (0..rating.metrics().len()).min_by(|&a, &b| {
        let lcb_a = parent.ratings.get(a).map(|r| rating.metric_lcb(r));
        let lcb_b = parent.ratings.get(b).map(|r| rating.metric_lcb(r));
        lcb_a
            .partial_cmp(&lcb_b)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if let Some(metric) = weakest_metric {
        let parent_lcb = parent
            .ratings
            .get(metric)
            .map(|r| rating.metric_lcb(r))
            .unwrap_or(f64::NEG_INFINITY);
        let mentor = candidates
            .iter()
            .filter(|e| !seen.contains(&e.text))
            .max_by(|a, b| {
                let lcb_a = a.ratings.get(metric).map(|r| rating.metric_lcb(r));
                let lcb_b = b.ratings.get(metric).map(|r| rating.metric_lcb(r));
                lcb_a
                    .partial_cmp(&lcb_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(mentor) = mentor {
            let mentor_lcb = mentor
                .ratings
                .get(metric)
                .map(|r| rating.metric_lcb(r))
                .unwrap_or(f64::NEG_INFINITY);
            if mentor_lcb > parent_lcb {
                seen.insert(mentor.text.clone());
                chosen.push(Inspiration {
                    elite: (*mentor).clone(),
                    label: format!(
                        "MENTOR (for {}, Δlcb={:+.3})",
                        rating.metrics()[metric],
                        mentor_lcb - parent_lcb
                    ),
                });
            }
        }
    }
    if chosen.len() >= budget {
        return chosen;
    }

    // 2) Champion (or runner-up when the parent holds the title).
    let parent_score = rating.score(&parent.ratings);
    let champion = candidates
        .iter()
        .filter(|e| !seen.contains(&e.text))
        .max_by(|a, b| {
            rating
                .score(&a.ratings)
                .partial_cmp(&rating.score(&b.ratings))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    if let Some(champion) = champion {
        let champion_score = rating.score(&champion.ratings);
        let label = if champion_score >= parent_score {
            format!("CHAMPION (Δscore={:+.3})", champion_score - parent_score)
        } else {
            format!("RUNNER-UP (Δscore={:+.3})", champion_score - parent_score)
        };
        seen.insert(champion.text.clone());
        chosen.push(Inspiration {
            elite: (*champion).clone(),
            label,
        });
    }

    // 3) Random fill.
    while chosen.len() < budget {
        let remaining: Vec<&Elite> = candidates
            .iter()
            .filter(|e| !seen.contains(&e.text))
            .copied()
            .collect();
        let Some(pick) = rng.choose(&remaining) else {
            break;
        };
        seen.insert(pick.text.clone());
        chosen.push(Inspiration {
            elite: (*pick).clone(),
            label: "RANDOM".to_string(),
        });
    }
    chosen
}

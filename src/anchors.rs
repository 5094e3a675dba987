//! # `anchors` – Frozen Scale References
//!
//! TrueSkill ratings are only identified up to a shift: if every battle
//! participant drifts together, scores stay comparable within an
//! iteration but not across a run.  The [`AnchorManager`] pins the
//! scale with a small set of frozen texts — the seed (near-zero σ) plus
//! periodic "ghost" snapshots of the best member — that get injected
//! into battles but never re-rated.
use std::collections::HashSet;
use std::sync::Arc;

use crate::elites::{Anchor, Elite};
use crate::embedding::EmbeddingService;
use crate::random::{EvoRandomGenerator, RandomGenerator};
use crate::rating::{Rating, Ratings, RatingSystem};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AnchorParams {
    pub injection_probability: f64,
    pub max_per_battle: usize,
    pub seed_mu: f64,
    pub seed_sigma: f64,
    pub ghost_interval: usize,
}

impl Default for AnchorParams {
    fn default() -> Self {
        Self {
            injection_probability: 0.25,
            max_per_battle: 1,
            seed_mu: 25.0,
            seed_sigma: 1e-3,
            ghost_interval: 25,
        }
    }
}

#[derive(Debug)]
pub struct AnchorManager {
    params: AnchorParams,
    anchors: Vec<Anchor>,
    seed_text: Option<String>,
    embeddings: Arc<EmbeddingService>,
    rng: EvoRandomGenerator,
}

impl AnchorManager {
    pub fn new(
        params: AnchorParams,
        embeddings: Arc<EmbeddingService>,
        rng: EvoRandomGenerator,
    ) -> Self {
        Self {
            params,
            anchors: Vec::new(),
            seed_text: None,
            embeddings,
            rng,
        }
    }

    pub fn params(&self) -> &AnchorParams {
        &self.params
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn seed_anchor(&self) -> Option<&Anchor> {
        let seed = self.seed_text.as_deref()?;
        self.anchors.iter().find(|a| a.text == seed)
    }

    fn contains(&self, text: &str) -> bool {
        self.anchors.iter().any(|a| a.text == text)
    }

    /// Installs the seed anchor at `(seed_mu, seed_sigma)`.  Idempotent;
    /// a second call (same or different text) keeps the first seed.
    pub fn seed(&mut self, text: &str, rating: &RatingSystem) {
        if self.seed_text.is_some() {
            return;
        }
        let ratings = Ratings::from_values(vec![
            Rating::new(
                self.params.seed_mu,
                self.params.seed_sigma
            );
            rating.metrics().len()
        ]);
        let embedding = self.embeddings.embed(text).as_ref().clone();
        if !self.contains(text) {
            self.anchors.push(Anchor {
                text: text.to_string(),
                embedding,
                ratings,
                age: 0,
            });
        }
        self.seed_text = Some(text.to_string());
    }

    /// Re-installs an anchor loaded from a checkpoint.
    pub fn restore(&mut self, anchor: Anchor, is_seed: bool) {
        if !self.contains(&anchor.text) {
            if is_seed && self.seed_text.is_none() {
                self.seed_text = Some(anchor.text.clone());
            }
            self.anchors.push(anchor);
        }
    }

    /// Clones the current best into the anchor pool on the configured
    /// cadence.  Dedup by text; re-ghosting the same champion is a no-op.
    pub fn maybe_add_ghost(&mut self, best: &Elite, iteration: usize) -> bool {
        let interval = self.params.ghost_interval;
        if interval == 0 || iteration == 0 || iteration % interval != 0 {
            return false;
        }
        if self.contains(&best.text) {
            return false;
        }
        self.anchors.push(Anchor::from_elite(best));
        true
    }

    /// With probability `injection_probability`, draws up to
    /// `max_per_battle` anchors for a battle.  The seed anchor always
    /// goes first when eligible; ghosts fill the rest in random order.
    pub fn maybe_sample(&mut self, exclude_texts: &HashSet<String>) -> Vec<Anchor> {
        if self.anchors.is_empty()
            || self.params.max_per_battle == 0
            || !self.rng.gen_bool(self.params.injection_probability)
        {
            return Vec::new();
        }

        let mut picked: Vec<Anchor> = Vec::new();
        let mut seen: HashSet<String> = exclude_texts.clone();

        if let Some(seed) = self.seed_anchor() {
            if !seen.contains(&seed.text) {
                seen.insert(seed.text.clone());
                picked.push(seed.clone());
            }
        }
        if picked.len() >= self.params.max_per_battle {
            return picked;
        }

        let seed_text = self.seed_text.clone();
        let mut ghosts: Vec<usize> = (0..self.anchors.len())
            .filter(|&idx| {
                let anchor = &self.anchors[idx];
                Some(&anchor.text) != seed_text.as_ref() && !seen.contains(&anchor.text)
            })
            .collect();
        self.rng.shuffle(&mut ghosts);
        for idx in ghosts {
            if picked.len() >= self.params.max_per_battle {
                break;
            }
            let anchor = self.anchors[idx].clone();
            seen.insert(anchor.text.clone());
            picked.push(anchor);
        }
        picked
    }
}

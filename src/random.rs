//! # `random` – Unified RNG Abstraction
//!
//! Every stochastic decision in *fuzzyevolve* (parent selection, job
//! planning, battle truncation, anchor sampling, crowding tie-breaks, …)
//! depends on an RNG, but call sites shouldn't have to juggle the `rand`
//! crate's API directly.  The [`RandomGenerator`] trait offers a single
//! ergonomic façade while still giving power users access to the raw RNG
//! when needed.
//!
//! ## Trait highlights
//!
//! | Method | Purpose |
//! |--------|---------|
//! | `gen_range_usize(min, max)` | `usize` in `[min, max)` |
//! | `gen_range_f64(min, max)`   | `f64`  in `[min, max)` |
//! | `gen_bool(p)`               | Bernoulli(`p`) |
//! | `gen_probability()`         | uniform `[0, 1)` |
//! | `shuffle<T>`                | in-place Fisher–Yates |
//! | `choose(slice)`             | random element or `None` |
//! | `sample_indices(n, k)`      | `k` distinct indices from `0..n` |
//! | `choose_weighted_index(w)`  | index sampled ∝ weight |
//! | `rng()`                     | mutable handle to the raw `RngCore` |
//!
//! ## Named streams
//!
//! The engine never reuses a single global RNG.  A master seed is split
//! **once per run** into a fixed set of named streams
//! ([`RngStreams`]) — engine, selection, mutation, ranker, anchors,
//! archive — so that, say, a change in how many mutation jobs run cannot
//! perturb parent selection.  Streams are never reseeded; their seeds are
//! recorded into every checkpoint so a resumed run keeps its identity.
use rand::prelude::IndexedRandom;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

/// A unified interface for generating random values, used across the
/// engine and its operators.
pub trait RandomGenerator {
    type R: RngCore + Rng;

    /// Random `usize` in `[min, max)`.
    fn gen_range_usize(&mut self, min: usize, max: usize) -> usize {
        self.rng().random_range(min..max)
    }

    /// Random `f64` in `[min, max)`.
    fn gen_range_f64(&mut self, min: f64, max: f64) -> f64 {
        self.rng().random_range(min..max)
    }

    /// Random boolean, `true` with probability `p`.
    fn gen_bool(&mut self, p: f64) -> bool {
        self.rng().random_bool(p.clamp(0.0, 1.0))
    }

    /// Uniform `f64` in `[0.0, 1.0)`.
    fn gen_probability(&mut self) -> f64 {
        self.rng().random::<f64>()
    }

    fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(self.rng())
    }

    fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(self.rng())
    }

    /// `k` distinct indices drawn uniformly from `0..n` (k clamped to n).
    fn sample_indices(&mut self, n: usize, k: usize) -> Vec<usize> {
        let k = k.min(n);
        rand::seq::index::sample(self.rng(), n, k).into_vec()
    }

    /// Index drawn with probability proportional to `weights[i]`.
    /// Returns `None` when the weights are empty or sum to zero.
    fn choose_weighted_index(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }
        let mut point = self.gen_range_f64(0.0, total);
        for (idx, &w) in weights.iter().enumerate() {
            if !(w.is_finite() && w > 0.0) {
                continue;
            }
            if point < w {
                return Some(idx);
            }
            point -= w;
        }
        Some(weights.len() - 1)
    }

    /// Mutable reference to the underlying RNG implementing `RngCore`.
    fn rng(&mut self) -> &mut Self::R;
}

/// The production implementation of [`RandomGenerator`] backed by `StdRng`.
#[derive(Debug, Clone)]
pub struct EvoRandomGenerator {
    rng: StdRng,
}

impl EvoRandomGenerator {
    pub fn new(rng: StdRng) -> Self {
        Self { rng }
    }

    pub fn new_from_seed(seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(|| StdRng::from_rng(&mut rand::rng()), StdRng::seed_from_u64);
        Self { rng }
    }
}

impl RandomGenerator for EvoRandomGenerator {
    type R = StdRng;
    fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// Seeds of every named stream, as recorded into checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSeeds {
    pub master: u64,
    pub engine: u64,
    pub selection: u64,
    pub mutation: u64,
    pub ranker: u64,
    pub anchors: u64,
    pub archive: u64,
}

/// The per-run RNG fan-out: one master seed split into independent
/// named streams.  Built once at start-up (or from a checkpoint's
/// recorded seeds) and then handed out by value to each subsystem.
#[derive(Debug)]
pub struct RngStreams {
    seeds: StreamSeeds,
}

impl RngStreams {
    /// Split `master_seed` into the fixed stream set.  `None` draws a
    /// fresh master seed from the OS.
    pub fn split(master_seed: Option<u64>) -> Self {
        let master = master_seed.unwrap_or_else(|| rand::rng().random::<u64>());
        let mut source = StdRng::seed_from_u64(master);
        // Draw order is part of the on-disk contract: never reorder.
        let seeds = StreamSeeds {
            master,
            engine: source.random::<u64>(),
            selection: source.random::<u64>(),
            mutation: source.random::<u64>(),
            ranker: source.random::<u64>(),
            anchors: source.random::<u64>(),
            archive: source.random::<u64>(),
        };
        Self { seeds }
    }

    /// Rebuild the fan-out from seeds stored in a checkpoint.
    pub fn from_seeds(seeds: StreamSeeds) -> Self {
        Self { seeds }
    }

    pub fn seeds(&self) -> &StreamSeeds {
        &self.seeds
    }

    pub fn engine(&self) -> EvoRandomGenerator {
        EvoRandomGenerator::new(StdRng::seed_from_u64(self.seeds.engine))
    }

    pub fn selection(&self) -> EvoRandomGenerator {
        EvoRandomGenerator::new(StdRng::seed_from_u64(self.seeds.selection))
    }

    pub fn mutation(&self) -> EvoRandomGenerator {
        EvoRandomGenerator::new(StdRng::seed_from_u64(self.seeds.mutation))
    }

    pub fn ranker(&self) -> EvoRandomGenerator {
        EvoRandomGenerator::new(StdRng::seed_from_u64(self.seeds.ranker))
    }

    pub fn anchors(&self) -> EvoRandomGenerator {
        EvoRandomGenerator::new(StdRng::seed_from_u64(self.seeds.anchors))
    }

    /// Stream for archive/pool internals.  Island `i` derives its own
    /// sub-seed so multi-island runs stay deterministic per island.
    pub fn archive(&self, island: usize) -> EvoRandomGenerator {
        EvoRandomGenerator::new(StdRng::seed_from_u64(
            self.seeds.archive.wrapping_add(island as u64),
        ))
    }
}

/// A dummy RNG for tests that exercise trait-level logic without ever
/// dereferencing the generator.  Any actual draw panics.
pub struct TestDummyRng;

impl RngCore for TestDummyRng {
    fn next_u32(&mut self) -> u32 {
        unimplemented!("Not used in this test")
    }

    fn next_u64(&mut self) -> u64 {
        unimplemented!("Not used in this test")
    }

    fn fill_bytes(&mut self, _dest: &mut [u8]) {
        unimplemented!("Not used in this test")
    }
}

pub struct NoopRandomGenerator {
    dummy: TestDummyRng,
}

impl Default for NoopRandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopRandomGenerator {
    pub fn new() -> Self {
        Self {
            dummy: TestDummyRng,
        }
    }
}

impl RandomGenerator for NoopRandomGenerator {
    type R = TestDummyRng;
    fn rng(&mut self) -> &mut TestDummyRng {
        &mut self.dummy
    }
}

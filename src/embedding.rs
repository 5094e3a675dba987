//! # `embedding` – Text → Vector Service
//!
//! The engine needs a fixed-dimension unit vector per text for crowding,
//! partner selection and the 2-D descriptor projection.  The
//! [`EmbeddingProvider`] trait is the seam: the crate ships a
//! deterministic hash-fallback provider, and callers may plug in a
//! neural provider behind the same trait (model loading itself is out
//! of scope here).
//!
//! [`EmbeddingService`] wraps any provider with a per-text memoising
//! cache.  The cache mutex is the only shared mutable structure exposed
//! to mutation workers; misses compute **outside** the lock so a slow
//! provider cannot serialise the whole engine.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ndarray::Array1;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use sha2::{Digest, Sha256};

use crate::helpers::linalg::normalize;

/// Maps text to a fixed-dimension unit vector.
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    fn dim(&self) -> usize;
    fn embed(&self, text: &str) -> Array1<f64>;
}

/// Deterministic pseudo-random embedding seeded by a content hash of
/// the text.  Cheap, dependency-free stand-in for a neural model:
/// distances between unrelated texts behave like random unit vectors,
/// while identical texts always collide.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dim: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(128)
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Array1<f64> {
        let mut rng = StdRng::seed_from_u64(hash_to_seed(text));
        let mut vec: Array1<f64> =
            Array1::from_iter((0..self.dim).map(|_| -> f64 { StandardNormal.sample(&mut rng) }));
        normalize(&mut vec);
        vec
    }
}

/// Adapter for external (neural) providers whose raw vectors are not
/// unit length; model loading itself stays outside this crate.
#[derive(Debug)]
pub struct NormalizingProvider<P: EmbeddingProvider> {
    inner: P,
}

impl<P: EmbeddingProvider> NormalizingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for NormalizingProvider<P> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed(&self, text: &str) -> Array1<f64> {
        let mut vec = self.inner.embed(text);
        normalize(&mut vec);
        vec
    }
}

fn hash_to_seed(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().expect("digest shorter than 8 bytes"))
}

/// A provider plus a mutex-guarded memoising cache.
#[derive(Debug)]
pub struct EmbeddingService {
    provider: Box<dyn EmbeddingProvider>,
    cache: Mutex<HashMap<String, Arc<Array1<f64>>>>,
}

impl EmbeddingService {
    pub fn new(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn hash_fallback(dim: usize) -> Self {
        Self::new(Box::new(HashEmbeddingProvider::new(dim)))
    }

    pub fn dim(&self) -> usize {
        self.provider.dim()
    }

    /// Cached embed.  On a miss the provider runs outside the lock; a
    /// racing duplicate computation keeps the first inserted value.
    pub fn embed(&self, text: &str) -> Arc<Array1<f64>> {
        if let Some(hit) = self.cache.lock().expect("embedding cache poisoned").get(text) {
            return Arc::clone(hit);
        }
        let fresh = Arc::new(self.provider.embed(text));
        let mut cache = self.cache.lock().expect("embedding cache poisoned");
        Arc::clone(cache.entry(text.to_string()).or_insert(fresh))
    }

    #[cfg(test)]
    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedding_is_deterministic_unit_vector() {
        let provider = HashEmbeddingProvider::new(64);
        let a = provider.embed("hello");
        let b = provider.embed("hello");
        let c = provider.embed("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!((a.dot(&a).sqrt() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalizing_provider_rescales() {
        #[derive(Debug)]
        struct Raw;
        impl EmbeddingProvider for Raw {
            fn dim(&self) -> usize {
                2
            }
            fn embed(&self, _text: &str) -> Array1<f64> {
                ndarray::array![3.0, 4.0]
            }
        }
        let provider = NormalizingProvider::new(Raw);
        let vec = provider.embed("anything");
        assert!((vec.dot(&vec).sqrt() - 1.0).abs() < 1e-12);
        assert_eq!(provider.dim(), 2);
    }

    #[test]
    fn test_service_memoises_per_text() {
        let service = EmbeddingService::hash_fallback(16);
        let first = service.embed("seed");
        let again = service.embed("seed");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(service.cached_len(), 1);
        service.embed("other");
        assert_eq!(service.cached_len(), 2);
    }
}

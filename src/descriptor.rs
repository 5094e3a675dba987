//! # `descriptor` – Behaviour-Space Coordinates
//!
//! MAP-Elites needs every text mapped onto a small set of axes; the
//! axes partition the behaviour space into cells.  Two axis kinds
//! exist: categorical (finite value set) and binned (sorted edges).
//! [`DescriptorSystem`] bundles the axis space with the function that
//! produces descriptor values, in one of two modes:
//!
//! * **length** – a single binned axis over character length;
//! * **embedding_2d** – two binned axes from projecting the text's
//!   embedding onto two fixed random unit directions (seeded by
//!   `projection_seed`, scaled by √d so bin edges survive changes of
//!   embedding dimension).
use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::Array1;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::EmbeddingService;
use crate::helpers::linalg::normalize;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("descriptor value '{value}' not allowed on categorical axis '{axis}'")]
    UnknownCategory { axis: String, value: String },
    #[error("binned axis '{axis}' must define at least two edges")]
    TooFewEdges { axis: String },
    #[error("descriptor is missing a value for axis '{axis}'")]
    MissingAxis { axis: String },
}

/// One coordinate of a cell key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellCoord {
    Bin(usize),
    Category(String),
}

/// A tuple of per-axis coordinates identifying one archive cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey(pub Vec<CellCoord>);

/// A descriptor value before binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DescriptorValue {
    Real(f64),
    Category(String),
}

/// Axis-name → value mapping produced by the descriptor function.
pub type Descriptor = BTreeMap<String, DescriptorValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Axis {
    Categorical { values: Vec<String> },
    Binned { edges: Vec<f64> },
}

impl Axis {
    pub fn size(&self) -> usize {
        match self {
            Axis::Categorical { values } => values.len(),
            Axis::Binned { edges } => edges.len().saturating_sub(1),
        }
    }

    fn key_for(&self, name: &str, value: &DescriptorValue) -> Result<CellCoord, DescriptorError> {
        match (self, value) {
            (Axis::Categorical { values }, DescriptorValue::Category(v)) => {
                if values.iter().any(|allowed| allowed == v) {
                    Ok(CellCoord::Category(v.clone()))
                } else {
                    Err(DescriptorError::UnknownCategory {
                        axis: name.to_string(),
                        value: v.clone(),
                    })
                }
            }
            (Axis::Binned { edges }, DescriptorValue::Real(v)) => {
                if edges.len() < 2 {
                    return Err(DescriptorError::TooFewEdges {
                        axis: name.to_string(),
                    });
                }
                // Largest i with edges[i] <= v; overflow goes to the
                // last bin, underflow to the first.
                if *v >= edges[edges.len() - 1] {
                    return Ok(CellCoord::Bin(edges.len() - 2));
                }
                let mut idx = 0;
                for i in 0..edges.len() - 1 {
                    if *v >= edges[i] {
                        idx = i;
                    }
                }
                Ok(CellCoord::Bin(idx))
            }
            (Axis::Categorical { .. }, DescriptorValue::Real(v)) => {
                Err(DescriptorError::UnknownCategory {
                    axis: name.to_string(),
                    value: v.to_string(),
                })
            }
            (Axis::Binned { .. }, DescriptorValue::Category(v)) => {
                Err(DescriptorError::UnknownCategory {
                    axis: name.to_string(),
                    value: v.clone(),
                })
            }
        }
    }
}

/// An ordered set of named axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorSpace {
    axes: Vec<(String, Axis)>,
}

impl DescriptorSpace {
    pub fn new(axes: Vec<(String, Axis)>) -> Self {
        Self { axes }
    }

    pub fn axes(&self) -> &[(String, Axis)] {
        &self.axes
    }

    pub fn total_cells(&self) -> usize {
        self.axes.iter().map(|(_, axis)| axis.size()).product()
    }

    pub fn cell_key(&self, descriptor: &Descriptor) -> Result<CellKey, DescriptorError> {
        let mut key = Vec::with_capacity(self.axes.len());
        for (name, axis) in &self.axes {
            let value = descriptor
                .get(name)
                .ok_or_else(|| DescriptorError::MissingAxis { axis: name.clone() })?;
            key.push(axis.key_for(name, value)?);
        }
        Ok(CellKey(key))
    }
}

#[derive(Debug)]
enum DescriptorMode {
    Length,
    Embedding2d {
        r1: Array1<f64>,
        r2: Array1<f64>,
        scale: f64,
    },
}

/// Descriptor space + the describe function, sharing the engine's
/// embedding service.
#[derive(Debug)]
pub struct DescriptorSystem {
    space: DescriptorSpace,
    mode: DescriptorMode,
    embeddings: Arc<EmbeddingService>,
}

impl DescriptorSystem {
    /// Single binned axis over character length.
    pub fn length(bins: Vec<f64>, embeddings: Arc<EmbeddingService>) -> Self {
        let space = DescriptorSpace::new(vec![("len".to_string(), Axis::Binned { edges: bins })]);
        Self {
            space,
            mode: DescriptorMode::Length,
            embeddings,
        }
    }

    /// Two binned axes from projections of the embedding onto fixed
    /// random unit directions.
    pub fn embedding_2d(
        bins_x: Vec<f64>,
        bins_y: Vec<f64>,
        projection_seed: u64,
        embeddings: Arc<EmbeddingService>,
    ) -> Self {
        let dim = embeddings.dim();
        let mut rng = StdRng::seed_from_u64(projection_seed);
        let r1 = random_unit_vector(&mut rng, dim);
        let r2 = random_unit_vector(&mut rng, dim);
        let space = DescriptorSpace::new(vec![
            ("embed_x".to_string(), Axis::Binned { edges: bins_x }),
            ("embed_y".to_string(), Axis::Binned { edges: bins_y }),
        ]);
        Self {
            space,
            mode: DescriptorMode::Embedding2d {
                r1,
                r2,
                scale: (dim as f64).sqrt(),
            },
            embeddings,
        }
    }

    pub fn space(&self) -> &DescriptorSpace {
        &self.space
    }

    pub fn describe(&self, text: &str) -> Descriptor {
        match &self.mode {
            DescriptorMode::Length => BTreeMap::from([(
                "len".to_string(),
                DescriptorValue::Real(text.chars().count() as f64),
            )]),
            DescriptorMode::Embedding2d { r1, r2, scale } => {
                let vec = self.embeddings.embed(text);
                BTreeMap::from([
                    (
                        "embed_x".to_string(),
                        DescriptorValue::Real(vec.dot(r1) * scale),
                    ),
                    (
                        "embed_y".to_string(),
                        DescriptorValue::Real(vec.dot(r2) * scale),
                    ),
                ])
            }
        }
    }

    pub fn cell_key_for(&self, text: &str) -> Result<CellKey, DescriptorError> {
        self.space.cell_key(&self.describe(text))
    }
}

fn random_unit_vector(rng: &mut StdRng, dim: usize) -> Array1<f64> {
    let mut vec: Array1<f64> =
        Array1::from_iter((0..dim).map(|_| -> f64 { StandardNormal.sample(rng) }));
    normalize(&mut vec);
    vec
}

//! # `elites` – Core Data Structures
//!
//! The fundamental records that flow through every stage of the engine:
//! population members ([`Elite`]), frozen scale references ([`Anchor`]),
//! the tagged union the battle machinery works over ([`Combatant`]),
//! and the transient per-iteration values ([`MutationCandidate`],
//! [`Critique`]).  They are intentionally minimal so they can be
//! inspected, cloned, or serialised without pulling extra dependencies.
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::rating::Ratings;

/// A population member: a candidate text with its unit-length embedding,
/// per-metric ratings and the iteration index it was created at.  The
/// text is the identity key inside any population.
#[derive(Debug, Clone)]
pub struct Elite {
    pub text: String,
    pub embedding: Array1<f64>,
    pub ratings: Ratings,
    pub age: usize,
}

impl Elite {
    pub fn new(text: impl Into<String>, embedding: Array1<f64>, ratings: Ratings, age: usize) -> Self {
        Self {
            text: text.into(),
            embedding,
            ratings,
            age,
        }
    }
}

/// A frozen reference participant.  Same shape as an [`Elite`] but a
/// distinct type: being an anchor (and therefore frozen in battles) is
/// structural, not a runtime flag.  Anchors live in the
/// [`AnchorManager`](crate::anchors::AnchorManager), never in a
/// population store.
#[derive(Debug, Clone)]
pub struct Anchor {
    pub text: String,
    pub embedding: Array1<f64>,
    pub ratings: Ratings,
    pub age: usize,
}

impl Anchor {
    /// Freeze a snapshot of an elite (used for ghost anchors).
    pub fn from_elite(elite: &Elite) -> Self {
        Self {
            text: elite.text.clone(),
            embedding: elite.embedding.clone(),
            ratings: elite.ratings.clone(),
            age: elite.age,
        }
    }
}

/// A battle participant: either a (snapshot of a) population member or
/// a frozen anchor.
#[derive(Debug, Clone)]
pub enum Combatant {
    Member(Elite),
    Anchor(Anchor),
}

impl Combatant {
    pub fn text(&self) -> &str {
        match self {
            Combatant::Member(elite) => &elite.text,
            Combatant::Anchor(anchor) => &anchor.text,
        }
    }

    pub fn ratings(&self) -> &Ratings {
        match self {
            Combatant::Member(elite) => &elite.ratings,
            Combatant::Anchor(anchor) => &anchor.ratings,
        }
    }

    pub fn ratings_mut(&mut self) -> &mut Ratings {
        match self {
            Combatant::Member(elite) => &mut elite.ratings,
            Combatant::Anchor(anchor) => &mut anchor.ratings,
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, Combatant::Anchor(_))
    }

    pub fn as_member(&self) -> Option<&Elite> {
        match self {
            Combatant::Member(elite) => Some(elite),
            Combatant::Anchor(_) => None,
        }
    }
}

/// A proposed child text, produced by an operator job and consumed when
/// it is turned into an [`Elite`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationCandidate {
    pub text: String,
    pub operator: String,
    pub uncertainty_scale: f64,
    pub focus: Option<String>,
    pub partner_texts: Vec<String>,
}

impl MutationCandidate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            operator: String::new(),
            uncertainty_scale: 0.0,
            focus: None,
            partner_texts: Vec::new(),
        }
    }
}

/// A critic's structured read of the parent, consumed by the mutation
/// planner to route per-job focus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub summary: String,
    #[serde(default)]
    pub preserve: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

//! # `recorder` – Typed Iteration Events
//!
//! The engine narrates every stage of an iteration as a typed event.
//! Events serialise to `{iteration, type, data}` JSONL lines (the
//! `RunStore` appends them); consumers may tail the file live and must
//! tolerate unknown keys.  Record order follows causal order within an
//! iteration: `step_start` → `critique` → `candidates` → `lineage` →
//! `battle` → `ranking` → `ratings_update` → `pool_delta` →
//! `archive_add` → `iteration`.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::CellKey;
use crate::rating::Rating;

/// A parent → child edge with the operator that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEdge {
    pub parent_text_id: String,
    pub child_text_id: String,
    pub operator: String,
    pub role: String,
    pub embedding_distance: f64,
    pub uncertainty_scale: f64,
}

/// Before/after ratings for one battle participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingsUpdateEntry {
    pub text_id: String,
    pub frozen: bool,
    pub before: BTreeMap<String, Rating>,
    pub after: BTreeMap<String, Rating>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub text_id: String,
    pub operator: String,
    pub focus: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    StepStart {
        parent_text_id: String,
        island: usize,
    },
    Critique {
        summary: String,
        issues: Vec<String>,
        routes: Vec<String>,
    },
    Candidates {
        candidates: Vec<CandidateRecord>,
    },
    Lineage {
        edges: Vec<LineageEdge>,
    },
    Battle {
        participant_text_ids: Vec<String>,
        judged_children: Vec<usize>,
        frozen_indices: Vec<usize>,
    },
    Ranking {
        tiers_by_metric: BTreeMap<String, Vec<Vec<usize>>>,
    },
    RatingsUpdate {
        entries: Vec<RatingsUpdateEntry>,
    },
    PoolDelta {
        inserted: Vec<String>,
        kept: Vec<String>,
        removed: Vec<String>,
        rejected: Vec<String>,
    },
    ArchiveAdd {
        text_id: String,
        cell_key: CellKey,
        new_cell: bool,
        gate_passed: bool,
    },
    Iteration {
        best_score: f64,
        pool_size: usize,
        empty_cells: Option<usize>,
    },
}

impl Event {
    /// The wire name, handy for filters and assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::StepStart { .. } => "step_start",
            Event::Critique { .. } => "critique",
            Event::Candidates { .. } => "candidates",
            Event::Lineage { .. } => "lineage",
            Event::Battle { .. } => "battle",
            Event::Ranking { .. } => "ranking",
            Event::RatingsUpdate { .. } => "ratings_update",
            Event::PoolDelta { .. } => "pool_delta",
            Event::ArchiveAdd { .. } => "archive_add",
            Event::Iteration { .. } => "iteration",
        }
    }
}

/// Sink for engine events.  The `RunStore` is the durable sink; this
/// trait exists so tests and live viewers can tap the stream.
pub trait Recorder: std::fmt::Debug {
    fn record(&mut self, iteration: usize, event: &Event);
}

#[derive(Debug, Default)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn record(&mut self, _iteration: usize, _event: &Event) {}
}

/// Buffers every event in memory; used by tests and interactive views.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    pub events: Vec<(usize, Event)>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.iter().map(|(_, e)| e.kind()).collect()
    }
}

impl Recorder for MemoryRecorder {
    fn record(&mut self, iteration: usize, event: &Event) {
        self.events.push((iteration, event.clone()));
    }
}

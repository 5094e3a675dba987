//! On-disk document shapes for `meta.json`, checkpoints, the stats log
//! and the events log.  Readers tolerate unknown keys throughout, so
//! fields can be added without breaking older consumers.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::CellKey;
use crate::random::StreamSeeds;
use crate::rating::Rating;
use crate::recorder::Event;
use crate::stats::EvolutionStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaDoc {
    pub run_id: String,
    pub created_at_unix: u64,
    pub config_digest: String,
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDoc {
    pub text_id: String,
    pub ratings: BTreeMap<String, Rating>,
    pub age: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_key: Option<CellKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IslandDoc {
    pub elites: Vec<MemberDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PopulationDoc {
    Pool { members: Vec<MemberDoc> },
    Archive { islands: Vec<IslandDoc> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorDoc {
    pub text_id: String,
    pub ratings: BTreeMap<String, Rating>,
    pub age: usize,
    /// Always true; kept explicit so external readers need no schema
    /// knowledge to spot the frozen participants.
    pub frozen: bool,
    #[serde(default)]
    pub seed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDoc {
    pub next_iteration: usize,
    pub population: PopulationDoc,
    pub anchors: Vec<AnchorDoc>,
    pub rng: StreamSeeds,
}

/// One `stats.jsonl` line: the iteration-level summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub iteration: usize,
    pub best_score: f64,
    pub pool_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_cells: Option<usize>,
    pub mean_sigma: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diversity_q10: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diversity_q50: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diversity_q90: Option<f64>,
    #[serde(default)]
    pub counters: EvolutionStats,
}

/// One `events.jsonl` line: `{iteration, type, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub iteration: usize,
    #[serde(flatten)]
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_record_line_shape() {
        let record = EventRecord {
            iteration: 3,
            event: Event::Iteration {
                best_score: 1.5,
                pool_size: 4,
                empty_cells: None,
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["iteration"], 3);
        assert_eq!(value["type"], "iteration");
        assert_eq!(value["data"]["pool_size"], 4);

        let back: EventRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_population_doc_tagging() {
        let doc = PopulationDoc::Pool { members: vec![] };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["kind"], "pool");

        let archive = PopulationDoc::Archive {
            islands: vec![IslandDoc { elites: vec![] }],
        };
        let value = serde_json::to_value(&archive).unwrap();
        assert_eq!(value["kind"], "archive");
        assert!(value["islands"].is_array());
    }

    #[test]
    fn test_checkpoint_reader_tolerates_unknown_keys() {
        let raw = serde_json::json!({
            "next_iteration": 2,
            "population": {"kind": "pool", "members": []},
            "anchors": [],
            "rng": {
                "master": 1, "engine": 2, "selection": 3,
                "mutation": 4, "ranker": 5, "anchors": 6, "archive": 7
            },
            "some_future_field": {"x": 1}
        });
        let doc: CheckpointDoc = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.next_iteration, 2);
    }
}

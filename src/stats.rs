//! Run-level counters, aggregated across iterations and dumped with
//! every stats record.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionStats {
    pub judge_calls_total: u64,
    pub judge_calls_failed: u64,
    pub mutations_proposed: u64,
    pub children_judged: u64,
    pub children_inserted: u64,
    pub children_rejected_new_cell_gate: u64,
    pub anchors_injected_total: u64,
    pub battle_sizes: BTreeMap<usize, u64>,
}

impl EvolutionStats {
    pub fn record_battle_size(&mut self, size: usize) {
        *self.battle_sizes.entry(size).or_insert(0) += 1;
    }
}

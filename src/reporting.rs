//! # `reporting` – Derived Views Over a Run
//!
//! Read-only summaries computed from the latest checkpoint of a run
//! directory: a fitness leaderboard across the whole population and,
//! for archive runs, the champion of every occupied cell.  Nothing here
//! touches live engine state; everything is rebuilt from disk, so these
//! views work on finished and in-flight runs alike.
use serde::{Deserialize, Serialize};

use crate::descriptor::CellKey;
use crate::rating::RatingSystem;
use crate::store::schema::{MemberDoc, PopulationDoc};
use crate::store::{RunStore, StoreError};

const EXCERPT_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub text_id: String,
    pub excerpt: String,
    pub score: f64,
    pub age: usize,
    pub cell_key: Option<CellKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellChampionRow {
    pub cell_key: CellKey,
    pub text_id: String,
    pub excerpt: String,
    pub score: f64,
}

fn excerpt(text: &str) -> String {
    let one_line: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if one_line.chars().count() <= EXCERPT_CHARS {
        one_line
    } else {
        let cut: String = one_line.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}…")
    }
}

fn all_members(population: &PopulationDoc) -> Vec<&MemberDoc> {
    match population {
        PopulationDoc::Pool { members } => members.iter().collect(),
        PopulationDoc::Archive { islands } => {
            islands.iter().flat_map(|i| i.elites.iter()).collect()
        }
    }
}

/// The population ranked by score, best first.  Members appearing on
/// several islands are reported once, at their best score.
pub fn fitness_leaderboard(
    store: &RunStore,
    rating: &RatingSystem,
    limit: usize,
) -> Result<Vec<LeaderboardRow>, StoreError> {
    let doc = store.read_checkpoint(&store.latest_checkpoint_path())?;
    let mut rows: Vec<LeaderboardRow> = Vec::new();
    for member in all_members(&doc.population) {
        let score = rating.score(&rating.from_named(&member.ratings));
        match rows.iter_mut().find(|r| r.text_id == member.text_id) {
            Some(existing) => {
                if score > existing.score {
                    existing.score = score;
                    existing.age = member.age;
                    existing.cell_key = member.cell_key.clone();
                }
            }
            None => {
                let text = store.get_text(&member.text_id)?;
                rows.push(LeaderboardRow {
                    rank: 0,
                    text_id: member.text_id.clone(),
                    excerpt: excerpt(&text),
                    score,
                    age: member.age,
                    cell_key: member.cell_key.clone(),
                });
            }
        }
    }
    rows.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.text_id.cmp(&b.text_id))
    });
    rows.truncate(limit);
    for (idx, row) in rows.iter_mut().enumerate() {
        row.rank = idx + 1;
    }
    Ok(rows)
}

/// Best member per occupied cell; empty for pool-mode runs.
pub fn cell_champions(
    store: &RunStore,
    rating: &RatingSystem,
) -> Result<Vec<CellChampionRow>, StoreError> {
    let doc = store.read_checkpoint(&store.latest_checkpoint_path())?;
    let PopulationDoc::Archive { islands } = &doc.population else {
        return Ok(Vec::new());
    };
    let mut champions: Vec<CellChampionRow> = Vec::new();
    for member in islands.iter().flat_map(|i| i.elites.iter()) {
        let Some(cell_key) = member.cell_key.clone() else {
            continue;
        };
        let score = rating.score(&rating.from_named(&member.ratings));
        match champions.iter_mut().find(|c| c.cell_key == cell_key) {
            Some(existing) => {
                if score > existing.score {
                    let text = store.get_text(&member.text_id)?;
                    existing.text_id = member.text_id.clone();
                    existing.excerpt = excerpt(&text);
                    existing.score = score;
                }
            }
            None => {
                let text = store.get_text(&member.text_id)?;
                champions.push(CellChampionRow {
                    cell_key,
                    text_id: member.text_id.clone(),
                    excerpt: excerpt(&text),
                    score,
                });
            }
        }
    }
    champions.sort_by(|a, b| a.cell_key.cmp(&b.cell_key));
    Ok(champions)
}

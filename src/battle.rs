//! # `battle` – Judging-Event Assembly
//!
//! A battle is one multi-way judging event: an ordered, size-bounded
//! participant tuple with role bookkeeping.  The builder decides who
//! makes the cut (children are truncated uniformly at random when the
//! cap is tight), which positions are frozen (anchors), which existing
//! members get their updated ratings written back (`resort`), and which
//! participants are newly-proposed children awaiting admission.
use std::collections::BTreeSet;

use thiserror::Error;

use crate::elites::{Anchor, Combatant, Elite};
use crate::random::RandomGenerator;

#[derive(Debug, Error)]
pub enum BattleError {
    #[error("max_battle_size must be >= 2, got {got}")]
    CapTooSmall { got: usize },
}

/// Immutable composition of one judging event.  Participant ratings are
/// the only thing that changes after construction (via the engine's
/// rating update); membership and roles never do.
#[derive(Debug, Clone)]
pub struct Battle {
    participants: Vec<Combatant>,
    judged_children: Vec<usize>,
    resort_elites: Vec<usize>,
    frozen_indices: BTreeSet<usize>,
}

impl Battle {
    pub fn size(&self) -> usize {
        self.participants.len()
    }

    pub fn participants(&self) -> &[Combatant] {
        &self.participants
    }

    pub fn participants_mut(&mut self) -> &mut [Combatant] {
        &mut self.participants
    }

    /// Indices of newly-proposed children that made the cut.
    pub fn judged_children(&self) -> &[usize] {
        &self.judged_children
    }

    /// Indices of existing members whose ratings may change.
    pub fn resort_elites(&self) -> &[usize] {
        &self.resort_elites
    }

    pub fn frozen_indices(&self) -> &BTreeSet<usize> {
        &self.frozen_indices
    }

    pub fn texts(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.text()).collect()
    }

    /// Direct assembly from pre-shaped parts; used by sparring, where
    /// every participant is an existing member being re-sorted.
    pub fn all_members(members: Vec<Elite>) -> Self {
        let n = members.len();
        Self {
            participants: members.into_iter().map(Combatant::Member).collect(),
            judged_children: Vec::new(),
            resort_elites: (0..n).collect(),
            frozen_indices: BTreeSet::new(),
        }
    }
}

/// Assembles a battle from the iteration's cast.
///
/// Order of admission under the cap: parent, children (random subset if
/// over budget), anchors, opponent, inspiration.  Duplicate texts are
/// skipped so the ranker never sees the same text twice.
#[allow(clippy::too_many_arguments)]
pub fn build_battle(
    parent: Elite,
    children: Vec<Elite>,
    anchors: Vec<Anchor>,
    opponent: Option<Elite>,
    inspiration: Option<Elite>,
    max_battle_size: usize,
    rng: &mut impl RandomGenerator,
) -> Result<Battle, BattleError> {
    if max_battle_size < 2 {
        return Err(BattleError::CapTooSmall {
            got: max_battle_size,
        });
    }

    let child_budget = max_battle_size - 1;
    let chosen_children: Vec<Elite> = if children.len() > child_budget {
        let mut picked = rng.sample_indices(children.len(), child_budget);
        picked.sort_unstable();
        let mut iter = picked.into_iter().peekable();
        children
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| {
                if iter.peek() == Some(idx) {
                    iter.next();
                    true
                } else {
                    false
                }
            })
            .map(|(_, child)| child)
            .collect()
    } else {
        children
    };

    let mut participants: Vec<Combatant> = Vec::with_capacity(max_battle_size);
    participants.push(Combatant::Member(parent));
    let judged_children: Vec<usize> = chosen_children
        .iter()
        .enumerate()
        .map(|(offset, _)| offset + 1)
        .collect();
    participants.extend(chosen_children.into_iter().map(Combatant::Member));

    let mut frozen_indices = BTreeSet::new();
    let mut available = max_battle_size.saturating_sub(participants.len());
    for anchor in anchors {
        if available == 0 {
            break;
        }
        if participants.iter().any(|p| p.text() == anchor.text) {
            continue;
        }
        frozen_indices.insert(participants.len());
        participants.push(Combatant::Anchor(anchor));
        available -= 1;
    }

    let mut resort_elites = vec![0];
    if let Some(opponent) = opponent {
        if available > 0 && !participants.iter().any(|p| p.text() == opponent.text) {
            resort_elites.push(participants.len());
            participants.push(Combatant::Member(opponent));
            available -= 1;
        }
    }
    if let Some(inspiration) = inspiration {
        if available > 0 && !participants.iter().any(|p| p.text() == inspiration.text) {
            resort_elites.push(participants.len());
            participants.push(Combatant::Member(inspiration));
        }
    }

    Ok(Battle {
        participants,
        judged_children,
        resort_elites,
        frozen_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::EvoRandomGenerator;
    use crate::rating::{Rating, Ratings};
    use ndarray::array;

    fn ratings() -> Ratings {
        Ratings::from_values(vec![Rating::new(25.0, 8.333)])
    }

    fn elite(text: &str) -> Elite {
        Elite::new(text, array![1.0], ratings(), 0)
    }

    fn anchor(text: &str) -> Anchor {
        Anchor::from_elite(&elite(text))
    }

    fn rng() -> EvoRandomGenerator {
        EvoRandomGenerator::new_from_seed(Some(0))
    }

    #[test]
    fn test_cap_below_two_is_rejected() {
        let err = build_battle(elite("p"), vec![], vec![], None, None, 1, &mut rng());
        assert!(matches!(err, Err(BattleError::CapTooSmall { got: 1 })));
    }

    #[test]
    fn test_roles_and_frozen_indices() {
        let battle = build_battle(
            elite("p"),
            vec![elite("c1"), elite("c2")],
            vec![anchor("a")],
            Some(elite("o")),
            None,
            8,
            &mut rng(),
        )
        .unwrap();

        assert_eq!(battle.texts(), vec!["p", "c1", "c2", "a", "o"]);
        assert_eq!(battle.judged_children(), &[1, 2]);
        assert_eq!(battle.resort_elites(), &[0, 4]);
        assert_eq!(battle.frozen_indices(), &BTreeSet::from([3]));
        assert!(battle.participants()[3].is_frozen());
    }

    #[test]
    fn test_children_truncated_to_cap() {
        let children: Vec<Elite> = (0..6).map(|i| elite(&format!("c{i}"))).collect();
        let battle = build_battle(elite("p"), children, vec![], None, None, 4, &mut rng())
            .unwrap();
        assert_eq!(battle.size(), 4);
        assert_eq!(battle.judged_children().len(), 3);
        assert_eq!(battle.texts()[0], "p");
    }

    #[test]
    fn test_pairwise_cap_leaves_no_room_for_extras() {
        let battle = build_battle(
            elite("p"),
            vec![elite("c1")],
            vec![anchor("a")],
            Some(elite("o")),
            Some(elite("i")),
            2,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(battle.texts(), vec!["p", "c1"]);
        assert_eq!(battle.resort_elites(), &[0]);
        assert!(battle.frozen_indices().is_empty());
    }

    #[test]
    fn test_duplicate_opponent_text_is_skipped() {
        let battle = build_battle(
            elite("p"),
            vec![elite("c1")],
            vec![],
            Some(elite("c1")),
            None,
            8,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(battle.texts(), vec!["p", "c1"]);
        assert_eq!(battle.resort_elites(), &[0]);
    }

    #[test]
    fn test_inspiration_fills_last_slot() {
        let battle = build_battle(
            elite("p"),
            vec![],
            vec![],
            None,
            Some(elite("i")),
            4,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(battle.texts(), vec!["p", "i"]);
        assert_eq!(battle.resort_elites(), &[0, 1]);
    }
}

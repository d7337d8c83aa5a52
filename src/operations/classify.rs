//! Turns one operations group into typed operations.
//!
//! Groups made only of insertions, only of deletions, only of moves or of
//! subtitles replaced by unrelated ones take a fast path. Everything else is looked up by its signature, the ordered
//! list of pair types; a signature missing from the catalog is an error.

use anyhow::Result;

use crate::align::similarity::overlap;
use crate::config::OperationsConfig;
use crate::core::operation::{InsertAnchor, Operation, OperationIdSequence, OperationType};
use crate::core::subtitle::PersistentId;
use crate::operations::group::OperationsGroup;
use crate::operations::pair::{AlignedSubtitlePair, PairType};

/// Longest group the signature catalog covers
pub const MAX_SIGNATURE_LEN: usize = 4;

/// An operation before it receives its ID
#[derive(Debug, Clone, PartialEq)]
struct Draft {
    /// 1-based index of the pair the operation is anchored to
    anchor_pair: usize,
    operation_type: OperationType,
    affected: Vec<PersistentId>,
    after: Option<InsertAnchor>,
}

impl Draft {
    fn new(anchor: &AlignedSubtitlePair, operation_type: OperationType, affected: &[&AlignedSubtitlePair]) -> Self {
        Self {
            anchor_pair: anchor.index,
            operation_type,
            affected: affected.iter().map(|p| p.persistent_id().clone()).collect(),
            after: None,
        }
    }
}

/// Classifies operations groups
#[derive(Debug, Clone, Default)]
pub struct OperationClassifier {
    report_content_changes: bool,
    collapse_combos: bool,
}

impl OperationClassifier {
    pub fn new(config: &OperationsConfig) -> Self {
        Self {
            report_content_changes: config.report_content_changes,
            collapse_combos: config.collapse_combos,
        }
    }

    /// Classify `group`; `prev` is where an insertion at the group's start
    /// goes, i.e. the subtitle of the pair right before the group
    pub fn classify(
        &self,
        group: &OperationsGroup<'_>,
        prev: &InsertAnchor,
        ids: &mut OperationIdSequence,
    ) -> Result<Vec<Operation>> {
        let mut drafts = match fast_path(group.pairs, prev) {
            Some(drafts) => drafts,
            None => self.by_signature(group, prev)?,
        };

        for draft in drafts.iter().filter(|d| d.operation_type.is_move()) {
            warn_on_direction_conflict(group.pairs, draft);
        }

        if self.collapse_combos {
            drafts = collapse_combo(drafts);
        }

        Ok(drafts
            .into_iter()
            .map(|draft| Operation {
                operation_id: ids.next_id(draft.anchor_pair),
                operation_type: draft.operation_type,
                affected_stids: draft.affected,
                after_stid: draft.after,
            })
            .collect())
    }

    fn by_signature(&self, group: &OperationsGroup<'_>, prev: &InsertAnchor) -> Result<Vec<Draft>> {
        use PairType::*;

        let p = group.pairs;
        let signature = group.signature();
        let cumulative = cumulative_length_changes(p);

        let drafts = match signature.as_slice() {
            [LeftAligned | RightAligned | Unaligned] => {
                if self.report_content_changes {
                    vec![Draft::new(&p[0], OperationType::ContentChange, &[&p[0]])]
                } else {
                    Vec::new()
                }
            }
            [StAdded] => vec![insert(p, 0, prev)],
            [StRemoved] => vec![Draft::new(&p[0], OperationType::Delete, &[&p[0]])],

            // split
            [LeftAligned | Unaligned, StAdded] => {
                vec![Draft::new(&p[1], OperationType::Split, &[&p[0], &p[1]])]
            }
            // insert + move
            [StAdded, RightAligned | Unaligned] => vec![
                insert(p, 0, prev),
                Draft::new(&p[1], last_pair_direction(p), &[&p[0], &p[1]]),
            ],
            // merge
            [LeftAligned | Unaligned, StRemoved] => {
                vec![Draft::new(&p[1], OperationType::Merge, &[&p[0], &p[1]])]
            }
            // delete + move
            [StRemoved, RightAligned | Unaligned] => vec![
                Draft::new(&p[0], OperationType::Delete, &[&p[0]]),
                Draft::new(&p[1], last_pair_direction(p), &[&p[0], &p[1]]),
            ],

            // split + move
            [LeftAligned | Unaligned, StAdded, RightAligned] => vec![
                Draft::new(&p[1], OperationType::Split, &[&p[0], &p[1]]),
                Draft::new(&p[2], cumulative_direction(&cumulative, 1), &[&p[1], &p[2]]),
            ],
            // move + split
            [LeftAligned | Unaligned, Unaligned, StAdded] => vec![
                Draft::new(&p[1], cumulative_direction(&cumulative, 0), &[&p[0], &p[1]]),
                Draft::new(&p[2], OperationType::Split, &[&p[1], &p[2]]),
            ],
            // merge + move
            [LeftAligned | Unaligned, StRemoved, RightAligned] => vec![
                Draft::new(&p[1], OperationType::Merge, &[&p[0], &p[1]]),
                Draft::new(&p[2], cumulative_direction(&cumulative, 1), &[&p[0], &p[2]]),
            ],
            // move + merge
            [LeftAligned | Unaligned, Unaligned, StRemoved] => vec![
                Draft::new(&p[1], cumulative_direction(&cumulative, 0), &[&p[0], &p[1]]),
                Draft::new(&p[2], OperationType::Merge, &[&p[1], &p[2]]),
            ],

            // split + two moves
            [LeftAligned | Unaligned, StAdded, Unaligned, RightAligned] => vec![
                Draft::new(&p[1], OperationType::Split, &[&p[0], &p[1]]),
                Draft::new(&p[2], cumulative_direction(&cumulative, 1), &[&p[1], &p[2]]),
                Draft::new(&p[3], cumulative_direction(&cumulative, 2), &[&p[2], &p[3]]),
            ],
            // move + split + move
            [LeftAligned | Unaligned, Unaligned, StAdded, RightAligned] => vec![
                Draft::new(&p[1], cumulative_direction(&cumulative, 0), &[&p[0], &p[1]]),
                Draft::new(&p[2], OperationType::Split, &[&p[1], &p[2]]),
                Draft::new(&p[3], cumulative_direction(&cumulative, 2), &[&p[2], &p[3]]),
            ],

            _ if signature.len() > MAX_SIGNATURE_LEN => anyhow::bail!(
                "Unsupported operations group of {} pairs at pairs {:?} with signature {}; at most {} pairs can be classified",
                signature.len(),
                group.pair_range(),
                format_signature(&signature),
                MAX_SIGNATURE_LEN
            ),
            _ => anyhow::bail!(
                "Unknown operations group signature {} at pairs {:?}",
                format_signature(&signature),
                group.pair_range()
            ),
        };

        Ok(drafts)
    }
}

/// Pure insertion, deletion and move runs
fn fast_path(p: &[AlignedSubtitlePair], prev: &InsertAnchor) -> Option<Vec<Draft>> {
    use PairType::*;

    let any = |wanted: PairType| p.iter().any(|pair| pair.pair_type == wanted);

    if only(p, &[StAdded, FullyAligned]) && any(StAdded) {
        return Some(
            (0..p.len())
                .filter(|&i| p[i].pair_type == StAdded)
                .map(|i| insert(p, i, prev))
                .collect(),
        );
    }

    if only(p, &[StRemoved, FullyAligned]) && any(StRemoved) {
        return Some(
            p.iter()
                .filter(|pair| pair.pair_type == StRemoved)
                .map(|pair| Draft::new(pair, OperationType::Delete, &[pair]))
                .collect(),
        );
    }

    // replaced subtitles: nothing was paired, so old ones go and new ones come
    if only(p, &[StAdded, StRemoved, FullyAligned]) && any(StAdded) && any(StRemoved) {
        return Some(
            p.iter()
                .enumerate()
                .filter_map(|(i, pair)| match pair.pair_type {
                    StRemoved => Some(Draft::new(pair, OperationType::Delete, &[pair])),
                    StAdded => Some(insert_after_kept(p, i, prev)),
                    _ => None,
                })
                .collect(),
        );
    }

    if only(p, &[LeftAligned, RightAligned, Unaligned]) && p.len() > 1 {
        let cumulative = cumulative_length_changes(p);
        return Some(
            (0..p.len() - 1)
                .map(|k| Draft::new(&p[k + 1], cumulative_direction(&cumulative, k), &[&p[k], &p[k + 1]]))
                .collect(),
        );
    }

    None
}

fn only(p: &[AlignedSubtitlePair], allowed: &[PairType]) -> bool {
    p.iter().all(|pair| allowed.contains(&pair.pair_type))
}

/// Insert of pair `i`, chained after the pair before it
fn insert(p: &[AlignedSubtitlePair], i: usize, prev: &InsertAnchor) -> Draft {
    let after = if i == 0 {
        prev.clone()
    } else {
        InsertAnchor::After(p[i - 1].persistent_id().clone())
    };
    Draft {
        after: Some(after),
        ..Draft::new(&p[i], OperationType::Insert, &[&p[i]])
    }
}

/// Insert of pair `i`, chained after the closest earlier pair that survives
fn insert_after_kept(p: &[AlignedSubtitlePair], i: usize, prev: &InsertAnchor) -> Draft {
    let after = p[..i]
        .iter()
        .rev()
        .find(|pair| pair.pair_type != PairType::StRemoved)
        .map_or_else(|| prev.clone(), |pair| InsertAnchor::After(pair.persistent_id().clone()));
    Draft {
        after: Some(after),
        ..Draft::new(&p[i], OperationType::Insert, &[&p[i]])
    }
}

/// Running sum of content length changes across the group
fn cumulative_length_changes(p: &[AlignedSubtitlePair]) -> Vec<i64> {
    p.iter()
        .scan(0i64, |sum, pair| {
            *sum += pair.content_length_change;
            Some(*sum)
        })
        .collect()
}

/// Direction of the move at the boundary after pair `k`: the boundary moved
/// left when everything up to it shrank
fn cumulative_direction(cumulative: &[i64], k: usize) -> OperationType {
    if cumulative[k] < 0 {
        OperationType::MoveLeft
    } else {
        OperationType::MoveRight
    }
}

/// Direction of the move in a two-pair group: the last pair grew when the
/// boundary before it moved left
fn last_pair_direction(p: &[AlignedSubtitlePair]) -> OperationType {
    match p.last() {
        Some(last) if last.content_length_change > 0 => OperationType::MoveLeft,
        _ => OperationType::MoveRight,
    }
}

/// Whether the text itself suggests the opposite direction for a move
fn direction_conflict(left: &AlignedSubtitlePair, right: &AlignedSubtitlePair, direction: OperationType) -> bool {
    // tail of the old left subtitle now opens the right one
    let moved_left = overlap(&left.from.content_sim, &right.to.content_sim, 0) > 0;
    // head of the old right subtitle now closes the left one
    let moved_right = overlap(&left.to.content_sim, &right.from.content_sim, 0) > 0;

    match direction {
        OperationType::MoveLeft => moved_right && !moved_left,
        OperationType::MoveRight => moved_left && !moved_right,
        _ => false,
    }
}

fn warn_on_direction_conflict(p: &[AlignedSubtitlePair], draft: &Draft) {
    let (Some(first), Some(second)) = (draft.affected.first(), draft.affected.get(1)) else {
        return;
    };
    let left = p.iter().find(|pair| pair.persistent_id() == first);
    let right = p.iter().find(|pair| pair.persistent_id() == second);
    if let (Some(left), Some(right)) = (left, right) {
        if direction_conflict(left, right, draft.operation_type) {
            eprintln!(
                "subtrack: Warning - {} between {} and {} is contradicted by the moved text",
                draft.operation_type, first, second
            );
        }
    }
}

/// Fold a split or merge together with the moves of the same group
fn collapse_combo(drafts: Vec<Draft>) -> Vec<Draft> {
    let structural: Vec<&Draft> = drafts
        .iter()
        .filter(|d| matches!(d.operation_type, OperationType::Split | OperationType::Merge))
        .collect();
    let only_moves_besides = drafts
        .iter()
        .all(|d| d.operation_type.is_move() || matches!(d.operation_type, OperationType::Split | OperationType::Merge));

    if structural.len() != 1 || drafts.len() < 2 || !only_moves_besides {
        return drafts;
    }

    let core = structural[0];
    let operation_type = if core.operation_type == OperationType::Split {
        OperationType::SplitCombo
    } else {
        OperationType::MergeCombo
    };

    let mut affected: Vec<PersistentId> = Vec::new();
    for id in drafts.iter().flat_map(|d| d.affected.iter()) {
        if !affected.contains(id) {
            affected.push(id.clone());
        }
    }

    vec![Draft {
        anchor_pair: core.anchor_pair,
        operation_type,
        affected,
        after: None,
    }]
}

fn format_signature(signature: &[PairType]) -> String {
    let names: Vec<String> = signature.iter().map(ToString::to_string).collect();
    format!("[{}]", names.join(", "))
}

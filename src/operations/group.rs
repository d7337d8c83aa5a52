//! Partitions enriched pairs into operations groups.
//!
//! The state machine is a pure transition function; the driver loop applies
//! the returned action and feeds any automatic follow-up event back in.

use std::fmt;
use std::ops::Range;

use anyhow::Result;

use crate::operations::pair::{AlignedSubtitlePair, PairType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Idle,
    OperationsGroupActive,
    /// Resolves to `Idle` on the automatic reset
    NoOperation,
    /// Resolves to `Idle` on the automatic reset
    OperationsGroupFound,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::OperationsGroupActive => write!(f, "operations_group_active"),
            Self::NoOperation => write!(f, "no_operation"),
            Self::OperationsGroupFound => write!(f, "operations_group_found"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEvent {
    /// The next pair, by its type
    Pair(PairType),
    /// Lookahead decided the active group must close
    EndOperationsGroup,
    Reset,
}

impl fmt::Display for GroupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pair(pair_type) => write!(f, "{}", pair_type),
            Self::EndOperationsGroup => write!(f, "end_operations_group"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// What the driver does with the current pair and the accumulated group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    None,
    /// Start a new group with the current pair
    Open,
    /// Add the current pair to the group
    Extend,
    /// Add the current pair, then record the group
    ExtendAndClose,
    /// Record the group as it is
    Close,
}

/// Outcome of one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: GroupState,
    pub action: GroupAction,
    /// Event the driver must apply immediately
    pub auto_event: Option<GroupEvent>,
}

impl Transition {
    fn to(state: GroupState, action: GroupAction) -> Self {
        let auto_event = match state {
            GroupState::NoOperation | GroupState::OperationsGroupFound => Some(GroupEvent::Reset),
            _ => None,
        };
        Self {
            state,
            action,
            auto_event,
        }
    }
}

/// The transition function of the grouping state machine
pub fn transition(state: GroupState, event: GroupEvent) -> Result<Transition> {
    use GroupAction::*;
    use GroupState::*;
    use PairType::*;

    let next = match (state, event) {
        (Idle, GroupEvent::Pair(FullyAligned)) => Transition::to(NoOperation, None),
        (Idle, GroupEvent::Pair(LeftAligned)) => Transition::to(OperationsGroupActive, Open),
        (Idle, GroupEvent::Pair(RightAligned)) => Transition::to(OperationsGroupFound, ExtendAndClose),
        (Idle, GroupEvent::Pair(StAdded | StRemoved | Unaligned)) => {
            Transition::to(OperationsGroupActive, Open)
        }
        (OperationsGroupActive, GroupEvent::Pair(StAdded | StRemoved | Unaligned)) => {
            Transition::to(OperationsGroupActive, Extend)
        }
        (OperationsGroupActive, GroupEvent::Pair(RightAligned)) => {
            Transition::to(OperationsGroupFound, ExtendAndClose)
        }
        (OperationsGroupActive, GroupEvent::EndOperationsGroup) => {
            Transition::to(OperationsGroupFound, Close)
        }
        (NoOperation | OperationsGroupFound, GroupEvent::Reset) => Transition::to(Idle, None),
        (state, event) => anyhow::bail!(
            "Operations group state machine cannot handle event '{}' in state '{}'",
            event,
            state
        ),
    };

    Ok(next)
}

/// A maximal run of pairs that carries edits
#[derive(Debug, Clone, PartialEq)]
pub struct OperationsGroup<'a> {
    /// Position of the first pair in the full pair list
    pub start: usize,
    pub pairs: &'a [AlignedSubtitlePair],
}

impl<'a> OperationsGroup<'a> {
    pub fn signature(&self) -> Vec<PairType> {
        self.pairs.iter().map(|p| p.pair_type).collect()
    }

    /// 1-based pair indices covered by the group
    pub fn pair_range(&self) -> Range<usize> {
        match (self.pairs.first(), self.pairs.last()) {
            (Some(first), Some(last)) => first.index..last.index + 1,
            _ => 0..0,
        }
    }
}

/// Scan the pairs and return the operations groups in order
pub fn extract_groups(pairs: &[AlignedSubtitlePair]) -> Result<Vec<OperationsGroup<'_>>> {
    let mut state = GroupState::Idle;
    let mut open: Option<usize> = None;
    let mut groups = Vec::new();

    for (position, pair) in pairs.iter().enumerate() {
        apply(&mut state, &mut open, &mut groups, pairs, position, GroupEvent::Pair(pair.pair_type))?;

        let closes_here = match pairs.get(position + 1) {
            None => true,
            Some(next) => {
                pair.last_in_para
                    || matches!(next.pair_type, PairType::FullyAligned | PairType::LeftAligned)
            }
        };
        if closes_here && state == GroupState::OperationsGroupActive {
            apply(&mut state, &mut open, &mut groups, pairs, position, GroupEvent::EndOperationsGroup)?;
        }
    }

    if state != GroupState::Idle {
        anyhow::bail!(
            "Operations group state machine ended in state '{}' after {} pairs; the last group never closed",
            state,
            pairs.len()
        );
    }

    Ok(groups)
}

/// Run one event and its automatic follow-ups through the machine
fn apply<'a>(
    state: &mut GroupState,
    open: &mut Option<usize>,
    groups: &mut Vec<OperationsGroup<'a>>,
    pairs: &'a [AlignedSubtitlePair],
    position: usize,
    event: GroupEvent,
) -> Result<()> {
    let mut pending = Some(event);

    while let Some(event) = pending {
        let step = transition(*state, event)?;
        match step.action {
            GroupAction::None | GroupAction::Extend => {}
            GroupAction::Open => *open = Some(position),
            GroupAction::ExtendAndClose => {
                let start = open.take().unwrap_or(position);
                groups.push(OperationsGroup {
                    start,
                    pairs: &pairs[start..=position],
                });
            }
            GroupAction::Close => {
                let start = open
                    .take()
                    .ok_or_else(|| anyhow::anyhow!("Closing an operations group that was never opened"))?;
                groups.push(OperationsGroup {
                    start,
                    pairs: &pairs[start..=position],
                });
            }
        }
        *state = step.state;
        pending = step.auto_event;
    }

    Ok(())
}

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::align::similarity::{similarity, Similarity, Truncation};
use crate::align::subtitle::TRUNCATE_TO;
use crate::core::subtitle::{PersistentId, Subtitle, SubtitleAttrs, NEW_FILE_ANCHOR};

/// Similarity above which a pair counts as fully aligned
const FULL_ALIGNMENT_SIM: f64 = 0.93;
/// Largest content length change a fully aligned pair may have
const FULL_ALIGNMENT_MAX_LENGTH_CHANGE: i64 = 4;
/// Truncated similarity needed for a left/right alignment
const HIGH_TRUNCATED_SIM: f64 = 0.83;
/// Truncated confidence needed for a left/right alignment
const HIGH_TRUNCATED_CONFIDENCE: f64 = 0.9;

/// Classification of one aligned pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairType {
    FullyAligned,
    LeftAligned,
    RightAligned,
    Unaligned,
    StAdded,
    StRemoved,
}

impl fmt::Display for PairType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullyAligned => write!(f, "fully_aligned"),
            Self::LeftAligned => write!(f, "left_aligned"),
            Self::RightAligned => write!(f, "right_aligned"),
            Self::Unaligned => write!(f, "unaligned"),
            Self::StAdded => write!(f, "st_added"),
            Self::StRemoved => write!(f, "st_removed"),
        }
    }
}

/// One from/to slot of an alignment with its derived attributes
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSubtitlePair {
    pub from: SubtitleAttrs,
    pub to: SubtitleAttrs,
    pub pair_type: PairType,
    pub sim_left: Similarity,
    pub sim_right: Similarity,
    pub sim_abs: Similarity,
    /// `to` length minus `from` length of the normalized content
    pub content_length_change: i64,
    /// -1, 0 or 1
    pub subtitle_count_change: i8,
    /// 1-based position among the aligned pairs
    pub index: usize,
    pub first_in_para: bool,
    pub last_in_para: bool,
    /// Subtitle this slot belongs to
    pub subtitle: Subtitle,
}

impl AlignedSubtitlePair {
    pub fn persistent_id(&self) -> &PersistentId {
        &self.subtitle.persistent_id
    }
}

/// Threads the last real ID and the temporary-ID counter through the pairs
#[derive(Debug, Clone, PartialEq, Eq)]
struct IdMinting {
    anchor: String,
    offset: u32,
}

impl IdMinting {
    /// Minting resumes after a temporary ID and restarts after a real one
    fn new(last: Option<&PersistentId>) -> Self {
        match last {
            None => Self {
                anchor: NEW_FILE_ANCHOR.to_string(),
                offset: 0,
            },
            Some(PersistentId::Real(id)) => Self {
                anchor: id.clone(),
                offset: 0,
            },
            Some(PersistentId::Temporary { anchor, offset }) => Self {
                anchor: anchor.clone(),
                offset: *offset,
            },
        }
    }

    fn observe_real(&mut self, id: &PersistentId) {
        self.anchor = id.to_string();
        self.offset = 0;
    }

    fn mint(&mut self) -> PersistentId {
        self.offset += 1;
        PersistentId::temporary(self.anchor.clone(), self.offset)
    }
}

/// Turn raw aligned slots into enriched, classified pairs.
///
/// `last` is the last persistent ID seen before the first slot. Temporary
/// IDs minted before any real ID shows up are anchored to it, or continue
/// its count when it is itself temporary.
pub fn enrich_pairs(
    aligned_from: &[SubtitleAttrs],
    aligned_to: &[SubtitleAttrs],
    last: Option<&PersistentId>,
) -> Result<Vec<AlignedSubtitlePair>> {
    if aligned_from.len() != aligned_to.len() {
        anyhow::bail!(
            "Aligned sequences differ in length: {} from slots, {} to slots",
            aligned_from.len(),
            aligned_to.len()
        );
    }

    let mut minting = IdMinting::new(last);
    let mut pairs = Vec::with_capacity(aligned_from.len());

    for (position, (from, to)) in aligned_from.iter().zip(aligned_to).enumerate() {
        let index = position + 1;
        let subtitle = owning_subtitle(from, to, index, &mut minting)?;
        pairs.push(enrich_pair(from, to, index, subtitle)?);
    }

    Ok(pairs)
}

fn owning_subtitle(
    from: &SubtitleAttrs,
    to: &SubtitleAttrs,
    index: usize,
    minting: &mut IdMinting,
) -> Result<Subtitle> {
    if from.is_gap() {
        if to.is_gap() {
            anyhow::bail!("Aligned pair {} has gaps on both sides", index);
        }
        // a subtitle already recorded at the "to" revision keeps its ID
        let mut subtitle = match &to.persistent_id {
            Some(id @ PersistentId::Real(_)) => {
                minting.observe_real(id);
                Subtitle::new(id.clone(), to.record_id.clone())
            }
            _ => Subtitle::new(minting.mint(), None),
        };
        subtitle.after = Some(to.content.clone());
        return Ok(subtitle);
    }

    let id = from.persistent_id.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "Subtitle {} ({:?}) has no persistent ID",
            from.index,
            from.content.trim_end()
        )
    })?;
    if !id.is_temporary() {
        minting.observe_real(&id);
    }

    let mut subtitle = Subtitle::new(id, from.record_id.clone());
    subtitle.before = Some(from.content.clone());
    if !to.is_gap() {
        subtitle.after = Some(to.content.clone());
    }
    Ok(subtitle)
}

fn enrich_pair(
    from: &SubtitleAttrs,
    to: &SubtitleAttrs,
    index: usize,
    subtitle: Subtitle,
) -> Result<AlignedSubtitlePair> {
    let sim_left = similarity(&from.content_sim, &to.content_sim, Truncation::Left(TRUNCATE_TO));
    let sim_right = similarity(&from.content_sim, &to.content_sim, Truncation::Right(TRUNCATE_TO));
    let sim_abs = similarity(&from.content_sim, &to.content_sim, Truncation::Full);

    let content_length_change =
        to.content_sim.chars().count() as i64 - from.content_sim.chars().count() as i64;
    let subtitle_count_change = i16::from(to.subtitle_count) - i16::from(from.subtitle_count);
    let subtitle_count_change = match subtitle_count_change {
        -1..=1 => subtitle_count_change as i8,
        other => anyhow::bail!(
            "Aligned pair {} changes the subtitle count by {}; a pair gains or loses at most one subtitle",
            index,
            other
        ),
    };

    let pair_type = classify_pair(
        subtitle_count_change,
        sim_left,
        sim_right,
        sim_abs,
        content_length_change,
    );

    Ok(AlignedSubtitlePair {
        from: from.clone(),
        to: to.clone(),
        pair_type,
        sim_left,
        sim_right,
        sim_abs,
        content_length_change,
        subtitle_count_change,
        index,
        first_in_para: to.first_in_para,
        last_in_para: to.last_in_para,
        subtitle,
    })
}

/// Classify a pair; the checks run in strict priority order
pub fn classify_pair(
    subtitle_count_change: i8,
    sim_left: Similarity,
    sim_right: Similarity,
    sim_abs: Similarity,
    content_length_change: i64,
) -> PairType {
    if subtitle_count_change == 1 {
        return PairType::StAdded;
    }
    if subtitle_count_change == -1 {
        return PairType::StRemoved;
    }
    if sim_abs.sim > FULL_ALIGNMENT_SIM
        && sim_abs.confidence == 1.0
        && content_length_change.abs() <= FULL_ALIGNMENT_MAX_LENGTH_CHANGE
    {
        return PairType::FullyAligned;
    }

    match (high_truncated_sim(sim_left), high_truncated_sim(sim_right)) {
        (Some(left), Some(right)) if right > left => PairType::RightAligned,
        (Some(_), _) => PairType::LeftAligned,
        (None, Some(_)) => PairType::RightAligned,
        (None, None) => PairType::Unaligned,
    }
}

fn high_truncated_sim(sim: Similarity) -> Option<f64> {
    (sim.sim >= HIGH_TRUNCATED_SIM && sim.confidence >= HIGH_TRUNCATED_CONFIDENCE).then_some(sim.sim)
}

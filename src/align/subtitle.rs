//! Subtitle-level alignment: Needleman-Wunsch with a scoring function built
//! on LCS similarity, or on persistent-ID equality.

use crate::align::sequence::{self, Alignment};
use crate::align::similarity::{similarity, Similarity, Truncation};
use crate::config::AlignmentConfig;
use crate::core::subtitle::{Markers, SubtitleAttrs};

/// Characters compared by the left/right truncated similarities
pub const TRUNCATE_TO: usize = 30;

/// Score for two matching subtitles that both open the document
pub const STRONG_LOCK_SCORE: f64 = 1000.0;

/// Score for two subtitles carrying the same persistent ID
pub const ID_MATCH_SCORE: f64 = 100.0;

/// Rejected pairings cost this multiple of the two gaps they would replace
const REJECTED_PAIR_FACTOR: f64 = 1.1;

/// Compared length at which the length bonus stops growing
const LENGTH_BONUS_CAP: usize = 120;

/// How pairs are scored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMode {
    /// LCS similarity of the normalized content
    Content,
    /// Persistent-ID equality
    Ids,
}

/// Aligns the subtitles of two revisions
#[derive(Debug, Clone)]
pub struct SubtitleAligner {
    config: AlignmentConfig,
    start_marker: char,
}

impl SubtitleAligner {
    pub fn new(config: &AlignmentConfig, markers: &Markers) -> Self {
        Self {
            config: config.clone(),
            start_marker: markers.start,
        }
    }

    /// Score below which nothing is paired: worse than two gaps
    pub fn rejected_score(&self) -> f64 {
        REJECTED_PAIR_FACTOR * 2.0 * self.config.gap_penalty
    }

    /// Align the subtitles of a whole file
    pub fn align_file(
        &self,
        from: &[SubtitleAttrs],
        to: &[SubtitleAttrs],
        mode: ScoringMode,
    ) -> Alignment<SubtitleAttrs> {
        self.align_with_floor(from, to, mode, self.config.file_band_floor)
    }

    /// Align the deleted and added subtitles of one diff hunk
    pub fn align_hunk(
        &self,
        deleted: &[SubtitleAttrs],
        added: &[SubtitleAttrs],
    ) -> Alignment<SubtitleAttrs> {
        self.align_with_floor(deleted, added, ScoringMode::Content, self.config.hunk_band_floor)
    }

    fn align_with_floor(
        &self,
        from: &[SubtitleAttrs],
        to: &[SubtitleAttrs],
        mode: ScoringMode,
        floor: usize,
    ) -> Alignment<SubtitleAttrs> {
        let band = sequence::band_width(from.len(), to.len(), self.config.band_growth, floor);
        sequence::align(
            from,
            to,
            &SubtitleAttrs::gap(),
            self.config.gap_penalty,
            band,
            |a, b| match mode {
                ScoringMode::Content => self.content_score(a, b),
                ScoringMode::Ids => self.id_score(a, b),
            },
        )
    }

    /// Score two subtitles by content similarity, on a 0-100 scale.
    ///
    /// Two matching subtitles that both open the document are locked
    /// together; an opening subtitle that no longer matches is scored like
    /// any other.
    pub fn content_score(&self, a: &SubtitleAttrs, b: &SubtitleAttrs) -> f64 {
        let a_sim = a.content_sim.as_str();
        let b_sim = b.content_sim.as_str();
        let a_len = a_sim.chars().count();
        let b_len = b_sim.chars().count();

        let abs_score = weighted_score(similarity(a_sim, b_sim, Truncation::Full), a_len.max(b_len));

        // Repeated phrases make prefix/suffix windows unreliable
        let best = if a.repetitions.is_empty() && b.repetitions.is_empty() {
            let truncated = a_len.min(b_len).min(TRUNCATE_TO);
            let left_score =
                weighted_score(similarity(a_sim, b_sim, Truncation::Left(TRUNCATE_TO)), truncated);
            let right_score =
                weighted_score(similarity(a_sim, b_sim, Truncation::Right(TRUNCATE_TO)), truncated)
                    - self.config.right_alignment_penalty;
            abs_score.max(left_score).max(right_score)
        } else {
            abs_score
        };

        if best < self.config.min_content_score {
            self.rejected_score()
        } else if self.opens_document(a) && self.opens_document(b) {
            STRONG_LOCK_SCORE
        } else {
            best
        }
    }

    fn opens_document(&self, subtitle: &SubtitleAttrs) -> bool {
        subtitle.content.starts_with(self.start_marker)
    }

    /// Score two subtitles by persistent ID
    pub fn id_score(&self, a: &SubtitleAttrs, b: &SubtitleAttrs) -> f64 {
        match (&a.persistent_id, &b.persistent_id) {
            (Some(x), Some(y)) if x == y => ID_MATCH_SCORE,
            (Some(_), Some(_)) => self.rejected_score(),
            _ => 0.0,
        }
    }
}

/// 80% similarity, 10% confidence, 10% length bonus
fn weighted_score(sim: Similarity, compared_len: usize) -> f64 {
    let length_bonus = 10.0 * compared_len.min(LENGTH_BONUS_CAP) as f64 / LENGTH_BONUS_CAP as f64;
    80.0 * sim.sim + 10.0 * sim.confidence + length_bonus
}

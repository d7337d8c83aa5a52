//! Generic Needleman-Wunsch global alignment with a diagonal band.
//!
//! Cells whose row and column differ by more than the band width are never
//! scored by the caller's function: they get a dominated score instead, so
//! a too-narrow band degrades alignment quality but never correctness.

/// Score given to pairings outside the diagonal band, as a multiple of the
/// gap penalty. Strictly worse than the two gaps the pairing would replace.
pub const OUT_OF_BAND_FACTOR: f64 = 2.5;

/// Share of the band width at which the realized offset counts as exhausted
const BAND_EXHAUSTION_RATIO: f64 = 0.9;

/// Backtracking step chosen while filling the matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// `a[i-1]` paired with `b[j-1]`
    Diagonal,
    /// `a[i-1]` paired with a gap
    Up,
    /// gap paired with `b[j-1]`
    Left,
}

/// Result of aligning two sequences
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment<T> {
    /// First sequence with gaps interleaved
    pub aligned_a: Vec<T>,
    /// Second sequence with gaps interleaved
    pub aligned_b: Vec<T>,
    /// Largest `|i - j|` visited by the optimal path
    pub max_offset: usize,
    /// Band width the alignment was computed with
    pub band_width: usize,
    /// Total score of the optimal path
    pub score: f64,
}

impl<T> Alignment<T> {
    /// Whether the optimal path came close to the band edge, a sign the
    /// alignment should be recomputed with a wider band
    pub fn band_exhausted(&self) -> bool {
        self.max_offset as f64 >= self.band_width as f64 * BAND_EXHAUSTION_RATIO
    }

    pub fn len(&self) -> usize {
        self.aligned_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aligned_a.is_empty()
    }
}

/// Band width proportional to the element count difference, with a floor
pub fn band_width(count_a: usize, count_b: usize, growth: f64, floor: usize) -> usize {
    let diff = count_a.abs_diff(count_b) as f64;
    ((diff * growth).round() as usize).max(floor)
}

/// Compute the maximum-score global alignment of `seq_a` and `seq_b`.
///
/// `score_fn(a, b)` scores pairing two elements; every gap costs
/// `gap_penalty` (negative). Ties between predecessors are broken in the
/// fixed order diagonal, up (gap in `b`), left (gap in `a`). Gap positions
/// in the output hold clones of `gap`.
pub fn align<T, F>(
    seq_a: &[T],
    seq_b: &[T],
    gap: &T,
    gap_penalty: f64,
    band_width: usize,
    mut score_fn: F,
) -> Alignment<T>
where
    T: Clone,
    F: FnMut(&T, &T) -> f64,
{
    let rows = seq_a.len() + 1;
    let cols = seq_b.len() + 1;
    let out_of_band = OUT_OF_BAND_FACTOR * gap_penalty;

    let mut scores = vec![0.0f64; rows * cols];
    let mut steps = vec![Step::Diagonal; rows * cols];

    for i in 1..rows {
        scores[i * cols] = i as f64 * gap_penalty;
        steps[i * cols] = Step::Up;
    }
    for j in 1..cols {
        scores[j] = j as f64 * gap_penalty;
        steps[j] = Step::Left;
    }

    for i in 1..rows {
        for j in 1..cols {
            let pair_score = if i.abs_diff(j) > band_width {
                out_of_band
            } else {
                score_fn(&seq_a[i - 1], &seq_b[j - 1])
            };

            let diagonal = scores[(i - 1) * cols + (j - 1)] + pair_score;
            let up = scores[(i - 1) * cols + j] + gap_penalty;
            let left = scores[i * cols + (j - 1)] + gap_penalty;

            let (best, step) = if diagonal >= up && diagonal >= left {
                (diagonal, Step::Diagonal)
            } else if up >= left {
                (up, Step::Up)
            } else {
                (left, Step::Left)
            };

            scores[i * cols + j] = best;
            steps[i * cols + j] = step;
        }
    }

    let mut aligned_a = Vec::with_capacity(rows + cols);
    let mut aligned_b = Vec::with_capacity(rows + cols);
    let mut max_offset = 0;
    let (mut i, mut j) = (seq_a.len(), seq_b.len());

    while i > 0 || j > 0 {
        max_offset = max_offset.max(i.abs_diff(j));
        match steps[i * cols + j] {
            Step::Diagonal => {
                aligned_a.push(seq_a[i - 1].clone());
                aligned_b.push(seq_b[j - 1].clone());
                i -= 1;
                j -= 1;
            }
            Step::Up => {
                aligned_a.push(seq_a[i - 1].clone());
                aligned_b.push(gap.clone());
                i -= 1;
            }
            Step::Left => {
                aligned_a.push(gap.clone());
                aligned_b.push(seq_b[j - 1].clone());
                j -= 1;
            }
        }
    }

    aligned_a.reverse();
    aligned_b.reverse();

    Alignment {
        aligned_a,
        aligned_b,
        max_offset,
        band_width,
        score: scores[rows * cols - 1],
    }
}

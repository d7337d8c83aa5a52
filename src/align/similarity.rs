//! LCS-based string similarity, repeated n-gram detection and
//! suffix/prefix overlap measurement.

use std::collections::{BTreeMap, HashMap};

/// Compared length at which confidence reaches 1.0
pub const CONFIDENCE_REFERENCE_LEN: usize = 30;

/// Default n-gram window for [`repetitions`]
pub const DEFAULT_REPETITION_WINDOW: usize = 10;

/// Similarity of two strings together with how much material backs it
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Similarity {
    /// LCS ratio in [0, 1]
    pub sim: f64,
    /// Confidence in [0, 1], grows with the compared length
    pub confidence: f64,
}

impl Similarity {
    pub const NONE: Similarity = Similarity {
        sim: 0.0,
        confidence: 0.0,
    };

    pub const EXACT: Similarity = Similarity {
        sim: 1.0,
        confidence: 1.0,
    };
}

/// Which part of the strings to compare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// Compare complete strings
    Full,
    /// Compare at most the first `n` characters of each string
    Left(usize),
    /// Compare at most the last `n` characters of each string
    Right(usize),
}

/// Compute similarity and confidence between `a` and `b`.
///
/// With a left/right truncation both strings are cut to
/// `min(shorter_length, n)` characters from the respective end, and
/// confidence is based on that compared length. Without truncation the
/// longer string's length drives confidence.
pub fn similarity(a: &str, b: &str, truncation: Truncation) -> Similarity {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    similarity_chars(&a, &b, truncation)
}

fn similarity_chars(a: &[char], b: &[char], truncation: Truncation) -> Similarity {
    if a.is_empty() || b.is_empty() {
        return Similarity::NONE;
    }

    let (a, b, reference_len) = match truncation {
        Truncation::Full => (a, b, a.len().max(b.len())),
        Truncation::Left(n) => {
            let len = a.len().min(b.len()).min(n);
            (&a[..len], &b[..len], len)
        }
        Truncation::Right(n) => {
            let len = a.len().min(b.len()).min(n);
            (&a[a.len() - len..], &b[b.len() - len..], len)
        }
    };

    if a.is_empty() || b.is_empty() {
        return Similarity::NONE;
    }
    if a == b {
        return Similarity::EXACT;
    }

    Similarity {
        sim: lcs_ratio_chars(a, b),
        confidence: confidence_for(reference_len),
    }
}

fn confidence_for(len: usize) -> f64 {
    (len as f64 / CONFIDENCE_REFERENCE_LEN as f64).min(1.0)
}

/// LCS length divided by the length of the longer string
pub fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    lcs_ratio_chars(&a, &b)
}

fn lcs_ratio_chars(a: &[char], b: &[char]) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 0.0;
    }
    longest_common_subsequence(a, b) as f64 / max_len as f64
}

/// Length of the longest common subsequence, O(n·m) time, two rows of memory
fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let n = b.len();
    let mut prev = vec![0usize; n + 1];
    let mut curr = vec![0usize; n + 1];

    for ca in a {
        for j in 1..=n {
            curr[j] = if *ca == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Find the most frequently repeated n-grams of `s`.
///
/// Slides a `window`-character window over `s`, keeps the windows that occur
/// as often as the most repeated one (nothing if no window repeats), then
/// chains windows whose occurrences are all shifted by exactly one character
/// into longer repeated runs. Keys are the repeated substrings, values their
/// character start positions.
pub fn repetitions(s: &str, window: usize) -> BTreeMap<String, Vec<usize>> {
    let chars: Vec<char> = s.chars().collect();
    let mut result = BTreeMap::new();
    if window == 0 || chars.len() < window {
        return result;
    }

    let mut buckets: HashMap<&[char], Vec<usize>> = HashMap::new();
    for start in 0..=chars.len() - window {
        buckets
            .entry(&chars[start..start + window])
            .or_default()
            .push(start);
    }

    let max_count = buckets.values().map(Vec::len).max().unwrap_or(0);
    if max_count <= 1 {
        return result;
    }

    let mut kept: Vec<Vec<usize>> = buckets
        .into_values()
        .filter(|positions| positions.len() == max_count)
        .collect();
    kept.sort();

    // A run is (positions of its first window, number of chained windows)
    let mut runs: Vec<(Vec<usize>, usize)> = Vec::new();
    for positions in kept {
        if let Some((first, chained)) = runs.last_mut() {
            let continues = first
                .iter()
                .zip(&positions)
                .all(|(start, next)| *next == start + *chained);
            if continues {
                *chained += 1;
                continue;
            }
        }
        runs.push((positions, 1));
    }

    for (positions, chained) in runs {
        let start = positions[0];
        let text: String = chars[start..start + window + chained - 1].iter().collect();
        result.entry(text).or_insert(positions);
    }

    result
}

/// Minimum LCS ratio an overlap of `len` characters must reach
fn overlap_threshold_met(len: usize, sim: f64) -> bool {
    match len {
        0..=2 => false,
        3..=4 => sim >= 1.0,
        5..=8 => sim >= 0.8,
        9..=10 => sim >= 0.75,
        11..=20 => sim > 0.7,
        _ => sim > 0.65,
    }
}

/// Length of the best suffix-of-`a` / prefix-of-`b` overlap.
///
/// Overlap lengths are tried from 2 upwards. Among lengths whose similarity
/// clears the length-dependent threshold the best-scoring one is kept; the
/// search stops at the first cleared length of at least `min_overlap`, or
/// when the shorter string is exhausted. Returns 0 if no length cleared.
pub fn overlap(a: &str, b: &str, min_overlap: usize) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().min(b.len());

    let mut best_len = 0;
    let mut best_sim = 0.0;

    for len in 2..=max_len {
        let suffix = &a[a.len() - len..];
        let prefix = &b[..len];
        let sim = lcs_ratio_chars(suffix, prefix);

        if overlap_threshold_met(len, sim) {
            if sim >= best_sim {
                best_len = len;
                best_sim = sim;
            }
            if len >= min_overlap {
                break;
            }
        }
    }

    best_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_strings_have_no_similarity() {
        assert_eq!(similarity("", "abc", Truncation::Full), Similarity::NONE);
        assert_eq!(similarity("abc", "", Truncation::Left(30)), Similarity::NONE);
        assert_eq!(similarity("", "", Truncation::Right(30)), Similarity::NONE);
    }

    #[test]
    fn test_identity_is_exact() {
        for s in ["a", "hello", "thequickbrownfoxjumpsoverthelazydog"] {
            assert_eq!(similarity(s, s, Truncation::Full), Similarity::EXACT);
        }
    }

    #[test]
    fn test_full_similarity_is_symmetric() {
        let pairs = [
            ("kitten", "sitting"),
            ("helloworld", "hello"),
            ("abcdefghijklmnopqrstuvwxyz", "zyxwvutsrqponmlkjihgfedcba"),
            ("subtitlesarefun", "subtitleswerefun"),
        ];
        for (a, b) in pairs {
            assert_eq!(
                similarity(a, b, Truncation::Full),
                similarity(b, a, Truncation::Full)
            );
        }
    }

    #[test]
    fn test_full_confidence_uses_longer_length() {
        let result = similarity("abcdef", "abcxyzabc", Truncation::Full);
        assert!((result.confidence - 9.0 / 30.0).abs() < 1e-9);
        // LCS "abc" over longer length 9
        assert!((result.sim - 3.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_caps_at_one() {
        let a = "a".repeat(40) + "b";
        let b = "a".repeat(40) + "c";
        let result = similarity(&a, &b, Truncation::Full);
        assert_eq!(result.confidence, 1.0);
        assert!((result.sim - 40.0 / 41.0).abs() < 1e-9);
    }

    #[test]
    fn test_left_truncation_compares_prefixes() {
        let result = similarity("helloworld", "hello", Truncation::Left(30));
        assert_eq!(result, Similarity::EXACT);

        let result = similarity("helloworld", "hello", Truncation::Right(30));
        assert!(result.sim < 0.5);
        assert!((result.confidence - 5.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_truncation_limits_compared_length() {
        let a = format!("{}{}", "x".repeat(30), "tail one");
        let b = format!("{}{}", "x".repeat(30), "another ending");
        assert_eq!(similarity(&a, &b, Truncation::Left(30)), Similarity::EXACT);

        let c = format!("{}{}", "y".repeat(10), "x".repeat(30));
        let d = format!("{}{}", "z".repeat(20), "x".repeat(30));
        assert_eq!(similarity(&c, &d, Truncation::Right(30)), Similarity::EXACT);
    }

    #[test]
    fn test_lcs_ratio() {
        assert_eq!(lcs_ratio("abc", "abc"), 1.0);
        assert_eq!(lcs_ratio("abc", "xyz"), 0.0);
        assert!((lcs_ratio("abcd", "abxd") - 0.75).abs() < 1e-9);
        assert_eq!(lcs_ratio("", ""), 0.0);
    }

    #[test]
    fn test_repetitions_none_without_repeats() {
        assert!(repetitions("abcdefghijklmnop", 4).is_empty());
        assert!(repetitions("abc", 4).is_empty());
    }

    #[test]
    fn test_repetitions_chain_into_longer_run() {
        // "abcdef" occurs at 0 and 9; windows of 4 chain into one run
        let reps = repetitions("abcdefxyzabcdef", 4);
        assert_eq!(reps.len(), 1);
        assert_eq!(reps.get("abcdef"), Some(&vec![0, 9]));
    }

    #[test]
    fn test_repetitions_keep_only_most_frequent() {
        // "abcd" three times, "wxyz" twice
        let reps = repetitions("abcd1abcd2abcd3wxyz4wxyz", 4);
        assert_eq!(reps.len(), 1);
        assert_eq!(reps.get("abcd"), Some(&vec![0, 5, 10]));
    }

    #[test]
    fn test_overlap_exact_four() {
        assert_eq!(overlap("xxxxabcd", "abcdyyyy", 0), 4);
    }

    #[test]
    fn test_overlap_short_lengths_never_count() {
        assert_eq!(overlap("xxab", "abyy", 0), 0);
    }

    #[test]
    fn test_overlap_four_requires_exact_match() {
        // best 4-char overlap "abcd" vs "abce" has ratio 0.75
        assert_eq!(overlap("qqqqabcd", "abceqqqq", 4), 0);
    }

    #[test]
    fn test_overlap_twelve_requires_above_point_seven() {
        // suffix/prefix of 12 sharing 9 characters in order: 0.75 > 0.7
        let a = "zzzzzzzzzzzzabcdefghi123";
        let b = "abcdefghi456zzzzzzzzzzzz";
        assert_eq!(overlap(a, b, 12), 12);

        // 8 of 12 in order: 0.667 is not enough, nothing shorter clears either
        let a = "zzzzzzzzzzzzabcdefgh1234";
        let b = "abcdefgh5678zzzzzzzzzzzz";
        assert_eq!(overlap(a, b, 12), 0);
    }

    #[test]
    fn test_overlap_zero_when_disjoint() {
        assert_eq!(overlap("abcdefgh", "ijklmnop", 0), 0);
    }
}

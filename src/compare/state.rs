use std::collections::HashMap;
use std::hash::Hash;

use crate::core::domain::{ScoreMethod, SimilarityScore};

/// Above this many character pairs the ratio is computed over lines instead.
const MAX_CHAR_PAIRS: usize = 25_000_000;

/// Similarity of two serialized states.
///
/// Byte-identical inputs score exactly 1.0. Otherwise the score is the
/// Ratcliff/Obershelp ratio `2 * M / (|a| + |b|)`, where `M` counts the
/// characters in recursively found longest common blocks. The pair is put in
/// a canonical order first so that swapping the arguments cannot change the
/// result.
pub fn compare_states(reference: &str, submission: &str) -> SimilarityScore {
    if reference == submission {
        return SimilarityScore::new(1.0, ScoreMethod::State);
    }
    let (a, b) = if (reference.len(), reference) <= (submission.len(), submission) {
        (reference, submission)
    } else {
        (submission, reference)
    };

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let value = if a_chars.len().saturating_mul(b_chars.len()) <= MAX_CHAR_PAIRS {
        ratio(&a_chars, &b_chars)
    } else {
        tracing::debug!(
            a = a_chars.len(),
            b = b_chars.len(),
            "state text too large for character matching, comparing lines"
        );
        let a_lines: Vec<&str> = a.lines().collect();
        let b_lines: Vec<&str> = b.lines().collect();
        ratio(&a_lines, &b_lines)
    };
    SimilarityScore::new(value, ScoreMethod::State)
}

/// Either side missing means there is nothing to compare.
pub fn compare_optional_states(
    reference: Option<&str>,
    submission: Option<&str>,
) -> SimilarityScore {
    match (reference, submission) {
        (Some(r), Some(s)) => compare_states(r, s),
        (None, _) => SimilarityScore::zero(ScoreMethod::State, "reference state is missing"),
        (_, None) => SimilarityScore::zero(ScoreMethod::State, "submission state is missing"),
    }
}

fn ratio<T: Eq + Hash>(a: &[T], b: &[T]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched(a, b) as f64 / total as f64
}

/// Total size of the matching blocks.
fn matched<T: Eq + Hash>(a: &[T], b: &[T]) -> usize {
    let mut index: HashMap<&T, Vec<usize>> = HashMap::new();
    for (j, item) in b.iter().enumerate() {
        index.entry(item).or_default().push(j);
    }

    let mut total = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, &index, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        total += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }
    total
}

/// Longest block `a[i..i+k] == b[j..j+k]` inside the given ranges; ties go
/// to the smallest `i`, then the smallest `j`.
fn longest_match<T: Eq + Hash>(
    a: &[T],
    index: &HashMap<&T, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best) = (alo, blo, 0);
    let mut lengths: HashMap<usize, usize> = HashMap::new();
    for (i, item) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = index.get(item) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| lengths.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, k);
                if k > best {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best = k;
                }
            }
        }
        lengths = next;
    }
    (best_i, best_j, best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_states_score_one() {
        let state = "Number of turtles: 1\n\nTurtle 1:\nPosition: 0.00, 0.00\n";
        assert_eq!(compare_states(state, state).value, 1.0);
    }

    #[test]
    fn test_known_ratio() {
        // "abcd" vs "bcde": one block "bcd", 2 * 3 / 8
        assert!((compare_states("abcd", "bcde").value - 0.75).abs() < 1e-12);
        assert_eq!(compare_states("abc", "xyz").value, 0.0);
        assert_eq!(compare_states("", "x").value, 0.0);
    }

    #[test]
    fn test_ratio_is_symmetric() {
        let pairs = [
            ("Heading: 90.00\nPen down: True", "Heading: 0.00\nPen down: False"),
            ("aaab", "abaa"),
            ("Position: 10.00, 5.00", "Position: 5.00, 10.00"),
        ];
        for (a, b) in pairs {
            assert_eq!(compare_states(a, b).value, compare_states(b, a).value);
        }
    }

    #[test]
    fn test_rotated_square_is_similar_but_not_equal() {
        let upright = "Number of turtles: 1\n\nTurtle 1:\nPosition: 0.00, 0.00\nHeading: 90.00\nPen down: True\n";
        let rotated = "Number of turtles: 1\n\nTurtle 1:\nPosition: 0.00, 0.00\nHeading: 0.00\nPen down: True\n";
        let score = compare_states(upright, rotated).value;
        assert!(score < 1.0 && score > 0.9, "score {}", score);
    }

    #[test]
    fn test_missing_side_scores_zero() {
        let score = compare_optional_states(None, Some("x"));
        assert_eq!(score.value, 0.0);
        assert!(score.note.is_some());
    }
}

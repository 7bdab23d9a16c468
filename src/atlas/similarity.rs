//! String similarity used to rank atlas entities against a query.
//!
//! Scores are tiered: an exact (case-insensitive) match is always 1.0, a
//! containment match is capped at 0.9 and scaled by the length ratio, and
//! anything else falls back to a Ratcliff/Obershelp matching-block ratio.

use std::collections::HashMap;

const CONTAINMENT_WEIGHT: f64 = 0.9;

/// Similarity of `a` and `b` in `[0, 1]`.
pub fn score(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    if a == b {
        return 1.0;
    }

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if contains(longer, shorter) {
        return CONTAINMENT_WEIGHT * shorter.len() as f64 / longer.len() as f64;
    }

    ratio(&a, &b)
}

fn contains(haystack: &[char], needle: &[char]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Ratcliff/Obershelp ratio: `2 * M / T` where `M` is the number of chars in
/// recursively found longest common blocks and `T` the combined length.
pub fn ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_chars(a, b);
    2.0 * matched as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut b_index: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        b_index.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, size) = longest_match(a, &b_index, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            queue.push((i + size, ahi, j + size, bhi));
        }
    }
    matched
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]`. Ties resolve to
/// the earliest block in `a`, then the earliest in `b`.
fn longest_match(
    a: &[char],
    b_index: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    // run lengths ending at (i - 1, j), keyed by j
    let mut prev: HashMap<usize, usize> = HashMap::new();

    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut current: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b_index.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let run = if j > 0 { prev.get(&(j - 1)).copied().unwrap_or(0) } else { 0 } + 1;
                current.insert(j, run);
                if run > best_size {
                    best_i = i + 1 - run;
                    best_j = j + 1 - run;
                    best_size = run;
                }
            }
        }
        prev = current;
    }

    (best_i, best_j, best_size)
}

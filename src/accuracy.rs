// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transcription accuracy scoring (§4.4): a from-scratch port of Python's
//! `difflib.SequenceMatcher(None, a, b).ratio()`, not a generic LCS or edit
//! distance — the original's behavior depends on `SequenceMatcher`'s
//! specific "longest matching block, recursively on the remainders" greedy
//! algorithm, and a different similarity metric would silently change
//! every accuracy value ever recorded.
//!
//! `ratio()` is `2.0 * M / T`, where `T` is the total length of both
//! sequences and `M` is the total length of all matching blocks found by
//! repeatedly taking the longest common contiguous run and recursing on
//! the left and right remainders.

/// Computes the SequenceMatcher ratio between two strings, after
/// lowercasing both (§4.4: the original always compares `a.lower()` and
/// `b.lower()`). Operates on `char` sequences, not bytes, so multi-byte
/// UTF-8 text compares correctly.
pub fn accuracy_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    ratio(&a, &b)
}

fn ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matches = total_matching_length(a, b);
    2.0 * matches as f64 / total as f64
}

fn total_matching_length(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut queue = vec![(0usize, a.len(), 0usize, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        total += size;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            queue.push((i + size, ahi, j + size, bhi));
        }
    }
    total
}

/// Finds the longest contiguous run common to `a[alo..ahi]` and
/// `b[blo..bhi]`, returning `(i, j, size)` — the match starts at `a[i]`
/// and `b[j]` and runs for `size` elements. Ties are broken the same way
/// `SequenceMatcher.find_longest_match` breaks them: the first (leftmost
/// in `a`, then leftmost in `b`) longest run wins.
///
/// This is the textbook dynamic-programming formulation restricted to a
/// sliding window of the previous row, which is what `SequenceMatcher`
/// itself reduces to once autojunk/duplicate-skipping (irrelevant for
/// short transcription/translation strings) are set aside.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut best_i = alo;
    let mut best_j = blo;
    let mut best_size = 0usize;

    // j2len[j] = length of the run ending at b[j] that matches a run in a
    // ending at the previously considered a-index.
    let mut j2len: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();

    for i in alo..ahi {
        let mut new_j2len: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();
        for j in blo..bhi {
            if a[i] == b[j] {
                let k = j2len.get(&j.wrapping_sub(1)).copied().unwrap_or(0) + 1;
                new_j2len.insert(j, k);
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            }
        }
        j2len = new_j2len;
    }

    (best_i, best_j, best_size)
}

//! Fuzzy title matching
//!
//! Library titles rarely match catalog titles byte for byte: release lists
//! carry region tags, bracketed dump info, edition suffixes and stray file
//! extensions. Matching therefore runs on a normalized form of both sides
//! and scores candidates on a 0-100 scale.

use std::collections::HashSet;

/// File extensions that sometimes leak into display titles.
const TITLE_EXTENSIONS: &[&str] = &[
    "iso", "cso", "ciso", "rvz", "zip", "7z", "rar", "bin", "pbp", "chd",
];

/// Edition/region words that carry no identity.
const NOISE_WORDS: &[&str] = &[
    "edition",
    "remastered",
    "remaster",
    "definitive",
    "deluxe",
    "goty",
    "usa",
    "europe",
    "japan",
    "world",
    "ntsc",
    "pal",
];

/// Reduces a raw title to a canonical lowercase word sequence.
///
/// Parenthesized and bracketed segments are dropped entirely, trailing
/// file extensions are stripped, punctuation becomes whitespace and
/// edition/region noise words are removed.
pub fn normalize_title(raw: &str) -> String {
    let lowered = raw.to_lowercase();

    // Step 1: drop (...) and [...] segments, including nested ones.
    let mut stripped = String::with_capacity(lowered.len());
    let mut paren_depth = 0usize;
    let mut bracket_depth = 0usize;
    for ch in lowered.chars() {
        match ch {
            '(' => paren_depth += 1,
            ')' => paren_depth = paren_depth.saturating_sub(1),
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            _ if paren_depth == 0 && bracket_depth == 0 => stripped.push(ch),
            _ => {}
        }
    }

    // Step 2: strip a trailing file extension if one survived.
    let mut trimmed = stripped.trim().to_string();
    for ext in TITLE_EXTENSIONS {
        let suffix = format!(".{ext}");
        if trimmed.ends_with(&suffix) {
            trimmed.truncate(trimmed.len() - suffix.len());
            break;
        }
    }

    // Step 3: punctuation to whitespace, then drop noise words.
    let cleaned: String = trimmed
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|word| !NOISE_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scores how alike two titles are, from 0 (unrelated) to 100 (identical).
///
/// Only exact normalized equality reaches 100; containment and word
/// overlap top out at 99 so an exact hit always wins.
pub fn similarity_score(a: &str, b: &str) -> u32 {
    let na = normalize_title(a);
    let nb = normalize_title(b);
    if na.is_empty() || nb.is_empty() {
        return 0;
    }
    if na == nb {
        return 100;
    }

    // One side containing the other is a strong signal, scaled by how
    // much of the longer title is covered.
    let (shorter, longer) = if na.len() <= nb.len() {
        (&na, &nb)
    } else {
        (&nb, &na)
    };
    if longer.contains(shorter.as_str()) {
        let ratio = shorter.len() as f64 * 100.0 / longer.len() as f64;
        return (ratio.round() as u32).min(99);
    }

    // Otherwise fall back to word-set overlap (Jaccard), with a bonus
    // when the leading word agrees since series names front-load it.
    let words_a: HashSet<&str> = na.split(' ').collect();
    let words_b: HashSet<&str> = nb.split(' ').collect();
    let intersection = words_a.intersection(&words_b).count();
    if intersection == 0 {
        return 0;
    }
    let union = words_a.union(&words_b).count();
    let mut score = intersection as f64 * 100.0 / union as f64;
    if na.split(' ').next() == nb.split(' ').next() {
        score *= 1.3;
    }
    (score.round() as u32).min(99)
}

/// Picks the best-scoring candidate at or above `min_score`.
///
/// Candidates are `(key, title)` pairs; ties on score resolve to the
/// lexicographically smaller key so repeated runs agree.
pub fn best_match<'a, I>(target: &str, candidates: I, min_score: u32) -> Option<(&'a str, u32)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut best: Option<(&'a str, u32)> = None;
    for (key, title) in candidates {
        let score = similarity_score(target, title);
        if score < min_score {
            continue;
        }
        best = match best {
            Some((best_key, best_score))
                if score < best_score || (score == best_score && key >= best_key) =>
            {
                Some((best_key, best_score))
            }
            _ => Some((key, score)),
        };
    }
    best
}

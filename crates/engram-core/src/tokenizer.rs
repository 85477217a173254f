use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::constants::CHARS_PER_TOKEN;

static BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

/// Tokenize text into lowercase whitespace-delimited terms.
/// No stemming and no punctuation stripping: relevance is purely lexical.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Raw occurrence count of each term in a token stream. Sorted, so sums
/// over it are evaluated in the same order every time.
pub fn term_counts(tokens: &[String]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for token in tokens {
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    counts
}

/// Estimate the model token cost of a piece of text.
///
/// Takes the larger of the whitespace word count and `chars / 4`, so both
/// prose and dense code/identifiers are estimated conservatively.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let words = text.split_whitespace().count();
    let by_chars = (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize;
    words.max(by_chars)
}

/// Split text into blocks separated by blank lines. Blocks are trimmed and
/// empty ones dropped.
pub fn split_blocks(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    BLANK_LINE
        .split(&normalized)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

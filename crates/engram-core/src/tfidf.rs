//! Lexical relevance: TF-IDF over a document-frequency index.
//!
//! The index keeps, for every lowercase term, the number of indexed entries
//! containing it. Admission and removal adjust counts symmetrically, so a
//! single entry's score costs O(unique terms) rather than O(corpus).

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::tokenizer::{term_counts, tokenize};

/// Unique terms of a piece of text.
pub fn unique_terms(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Square-root damped term frequency.
pub fn damped_tf(raw_count: usize) -> f64 {
    (raw_count as f64).sqrt()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelevanceIndex {
    /// Sorted so serialized snapshots are byte-stable.
    doc_freq: BTreeMap<String, usize>,
    total_documents: usize,
}

impl RelevanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build over a full corpus. O(n·m).
    pub fn build<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Self {
        let mut index = Self::new();
        for entry in entries {
            index.add_document(&entry.content);
        }
        index
    }

    pub fn total_documents(&self) -> usize {
        self.total_documents
    }

    pub fn term_count(&self) -> usize {
        self.doc_freq.len()
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    pub fn doc_freq(&self) -> &BTreeMap<String, usize> {
        &self.doc_freq
    }

    pub fn add_document(&mut self, text: &str) {
        self.add_terms(&unique_terms(text));
    }

    pub fn remove_document(&mut self, text: &str) {
        self.remove_terms(&unique_terms(text));
    }

    pub fn add_terms(&mut self, terms: &HashSet<String>) {
        for term in terms {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_documents += 1;
    }

    /// Decrement every term; terms reaching zero are dropped.
    pub fn remove_terms(&mut self, terms: &HashSet<String>) {
        for term in terms {
            if let Some(count) = self.doc_freq.get_mut(term) {
                *count -= 1;
                if *count == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        self.total_documents = self.total_documents.saturating_sub(1);
    }

    pub fn clear(&mut self) {
        self.doc_freq.clear();
        self.total_documents = 0;
    }

    /// `ln(N / df)`; zero for terms absent from the corpus.
    pub fn idf(&self, term: &str) -> f64 {
        let df = self.document_frequency(term);
        if df == 0 || self.total_documents == 0 {
            return 0.0;
        }
        (self.total_documents as f64 / df as f64).ln()
    }

    /// Mean per-token TF-IDF contribution of `text` against this corpus.
    pub fn score_text(&self, text: &str) -> f64 {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return 0.0;
        }
        let counts = term_counts(&tokens);
        let total: f64 = counts
            .iter()
            .map(|(term, &count)| damped_tf(count) * self.idf(term))
            .sum();
        total / tokens.len() as f64
    }

    pub fn score(&self, entry: &Entry) -> f64 {
        self.score_text(&entry.content)
    }

    /// Rebuild from a raw table, e.g. a restored snapshot.
    pub(crate) fn from_parts(doc_freq: BTreeMap<String, usize>, total_documents: usize) -> Self {
        Self {
            doc_freq,
            total_documents,
        }
    }
}

/// Cosine similarity of the raw term-frequency vectors of two texts.
pub fn cosine_similarity(a: &str, b: &str) -> f64 {
    let va = term_counts(&tokenize(a));
    let vb = term_counts(&tokenize(b));
    cosine_of_counts(&va, &vb)
}

pub fn cosine_of_counts(a: &BTreeMap<String, usize>, b: &BTreeMap<String, usize>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(term, &ca)| b.get(term).map(|&cb| (ca * cb) as f64))
        .sum();
    let norm_a: f64 = a.values().map(|&c| (c * c) as f64).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|&c| (c * c) as f64).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn corpus() -> Vec<Entry> {
        vec![
            Entry::new("rust borrow checker error", 1),
            Entry::new("rust async runtime", 2),
            Entry::new("python async await", 3),
        ]
    }

    #[test]
    fn test_build_counts() {
        let idx = RelevanceIndex::build(&corpus());
        assert_eq!(idx.total_documents(), 3);
        assert_eq!(idx.document_frequency("rust"), 2);
        assert_eq!(idx.document_frequency("async"), 2);
        assert_eq!(idx.document_frequency("python"), 1);
        assert_eq!(idx.document_frequency("missing"), 0);
    }

    #[test]
    fn test_repeated_term_counted_once_per_doc() {
        let mut idx = RelevanceIndex::new();
        idx.add_document("echo echo echo");
        assert_eq!(idx.document_frequency("echo"), 1);
    }

    #[test]
    fn test_idf() {
        let idx = RelevanceIndex::build(&corpus());
        assert_relative_eq!(idx.idf("python"), 3f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(idx.idf("rust"), 1.5f64.ln(), epsilon = 1e-12);
        assert_eq!(idx.idf("absent"), 0.0);
    }

    #[test]
    fn test_add_remove_symmetric() {
        let mut idx = RelevanceIndex::build(&corpus());
        let before = idx.clone();
        idx.add_document("brand new terms rust");
        assert_eq!(idx.total_documents(), 4);
        idx.remove_document("brand new terms rust");
        assert_eq!(idx, before);
    }

    #[test]
    fn test_incremental_matches_full_build() {
        let entries = corpus();
        let mut idx = RelevanceIndex::build(&entries);
        idx.remove_document(&entries[0].content);
        let rebuilt = RelevanceIndex::build(&entries[1..]);
        assert_eq!(idx, rebuilt);
    }

    #[test]
    fn test_score_is_mean_per_token() {
        let idx = RelevanceIndex::build(&corpus());
        // "python python": tf = sqrt(2), idf = ln 3, two tokens
        let s = idx.score_text("python python");
        assert_relative_eq!(s, 2f64.sqrt() * 3f64.ln() / 2.0, epsilon = 1e-12);
        assert_eq!(idx.score_text(""), 0.0);
    }

    #[test]
    fn test_score_is_case_insensitive() {
        let idx = RelevanceIndex::build(&corpus());
        assert_eq!(idx.score_text("PYTHON"), idx.score_text("python"));
    }

    #[test]
    fn test_cosine() {
        assert_relative_eq!(cosine_similarity("a b c", "a b c"), 1.0, epsilon = 1e-12);
        assert_eq!(cosine_similarity("a b", "c d"), 0.0);
        assert_eq!(cosine_similarity("", "a"), 0.0);
        assert_relative_eq!(cosine_similarity("a b", "a c"), 0.5, epsilon = 1e-12);
    }
}

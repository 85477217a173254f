//! Critical-event detection ("BTSP": one-shot learning of salient events).
//!
//! Errors, stack traces, merge conflicts and tool-call boundaries are the
//! fragments an agent can least afford to lose. Entries matching any of the
//! patterns here are marked critical upstream of the pruner, which then
//! admits them ahead of everything else.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::config::BtspConfig;
use crate::constants::BTSP_TTL_SECS;
use crate::entry::{ConfidenceState, Entry};

const BUILTIN_PATTERNS: &[&str] = &[
    // Error and exception keywords
    r"(?i)\b(error|exception|fatal|panic(ked)?|failed|failure|traceback)\b",
    // Exception type names
    r"\b(TypeError|ReferenceError|SyntaxError|RangeError|ValueError|KeyError|IndexError|AttributeError|ImportError|NullPointerException|IllegalArgumentException|IllegalStateException|RuntimeException|IOException)\b",
    // OS error codes
    r"\b(ENOENT|EACCES|EPERM|EEXIST|EADDRINUSE|ECONNREFUSED|ECONNRESET|ETIMEDOUT|ENOTFOUND|EPIPE|ENOMEM)\b",
    // JS stack frame: "    at fn (file.js:10:5)" / "    at file.js:10:5"
    r"(?m)^\s+at\s+\S+.*:\d+:\d+\)?\s*$",
    // Python stack frame
    r#"(?m)^\s*File ".+", line \d+"#,
    // Rust panic header
    r"thread '[^']*' panicked at",
    // Merge-conflict markers
    r"(?m)^(<{7}|={7}|>{7})(\s|$)",
    // Tool invocation boundaries
    r"</?(function_calls|invoke|tool_use|tool_result)\b",
    r"(?m)^\[?Tool (call|result|use)\b",
];

static BUILTIN: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    BUILTIN_PATTERNS
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

/// Ordered pattern list: built-ins first, then caller-supplied patterns.
#[derive(Clone, Debug, Default)]
pub struct CriticalEventDetector {
    custom: Vec<Regex>,
}

impl CriticalEventDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add custom patterns. Invalid regexes are logged and skipped.
    pub fn with_custom_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        for p in patterns {
            match Regex::new(p.as_ref()) {
                Ok(re) => self.custom.push(re),
                Err(e) => warn!(pattern = p.as_ref(), error = %e, "skipping invalid BTSP pattern"),
            }
        }
        self
    }

    pub fn from_config(config: &BtspConfig) -> Self {
        Self::new().with_custom_patterns(&config.custom_patterns)
    }

    pub fn pattern_count(&self) -> usize {
        BUILTIN.len() + self.custom.len()
    }

    pub fn detect(&self, content: &str) -> bool {
        BUILTIN
            .iter()
            .chain(self.custom.iter())
            .any(|re| re.is_match(content))
    }

    /// Build a critical entry: score 1.0, one-year TTL, `Active`.
    pub fn mark_critical(
        &self,
        content: &str,
        tags: BTreeSet<String>,
        metadata: &BTreeMap<String, serde_json::Value>,
        now: u64,
    ) -> Entry {
        Entry::new(content, now)
            .with_score(1.0)
            .with_ttl_secs(BTSP_TTL_SECS)
            .with_state(ConfidenceState::Active)
            .with_tags(tags)
            .with_metadata(metadata)
            .with_critical(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> CriticalEventDetector {
        CriticalEventDetector::new()
    }

    #[test]
    fn test_error_keywords() {
        assert!(detector().detect("Build failed with 3 errors"));
        assert!(detector().detect("FATAL: out of memory"));
        assert!(detector().detect("Unhandled exception in worker"));
    }

    #[test]
    fn test_exception_types() {
        assert!(detector().detect("TypeError: x is not a function"));
        assert!(detector().detect("java.lang.NullPointerException"));
    }

    #[test]
    fn test_os_codes() {
        assert!(detector().detect("open ./config.json: ENOENT"));
        assert!(detector().detect("listen EADDRINUSE :::3000"));
    }

    #[test]
    fn test_stack_frames() {
        assert!(detector().detect("something\n    at main (src/index.js:10:5)\n"));
        assert!(detector().detect("Traceback\n  File \"app.py\", line 3, in <module>"));
        assert!(detector().detect("thread 'main' panicked at src/main.rs:2:5"));
    }

    #[test]
    fn test_merge_conflict() {
        let text = "<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> feature\n";
        assert!(detector().detect(text));
    }

    #[test]
    fn test_tool_boundary() {
        assert!(detector().detect("<function_calls>\n<invoke name=\"x\">"));
        assert!(detector().detect("[Tool result] 42 lines"));
    }

    #[test]
    fn test_ordinary_text_not_critical() {
        assert!(!detector().detect("The quick brown fox jumps over the lazy dog."));
        assert!(!detector().detect("refactor the parser module for clarity"));
    }

    #[test]
    fn test_custom_patterns_and_invalid_skipped() {
        let d = detector().with_custom_patterns(&["DEPLOY-\\d+", "([unclosed", "(?i)rollback"]);
        assert_eq!(d.pattern_count(), BUILTIN_PATTERNS.len() + 2);
        assert!(d.detect("DEPLOY-42 started"));
        assert!(d.detect("ROLLBACK now"));
        assert!(!d.detect("deploy soon"));
    }

    #[test]
    fn test_mark_critical() {
        let mut tags = BTreeSet::new();
        tags.insert("btsp".to_string());
        let e = detector().mark_critical("panic!", tags, &BTreeMap::new(), 123);
        assert!(e.critical);
        assert_eq!(e.score, 1.0);
        assert_eq!(e.ttl_secs, 365 * 24 * 3600);
        assert_eq!(e.state, ConfidenceState::Active);
        assert_eq!(e.timestamp, 123);
        assert!(e.tags.contains("btsp"));
    }
}

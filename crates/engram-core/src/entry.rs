use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::{BTSP_SCORE_FLOOR, DEFAULT_TTL_SECS};
use crate::tokenizer::estimate_tokens;

/// Discrete confidence classification derived from an entry's score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceState {
    /// Below the ready threshold; first to go under budget pressure.
    #[default]
    Silent,
    /// Worth keeping if there is room.
    Ready,
    /// High confidence, or critical.
    Active,
}

impl ConfidenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::Ready => "ready",
            Self::Active => "active",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "ready" => Self::Ready,
            _ => Self::Silent,
        }
    }
}

/// SHA-256 of the content, lowercase hex. Used for dedup and cache keys.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A scored fragment of context text.
///
/// Entries are value objects: the engine never mutates one in place, it
/// builds a changed copy with the `with_*` methods. A critical entry is
/// always `Active` with a score of at least [`BTSP_SCORE_FLOOR`]; every
/// builder re-establishes that.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub content: String,
    /// Content fingerprint, see [`content_hash`].
    pub hash: String,
    /// Creation time, Unix milliseconds.
    pub timestamp: u64,
    /// Relevance score in [0, 1].
    pub score: f64,
    pub ttl_secs: u64,
    pub state: ConfidenceState,
    pub access_count: u32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub critical: bool,
}

impl Entry {
    /// New entry with score 1.0, the default TTL and `Active` state.
    pub fn new(content: impl Into<String>, timestamp: u64) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4(),
            hash: content_hash(&content),
            content,
            timestamp,
            score: 1.0,
            ttl_secs: DEFAULT_TTL_SECS,
            state: ConfidenceState::Active,
            access_count: 0,
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            critical: false,
        }
    }

    /// Estimated token cost of the content.
    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the score, clamped to [0, 1] (and floored for critical entries).
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = clamp_unit(score);
        self.enforce_critical()
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_state(mut self, state: ConfidenceState) -> Self {
        self.state = state;
        self.enforce_critical()
    }

    pub fn with_access_count(mut self, access_count: u32) -> Self {
        self.access_count = access_count;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Merge a metadata bag into this entry; incoming keys win.
    pub fn with_metadata(mut self, metadata: &BTreeMap<String, serde_json::Value>) -> Self {
        for (k, v) in metadata {
            self.metadata.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self.enforce_critical()
    }

    fn enforce_critical(mut self) -> Self {
        if self.critical {
            self.state = ConfidenceState::Active;
            self.score = self.score.max(BTSP_SCORE_FLOOR);
        }
        self
    }
}

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

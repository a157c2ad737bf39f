//! Cache / dedupe key for a translation request.
//!
//! Normalization policy: surrounding whitespace is trimmed from the text and
//! both language ids; interior whitespace and letter case are preserved.
//! Case is not folded because it carries meaning for translation (proper
//! nouns, acronyms, sentence starts), so "Hello" and "hello" are distinct
//! requests.

use serde::{Deserialize, Serialize};

/// Hex-encoded blake3 of (source | target | normalized text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(text: &str, source_language_id: &str, target_language_id: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source_language_id.trim().as_bytes());
        hasher.update(b"|");
        hasher.update(target_language_id.trim().as_bytes());
        hasher.update(b"|");
        hasher.update(normalize(text).as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short prefix is enough to correlate log lines.
        write!(f, "{}", self.0.get(..12).unwrap_or(&self.0))
    }
}

/// Text normalization applied before fingerprinting.
pub fn normalize(text: &str) -> &str {
    text.trim()
}

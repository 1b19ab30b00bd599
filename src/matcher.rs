use std::fmt;

use crate::gallery::Gallery;
use crate::Embedding;

/// Shown in place of a label when no entry is trusted.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// `None` means unknown.
    pub label: Option<String>,
    /// Highest similarity seen during the scan.
    pub score: f32,
}

impl MatchResult {
    pub fn is_known(&self) -> bool {
        self.label.is_some()
    }

    pub fn label_or_unknown(&self) -> &str {
        self.label.as_deref().unwrap_or(UNKNOWN)
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.3})", self.label_or_unknown(), self.score)
    }
}

/// Single pass over the gallery keeping the running best score.
///
/// The label is only committed when a score beats the running best and also
/// exceeds `threshold`; ties keep the earliest entry. Scores at or below 0
/// never become the running best.
pub fn best_match(probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
    let mut best_score = 0.0f32;
    let mut best_label: Option<&str> = None;

    for entry in gallery.entries() {
        let score = match_embedding(&entry.embedding, probe);
        if score > best_score {
            best_score = score;
            if score > threshold {
                best_label = Some(entry.label.as_str());
            }
        }
    }

    MatchResult {
        label: best_label.map(str::to_owned),
        score: best_score,
    }
}

pub fn match_embedding(a: &Embedding, b: &Embedding) -> f32 {
    facetag_vision::face::match_embedding(a, b)
}

//! Item classification - programmatic versus AI-required
//!
//! Classification is pure and synchronous. Programmatic items are resolved
//! in-process by the same classifier; everything else is batched for the
//! AI submission service.

use crate::domain::{ProcessingMode, WorkItem};
use crate::error::{BatchrError, Result};

/// Field holding the note explanation
pub const EXPLANATION_FIELD: &str = "explanation";

/// Field holding alternate translations separated by '/'
pub const ALTERNATE_FIELD: &str = "alternate";

const SEE_HOW: &str = "see how";

/// Decides how an item is resolved and resolves programmatic items
pub trait ItemClassifier: Send + Sync {
    fn classify(&self, item: &WorkItem) -> ProcessingMode;

    /// Produce the result text for an item classified as programmatic
    fn resolve_programmatic(&self, item: &WorkItem) -> Result<String>;
}

/// Rule-based classifier for cross-reference notes
///
/// An item whose explanation reads "see how <chapter>:<verse>" and that
/// already carries an alternate translation needs no generation: the note
/// is assembled from the reference and the alternates.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    fn explanation(item: &WorkItem) -> &str {
        item.field(EXPLANATION_FIELD).map(str::trim).unwrap_or("")
    }

    fn alternate(item: &WorkItem) -> &str {
        item.field(ALTERNATE_FIELD).map(str::trim).unwrap_or("")
    }

    fn is_see_how(explanation: &str) -> bool {
        explanation
            .get(..SEE_HOW.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(SEE_HOW))
    }
}

/// Format alternates as ` Alternate translation: [a] or [b]`
fn format_alternates(raw: &str) -> String {
    let parts: Vec<String> = raw
        .split('/')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("[{}]", p))
        .collect();
    if parts.is_empty() {
        return String::new();
    }
    format!(" Alternate translation: {}", parts.join(" or "))
}

fn format_reference(reference: &str) -> String {
    match reference.split_once(':') {
        Some((chapter, verse)) => {
            let (chapter, verse) = (chapter.trim(), verse.trim());
            format!("[{}:{}](../{:0>2}/{:0>2}.md)", chapter, verse, chapter, verse)
        }
        None => reference.to_string(),
    }
}

impl ItemClassifier for RuleClassifier {
    fn classify(&self, item: &WorkItem) -> ProcessingMode {
        if Self::is_see_how(Self::explanation(item)) && !Self::alternate(item).is_empty() {
            ProcessingMode::Programmatic
        } else {
            ProcessingMode::AiRequired
        }
    }

    fn resolve_programmatic(&self, item: &WorkItem) -> Result<String> {
        let explanation = Self::explanation(item);
        if !Self::is_see_how(explanation) {
            return Err(BatchrError::InvariantViolation(format!(
                "{} is not resolvable without generation",
                item.identity
            )));
        }
        let reference = explanation[SEE_HOW.len()..].trim();
        Ok(format!(
            "See how you translated the similar expression in {}.{}",
            format_reference(reference),
            format_alternates(Self::alternate(item))
        ))
    }
}

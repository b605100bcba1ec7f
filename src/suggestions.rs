//! Turns learned patterns into human-readable hints.

use crate::store::{LearningPattern, PatternType};

/// Orders patterns for one language into suggestions: the most confident
/// successful patterns first, then the most recent failures.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionRanker {
    pub max_successful: usize,
    pub max_failed: usize,
    pub min_confidence: f64,
}

impl Default for SuggestionRanker {
    fn default() -> Self {
        Self {
            max_successful: 5,
            max_failed: 3,
            min_confidence: 0.6,
        }
    }
}

impl SuggestionRanker {
    /// Builds the suggestion list from patterns already filtered to one
    /// language. Sorting is stable, so equal keys keep store order.
    pub fn rank(&self, patterns: &[LearningPattern]) -> Vec<String> {
        let mut successful: Vec<&LearningPattern> = patterns
            .iter()
            .filter(|p| p.pattern_type == PatternType::Successful)
            .filter(|p| p.confidence_score >= self.min_confidence)
            .collect();
        successful.sort_by(|a, b| b.confidence_score.total_cmp(&a.confidence_score));

        let mut failed: Vec<&LearningPattern> = patterns
            .iter()
            .filter(|p| p.pattern_type == PatternType::Failed)
            .collect();
        failed.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));

        successful
            .into_iter()
            .take(self.max_successful)
            .map(|p| {
                format!(
                    "✨ Based on {} successful generations, consider patterns similar to: {}",
                    p.occurrence_count, p.description
                )
            })
            .chain(
                failed
                    .into_iter()
                    .take(self.max_failed)
                    .map(|p| format!("⚠️ Avoid: {}", p.description)),
            )
            .collect()
    }
}

//! Feedback learning: rating trends and pattern bookkeeping.
//!
//! Nothing here is statistical. Patterns are counters and confidence scores
//! moved by fixed steps as ratings come in.

use crate::providers::TimeProvider;
use crate::store::{
    FeedbackRecord, FeedbackStore, LearningPattern, NewPattern, PatternChange, PatternType,
};
use crate::suggestions::SuggestionRanker;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Thresholds and limits of the learning engine (`[learning]` in the config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningSettings {
    /// Ratings at or above this are successes.
    pub success_threshold: u8,
    /// Ratings at or below this are failures.
    pub failure_threshold: u8,
    pub candidate_limit: usize,
    pub snippet_chars: usize,
    pub keyword_chars: usize,
    pub comment_chars: usize,
    pub success_confidence: f64,
    pub failure_confidence: f64,
    pub confidence_step: f64,
    pub max_successful_suggestions: usize,
    pub max_failed_suggestions: usize,
    pub min_suggestion_confidence: f64,
    pub improvement_rating: f64,
    pub improvement_min_count: usize,
    pub report_window_days: i64,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            success_threshold: 4,
            failure_threshold: 2,
            candidate_limit: 100,
            snippet_chars: 500,
            keyword_chars: 200,
            comment_chars: 100,
            success_confidence: 0.6,
            failure_confidence: 0.7,
            confidence_step: 0.05,
            max_successful_suggestions: 5,
            max_failed_suggestions: 3,
            min_suggestion_confidence: 0.6,
            improvement_rating: 3.5,
            improvement_min_count: 5,
            report_window_days: 30,
        }
    }
}

impl LearningSettings {
    pub fn ranker(&self) -> SuggestionRanker {
        SuggestionRanker {
            max_successful: self.max_successful_suggestions,
            max_failed: self.max_failed_suggestions,
            min_confidence: self.min_suggestion_confidence,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RatingStats {
    pub avg_rating: f64,
    pub total_feedback: usize,
    pub positive_count: usize,
    pub negative_count: usize,
}

/// Average rating of one language or model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub label: String,
    pub avg_rating: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub window_days: i64,
    pub overall: RatingStats,
    /// Sorted by label.
    pub by_language: Vec<GroupStats>,
    /// Sorted by label; outputs without a model are grouped as "unknown".
    pub by_model: Vec<GroupStats>,
}

/// A rated output picked as evidence for a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternCandidate {
    pub feedback_id: u64,
    pub language: String,
    pub prompt_text: String,
    /// Truncated to the configured snippet length.
    pub code_snippet: String,
    pub rating: u8,
    pub comments: Option<String>,
    pub model_used: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub successful_candidates: usize,
    pub failed_candidates: usize,
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub trends: TrendReport,
    pub needs_improvement: Vec<GroupStats>,
    pub total_patterns_learned: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningCycleReport {
    pub trends: TrendReport,
    pub update: UpdateSummary,
    pub performance: PerformanceReport,
}

/// Working copy of a successful pattern while a batch is being built.
struct PendingSuccess {
    existing_id: Option<u64>,
    pattern: NewPattern,
}

pub struct FeedbackLearningEngine {
    store: Arc<dyn FeedbackStore>,
    clock: Arc<dyn TimeProvider>,
    settings: LearningSettings,
}

impl FeedbackLearningEngine {
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        clock: Arc<dyn TimeProvider>,
        settings: LearningSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &LearningSettings {
        &self.settings
    }

    /// Aggregates ratings created within the last `window_days`.
    pub async fn analyze_trends(&self, window_days: i64) -> Result<TrendReport> {
        let cutoff = self.clock.now() - Duration::days(window_days);
        let records = self.store.feedback(Some(cutoff)).await?;
        debug!("{} ratings in the last {} days", records.len(), window_days);

        let total = records.len();
        let sum: u64 = records.iter().map(|r| u64::from(r.rating)).sum();
        let overall = RatingStats {
            avg_rating: if total == 0 { 0.0 } else { sum as f64 / total as f64 },
            total_feedback: total,
            positive_count: records
                .iter()
                .filter(|r| r.rating >= self.settings.success_threshold)
                .count(),
            negative_count: records
                .iter()
                .filter(|r| r.rating <= self.settings.failure_threshold)
                .count(),
        };

        Ok(TrendReport {
            window_days,
            overall,
            by_language: group_by(&records, |r| r.language.clone()),
            by_model: group_by(&records, |r| {
                r.model_used.clone().unwrap_or_else(|| "unknown".to_string())
            }),
        })
    }

    /// Picks rated outputs on one side of `threshold` over all feedback.
    ///
    /// Successful candidates (rating >= threshold) come highest rating first,
    /// failed ones (rating <= threshold) lowest first. Ties keep store order.
    pub async fn extract_patterns(
        &self,
        threshold: u8,
        direction: PatternType,
    ) -> Result<Vec<PatternCandidate>> {
        let mut records: Vec<FeedbackRecord> = self
            .store
            .feedback(None)
            .await?
            .into_iter()
            .filter(|r| match direction {
                PatternType::Successful => r.rating >= threshold,
                PatternType::Failed => r.rating <= threshold,
            })
            .collect();

        match direction {
            PatternType::Successful => records.sort_by(|a, b| b.rating.cmp(&a.rating)),
            PatternType::Failed => records.sort_by(|a, b| a.rating.cmp(&b.rating)),
        }

        Ok(records
            .into_iter()
            .take(self.settings.candidate_limit)
            .map(|r| PatternCandidate {
                feedback_id: r.id,
                code_snippet: truncate_chars(&r.code_snippet, self.settings.snippet_chars),
                language: r.language,
                prompt_text: r.prompt_text,
                rating: r.rating,
                comments: r.comments,
                model_used: r.model_used,
            })
            .collect())
    }

    /// Folds current candidates into the pattern store as one batch.
    ///
    /// Successful candidates merge into the first successful row of their
    /// language (creating it if needed); a row created earlier in the same
    /// batch counts as existing. Failed candidates always become new rows.
    pub async fn update_learning_patterns(&self) -> Result<UpdateSummary> {
        info!("Updating learning patterns");
        let now = self.clock.now();
        let successful = self
            .extract_patterns(self.settings.success_threshold, PatternType::Successful)
            .await?;
        let failed = self
            .extract_patterns(self.settings.failure_threshold, PatternType::Failed)
            .await?;

        let existing = self.store.patterns(None, Some(PatternType::Successful)).await?;
        let mut pending: Vec<PendingSuccess> = Vec::new();
        let mut by_language: HashMap<String, usize> = HashMap::new();

        for candidate in &successful {
            if let Some(&index) = by_language.get(&candidate.language) {
                let entry = &mut pending[index].pattern;
                entry.occurrence_count += 1;
                entry.confidence_score =
                    (entry.confidence_score + self.settings.confidence_step).min(1.0);
                entry.last_updated = now;
                continue;
            }

            let entry = match first_for_language(&existing, &candidate.language) {
                Some(row) => PendingSuccess {
                    existing_id: Some(row.id),
                    pattern: NewPattern {
                        language: row.language.clone(),
                        pattern_type: PatternType::Successful,
                        description: row.description.clone(),
                        prompt_keywords: row.prompt_keywords.clone(),
                        code_snippet: row.code_snippet.clone(),
                        avg_rating: row.avg_rating,
                        occurrence_count: row.occurrence_count + 1,
                        confidence_score: (row.confidence_score + self.settings.confidence_step)
                            .min(1.0),
                        last_updated: now,
                    },
                },
                None => PendingSuccess {
                    existing_id: None,
                    pattern: NewPattern {
                        language: candidate.language.clone(),
                        pattern_type: PatternType::Successful,
                        description: format!("High-rated {} code pattern", candidate.language),
                        prompt_keywords: truncate_chars(
                            &candidate.prompt_text,
                            self.settings.keyword_chars,
                        ),
                        code_snippet: candidate.code_snippet.clone(),
                        avg_rating: f64::from(candidate.rating),
                        occurrence_count: 1,
                        confidence_score: self.settings.success_confidence,
                        last_updated: now,
                    },
                },
            };
            by_language.insert(candidate.language.clone(), pending.len());
            pending.push(entry);
        }

        let mut summary = UpdateSummary {
            successful_candidates: successful.len(),
            failed_candidates: failed.len(),
            ..UpdateSummary::default()
        };
        let mut changes = Vec::with_capacity(pending.len() + failed.len());
        for entry in pending {
            match entry.existing_id {
                Some(id) => {
                    summary.updated += 1;
                    changes.push(PatternChange::Update {
                        id,
                        occurrence_count: entry.pattern.occurrence_count,
                        confidence_score: entry.pattern.confidence_score,
                        last_updated: entry.pattern.last_updated,
                    });
                }
                None => {
                    summary.inserted += 1;
                    changes.push(PatternChange::Insert(entry.pattern));
                }
            }
        }

        for candidate in &failed {
            let comment = candidate
                .comments
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or("No comment");
            summary.inserted += 1;
            changes.push(PatternChange::Insert(NewPattern {
                language: candidate.language.clone(),
                pattern_type: PatternType::Failed,
                description: format!(
                    "Low-rated pattern: {}",
                    truncate_chars(comment, self.settings.comment_chars)
                ),
                prompt_keywords: truncate_chars(&candidate.prompt_text, self.settings.keyword_chars),
                code_snippet: candidate.code_snippet.clone(),
                avg_rating: f64::from(candidate.rating),
                occurrence_count: 1,
                confidence_score: self.settings.failure_confidence,
                last_updated: now,
            }));
        }

        self.store.commit_patterns(changes).await?;
        info!(
            "Updated learning patterns: {} successful, {} problematic",
            summary.successful_candidates, summary.failed_candidates
        );
        Ok(summary)
    }

    /// Hints for generating code in `language`.
    pub async fn get_suggestions(&self, language: &str) -> Result<Vec<String>> {
        let patterns = self.store.patterns(Some(language), None).await?;
        Ok(self.settings.ranker().rank(&patterns))
    }

    pub async fn get_performance_report(&self) -> Result<PerformanceReport> {
        let trends = self.analyze_trends(self.settings.report_window_days).await?;
        let needs_improvement = trends
            .by_language
            .iter()
            .filter(|s| {
                s.avg_rating < self.settings.improvement_rating
                    && s.count > self.settings.improvement_min_count
            })
            .cloned()
            .collect();

        Ok(PerformanceReport {
            trends,
            needs_improvement,
            total_patterns_learned: self.store.count_patterns().await?,
            generated_at: self.clock.now(),
        })
    }

    /// Trends, then pattern maintenance, then a fresh report.
    pub async fn run_learning_cycle(&self) -> Result<LearningCycleReport> {
        info!("Starting feedback learning cycle");
        let trends = self.analyze_trends(self.settings.report_window_days).await?;
        info!(
            "Average rating {:.2}/5.0 over {} ratings ({} positive, {} negative)",
            trends.overall.avg_rating,
            trends.overall.total_feedback,
            trends.overall.positive_count,
            trends.overall.negative_count
        );

        let update = self.update_learning_patterns().await?;
        let performance = self.get_performance_report().await?;
        info!(
            "Learning cycle complete: {} patterns learned",
            performance.total_patterns_learned
        );

        Ok(LearningCycleReport {
            trends,
            update,
            performance,
        })
    }
}

fn first_for_language<'a>(patterns: &'a [LearningPattern], language: &str) -> Option<&'a LearningPattern> {
    patterns.iter().find(|p| p.language == language)
}

fn group_by<F>(records: &[FeedbackRecord], label: F) -> Vec<GroupStats>
where
    F: Fn(&FeedbackRecord) -> String,
{
    let mut groups: BTreeMap<String, (u64, usize)> = BTreeMap::new();
    for record in records {
        let entry = groups.entry(label(record)).or_default();
        entry.0 += u64::from(record.rating);
        entry.1 += 1;
    }
    groups
        .into_iter()
        .map(|(label, (sum, count))| GroupStats {
            label,
            avg_rating: sum as f64 / count as f64,
            count,
        })
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonStore, NewFeedback, NewOutput};
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Clock the test can move between writes.
    struct SteppingClock(Mutex<DateTime<Utc>>);

    impl SteppingClock {
        fn at(t: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(t)))
        }

        fn set(&self, t: DateTime<Utc>) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl TimeProvider for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    struct Fixture {
        clock: Arc<SteppingClock>,
        store: Arc<JsonStore>,
        engine: FeedbackLearningEngine,
    }

    fn fixture() -> Fixture {
        let clock = SteppingClock::at(start());
        let store = Arc::new(JsonStore::in_memory().with_clock(clock.clone()));
        let engine =
            FeedbackLearningEngine::new(store.clone(), clock.clone(), LearningSettings::default());
        Fixture {
            clock,
            store,
            engine,
        }
    }

    async fn rate(
        store: &JsonStore,
        language: &str,
        model: Option<&str>,
        rating: u8,
        comments: Option<&str>,
    ) {
        let output_id = store
            .save_output(NewOutput {
                prompt_text: format!("a {language} prompt"),
                language: language.to_string(),
                model_used: model.map(str::to_string),
                code: format!("{language} code"),
                raw_output: String::new(),
                elapsed_ms: 1,
                success: true,
                error: None,
                temperature: 0.3,
            })
            .await
            .unwrap();
        store
            .save_feedback(NewFeedback {
                output_id,
                rating,
                comments: comments.map(str::to_string),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_window_reports_zeros() {
        let f = fixture();
        let trends = f.engine.analyze_trends(30).await.unwrap();

        assert_eq!(trends.overall, RatingStats::default());
        assert_eq!(trends.overall.avg_rating, 0.0);
        assert!(trends.by_language.is_empty());
        assert!(trends.by_model.is_empty());
    }

    #[tokio::test]
    async fn test_trends_respect_window_and_group_by_label() {
        let f = fixture();
        rate(&f.store, "go", Some("m1"), 1, None).await;

        f.clock.set(start() + Duration::days(40));
        rate(&f.store, "rust", Some("m2"), 5, None).await;
        rate(&f.store, "python", Some("m1"), 4, None).await;
        rate(&f.store, "python", None, 2, None).await;

        let trends = f.engine.analyze_trends(30).await.unwrap();

        assert_eq!(trends.overall.total_feedback, 3);
        assert_eq!(trends.overall.positive_count, 2);
        assert_eq!(trends.overall.negative_count, 1);
        assert!((trends.overall.avg_rating - 11.0 / 3.0).abs() < 1e-9);

        let languages: Vec<(&str, usize)> = trends
            .by_language
            .iter()
            .map(|s| (s.label.as_str(), s.count))
            .collect();
        assert_eq!(languages, vec![("python", 2), ("rust", 1)]);
        assert_eq!(trends.by_language[0].avg_rating, 3.0);

        let models: Vec<&str> = trends.by_model.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(models, vec!["m1", "m2", "unknown"]);
    }

    #[tokio::test]
    async fn test_extract_orders_by_rating_and_truncates() {
        let f = fixture();
        rate(&f.store, "a", None, 4, None).await;
        rate(&f.store, "b", None, 5, None).await;
        rate(&f.store, "c", None, 4, None).await;
        rate(&f.store, "d", None, 1, None).await;
        rate(&f.store, "e", None, 2, None).await;

        let successful = f.engine.extract_patterns(4, PatternType::Successful).await.unwrap();
        let order: Vec<&str> = successful.iter().map(|c| c.language.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);

        let failed = f.engine.extract_patterns(2, PatternType::Failed).await.unwrap();
        let order: Vec<&str> = failed.iter().map(|c| c.language.as_str()).collect();
        assert_eq!(order, vec!["d", "e"]);
    }

    #[tokio::test]
    async fn test_extract_caps_candidates_and_snippets() {
        let clock = SteppingClock::at(start());
        let store = Arc::new(JsonStore::in_memory().with_clock(clock.clone()));
        let settings = LearningSettings {
            candidate_limit: 2,
            snippet_chars: 3,
            ..LearningSettings::default()
        };
        let engine = FeedbackLearningEngine::new(store.clone(), clock, settings);
        for _ in 0..4 {
            rate(&store, "rust", None, 5, None).await;
        }

        let successful = engine.extract_patterns(4, PatternType::Successful).await.unwrap();
        assert_eq!(successful.len(), 2);
        assert_eq!(successful[0].code_snippet, "rus");
    }

    #[tokio::test]
    async fn test_repeated_successes_raise_confidence_stepwise() {
        let f = fixture();
        for _ in 0..10 {
            rate(&f.store, "python", Some("m"), 5, None).await;
            f.engine.update_learning_patterns().await.unwrap();
        }

        let patterns = f
            .store
            .patterns(Some("python"), Some(PatternType::Successful))
            .await
            .unwrap();
        assert_eq!(patterns.len(), 1);
        // Every cycle re-reads all feedback, so cycle k adds k occurrences.
        assert_eq!(patterns[0].occurrence_count, 55);
        assert_eq!(patterns[0].confidence_score, 1.0);
        assert_eq!(patterns[0].description, "High-rated python code pattern");
    }

    #[tokio::test]
    async fn test_batch_merges_are_visible_within_the_batch() {
        let f = fixture();
        for _ in 0..3 {
            rate(&f.store, "go", None, 5, None).await;
        }

        let summary = f.engine.update_learning_patterns().await.unwrap();

        assert_eq!(summary.successful_candidates, 3);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.updated, 0);
        let patterns = f.store.patterns(Some("go"), None).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].occurrence_count, 3);
        let expected = (0.6_f64 + 0.05 * 2.0).min(1.0);
        assert!((patterns[0].confidence_score - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_existing_row_is_updated_not_duplicated() {
        let f = fixture();
        rate(&f.store, "go", None, 4, None).await;
        f.engine.update_learning_patterns().await.unwrap();

        f.clock.set(start() + Duration::hours(1));
        let summary = f.engine.update_learning_patterns().await.unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.inserted, 0);
        let patterns = f.store.patterns(Some("go"), None).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].occurrence_count, 2);
        assert!((patterns[0].confidence_score - 0.65).abs() < 1e-9);
        assert_eq!(patterns[0].last_updated, start() + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_failed_candidates_always_insert() {
        let f = fixture();
        rate(&f.store, "go", None, 1, Some("does not compile")).await;
        rate(&f.store, "go", None, 2, None).await;
        rate(&f.store, "go", None, 2, Some("   ")).await;

        let summary = f.engine.update_learning_patterns().await.unwrap();

        assert_eq!(summary.failed_candidates, 3);
        assert_eq!(summary.inserted, 3);
        let failed = f
            .store
            .patterns(Some("go"), Some(PatternType::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 3);
        assert_eq!(failed[0].description, "Low-rated pattern: does not compile");
        assert_eq!(failed[1].description, "Low-rated pattern: No comment");
        assert!(failed.iter().all(|p| p.confidence_score == 0.7));
    }

    #[tokio::test]
    async fn test_long_comments_are_cut_in_descriptions() {
        let f = fixture();
        let comment = "é".repeat(150);
        rate(&f.store, "c", None, 1, Some(&comment)).await;

        f.engine.update_learning_patterns().await.unwrap();

        let failed = f.store.patterns(Some("c"), None).await.unwrap();
        let kept = failed[0].description.trim_start_matches("Low-rated pattern: ");
        assert_eq!(kept.chars().count(), 100);
    }

    #[tokio::test]
    async fn test_suggestions_come_from_learned_patterns() {
        let f = fixture();
        rate(&f.store, "rust", None, 5, None).await;
        rate(&f.store, "rust", None, 1, Some("panics on empty input")).await;
        rate(&f.store, "go", None, 1, Some("other language")).await;
        f.engine.update_learning_patterns().await.unwrap();

        let suggestions = f.engine.get_suggestions("rust").await.unwrap();

        assert_eq!(
            suggestions,
            vec![
                "✨ Based on 1 successful generations, consider patterns similar to: High-rated rust code pattern",
                "⚠️ Avoid: Low-rated pattern: panics on empty input",
            ]
        );
    }

    #[tokio::test]
    async fn test_needs_improvement_requires_more_than_five_ratings() {
        let f = fixture();
        for _ in 0..5 {
            rate(&f.store, "php", None, 2, None).await;
        }
        let report = f.engine.get_performance_report().await.unwrap();
        assert!(report.needs_improvement.is_empty());

        rate(&f.store, "php", None, 3, None).await;
        let report = f.engine.get_performance_report().await.unwrap();
        assert_eq!(report.needs_improvement.len(), 1);
        assert_eq!(report.needs_improvement[0].label, "php");
        assert_eq!(report.generated_at, start());
    }

    #[tokio::test]
    async fn test_learning_cycle_reports_each_stage() {
        let f = fixture();
        rate(&f.store, "python", Some("m"), 5, None).await;
        rate(&f.store, "python", Some("m"), 1, None).await;

        let report = f.engine.run_learning_cycle().await.unwrap();

        assert_eq!(report.trends.overall.total_feedback, 2);
        assert_eq!(report.update.successful_candidates, 1);
        assert_eq!(report.update.failed_candidates, 1);
        assert_eq!(report.performance.total_patterns_learned, 2);
    }
}

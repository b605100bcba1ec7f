//! Persistence for generated outputs, their ratings, and learned patterns.
//!
//! [`FeedbackStore`] is the contract the learning engine reads and writes
//! through. [`JsonStore`] keeps everything in one JSON document, either on
//! disk or purely in memory.

use crate::providers::{SystemTimeProvider, TimeProvider};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Successful,
    Failed,
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            PatternType::Successful => "successful",
            PatternType::Failed => "failed",
        })
    }
}

impl FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "successful" | "success" => Ok(PatternType::Successful),
            "failed" | "failure" => Ok(PatternType::Failed),
            other => Err(format!(
                "unknown pattern type '{other}' (expected successful or failed)"
            )),
        }
    }
}

/// A generation result as handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutput {
    pub prompt_text: String,
    pub language: String,
    pub model_used: Option<String>,
    pub code: String,
    pub raw_output: String,
    pub elapsed_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub output: NewOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFeedback {
    pub output_id: u64,
    pub rating: u8,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredFeedback {
    id: u64,
    output_id: u64,
    rating: u8,
    comments: Option<String>,
    created_at: DateTime<Utc>,
}

/// A rating joined with the output it rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackRecord {
    pub id: u64,
    pub output_id: u64,
    pub rating: u8,
    pub language: String,
    pub model_used: Option<String>,
    pub prompt_text: String,
    pub code_snippet: String,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningPattern {
    pub id: u64,
    pub language: String,
    pub pattern_type: PatternType,
    pub description: String,
    pub prompt_keywords: String,
    pub code_snippet: String,
    pub avg_rating: f64,
    pub occurrence_count: u32,
    pub confidence_score: f64,
    pub last_updated: DateTime<Utc>,
}

/// Fields of a pattern that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPattern {
    pub language: String,
    pub pattern_type: PatternType,
    pub description: String,
    pub prompt_keywords: String,
    pub code_snippet: String,
    pub avg_rating: f64,
    /// Stored as at least 1.
    pub occurrence_count: u32,
    pub confidence_score: f64,
    pub last_updated: DateTime<Utc>,
}

/// One mutation inside a [`FeedbackStore::commit_patterns`] batch.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternChange {
    Insert(NewPattern),
    Update {
        id: u64,
        occurrence_count: u32,
        confidence_score: f64,
        last_updated: DateTime<Utc>,
    },
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Persists a generation and returns its id.
    async fn save_output(&self, output: NewOutput) -> Result<u64>;

    /// Attaches a 1..=5 rating to an existing output and returns its id.
    async fn save_feedback(&self, feedback: NewFeedback) -> Result<u64>;

    /// Feedback created at or after `since` (all when `None`), in store order.
    async fn feedback(&self, since: Option<DateTime<Utc>>) -> Result<Vec<FeedbackRecord>>;

    async fn patterns(
        &self,
        language: Option<&str>,
        pattern_type: Option<PatternType>,
    ) -> Result<Vec<LearningPattern>>;

    async fn count_patterns(&self) -> Result<usize>;

    /// Applies every change or none of them.
    async fn commit_patterns(&self, changes: Vec<PatternChange>) -> Result<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    outputs: Vec<OutputRecord>,
    #[serde(default)]
    feedback: Vec<StoredFeedback>,
    #[serde(default)]
    patterns: Vec<LearningPattern>,
}

impl StoreData {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// JSON document store. Every mutation is applied to a copy, written
/// (temp file then rename), and only then made visible.
pub struct JsonStore {
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
    clock: Arc<dyn TimeProvider>,
}

impl JsonStore {
    /// A store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(StoreData::default()),
            clock: Arc::new(SystemTimeProvider),
        }
    }

    /// Opens the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Corrupt store file: {}", path.display()))?
        } else {
            StoreData::default()
        };
        info!(
            "Store opened at {} ({} outputs, {} ratings, {} patterns)",
            path.display(),
            data.outputs.len(),
            data.feedback.len(),
            data.patterns.len()
        );
        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
            clock: Arc::new(SystemTimeProvider),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn output(&self, id: u64) -> Option<OutputRecord> {
        self.data.read().await.outputs.iter().find(|o| o.id == id).cloned()
    }

    fn persist(&self, data: &StoreData) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(data)?;
        fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!("Store written to {}", path.display());
        Ok(())
    }

    /// Runs `apply` on a copy of the data and commits it if both the
    /// mutation and the write succeed.
    async fn mutate<T>(&self, apply: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut guard = self.data.write().await;
        let mut next = guard.clone();
        let value = apply(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(value)
    }
}

#[async_trait]
impl FeedbackStore for JsonStore {
    async fn save_output(&self, output: NewOutput) -> Result<u64> {
        let created_at = self.clock.now();
        self.mutate(|data| {
            let id = data.allocate_id();
            data.outputs.push(OutputRecord {
                id,
                created_at,
                output,
            });
            Ok(id)
        })
        .await
    }

    async fn save_feedback(&self, feedback: NewFeedback) -> Result<u64> {
        if !(1..=5).contains(&feedback.rating) {
            bail!("rating must be between 1 and 5, got {}", feedback.rating);
        }
        let created_at = self.clock.now();
        self.mutate(|data| {
            if !data.outputs.iter().any(|o| o.id == feedback.output_id) {
                bail!("no generated output with id {}", feedback.output_id);
            }
            let id = data.allocate_id();
            data.feedback.push(StoredFeedback {
                id,
                output_id: feedback.output_id,
                rating: feedback.rating,
                comments: feedback.comments,
                created_at,
            });
            Ok(id)
        })
        .await
    }

    async fn feedback(&self, since: Option<DateTime<Utc>>) -> Result<Vec<FeedbackRecord>> {
        let data = self.data.read().await;
        let records = data
            .feedback
            .iter()
            .filter(|f| since.is_none_or(|cutoff| f.created_at >= cutoff))
            .filter_map(|f| {
                let output = data.outputs.iter().find(|o| o.id == f.output_id)?;
                Some(FeedbackRecord {
                    id: f.id,
                    output_id: f.output_id,
                    rating: f.rating,
                    language: output.output.language.clone(),
                    model_used: output.output.model_used.clone(),
                    prompt_text: output.output.prompt_text.clone(),
                    code_snippet: output.output.code.clone(),
                    comments: f.comments.clone(),
                    created_at: f.created_at,
                })
            })
            .collect();
        Ok(records)
    }

    async fn patterns(
        &self,
        language: Option<&str>,
        pattern_type: Option<PatternType>,
    ) -> Result<Vec<LearningPattern>> {
        let data = self.data.read().await;
        Ok(data
            .patterns
            .iter()
            .filter(|p| language.is_none_or(|l| p.language == l))
            .filter(|p| pattern_type.is_none_or(|t| p.pattern_type == t))
            .cloned()
            .collect())
    }

    async fn count_patterns(&self) -> Result<usize> {
        Ok(self.data.read().await.patterns.len())
    }

    async fn commit_patterns(&self, changes: Vec<PatternChange>) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let count = changes.len();
        self.mutate(|data| {
            for change in changes {
                match change {
                    PatternChange::Insert(new) => {
                        let id = data.allocate_id();
                        data.patterns.push(LearningPattern {
                            id,
                            language: new.language,
                            pattern_type: new.pattern_type,
                            description: new.description,
                            prompt_keywords: new.prompt_keywords,
                            code_snippet: new.code_snippet,
                            avg_rating: new.avg_rating,
                            occurrence_count: new.occurrence_count.max(1),
                            confidence_score: new.confidence_score.clamp(0.0, 1.0),
                            last_updated: new.last_updated,
                        });
                    }
                    PatternChange::Update {
                        id,
                        occurrence_count,
                        confidence_score,
                        last_updated,
                    } => {
                        let pattern = data
                            .patterns
                            .iter_mut()
                            .find(|p| p.id == id)
                            .ok_or_else(|| anyhow!("no learning pattern with id {id}"))?;
                        pattern.occurrence_count = occurrence_count;
                        pattern.confidence_score = confidence_score.clamp(0.0, 1.0);
                        pattern.last_updated = last_updated;
                    }
                }
            }
            Ok(())
        })
        .await?;
        debug!("Committed {} pattern changes", count);
        Ok(())
    }
}

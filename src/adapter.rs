//! The provider adapter: one backend, one code path.
//!
//! Every backend family gets the same adapter, parameterized by its
//! [`ChatTransport`] and its [`ModelPreferences`]. Prompt templating, output
//! extraction, timing and the model-not-found fallback are implemented here
//! once.

use crate::error::TransportError;
use crate::extractor::extract;
use crate::generation::{GenerationRequest, GenerationResult};
use crate::model_selector::ModelPreferences;
use crate::prompts;
use crate::stream::{GenerationStream, StreamEvent, StreamSink};
use crate::transport::{ChatRequest, ChatTransport, ChunkStream, ProviderKind};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Cached result of the last availability probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderCapabilitySnapshot {
    pub is_available: bool,
    /// Model ids in the order the backend reported them.
    pub known_models: Vec<String>,
    /// Whether a probe has run since construction or the last invalidation.
    #[serde(skip)]
    pub checked: bool,
}

/// Talks to one backend through its transport.
pub struct ProviderAdapter {
    transport: Arc<dyn ChatTransport>,
    preferences: ModelPreferences,
    default_model: Option<String>,
    snapshot: RwLock<ProviderCapabilitySnapshot>,
}

impl ProviderAdapter {
    /// Creates an adapter with the built-in preference table for the
    /// transport's backend family.
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        let preferences = ModelPreferences::for_provider(transport.kind());
        Self {
            transport,
            preferences,
            default_model: None,
            snapshot: RwLock::new(ProviderCapabilitySnapshot::default()),
        }
    }

    /// Process-wide model used whenever a request carries no override.
    pub fn with_default_model(mut self, model: Option<String>) -> Self {
        self.default_model = model.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn with_preferences(mut self, preferences: ModelPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.transport.kind()
    }

    pub async fn snapshot(&self) -> ProviderCapabilitySnapshot {
        self.snapshot.read().await.clone()
    }

    /// Probes the backend once and caches the outcome. Never fails: any
    /// error is reported as unavailable with no models.
    pub async fn check_availability(&self) -> ProviderCapabilitySnapshot {
        let fresh = match self.transport.list_models().await {
            Ok(models) => {
                debug!("{} lists {} models", self.kind(), models.len());
                ProviderCapabilitySnapshot {
                    is_available: true,
                    known_models: models,
                    checked: true,
                }
            }
            Err(err) => {
                warn!("{} availability check failed: {}", self.kind(), err);
                ProviderCapabilitySnapshot {
                    is_available: false,
                    known_models: Vec::new(),
                    checked: true,
                }
            }
        };
        *self.snapshot.write().await = fresh.clone();
        fresh
    }

    /// Probes only if no probe has run since the last invalidation.
    pub async fn ensure_checked(&self) -> ProviderCapabilitySnapshot {
        {
            let snapshot = self.snapshot.read().await;
            if snapshot.checked {
                return snapshot.clone();
            }
        }
        self.check_availability().await
    }

    /// Forgets the cached probe so the next call re-probes.
    pub async fn invalidate(&self) {
        self.snapshot.write().await.checked = false;
    }

    /// Picks a model: explicit override, then the configured default, then
    /// the preference table against the cached model list.
    pub async fn select_model(&self, explicit_override: Option<&str>) -> Option<String> {
        let chosen = explicit_override.or(self.default_model.as_deref());
        let snapshot = self.snapshot.read().await;
        self.preferences.select(&snapshot.known_models, chosen)
    }

    /// Generates code for a request. All failures are folded into the
    /// returned result.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        if let Err(err) = self.transport.ensure_configured() {
            return GenerationResult::failed(err.to_string(), 0, None);
        }
        if let Some(problem) = request.validate() {
            return GenerationResult::failed(problem, 0, None);
        }

        let start = Instant::now();
        let Some(model) = self.select_model(request.model.as_deref()).await else {
            return GenerationResult::failed(
                format!("no model available for {}", self.kind()),
                elapsed_ms(start),
                None,
            );
        };

        let mut chat = ChatRequest::new(
            model.clone(),
            prompts::generation_messages(&request.language, &request.prompt),
        );
        chat.temperature = Some(request.temperature);
        chat.max_tokens = Some(request.max_tokens);

        info!("Generating {} code with {} ({})", request.language, model, self.kind());
        let (outcome, answered_by) = match self.transport.complete_chat(&chat).await {
            Err(err) if err.is_model_not_found() => {
                warn!("Model {} not found on {}: {}", model, self.kind(), err);
                match self.fallback_model(&model).await {
                    Some(fallback) => {
                        info!("Retrying once with {}", fallback);
                        let retry = self.transport.complete_chat(&chat.with_model(fallback.clone())).await;
                        (retry, fallback)
                    }
                    None => (Err(err), model.clone()),
                }
            }
            other => (other, model.clone()),
        };

        let elapsed = elapsed_ms(start);
        match outcome {
            Ok(raw_output) => {
                let code = extract(&raw_output, &request.language);
                info!("Code generated by {} in {}ms", answered_by, elapsed);
                GenerationResult::succeeded(code, raw_output, elapsed, answered_by)
            }
            Err(err) => {
                warn!("Generation failed on {}: {}", self.kind(), err);
                GenerationResult::failed(err.to_string(), elapsed, Some(model))
            }
        }
    }

    /// First known model other than the one that was rejected.
    async fn fallback_model(&self, rejected: &str) -> Option<String> {
        self.snapshot
            .read()
            .await
            .known_models
            .iter()
            .find(|m| m.as_str() != rejected)
            .cloned()
    }

    /// Streams a generation. The producer runs on its own task; the
    /// returned stream always ends with exactly one terminal event.
    pub fn stream_generate(
        self: &Arc<Self>,
        prompt: &str,
        language: &str,
        model: Option<&str>,
    ) -> GenerationStream {
        let (sink, stream) = GenerationStream::channel();
        let adapter = Arc::clone(self);
        let prompt = prompt.to_string();
        let language = language.to_string();
        let model = model.map(str::to_string);

        tokio::spawn(async move {
            if let Some(terminal) = adapter.produce(&sink, &prompt, &language, model.as_deref()).await {
                sink.finish(terminal).await;
            } else {
                debug!("Stream consumer went away; producer stopped");
            }
        });

        stream
    }

    /// Returns the terminal event, or `None` if the consumer left first.
    async fn produce(
        &self,
        sink: &StreamSink,
        prompt: &str,
        language: &str,
        model: Option<&str>,
    ) -> Option<StreamEvent> {
        if let Err(err) = self.transport.ensure_configured() {
            return Some(StreamEvent::Error(err.to_string()));
        }
        if prompt.trim().is_empty() {
            return Some(StreamEvent::Error("prompt must not be empty".to_string()));
        }
        let Some(model) = self.select_model(model).await else {
            return Some(StreamEvent::Error(format!("no model available for {}", self.kind())));
        };

        let chat = ChatRequest::new(model, prompts::stream_messages(language, prompt));
        let opened: Result<ChunkStream, TransportError> = tokio::select! {
            _ = sink.closed() => return None,
            opened = self.transport.stream_chat(&chat) => opened,
        };
        let mut chunks = match opened {
            Ok(chunks) => chunks,
            Err(err) => return Some(StreamEvent::Error(err.to_string())),
        };

        // `chunks` is dropped on every return path below, which closes the
        // backend connection.
        loop {
            let next = tokio::select! {
                _ = sink.closed() => return None,
                next = chunks.next() => next,
            };
            match next {
                Some(Ok(text)) => {
                    if !sink.send_content(text).await {
                        return None;
                    }
                }
                Some(Err(err)) => return Some(StreamEvent::Error(err.to_string())),
                None => return Some(StreamEvent::Complete),
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

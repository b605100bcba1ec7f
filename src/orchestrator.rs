//! Routes generation requests to registered provider adapters.

use crate::adapter::{ProviderAdapter, ProviderCapabilitySnapshot};
use crate::config::Config;
use crate::generation::{GenerationRequest, GenerationResult};
use crate::http_client::HttpClient;
use crate::mock::MockTransport;
use crate::ollama::OllamaTransport;
use crate::openai_compat::{OPENAI_DEFAULT_MODEL, OpenAiCompatTransport};
use crate::stream::GenerationStream;
use crate::transport::{ChatTransport, ProviderKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Registry of adapters with one default provider.
///
/// There is no cross-provider fallback: a request either goes to the chosen
/// adapter or fails.
pub struct GenerationOrchestrator {
    adapters: BTreeMap<ProviderKind, Arc<ProviderAdapter>>,
    active: ProviderKind,
}

impl GenerationOrchestrator {
    pub fn new(active: ProviderKind) -> Self {
        Self {
            adapters: BTreeMap::new(),
            active,
        }
    }

    /// Builds one adapter per backend family from the configuration. In mock
    /// mode every family is served by the offline transport.
    pub fn from_config(config: &Config, http: Arc<dyn HttpClient>) -> Self {
        let probe_timeout = config.http.probe_timeout();
        let mut orchestrator = Self::new(config.provider);

        for kind in ProviderKind::ALL {
            let backend = config.backend(kind);
            let transport: Arc<dyn ChatTransport> = if config.is_mock_mode() {
                Arc::new(MockTransport::offline(kind))
            } else {
                match kind {
                    ProviderKind::OpenAi => Arc::new(
                        OpenAiCompatTransport::openai(
                            http.clone(),
                            backend.api_key.clone(),
                            backend.base_url.clone(),
                        )
                        .with_probe_timeout(probe_timeout),
                    ),
                    ProviderKind::Groq => Arc::new(
                        OpenAiCompatTransport::groq(
                            http.clone(),
                            backend.api_key.clone(),
                            backend.base_url.clone(),
                        )
                        .with_probe_timeout(probe_timeout),
                    ),
                    ProviderKind::Ollama => Arc::new(
                        OllamaTransport::new(http.clone(), backend.base_url.clone())
                            .with_probe_timeout(probe_timeout),
                    ),
                }
            };
            let default_model = backend.model.clone().or_else(|| {
                (kind == ProviderKind::OpenAi && !config.is_mock_mode())
                    .then(|| OPENAI_DEFAULT_MODEL.to_string())
            });
            let adapter = ProviderAdapter::new(transport).with_default_model(default_model);
            orchestrator.register(adapter);
        }

        if config.is_mock_mode() {
            info!("Using mock transports (use_mock is set)");
        }
        orchestrator
    }

    /// Adds or replaces the adapter for its backend family.
    pub fn register(&mut self, adapter: ProviderAdapter) {
        self.adapters.insert(adapter.kind(), Arc::new(adapter));
    }

    pub fn active(&self) -> ProviderKind {
        self.active
    }

    pub fn set_active(&mut self, kind: ProviderKind) {
        self.active = kind;
    }

    fn adapter(&self, choice: Option<ProviderKind>) -> Result<&Arc<ProviderAdapter>, String> {
        let kind = choice.unwrap_or(self.active);
        self.adapters
            .get(&kind)
            .ok_or_else(|| format!("provider {kind} is not registered"))
    }

    /// Generates with the chosen (or default) provider, probing it first if
    /// it has never been probed.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        choice: Option<ProviderKind>,
    ) -> GenerationResult {
        let adapter = match self.adapter(choice) {
            Ok(adapter) => adapter,
            Err(message) => {
                warn!("{}", message);
                return GenerationResult::failed(message, 0, None);
            }
        };
        adapter.ensure_checked().await;
        adapter.generate(request).await
    }

    pub async fn stream_generate(
        &self,
        prompt: &str,
        language: &str,
        model: Option<&str>,
        choice: Option<ProviderKind>,
    ) -> GenerationStream {
        match self.adapter(choice) {
            Ok(adapter) => {
                adapter.ensure_checked().await;
                adapter.stream_generate(prompt, language, model)
            }
            Err(message) => {
                warn!("{}", message);
                GenerationStream::failed(message)
            }
        }
    }

    /// Forces a fresh probe. `None` when the provider is not registered.
    pub async fn check_availability(
        &self,
        choice: Option<ProviderKind>,
    ) -> Option<ProviderCapabilitySnapshot> {
        let adapter = self.adapter(choice).ok()?;
        Some(adapter.check_availability().await)
    }

    /// Drops the cached probe for one provider, or all of them.
    pub async fn invalidate(&self, choice: Option<ProviderKind>) {
        match choice {
            Some(kind) => {
                if let Some(adapter) = self.adapters.get(&kind) {
                    adapter.invalidate().await;
                }
            }
            None => {
                for adapter in self.adapters.values() {
                    adapter.invalidate().await;
                }
            }
        }
    }

    /// Registered providers with their cached snapshots, in kind order.
    pub async fn providers(&self) -> Vec<(ProviderKind, ProviderCapabilitySnapshot)> {
        let mut providers = Vec::with_capacity(self.adapters.len());
        for (kind, adapter) in &self.adapters {
            providers.push((*kind, adapter.snapshot().await));
        }
        providers
    }
}

//! Deterministic offline transport.
//!
//! Used for `use_mock` mode (no network, no credentials) through
//! [`MockTransport::offline`]. The rest of the builder is a public test
//! double for [`ProviderAdapter`](crate::adapter::ProviderAdapter): it scripts
//! replies, per-model failures and delays, stream chunks and hangs, and
//! records what the adapter asked for. Integration tests link the library
//! without `cfg(test)`, so these hooks stay public.

use crate::error::TransportError;
use crate::transport::{ChatRequest, ChatTransport, ChunkStream, ProviderKind};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub struct MockTransport {
    kind: ProviderKind,
    models: Vec<String>,
    available: bool,
    configuration_error: Option<String>,
    reply: Option<String>,
    failures: HashMap<String, TransportError>,
    delays: HashMap<String, Duration>,
    chunks: Option<Vec<String>>,
    stream_error: Option<TransportError>,
    hang: bool,
    list_calls: AtomicUsize,
    chat_models: Mutex<Vec<String>>,
    released: Arc<AtomicBool>,
    release_notify: Arc<Notify>,
}

impl MockTransport {
    /// A reachable backend with no models and no canned reply.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            models: Vec::new(),
            available: true,
            configuration_error: None,
            reply: None,
            failures: HashMap::new(),
            delays: HashMap::new(),
            chunks: None,
            stream_error: None,
            hang: false,
            list_calls: AtomicUsize::new(0),
            chat_models: Mutex::new(Vec::new()),
            released: Arc::new(AtomicBool::new(false)),
            release_notify: Arc::new(Notify::new()),
        }
    }

    /// The transport registered in mock mode: one model per backend.
    pub fn offline(kind: ProviderKind) -> Self {
        let model = format!("mock-{kind}-coder");
        Self::new(kind).with_models(&[model.as_str()])
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Every chat against `model` fails with `error`.
    pub fn fail_model(mut self, model: &str, error: TransportError) -> Self {
        self.failures.insert(model.to_string(), error);
        self
    }

    /// Every chat against `model` waits `delay` before answering or failing.
    pub fn delay_model(mut self, model: &str, delay: Duration) -> Self {
        self.delays.insert(model.to_string(), delay);
        self
    }

    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = Some(chunks.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Emitted after the chunks instead of a clean end.
    pub fn with_stream_error(mut self, error: TransportError) -> Self {
        self.stream_error = Some(error);
        self
    }

    /// After the chunks the stream never yields again.
    pub fn hang_after_chunks(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn unconfigured(mut self, message: impl Into<String>) -> Self {
        self.configuration_error = Some(message.into());
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Models requested by chat and stream calls, in call order.
    pub fn chat_models(&self) -> Vec<String> {
        self.chat_models.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Resolves once a stream handed out by this transport has been dropped.
    pub async fn wait_for_stream_release(&self) {
        loop {
            if self.released.load(Ordering::SeqCst) {
                return;
            }
            self.release_notify.notified().await;
        }
    }

    fn record(&self, model: &str) {
        if let Ok(mut models) = self.chat_models.lock() {
            models.push(model.to_string());
        }
    }

    fn reply_for(&self, request: &ChatRequest) -> String {
        if let Some(reply) = &self.reply {
            return reply.clone();
        }
        let asked = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .and_then(|m| m.content.lines().next())
            .unwrap_or_default();
        format!(
            "Here is a mock implementation:\n```\n// {} mock output\n// {}\n```",
            self.kind, asked
        )
    }
}

/// Sets the release flag when the stream holding it is dropped.
struct ReleaseGuard {
    released: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn ensure_configured(&self) -> Result<(), TransportError> {
        match &self.configuration_error {
            Some(message) => Err(TransportError::Configuration(message.clone())),
            None => Ok(()),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_configured()?;
        if !self.available {
            return Err(TransportError::Unavailable(format!("mock {} is offline", self.kind)));
        }
        Ok(self.models.clone())
    }

    async fn complete_chat(&self, request: &ChatRequest) -> Result<String, TransportError> {
        self.record(&request.model);
        if let Some(delay) = self.delays.get(&request.model) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(error) = self.failures.get(&request.model) {
            return Err(error.clone());
        }
        Ok(self.reply_for(request))
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        self.record(&request.model);
        if let Some(error) = self.failures.get(&request.model) {
            return Err(error.clone());
        }

        let chunks = self.chunks.clone().unwrap_or_else(|| {
            self.reply_for(request)
                .split_inclusive(' ')
                .map(str::to_string)
                .collect()
        });
        let mut items: Vec<Result<String, TransportError>> = chunks.into_iter().map(Ok).collect();
        if let Some(error) = &self.stream_error {
            items.push(Err(error.clone()));
        }

        let body = futures::stream::iter(items);
        let body = if self.hang {
            body.chain(futures::stream::pending()).boxed()
        } else {
            body.boxed()
        };

        let guard = ReleaseGuard {
            released: Arc::clone(&self.released),
            notify: Arc::clone(&self.release_notify),
        };
        let guarded = futures::stream::unfold((body, guard), |(mut body, guard)| async move {
            let item = body.next().await?;
            Some((item, (body, guard)))
        });
        Ok(guarded.boxed())
    }
}

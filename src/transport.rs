//! The transport capability interface every backend implements.
//!
//! A transport knows how to authenticate against one backend, list its
//! models, run a chat completion and stream one. Everything else (model
//! selection, prompting, extraction, fallback) lives in the
//! [`ProviderAdapter`](crate::adapter::ProviderAdapter) and is shared.

use crate::error::TransportError;
use crate::http_client::ByteStream;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The backend families the orchestrator can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Groq,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::OpenAi, ProviderKind::Groq, ProviderKind::Ollama];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Groq => "groq",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "groq" => Ok(ProviderKind::Groq),
            "ollama" | "local" => Ok(ProviderKind::Ollama),
            other => Err(format!(
                "unknown provider '{other}' (expected openai, groq or ollama)"
            )),
        }
    }
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A backend-neutral chat request. Transports translate it to their wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Same messages and sampling, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }
}

/// Text chunks in the order the backend emitted them.
pub type ChunkStream = BoxStream<'static, Result<String, TransportError>>;

/// Backend-specific plumbing behind a provider adapter.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Checks local configuration (credentials, endpoint) without any I/O.
    fn ensure_configured(&self) -> Result<(), TransportError>;

    /// Lists model identifiers in the backend's own order.
    async fn list_models(&self) -> Result<Vec<String>, TransportError>;

    /// Runs one chat completion and returns the assistant text.
    async fn complete_chat(&self, request: &ChatRequest) -> Result<String, TransportError>;

    /// Starts a streamed chat completion.
    ///
    /// Dropping the returned stream must release the underlying connection.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError>;
}

/// Reassembles a byte stream into newline-delimited lines.
///
/// Both server-sent events and NDJSON are line oriented, while the network
/// delivers arbitrary slices. A trailing line without a newline is still
/// yielded. After a read error nothing more is yielded.
pub(crate) fn lines(body: ByteStream) -> BoxStream<'static, anyhow::Result<String>> {
    futures::stream::unfold(
        (body, Vec::<u8>::new(), false),
        |(mut body, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    return Some((Ok(line), (body, buf, done)));
                }
                if done {
                    if buf.is_empty() {
                        return None;
                    }
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    buf.clear();
                    return Some((Ok(line), (body, buf, done)));
                }
                match body.next().await {
                    Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                    Some(Err(err)) => {
                        buf.clear();
                        return Some((Err(err), (body, buf, true)));
                    }
                    None => done = true,
                }
            }
        },
    )
    .boxed()
}

//! Transport for OpenAI-compatible chat completion APIs (OpenAI and Groq).

use crate::error::TransportError;
use crate::http_client::HttpClient;
use crate::transport::{ChatRequest, ChatTransport, ChunkStream, ProviderKind, lines};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
/// Model OpenAI requests use unless the configuration names another.
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Only the first few ids of OpenAI's very long model list are kept.
const OPENAI_LIST_LIMIT: usize = 25;

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<Value>,
}

/// Chat transport speaking the OpenAI REST dialect.
pub struct OpenAiCompatTransport {
    kind: ProviderKind,
    http: Arc<dyn HttpClient>,
    base_url: String,
    api_key: Option<String>,
    key_var: &'static str,
    top_p: Option<f32>,
    list_limit: Option<usize>,
    probe_timeout: Duration,
}

impl OpenAiCompatTransport {
    /// OpenAI: bearer key, `top_p` 0.9, listing truncated.
    pub fn openai(http: Arc<dyn HttpClient>, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            http,
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            key_var: "OPENAI_API_KEY",
            top_p: Some(0.9),
            list_limit: Some(OPENAI_LIST_LIMIT),
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// Groq: bearer key, default sampling, full listing.
    pub fn groq(http: Arc<dyn HttpClient>, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            kind: ProviderKind::Groq,
            http,
            base_url: base_url.unwrap_or_else(|| GROQ_BASE_URL.to_string()),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            key_var: "GROQ_API_KEY",
            top_p: None,
            list_limit: None,
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> Result<&str, TransportError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| TransportError::Configuration(format!("{} is not set", self.key_var)))
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = self.top_p {
            body["top_p"] = json!(top_p);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }
}

/// Maps an error status and payload to a transport error.
fn classify_failure(status: u16, body: &str) -> TransportError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|e| e.error.code.as_ref())
        .and_then(|c| c.as_str().map(str::to_string));
    let message = match &parsed {
        Some(envelope) if !envelope.error.message.is_empty() => envelope.error.message.clone(),
        _ => format!("HTTP {status}: {}", body.trim()),
    };
    let message = match &code {
        Some(code) => format!("{code}: {message}"),
        None => message,
    };

    let lower = message.to_lowercase();
    if status == 404
        || code.as_deref() == Some("model_not_found")
        || lower.contains("model_not_found")
        || (lower.contains("model") && lower.contains("does not exist"))
    {
        TransportError::ModelNotFound(message)
    } else {
        TransportError::Backend(message)
    }
}

#[async_trait]
impl ChatTransport for OpenAiCompatTransport {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn ensure_configured(&self) -> Result<(), TransportError> {
        self.api_key().map(|_| ())
    }

    async fn list_models(&self) -> Result<Vec<String>, TransportError> {
        let auth = format!("Bearer {}", self.api_key()?);
        let response = self
            .http
            .get(&self.url("models"), &[("Authorization", auth.as_str())], Some(self.probe_timeout))
            .await?;
        if !response.is_success() {
            return Err(classify_failure(response.status, &response.body));
        }

        let list: ModelList = response
            .json()
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        let ids = list.data.into_iter().map(|m| m.id);
        Ok(match self.list_limit {
            Some(limit) => ids.take(limit).collect(),
            None => ids.collect(),
        })
    }

    async fn complete_chat(&self, request: &ChatRequest) -> Result<String, TransportError> {
        let auth = format!("Bearer {}", self.api_key()?);
        let body = self.request_body(request, false);
        let response = self
            .http
            .post_json(&self.url("chat/completions"), &[("Authorization", auth.as_str())], &body)
            .await?;
        if !response.is_success() {
            return Err(classify_failure(response.status, &response.body));
        }

        let completion: Completion = response
            .json()
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::InvalidResponse("no choices in completion".to_string()))?
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();
        Ok(content)
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        let auth = format!("Bearer {}", self.api_key()?);
        let body = self.request_body(request, true);
        let response = self
            .http
            .post_json_streaming(&self.url("chat/completions"), &[("Authorization", auth.as_str())], &body)
            .await?;
        if !response.is_success() {
            let status = response.status;
            let text = response.into_text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        // A body that closes before `[DONE]` was cut short.
        let events = futures::stream::unfold(Some(lines(response.body)), |state| async move {
            let mut lines = state?;
            match lines.next().await {
                Some(Ok(line)) if line.trim() == "data: [DONE]" => None,
                Some(Ok(line)) => Some((Ok(line), Some(lines))),
                Some(Err(err)) => Some((Err(TransportError::from(err)), None)),
                None => Some((
                    Err(TransportError::Backend("stream ended before [DONE]".to_string())),
                    None,
                )),
            }
        });

        let chunks = events
            .filter_map(|line| async move {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => return Some(Err(err)),
                };
                let payload = line.strip_prefix("data:")?.trim();
                if payload.is_empty() {
                    return None;
                }
                if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(payload) {
                    return Some(Err(TransportError::Backend(envelope.error.message)));
                }
                match serde_json::from_str::<StreamChunk>(payload) {
                    Ok(chunk) => chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta)
                        .and_then(|d| d.content)
                        .filter(|c| !c.is_empty())
                        .map(Ok),
                    Err(err) => {
                        debug!("Skipping unparseable stream line: {}", err);
                        None
                    }
                }
            })
            .boxed();

        Ok(chunks)
    }
}

//! Transport for a local Ollama server.

use crate::error::TransportError;
use crate::http_client::HttpClient;
use crate::transport::{ChatRequest, ChatTransport, ChunkStream, ProviderKind, lines};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Deserialize)]
struct Tags {
    #[serde(default)]
    models: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

/// Both the buffered reply and every NDJSON stream line share this shape.
#[derive(Debug, Deserialize)]
struct ChatReply {
    message: Option<ReplyMessage>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

/// Chat transport for Ollama's native API. No authentication.
pub struct OllamaTransport {
    http: Arc<dyn HttpClient>,
    base_url: String,
    probe_timeout: Duration,
}

impl OllamaTransport {
    pub fn new(http: Arc<dyn HttpClient>, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
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

    fn request_body(request: &ChatRequest, stream: bool) -> Value {
        let mut options = json!({ "top_p": 0.9 });
        if let Some(temperature) = request.temperature {
            options["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
            "options": options,
        })
    }
}

fn classify_failure(status: u16, body: &str) -> TransportError {
    let message = serde_json::from_str::<ChatReply>(body)
        .ok()
        .and_then(|reply| reply.error)
        .unwrap_or_else(|| format!("HTTP {status}: {}", body.trim()));
    if status == 404 || message.to_lowercase().contains("not found") {
        TransportError::ModelNotFound(message)
    } else {
        TransportError::Backend(message)
    }
}

#[async_trait]
impl ChatTransport for OllamaTransport {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn ensure_configured(&self) -> Result<(), TransportError> {
        if self.base_url.trim().is_empty() {
            return Err(TransportError::Configuration(
                "OLLAMA_BASE_URL is empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>, TransportError> {
        self.ensure_configured()?;
        let response = self
            .http
            .get(&self.url("api/tags"), &[], Some(self.probe_timeout))
            .await?;
        if !response.is_success() {
            return Err(TransportError::Unavailable(format!(
                "HTTP {} from {}",
                response.status, self.base_url
            )));
        }
        let tags: Tags = response
            .json()
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|t| t.name).collect())
    }

    async fn complete_chat(&self, request: &ChatRequest) -> Result<String, TransportError> {
        self.ensure_configured()?;
        let body = Self::request_body(request, false);
        let response = self.http.post_json(&self.url("api/chat"), &[], &body).await?;
        if !response.is_success() {
            return Err(classify_failure(response.status, &response.body));
        }

        let reply: ChatReply = response
            .json()
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        if let Some(error) = reply.error {
            return Err(TransportError::Backend(error));
        }
        Ok(reply.message.map(|m| m.content).unwrap_or_default())
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        self.ensure_configured()?;
        let body = Self::request_body(request, true);
        let response = self
            .http
            .post_json_streaming(&self.url("api/chat"), &[], &body)
            .await?;
        if !response.is_success() {
            let status = response.status;
            let text = response.into_text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        let chunks = lines(response.body)
            .filter_map(|line| async move {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => return Some(Err(TransportError::from(err))),
                };
                if line.trim().is_empty() {
                    return None;
                }
                match serde_json::from_str::<ChatReply>(&line) {
                    Ok(ChatReply { error: Some(error), .. }) => Some(Err(TransportError::Backend(error))),
                    Ok(reply) => reply
                        .message
                        .map(|m| m.content)
                        .filter(|c| !c.is_empty())
                        .map(Ok),
                    Err(err) => Some(Err(TransportError::InvalidResponse(err.to_string()))),
                }
            })
            .boxed();

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpResponse;
    use crate::http_client::tests::MockHttpClient;
    use crate::transport::ChatMessage;

    fn request() -> ChatRequest {
        let mut request = ChatRequest::new("codellama:7b", vec![ChatMessage::user("hi")]);
        request.temperature = Some(0.2);
        request.max_tokens = Some(256);
        request
    }

    #[tokio::test]
    async fn test_list_models_reads_tags() {
        let http = Arc::new(MockHttpClient::new(vec![Ok(HttpResponse::new(
            200,
            json!({"models": [{"name": "mistral:latest"}, {"name": "codellama:7b"}]}).to_string(),
        ))]));
        let transport = OllamaTransport::new(http.clone(), None);

        let models = transport.list_models().await.unwrap();
        assert_eq!(models, vec!["mistral:latest", "codellama:7b"]);
        assert_eq!(http.requests.lock().unwrap()[0].url, "http://localhost:11434/api/tags");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let http = Arc::new(MockHttpClient::new(vec![Err(anyhow::anyhow!("connection refused"))]));
        let transport = OllamaTransport::new(http, None);

        let err = transport.list_models().await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_complete_chat_sends_options() {
        let http = Arc::new(MockHttpClient::new(vec![Ok(HttpResponse::new(
            200,
            json!({"message": {"role": "assistant", "content": "print(1)"}, "done": true}).to_string(),
        ))]));
        let transport = OllamaTransport::new(http.clone(), Some("http://gpu-box:11434/".into()));

        assert_eq!(transport.complete_chat(&request()).await.unwrap(), "print(1)");

        let requests = http.requests.lock().unwrap();
        assert_eq!(requests[0].url, "http://gpu-box:11434/api/chat");
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 256);
        assert!(body["options"]["top_p"].is_number());
    }

    #[tokio::test]
    async fn test_missing_model_is_model_not_found() {
        let http = Arc::new(MockHttpClient::new(vec![Ok(HttpResponse::new(
            404,
            json!({"error": "model \"codellama:7b\" not found, try pulling it first"}).to_string(),
        ))]));
        let transport = OllamaTransport::new(http, None);

        let err = transport.complete_chat(&request()).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::ModelNotFound(
                "model \"codellama:7b\" not found, try pulling it first".into()
            )
        );
    }

    #[tokio::test]
    async fn test_stream_chat_reads_ndjson() {
        let ndjson = [
            json!({"message": {"content": "fn "}, "done": false}).to_string(),
            json!({"message": {"content": "main() {}"}, "done": false}).to_string(),
            json!({"message": {"content": ""}, "done": true}).to_string(),
        ]
        .join("\n");
        let http = Arc::new(MockHttpClient::new(vec![Ok(HttpResponse::new(200, ndjson))]));
        let transport = OllamaTransport::new(http, None);

        let chunks: Vec<String> = transport
            .stream_chat(&request())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["fn ", "main() {}"]);
    }

    #[tokio::test]
    async fn test_stream_chat_surfaces_midstream_error() {
        let ndjson = [
            json!({"message": {"content": "x"}, "done": false}).to_string(),
            json!({"error": "out of memory"}).to_string(),
        ]
        .join("\n");
        let http = Arc::new(MockHttpClient::new(vec![Ok(HttpResponse::new(200, ndjson))]));
        let transport = OllamaTransport::new(http, None);

        let items: Vec<Result<String, TransportError>> =
            transport.stream_chat(&request()).await.unwrap().collect().await;
        assert_eq!(items[0], Ok("x".to_string()));
        assert_eq!(items[1], Err(TransportError::Backend("out of memory".into())));
    }
}

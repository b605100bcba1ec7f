//! HTTP client abstraction for backend communication.
//!
//! This module provides a trait-based abstraction over HTTP clients, enabling
//! dependency injection and easy mocking in tests. Non-2xx statuses are not
//! errors at this layer: transports inspect the status and body themselves
//! to decide whether a failure means "model not found" or something else.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Incremental response body, in the order the server sent it.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .with_context(|| format!("invalid JSON body (status {})", self.status))
    }
}

/// A response whose body is still being received.
pub struct StreamingResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drains the remaining body into a string. Used for error payloads.
    pub async fn into_text(self) -> Result<String> {
        let chunks: Vec<Vec<u8>> = self.body.try_collect().await?;
        Ok(String::from_utf8_lossy(&chunks.concat()).into_owned())
    }
}

/// Trait for HTTP communication with generation backends.
///
/// This abstraction allows injecting mock HTTP clients for testing without
/// making real network requests.
///
/// # Example
///
/// ```ignore
/// use codesmith::http_client::{HttpClient, ReqwestHttpClient};
///
/// let client = ReqwestHttpClient::new(Default::default());
/// let response = client.post_json(
///     "https://api.example.com/v1/chat/completions",
///     &[("Authorization", "Bearer sk-...")],
///     &serde_json::json!({"model": "gpt-4o-mini"}),
/// ).await?;
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request, bounded by `timeout` when given.
    async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<HttpResponse>;

    /// Sends a POST request with a JSON body and buffers the response.
    ///
    /// # Errors
    ///
    /// Returns an error only if the request could not be sent or the body
    /// could not be read. Error statuses are returned as responses.
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse>;

    /// Sends a POST request with a JSON body and returns the body as a stream.
    ///
    /// Dropping the returned stream closes the underlying connection.
    async fn post_json_streaming(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<StreamingResponse>;
}

/// Timeouts applied by [`ReqwestHttpClient`].
#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    /// Upper bound for buffered requests (completions, listings without an
    /// explicit probe timeout).
    pub request: Duration,
    /// Upper bound for establishing a connection. This is the only bound on
    /// streaming requests, which may legitimately run for a long time.
    pub connect: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(120),
            connect: Duration::from_secs(10),
        }
    }
}

/// HTTP client implementation using reqwest.
///
/// This is the default production implementation that makes real HTTP requests.
pub struct ReqwestHttpClient {
    client: Client,
    timeouts: HttpTimeouts,
}

impl ReqwestHttpClient {
    /// Creates a new HTTP client with the given timeouts.
    pub fn new(timeouts: HttpTimeouts) -> Self {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, timeouts }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new(HttpTimeouts::default())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        let mut request = self
            .client
            .get(url)
            .timeout(timeout.unwrap_or(self.timeouts.request));

        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        Ok(HttpResponse::new(status, response.text().await?))
    }

    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<HttpResponse> {
        let mut request = self.client.post(url).timeout(self.timeouts.request);

        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let response = request.json(body).send().await?;
        let status = response.status().as_u16();
        Ok(HttpResponse::new(status, response.text().await?))
    }

    async fn post_json_streaming(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<StreamingResponse> {
        let mut request = self.client.post(url);

        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let response = request.json(body).send().await?;
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(anyhow::Error::from))
            .boxed();

        Ok(StreamingResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A request seen by [`MockHttpClient`].
    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub method: &'static str,
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub body: Option<serde_json::Value>,
    }

    /// Mock HTTP client for testing.
    ///
    /// Replies are served in FIFO order; every request is recorded.
    pub struct MockHttpClient {
        replies: Mutex<VecDeque<Result<HttpResponse>>>,
        pub requests: Mutex<Vec<RecordedRequest>>,
    }

    impl MockHttpClient {
        /// Creates a mock client that returns the given responses in order.
        pub fn new(replies: Vec<Result<HttpResponse>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn record(
            &self,
            method: &'static str,
            url: &str,
            headers: &[(&str, &str)],
            body: Option<&serde_json::Value>,
        ) {
            self.requests.lock().unwrap().push(RecordedRequest {
                method,
                url: url.to_string(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: body.cloned(),
            });
        }

        fn next_reply(&self) -> Result<HttpResponse> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no mock reply queued")))
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            _timeout: Option<Duration>,
        ) -> Result<HttpResponse> {
            self.record("GET", url, headers, None);
            self.next_reply()
        }

        async fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &serde_json::Value,
        ) -> Result<HttpResponse> {
            self.record("POST", url, headers, Some(body));
            self.next_reply()
        }

        async fn post_json_streaming(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &serde_json::Value,
        ) -> Result<StreamingResponse> {
            self.record("POST", url, headers, Some(body));
            let reply = self.next_reply()?;
            // Split into small pieces so line reassembly gets exercised.
            let pieces: Vec<Result<Vec<u8>>> = reply
                .body
                .as_bytes()
                .chunks(7)
                .map(|c| Ok(c.to_vec()))
                .collect();
            Ok(StreamingResponse {
                status: reply.status,
                body: futures::stream::iter(pieces).boxed(),
            })
        }
    }

    #[test]
    fn test_http_response_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(404, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[test]
    fn test_http_response_json_reports_status_on_failure() {
        let response = HttpResponse::new(502, "<html>bad gateway</html>");
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_mock_http_client_serves_replies_in_order() {
        let client = MockHttpClient::new(vec![
            Ok(HttpResponse::new(200, "first")),
            Ok(HttpResponse::new(500, "second")),
        ]);

        let first = client.get("http://a", &[], None).await.unwrap();
        let second = client
            .post_json("http://b", &[("x", "y")], &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(first.body, "first");
        assert_eq!(second.status, 500);
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].headers, vec![("x".to_string(), "y".to_string())]);
        drop(requests);
        assert!(client.get("http://c", &[], None).await.is_err());
    }

    #[tokio::test]
    async fn test_streaming_response_into_text_reassembles_body() {
        let client = MockHttpClient::new(vec![Ok(HttpResponse::new(
            404,
            "{\"error\":\"model 'x' not found\"}",
        ))]);
        let response = client
            .post_json_streaming("http://a", &[], &serde_json::json!({}))
            .await
            .unwrap();

        assert!(!response.is_success());
        assert_eq!(
            response.into_text().await.unwrap(),
            "{\"error\":\"model 'x' not found\"}"
        );
    }
}

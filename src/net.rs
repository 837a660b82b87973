//! HTTP access behind the [`Network`] trait.
//!
//! The refresh engine never touches `reqwest` directly; it is handed an
//! `Arc<dyn Network>` so tests can substitute canned responses.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = concat!("newsroll/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024; // 10MB

const MAX_REDIRECTS: usize = 10;

/// Granular transport failures.
///
/// Callers above the fetcher only see `FetchError::SourceUnreachable`; these
/// variants exist so the cause can be logged.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Network-level error (DNS, connection, TLS, redirect loop, etc.)
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

#[async_trait]
pub trait Network: Send + Sync {
    /// GET `url` and return the full body of a 2xx response.
    async fn get(&self, url: &Url) -> Result<Vec<u8>, NetworkError>;
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// [`Network`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestNetwork {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl ReqwestNetwork {
    pub fn new(user_agent: &str, timeout: Duration, max_bytes: usize) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, timeout, max_bytes))
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration, max_bytes: usize) -> Self {
        Self {
            client,
            timeout,
            max_bytes,
        }
    }

    async fn get_inner(&self, url: &Url) -> Result<Vec<u8>, NetworkError> {
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(NetworkError::HttpStatus(response.status().as_u16()));
        }
        read_limited_bytes(response, self.max_bytes).await
    }
}

impl Default for ReqwestNetwork {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .redirect(redirect_policy())
            .build()
            .unwrap_or_default();
        Self::with_client(client, DEFAULT_TIMEOUT, DEFAULT_MAX_BYTES)
    }
}

#[async_trait]
impl Network for ReqwestNetwork {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, NetworkError> {
        // Covers connect, headers and the body stream together
        tokio::time::timeout(self.timeout, self.get_inner(url))
            .await
            .map_err(|_| NetworkError::Timeout)?
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, NetworkError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(NetworkError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(NetworkError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(NetworkError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn network(max_bytes: usize) -> ReqwestNetwork {
        ReqwestNetwork::new("newsroll-test", Duration::from_secs(5), max_bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_returns_body_and_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("user-agent", "newsroll-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/feed", server.uri())).unwrap();
        let body = network(1024).get(&url).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_get_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        match network(1024).get(&url).await {
            Err(NetworkError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 2048]))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        assert!(matches!(
            network(1024).get(&url).await,
            Err(NetworkError::ResponseTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_get_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", format!("{}/new", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
        assert_eq!(network(1024).get(&url).await.unwrap(), b"moved");
    }

    #[tokio::test]
    async fn test_get_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let net = ReqwestNetwork::new("newsroll-test", Duration::from_millis(50), 1024).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        assert!(matches!(net.get(&url).await, Err(NetworkError::Timeout)));
    }
}

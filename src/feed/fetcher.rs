use thiserror::Error;
use url::Url;

use crate::net::{Network, NetworkError};

/// Errors that can occur while retrieving a feed's source document.
///
/// Transport detail (status codes, timeouts, size limits) is logged by
/// [`fetch`] and folded into `reason`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Could not reach {url}: {reason}")]
    SourceUnreachable { url: String, reason: String },
}

impl FetchError {
    fn unreachable(url: &Url, error: &NetworkError) -> Self {
        FetchError::SourceUnreachable {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Downloads the raw bytes of a feed.
///
/// One GET, redirects followed. There are no retries; a failed fetch is
/// reported once and the next refresh tries again.
pub async fn fetch(network: &dyn Network, url: &Url) -> Result<Vec<u8>, FetchError> {
    match network.get(url).await {
        Ok(bytes) => {
            tracing::debug!(url = %url, bytes = bytes.len(), "Fetched feed source");
            Ok(bytes)
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Feed fetch failed");
            Err(FetchError::unreachable(url, &e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ReqwestNetwork;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn network() -> ReqwestNetwork {
        ReqwestNetwork::new("newsroll-test", Duration::from_secs(5), 1024 * 1024).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/feed", mock_server.uri())).unwrap();
        let bytes = fetch(&network(), &url).await.unwrap();
        assert_eq!(bytes, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_500_is_unreachable_without_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/feed", mock_server.uri())).unwrap();
        match fetch(&network(), &url).await {
            Err(FetchError::SourceUnreachable { url: failed, reason }) => {
                assert_eq!(failed, url.to_string());
                assert!(reason.contains("500"), "reason was {reason}");
            }
            other => panic!("Expected SourceUnreachable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Bind then drop a server so the port is closed
        let uri = {
            let server = MockServer::start().await;
            server.uri()
        };
        let url = Url::parse(&format!("{uri}/feed")).unwrap();
        assert!(matches!(
            fetch(&network(), &url).await,
            Err(FetchError::SourceUnreachable { .. })
        ));
    }
}

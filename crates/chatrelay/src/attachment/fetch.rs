//! Attachment downloads.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;

/// Errors from downloading an attachment.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid attachment url: {0}")]
    InvalidUrl(String),

    #[error("attachment exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("download failed with status {0}")]
    Status(u16),

    #[error("download failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Source of attachment bytes.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// Download `url`, failing once more than `max_bytes` have arrived.
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Bytes, FetchError>;
}

/// Fetches attachments over HTTP(S).
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AttachmentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Bytes, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let response = self.client.get(parsed).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        if response
            .content_length()
            .is_some_and(|length| length > max_bytes)
        {
            return Err(FetchError::TooLarge { limit: max_bytes });
        }

        let mut body = BytesMut::new();
        let mut stream = Box::pin(response.bytes_stream());
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() as u64 + chunk.len() as u64 > max_bytes {
                return Err(FetchError::TooLarge { limit: max_bytes });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::routing::get;

    use super::*;

    async fn spawn_files() -> String {
        let router = Router::new()
            .route("/small.txt", get(|| async { "hello" }))
            .route("/big.bin", get(|| async { vec![0u8; 64] }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn downloads_within_limit() {
        let base = spawn_files().await;
        let fetcher = HttpFetcher::new(Client::new());
        let bytes = fetcher.fetch(&format!("{base}/small.txt"), 100).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn refuses_oversized_body() {
        let base = spawn_files().await;
        let fetcher = HttpFetcher::new(Client::new());
        let err = fetcher.fetch(&format!("{base}/big.bin"), 10).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 10 }));
    }

    #[tokio::test]
    async fn reports_missing_file() {
        let base = spawn_files().await;
        let fetcher = HttpFetcher::new(Client::new());
        let err = fetcher.fetch(&format!("{base}/nope"), 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(404)));
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let fetcher = HttpFetcher::new(Client::new());
        let err = fetcher.fetch("file:///etc/passwd", 10).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}

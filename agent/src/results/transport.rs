//! Remote result service client
//!
//! Two calls per iteration: a streamed upload for each image, then one
//! metadata commit. The drain awaits every upload before the commit.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use thiserror::Error;

use super::wire::{ImageUpload, WireResult};

/// Image bytes in upload order
pub type ChunkStream = BoxStream<'static, Vec<u8>>;

/// Errors talking to the result service
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Result service answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Calls made against the remote result service
#[async_trait]
pub trait ResultTransport: Send + Sync {
    /// Client-streaming upload of one image
    async fn add_image(&self, upload: &ImageUpload, chunks: ChunkStream) -> Result<(), TransportError>;

    /// Commit the metadata of one iteration
    async fn add_result(&self, result: &WireResult) -> Result<(), TransportError>;
}

/// HTTP client for the result service
///
/// `POST {base}/results` carries the JSON metadata; `POST {base}/images`
/// streams the raw pixels with the upload header in `x-` headers.
pub struct HttpResultTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResultTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: reqwest::Response) -> Result<(), TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ResultTransport for HttpResultTransport {
    async fn add_image(&self, upload: &ImageUpload, chunks: ChunkStream) -> Result<(), TransportError> {
        let body = reqwest::Body::wrap_stream(chunks.map(Ok::<_, std::io::Error>));
        let response = self
            .client
            .post(format!("{}/images", self.base_url))
            .header("content-type", "application/octet-stream")
            .header("x-iteration-id", upload.iteration_id.to_string())
            .header("x-result-id", &upload.result_id)
            .header("x-scale", upload.scale.to_string())
            .header("x-width", upload.width.to_string())
            .header("x-height", upload.height.to_string())
            .header("x-channels", upload.channels.to_string())
            .body(body)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn add_result(&self, result: &WireResult) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}/results", self.base_url))
            .json(result)
            .send()
            .await?;
        Self::check(response).await
    }
}

/// Transport used when no result service is configured
///
/// Logs a summary of every call and keeps nothing.
pub struct LogResultTransport;

#[async_trait]
impl ResultTransport for LogResultTransport {
    async fn add_image(&self, upload: &ImageUpload, chunks: ChunkStream) -> Result<(), TransportError> {
        let bytes: usize = chunks.map(|chunk| chunk.len()).collect::<Vec<_>>().await.iter().sum();
        log::info!(
            "Image {} of iteration {}: {}x{}x{} ({} bytes, scale {})",
            upload.result_id,
            upload.iteration_id,
            upload.width,
            upload.height,
            upload.channels,
            bytes,
            upload.scale
        );
        Ok(())
    }

    async fn add_result(&self, result: &WireResult) -> Result<(), TransportError> {
        log::info!(
            "Iteration {} (success: {}, {} ms, {} values)",
            result.iteration_id,
            result.success,
            result.elapsed_ms,
            result.values.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_transport_consumes_stream() {
        let upload = ImageUpload {
            iteration_id: uuid::Uuid::new_v4(),
            result_id: "cam/frame".to_string(),
            scale: 1.0,
            width: 2,
            height: 1,
            channels: 1,
        };
        let chunks = futures_util::stream::iter(vec![vec![1u8], vec![2u8]]).boxed();
        LogResultTransport.add_image(&upload, chunks).await.unwrap();
    }

    #[test]
    fn test_http_transport_trims_base_url() {
        let transport =
            HttpResultTransport::new("http://results.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.base_url, "http://results.local");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_a_request_error() {
        // Port 9 (discard) on localhost is normally closed.
        let transport =
            HttpResultTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let record = WireResult {
            iteration_id: uuid::Uuid::new_v4(),
            agent_id: "agent".to_string(),
            started_at: chrono::Utc::now(),
            stopped_at: None,
            elapsed_ms: 0,
            success: true,
            values: Vec::new(),
        };
        assert!(matches!(
            transport.add_result(&record).await,
            Err(TransportError::Request(_))
        ));
    }
}

//! HTTP request/response client transport.
//!
//! Each frame is POSTed as one request body. A reply body is pushed onto the
//! inbound source for the client's receive loop to correlate; `204 No
//! Content` (a notification) yields nothing.

use crate::config::ClientConfig;
use crate::error::ClientError;
use async_trait::async_trait;
use bytes::Bytes;
use jrpc_protocol::{send_or_cancel, ClientTransport, FrameSource, TransportError};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Client transport over HTTP POST.
pub struct HttpClientTransport {
    url: String,
    http: reqwest::Client,
    replies: Mutex<Option<mpsc::Sender<Bytes>>>,
    inbound: Mutex<Option<FrameSource>>,
}

impl HttpClientTransport {
    /// Builds a transport posting to `url`.
    pub fn new(url: impl Into<String>, config: &ClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Other(format!("invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Other(format!("invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {}", e)))?;

        let (tx, rx) = mpsc::channel(config.inbound_capacity.max(1));
        Ok(Self {
            url: url.into(),
            http,
            replies: Mutex::new(Some(tx)),
            inbound: Mutex::new(Some(rx)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ClientTransport for HttpClientTransport {
    async fn send(&self, cancel: &CancellationToken, frame: Bytes) -> Result<(), TransportError> {
        let replies = self.replies.lock().clone().ok_or(TransportError::Closed)?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = self.http.post(&self.url).body(frame).send() => result
                .map_err(|e| TransportError::Other(format!("HTTP request failed: {}", e)))?,
        };

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Other(format!("failed to read HTTP body: {}", e)))?;
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        if body.is_empty() {
            return Ok(());
        }

        tracing::debug!("Received {} byte reply from {}", body.len(), self.url);
        send_or_cancel(&replies, cancel, body).await
    }

    fn take_inbound(&self) -> Result<FrameSource, TransportError> {
        self.inbound.lock().take().ok_or(TransportError::InboundTaken)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.replies.lock().take().is_some() {
            tracing::debug!("Closing HTTP transport to {}", self.url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_header_rejected() {
        let config = ClientConfig::default().with_header("bad header", "x");
        let result = HttpClientTransport::new("http://127.0.0.1:1/", &config);
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let transport =
            HttpClientTransport::new("http://127.0.0.1:1/", &ClientConfig::default()).unwrap();
        let _inbound = transport.take_inbound().unwrap();
        transport.close().await.unwrap();

        let err = tokio_test::assert_err!(
            transport
                .send(&CancellationToken::new(), Bytes::from_static(b"{}"))
                .await
        );
        assert!(matches!(err, TransportError::Closed));
        let err = tokio_test::assert_err!(transport.take_inbound());
        assert!(matches!(err, TransportError::InboundTaken));
    }
}

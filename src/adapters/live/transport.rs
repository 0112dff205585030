//! Live adapter for the `Transport` port using `reqwest`.

use std::time::Duration;

use reqwest::{Client, Method};

use crate::cassette::format::{ClientKind, HttpRequest, HttpResponse};
use crate::error::EngineError;
use crate::ports::transport::{Transport, TransportFactory, TransportFuture};

/// Sends requests over the real network. Every request is bounded by the
/// configured timeout.
pub struct LiveTransport {
    client: Client,
    timeout: Duration,
}

impl LiveTransport {
    /// Creates a live transport with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }
}

impl Transport for LiveTransport {
    fn send(&self, client: ClientKind, request: &HttpRequest) -> TransportFuture<'_> {
        let request = request.clone();
        Box::pin(async move {
            let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
                EngineError::Transport(format!("invalid method {}: {e}", request.method))
            })?;

            let mut builder = self.client.request(method, &request.uri);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if !request.body.is_empty() {
                builder = builder.body(request.body.clone());
            }

            tracing::debug!(
                %client,
                method = %request.method,
                uri = %request.uri,
                "sending live request"
            );
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    EngineError::Transport(format!(
                        "{} {} timed out after {}s",
                        request.method,
                        request.uri,
                        self.timeout.as_secs()
                    ))
                } else {
                    let (method, uri) = (&request.method, &request.uri);
                    EngineError::Transport(format!("{method} {uri} failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                    (name.as_str().to_string(), value)
                })
                .collect();
            let body = response.text().await.map_err(|e| {
                EngineError::Transport(format!("failed to read response body: {e}"))
            })?;

            Ok(HttpResponse { status, headers, body })
        })
    }
}

/// Builds a [`LiveTransport`] per cassette group.
pub struct LiveTransportFactory {
    timeout: Duration,
}

impl LiveTransportFactory {
    /// Creates a factory whose transports use `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TransportFactory for LiveTransportFactory {
    fn connect(&self) -> Result<Box<dyn Transport>, EngineError> {
        Ok(Box::new(LiveTransport::new(self.timeout)?))
    }
}

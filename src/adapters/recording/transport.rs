//! Recording adapter for the `Transport` port.

use std::sync::Arc;

use crate::cassette::format::{ClientKind, HttpRequest, Interaction};
use crate::cassette::sanitize::{sanitize, SanitizeRules};
use crate::cassette::store::CassetteStore;
use crate::ports::transport::{Transport, TransportFuture};

/// Forwards to an inner transport, then sanitizes the exchange and stages it
/// in the cassette store.
///
/// The caller receives the sanitized response, so a recorded run sees
/// exactly what a later replay will return.
pub struct RecordingTransport {
    inner: Box<dyn Transport>,
    store: Arc<dyn CassetteStore>,
    cassette_id: String,
    rules: SanitizeRules,
}

impl RecordingTransport {
    /// Creates a recording transport writing to `cassette_id` in `store`.
    pub fn new(
        inner: Box<dyn Transport>,
        store: Arc<dyn CassetteStore>,
        cassette_id: impl Into<String>,
        rules: SanitizeRules,
    ) -> Self {
        Self { inner, store, cassette_id: cassette_id.into(), rules }
    }
}

impl Transport for RecordingTransport {
    fn send(&self, client: ClientKind, request: &HttpRequest) -> TransportFuture<'_> {
        let request = request.clone();
        Box::pin(async move {
            let response = self.inner.send(client, &request).await?;
            let raw = Interaction::from_exchange(client, request, response);
            let clean = sanitize(&raw, &self.rules)?;
            let returned = clean.response();
            self.store.append(&self.cassette_id, clean)?;
            Ok(returned)
        })
    }
}

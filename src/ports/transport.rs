//! Transport port: the network side of an intercepted call.

use std::future::Future;
use std::pin::Pin;

use crate::cassette::format::{ClientKind, HttpRequest, HttpResponse};
use crate::error::EngineError;

/// Boxed future type alias used by [`Transport`] to keep the trait dyn-compatible.
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, EngineError>> + Send + 'a>>;

/// Sends a request and produces its response.
///
/// Live, recording, and replaying implementations live in `src/adapters/`.
pub trait Transport: Send + Sync {
    /// Sends `request` on behalf of the client implementation `client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be answered: a network failure
    /// when live, a sanitization failure when recording, or a missing match
    /// when replaying.
    fn send(&self, client: ClientKind, request: &HttpRequest) -> TransportFuture<'_>;
}

/// Produces the network transport a unit sends through.
///
/// Workers call this once per cassette group so that tests can substitute a
/// scripted transport for the real network.
pub trait TransportFactory: Send + Sync {
    /// Creates a transport.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] if the transport cannot be built.
    fn connect(&self) -> Result<Box<dyn Transport>, EngineError>;
}

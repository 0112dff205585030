//! Replaying adapter for the `Transport` port.

use crate::cassette::format::{Cassette, ClientKind, HttpRequest};
use crate::cassette::matcher::{MatchOutcome, Matcher};
use crate::cassette::sanitize::{sanitize_request, SanitizeRules};
use crate::error::EngineError;
use crate::ports::transport::{Transport, TransportFuture};

/// Answers requests from a loaded cassette. Never touches the network.
///
/// The live request is sanitized with the recording rules before lookup so
/// that redacted headers and fields compare equal to what was stored.
pub struct ReplayingTransport {
    cassette: Cassette,
    matcher: Matcher,
    rules: SanitizeRules,
}

impl ReplayingTransport {
    /// Creates a replaying transport over `cassette`.
    #[must_use]
    pub fn new(cassette: Cassette, matcher: Matcher, rules: SanitizeRules) -> Self {
        Self { cassette, matcher, rules }
    }
}

impl Transport for ReplayingTransport {
    fn send(&self, _client: ClientKind, request: &HttpRequest) -> TransportFuture<'_> {
        let result = sanitize_request(request, &self.rules).and_then(|live| {
            match self.matcher.find(&live, &self.cassette.interactions) {
                MatchOutcome::Matched { interaction, .. } => Ok(interaction.response()),
                MatchOutcome::NoMatch => Err(EngineError::NoMatch {
                    cassette_id: self.cassette.metadata.cassette_id.clone(),
                    method: request.method.clone(),
                    uri: live.uri,
                }),
            }
        });
        Box::pin(async move { result })
    }
}

//! Client adapters and runtime adapter detection.

pub mod anthropic;
pub mod http;
pub mod openai;
pub mod vertex;

pub use anthropic::AnthropicAdapter;
pub use http::RawHttpAdapter;
pub use openai::OpenAiCompatibleAdapter;
pub use vertex::VertexAiAdapter;

use serde::Deserialize;

use crate::error::EngineError;
use crate::ports::client::{ClientAdapter, CompletionRequest, OutgoingCall};

/// Ordered set of client adapters. The first adapter that accepts a call
/// handles it.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn ClientAdapter>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self { adapters: Vec::new() }
    }

    /// Registry holding every bundled adapter.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(RawHttpAdapter));
        registry.register(Box::new(OpenAiCompatibleAdapter));
        registry.register(Box::new(AnthropicAdapter));
        registry.register(Box::new(VertexAiAdapter));
        registry
    }

    /// Appends an adapter.
    pub fn register(&mut self, adapter: Box<dyn ClientAdapter>) {
        self.adapters.push(adapter);
    }

    /// Finds the adapter for `call`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Adapter`] if no registered adapter accepts it.
    pub fn detect(&self, call: &OutgoingCall) -> Result<&dyn ClientAdapter, EngineError> {
        self.adapters
            .iter()
            .find(|adapter| adapter.accepts(call))
            .map(|adapter| &**adapter)
            .ok_or_else(|| {
                EngineError::Adapter(format!("no client adapter accepts {}", describe(call)))
            })
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn describe(call: &OutgoingCall) -> String {
    match call {
        OutgoingCall::Http(request) => format!("HTTP {} {}", request.method, request.uri),
        OutgoingCall::Completion(c) => format!("{:?} completion for {}", c.provider, c.model),
    }
}

pub(crate) fn completion<'a>(
    call: &'a OutgoingCall,
    adapter: &str,
) -> Result<&'a CompletionRequest, EngineError> {
    match call {
        OutgoingCall::Completion(request) => Ok(request),
        OutgoingCall::Http(_) => {
            Err(EngineError::Adapter(format!("{adapter} adapter cannot encode a raw HTTP call")))
        }
    }
}

pub(crate) fn join_url(request: &CompletionRequest, path: &str) -> String {
    let base = request.base_url.as_deref().unwrap_or(request.provider.default_base_url());
    format!("{}/{path}", base.trim_end_matches('/'))
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Extracts `error.message` from a provider error body, falling back to the raw text.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body).map_or_else(|_| body.to_string(), |e| e.error.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::format::{ClientKind, HttpRequest};
    use crate::ports::client::Provider;

    #[test]
    fn detects_adapter_by_call_shape() {
        let registry = AdapterRegistry::with_defaults();
        let raw = OutgoingCall::Http(HttpRequest::new("get", "/users/1"));
        assert_eq!(registry.detect(&raw).unwrap().kind(), ClientKind::Http);

        let chat = OutgoingCall::Completion(CompletionRequest {
            provider: Provider::Anthropic,
            model: "m".into(),
            messages: vec![],
            max_tokens: 1,
            temperature: None,
            api_key: String::new(),
            base_url: None,
        });
        assert_eq!(registry.detect(&chat).unwrap().kind(), ClientKind::Anthropic);

        let OutgoingCall::Completion(mut gemini) = chat else { unreachable!() };
        gemini.provider = Provider::VertexAi;
        let gemini = OutgoingCall::Completion(gemini);
        assert_eq!(registry.detect(&gemini).unwrap().kind(), ClientKind::VertexAi);
    }

    #[test]
    fn empty_registry_rejects_everything() {
        let registry = AdapterRegistry::empty();
        let raw = OutgoingCall::Http(HttpRequest::new("GET", "/"));
        assert!(matches!(registry.detect(&raw), Err(EngineError::Adapter(_))));
    }
}

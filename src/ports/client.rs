//! Client adapter port: translates the call shape of one HTTP client
//! implementation into the engine's request/response records and back.

use serde::{Deserialize, Serialize};

use crate::cassette::format::{ClientKind, HttpRequest, HttpResponse};
use crate::error::EngineError;

/// Chat-completion providers reachable through the bundled SDK adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenAI.
    OpenAi,
    /// Groq (OpenAI-compatible).
    Groq,
    /// Moonshot (OpenAI-compatible).
    Moonshot,
    /// Perplexity (OpenAI-compatible).
    Perplexity,
    /// Anthropic messages API.
    Anthropic,
    /// Gemini models on Vertex AI. Calls must set `base_url` to the
    /// project and location.
    VertexAi,
}

impl Provider {
    /// Base URL used when the call does not override it.
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Moonshot => "https://api.moonshot.ai/v1",
            Self::Perplexity => "https://api.perplexity.ai",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::VertexAi => "https://aiplatform.googleapis.com/v1",
        }
    }
}

/// One message in a chat exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// A request to generate a completion, as issued by an SDK-style client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Provider to call.
    pub provider: Provider,
    /// The model identifier.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature, when the model supports one.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// API key sent with the request.
    #[serde(default)]
    pub api_key: String,
    /// Overrides [`Provider::default_base_url`].
    #[serde(default)]
    pub base_url: Option<String>,
}

/// The response from a completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated text.
    pub text: String,
    /// Model that produced the text, as reported by the provider.
    pub model: String,
    /// Number of prompt tokens consumed.
    pub prompt_tokens: u32,
    /// Number of completion tokens generated.
    pub completion_tokens: u32,
}

/// An outbound call as issued by some client implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "client", rename_all = "snake_case")]
pub enum OutgoingCall {
    /// A raw HTTP request.
    Http(HttpRequest),
    /// An SDK-style chat completion.
    Completion(CompletionRequest),
}

/// What the issuing client receives back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "client", rename_all = "snake_case")]
pub enum CallOutcome {
    /// Raw HTTP response.
    Http(HttpResponse),
    /// Decoded completion.
    Completion(CompletionResponse),
}

/// Wraps one client implementation.
///
/// Adapters are selected at runtime by [`ClientAdapter::accepts`]; adding a
/// client means adding one adapter and nothing else.
pub trait ClientAdapter: Send + Sync {
    /// Client implementation this adapter wraps.
    fn kind(&self) -> ClientKind;

    /// Returns `true` if `call` was issued by this adapter's client.
    fn accepts(&self, call: &OutgoingCall) -> bool;

    /// Translates the call into the request that goes over the wire.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Adapter`] if the call cannot be encoded.
    fn to_request(&self, call: &OutgoingCall) -> Result<HttpRequest, EngineError>;

    /// Translates the wire response back into the client's shape.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Adapter`] if the response cannot be decoded.
    fn from_response(
        &self,
        call: &OutgoingCall,
        response: HttpResponse,
    ) -> Result<CallOutcome, EngineError>;
}

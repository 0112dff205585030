//! Cassette data structures for recording and replaying interactions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which client implementation issued a recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// A raw HTTP request built by the caller.
    Http,
    /// An OpenAI-compatible chat-completions SDK call.
    OpenAiCompatible,
    /// An Anthropic messages SDK call.
    Anthropic,
    /// A Vertex AI `generateContent` SDK call.
    VertexAi,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::OpenAiCompatible => "openai_compatible",
            Self::Anthropic => "anthropic",
            Self::VertexAi => "vertex_ai",
        })
    }
}

/// Ordered header list. Names keep their original casing; lookups are
/// case-insensitive.
pub type Headers = Vec<(String, String)>;

/// Returns the first value of the named header, ignoring case.
#[must_use]
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
}

/// A request as issued by a client, before any response exists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpRequest {
    /// HTTP method, upper-case.
    pub method: String,
    /// Request URI (absolute or path-only).
    pub uri: String,
    /// Headers in send order.
    #[serde(default)]
    pub headers: Headers,
    /// Body text.
    #[serde(default)]
    pub body: String,
}

impl HttpRequest {
    /// Creates a body-less request.
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self { method: method.into().to_ascii_uppercase(), uri: uri.into(), ..Self::default() }
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// A response as returned to a client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers in receive order.
    #[serde(default)]
    pub headers: Headers,
    /// Body text.
    #[serde(default)]
    pub body: String,
}

/// One observed request/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Interaction {
    /// Client implementation that issued the request.
    pub client_kind: ClientKind,
    /// HTTP method, upper-case.
    pub method: String,
    /// Request URI (absolute or path-only).
    pub uri: String,
    /// Request headers in send order.
    #[serde(default)]
    pub request_headers: Headers,
    /// Request body text.
    #[serde(default)]
    pub request_body: String,
    /// Response status code.
    pub response_status: u16,
    /// Response headers in receive order.
    #[serde(default)]
    pub response_headers: Headers,
    /// Response body text.
    #[serde(default)]
    pub response_body: String,
}

/// Identifying and staleness metadata stored with each cassette.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CassetteMetadata {
    /// Id of the test unit (or workflow) the cassette belongs to.
    pub cassette_id: String,
    /// Hash of the inputs that determine the expected interactions.
    pub content_hash: String,
    /// When this cassette was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Tool exercised by the unit.
    #[serde(default)]
    pub subject_tool: String,
    /// Model exercised by the unit.
    #[serde(default)]
    pub subject_model: String,
}

/// A cassette containing a sequence of recorded interactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cassette {
    /// Cassette metadata.
    pub metadata: CassetteMetadata,
    /// Ordered list of interactions.
    pub interactions: Vec<Interaction>,
}

impl Interaction {
    /// Joins a request and its response into one record.
    #[must_use]
    pub fn from_exchange(
        client_kind: ClientKind,
        request: HttpRequest,
        response: HttpResponse,
    ) -> Self {
        Self {
            client_kind,
            method: request.method,
            uri: request.uri,
            request_headers: request.headers,
            request_body: request.body,
            response_status: response.status,
            response_headers: response.headers,
            response_body: response.body,
        }
    }

    /// The request half of this interaction.
    #[must_use]
    pub fn request(&self) -> HttpRequest {
        HttpRequest {
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers: self.request_headers.clone(),
            body: self.request_body.clone(),
        }
    }

    /// The response half of this interaction.
    #[must_use]
    pub fn response(&self) -> HttpResponse {
        HttpResponse {
            status: self.response_status,
            headers: self.response_headers.clone(),
            body: self.response_body.clone(),
        }
    }
}

impl Cassette {
    /// Renders the cassette as its on-disk YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Parses a cassette from its on-disk YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid cassette.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

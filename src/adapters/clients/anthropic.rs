//! Adapter for the Anthropic messages API.

use serde::{Deserialize, Serialize};

use super::{completion, error_message, join_url};
use crate::cassette::format::{ClientKind, HttpRequest, HttpResponse};
use crate::error::EngineError;
use crate::ports::client::{
    CallOutcome, ClientAdapter, CompletionResponse, OutgoingCall, Provider,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Request body sent to the Anthropic messages API.
#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// A single message in the Anthropic API request.
#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Top-level response from the Anthropic messages API.
#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: String,
    content: Vec<ContentBlock>,
    usage: Usage,
}

/// A content block in the Anthropic response.
#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Token usage reported by the Anthropic API.
#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Chat completions over the Anthropic messages format.
pub struct AnthropicAdapter;

impl ClientAdapter for AnthropicAdapter {
    fn kind(&self) -> ClientKind {
        ClientKind::Anthropic
    }

    fn accepts(&self, call: &OutgoingCall) -> bool {
        matches!(call, OutgoingCall::Completion(c) if c.provider == Provider::Anthropic)
    }

    fn to_request(&self, call: &OutgoingCall) -> Result<HttpRequest, EngineError> {
        let request = completion(call, "Anthropic")?;

        // System prompts travel in a top-level field, not as a message.
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: if system.is_empty() { None } else { Some(system.join("\n\n")) },
            messages: request
                .messages
                .iter()
                .filter(|m| m.role != "system")
                .map(|m| AnthropicMessage { role: &m.role, content: &m.content })
                .collect(),
            temperature: request.temperature,
        };
        let body = serde_json::to_string(&body)
            .map_err(|e| EngineError::Adapter(format!("failed to encode Anthropic request: {e}")))?;

        Ok(HttpRequest::new("POST", join_url(request, "messages"))
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .body(body))
    }

    fn from_response(
        &self,
        call: &OutgoingCall,
        response: HttpResponse,
    ) -> Result<CallOutcome, EngineError> {
        let request = completion(call, "Anthropic")?;
        if !(200..300).contains(&response.status) {
            return Err(EngineError::Adapter(format!(
                "Anthropic API error ({}): {}",
                response.status,
                error_message(&response.body)
            )));
        }
        let parsed: AnthropicResponse = serde_json::from_str(&response.body).map_err(|e| {
            EngineError::Adapter(format!("failed to parse Anthropic API response: {e}"))
        })?;
        let text = parsed.content.into_iter().map(|block| block.text).collect::<String>();

        Ok(CallOutcome::Completion(CompletionResponse {
            text,
            model: if parsed.model.is_empty() { request.model.clone() } else { parsed.model },
            prompt_tokens: parsed.usage.input_tokens,
            completion_tokens: parsed.usage.output_tokens,
        }))
    }
}

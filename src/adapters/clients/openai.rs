//! Adapter for OpenAI-compatible chat-completion clients (OpenAI, Groq,
//! Moonshot, Perplexity).

use serde::{Deserialize, Serialize};

use super::{completion, error_message, join_url};
use crate::cassette::format::{ClientKind, HttpRequest, HttpResponse};
use crate::error::EngineError;
use crate::ports::client::{
    CallOutcome, ChatMessage, ClientAdapter, CompletionResponse, OutgoingCall, Provider,
};

/// Request body of `POST /chat/completions`.
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Chat completions over the OpenAI wire format.
pub struct OpenAiCompatibleAdapter;

impl ClientAdapter for OpenAiCompatibleAdapter {
    fn kind(&self) -> ClientKind {
        ClientKind::OpenAiCompatible
    }

    fn accepts(&self, call: &OutgoingCall) -> bool {
        matches!(
            call,
            OutgoingCall::Completion(c) if matches!(
                c.provider,
                Provider::OpenAi | Provider::Groq | Provider::Moonshot | Provider::Perplexity
            )
        )
    }

    fn to_request(&self, call: &OutgoingCall) -> Result<HttpRequest, EngineError> {
        let request = completion(call, "OpenAI-compatible")?;
        let body = serde_json::to_string(&ChatRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        })
        .map_err(|e| EngineError::Adapter(format!("failed to encode chat request: {e}")))?;

        Ok(HttpRequest::new("POST", join_url(request, "chat/completions"))
            .header("Authorization", format!("Bearer {}", request.api_key))
            .header("Content-Type", "application/json")
            .body(body))
    }

    fn from_response(
        &self,
        call: &OutgoingCall,
        response: HttpResponse,
    ) -> Result<CallOutcome, EngineError> {
        let request = completion(call, "OpenAI-compatible")?;
        if !(200..300).contains(&response.status) {
            return Err(EngineError::Adapter(format!(
                "{:?} API error ({}): {}",
                request.provider,
                response.status,
                error_message(&response.body)
            )));
        }
        let parsed: ChatResponse = serde_json::from_str(&response.body)
            .map_err(|e| EngineError::Adapter(format!("failed to parse chat response: {e}")))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(CallOutcome::Completion(CompletionResponse {
            text,
            model: if parsed.model.is_empty() { request.model.clone() } else { parsed.model },
            prompt_tokens: parsed.usage.prompt_tokens,
            completion_tokens: parsed.usage.completion_tokens,
        }))
    }
}

//! Adapter for Gemini models served by Vertex AI (`generateContent`).

use serde::{Deserialize, Serialize};

use super::{completion, error_message, join_url};
use crate::cassette::format::{ClientKind, HttpRequest, HttpResponse};
use crate::error::EngineError;
use crate::ports::client::{
    CallOutcome, ClientAdapter, CompletionRequest, CompletionResponse, OutgoingCall, Provider,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
    #[serde(default)]
    model_version: String,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

/// Chat completions against Vertex AI.
///
/// `base_url` must name the project and location, as in
/// `https://us-central1-aiplatform.googleapis.com/v1/projects/<p>/locations/us-central1`;
/// `api_key` carries an OAuth access token.
pub struct VertexAiAdapter;

impl VertexAiAdapter {
    fn endpoint(request: &CompletionRequest) -> Result<String, EngineError> {
        if request.base_url.is_none() {
            return Err(EngineError::Adapter(format!(
                "Vertex AI call for {} needs a base_url naming the project and location",
                request.model
            )));
        }
        let path = format!("publishers/google/models/{}:generateContent", request.model);
        Ok(join_url(request, &path))
    }
}

impl ClientAdapter for VertexAiAdapter {
    fn kind(&self) -> ClientKind {
        ClientKind::VertexAi
    }

    fn accepts(&self, call: &OutgoingCall) -> bool {
        matches!(call, OutgoingCall::Completion(c) if c.provider == Provider::VertexAi)
    }

    fn to_request(&self, call: &OutgoingCall) -> Result<HttpRequest, EngineError> {
        let request = completion(call, "Vertex AI")?;
        let uri = Self::endpoint(request)?;

        let system: Vec<Part<'_>> = request
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| Part { text: &m.content })
            .collect();
        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| Content {
                role: Some(if m.role == "assistant" { "model" } else { "user" }),
                parts: vec![Part { text: &m.content }],
            })
            .collect();
        let body = GenerateRequest {
            contents,
            system_instruction: (!system.is_empty())
                .then_some(Content { role: None, parts: system }),
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        };
        let body = serde_json::to_string(&body).map_err(|e| {
            EngineError::Adapter(format!("failed to encode Vertex AI request: {e}"))
        })?;

        Ok(HttpRequest::new("POST", uri)
            .header("Authorization", format!("Bearer {}", request.api_key))
            .header("Content-Type", "application/json")
            .body(body))
    }

    fn from_response(
        &self,
        call: &OutgoingCall,
        response: HttpResponse,
    ) -> Result<CallOutcome, EngineError> {
        let request = completion(call, "Vertex AI")?;
        if !(200..300).contains(&response.status) {
            return Err(EngineError::Adapter(format!(
                "Vertex AI error ({}): {}",
                response.status,
                error_message(&response.body)
            )));
        }
        let parsed: GenerateResponse = serde_json::from_str(&response.body).map_err(|e| {
            EngineError::Adapter(format!("failed to parse Vertex AI response: {e}"))
        })?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<String>())
            .unwrap_or_default();

        Ok(CallOutcome::Completion(CompletionResponse {
            text,
            model: if parsed.model_version.is_empty() {
                request.model.clone()
            } else {
                parsed.model_version
            },
            prompt_tokens: parsed.usage_metadata.prompt_token_count,
            completion_tokens: parsed.usage_metadata.candidates_token_count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::format::header_value;
    use crate::ports::client::ChatMessage;
    use serde_json::json;

    const BASE: &str =
        "https://us-central1-aiplatform.googleapis.com/v1/projects/demo/locations/us-central1";

    fn call(base_url: Option<&str>) -> OutgoingCall {
        OutgoingCall::Completion(CompletionRequest {
            provider: Provider::VertexAi,
            model: "gemini-2.0-flash".into(),
            messages: vec![
                ChatMessage { role: "system".into(), content: "be brief".into() },
                ChatMessage { role: "user".into(), content: "hi".into() },
                ChatMessage { role: "assistant".into(), content: "hello".into() },
                ChatMessage { role: "user".into(), content: "again".into() },
            ],
            max_tokens: 64,
            temperature: Some(0.2),
            api_key: "ya29.token".into(),
            base_url: base_url.map(String::from),
        })
    }

    #[test]
    fn encodes_generate_content_request() {
        let request = VertexAiAdapter.to_request(&call(Some(BASE))).unwrap();
        assert_eq!(
            request.uri,
            format!("{BASE}/publishers/google/models/gemini-2.0-flash:generateContent")
        );
        assert_eq!(header_value(&request.headers, "authorization"), Some("Bearer ya29.token"));

        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        let contents = body["contents"].as_array().unwrap();
        let roles: Vec<&str> = contents.iter().map(|c| c["role"].as_str().unwrap()).collect();
        assert_eq!(roles, ["user", "model", "user"]);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);
    }

    #[test]
    fn missing_project_location_is_an_adapter_error() {
        let err = VertexAiAdapter.to_request(&call(None)).unwrap_err();
        assert!(matches!(err, EngineError::Adapter(_)));
    }

    #[test]
    fn decodes_candidate_text_and_usage() {
        let body = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "po"}, {"text": "ng"}]}
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2},
            "modelVersion": "gemini-2.0-flash-001"
        })
        .to_string();
        let response = HttpResponse { status: 200, headers: vec![], body };
        let outcome = VertexAiAdapter.from_response(&call(Some(BASE)), response).unwrap();
        assert_eq!(
            outcome,
            CallOutcome::Completion(CompletionResponse {
                text: "pong".into(),
                model: "gemini-2.0-flash-001".into(),
                prompt_tokens: 7,
                completion_tokens: 2,
            })
        );
    }

    #[test]
    fn error_status_surfaces_the_provider_message() {
        let body = json!({"error": {"code": 403, "message": "permission denied"}}).to_string();
        let response = HttpResponse { status: 403, headers: vec![], body };
        let err = VertexAiAdapter.from_response(&call(Some(BASE)), response).unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }
}

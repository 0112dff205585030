//! Adapter for raw HTTP requests built by the caller.

use crate::cassette::format::{ClientKind, HttpRequest, HttpResponse};
use crate::error::EngineError;
use crate::ports::client::{CallOutcome, ClientAdapter, OutgoingCall};

/// Passes raw requests and responses through unchanged.
pub struct RawHttpAdapter;

impl ClientAdapter for RawHttpAdapter {
    fn kind(&self) -> ClientKind {
        ClientKind::Http
    }

    fn accepts(&self, call: &OutgoingCall) -> bool {
        matches!(call, OutgoingCall::Http(_))
    }

    fn to_request(&self, call: &OutgoingCall) -> Result<HttpRequest, EngineError> {
        match call {
            OutgoingCall::Http(request) => Ok(HttpRequest {
                method: request.method.to_ascii_uppercase(),
                ..request.clone()
            }),
            OutgoingCall::Completion(_) => {
                Err(EngineError::Adapter("raw HTTP adapter cannot encode a completion".into()))
            }
        }
    }

    fn from_response(
        &self,
        _call: &OutgoingCall,
        response: HttpResponse,
    ) -> Result<CallOutcome, EngineError> {
        Ok(CallOutcome::Http(response))
    }
}

//! Entry point for outbound calls issued by a test unit.

use std::sync::Arc;

use crate::adapters::clients::AdapterRegistry;
use crate::error::EngineError;
use crate::mode::ModeController;
use crate::ports::client::{CallOutcome, OutgoingCall};

/// Routes every outbound call of one unit through the detected client
/// adapter and the unit's [`ModeController`].
pub struct Interceptor {
    registry: Arc<AdapterRegistry>,
    controller: Arc<ModeController>,
}

impl Interceptor {
    /// Creates an interceptor for one unit.
    #[must_use]
    pub fn new(registry: Arc<AdapterRegistry>, controller: Arc<ModeController>) -> Self {
        Self { registry, controller }
    }

    /// The unit's controller.
    #[must_use]
    pub fn controller(&self) -> &ModeController {
        &self.controller
    }

    /// Encodes `call`, sends it under the current mode, and decodes the
    /// response into the issuing client's shape.
    ///
    /// # Errors
    ///
    /// Returns the controller's error (no match, sanitization, transport,
    /// or an earlier failure of the unit), or an adapter error if the call
    /// or response cannot be translated. Every error leaves the controller
    /// `Failed`.
    pub async fn intercept(&self, call: &OutgoingCall) -> Result<CallOutcome, EngineError> {
        let outcome = self.translate(call).await;
        if let Err(e) = &outcome {
            self.controller.set_failed(e);
        }
        outcome
    }

    async fn translate(&self, call: &OutgoingCall) -> Result<CallOutcome, EngineError> {
        let adapter = self.registry.detect(call)?;
        let request = adapter.to_request(call)?;
        let response = self.controller.exchange(adapter.kind(), &request).await?;
        adapter.from_response(call, response)
    }
}

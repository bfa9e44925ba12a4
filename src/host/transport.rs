//! Transport implementations

use std::cell::RefCell;
use std::rc::Rc;

use super::Transport;
use crate::encoder::{CollectResponse, Envelope};
use crate::error::PersonaError;

/// Shared handle to the envelopes a [`RecordingTransport`] has accepted
pub type EnvelopeLog = Rc<RefCell<Vec<Envelope>>>;

/// Transport that keeps every envelope in memory and answers with an optional
/// scripted collect response
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    log: EnvelopeLog,
    response: Option<CollectResponse>,
    failing: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every send with `response`
    pub fn with_response(mut self, response: CollectResponse) -> Self {
        self.response = Some(response);
        self
    }

    /// Transport whose every send fails (network down, blocked endpoint)
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Handle that stays valid after the transport is boxed into a tracker
    pub fn log(&self) -> EnvelopeLog {
        Rc::clone(&self.log)
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.log.borrow().clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, envelope: &Envelope) -> Result<Option<CollectResponse>, PersonaError> {
        if self.failing {
            return Err(PersonaError::TransportError(
                "collect endpoint unreachable".to_string(),
            ));
        }
        self.log.borrow_mut().push(envelope.clone());
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EventKind;
    use serde_json::json;

    #[test]
    fn test_log_outlives_transport() {
        let transport = RecordingTransport::new().with_response(CollectResponse {
            session_id: Some("s-1".to_string()),
            ..Default::default()
        });
        let log = transport.log();
        let mut boxed: Box<dyn Transport> = Box::new(transport);

        let response = boxed
            .send(&Envelope::new(EventKind::Event, json!({"name": "x"})))
            .unwrap();

        assert_eq!(response.and_then(|r| r.session_id).as_deref(), Some("s-1"));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_failing_transport_records_nothing() {
        let mut transport = RecordingTransport::failing();
        let result = transport.send(&Envelope::new(EventKind::Event, json!({})));
        assert!(result.is_err());
        assert!(transport.sent().is_empty());
    }
}

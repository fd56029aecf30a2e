use crate::error::SessionError;
use fleetwatch::alert::AlertEvent;
use fleetwatch::broker::{Envelope, MessageType, Topic, VehiclePosition};
use serde_json::Value;

/// Typed inbound event handed to subscription callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Positions(Vec<VehiclePosition>),
    Alert(AlertEvent),
    System {
        message: Option<String>,
        data: Value,
    },
    Heartbeat(Value),
    /// Delivered to `system` subscribers when the session gives up reconnecting
    ReconnectExhausted { attempts: u32 },
}

impl ClientEvent {
    /// Decode a text frame into the topic it is filed under and its event
    pub fn decode(text: &str) -> Result<(Topic, Self), SessionError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| SessionError::Decode(e.to_string()))?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<(Topic, Self), SessionError> {
        let topic = envelope.msg_type.topic();
        let event = match envelope.msg_type {
            MessageType::PositionBatch => ClientEvent::Positions(
                serde_json::from_value(envelope.data)
                    .map_err(|e| SessionError::Decode(e.to_string()))?,
            ),
            MessageType::Alert => ClientEvent::Alert(
                serde_json::from_value(envelope.data)
                    .map_err(|e| SessionError::Decode(e.to_string()))?,
            ),
            MessageType::System => ClientEvent::System {
                message: envelope.message,
                data: envelope.data,
            },
            MessageType::Heartbeat => ClientEvent::Heartbeat(envelope.data),
        };
        Ok((topic, event))
    }
}

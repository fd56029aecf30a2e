use crate::simulator::{PositionSnapshot, VehicleStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Named pub/sub channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Positions,
    Alerts,
    System,
    Heartbeat,
    Control,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Positions,
        Topic::Alerts,
        Topic::System,
        Topic::Heartbeat,
        Topic::Control,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Positions => "positions",
            Topic::Alerts => "alerts",
            Topic::System => "system",
            Topic::Heartbeat => "heartbeat",
            Topic::Control => "control",
        }
    }

    /// Topics only the server may publish on
    pub fn is_server_owned(&self) -> bool {
        matches!(self, Topic::Positions | Topic::Alerts | Topic::Heartbeat)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown topic '{}'", s))
    }
}

/// Envelope payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    PositionBatch,
    Alert,
    System,
    Heartbeat,
}

impl MessageType {
    /// Topic a client files this message under
    pub fn topic(&self) -> Topic {
        match self {
            MessageType::PositionBatch => Topic::Positions,
            MessageType::Alert => Topic::Alerts,
            MessageType::System => Topic::System,
            MessageType::Heartbeat => Topic::Heartbeat,
        }
    }
}

/// Server → Client: wire wrapper around every pub/sub payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    pub fn new<T: Serialize>(
        msg_type: MessageType,
        data: &T,
        message: Option<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            msg_type,
            timestamp: Utc::now(),
            data: serde_json::to_value(data)?,
            message,
        })
    }

    /// One consolidated batch for every vehicle advanced this tick
    pub fn position_batch(snapshots: &[PositionSnapshot]) -> Result<Self, serde_json::Error> {
        let payload: Vec<VehiclePosition> = snapshots.iter().map(VehiclePosition::from).collect();
        let mut envelope = Self::new(MessageType::PositionBatch, &payload, None)?;
        if let Some(first) = snapshots.first() {
            envelope.timestamp = first.observed_at;
        }
        Ok(envelope)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::System,
            timestamp: Utc::now(),
            data: Value::Null,
            message: Some(message.into()),
        }
    }

    pub fn heartbeat(data: Value) -> Self {
        Self {
            msg_type: MessageType::Heartbeat,
            timestamp: Utc::now(),
            data,
            message: None,
        }
    }
}

/// PositionBatch item as the dashboard map expects it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehiclePosition {
    pub id: String,
    pub car_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub direction: f64,
    pub status: VehicleStatus,
    pub last_update: DateTime<Utc>,
}

impl From<&PositionSnapshot> for VehiclePosition {
    fn from(snapshot: &PositionSnapshot) -> Self {
        Self {
            id: snapshot.entity_id.clone(),
            car_name: snapshot.car_name.clone(),
            latitude: snapshot.latitude,
            longitude: snapshot.longitude,
            speed: snapshot.speed_kmh,
            direction: snapshot.bearing_degrees,
            status: snapshot.status,
            last_update: snapshot.observed_at,
        }
    }
}

/// Client → Server message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        topic: Topic,
    },
    Unsubscribe {
        topic: Topic,
    },
    Heartbeat,
    Send {
        topic: Topic,
        #[serde(default)]
        payload: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","topic":"positions"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                topic: Topic::Positions
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Heartbeat);

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"send","topic":"system","payload":{"a":1}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Send {
                topic: Topic::System,
                payload: json!({"a": 1})
            }
        );
    }

    #[test]
    fn test_unknown_topic_rejected() {
        let result =
            serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe","topic":"weather"}"#);
        assert!(result.is_err());
        assert!("weather".parse::<Topic>().is_err());
        assert_eq!("alerts".parse::<Topic>(), Ok(Topic::Alerts));
    }

    #[test]
    fn test_envelope_wire_shape() {
        let snapshot = PositionSnapshot {
            entity_id: "v1".to_string(),
            car_name: "Truck".to_string(),
            longitude: 121.5,
            latitude: 31.2,
            speed_kmh: 42.0,
            bearing_degrees: 90.0,
            status: VehicleStatus::Moving,
            observed_at: Utc::now(),
        };

        let envelope = Envelope::position_batch(&[snapshot]).unwrap();
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "PositionBatch");
        assert!(value["timestamp"].is_string());
        assert!(value.get("message").is_none());
        let item = &value["data"][0];
        assert_eq!(item["id"], "v1");
        assert_eq!(item["carName"], "Truck");
        assert_eq!(item["speed"], 42.0);
        assert_eq!(item["direction"], 90.0);
        assert_eq!(item["status"], "Moving");
        assert!(item["lastUpdate"].is_string());
    }

    #[test]
    fn test_system_envelope_has_null_data() {
        let value = serde_json::to_value(Envelope::system("hello")).unwrap();
        assert_eq!(value["type"], "System");
        assert_eq!(value["data"], Value::Null);
        assert_eq!(value["message"], "hello");
    }

    #[test]
    fn test_message_type_topics() {
        assert_eq!(MessageType::PositionBatch.topic(), Topic::Positions);
        assert_eq!(MessageType::Alert.topic(), Topic::Alerts);
        assert!(Topic::Positions.is_server_owned());
        assert!(!Topic::System.is_server_owned());
    }
}

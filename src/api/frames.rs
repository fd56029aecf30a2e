use crate::broker::{
    Broker, BrokerError, ClientMessage, ConnectionId, Envelope, InMemoryBroker, MessageType, Topic,
};
use serde_json::json;
use tracing::{debug, info, warn};

/// Apply one client frame to `connection_id`.
///
/// Shared by the WebSocket reader and the long-poll fallback. Replies
/// (acks, heartbeat echoes, rejections) go only to the sending connection.
/// An `Err` means the connection is gone and the caller should stop.
pub fn handle_client_frame(
    broker: &InMemoryBroker,
    connection_id: &ConnectionId,
    text: &str,
) -> Result<(), BrokerError> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(connection_id = %connection_id, error = %e, "Invalid client frame");
            broker.send_to(
                connection_id,
                &Envelope::system(format!("invalid frame: {}", e)),
            )?;
            return Ok(());
        }
    };

    match msg {
        ClientMessage::Subscribe { topic } => {
            broker.subscribe(connection_id, topic)?;
            info!(connection_id = %connection_id, topic = %topic, "Client subscribed");
            broker.send_to(connection_id, &ack("subscribed", topic))?;
        }
        ClientMessage::Unsubscribe { topic } => {
            broker.unsubscribe(connection_id, topic)?;
            info!(connection_id = %connection_id, topic = %topic, "Client unsubscribed");
            broker.send_to(connection_id, &ack("unsubscribed", topic))?;
        }
        ClientMessage::Heartbeat => {
            broker.touch_heartbeat(connection_id)?;
            debug!(connection_id = %connection_id, "Client heartbeat");
            broker.send_to(connection_id, &Envelope::heartbeat(json!({ "ack": true })))?;
        }
        ClientMessage::Send { topic, payload } => {
            if topic != Topic::System {
                broker.send_to(
                    connection_id,
                    &Envelope::system(format!("clients may not publish on '{}'", topic)),
                )?;
                return Ok(());
            }
            let envelope = Envelope::new(MessageType::System, &payload, None)
                .map_err(|e| BrokerError::Serialization(e.to_string()))?;
            broker.publish(Topic::System, &envelope)?;
        }
    }

    Ok(())
}

/// Acknowledgement for a subscription change, filed under `control`
fn ack(action: &str, topic: Topic) -> Envelope {
    let mut envelope = Envelope::system(format!("{} {}", action, topic));
    envelope.data = json!({
        "channel": Topic::Control,
        "action": action,
        "topic": topic,
    });
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use std::time::Duration;

    async fn replies(broker: &InMemoryBroker, id: &ConnectionId) -> Vec<Envelope> {
        broker
            .outbound(id)
            .unwrap()
            .drain_wait(Duration::ZERO)
            .await
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_subscribe_acks_and_registers() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let id = broker.connect();

        handle_client_frame(&broker, &id, r#"{"type":"subscribe","topic":"alerts"}"#).unwrap();

        let info = broker.connection_info(&id).unwrap();
        assert_eq!(info.subscribed_topics, vec![Topic::Alerts]);

        let replies = replies(&broker, &id).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].msg_type, MessageType::System);
        assert_eq!(replies[0].data["action"], "subscribed");
        assert_eq!(replies[0].data["topic"], "alerts");
        assert_eq!(replies[0].data["channel"], "control");
    }

    #[tokio::test]
    async fn test_heartbeat_is_echoed() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let id = broker.connect();

        handle_client_frame(&broker, &id, r#"{"type":"heartbeat"}"#).unwrap();

        let replies = replies(&broker, &id).await;
        assert_eq!(replies[0].msg_type, MessageType::Heartbeat);
    }

    #[tokio::test]
    async fn test_send_to_server_topic_is_rejected() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let sender = broker.connect();
        let listener = broker.connect();
        broker.subscribe(&listener, Topic::Positions).unwrap();

        handle_client_frame(
            &broker,
            &sender,
            r#"{"type":"send","topic":"positions","payload":[]}"#,
        )
        .unwrap();

        assert!(replies(&broker, &listener).await.is_empty());
        let replies = replies(&broker, &sender).await;
        assert!(replies[0].message.as_deref().unwrap().contains("positions"));
    }

    #[tokio::test]
    async fn test_send_to_system_reaches_subscribers() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let sender = broker.connect();
        let listener = broker.connect();
        broker.subscribe(&listener, Topic::System).unwrap();

        handle_client_frame(
            &broker,
            &sender,
            r#"{"type":"send","topic":"system","payload":{"hello":"world"}}"#,
        )
        .unwrap();

        let got = replies(&broker, &listener).await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data["hello"], "world");
    }

    #[tokio::test]
    async fn test_garbage_gets_error_reply() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let id = broker.connect();

        handle_client_frame(&broker, &id, "not json").unwrap();

        let replies = replies(&broker, &id).await;
        assert!(replies[0].message.as_deref().unwrap().starts_with("invalid frame"));
    }

    #[test]
    fn test_unknown_connection_is_an_error() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let id = ConnectionId::new();

        let result = handle_client_frame(&broker, &id, r#"{"type":"heartbeat"}"#);
        assert!(matches!(result, Err(BrokerError::UnknownConnection(_))));
    }
}

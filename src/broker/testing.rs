use super::{Broker, BrokerError, ConnectionId, Envelope, PublishReport, Topic};
use std::sync::Mutex;

/// Broker double that records every publish and delivers nowhere
#[derive(Default)]
pub(crate) struct RecordingBroker {
    pub published: Mutex<Vec<(Topic, Envelope)>>,
}

impl RecordingBroker {
    pub fn published_on(&self, topic: Topic) -> Vec<Envelope> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

impl Broker for RecordingBroker {
    fn connect(&self) -> ConnectionId {
        ConnectionId::new()
    }

    fn subscribe(&self, _connection_id: &ConnectionId, _topic: Topic) -> Result<(), BrokerError> {
        Ok(())
    }

    fn unsubscribe(&self, _connection_id: &ConnectionId, _topic: Topic) -> Result<(), BrokerError> {
        Ok(())
    }

    fn publish(&self, topic: Topic, envelope: &Envelope) -> Result<PublishReport, BrokerError> {
        self.published
            .lock()
            .unwrap()
            .push((topic, envelope.clone()));
        Ok(PublishReport {
            subscribers: 1,
            delivered: 1,
            ..PublishReport::default()
        })
    }

    fn disconnect(&self, _connection_id: &ConnectionId) -> bool {
        false
    }
}

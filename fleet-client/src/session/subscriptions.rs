use crate::event::ClientEvent;
use fleetwatch::broker::Topic;
use std::sync::Arc;

/// Event handler registered for a topic
pub type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Topics in first-subscribed order, each with its callbacks
#[derive(Default)]
pub(super) struct SubscriptionTable {
    entries: Vec<(Topic, Vec<Callback>)>,
}

impl SubscriptionTable {
    /// Returns true if `topic` was not subscribed before
    pub fn add(&mut self, topic: Topic, callback: Callback) -> bool {
        if let Some((_, callbacks)) = self.entries.iter_mut().find(|(t, _)| *t == topic) {
            callbacks.push(callback);
            return false;
        }
        self.entries.push((topic, vec![callback]));
        true
    }

    pub fn remove(&mut self, topic: Topic) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| *t != topic);
        self.entries.len() != before
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.entries.iter().map(|(t, _)| *t).collect()
    }

    pub fn callbacks(&self, topic: Topic) -> Vec<Callback> {
        self.entries
            .iter()
            .find(|(t, _)| *t == topic)
            .map(|(_, callbacks)| callbacks.clone())
            .unwrap_or_default()
    }
}

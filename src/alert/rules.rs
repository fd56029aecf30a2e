use super::{AlertDispatcher, AlertEvent, AlertKind, Severity};
use crate::roster::Geofence;
use crate::simulator::{PositionSnapshot, VehicleStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Alert persistence collaborator, called after each successful raise
pub trait AlertSink: Send + Sync {
    fn record(&self, alert: &AlertEvent) -> anyhow::Result<()>;
}

/// Rule thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Overspeed alerts above this speed are Critical instead of Warning
    #[serde(default = "default_critical_speed")]
    pub critical_speed_kmh: f64,
}

fn default_critical_speed() -> f64 {
    68.0
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            critical_speed_kmh: default_critical_speed(),
        }
    }
}

#[derive(Debug, Default)]
struct EntityMemory {
    status: Option<VehicleStatus>,
    inside: HashSet<String>,
}

/// Evaluates overspeed and geofence rules against each tick's snapshot.
///
/// Alerts are edge triggered: entering overspeed, entering a fence and
/// leaving a fence each raise once. The first snapshot of an entity only
/// records its baseline.
pub struct AlertRules {
    dispatcher: Arc<AlertDispatcher>,
    sink: Option<Arc<dyn AlertSink>>,
    geofences: Vec<Geofence>,
    config: RulesConfig,
    memory: Mutex<HashMap<String, EntityMemory>>,
}

impl AlertRules {
    pub fn new(
        dispatcher: Arc<AlertDispatcher>,
        sink: Option<Arc<dyn AlertSink>>,
        geofences: Vec<Geofence>,
        config: RulesConfig,
    ) -> Self {
        Self {
            dispatcher,
            sink,
            geofences,
            config,
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    /// Raise every alert the snapshot triggers; returns what was raised
    pub fn evaluate(&self, snapshots: &[PositionSnapshot]) -> Vec<AlertEvent> {
        let mut raised = Vec::new();
        let mut memory = self.memory.lock().unwrap();

        for snapshot in snapshots {
            let inside_now: HashSet<String> = self
                .geofences
                .iter()
                .filter(|g| g.contains(snapshot.location()))
                .map(|g| g.id.clone())
                .collect();

            let entry = memory.entry(snapshot.entity_id.clone()).or_default();

            let Some(previous_status) = entry.status else {
                entry.status = Some(snapshot.status);
                entry.inside = inside_now;
                continue;
            };

            if snapshot.status == VehicleStatus::Overspeed
                && previous_status != VehicleStatus::Overspeed
            {
                let severity = if snapshot.speed_kmh > self.config.critical_speed_kmh {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                raised.push(self.raise(
                    AlertKind::Overspeed,
                    severity,
                    snapshot,
                    format!(
                        "{} overspeed at {:.1} km/h",
                        snapshot.car_name, snapshot.speed_kmh
                    ),
                ));
            }

            for fence in &self.geofences {
                let was_inside = entry.inside.contains(&fence.id);
                let is_inside = inside_now.contains(&fence.id);
                if is_inside && !was_inside {
                    raised.push(self.raise(
                        AlertKind::GeofenceEnter,
                        Severity::Info,
                        snapshot,
                        format!("{} entered {}", snapshot.car_name, fence.name),
                    ));
                } else if was_inside && !is_inside {
                    raised.push(self.raise(
                        AlertKind::GeofenceExit,
                        Severity::Warning,
                        snapshot,
                        format!("{} left {}", snapshot.car_name, fence.name),
                    ));
                }
            }

            entry.status = Some(snapshot.status);
            entry.inside = inside_now;
        }

        raised
    }

    /// Drop remembered state for an entity that is no longer tracked
    pub fn forget(&self, entity_id: &str) {
        self.memory.lock().unwrap().remove(entity_id);
    }

    fn raise(
        &self,
        kind: AlertKind,
        severity: Severity,
        snapshot: &PositionSnapshot,
        message: String,
    ) -> AlertEvent {
        let alert = self.dispatcher.raise(
            kind,
            severity,
            &snapshot.entity_id,
            message,
            Some(snapshot.location()),
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(&alert) {
                warn!(alert_id = %alert.alert_id, error = %e, "Failed to persist alert");
            }
        }

        alert
    }
}

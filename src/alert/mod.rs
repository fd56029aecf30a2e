// Alert identity, formatting and publish

mod rules;
mod store;
mod writer;


pub use rules::{AlertRules, AlertSink, RulesConfig};
pub use store::AlertStore;
pub use writer::AlertWriter;

use crate::broker::{Broker, Envelope, MessageType, Topic};
use crate::route::Waypoint;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// What kind of condition raised the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    Overspeed,
    GeofenceEnter,
    GeofenceExit,
    RouteDeviation,
    Manual,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Overspeed => "Overspeed",
            AlertKind::GeofenceEnter => "GeofenceEnter",
            AlertKind::GeofenceExit => "GeofenceExit",
            AlertKind::RouteDeviation => "RouteDeviation",
            AlertKind::Manual => "Manual",
        }
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Overspeed" => Ok(AlertKind::Overspeed),
            "GeofenceEnter" => Ok(AlertKind::GeofenceEnter),
            "GeofenceExit" => Ok(AlertKind::GeofenceExit),
            "RouteDeviation" => Ok(AlertKind::RouteDeviation),
            "Manual" => Ok(AlertKind::Manual),
            other => Err(format!("unknown alert kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Critical => "Critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Info" => Ok(Severity::Info),
            "Warning" => Ok(Severity::Warning),
            "Error" => Ok(Severity::Error),
            "Critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raised alert as published on the alerts topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    /// `ALT-YYYYMMDD-NNN`, unique and increasing within a UTC day
    pub alert_id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub entity_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Waypoint>,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub handled: bool,
}

/// Time source for alert ids
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct SequenceState {
    date: Option<NaiveDate>,
    last: u32,
}

/// Per-day alert sequence.
///
/// Reading the clock, the rollover check and the increment all happen under
/// one lock, so concurrent callers never share an id.
pub struct AlertIdGenerator {
    clock: Arc<dyn Clock>,
    state: Mutex<SequenceState>,
}

impl AlertIdGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(SequenceState {
                date: None,
                last: 0,
            }),
        }
    }

    /// Next id and the instant it was issued at
    pub fn next_id(&self) -> (String, DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        let now = self.clock.now();
        let today = now.date_naive();

        if state.date != Some(today) {
            if state.date.is_some() {
                info!(date = %today, "Alert sequence rolled over");
            }
            state.date = Some(today);
            state.last = 0;
        }
        state.last += 1;

        (format_alert_id(today, state.last), now)
    }
}

pub fn format_alert_id(date: NaiveDate, sequence: u32) -> String {
    format!("ALT-{}-{:03}", date.format("%Y%m%d"), sequence)
}

/// Turns decided alerts into uniquely identified events on the alerts topic.
///
/// Whether an alert should fire is the caller's decision.
pub struct AlertDispatcher {
    ids: AlertIdGenerator,
    broker: Arc<dyn Broker>,
}

impl AlertDispatcher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_clock(broker, Arc::new(SystemClock))
    }

    pub fn with_clock(broker: Arc<dyn Broker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ids: AlertIdGenerator::new(clock),
            broker,
        }
    }

    pub fn raise(
        &self,
        kind: AlertKind,
        severity: Severity,
        entity_id: &str,
        message: impl Into<String>,
        location: Option<Waypoint>,
    ) -> AlertEvent {
        let (alert_id, observed_at) = self.ids.next_id();
        let event = AlertEvent {
            alert_id,
            kind,
            severity,
            entity_id: entity_id.to_string(),
            message: message.into(),
            location,
            observed_at,
            handled: false,
        };

        match Envelope::new(MessageType::Alert, &event, Some(event.message.clone())) {
            Ok(envelope) => match self.broker.publish(Topic::Alerts, &envelope) {
                Ok(report) => debug!(
                    alert_id = %event.alert_id,
                    delivered = report.delivered,
                    "Alert published"
                ),
                Err(e) => warn!(alert_id = %event.alert_id, error = %e, "Alert publish failed"),
            },
            Err(e) => error!(alert_id = %event.alert_id, error = %e, "Failed to encode alert"),
        }

        info!(
            alert_id = %event.alert_id,
            kind = event.kind.as_str(),
            severity = %event.severity,
            entity_id = %event.entity_id,
            "Alert raised"
        );

        event
    }
}

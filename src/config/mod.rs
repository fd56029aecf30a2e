use anyhow::{ensure, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

// Re-export section types owned by their modules
pub use crate::alert::RulesConfig;
pub use crate::broker::BrokerConfig;
pub use crate::scheduler::SchedulerConfig;
pub use crate::simulator::SimulationConfig;

use crate::roster::{Geofence, StaticRoster, VehicleRecord};

/// Complete FleetWatch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub vehicles: Vec<VehicleRecord>,
    #[serde(default)]
    pub geofences: Vec<Geofence>,
}

/// Alert rules and persistence
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_critical_speed")]
    pub critical_speed_kmh: f64,
    /// SQLite file for alert history
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Raised alerts waiting to be written; newer alerts are dropped when full
    #[serde(default = "default_persist_queue_capacity")]
    pub persist_queue_capacity: usize,
}

fn default_critical_speed() -> f64 {
    RulesConfig::default().critical_speed_kmh
}

fn default_db_path() -> String {
    "fleetwatch-alerts.db".to_string()
}

fn default_persist_queue_capacity() -> usize {
    1024
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            critical_speed_kmh: default_critical_speed(),
            db_path: default_db_path(),
            persist_queue_capacity: default_persist_queue_capacity(),
        }
    }
}

impl AlertsConfig {
    pub fn rules(&self) -> RulesConfig {
        RulesConfig {
            critical_speed_kmh: self.critical_speed_kmh,
        }
    }
}

/// HTTP / WebSocket server
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Longest a fallback poll request waits for the first frame
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,
    /// Fallback sessions silent for this long are disconnected
    #[serde(default = "default_session_idle_timeout_ms")]
    pub session_idle_timeout_ms: u64,
    /// Shared secret for admin routes and WebSocket upgrades.
    /// Auth is disabled when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_poll_wait_ms() -> u64 {
    25_000
}

fn default_session_idle_timeout_ms() -> u64 {
    90_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            poll_wait_ms: default_poll_wait_ms(),
            session_idle_timeout_ms: default_session_idle_timeout_ms(),
            admin_token: None,
        }
    }
}

impl ServerConfig {
    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session_idle_timeout_ms)
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            scheduler: SchedulerConfig::default(),
            broker: BrokerConfig::default(),
            alerts: AlertsConfig::default(),
            server: ServerConfig::default(),
            vehicles: Vec::new(),
            geofences: Vec::new(),
        }
    }
}

impl FleetConfig {
    /// Configured roster, or the demo fleet when no vehicles are configured
    pub fn roster(&self) -> StaticRoster {
        if self.vehicles.is_empty() {
            info!("No vehicles configured, using demo roster");
            return StaticRoster::demo();
        }
        StaticRoster::new(self.vehicles.clone(), self.geofences.clone())
    }

    /// Reject settings the simulation, broker or server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        for (name, value) in [
            ("simulation.min_speed_kmh", sim.min_speed_kmh),
            ("simulation.max_speed_kmh", sim.max_speed_kmh),
            ("simulation.speed_jitter_kmh", sim.speed_jitter_kmh),
            ("simulation.overspeed_threshold_kmh", sim.overspeed_threshold_kmh),
            ("simulation.stopped_threshold_kmh", sim.stopped_threshold_kmh),
            ("simulation.progress_per_kmh", sim.progress_per_kmh),
            ("simulation.initial_speed_kmh", sim.initial_speed_kmh),
            ("alerts.critical_speed_kmh", self.alerts.critical_speed_kmh),
        ] {
            ensure!(value.is_finite(), "{} must be a finite number, got {}", name, value);
        }

        ensure!(
            sim.min_speed_kmh >= 0.0,
            "simulation.min_speed_kmh must not be negative, got {}",
            sim.min_speed_kmh
        );
        ensure!(
            sim.min_speed_kmh <= sim.max_speed_kmh,
            "simulation.min_speed_kmh ({}) exceeds simulation.max_speed_kmh ({})",
            sim.min_speed_kmh,
            sim.max_speed_kmh
        );
        ensure!(
            sim.speed_jitter_kmh >= 0.0,
            "simulation.speed_jitter_kmh must not be negative"
        );
        ensure!(
            sim.progress_per_kmh > 0.0,
            "simulation.progress_per_kmh must be positive, got {}",
            sim.progress_per_kmh
        );
        ensure!(
            self.scheduler.tick_interval_ms > 0,
            "scheduler.tick_interval_ms must be positive"
        );
        ensure!(
            self.scheduler.heartbeat_interval_secs > 0,
            "scheduler.heartbeat_interval_secs must be positive"
        );
        ensure!(
            self.broker.queue_capacity > 0,
            "broker.queue_capacity must be positive"
        );
        ensure!(
            self.alerts.persist_queue_capacity > 0,
            "alerts.persist_queue_capacity must be positive"
        );
        ensure!(
            self.server.session_idle_timeout_ms > self.server.poll_wait_ms,
            "server.session_idle_timeout_ms ({}) must exceed server.poll_wait_ms ({})",
            self.server.session_idle_timeout_ms,
            self.server.poll_wait_ms
        );
        Ok(())
    }

    /// Apply environment overrides, ignoring values that fail to parse.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("FLEETWATCH_BIND_ADDR") {
            if let Ok(addr) = v.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("FLEETWATCH_ADMIN_TOKEN") {
            if !v.is_empty() {
                self.server.admin_token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("FLEETWATCH_ALERT_DB") {
            if !v.is_empty() {
                self.alerts.db_path = v;
            }
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<FleetConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: FleetConfig = toml::from_str(&contents)?;
    Ok(config)
}

use std::time::Duration;

const DEFAULT_URL: &str = "ws://localhost:3000/api/ws";

/// Fixed delay between reconnect attempts
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Bound on a single connect attempt, handshake included
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Keeps proxies from closing an idle socket
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Client session settings
#[derive(Debug, Clone)]
pub struct FleetClientConfig {
    pub url: String,
    /// Sent as `?token=` on the upgrade request
    pub token: Option<String>,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    /// A connect that has not finished by then counts as a failed attempt
    pub connect_timeout: Duration,
}

impl Default for FleetClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            token: None,
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl FleetClientConfig {
    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("FLEET_CLIENT_URL") {
            cfg.url = v;
        }
        if let Ok(v) = std::env::var("FLEET_CLIENT_TOKEN") {
            if !v.is_empty() {
                cfg.token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("FLEET_CLIENT_RECONNECT_DELAY_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                cfg.reconnect_delay = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("FLEET_CLIENT_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.max_reconnect_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_CLIENT_HEARTBEAT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                if n > 0 {
                    cfg.heartbeat_interval = Duration::from_secs(n);
                }
            }
        }
        if let Ok(v) = std::env::var("FLEET_CLIENT_CONNECT_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                if n > 0 {
                    cfg.connect_timeout = Duration::from_secs(n);
                }
            }
        }

        cfg
    }

    /// URL to dial, with the token appended when one is set
    pub fn connect_url(&self) -> String {
        match &self.token {
            Some(token) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}token={}", self.url, sep, token)
            }
            None => self.url.clone(),
        }
    }
}

use anyhow::{Context, Result};
use fleet_client::{ClientEvent, ClientSession, FleetClientConfig, WsTransport};
use fleetwatch::broker::Topic;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_client=info".into()),
        )
        .init();

    let config = FleetClientConfig::from_env();
    info!(
        url = %config.url,
        reconnect_delay_secs = config.reconnect_delay.as_secs(),
        max_reconnect_attempts = config.max_reconnect_attempts,
        "Fleet client starting..."
    );

    let session = ClientSession::new(config, Arc::new(WsTransport));

    session.subscribe(Topic::Positions, |event| {
        if let ClientEvent::Positions(positions) = event {
            for p in positions {
                info!(
                    vehicle = %p.id,
                    car_name = %p.car_name,
                    latitude = p.latitude,
                    longitude = p.longitude,
                    speed = p.speed,
                    status = %p.status,
                    "Position"
                );
            }
        }
    });
    session.subscribe(Topic::Alerts, |event| {
        if let ClientEvent::Alert(alert) = event {
            warn!(
                alert_id = %alert.alert_id,
                kind = alert.kind.as_str(),
                severity = %alert.severity,
                entity_id = %alert.entity_id,
                "{}",
                alert.message
            );
        }
    });
    session.subscribe(Topic::System, |event| match event {
        ClientEvent::System { message, .. } => {
            info!(message = message.as_deref().unwrap_or(""), "System notice");
        }
        ClientEvent::ReconnectExhausted { attempts } => {
            error!(attempts = attempts, "Server unreachable, giving up");
        }
        _ => {}
    });

    session.connect().context("Failed to start session")?;

    tokio::select! {
        result = session.closed() => {
            if let Err(e) = result {
                error!(error = %e, "Session ended");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl_c signal")?;
            info!("Shutdown signal received");
        }
    }

    session.dispose().await;
    info!("Fleet client stopped");
    Ok(())
}

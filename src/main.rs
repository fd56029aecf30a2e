use anyhow::{anyhow, Context, Result};
use fleetwatch::alert::{AlertDispatcher, AlertRules, AlertSink, AlertStore, AlertWriter};
use fleetwatch::api::{create_router, AppState};
use fleetwatch::broker::InMemoryBroker;
use fleetwatch::config::{load_config, FleetConfig};
use fleetwatch::motion::MotionStore;
use fleetwatch::roster::FleetRoster;
use fleetwatch::route::RouteTable;
use fleetwatch::scheduler::{HeartbeatBroadcaster, PositionBroadcaster, Ticker};
use fleetwatch::simulator::PositionSimulator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetwatch=info".into()),
        )
        .init();

    info!("FleetWatch starting...");

    let mut config = match std::env::var("FLEETWATCH_CONFIG") {
        Ok(path) => {
            let config = load_config(&path)
                .map_err(|e| anyhow!("Failed to load config from {}: {}", path, e))?;
            info!(path = %path, "Configuration loaded");
            config
        }
        Err(_) => {
            info!("FLEETWATCH_CONFIG not set, using defaults");
            FleetConfig::default()
        }
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    // Routes and motion state
    let roster = config.roster();
    let vehicles = roster.vehicles();
    let table = RouteTable::from_definitions(
        vehicles.iter().map(|v| (v.id.clone(), v.route.clone())),
    );
    let motion = Arc::new(MotionStore::seed(&table, &vehicles, &config.simulation));
    info!(
        vehicles = vehicles.len(),
        routes = table.len(),
        tracked = motion.len(),
        "Fleet loaded"
    );

    let broker = Arc::new(InMemoryBroker::new(config.broker.clone()));

    // Alerts
    let alert_store = Arc::new(
        AlertStore::new(&config.alerts.db_path).context("Failed to initialize alert store")?,
    );
    info!(db_path = %config.alerts.db_path, "Alert store initialized");

    let dispatcher = Arc::new(AlertDispatcher::new(broker.clone()));
    // Rules run inside the tick; the database write happens on the writer task
    let (alert_writer, alert_writer_handle) =
        AlertWriter::spawn(alert_store.clone(), config.alerts.persist_queue_capacity);
    let sink: Arc<dyn AlertSink> = Arc::new(alert_writer);
    let rules = Arc::new(AlertRules::new(
        Arc::clone(&dispatcher),
        Some(sink),
        roster.geofences(),
        config.alerts.rules(),
    ));

    let broadcaster = Arc::new(PositionBroadcaster::new(
        Arc::clone(&motion),
        PositionSimulator::with_random(config.simulation.clone()),
        broker.clone(),
        Some(rules),
    ));
    let heartbeat = Arc::new(
        HeartbeatBroadcaster::new(Arc::clone(&broker), Arc::clone(&motion))
            .with_idle_timeout(config.server.session_idle_timeout()),
    );

    // Periodic tasks
    let position_ticker = {
        let broadcaster = Arc::clone(&broadcaster);
        Ticker::start(
            "positions",
            config.scheduler.tick_interval(),
            config.scheduler.initial_delay(),
            move || {
                let broadcaster = Arc::clone(&broadcaster);
                async move {
                    broadcaster.tick();
                }
            },
        )
    };
    let heartbeat_ticker = {
        let heartbeat = Arc::clone(&heartbeat);
        Ticker::start(
            "heartbeat",
            config.scheduler.heartbeat_interval(),
            config.scheduler.heartbeat_interval(),
            move || {
                let heartbeat = Arc::clone(&heartbeat);
                async move {
                    heartbeat.beat();
                }
            },
        )
    };

    // HTTP / WebSocket server
    let router = create_router(AppState {
        broker: Arc::clone(&broker),
        broadcaster: Arc::clone(&broadcaster),
        dispatcher,
        alert_store: Some(alert_store),
        admin_token: config.server.admin_token.clone(),
        poll_wait: config.server.poll_wait(),
    });
    if config.server.admin_token.is_none() {
        warn!("No admin token configured, admin routes are unrestricted");
    }

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr)
        .await
        .context("Failed to bind server address")?;
    info!(addr = %config.server.bind_addr, "FleetWatch listening");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "Server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Stop producing, flush subscribers, then stop serving
    let stop_timeout = config.scheduler.stop_timeout();
    position_ticker.stop(stop_timeout).await;
    heartbeat_ticker.stop(stop_timeout).await;

    let broker_timeout = Duration::from_millis(config.broker.shutdown_timeout_ms);
    broker.shutdown(broker_timeout).await;

    let _ = shutdown_tx.send(());
    if tokio::time::timeout(broker_timeout, &mut server_handle)
        .await
        .is_err()
    {
        warn!("Server did not drain in time, aborting");
        server_handle.abort();
    }

    // The last handle on the alert rules goes here; the writer then drains
    drop(broadcaster);
    if tokio::time::timeout(stop_timeout, alert_writer_handle)
        .await
        .is_err()
    {
        warn!("Alert writer did not drain in time");
    }

    info!("FleetWatch stopped");
    Ok(())
}

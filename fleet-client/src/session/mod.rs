//! Client session: owns the connection to the server, reconnects with a
//! fixed delay, replays cached subscriptions and dispatches typed events.
//!
//! One driver task owns the state machine
//! `Disconnected -> Connecting -> Connected -> (Disconnected | Reconnecting) -> Connecting`.
//! Callers talk to it through a command channel and observe it through a
//! watch channel.

mod subscriptions;

#[cfg(test)]
mod tests;

pub use subscriptions::Callback;

use crate::config::FleetClientConfig;
use crate::error::SessionError;
use crate::event::ClientEvent;
use crate::transport::{Connection, Transport};
use fleetwatch::broker::{ClientMessage, Topic};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subscriptions::SubscriptionTable;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// How a connected period ended
enum Exit {
    Closed,
    Disposed,
}

struct Shared {
    config: FleetClientConfig,
    transport: Arc<dyn Transport>,
    subscriptions: Mutex<SubscriptionTable>,
    state_tx: watch::Sender<SessionState>,
    dispose_tx: watch::Sender<bool>,
    /// Held by the running driver for its whole lifetime
    commands: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientMessage>>>,
}

type Outcome = Option<Result<(), SessionError>>;

/// A running (or finished) driver task
struct Driver {
    handle: JoinHandle<()>,
    outcome: watch::Receiver<Outcome>,
}

/// Handle to a client session
pub struct ClientSession {
    shared: Arc<Shared>,
    commands_tx: mpsc::UnboundedSender<ClientMessage>,
    driver: Mutex<Option<Driver>>,
}

impl ClientSession {
    pub fn new(config: FleetClientConfig, transport: Arc<dyn Transport>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (dispose_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                subscriptions: Mutex::new(SubscriptionTable::default()),
                state_tx,
                dispose_tx,
                commands: Arc::new(tokio::sync::Mutex::new(commands_rx)),
            }),
            commands_tx,
            driver: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Start the driver. A no-op while one is already running; required again
    /// after reconnect attempts are exhausted.
    pub fn connect(&self) -> Result<(), SessionError> {
        if *self.shared.dispose_tx.borrow() {
            return Err(SessionError::Disposed);
        }

        let mut driver = self.driver.lock().unwrap();
        if let Some(running) = driver.as_ref() {
            if !running.handle.is_finished() {
                debug!("Session already running");
                return Ok(());
            }
        }

        let (outcome_tx, outcome) = watch::channel(None);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut commands = Arc::clone(&shared.commands).lock_owned().await;
            let result = shared.run(&mut commands).await;
            shared.set_state(SessionState::Disconnected);
            outcome_tx.send_replace(Some(result));
        });
        *driver = Some(Driver { handle, outcome });
        Ok(())
    }

    /// Cache `callback` for `topic`; subscribe on the wire right away when
    /// connected, otherwise on the next successful connect.
    pub fn subscribe<F>(&self, topic: Topic, callback: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared
            .subscriptions
            .lock()
            .unwrap()
            .add(topic, Arc::new(callback));

        if self.state() == SessionState::Connected {
            let _ = self.commands_tx.send(ClientMessage::Subscribe { topic });
        } else {
            debug!(topic = %topic, "Subscription deferred until connected");
        }
    }

    /// Drop every callback for `topic`
    pub fn unsubscribe(&self, topic: Topic) {
        let removed = self.shared.subscriptions.lock().unwrap().remove(topic);
        if removed && self.state() == SessionState::Connected {
            let _ = self.commands_tx.send(ClientMessage::Unsubscribe { topic });
        }
    }

    /// Send a payload to the server. Returns false, and sends nothing, unless
    /// connected.
    pub fn send(&self, topic: Topic, payload: Value) -> bool {
        if self.state() != SessionState::Connected {
            warn!(topic = %topic, "Not connected, message dropped");
            return false;
        }
        self.commands_tx
            .send(ClientMessage::Send { topic, payload })
            .is_ok()
    }

    /// Wait for the driver to stop.
    ///
    /// `Err(ReconnectExhausted)` when it gave up; `Ok` after `dispose()` or
    /// when it was never started.
    pub async fn closed(&self) -> Result<(), SessionError> {
        let outcome = self
            .driver
            .lock()
            .unwrap()
            .as_ref()
            .map(|d| d.outcome.clone());
        let Some(mut outcome) = outcome else {
            return Ok(());
        };

        let finished = outcome.wait_for(|o| o.is_some()).await.map(|o| o.clone());
        match finished {
            Ok(Some(result)) => result,
            _ => {
                error!("Session driver stopped without a result");
                Err(SessionError::TransportClosed("driver stopped".to_string()))
            }
        }
    }

    /// Stop the session for good, cancelling any reconnect backoff and the
    /// heartbeat together.
    pub async fn dispose(&self) {
        self.shared.dispose_tx.send_replace(true);
        let driver = self.driver.lock().unwrap().take();
        if let Some(driver) = driver {
            let _ = driver.handle.await;
        }
        self.shared.set_state(SessionState::Disconnected);
        info!("Session disposed");
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.shared.dispose_tx.send_replace(true);
    }
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Session state changed");
        }
    }

    /// Connect, serve, and reconnect until disposed or out of attempts
    async fn run(
        &self,
        commands: &mut mpsc::UnboundedReceiver<ClientMessage>,
    ) -> Result<(), SessionError> {
        let mut dispose_rx = self.dispose_tx.subscribe();
        let url = self.config.connect_url();
        let max_attempts = self.config.max_reconnect_attempts;
        let mut attempts: u32 = 0;

        loop {
            self.set_state(SessionState::Connecting);

            let connected = tokio::select! {
                _ = disposed(&mut dispose_rx) => return Ok(()),
                result = tokio::time::timeout(
                    self.config.connect_timeout,
                    self.transport.connect(&url),
                ) => result.unwrap_or_else(|_| {
                    Err(SessionError::Connect(format!(
                        "timed out after {:?}",
                        self.config.connect_timeout
                    )))
                }),
            };

            match connected {
                Ok(connection) => {
                    attempts = 0;
                    info!(url = %self.config.url, "Connected");
                    match self.serve(connection, commands, &mut dispose_rx).await {
                        Exit::Disposed => return Ok(()),
                        Exit::Closed => warn!("Connection lost"),
                    }
                }
                Err(e) => warn!(error = %e, "Connect attempt failed"),
            }

            self.set_state(SessionState::Disconnected);

            attempts += 1;
            if attempts > max_attempts {
                error!(attempts = max_attempts, "Reconnect attempts exhausted");
                self.dispatch_event(
                    Topic::System,
                    &ClientEvent::ReconnectExhausted {
                        attempts: max_attempts,
                    },
                );
                return Err(SessionError::ReconnectExhausted {
                    attempts: max_attempts,
                });
            }

            self.set_state(SessionState::Reconnecting);
            info!(
                attempt = attempts,
                max_attempts = max_attempts,
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "Reconnecting after delay"
            );

            tokio::select! {
                _ = disposed(&mut dispose_rx) => return Ok(()),
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    /// Drive one live connection until it closes or the session is disposed
    async fn serve(
        &self,
        connection: Connection,
        commands: &mut mpsc::UnboundedReceiver<ClientMessage>,
        dispose_rx: &mut watch::Receiver<bool>,
    ) -> Exit {
        let Connection {
            mut sink,
            mut stream,
        } = connection;

        // Commands left from a previous connection are superseded by the
        // subscription cache
        while let Ok(stale) = commands.try_recv() {
            debug!(message = ?stale, "Discarding command from previous connection");
        }

        self.set_state(SessionState::Connected);

        // Replay before any caller command is taken off the channel
        let topics = self.subscriptions.lock().unwrap().topics();
        for topic in topics {
            match encode(&ClientMessage::Subscribe { topic }) {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!(topic = %topic, error = %e, "Failed to replay subscription");
                    } else {
                        debug!(topic = %topic, "Subscription replayed");
                    }
                }
                None => continue,
            }
        }

        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = disposed(dispose_rx) => {
                    sink.close().await;
                    return Exit::Disposed;
                }

                frame = stream.next_frame() => match frame {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(e)) => {
                        warn!(error = %e, "Transport error");
                        return Exit::Closed;
                    }
                    None => return Exit::Closed,
                },

                Some(message) = commands.recv() => {
                    if let Some(frame) = encode(&message) {
                        if let Err(e) = sink.send(frame).await {
                            warn!(error = %e, "Failed to send message");
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    // Only transport closure counts as a disconnect
                    if let Some(frame) = encode(&ClientMessage::Heartbeat) {
                        if let Err(e) = sink.send(frame).await {
                            warn!(error = %e, "Heartbeat failed");
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match ClientEvent::decode(text) {
            Ok((topic, event)) => self.dispatch_event(topic, &event),
            Err(e) => warn!(error = %e, "Skipping undecodable frame"),
        }
    }

    fn dispatch_event(&self, topic: Topic, event: &ClientEvent) {
        // Callbacks run outside the lock so they may subscribe
        let callbacks = self.subscriptions.lock().unwrap().callbacks(topic);
        for callback in callbacks {
            callback(event);
        }
    }
}

/// Resolves once the session is disposed (or its handle is gone)
async fn disposed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|disposed| *disposed).await;
}

fn encode(message: &ClientMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(error = %e, "Failed to encode client message");
            None
        }
    }
}

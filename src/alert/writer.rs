//! Background alert persistence.
//!
//! Alert rules run inside the position tick; `AlertWriter` hands each raised
//! alert to a bounded channel and a separate task writes it through the real
//! sink on the blocking pool.

use super::rules::AlertSink;
use super::AlertEvent;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Non-blocking `AlertSink` in front of a slow one
pub struct AlertWriter {
    tx: mpsc::Sender<AlertEvent>,
}

impl AlertWriter {
    /// Start the persistence task.
    ///
    /// At most `capacity` alerts wait for `target`; the task ends once every
    /// `AlertWriter` is dropped and the queue is drained.
    pub fn spawn(target: Arc<dyn AlertSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                let alert_id = alert.alert_id.clone();
                let target = Arc::clone(&target);
                match tokio::task::spawn_blocking(move || target.record(&alert)).await {
                    Ok(Ok(())) => debug!(alert_id = %alert_id, "Alert persisted"),
                    Ok(Err(e)) => {
                        warn!(alert_id = %alert_id, error = %e, "Failed to persist alert")
                    }
                    Err(e) => error!(alert_id = %alert_id, error = %e, "Alert write panicked"),
                }
            }
            debug!("Alert writer stopped");
        });

        (Self { tx }, handle)
    }
}

impl AlertSink for AlertWriter {
    fn record(&self, alert: &AlertEvent) -> Result<()> {
        match self.tx.try_send(alert.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow!("alert write queue is full")),
            Err(TrySendError::Closed(_)) => Err(anyhow!("alert writer has stopped")),
        }
    }
}

//! The task driving one watcher through read, subscribe, listen and retry.

use super::Shared;
use crate::bus::BusRequest;
use crate::error::{BusError, ConfigError, Result};
use crate::snapshot::{ChangeNotification, build_snapshot};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, trace};

/// Run until the watcher is stopped.
pub(super) async fn run(shared: Arc<Shared>) {
    let cancel = shared.cancel.clone();
    loop {
        let error = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            outcome = read_then_listen(&shared) => match outcome {
                Ok(never) => match never {},
                Err(error) => error,
            },
        };

        let Some(delay) = shared.schedule_retry(&error) else {
            return;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }

        if !shared.begin_attempt() {
            return;
        }
    }
}

/// Read every property, emit the snapshot, subscribe, then merge change
/// signals until something fails. Only returns with an error.
///
/// Signals whose interface argument is not the watched interface are
/// dropped without merging: the object may carry other interfaces whose
/// properties do not belong in this snapshot.
async fn read_then_listen(shared: &Shared) -> Result<Infallible> {
    let address = &shared.address;

    debug!(address = %address, "reading all properties");
    #[cfg(feature = "metrics")]
    if let Some(metrics) = &shared.metrics {
        metrics.record_read(&address.service);
    }
    let output = shared.bus.request(BusRequest::read_all(address)).await?;
    shared.ensure_running()?;

    let Value::Object(properties) = output else {
        return Err(BusError::MalformedReply(format!(
            "GetAll on {} did not return an object",
            address
        ))
        .into());
    };
    let mut snapshot = build_snapshot(properties);
    debug!(address = %address, properties = snapshot.len(), "emitting initial snapshot");
    shared.emit(&snapshot)?;

    let subscription = shared
        .bus
        .subscribe(BusRequest::properties_changed(address))
        .await?;
    let mut signals = shared.attach_subscription(subscription)?;
    debug!(address = %address, "subscribed to property changes");

    loop {
        let body = signals
            .recv()
            .await
            .ok_or(ConfigError::Bus(BusError::SubscriptionClosed))??;
        let notification = ChangeNotification::try_from(body)?;

        if notification.interface != address.interface {
            trace!(
                address = %address,
                interface = %notification.interface,
                "ignoring change signal for another interface"
            );
            continue;
        }

        shared.ensure_running()?;
        trace!(
            address = %address,
            changed = notification.changed.len(),
            invalidated = notification.invalidated.len(),
            "merging change signal"
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &shared.metrics {
            metrics.record_notification(&address.service);
        }
        notification.apply_to(&mut snapshot);
        shared.emit(&snapshot)?;
    }
}

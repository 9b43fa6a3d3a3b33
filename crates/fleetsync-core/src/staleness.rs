//! Staleness evaluation.
//!
//! A device that stops reporting never says goodbye; its record simply
//! ages. The evaluator re-derives each device's display status from the age
//! of its `last_update` against the corrected logical clock, on a fixed
//! cadence, so an unplugged device flips to offline within seconds of
//! crossing its threshold instead of waiting for the next server push.
//!
//! The error state is sticky here: an errored device that goes quiet stays
//! errored rather than being downgraded to plain offline, and only fresh
//! data from the server (a patch carrying a new status) can clear it.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use fleetsync_types::{DeviceRecord, DeviceStatus};

use crate::clock::ClockSynchronizer;
use crate::config::StalenessConfig;
use crate::store::EntityStore;

/// Derive a device's display status from the age of its last update.
///
/// `now` must come from the corrected logical clock; `last_update` is a
/// server-side timestamp and comparing it against the local wall clock is
/// exactly the bug this engine exists to avoid.
///
/// The function is pure and idempotent: evaluating twice with the same
/// inputs yields the same status.
pub fn evaluate(record: &DeviceRecord, now: OffsetDateTime) -> DeviceStatus {
    if record.status.is_error() {
        return record.status;
    }
    let age = now - record.last_update;
    let threshold = time::Duration::try_from(record.offline_threshold())
        .unwrap_or(time::Duration::MAX);
    if age > threshold {
        DeviceStatus::Offline
    } else if record.status == DeviceStatus::Offline {
        // Fresh data arrived while the device was marked offline; the next
        // pass brings it back without waiting for an explicit status push.
        DeviceStatus::Active
    } else {
        record.status
    }
}

/// Spawn the periodic evaluator task.
///
/// Each tick reads `logical_now` once, evaluates every device in the store
/// and writes back only actual changes through [`EntityStore::apply_status`],
/// so a pass over an unchanged fleet emits no events.
pub fn spawn_staleness_task(
    store: Arc<EntityStore>,
    clock: Arc<ClockSynchronizer>,
    config: StalenessConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.tick_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("staleness evaluator cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let now = clock.logical_now();
                    let records = store.snapshot().await;
                    let mut changed = 0usize;
                    for record in &records {
                        let status = evaluate(record, now);
                        if status != record.status
                            && store.apply_status(&record.device_id, status).await
                        {
                            changed += 1;
                        }
                    }
                    trace!(devices = records.len(), changed, "staleness pass");
                }
            }
        }
    })
}

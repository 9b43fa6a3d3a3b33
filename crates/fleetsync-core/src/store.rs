//! In-memory keyed store for device records.
//!
//! The [`EntityStore`] owns the authoritative local copy of every
//! [`DeviceRecord`] plus a bounded rolling reading window per device. All
//! state sits behind one `RwLock`, so readers always observe a consistent
//! view: a patch either is fully applied or not applied at all.
//!
//! Mutation happens only through the documented operations here; the
//! connection supervisor hands parsed messages to the store but never
//! touches its internals, and the staleness evaluator writes exclusively
//! through [`EntityStore::apply_status`].

use std::collections::HashMap;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use fleetsync_types::{DeviceRecord, DeviceStatus, Reading};

use crate::config::StoreConfig;
use crate::events::{EngineEvent, EventDispatcher};
use crate::messages::DevicePatch;

/// Tally of devices per display status, in the shape the dashboard's
/// overview header consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Total devices known.
    pub total: usize,
    /// Devices currently active.
    pub active: usize,
    /// Devices currently offline.
    pub offline: usize,
    /// Devices in the error state.
    pub error: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    devices: HashMap<String, DeviceRecord>,
    readings: HashMap<String, Vec<Reading>>,
}

/// The authoritative local copy of all device records.
pub struct EntityStore {
    state: RwLock<StoreState>,
    events: EventDispatcher,
    reading_window: usize,
}

impl EntityStore {
    /// Create an empty store.
    pub fn new(config: &StoreConfig, events: EventDispatcher) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            events,
            reading_window: config.reading_window,
        }
    }

    /// Replace the entire device set.
    ///
    /// Used on initial connect and whenever a feed delivers a full snapshot.
    /// Devices absent from the snapshot are removed, along with their
    /// reading windows.
    pub async fn apply_snapshot(&self, records: Vec<DeviceRecord>) {
        let count = records.len();
        {
            let mut state = self.state.write().await;
            state.devices = records
                .into_iter()
                .map(|r| (r.device_id.clone(), r))
                .collect();
            let StoreState { devices, readings } = &mut *state;
            readings.retain(|id, _| devices.contains_key(id));
        }
        debug!(count, "applied device snapshot");
        self.events.send(EngineEvent::SnapshotApplied { count });
    }

    /// Merge a partial update into the record with the matching identifier.
    ///
    /// Unknown identifiers are inserted as new records built from the patch
    /// over placeholder defaults, anchored at `now` when the patch carries
    /// no timestamp. Fields absent from the patch are left untouched.
    pub async fn apply_patch(&self, patch: DevicePatch, now: OffsetDateTime) {
        let device_id = patch.device_id.clone();
        let status_change = {
            let mut state = self.state.write().await;
            match state.devices.get_mut(&device_id) {
                Some(record) => {
                    let before = record.status;
                    patch.apply_to(record);
                    (before != record.status).then_some((before, record.status))
                }
                None => {
                    // A fresh insert is not a status transition.
                    let record = patch.into_record(now);
                    state.devices.insert(device_id.clone(), record);
                    debug!(%device_id, "patch for unknown device inserted as new record");
                    None
                }
            }
        };

        self.events.send(EngineEvent::DeviceUpdated {
            device_id: device_id.clone(),
        });
        if let Some((from, to)) = status_change {
            self.events.send(EngineEvent::StatusChanged {
                device_id,
                from,
                to,
            });
        }
    }

    /// Merge a batch of readings into a device's rolling window.
    ///
    /// New readings are prepended, the window is re-sorted newest-first and
    /// truncated to the configured bound. Readings for a device the store
    /// has not seen yet are buffered under that identifier; the record may
    /// arrive moments later on another feed.
    pub async fn apply_reading_batch(&self, device_id: &str, readings: Vec<Reading>) {
        if readings.is_empty() {
            return;
        }
        let count = readings.len();
        {
            let mut state = self.state.write().await;
            let window = state.readings.entry(device_id.to_string()).or_default();
            window.splice(0..0, readings);
            window.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            window.truncate(self.reading_window);
        }
        self.events.send(EngineEvent::ReadingsMerged {
            device_id: device_id.to_string(),
            count,
        });
    }

    /// Overwrite a device's status, used by the staleness evaluator.
    ///
    /// Returns `true` and emits [`EngineEvent::StatusChanged`] only when the
    /// status actually changed, so an idempotent evaluator pass produces no
    /// spurious notifications. Unknown identifiers are ignored.
    pub async fn apply_status(&self, device_id: &str, status: DeviceStatus) -> bool {
        let change = {
            let mut state = self.state.write().await;
            match state.devices.get_mut(device_id) {
                Some(record) if record.status != status => {
                    let from = record.status;
                    record.status = status;
                    Some(from)
                }
                _ => None,
            }
        };
        if let Some(from) = change {
            self.events.send(EngineEvent::StatusChanged {
                device_id: device_id.to_string(),
                from,
                to: status,
            });
            true
        } else {
            false
        }
    }

    /// Get a single device record.
    pub async fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.state.read().await.devices.get(device_id).cloned()
    }

    /// Get all device records, ordered by identifier.
    pub async fn snapshot(&self) -> Vec<DeviceRecord> {
        let state = self.state.read().await;
        let mut records: Vec<DeviceRecord> = state.devices.values().cloned().collect();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        records
    }

    /// Get a device's reading window, newest first.
    pub async fn readings(&self, device_id: &str) -> Vec<Reading> {
        self.state
            .read()
            .await
            .readings
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of devices known.
    pub async fn len(&self) -> usize {
        self.state.read().await.devices.len()
    }

    /// Whether the store holds no devices.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.devices.is_empty()
    }

    /// Tally devices per display status.
    pub async fn status_counts(&self) -> StatusCounts {
        let state = self.state.read().await;
        let mut counts = StatusCounts {
            total: state.devices.len(),
            ..Default::default()
        };
        for record in state.devices.values() {
            match record.status {
                DeviceStatus::Active => counts.active += 1,
                DeviceStatus::Offline => counts.offline += 1,
                DeviceStatus::Error => counts.error += 1,
            }
        }
        counts
    }
}

//! Push-message envelope and classification.
//!
//! Every inbound socket payload is a JSON envelope `{ kind, payload }`.
//! [`PushMessage::parse`] decodes the envelope, classifies it by the `kind`
//! discriminant, and decodes the payload into a typed message. Unknown kinds
//! are not errors — they decode to [`PushMessage::Unknown`] so the channel
//! can log and drop them without dying.
//!
//! [`DevicePatch`] decodes tolerantly: a field carrying a value of the wrong
//! type is skipped (logged at debug) while the rest of the patch applies.
//! Upstream firmware occasionally emits partially corrupt patches and the
//! dashboard historically kept whatever decoded.

use serde::Deserialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use fleetsync_types::{DeviceRecord, DeviceStatus, LogCategory, LogEntry, Reading, TemperatureKind};

use crate::error::{Error, Result};

/// Raw message envelope as it arrives off the socket.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    /// Message kind discriminant.
    pub kind: String,
    /// Kind-specific payload.
    #[serde(default)]
    pub payload: Value,
}

/// A classified push message.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new message kinds
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PushMessage {
    /// Full replacement set of device records.
    Snapshot {
        /// The complete device set.
        devices: Vec<DeviceRecord>,
    },
    /// Partial update to a single device.
    Patch(DevicePatch),
    /// A batch of readings for one device.
    ReadingBatch {
        /// The device the readings belong to.
        device_id: String,
        /// The readings, server-ordered.
        readings: Vec<Reading>,
    },
    /// A log entry pushed on a log feed.
    LogEvent {
        /// The category the entry belongs to.
        category: LogCategory,
        /// The entry itself.
        entry: LogEntry,
    },
    /// A kind this engine does not understand. Dropped by the router.
    Unknown {
        /// The unrecognized discriminant.
        kind: String,
    },
}

#[derive(Debug, Deserialize)]
struct SnapshotPayload {
    devices: Vec<DeviceRecord>,
}

#[derive(Debug, Deserialize)]
struct ReadingBatchPayload {
    device_id: String,
    readings: Vec<Reading>,
}

#[derive(Debug, Deserialize)]
struct LogEventPayload {
    #[serde(default = "default_log_category")]
    category: LogCategory,
    #[serde(flatten)]
    entry: LogEntry,
}

fn default_log_category() -> LogCategory {
    LogCategory::Device
}

impl PushMessage {
    /// Parse and classify a raw socket payload.
    ///
    /// Fails if the envelope itself is not valid JSON, lacks a `kind`, or if
    /// a recognized kind carries an undecodable payload. An unrecognized
    /// kind is *not* a failure — it classifies as [`PushMessage::Unknown`].
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: PushEnvelope = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }

    /// Classify an already-decoded envelope.
    pub fn from_envelope(envelope: PushEnvelope) -> Result<Self> {
        match envelope.kind.as_str() {
            "snapshot" => {
                // Some feeds send the device list bare, others wrap it.
                let devices = if envelope.payload.is_array() {
                    serde_json::from_value(envelope.payload)?
                } else {
                    let payload: SnapshotPayload = serde_json::from_value(envelope.payload)?;
                    payload.devices
                };
                Ok(PushMessage::Snapshot { devices })
            }
            "patch" => Ok(PushMessage::Patch(DevicePatch::from_value(&envelope.payload)?)),
            "reading_batch" => {
                let payload: ReadingBatchPayload = serde_json::from_value(envelope.payload)?;
                Ok(PushMessage::ReadingBatch {
                    device_id: payload.device_id,
                    readings: payload.readings,
                })
            }
            "log_event" => {
                let payload: LogEventPayload = serde_json::from_value(envelope.payload)?;
                Ok(PushMessage::LogEvent {
                    category: payload.category,
                    entry: payload.entry,
                })
            }
            _ => Ok(PushMessage::Unknown {
                kind: envelope.kind,
            }),
        }
    }

    /// The discriminant this message was classified under.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            PushMessage::Snapshot { .. } => "snapshot",
            PushMessage::Patch(_) => "patch",
            PushMessage::ReadingBatch { .. } => "reading_batch",
            PushMessage::LogEvent { .. } => "log_event",
            PushMessage::Unknown { kind } => kind,
        }
    }
}

/// A partial device update, merged field-by-field.
///
/// Absent fields leave the existing record untouched — a patch never nulls a
/// field. Decoding is per-field tolerant: see [`DevicePatch::from_value`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePatch {
    /// The device this patch targets.
    pub device_id: String,
    /// New display name.
    pub name: Option<String>,
    /// New status, already mapped through the server-string vocabulary.
    pub status: Option<DeviceStatus>,
    /// Temperature sensor capability flag.
    pub has_temperature_sensor: Option<bool>,
    /// Humidity sensor capability flag.
    pub has_humidity_sensor: Option<bool>,
    /// Temperature probe kind.
    pub temperature_kind: Option<TemperatureKind>,
    /// Latest temperature.
    pub temperature: Option<f32>,
    /// Latest humidity.
    pub humidity: Option<f32>,
    /// Lower temperature threshold.
    pub min_temp: Option<f32>,
    /// Upper temperature threshold.
    pub max_temp: Option<f32>,
    /// Lower humidity threshold.
    pub min_hum: Option<f32>,
    /// Upper humidity threshold.
    pub max_hum: Option<f32>,
    /// Battery level.
    pub battery_level: Option<u8>,
    /// Network reporting interval in minutes.
    pub interval_wifi: Option<u32>,
    /// Local logging interval in minutes.
    pub interval_local: Option<u32>,
    /// Last-update timestamp, on the server clock.
    pub last_update: Option<OffsetDateTime>,
}

impl DevicePatch {
    /// Create an empty patch for the given device.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    /// Decode a patch from a JSON object with per-field tolerance.
    ///
    /// `device_id` is required; every other field is optional. A field whose
    /// value has the wrong type is skipped — the rest of the patch still
    /// decodes. JSON `null` counts as absent, not as a wrong type.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::invalid_message("patch payload is not an object"))?;

        let device_id = obj
            .get("device_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_message("patch missing device_id"))?
            .to_string();

        let mut patch = DevicePatch::new(&device_id);
        patch.name = field(obj, "name", &device_id, |v| {
            v.as_str().map(str::to_string)
        });
        patch.status = field(obj, "status", &device_id, |v| {
            v.as_str().map(DeviceStatus::from_server_str)
        });
        patch.has_temperature_sensor = field(obj, "has_temperature_sensor", &device_id, Value::as_bool);
        patch.has_humidity_sensor = field(obj, "has_humidity_sensor", &device_id, Value::as_bool);
        patch.temperature_kind = field(obj, "temperature_type", &device_id, |v| {
            match v.as_str()? {
                "air" => Some(TemperatureKind::Air),
                "liquid" => Some(TemperatureKind::Liquid),
                _ => None,
            }
        });
        patch.temperature = field(obj, "temperature", &device_id, as_f32);
        patch.humidity = field(obj, "humidity", &device_id, as_f32);
        patch.min_temp = field(obj, "min_temp", &device_id, as_f32);
        patch.max_temp = field(obj, "max_temp", &device_id, as_f32);
        patch.min_hum = field(obj, "min_hum", &device_id, as_f32);
        patch.max_hum = field(obj, "max_hum", &device_id, as_f32);
        patch.battery_level = field(obj, "battery_level", &device_id, |v| {
            v.as_u64().and_then(|n| u8::try_from(n).ok())
        });
        patch.interval_wifi = field(obj, "interval_wifi", &device_id, as_u32);
        patch.interval_local = field(obj, "interval_local", &device_id, as_u32);
        patch.last_update = field(obj, "last_update", &device_id, |v| {
            OffsetDateTime::parse(v.as_str()?, &Rfc3339).ok()
        });

        Ok(patch)
    }

    /// Merge this patch into an existing record.
    ///
    /// Only fields present in the patch are written; everything else keeps
    /// its current value.
    pub fn apply_to(&self, record: &mut DeviceRecord) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(flag) = self.has_temperature_sensor {
            record.has_temperature_sensor = flag;
        }
        if let Some(flag) = self.has_humidity_sensor {
            record.has_humidity_sensor = flag;
        }
        if let Some(kind) = self.temperature_kind {
            record.temperature_kind = kind;
        }
        if let Some(t) = self.temperature {
            record.temperature = Some(t);
        }
        if let Some(h) = self.humidity {
            record.humidity = Some(h);
        }
        if let Some(v) = self.min_temp {
            record.min_temp = Some(v);
        }
        if let Some(v) = self.max_temp {
            record.max_temp = Some(v);
        }
        if let Some(v) = self.min_hum {
            record.min_hum = Some(v);
        }
        if let Some(v) = self.max_hum {
            record.max_hum = Some(v);
        }
        if let Some(b) = self.battery_level {
            record.battery_level = b;
        }
        if let Some(i) = self.interval_wifi {
            record.interval_wifi = i;
        }
        if let Some(i) = self.interval_local {
            record.interval_local = i;
        }
        if let Some(ts) = self.last_update {
            record.last_update = ts;
        }
    }

    /// Build a fresh record for a device the engine has never seen, using
    /// this patch over placeholder defaults.
    #[must_use]
    pub fn into_record(&self, fallback_time: OffsetDateTime) -> DeviceRecord {
        let mut record =
            DeviceRecord::placeholder(&self.device_id, self.last_update.unwrap_or(fallback_time));
        self.apply_to(&mut record);
        record
    }
}

/// Extract one patch field, skipping it on a type mismatch.
fn field<T>(
    obj: &serde_json::Map<String, Value>,
    key: &str,
    device_id: &str,
    convert: impl FnOnce(&Value) -> Option<T>,
) -> Option<T> {
    let value = obj.get(key)?;
    if value.is_null() {
        return None;
    }
    let converted = convert(value);
    if converted.is_none() {
        debug!(
            device_id,
            field = key,
            "skipping patch field with invalid value"
        );
    }
    converted
}

fn as_f32(value: &Value) -> Option<f32> {
    value.as_f64().map(|f| f as f32)
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

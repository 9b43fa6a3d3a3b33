//! Core types for fleet telemetry synchronization.

use core::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Display status of a device.
///
/// The server pushes a status with every update, but `status` is never taken
/// at face value: the staleness evaluator re-validates it against
/// `now - last_update` on every tick. `Error` is sticky — staleness logic
/// never clears it; only an explicit incoming update can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Device is reporting within its expected window.
    Active,
    /// Device has not reported within its window plus the grace period.
    Offline,
    /// Device reported a hardware or firmware fault.
    Error,
}

impl DeviceStatus {
    /// Map a raw server status string onto the display status.
    ///
    /// The upstream firmware reports a wider vocabulary than the dashboard
    /// displays; every fault variant collapses to [`DeviceStatus::Error`],
    /// and unknown strings are treated as errors rather than trusted.
    ///
    /// # Examples
    ///
    /// ```
    /// use fleetsync_types::DeviceStatus;
    ///
    /// assert_eq!(DeviceStatus::from_server_str("working"), DeviceStatus::Active);
    /// assert_eq!(DeviceStatus::from_server_str("offline"), DeviceStatus::Offline);
    /// assert_eq!(DeviceStatus::from_server_str("sd_card_error"), DeviceStatus::Error);
    /// assert_eq!(DeviceStatus::from_server_str("bogus"), DeviceStatus::Error);
    /// ```
    #[must_use]
    pub fn from_server_str(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "working" | "active" => DeviceStatus::Active,
            "offline" => DeviceStatus::Offline,
            "error" | "sd_card_error" | "rtc_error" | "temp_sensor_error" | "hum_sensor_error" => {
                DeviceStatus::Error
            }
            _ => DeviceStatus::Error,
        }
    }

    /// Whether this status is the sticky error state.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, DeviceStatus::Error)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Active => write!(f, "active"),
            DeviceStatus::Offline => write!(f, "offline"),
            DeviceStatus::Error => write!(f, "error"),
        }
    }
}

// The server's wire vocabulary is wider than the three display states
// (snapshots and the home payload carry the same raw strings patches do), so
// deserialization routes through `from_server_str`. Serialization stays
// canonical via the derive above.
impl<'de> Deserialize<'de> for DeviceStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(DeviceStatus::from_server_str(&raw))
    }
}

/// Kind of temperature probe fitted to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureKind {
    /// Ambient air probe.
    Air,
    /// Immersion probe.
    Liquid,
}

impl Default for TemperatureKind {
    fn default() -> Self {
        TemperatureKind::Air
    }
}

/// Fixed grace period added to a device's reporting interval before it is
/// considered stale (10 minutes).
pub const STALENESS_GRACE: Duration = Duration::from_secs(600);

/// A single monitored device as the engine knows it.
///
/// Field names follow the server wire format. `last_update` is on the
/// server's clock, so it must only ever be compared against the corrected
/// logical time, never the local wall clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Unique device identifier.
    pub device_id: String,
    /// Human-readable display name.
    pub name: String,
    /// Current display status.
    pub status: DeviceStatus,
    /// Whether the device carries a temperature sensor.
    #[serde(default)]
    pub has_temperature_sensor: bool,
    /// Whether the device carries a humidity sensor.
    #[serde(default)]
    pub has_humidity_sensor: bool,
    /// Kind of temperature probe.
    #[serde(default, rename = "temperature_type")]
    pub temperature_kind: TemperatureKind,
    /// Latest temperature reading, if the sensor is fitted.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Latest relative humidity reading, if the sensor is fitted.
    #[serde(default)]
    pub humidity: Option<f32>,
    /// Lower temperature threshold.
    #[serde(default)]
    pub min_temp: Option<f32>,
    /// Upper temperature threshold.
    #[serde(default)]
    pub max_temp: Option<f32>,
    /// Lower humidity threshold.
    #[serde(default)]
    pub min_hum: Option<f32>,
    /// Upper humidity threshold.
    #[serde(default)]
    pub max_hum: Option<f32>,
    /// Battery level, 0-100.
    #[serde(default)]
    pub battery_level: u8,
    /// Network reporting interval in minutes (cadence of uploads to the
    /// server). Drives the staleness threshold.
    #[serde(default = "default_interval")]
    pub interval_wifi: u32,
    /// Local logging interval in minutes (cadence of on-device records).
    #[serde(default = "default_interval")]
    pub interval_local: u32,
    /// Timestamp of the last update, on the server clock.
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
}

fn default_interval() -> u32 {
    1
}

impl DeviceRecord {
    /// Create a minimal record for the given identifier.
    ///
    /// Used when a patch arrives for a device the engine has never seen;
    /// remaining fields are filled from the patch by the caller.
    #[must_use]
    pub fn placeholder(device_id: impl Into<String>, last_update: OffsetDateTime) -> Self {
        let device_id = device_id.into();
        Self {
            name: device_id.clone(),
            device_id,
            status: DeviceStatus::Offline,
            has_temperature_sensor: false,
            has_humidity_sensor: false,
            temperature_kind: TemperatureKind::Air,
            temperature: None,
            humidity: None,
            min_temp: None,
            max_temp: None,
            min_hum: None,
            max_hum: None,
            battery_level: 0,
            interval_wifi: default_interval(),
            interval_local: default_interval(),
            last_update,
        }
    }

    /// The age beyond which this device is considered offline:
    /// its network reporting interval plus the fixed grace period.
    #[must_use]
    pub fn offline_threshold(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_wifi) * 60) + STALENESS_GRACE
    }

    /// Whether the current temperature reading sits inside the configured
    /// thresholds. Returns `true` when the reading or a bound is absent.
    #[must_use]
    pub fn temperature_in_range(&self) -> bool {
        in_range(self.temperature, self.min_temp, self.max_temp)
    }

    /// Whether the current humidity reading sits inside the configured
    /// thresholds. Returns `true` when the reading or a bound is absent.
    #[must_use]
    pub fn humidity_in_range(&self) -> bool {
        in_range(self.humidity, self.min_hum, self.max_hum)
    }
}

fn in_range(value: Option<f32>, min: Option<f32>, max: Option<f32>) -> bool {
    let Some(v) = value else { return true };
    if let Some(min) = min {
        if v < min {
            return false;
        }
    }
    if let Some(max) = max {
        if v > max {
            return false;
        }
    }
    true
}

/// A single telemetry reading within a device's rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Temperature, if the sensor is fitted.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Relative humidity, if the sensor is fitted.
    #[serde(default)]
    pub humidity: Option<f32>,
    /// Capture time, on the server clock.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Category of a log feed.
///
/// Log identifiers are unique *within* a category; the two categories keep
/// independent entry lists and unread counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    /// Logs produced by devices (sensor faults, threshold breaches).
    Device,
    /// Logs produced by operator actions.
    Admin,
}

impl LogCategory {
    /// All categories, in display order.
    pub const ALL: [LogCategory; 2] = [LogCategory::Device, LogCategory::Admin];
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogCategory::Device => write!(f, "device"),
            LogCategory::Admin => write!(f, "admin"),
        }
    }
}

/// One log or alert entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Identifier, unique within the entry's category.
    pub id: i64,
    /// Free-form message.
    pub message: String,
    /// Originating device or actor, if known.
    #[serde(default)]
    pub source: Option<String>,
    /// Event time, on the server clock.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Unread counters per category, in the shape the dashboard badge consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCounts {
    /// Sum of the per-category counters.
    pub total: u64,
    /// Unread device log entries.
    pub device_logs: u64,
    /// Unread admin log entries.
    pub admin_logs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record() -> DeviceRecord {
        DeviceRecord {
            device_id: "dl-001".to_string(),
            name: "Cold Room A".to_string(),
            status: DeviceStatus::Active,
            has_temperature_sensor: true,
            has_humidity_sensor: true,
            temperature_kind: TemperatureKind::Air,
            temperature: Some(4.2),
            humidity: Some(61.0),
            min_temp: Some(2.0),
            max_temp: Some(8.0),
            min_hum: Some(30.0),
            max_hum: Some(70.0),
            battery_level: 92,
            interval_wifi: 5,
            interval_local: 1,
            last_update: datetime!(2026-01-10 12:00:00 UTC),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(DeviceStatus::from_server_str("working"), DeviceStatus::Active);
        assert_eq!(DeviceStatus::from_server_str("ACTIVE"), DeviceStatus::Active);
        assert_eq!(DeviceStatus::from_server_str("offline"), DeviceStatus::Offline);
        for raw in [
            "error",
            "sd_card_error",
            "rtc_error",
            "temp_sensor_error",
            "hum_sensor_error",
        ] {
            assert_eq!(DeviceStatus::from_server_str(raw), DeviceStatus::Error);
        }
        // Anything the engine does not recognize counts as an error.
        assert_eq!(DeviceStatus::from_server_str("lunar_phase"), DeviceStatus::Error);
    }

    #[test]
    fn test_status_serde_roundtrip() {
        let json = serde_json::to_string(&DeviceStatus::Offline).unwrap();
        assert_eq!(json, "\"offline\"");
        let back: DeviceStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DeviceStatus::Offline);
    }

    #[test]
    fn test_status_deserializes_raw_vocabulary() {
        // Deserialization accepts the full server vocabulary, not just the
        // three canonical names.
        let status: DeviceStatus = serde_json::from_str("\"working\"").unwrap();
        assert_eq!(status, DeviceStatus::Active);
        let status: DeviceStatus = serde_json::from_str("\"sd_card_error\"").unwrap();
        assert_eq!(status, DeviceStatus::Error);
        let status: DeviceStatus = serde_json::from_str("\"lunar_phase\"").unwrap();
        assert_eq!(status, DeviceStatus::Error);
    }

    #[test]
    fn test_offline_threshold() {
        let mut r = record();
        r.interval_wifi = 1;
        assert_eq!(r.offline_threshold(), Duration::from_secs(60 + 600));
        r.interval_wifi = 15;
        assert_eq!(r.offline_threshold(), Duration::from_secs(15 * 60 + 600));
    }

    #[test]
    fn test_threshold_checks() {
        let mut r = record();
        assert!(r.temperature_in_range());
        assert!(r.humidity_in_range());

        r.temperature = Some(9.5);
        assert!(!r.temperature_in_range());

        r.humidity = Some(20.0);
        assert!(!r.humidity_in_range());

        // Missing readings and missing bounds never flag as out of range.
        r.temperature = None;
        assert!(r.temperature_in_range());
        r.humidity = Some(80.0);
        r.min_hum = None;
        // Still above max_hum even with the lower bound gone.
        assert!(!r.humidity_in_range());
        r.max_hum = None;
        assert!(r.humidity_in_range());
    }

    #[test]
    fn test_record_deserializes_wire_format() {
        let json = r#"{
            "device_id": "dl-007",
            "name": "Freezer 2",
            "status": "active",
            "has_temperature_sensor": true,
            "temperature_type": "liquid",
            "temperature": -18.4,
            "min_temp": -22.0,
            "max_temp": -16.0,
            "battery_level": 77,
            "interval_wifi": 10,
            "interval_local": 2,
            "last_update": "2026-01-10T12:00:00Z"
        }"#;
        let r: DeviceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.device_id, "dl-007");
        assert_eq!(r.temperature_kind, TemperatureKind::Liquid);
        assert_eq!(r.humidity, None);
        assert!(!r.has_humidity_sensor);
        assert_eq!(r.interval_wifi, 10);
    }

    #[test]
    fn test_placeholder_record() {
        let now = datetime!(2026-01-10 12:00:00 UTC);
        let r = DeviceRecord::placeholder("dl-new", now);
        assert_eq!(r.device_id, "dl-new");
        assert_eq!(r.name, "dl-new");
        assert_eq!(r.status, DeviceStatus::Offline);
        assert_eq!(r.last_update, now);
    }

    #[test]
    fn test_log_entry_roundtrip() {
        let entry = LogEntry {
            id: 42,
            message: "temperature above threshold".to_string(),
            source: Some("dl-001".to_string()),
            timestamp: datetime!(2026-01-10 12:00:00 UTC),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}

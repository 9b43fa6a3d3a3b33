//! Shared data types for the fleetsync state synchronization engine.
//!
//! This crate holds the plain data model: device records, telemetry
//! readings, log entries, and the display-status enum, together with the
//! raw-server-string conversions the engine needs. It carries no runtime,
//! no I/O, and no engine logic so that any consumer (the engine itself, a
//! presentation layer, tooling) can depend on it cheaply.

pub mod types;

pub use types::{
    DeviceRecord, DeviceStatus, LogCategory, LogEntry, Reading, TemperatureKind, UnreadCounts,
    STALENESS_GRACE,
};

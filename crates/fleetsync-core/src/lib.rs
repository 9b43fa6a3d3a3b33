//! Real-time state synchronization engine for fleet monitoring dashboards.
//!
//! This crate keeps a local replica of a device fleet's state continuously
//! converged with a remote server over reconnecting push channels, while
//! correcting for the skew between the server's operator-adjusted clock and
//! the local one.
//!
//! # What it does
//!
//! - **Entity store**: an authoritative local copy of every device record,
//!   updated by full snapshots and field-level patches that never null
//!   untouched fields, plus a bounded rolling window of readings per device
//! - **Staleness evaluation**: devices that stop reporting flip to offline
//!   within seconds of crossing their per-device threshold, judged against
//!   the corrected clock, with the error state held sticky
//! - **Log deduplication**: at-least-once push delivery of log events with
//!   id-keyed dedup, bounded per-category lists, and unread counters
//! - **Clock synchronization**: a monotonic logical clock re-anchored
//!   hourly against the server, with bounded retries and stale-but-available
//!   fallback
//! - **Connection supervision**: one task per push channel, fixed-delay
//!   reconnect on abnormal closes, orderly teardown on shutdown
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetsync_core::{ChannelSpec, EngineConfig, SyncEngine};
//! use fleetsync_core::mock::{MockTimeSource, MockTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = Arc::new(MockTransport::new());
//!     let engine = SyncEngine::new(EngineConfig::default(), transport);
//!
//!     let time_source = Arc::new(MockTimeSource::failing());
//!     let mut seconds = engine.start_background_tasks(time_source).await;
//!
//!     let spec = ChannelSpec::new("device-feed")
//!         .url("ws://fleet.example.com/ws/devices")
//!         .token("api-token");
//!     engine.open_device_feed(spec).await;
//!
//!     let _ = seconds.changed().await;
//!     println!("{} devices", engine.store().len().await);
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! With the `ws-transport` feature the same engine runs over a real
//! WebSocket ([`transport::WsTransport`]); with `service-client` the
//! initial seed and the clock refresh come from the REST API
//! ([`service_client::SyncClient`]).

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logs;
pub mod messages;
pub mod mock;
pub mod staleness;
pub mod store;
pub mod supervisor;
pub mod transport;

#[cfg(feature = "service-client")]
pub mod service_client;

// Re-export the shared data types for convenience.
pub use fleetsync_types as types;

// Core exports
pub use clock::{ClockSynchronizer, TimeSource};
pub use config::{ClockConfig, EngineConfig, ReconnectConfig, StalenessConfig, StoreConfig};
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use events::{EngineEvent, EventDispatcher, EventReceiver};
pub use logs::LogDeduplicator;
pub use messages::{DevicePatch, PushMessage};
pub use store::{EntityStore, StatusCounts};
pub use supervisor::{ChannelHandle, ChannelSpec, ConnectionSupervisor, MessageRouter, ReconnectPolicy};
pub use transport::{CloseCode, SocketConn, SocketEvent, Transport};

//! Engine assembly.
//!
//! [`SyncEngine`] wires the pieces together: one store, one log
//! deduplicator, one clock, one event dispatcher, one supervisor over a
//! shared transport. Everything is an explicit owned instance; there are no
//! ambient singletons, so two engines in one process (or one per test)
//! never share state.
//!
//! The expected startup sequence mirrors the dashboard's:
//!
//! 1. seed the store, logs and unread counters from REST,
//! 2. `start_background_tasks` (staleness ticker, clock refresher, second
//!    tick),
//! 3. open the push feeds as their urls and the auth token become known.
//!
//! `shutdown` unwinds all of it and is safe to call twice.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fleetsync_types::{DeviceRecord, LogCategory, LogEntry, UnreadCounts};

use crate::clock::{ClockSynchronizer, TimeSource};
use crate::config::EngineConfig;
use crate::events::{EventDispatcher, EventReceiver};
use crate::logs::LogDeduplicator;
use crate::messages::PushMessage;
use crate::staleness::spawn_staleness_task;
use crate::store::EntityStore;
use crate::supervisor::{ChannelHandle, ChannelSpec, ConnectionSupervisor, MessageRouter, ReconnectPolicy};
use crate::transport::Transport;

/// The assembled synchronization engine.
pub struct SyncEngine {
    config: EngineConfig,
    events: EventDispatcher,
    store: Arc<EntityStore>,
    logs: Arc<LogDeduplicator>,
    clock: Arc<ClockSynchronizer>,
    supervisor: ConnectionSupervisor,
    cancel: CancellationToken,
    channels: Mutex<Vec<ChannelHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Assemble an engine over the given transport.
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        let events = EventDispatcher::default();
        let cancel = CancellationToken::new();
        let store = Arc::new(EntityStore::new(&config.store, events.clone()));
        let logs = Arc::new(LogDeduplicator::new(&config.store, events.clone()));
        let clock = Arc::new(ClockSynchronizer::new(config.clock.clone(), events.clone()));
        let supervisor = ConnectionSupervisor::new(
            transport,
            ReconnectPolicy::new(config.reconnect.clone()),
            events.clone(),
            cancel.child_token(),
        );
        Self {
            config,
            events,
            store,
            logs,
            clock,
            supervisor,
            cancel,
            channels: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The device store.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// The log collections.
    pub fn logs(&self) -> &Arc<LogDeduplicator> {
        &self.logs
    }

    /// The corrected clock.
    pub fn clock(&self) -> &Arc<ClockSynchronizer> {
        &self.clock
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Seed the device set from a REST fetch.
    pub async fn seed_devices(&self, devices: Vec<DeviceRecord>) {
        self.store.apply_snapshot(devices).await;
    }

    /// Seed one log category's history from a REST fetch.
    pub async fn seed_logs(&self, category: LogCategory, entries: Vec<LogEntry>) {
        self.logs.seed_from_history(category, entries).await;
    }

    /// Seed the unread counters from a REST fetch.
    pub async fn seed_unread(&self, counts: UnreadCounts) {
        self.logs.seed_unread(LogCategory::Device, counts.device_logs).await;
        self.logs.seed_unread(LogCategory::Admin, counts.admin_logs).await;
    }

    /// Start the timer-driven tasks: the staleness ticker, the periodic
    /// clock refresh against `time_source`, and the once-per-second clock
    /// publisher whose receiver is returned.
    pub async fn start_background_tasks(
        &self,
        time_source: Arc<dyn TimeSource>,
    ) -> watch::Receiver<OffsetDateTime> {
        let mut tasks = self.tasks.lock().await;
        tasks.push(spawn_staleness_task(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.staleness.clone(),
            self.cancel.child_token(),
        ));
        tasks.push(
            self.clock
                .spawn_refresh_task(time_source, self.cancel.child_token()),
        );
        self.clock.spawn_second_tick(self.cancel.child_token())
    }

    /// Open the device feed: snapshots, patches and reading batches into
    /// the store. Returns `false` when the spec is not yet openable.
    pub async fn open_device_feed(&self, spec: ChannelSpec) -> bool {
        let router = self.device_router();
        self.open_channel(spec, router).await
    }

    /// Open the home feed. It carries the same message kinds as the device
    /// feed (the server fans the overview page out separately) and routes
    /// them identically.
    pub async fn open_home_feed(&self, spec: ChannelSpec) -> bool {
        let router = self.device_router();
        self.open_channel(spec, router).await
    }

    /// Open the log feed: log events into the deduplicator.
    pub async fn open_log_feed(&self, spec: ChannelSpec) -> bool {
        let logs = Arc::clone(&self.logs);
        let router = MessageRouter::new().route(
            |m| matches!(m, PushMessage::LogEvent { .. }),
            move |message| {
                let logs = Arc::clone(&logs);
                async move {
                    if let PushMessage::LogEvent { category, entry } = message {
                        logs.ingest_push(category, entry).await;
                    }
                }
            },
        );
        self.open_channel(spec, router).await
    }

    /// Tear the engine down: cancel every timer, close every channel with
    /// the normal code, and wait for all of their tasks. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let channels = std::mem::take(&mut *self.channels.lock().await);
        for channel in &channels {
            channel.close().await;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
        info!("engine shut down");
    }

    async fn open_channel(&self, spec: ChannelSpec, router: MessageRouter) -> bool {
        match self.supervisor.open(spec, router) {
            Some(handle) => {
                self.channels.lock().await.push(handle);
                true
            }
            None => false,
        }
    }

    fn device_router(&self) -> MessageRouter {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        MessageRouter::new().route(
            |m| {
                matches!(
                    m,
                    PushMessage::Snapshot { .. }
                        | PushMessage::Patch(_)
                        | PushMessage::ReadingBatch { .. }
                )
            },
            move |message| {
                let store = Arc::clone(&store);
                let clock = Arc::clone(&clock);
                async move {
                    match message {
                        PushMessage::Snapshot { devices } => store.apply_snapshot(devices).await,
                        PushMessage::Patch(patch) => {
                            store.apply_patch(patch, clock.logical_now()).await;
                        }
                        PushMessage::ReadingBatch { device_id, readings } => {
                            store.apply_reading_batch(&device_id, readings).await;
                        }
                        _ => {}
                    }
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn engine(transport: &MockTransport) -> SyncEngine {
        SyncEngine::new(EngineConfig::default(), Arc::new(transport.clone()))
    }

    #[tokio::test]
    async fn test_feed_without_prerequisites_is_not_opened() {
        let transport = MockTransport::new();
        let engine = engine(&transport);
        assert!(!engine.open_device_feed(ChannelSpec::new("device-feed")).await);
        assert!(
            !engine
                .open_log_feed(ChannelSpec::new("log-feed").url("ws://host/logs"))
                .await
        );
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_seeding_populates_stores() {
        let transport = MockTransport::new();
        let engine = engine(&transport);

        let now = OffsetDateTime::now_utc();
        engine
            .seed_devices(vec![DeviceRecord::placeholder("a", now)])
            .await;
        engine
            .seed_unread(UnreadCounts {
                total: 3,
                device_logs: 2,
                admin_logs: 1,
            })
            .await;

        assert_eq!(engine.store().len().await, 1);
        let counts = engine.logs().unread_counts().await;
        assert_eq!(counts.device_logs, 2);
        assert_eq!(counts.admin_logs, 1);
        assert_eq!(counts.total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let transport = MockTransport::new();
        let engine = engine(&transport);
        let spec = ChannelSpec::new("device-feed")
            .url("ws://host/devices")
            .token("secret");
        assert!(engine.open_device_feed(spec).await);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        engine.shutdown().await;
        engine.shutdown().await;
        assert_eq!(transport.connect_count(), 1);
    }
}

//! Drift-corrected logical clock.
//!
//! Device timestamps ride the server's clock, which the deployment's
//! operators adjust by hand (the "master clock"), so the local wall clock
//! cannot be compared against them directly. [`ClockSynchronizer`] anchors
//! a fetched server time against a monotonic instant and derives
//! `logical_now = anchor + elapsed_since_anchor`. Between refreshes the
//! value is monotonically non-decreasing; a refresh re-anchors atomically,
//! which may step the value but never smooths it.
//!
//! Refreshes run on an hourly cadence. A failed fetch is retried up to five
//! times at five-second intervals, then the synchronizer gives up until the
//! next window and keeps serving the last known anchor (stale but
//! available). Local ticking never blocks on a refresh.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClockConfig;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventDispatcher};

/// Collaborator seam for the REST "current time" fetch.
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Fetch the server's current time.
    async fn fetch_server_time(&self) -> Result<OffsetDateTime>;
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    /// Server time at the moment of the anchor.
    server_time: OffsetDateTime,
    /// Monotonic instant taken at the same moment.
    instant: Instant,
    /// Server minus local wall clock at the anchor, for observability.
    offset_millis: i64,
}

/// Maintains a corrected "logical now" from a monotonic local tick plus a
/// periodically refreshed server offset.
pub struct ClockSynchronizer {
    anchor: RwLock<Anchor>,
    config: ClockConfig,
    events: EventDispatcher,
}

impl ClockSynchronizer {
    /// Create a synchronizer anchored to the local wall clock with zero
    /// offset. Until a refresh succeeds, `logical_now` is simply local
    /// time carried forward monotonically.
    pub fn new(config: ClockConfig, events: EventDispatcher) -> Self {
        Self {
            anchor: RwLock::new(Anchor {
                server_time: OffsetDateTime::now_utc(),
                instant: Instant::now(),
                offset_millis: 0,
            }),
            config,
            events,
        }
    }

    /// The corrected current time: anchor plus monotonic elapsed.
    ///
    /// Non-decreasing between refreshes; a refresh may step the value.
    pub fn logical_now(&self) -> OffsetDateTime {
        let anchor = *self.read_anchor();
        anchor.server_time + anchor.instant.elapsed()
    }

    /// The current correction in milliseconds (server minus local at the
    /// last successful anchor; zero before the first).
    pub fn offset_millis(&self) -> i64 {
        self.read_anchor().offset_millis
    }

    /// Re-anchor directly from a server time already in hand (e.g. the
    /// timestamp riding the initial REST snapshot).
    pub fn set_server_time(&self, server_time: OffsetDateTime) {
        let local = OffsetDateTime::now_utc();
        let offset_millis = millis(server_time - local);
        *self.write_anchor() = Anchor {
            server_time,
            instant: Instant::now(),
            offset_millis,
        };
        self.events.send(EngineEvent::ClockRefreshed { offset_millis });
    }

    /// Perform one time fetch and re-anchor on success.
    pub async fn refresh(&self, source: &dyn TimeSource) -> Result<i64> {
        let local_before = OffsetDateTime::now_utc();
        let server_time = source.fetch_server_time().await?;
        let offset_millis = millis(server_time - local_before);
        *self.write_anchor() = Anchor {
            server_time,
            instant: Instant::now(),
            offset_millis,
        };
        debug!(offset_millis, "clock re-anchored");
        self.events.send(EngineEvent::ClockRefreshed { offset_millis });
        Ok(offset_millis)
    }

    /// Refresh with the configured bounded retries.
    ///
    /// On repeated failure the previous anchor stays in effect and the
    /// error of the final attempt is returned; the caller (normally the
    /// refresh task) waits for the next scheduled window.
    pub async fn refresh_with_retries(&self, source: &dyn TimeSource) -> Result<i64> {
        let attempts = self.config.retry_attempts.max(1);
        let mut last_err = Error::TimeFetch("no attempts configured".to_string());
        for attempt in 1..=attempts {
            match self.refresh(source).await {
                Ok(offset) => return Ok(offset),
                Err(e) => {
                    warn!(attempt, attempts, "time fetch failed: {}", e);
                    last_err = e;
                    if attempt < attempts {
                        sleep(self.config.retry_delay()).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    /// Spawn the periodic refresh task: one refresh (with retries)
    /// immediately, then one per scheduled window until cancelled.
    pub fn spawn_refresh_task(
        self: &std::sync::Arc<Self>,
        source: std::sync::Arc<dyn TimeSource>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let clock = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("clock refresh task cancelled");
                        break;
                    }
                    result = clock.refresh_with_retries(source.as_ref()) => {
                        if let Err(e) = result {
                            warn!("giving up on clock refresh until next window: {}", e);
                        }
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("clock refresh task cancelled");
                        break;
                    }
                    _ = sleep(clock.config.refresh_interval()) => {}
                }
            }
        })
    }

    /// Spawn a once-per-second publisher of `logical_now`.
    ///
    /// The returned receiver always holds the latest published value; the
    /// task stops when the token is cancelled.
    pub fn spawn_second_tick(
        self: &std::sync::Arc<Self>,
        cancel: CancellationToken,
    ) -> watch::Receiver<OffsetDateTime> {
        let (tx, rx) = watch::channel(self.logical_now());
        let clock = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(clock.logical_now()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        rx
    }

    fn read_anchor(&self) -> std::sync::RwLockReadGuard<'_, Anchor> {
        self.anchor.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_anchor(&self) -> std::sync::RwLockWriteGuard<'_, Anchor> {
        self.anchor.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn millis(d: time::Duration) -> i64 {
    i64::try_from(d.whole_milliseconds()).unwrap_or(i64::MAX)
}

//! Push-channel supervision.
//!
//! A channel is one logical push feed: a named socket, a routing table for
//! the messages arriving on it, and a reconnect loop. The supervisor opens
//! channels over a shared [`Transport`], runs each one on its own task
//! (messages within a channel are handled strictly in arrival order;
//! channels are independent of each other) and owns the lifecycle:
//!
//! - a connect failure or an abnormal socket close schedules exactly one
//!   reconnect after the policy delay;
//! - an orderly close from the peer ends the channel, no reconnect;
//! - [`ChannelHandle::close`] cancels any pending reconnect sleep, closes
//!   the socket with the normal code and is idempotent.
//!
//! A message that fails to parse is logged and dropped; the channel stays
//! up. The engine never tears down a feed over one bad frame.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::events::{EngineEvent, EventDispatcher};
use crate::messages::PushMessage;
use crate::transport::{CloseCode, SocketConn, SocketEvent, Transport};

/// What a channel needs before it can open.
///
/// `url` and `token` are optional at the type level because the engine
/// learns them at runtime (service discovery, login); a spec with either
/// missing is not an error, just not openable yet.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    /// Logical channel name, used in logs and events.
    pub name: String,
    /// Socket url, once known.
    pub url: Option<String>,
    /// Auth token, once known.
    pub token: Option<String>,
}

impl ChannelSpec {
    /// Create a spec with no url or token yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            token: None,
        }
    }

    /// Set the socket url.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the auth token.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Delay schedule for reconnect attempts.
///
/// The default is a constant delay between attempts; exponential growth
/// with a cap is available through configuration.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    /// Create a policy from configuration.
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Delay before the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.config.exponential {
            return Duration::from_secs(self.config.delay_secs);
        }
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1).min(32));
        let secs = self
            .config
            .delay_secs
            .saturating_mul(factor)
            .min(self.config.max_delay_secs);
        Duration::from_secs(secs)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

type RoutePredicate = Box<dyn Fn(&PushMessage) -> bool + Send + Sync>;
type RouteHandler = Arc<dyn Fn(PushMessage) -> BoxFuture<'static, ()> + Send + Sync>;

struct Route {
    predicate: RoutePredicate,
    handler: RouteHandler,
}

/// Ordered routing table for one channel's inbound messages.
///
/// The first route whose predicate matches wins; a message matching no
/// route is dropped with a debug log.
#[derive(Default)]
pub struct MessageRouter {
    routes: Vec<Route>,
}

impl MessageRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route.
    #[must_use]
    pub fn route<P, H, F>(mut self, predicate: P, handler: H) -> Self
    where
        P: Fn(&PushMessage) -> bool + Send + Sync + 'static,
        H: Fn(PushMessage) -> F + Send + Sync + 'static,
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.routes.push(Route {
            predicate: Box::new(predicate),
            handler: Arc::new(move |message| Box::pin(handler(message))),
        });
        self
    }

    /// Dispatch one message. Returns whether any route accepted it.
    pub async fn dispatch(&self, message: PushMessage) -> bool {
        for route in &self.routes {
            if (route.predicate)(&message) {
                (route.handler)(message).await;
                return true;
            }
        }
        debug!(kind = message.kind(), "dropping unrouted message");
        false
    }
}

/// A running channel. Dropping the handle does not close the channel;
/// call [`ChannelHandle::close`].
pub struct ChannelHandle {
    name: String,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelHandle {
    /// The channel's logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the channel has been closed (locally or by an orderly peer
    /// close).
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close the channel: cancel any pending reconnect, send the normal
    /// close code if a socket is open, and wait for the channel task to
    /// finish. Safe to call more than once.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Opens and supervises push channels over a shared transport.
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    events: EventDispatcher,
    cancel: CancellationToken,
}

impl ConnectionSupervisor {
    /// Create a supervisor.
    ///
    /// `cancel` is the parent token; every channel gets a child, so
    /// cancelling it closes all channels at once.
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        events: EventDispatcher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            policy,
            events,
            cancel,
        }
    }

    /// Open a channel, spawning its task.
    ///
    /// Returns `None` when the spec lacks a url or token; the condition is
    /// logged but deliberately silent toward the feed (no events), and the
    /// caller retries once the prerequisite resolves.
    pub fn open(&self, spec: ChannelSpec, router: MessageRouter) -> Option<ChannelHandle> {
        let Some(url) = spec.url.filter(|u| !u.is_empty()) else {
            debug!(channel = %spec.name, "channel not opened: url not yet available");
            return None;
        };
        let Some(token) = spec.token.filter(|t| !t.is_empty()) else {
            debug!(channel = %spec.name, "channel not opened: auth token not yet available");
            return None;
        };

        let cancel = self.cancel.child_token();
        let task = tokio::spawn(run_channel(
            Arc::clone(&self.transport),
            self.policy.clone(),
            self.events.clone(),
            spec.name.clone(),
            url,
            token,
            router,
            cancel.clone(),
        ));
        Some(ChannelHandle {
            name: spec.name,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_channel(
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    events: EventDispatcher,
    name: String,
    url: String,
    token: String,
    router: MessageRouter,
    cancel: CancellationToken,
) {
    // Consecutive failures since the last established connection.
    let mut attempt: u32 = 0;

    loop {
        let connect = tokio::select! {
            _ = cancel.cancelled() => break,
            result = transport.connect(&url, &token) => result,
        };
        let mut conn = match connect {
            Ok(conn) => {
                attempt = 0;
                info!(channel = %name, "channel connected");
                events.send(EngineEvent::ChannelConnected {
                    channel: name.clone(),
                });
                conn
            }
            Err(e) => {
                warn!(channel = %name, "connect failed: {}", e);
                events.send(EngineEvent::ChannelDown {
                    channel: name.clone(),
                    close_code: None,
                });
                if wait_for_reconnect(&policy, &events, &name, &mut attempt, &cancel).await {
                    continue;
                }
                break;
            }
        };

        match read_until_closed(conn.as_mut(), &router, &name, &cancel).await {
            ReadOutcome::Cancelled => {
                let _ = conn.close().await;
                break;
            }
            ReadOutcome::Closed(CloseCode::Normal) => {
                info!(channel = %name, "peer closed channel");
                break;
            }
            ReadOutcome::Closed(code) => {
                events.send(EngineEvent::ChannelDown {
                    channel: name.clone(),
                    close_code: Some(code.code()),
                });
                if wait_for_reconnect(&policy, &events, &name, &mut attempt, &cancel).await {
                    continue;
                }
                break;
            }
            ReadOutcome::Exhausted => {
                // Stream ended with no close frame; treat like an abnormal
                // drop.
                events.send(EngineEvent::ChannelDown {
                    channel: name.clone(),
                    close_code: None,
                });
                if wait_for_reconnect(&policy, &events, &name, &mut attempt, &cancel).await {
                    continue;
                }
                break;
            }
        }
    }
    // A finished task is a closed channel whoever ended it; cancelling here
    // keeps `ChannelHandle::is_closed` truthful after a peer close.
    cancel.cancel();
    debug!(channel = %name, "channel task finished");
}

enum ReadOutcome {
    Cancelled,
    Closed(CloseCode),
    Exhausted,
}

async fn read_until_closed(
    conn: &mut dyn SocketConn,
    router: &MessageRouter,
    name: &str,
    cancel: &CancellationToken,
) -> ReadOutcome {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return ReadOutcome::Cancelled,
            event = conn.next_event() => event,
        };
        match event {
            Some(SocketEvent::Message(text)) => match PushMessage::parse(&text) {
                Ok(PushMessage::Unknown { kind }) => {
                    debug!(channel = %name, kind, "dropping message of unknown kind");
                }
                Ok(message) => {
                    router.dispatch(message).await;
                }
                Err(e) => {
                    warn!(channel = %name, "dropping undecodable message: {}", e);
                }
            },
            Some(SocketEvent::Closed(code)) => return ReadOutcome::Closed(code),
            None => return ReadOutcome::Exhausted,
        }
    }
}

/// Sleep out the reconnect delay. Returns `false` when cancelled first.
async fn wait_for_reconnect(
    policy: &ReconnectPolicy,
    events: &EventDispatcher,
    name: &str,
    attempt: &mut u32,
    cancel: &CancellationToken,
) -> bool {
    *attempt += 1;
    let delay = policy.delay_for_attempt(*attempt);
    info!(channel = %name, attempt = *attempt, ?delay, "reconnect scheduled");
    events.send(EngineEvent::ReconnectScheduled {
        channel: name.to_string(),
        attempt: *attempt,
        delay_ms: delay.as_millis() as u64,
    });
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn supervisor(transport: &MockTransport) -> ConnectionSupervisor {
        ConnectionSupervisor::new(
            Arc::new(transport.clone()),
            ReconnectPolicy::default(),
            EventDispatcher::new(64),
            CancellationToken::new(),
        )
    }

    fn collecting_router() -> (MessageRouter, Arc<Mutex<Vec<PushMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let router = MessageRouter::new().route(
            |_| true,
            move |message| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().await.push(message);
                }
            },
        );
        (router, seen)
    }

    fn spec() -> ChannelSpec {
        ChannelSpec::new("device-feed")
            .url("ws://host/devices")
            .token("secret")
    }

    async fn settle() {
        // Paused clock: a tiny sleep yields and auto-advances so spawned
        // channel tasks make progress.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn test_constant_policy_ignores_attempt() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_policy_doubles_and_caps() {
        let policy = ReconnectPolicy::new(ReconnectConfig {
            delay_secs: 5,
            exponential: true,
            max_delay_secs: 60,
        });
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
        // No overflow at absurd attempt numbers.
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_open_requires_url_and_token() {
        let transport = MockTransport::new();
        let sup = supervisor(&transport);

        assert!(sup
            .open(ChannelSpec::new("feed").token("t"), MessageRouter::new())
            .is_none());
        assert!(sup
            .open(ChannelSpec::new("feed").url("ws://host"), MessageRouter::new())
            .is_none());
        // Empty strings count as missing.
        assert!(sup
            .open(
                ChannelSpec::new("feed").url("ws://host").token(""),
                MessageRouter::new()
            )
            .is_none());
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_route_in_order() {
        let transport = MockTransport::new();
        let sup = supervisor(&transport);
        let (router, seen) = collecting_router();
        let handle = sup.open(spec(), router).unwrap();
        settle().await;

        transport.push_message(r#"{"kind":"reading_batch","payload":{"device_id":"a","readings":[]}}"#);
        transport.push_message(r#"{"kind":"patch","payload":{"device_id":"b"}}"#);
        settle().await;

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[0], PushMessage::ReadingBatch { device_id, .. } if device_id == "a"));
        assert!(matches!(&seen[1], PushMessage::Patch(p) if p.device_id == "b"));
        drop(seen);
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_frame_does_not_kill_channel() {
        let transport = MockTransport::new();
        let sup = supervisor(&transport);
        let (router, seen) = collecting_router();
        let handle = sup.open(spec(), router).unwrap();
        settle().await;

        transport.push_message("this is not json");
        transport.push_message(r#"{"kind":"wibble","payload":{}}"#);
        transport.push_message(r#"{"kind":"patch","payload":{"device_id":"b"}}"#);
        settle().await;

        // Only the valid, known-kind frame reached the router; the channel
        // never reconnected.
        assert_eq!(seen.lock().await.len(), 1);
        assert_eq!(transport.connect_count(), 1);
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_schedules_exactly_one_reconnect() {
        let transport = MockTransport::new();
        let sup = supervisor(&transport);
        let handle = sup.open(spec(), MessageRouter::new()).unwrap();
        settle().await;
        assert_eq!(transport.connect_count(), 1);

        transport.close_current(CloseCode::Abnormal(1006));
        // Not yet: the policy delay is five seconds.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.connect_count(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.connect_count(), 2);

        // Exactly one; a healthy connection schedules nothing further.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connect_count(), 2);
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let transport = MockTransport::new();
        let sup = supervisor(&transport);
        let handle = sup.open(spec(), MessageRouter::new()).unwrap();
        settle().await;

        transport.close_current(CloseCode::Abnormal(1006));
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.close().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connect_count(), 1);
        assert!(handle.is_closed());
        // Idempotent.
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_normal_close_ends_channel_without_reconnect() {
        let transport = MockTransport::new();
        let sup = supervisor(&transport);
        let handle = sup.open(spec(), MessageRouter::new()).unwrap();
        settle().await;

        transport.close_current(CloseCode::Normal);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connect_count(), 1);
        // The handle observes the peer-initiated close.
        assert!(handle.is_closed());
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_retries_after_delay() {
        let transport = MockTransport::new();
        transport.fail_next_connects(2);
        let sup = supervisor(&transport);
        let handle = sup.open(spec(), MessageRouter::new()).unwrap();

        settle().await;
        assert_eq!(transport.connect_count(), 1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(transport.connect_count(), 2);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(transport.connect_count(), 3);

        // Third attempt succeeded; no more connects.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connect_count(), 3);
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_are_independent() {
        let transport_a = MockTransport::new();
        let transport_b = MockTransport::new();
        let events = EventDispatcher::new(64);
        let cancel = CancellationToken::new();
        let sup_a = ConnectionSupervisor::new(
            Arc::new(transport_a.clone()),
            ReconnectPolicy::default(),
            events.clone(),
            cancel.clone(),
        );
        let sup_b = ConnectionSupervisor::new(
            Arc::new(transport_b.clone()),
            ReconnectPolicy::default(),
            events,
            cancel,
        );
        let handle_a = sup_a.open(spec(), MessageRouter::new()).unwrap();
        let handle_b = sup_b
            .open(
                ChannelSpec::new("log-feed").url("ws://host/logs").token("secret"),
                MessageRouter::new(),
            )
            .unwrap();
        settle().await;

        // Channel A dying leaves channel B untouched.
        transport_a.close_current(CloseCode::Abnormal(1011));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(transport_a.connect_count(), 2);
        assert_eq!(transport_b.connect_count(), 1);
        assert!(!handle_b.is_closed());

        handle_a.close().await;
        handle_b.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_emits_events() {
        let transport = MockTransport::new();
        let events = EventDispatcher::new(64);
        let sup = ConnectionSupervisor::new(
            Arc::new(transport.clone()),
            ReconnectPolicy::default(),
            events.clone(),
            CancellationToken::new(),
        );
        let mut rx = events.subscribe();
        let handle = sup.open(spec(), MessageRouter::new()).unwrap();
        settle().await;

        transport.close_current(CloseCode::Abnormal(1006));
        tokio::time::sleep(Duration::from_secs(6)).await;

        let mut saw_down = false;
        let mut saw_scheduled = false;
        let mut connected = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                EngineEvent::ChannelDown { channel, close_code } => {
                    assert_eq!(channel, "device-feed");
                    assert_eq!(close_code, Some(1006));
                    saw_down = true;
                }
                EngineEvent::ReconnectScheduled { attempt, delay_ms, .. } => {
                    assert_eq!(attempt, 1);
                    assert_eq!(delay_ms, 5000);
                    saw_scheduled = true;
                }
                EngineEvent::ChannelConnected { .. } => connected += 1,
                _ => {}
            }
        }
        assert!(saw_down);
        assert!(saw_scheduled);
        assert_eq!(connected, 2);
        handle.close().await;
    }
}

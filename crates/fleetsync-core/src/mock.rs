//! Scripted collaborators for tests.
//!
//! [`MockTransport`] stands in for the WebSocket layer: tests script
//! connect failures, feed frames into the open socket and observe connect
//! attempts. [`MockTimeSource`] does the same for the REST time fetch.
//! Both live in the library (not behind `cfg(test)`) so downstream crates
//! can drive the engine in their own tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::clock::TimeSource;
use crate::error::{Error, Result};
use crate::transport::{CloseCode, SocketConn, SocketEvent, Transport};

#[derive(Default)]
struct MockTransportState {
    connect_attempts: u32,
    fail_connects: u32,
    last_url: Option<String>,
    last_token: Option<String>,
    /// Sender feeding the most recently opened socket.
    current: Option<mpsc::UnboundedSender<SocketEvent>>,
}

/// A transport whose sockets are driven by the test.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    /// Create a transport that accepts every connect.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_connects = n;
    }

    /// Number of connect attempts so far, including failed ones.
    pub fn connect_count(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// The url of the most recent connect attempt.
    pub fn last_url(&self) -> Option<String> {
        self.lock().last_url.clone()
    }

    /// The token of the most recent connect attempt.
    pub fn last_token(&self) -> Option<String> {
        self.lock().last_token.clone()
    }

    /// Feed a text frame into the currently open socket.
    ///
    /// Returns `false` when no socket is open.
    pub fn push_message(&self, text: impl Into<String>) -> bool {
        self.push_event(SocketEvent::Message(text.into()))
    }

    /// Close the currently open socket from the peer side.
    pub fn close_current(&self, code: CloseCode) -> bool {
        self.push_event(SocketEvent::Closed(code))
    }

    /// Feed a raw event into the currently open socket.
    pub fn push_event(&self, event: SocketEvent) -> bool {
        let state = self.lock();
        match &state.current {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockTransportState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn SocketConn>> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        state.last_url = Some(url.to_string());
        state.last_token = Some(token.to_string());
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(Error::transport(url, "injected connect failure"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.current = Some(tx);
        Ok(Box::new(MockConn { rx }))
    }
}

struct MockConn {
    rx: mpsc::UnboundedReceiver<SocketEvent>,
}

#[async_trait]
impl SocketConn for MockConn {
    async fn next_event(&mut self) -> Option<SocketEvent> {
        self.rx.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        self.rx.close();
        Ok(())
    }
}

/// A time source serving a scripted sequence of server times.
///
/// Responses are served in order; the final one repeats once the script is
/// exhausted. A failing source errors on every call.
pub struct MockTimeSource {
    times: Mutex<VecDeque<OffsetDateTime>>,
    fail: bool,
    calls: AtomicU32,
}

impl MockTimeSource {
    /// A source serving the given times in order.
    pub fn with_times(times: Vec<OffsetDateTime>) -> Self {
        Self {
            times: Mutex::new(times.into()),
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    /// A source that fails every fetch.
    pub fn failing() -> Self {
        Self {
            times: Mutex::new(VecDeque::new()),
            fail: true,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of fetches attempted against this source.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeSource for MockTimeSource {
    async fn fetch_server_time(&self) -> Result<OffsetDateTime> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::TimeFetch("injected failure".to_string()));
        }
        let mut times = self
            .times
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = if times.len() > 1 {
            times.pop_front()
        } else {
            times.front().copied()
        };
        next.ok_or_else(|| Error::TimeFetch("time script exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_scripted_failure_then_success() {
        let transport = MockTransport::new();
        transport.fail_next_connects(1);

        assert!(transport.connect("ws://host/feed", "t").await.is_err());
        let mut conn = transport.connect("ws://host/feed", "t").await.unwrap();
        assert_eq!(transport.connect_count(), 2);

        assert!(transport.push_message("{}"));
        match conn.next_event().await {
            Some(SocketEvent::Message(text)) => assert_eq!(text, "{}"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_transport_records_credentials() {
        let transport = MockTransport::new();
        let _conn = transport.connect("ws://host/logs", "secret").await.unwrap();
        assert_eq!(transport.last_url().as_deref(), Some("ws://host/logs"));
        assert_eq!(transport.last_token().as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_mock_time_source_repeats_last() {
        let t1 = OffsetDateTime::UNIX_EPOCH + time::Duration::hours(1);
        let t2 = OffsetDateTime::UNIX_EPOCH + time::Duration::hours(2);
        let source = MockTimeSource::with_times(vec![t1, t2]);

        assert_eq!(source.fetch_server_time().await.unwrap(), t1);
        assert_eq!(source.fetch_server_time().await.unwrap(), t2);
        assert_eq!(source.fetch_server_time().await.unwrap(), t2);
        assert_eq!(source.call_count(), 3);
    }
}

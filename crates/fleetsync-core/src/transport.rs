//! Transport seam for push channels.
//!
//! The supervisor owns reconnect policy and message routing; everything
//! about actually opening a socket lives behind [`Transport`]. Tests swap
//! in a scripted transport, production uses [`WsTransport`] (behind the
//! `ws-transport` feature).

use async_trait::async_trait;

use crate::error::Result;

/// Close status observed on a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Orderly close (code 1000). The peer is done with us; the supervisor
    /// does not reconnect.
    Normal,
    /// Any other close code, or an unclean drop with no close frame.
    Abnormal(u16),
}

impl CloseCode {
    /// Whether this is the orderly close.
    pub fn is_normal(self) -> bool {
        matches!(self, CloseCode::Normal)
    }

    /// The numeric close code.
    pub fn code(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Abnormal(code) => code,
        }
    }
}

/// One inbound event on an open socket.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A complete text frame.
    Message(String),
    /// The socket closed.
    Closed(CloseCode),
}

/// An open socket delivering push frames.
#[async_trait]
pub trait SocketConn: Send {
    /// Receive the next event, or `None` once the stream is exhausted.
    async fn next_event(&mut self) -> Option<SocketEvent>;

    /// Close the socket with the normal code.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for push sockets.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a socket to `url`, authenticating with `token`.
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn SocketConn>>;
}

#[cfg(feature = "ws-transport")]
mod ws {
    use super::{CloseCode, SocketConn, SocketEvent, Transport};
    use crate::error::{Error, Result};

    use async_trait::async_trait;
    use futures::StreamExt;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use tracing::warn;

    /// WebSocket transport over tokio-tungstenite.
    ///
    /// The auth token rides the query string (`?token=`), matching the
    /// server's expectation for socket upgrades where headers are awkward.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct WsTransport;

    #[async_trait]
    impl Transport for WsTransport {
        async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn SocketConn>> {
            let url = if token.is_empty() {
                url.to_string()
            } else if url.contains('?') {
                format!("{url}&token={token}")
            } else {
                format!("{url}?token={token}")
            };
            let (stream, _) = connect_async(url.as_str())
                .await
                .map_err(|e| Error::transport(url.clone(), e.to_string()))?;
            Ok(Box::new(WsConn { stream }))
        }
    }

    struct WsConn {
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    }

    #[async_trait]
    impl SocketConn for WsConn {
        async fn next_event(&mut self) -> Option<SocketEvent> {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => return Some(SocketEvent::Message(text)),
                    Some(Ok(Message::Close(frame))) => {
                        let code = match frame {
                            Some(f) if f.code == WsCloseCode::Normal => CloseCode::Normal,
                            Some(f) => CloseCode::Abnormal(f.code.into()),
                            // No close frame at all: treat as the reserved
                            // "abnormal closure" code.
                            None => CloseCode::Abnormal(1006),
                        };
                        return Some(SocketEvent::Closed(code));
                    }
                    // tungstenite answers pings on flush; binary frames are
                    // not part of this protocol.
                    Some(Ok(Message::Ping(_)))
                    | Some(Ok(Message::Pong(_)))
                    | Some(Ok(Message::Binary(_)))
                    | Some(Ok(Message::Frame(_))) => continue,
                    Some(Err(e)) => {
                        warn!("websocket read error: {}", e);
                        return Some(SocketEvent::Closed(CloseCode::Abnormal(1006)));
                    }
                    None => return None,
                }
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.stream
                .close(None)
                .await
                .map_err(|e| Error::transport("websocket", e.to_string()))
        }
    }
}

#[cfg(feature = "ws-transport")]
pub use ws::WsTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_classification() {
        assert!(CloseCode::Normal.is_normal());
        assert!(!CloseCode::Abnormal(1006).is_normal());
        assert_eq!(CloseCode::Normal.code(), 1000);
        assert_eq!(CloseCode::Abnormal(1011).code(), 1011);
    }
}

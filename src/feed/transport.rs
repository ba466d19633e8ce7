//! Push transport abstraction.
//!
//! The connector talks to the push endpoint through [`PushTransport`] and
//! [`PushLink`], so tests can substitute a scripted double. [`WsTransport`] is the
//! production implementation over `tokio-tungstenite`.

use crate::error::{GridError, GridResult};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Opens push links.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Perform the handshake with `url`.
    async fn connect(&self, url: &str) -> GridResult<Box<dyn PushLink>>;
}

/// One established duplex link.
#[async_trait]
pub trait PushLink: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> GridResult<()>;

    /// Wait for the next text frame. `None` once the link has closed.
    async fn next_text(&mut self) -> Option<GridResult<String>>;

    /// Close the link. Safe to call on an already-closed link.
    async fn close(&mut self);
}

/// WebSocket transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl PushTransport for WsTransport {
    async fn connect(&self, url: &str) -> GridResult<Box<dyn PushLink>> {
        let (stream, response) = connect_async(url).await?;
        debug!(url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsLink { stream }))
    }
}

/// Link over a tungstenite stream.
pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushLink for WsLink {
    async fn send_text(&mut self, text: String) -> GridResult<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<GridResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => {
                    return Some(String::from_utf8(data).map_err(|e| {
                        GridError::MalformedPayload(format!("binary frame is not UTF-8: {e}"))
                    }))
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Close frame received");
                    return None;
                }
                Ok(other) => trace!(kind = ?other, "Control frame"),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!(error = %e, "Close on finished link");
        }
    }
}

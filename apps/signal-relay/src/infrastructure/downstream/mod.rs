//! Observer WebSocket Server
//!
//! Accepts any number of observer connections on one port and plugs each
//! into the relay as a [`ClientSink`]. A session has a writer that drains
//! the client's outbound queue in order and a reader that turns inbound
//! frames into relay events.
//!
//! Each outbound queue holds at most `client_buffer` frames. A client that
//! stops reading has further frames dropped (`TransportError::Full`) rather
//! than buffered. Closing is signalled out of band so it lands even when
//! the queue is full; frames already queued are still written first.
//!
//! # Endpoints
//!
//! - `GET /` and `GET /ws` - WebSocket upgrade

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::application::ports::{ClientId, ClientSink, RelayEvent, TransportError};
use crate::domain::frame::Frame;

// =============================================================================
// Client Sink
// =============================================================================

/// Relay-side handle to one observer session.
struct WsClientSink {
    id: ClientId,
    outbound: mpsc::Sender<Frame>,
    closing: CancellationToken,
}

impl WsClientSink {
    fn new(id: ClientId, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, outbound_rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            id,
            outbound,
            closing: CancellationToken::new(),
        };
        (sink, outbound_rx)
    }
}

impl ClientSink for WsClientSink {
    fn id(&self) -> ClientId {
        self.id
    }

    fn is_open(&self) -> bool {
        !self.closing.is_cancelled() && !self.outbound.is_closed()
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closing.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn close(&self) {
        self.closing.cancel();
    }
}

/// Converts into the socket's message type, copying the payload once per
/// client.
fn to_ws_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.to_string().into()),
        Frame::Binary(data) => Message::Binary(data.to_vec().into()),
    }
}

// =============================================================================
// Server
// =============================================================================

#[derive(Clone)]
struct SessionContext {
    bridge: &'static str,
    client_buffer: usize,
    events: mpsc::UnboundedSender<RelayEvent>,
    next_id: Arc<AtomicU64>,
    sessions: TaskTracker,
}

/// Observer server bound to its port but not yet serving.
pub struct DownstreamServer {
    bridge: &'static str,
    client_buffer: usize,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl DownstreamServer {
    /// Bind on all interfaces. Port 0 picks a free port. Each observer
    /// gets an outbound queue of `client_buffer` frames.
    ///
    /// # Errors
    ///
    /// Returns `DownstreamServerError::BindFailed` if the port is taken.
    pub async fn bind(
        bridge: &'static str,
        port: u16,
        client_buffer: usize,
    ) -> Result<Self, DownstreamServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DownstreamServerError::BindFailed(port, e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DownstreamServerError::BindFailed(port, e.to_string()))?;

        Ok(Self {
            bridge,
            client_buffer,
            listener,
            local_addr,
        })
    }

    /// Address actually bound.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until cancelled, then wait for every session to finish
    /// writing.
    ///
    /// # Errors
    ///
    /// Returns `DownstreamServerError::ServerFailed` if the HTTP server
    /// fails while running.
    pub async fn run(
        self,
        events: mpsc::UnboundedSender<RelayEvent>,
        cancel: CancellationToken,
    ) -> Result<(), DownstreamServerError> {
        let sessions = TaskTracker::new();
        let context = SessionContext {
            bridge: self.bridge,
            client_buffer: self.client_buffer,
            events,
            next_id: Arc::new(AtomicU64::new(1)),
            sessions: sessions.clone(),
        };

        let app = Router::new()
            .route("/", get(upgrade_handler))
            .route("/ws", get(upgrade_handler))
            .with_state(context);

        tracing::info!(bridge = self.bridge, addr = %self.local_addr, "Observer server listening");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| DownstreamServerError::ServerFailed(e.to_string()))?;

        sessions.close();
        tracing::debug!(bridge = self.bridge, open_sessions = sessions.len(), "Draining observer sessions");
        sessions.wait().await;

        tracing::info!(bridge = self.bridge, "Observer server stopped");
        Ok(())
    }
}

async fn upgrade_handler(ws: WebSocketUpgrade, State(context): State<SessionContext>) -> Response {
    let id = context.next_id.fetch_add(1, Ordering::Relaxed);
    let sessions = context.sessions.clone();
    ws.on_upgrade(move |socket| sessions.track_future(run_session(socket, id, context)))
}

async fn run_session(socket: WebSocket, id: ClientId, context: SessionContext) {
    let (mut sink, mut stream) = socket.split();
    let (client, mut outbound_rx) = WsClientSink::new(id, context.client_buffer);
    let closing = client.closing.clone();

    if context
        .events
        .send(RelayEvent::ClientConnected(Arc::new(client)))
        .is_err()
    {
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    let writer = async {
        loop {
            tokio::select! {
                biased;
                () = closing.cancelled() => break,
                next = outbound_rx.recv() => {
                    let Some(frame) = next else { return };
                    if let Err(e) = sink.send(to_ws_message(frame)).await {
                        tracing::debug!(bridge = context.bridge, client_id = id, error = %e, "Observer write failed");
                        return;
                    }
                }
            }
        }
        // Frames queued before the close still go out, then the Close.
        while let Ok(frame) = outbound_rx.try_recv() {
            if sink.send(to_ws_message(frame)).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    };

    let reader = async {
        while let Some(message) = stream.next().await {
            let frame = match message {
                Ok(Message::Text(text)) => Frame::text(text.as_str()),
                Ok(Message::Binary(data)) => Frame::binary(data.to_vec()),
                Ok(Message::Close(_)) => return,
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Err(e) => {
                    tracing::debug!(bridge = context.bridge, client_id = id, error = %e, "Observer read failed");
                    return;
                }
            };
            if context
                .events
                .send(RelayEvent::ClientFrame { client: id, frame })
                .is_err()
            {
                return;
            }
        }
    };

    tokio::select! {
        () = writer => {}
        () = reader => {}
    }

    closing.cancel();
    let _ = context.events.send(RelayEvent::ClientDisconnected(id));
}

// =============================================================================
// Errors
// =============================================================================

/// Observer server errors.
#[derive(Debug, thiserror::Error)]
pub enum DownstreamServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stalled_client_drops_frames_beyond_its_buffer() {
        let (sink, mut rx) = WsClientSink::new(9, 4);
        let frame = Frame::binary(vec![0u8; 1024]);

        let accepted = (0..1_000).filter(|_| sink.send(frame.clone()).is_ok()).count();
        assert_eq!(accepted, 4);
        assert_eq!(rx.len(), 4);
        assert_eq!(sink.send(frame.clone()), Err(TransportError::Full));
        assert!(sink.is_open());

        // Draining frees room again.
        assert!(rx.try_recv().is_ok());
        assert_eq!(sink.send(frame), Ok(()));
    }

    #[test]
    fn close_is_signalled_even_when_queue_is_full() {
        let (sink, rx) = WsClientSink::new(9, 1);
        sink.send(Frame::text("a")).unwrap();
        assert_eq!(sink.send(Frame::text("b")), Err(TransportError::Full));

        sink.close();
        assert!(sink.closing.is_cancelled());
        assert!(!sink.is_open());
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn closed_sink_rejects_frames() {
        let (sink, _rx) = WsClientSink::new(9, 8);
        sink.close();
        assert!(!sink.is_open());
        assert_eq!(sink.send(Frame::text("late")), Err(TransportError::Closed));
    }

    #[test]
    fn dropped_session_marks_sink_closed() {
        let (sink, rx) = WsClientSink::new(9, 8);
        drop(rx);
        assert!(!sink.is_open());
        assert_eq!(sink.send(Frame::text("late")), Err(TransportError::Closed));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (sink, _rx) = WsClientSink::new(9, 0);
        assert_eq!(sink.send(Frame::text("a")), Ok(()));
        assert_eq!(sink.send(Frame::text("b")), Err(TransportError::Full));
    }

    #[test]
    fn ws_messages_keep_framing() {
        assert!(matches!(to_ws_message(Frame::text("x")), Message::Text(t) if t.as_str() == "x"));
        assert!(matches!(to_ws_message(Frame::binary(vec![7u8])), Message::Binary(b) if b[..] == [7]));
    }

    #[tokio::test]
    async fn binding_a_taken_port_fails() {
        let first = DownstreamServer::bind("test", 0, 8).await.unwrap();
        let port = first.local_addr().port();
        assert!(matches!(
            DownstreamServer::bind("test", port, 8).await,
            Err(DownstreamServerError::BindFailed(p, _)) if p == port
        ));
    }
}

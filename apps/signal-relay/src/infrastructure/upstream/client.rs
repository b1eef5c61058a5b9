//! Upstream WebSocket Client
//!
//! [`UpstreamPort`] over `tokio-tungstenite`. Every `connect` spawns a
//! fresh connection task tagged with the caller's generation; the task
//! reports `Opened`, each inbound frame, and exactly one `Ended` back to
//! the relay, then exits. Nothing here retries: reconnect decisions belong
//! to the relay controller.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{RelayEvent, TransportError, UpstreamEvent, UpstreamPort};
use crate::domain::frame::Frame;
use crate::domain::link::{Generation, LinkFailure};

struct Connection {
    generation: Generation,
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// WebSocket connection to the upstream source.
pub struct WsUpstream {
    bridge: &'static str,
    url: String,
    events: mpsc::UnboundedSender<RelayEvent>,
    connection: Option<Connection>,
}

impl WsUpstream {
    /// Create a client that reports to `events`. Does not connect.
    #[must_use]
    pub const fn new(
        bridge: &'static str,
        url: String,
        events: mpsc::UnboundedSender<RelayEvent>,
    ) -> Self {
        Self {
            bridge,
            url,
            events,
            connection: None,
        }
    }

    fn drop_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::debug!(
                bridge = self.bridge,
                generation = connection.generation,
                finished = connection.task.is_finished(),
                "Dropping upstream connection"
            );
            connection.cancel.cancel();
        }
    }
}

impl UpstreamPort for WsUpstream {
    fn connect(&mut self, generation: Generation) {
        self.drop_connection();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_connection(
            self.bridge,
            self.url.clone(),
            generation,
            outbound_rx,
            self.events.clone(),
            cancel.clone(),
        ));

        self.connection = Some(Connection {
            generation,
            outbound,
            cancel,
            task,
        });
    }

    fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let connection = self.connection.as_ref().ok_or(TransportError::NotConnected)?;
        connection
            .outbound
            .send(to_message(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        self.drop_connection();
    }
}

impl Drop for WsUpstream {
    fn drop(&mut self) {
        self.drop_connection();
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text.to_string()),
        Frame::Binary(data) => Message::binary(data.to_vec()),
    }
}

fn remote_close(frame: Option<CloseFrame>) -> LinkFailure {
    match frame {
        Some(frame) => LinkFailure::RemoteClose {
            code: Some(u16::from(frame.code)),
            reason: frame.reason.to_string(),
        },
        None => LinkFailure::RemoteClose {
            code: None,
            reason: String::new(),
        },
    }
}

async fn run_connection(
    bridge: &'static str,
    url: String,
    generation: Generation,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<RelayEvent>,
    cancel: CancellationToken,
) {
    let report = |event: UpstreamEvent| events.send(RelayEvent::Upstream(event)).is_ok();

    tracing::debug!(bridge, generation, url = %url, "Opening upstream socket");

    let connected = tokio::select! {
        () = cancel.cancelled() => return,
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            report(UpstreamEvent::Ended {
                generation,
                failure: LinkFailure::ConnectFailure(e.to_string()),
            });
            return;
        }
    };

    if !report(UpstreamEvent::Opened { generation }) {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    let failure = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // Closed locally; the relay already moved on.
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            outgoing = outbound.recv() => {
                let Some(message) = outgoing else {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                };
                if let Err(e) = write.send(message).await {
                    break LinkFailure::TransportError(e.to_string());
                }
            }
            incoming = read.next() => {
                let frame = match incoming {
                    Some(Ok(Message::Text(text))) => Frame::text(text.as_str()),
                    Some(Ok(Message::Binary(data))) => Frame::binary(data.to_vec()),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break LinkFailure::TransportError(e.to_string());
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => break remote_close(frame),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break LinkFailure::TransportError(e.to_string()),
                    None => break remote_close(None),
                };
                if !report(UpstreamEvent::Frame { generation, frame }) {
                    return;
                }
            }
        }
    };

    report(UpstreamEvent::Ended {
        generation,
        failure,
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    async fn next_upstream_event(rx: &mut mpsc::UnboundedReceiver<RelayEvent>) -> UpstreamEvent {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed");
        match event {
            RelayEvent::Upstream(event) => event,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn frames_keep_their_framing() {
        assert!(matches!(to_message(Frame::text("hi")), Message::Text(t) if t.as_str() == "hi"));
        assert!(matches!(
            to_message(Frame::binary(vec![1u8, 2])),
            Message::Binary(b) if b[..] == [1, 2]
        ));
    }

    #[test]
    fn close_frame_maps_to_remote_close() {
        assert_eq!(
            remote_close(None),
            LinkFailure::RemoteClose {
                code: None,
                reason: String::new()
            }
        );
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut upstream = WsUpstream::new("test", "ws://127.0.0.1:1".into(), tx);
        assert_eq!(
            upstream.send(Frame::text("x")),
            Err(TransportError::NotConnected)
        );
    }

    #[tokio::test]
    async fn refused_connection_reports_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut upstream = WsUpstream::new("test", format!("ws://{addr}"), tx);
        upstream.connect(7);

        match next_upstream_event(&mut rx).await {
            UpstreamEvent::Ended {
                generation,
                failure: LinkFailure::ConnectFailure(_),
            } => assert_eq!(generation, 7),
            other => panic!("expected connect failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn relays_frames_and_reports_remote_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::text(r#"{"freqs":[1]}"#)).await.unwrap();
            let echoed = ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
            echoed
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut upstream = WsUpstream::new("test", format!("ws://{addr}"), tx);
        upstream.connect(1);

        assert!(matches!(
            next_upstream_event(&mut rx).await,
            UpstreamEvent::Opened { generation: 1 }
        ));
        match next_upstream_event(&mut rx).await {
            UpstreamEvent::Frame { frame, .. } => assert_eq!(frame, Frame::text(r#"{"freqs":[1]}"#)),
            other => panic!("expected frame, got {other:?}"),
        }

        upstream.send(Frame::text("command")).unwrap();
        assert!(matches!(
            next_upstream_event(&mut rx).await,
            UpstreamEvent::Ended {
                generation: 1,
                failure: LinkFailure::RemoteClose { .. }
            }
        ));
        assert_eq!(server.await.unwrap(), Message::text("command"));
    }
}

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Error as WsError, Message,
        client::IntoClientRequest,
        error::ProtocolError,
        handshake::client::Request,
        http::{HeaderName, HeaderValue},
    },
};

use super::{ConnectRequest, RelayTransport, TransportError, TransportEvent};

/// `tokio-tungstenite` backed relay socket.
///
/// The socket lives in one spawned task that owns both halves; writes are
/// queued to it through an unbounded channel so `send` never blocks.
pub struct WebSocketTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                events,
                outgoing: None,
                task: None,
            },
            events_rx,
        )
    }
}

impl RelayTransport for WebSocketTransport {
    fn connect(&mut self, request: ConnectRequest) -> Result<(), TransportError> {
        let client_request = build_client_request(&request)?;
        if let Some(previous) = self.task.take() {
            previous.abort();
        }
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.outgoing = Some(outgoing_tx);
        tracing::debug!(
            target: "remotedesk::relay",
            host = request.url.host_str().unwrap_or_default(),
            path = request.url.path(),
            "opening relay websocket"
        );
        let events = self.events.clone();
        self.task = Some(tokio::spawn(run_connection(
            client_request,
            outgoing_rx,
            events,
        )));
        Ok(())
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::NotConnected)?;
        outgoing
            .send(Message::Text(text))
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn close(&mut self) -> bool {
        // Dropping the writer queue makes the socket task send a close frame
        // and report `Closed`.
        self.outgoing.take().is_some()
    }

    fn is_active(&self) -> bool {
        self.outgoing
            .as_ref()
            .is_some_and(|outgoing| !outgoing.is_closed())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn build_client_request(request: &ConnectRequest) -> Result<Request, TransportError> {
    let mut client_request = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
    for (name, value) in &request.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|err| TransportError::InvalidHeader {
                name: name.clone(),
                reason: err.to_string(),
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|err| TransportError::InvalidHeader {
                name: name.clone(),
                reason: err.to_string(),
            })?;
        client_request.headers_mut().insert(header_name, header_value);
    }
    Ok(client_request)
}

async fn run_connection(
    request: Request,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let ws_stream = match connect_async(request).await {
        Ok((stream, _)) => stream,
        Err(err) => {
            tracing::warn!(target: "remotedesk::relay", error = %err, "relay websocket connect failed");
            let _ = events.send(TransportEvent::Error(TransportError::Connect(err.to_string())));
            let _ = events.send(TransportEvent::Closed);
            return;
        }
    };
    tracing::debug!(target: "remotedesk::relay", "relay websocket connected");
    let _ = events.send(TransportEvent::Connected);

    let (mut ws_write, mut ws_read) = ws_stream.split();
    loop {
        tokio::select! {
            outbound = outgoing.recv() => match outbound {
                Some(message) => {
                    if let Err(err) = ws_write.send(message).await {
                        tracing::warn!(target: "remotedesk::relay", error = %err, "relay websocket write failed");
                        let _ = events.send(TransportEvent::Error(TransportError::Socket(err.to_string())));
                        break;
                    }
                }
                None => {
                    if let Err(err) = ws_write.close().await {
                        tracing::debug!(target: "remotedesk::relay", error = %err, "relay websocket close handshake failed");
                    }
                    break;
                }
            },
            inbound = ws_read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(target: "remotedesk::relay", event = "ws_in", kind = "text", len = text.len());
                    let _ = events.send(TransportEvent::Text(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::trace!(target: "remotedesk::relay", event = "ws_in", kind = "binary", len = data.len());
                    if let Ok(text) = String::from_utf8(data) {
                        let _ = events.send(TransportEvent::Text(text));
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    match &err {
                        WsError::ConnectionClosed
                        | WsError::AlreadyClosed
                        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                            tracing::debug!(target: "remotedesk::relay", "relay websocket closed: {err}");
                        }
                        _ => {
                            tracing::warn!(target: "remotedesk::relay", "relay websocket error: {err}");
                            let _ = events.send(TransportEvent::Error(TransportError::Socket(err.to_string())));
                        }
                    }
                    break;
                }
            },
        }
    }

    let _ = events.send(TransportEvent::Closed);
}

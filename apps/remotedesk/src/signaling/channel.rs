use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::message::{
    ChannelMessage, EVENT_BROADCAST, EVENT_CLOSE, EVENT_ERROR, EVENT_REPLY, RealtimeCredentials,
};
use super::relay::{SignalEnvelope, SignalRelay};
use super::{ChannelError, ChannelEvent, JoinState};
use crate::transport::{ConnectRequest, RelayTransport, TransportEvent};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingReply {
    Join,
    Heartbeat,
}

enum Input {
    Transport(TransportEvent),
    HeartbeatTick,
}

/// Joins one relay topic over a [`RelayTransport`] and exchanges broadcasts on
/// it.
///
/// The client never reconnects on its own. Events are pulled with
/// [`ChannelClient::next_event`], which also drives the heartbeat timer.
pub struct ChannelClient<T: RelayTransport> {
    transport: T,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    credentials: Option<RealtimeCredentials>,
    state: JoinState,
    next_ref: u64,
    pending: HashMap<String, PendingReply>,
    heartbeat: Option<Interval>,
}

impl<T: RelayTransport> ChannelClient<T> {
    pub fn new(transport: T, transport_events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self {
            transport,
            transport_events,
            credentials: None,
            state: JoinState::Disconnected,
            next_ref: 0,
            pending: HashMap::new(),
            heartbeat: None,
        }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == JoinState::Joined
    }

    pub fn topic(&self) -> Option<&str> {
        self.credentials
            .as_ref()
            .map(|credentials| credentials.topic.as_str())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Opens the relay socket for `credentials.topic`. The join request goes
    /// out once the transport reports the connection.
    pub fn connect(
        &mut self,
        credentials: RealtimeCredentials,
        app_token: Option<&str>,
    ) -> Result<(), ChannelError> {
        if self.state != JoinState::Disconnected {
            return Err(ChannelError::AlreadyConnected);
        }
        let url = credentials.websocket_url()?;
        if credentials.is_expired_at(OffsetDateTime::now_utc()) {
            tracing::warn!(
                target: "remotedesk::relay",
                topic = %credentials.topic,
                "realtime credentials are past their expiry, connecting anyway"
            );
        }

        let mut request = ConnectRequest::new(url);
        if let Some(token) = app_token.filter(|token| !token.trim().is_empty()) {
            request = request.with_header("Authorization", format!("Bearer {token}"));
        }

        self.next_ref = 0;
        self.pending.clear();
        self.heartbeat = None;
        tracing::info!(target: "remotedesk::relay", topic = %credentials.topic, "connecting to relay");
        self.transport.connect(request)?;
        self.credentials = Some(credentials);
        self.state = JoinState::Connecting;
        Ok(())
    }

    /// Publishes `payload` under the broadcast `event` on the joined topic.
    /// Returns the frame reference.
    pub fn send_broadcast(&mut self, event: &str, payload: Value) -> Result<String, ChannelError> {
        if self.state != JoinState::Joined {
            return Err(ChannelError::NotJoined);
        }
        let topic = self.topic().ok_or(ChannelError::NotJoined)?.to_string();
        let reference = self.next_ref();
        let text = ChannelMessage::broadcast(&topic, event, payload, reference.clone()).to_text()?;
        self.transport.send(text)?;
        tracing::trace!(target: "remotedesk::relay", event, reference = %reference, "broadcast sent");
        Ok(reference)
    }

    pub fn send_signal(&mut self, envelope: &SignalEnvelope) -> Result<String, ChannelError> {
        let (event, body) = SignalRelay::encode(envelope);
        tracing::debug!(target: "remotedesk::relay", kind = %envelope.kind, "sending signal");
        self.send_broadcast(event, body)
    }

    /// Stops the heartbeat and closes the socket. `Disconnected` follows once
    /// the transport confirms the close; with nothing open the state drops to
    /// `Disconnected` immediately.
    pub fn disconnect(&mut self) {
        self.heartbeat = None;
        self.pending.clear();
        if self.transport.close() {
            if self.state != JoinState::Disconnected {
                self.state = JoinState::Closing;
            }
        } else {
            self.state = JoinState::Disconnected;
        }
    }

    /// Next notification for the owner. Cancel safe: inputs are only taken
    /// once they are handled to completion.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let input = tokio::select! {
                event = self.transport_events.recv() => match event {
                    Some(event) => Input::Transport(event),
                    None => return None,
                },
                _ = heartbeat_tick(&mut self.heartbeat) => Input::HeartbeatTick,
            };
            let emitted = match input {
                Input::Transport(event) => self.handle_transport_event(event),
                Input::HeartbeatTick => self.send_heartbeat(),
            };
            if emitted.is_some() {
                return emitted;
            }
        }
    }

    fn next_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    fn handle_transport_event(&mut self, event: TransportEvent) -> Option<ChannelEvent> {
        match event {
            TransportEvent::Connected => self.handle_connected(),
            TransportEvent::Text(text) => self.handle_text(&text),
            TransportEvent::Error(err) => Some(ChannelEvent::Error(ChannelError::Transport(err))),
            TransportEvent::Closed => {
                self.heartbeat = None;
                self.pending.clear();
                let previous = std::mem::replace(&mut self.state, JoinState::Disconnected);
                tracing::info!(target: "remotedesk::relay", from = %previous, "relay connection closed");
                (previous != JoinState::Disconnected).then_some(ChannelEvent::Disconnected)
            }
        }
    }

    fn handle_connected(&mut self) -> Option<ChannelEvent> {
        if self.state != JoinState::Connecting {
            tracing::debug!(target: "remotedesk::relay", state = %self.state, "ignoring late connect notification");
            return None;
        }
        let topic = self.topic()?.to_string();
        self.state = JoinState::Joining;

        let start = Instant::now() + HEARTBEAT_INTERVAL;
        let mut heartbeat = tokio::time::interval_at(start, HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);

        let reference = self.next_ref();
        let sent = ChannelMessage::join(&topic, reference.clone())
            .to_text()
            .and_then(|text| self.transport.send(text).map_err(ChannelError::from));
        match sent {
            Ok(()) => {
                tracing::debug!(target: "remotedesk::relay", topic = %topic, reference = %reference, "join requested");
                self.pending.insert(reference, PendingReply::Join);
                Some(ChannelEvent::Connected)
            }
            Err(err) => {
                tracing::warn!(target: "remotedesk::relay", error = %err, "failed to send join request");
                Some(ChannelEvent::Error(err))
            }
        }
    }

    fn handle_text(&mut self, text: &str) -> Option<ChannelEvent> {
        let message = match ChannelMessage::from_text(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(target: "remotedesk::relay", error = %err, "dropping malformed relay frame");
                return Some(ChannelEvent::Error(err));
            }
        };
        match message.event.as_str() {
            EVENT_REPLY => self.handle_reply(&message),
            EVENT_BROADCAST => self.handle_broadcast(&message),
            EVENT_ERROR | EVENT_CLOSE => self.handle_channel_failure(&message),
            other => {
                tracing::trace!(target: "remotedesk::relay", event = other, topic = %message.topic, "ignoring relay frame");
                None
            }
        }
    }

    fn handle_reply(&mut self, message: &ChannelMessage) -> Option<ChannelEvent> {
        let ours = self.topic() == Some(message.topic.as_str());
        let pending = match message.reference.as_deref() {
            Some(reference) => self.pending.remove(reference),
            // Some relays omit the ref on join acks.
            None if ours && self.state == JoinState::Joining => Some(PendingReply::Join),
            None => None,
        };

        match pending? {
            PendingReply::Heartbeat => {
                tracing::trace!(target: "remotedesk::relay", "heartbeat acknowledged");
                None
            }
            PendingReply::Join => {
                if self.state != JoinState::Joining {
                    return None;
                }
                match message.reply_status() {
                    Some("ok") if ours => {
                        self.pending.retain(|_, pending| *pending != PendingReply::Join);
                        self.state = JoinState::Joined;
                        tracing::info!(target: "remotedesk::relay", topic = %message.topic, "joined relay topic");
                        Some(ChannelEvent::Joined)
                    }
                    Some("ok") => {
                        tracing::warn!(
                            target: "remotedesk::relay",
                            topic = %message.topic,
                            "join acknowledged for a different topic"
                        );
                        None
                    }
                    Some(status) => {
                        let reason = reply_reason(&message.payload).unwrap_or_else(|| status.to_string());
                        tracing::warn!(target: "remotedesk::relay", topic = %message.topic, %reason, "join rejected");
                        Some(ChannelEvent::Error(ChannelError::JoinRejected {
                            topic: message.topic.clone(),
                            reason,
                        }))
                    }
                    None => None,
                }
            }
        }
    }

    fn handle_broadcast(&mut self, message: &ChannelMessage) -> Option<ChannelEvent> {
        if self.topic() != Some(message.topic.as_str()) {
            return None;
        }
        let Some((event, body)) = message.broadcast_body() else {
            return Some(ChannelEvent::Error(ChannelError::Protocol(
                "broadcast frame without event body".into(),
            )));
        };
        SignalRelay::decode(event, body).map(ChannelEvent::SignalReceived)
    }

    fn handle_channel_failure(&mut self, message: &ChannelMessage) -> Option<ChannelEvent> {
        if self.topic() != Some(message.topic.as_str()) {
            return None;
        }
        if self.state == JoinState::Joined {
            self.state = JoinState::Joining;
        }
        tracing::warn!(
            target: "remotedesk::relay",
            topic = %message.topic,
            event = %message.event,
            "relay reported channel failure"
        );
        Some(ChannelEvent::Error(ChannelError::Protocol(format!(
            "relay sent {} for topic {}",
            message.event, message.topic
        ))))
    }

    fn send_heartbeat(&mut self) -> Option<ChannelEvent> {
        if !matches!(self.state, JoinState::Joining | JoinState::Joined) {
            return None;
        }
        let reference = self.next_ref();
        let sent = ChannelMessage::heartbeat(reference.clone())
            .to_text()
            .and_then(|text| self.transport.send(text).map_err(ChannelError::from));
        match sent {
            Ok(()) => {
                tracing::trace!(target: "remotedesk::relay", reference = %reference, "heartbeat sent");
                self.pending.retain(|_, pending| *pending != PendingReply::Heartbeat);
                self.pending.insert(reference, PendingReply::Heartbeat);
                None
            }
            Err(err) => {
                tracing::warn!(target: "remotedesk::relay", error = %err, "failed to send heartbeat");
                Some(ChannelEvent::Error(err))
            }
        }
    }
}

async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn reply_reason(payload: &Value) -> Option<String> {
    let response = payload.get("response")?;
    response
        .get("reason")
        .and_then(Value::as_str)
        .or_else(|| response.as_str())
        .map(str::to_string)
}

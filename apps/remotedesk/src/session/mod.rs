//! Session sequencing: relay join, peer creation, and the signal exchange in
//! both directions.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::peer::{
    AgentFactory, DataChannelState, IceCandidate, IceServerConfig, NegotiationError,
    NegotiationRole, NegotiatorEvent, PeerConnectionState, PeerNegotiator, SdpKind, TrackInfo,
};
use crate::protocol::InputEvent;
use crate::signaling::relay::{SIGNAL_ANSWER, SIGNAL_ICE, SIGNAL_OFFER};
use crate::signaling::{
    ChannelClient, ChannelError, ChannelEvent, JoinState, RealtimeCredentials, SignalEnvelope,
};
use crate::transport::RelayTransport;

mod handle;

pub use handle::SessionHandle;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("invalid {kind} signal: {reason}")]
    InvalidSignal { kind: String, reason: String },
    #[error("a session is already running")]
    AlreadyStarted,
    #[error("session task has stopped")]
    Closed,
}

/// Coarse classification of [`SessionError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Negotiation,
    NotReady,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Channel(ChannelError::Transport(_)) => ErrorKind::Transport,
            SessionError::Channel(ChannelError::NotJoined | ChannelError::AlreadyConnected) => {
                ErrorKind::NotReady
            }
            SessionError::Channel(_) | SessionError::InvalidSignal { .. } => ErrorKind::Protocol,
            SessionError::Negotiation(_) => ErrorKind::Negotiation,
            SessionError::AlreadyStarted | SessionError::Closed => ErrorKind::NotReady,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RelayConnected,
    Joined,
    StateChanged(PeerConnectionState),
    GatheringComplete,
    DataChannelOpen,
    DataChannelClosed,
    Message(Bytes),
    TrackAdded(TrackInfo),
    Error(SessionError),
    RelayDisconnected,
    Ended,
}

enum SessionInput {
    Channel(ChannelEvent),
    ChannelGone,
    Peer(NegotiatorEvent),
}

/// Owns every piece of mutable session state: one relay channel and, while a
/// session runs, one peer negotiator.
pub struct SessionOrchestrator<T: RelayTransport> {
    channel: ChannelClient<T>,
    channel_gone: bool,
    factory: Arc<dyn AgentFactory>,
    receive_video: bool,
    peer: Option<PeerNegotiator>,
    outbox: VecDeque<SessionEvent>,
}

impl<T: RelayTransport> SessionOrchestrator<T> {
    pub fn new(channel: ChannelClient<T>, factory: Arc<dyn AgentFactory>) -> Self {
        Self {
            channel,
            channel_gone: false,
            factory,
            receive_video: true,
            peer: None,
            outbox: VecDeque::new(),
        }
    }

    pub fn with_receive_video(mut self, receive_video: bool) -> Self {
        self.receive_video = receive_video;
        self
    }

    pub fn join_state(&self) -> JoinState {
        self.channel.state()
    }

    pub fn role(&self) -> Option<NegotiationRole> {
        self.peer.as_ref().map(PeerNegotiator::role)
    }

    pub fn peer(&self) -> Option<&PeerNegotiator> {
        self.peer.as_ref()
    }

    pub fn channel(&self) -> &ChannelClient<T> {
        &self.channel
    }

    /// Configures a fresh negotiator for `role` and connects the relay. The
    /// peer is created once the topic is joined.
    pub fn start_session(
        &mut self,
        role: NegotiationRole,
        credentials: RealtimeCredentials,
        ice_servers: Vec<IceServerConfig>,
        app_token: Option<&str>,
    ) -> Result<(), SessionError> {
        if self.peer.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        let mut peer =
            PeerNegotiator::new(role, Arc::clone(&self.factory)).with_receive_video(self.receive_video);
        peer.configure(ice_servers);

        tracing::info!(target: "remotedesk::session", %role, topic = %credentials.topic, "starting session");
        self.channel.connect(credentials, app_token)?;
        self.peer = Some(peer);
        Ok(())
    }

    /// Closes the peer, then the relay. Either may already be gone.
    pub async fn end_session(&mut self) {
        let relay_active = self.channel.state() != JoinState::Disconnected;
        if self.peer.is_none() && !relay_active {
            return;
        }
        if let Some(mut peer) = self.peer.take() {
            let channel_was_closed = peer.data_channel_state() == DataChannelState::Closed;
            let state_was_closed = peer.state() == PeerConnectionState::Closed;
            peer.close_peer().await;
            if !channel_was_closed {
                self.outbox.push_back(SessionEvent::DataChannelClosed);
            }
            if !state_was_closed {
                self.outbox
                    .push_back(SessionEvent::StateChanged(PeerConnectionState::Closed));
            }
        }
        self.channel.disconnect();
        tracing::info!(target: "remotedesk::session", "session ended");
        self.outbox.push_back(SessionEvent::Ended);
    }

    pub async fn send_input_event(&mut self, event: &InputEvent) -> bool {
        match event.to_bytes() {
            Ok(data) => self.send_bytes(data).await,
            Err(err) => {
                tracing::warn!(target: "remotedesk::session", error = %err, "failed to encode input event");
                false
            }
        }
    }

    /// Writes raw bytes to the input channel; `false` when dropped.
    pub async fn send_bytes(&mut self, data: Bytes) -> bool {
        match self.peer.as_mut() {
            Some(peer) => peer.send_input_event(data).await,
            None => false,
        }
    }

    /// Next session notification.
    ///
    /// Not cancel safe: dropping the future while a signal is being applied
    /// leaves the negotiation half done. [`SessionHandle`] runs this loop on
    /// its own task for callers that need to select.
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            if let Some(event) = self.outbox.pop_front() {
                return event;
            }
            let input = self.next_input().await;
            self.handle_input(input).await;
        }
    }

    fn take_event(&mut self) -> Option<SessionEvent> {
        self.outbox.pop_front()
    }

    /// Cancel safe.
    async fn next_input(&mut self) -> SessionInput {
        tokio::select! {
            event = self.channel.next_event(), if !self.channel_gone => match event {
                Some(event) => SessionInput::Channel(event),
                None => SessionInput::ChannelGone,
            },
            event = next_peer_event(&mut self.peer) => SessionInput::Peer(event),
        }
    }

    async fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Channel(event) => self.handle_channel_event(event).await,
            SessionInput::ChannelGone => {
                self.channel_gone = true;
                self.outbox.push_back(SessionEvent::RelayDisconnected);
            }
            SessionInput::Peer(event) => self.handle_peer_event(event),
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.outbox.push_back(SessionEvent::RelayConnected),
            ChannelEvent::Joined => {
                self.outbox.push_back(SessionEvent::Joined);
                if let Err(err) = self.on_joined().await {
                    self.report(err);
                }
            }
            ChannelEvent::SignalReceived(envelope) => {
                if let Err(err) = self.dispatch_signal(envelope).await {
                    self.report(err);
                }
            }
            ChannelEvent::Error(err) => self.report(err.into()),
            ChannelEvent::Disconnected => self.outbox.push_back(SessionEvent::RelayDisconnected),
        }
    }

    async fn on_joined(&mut self) -> Result<(), SessionError> {
        let Some(peer) = self.peer.as_mut() else {
            return Ok(());
        };
        if peer.has_peer() {
            tracing::debug!(target: "remotedesk::session", "rejoined relay topic, keeping existing peer");
            return Ok(());
        }
        peer.create_peer().await?;
        if peer.role() == NegotiationRole::Offerer {
            peer.create_offer().await?;
        }
        Ok(())
    }

    async fn dispatch_signal(&mut self, envelope: SignalEnvelope) -> Result<(), SessionError> {
        let Some(peer) = self.peer.as_mut() else {
            tracing::debug!(target: "remotedesk::session", kind = %envelope.kind, "signal without session");
            return Ok(());
        };
        tracing::debug!(target: "remotedesk::session", kind = %envelope.kind, "signal received");
        match envelope.kind.as_str() {
            SIGNAL_OFFER => {
                if peer.role() != NegotiationRole::Answerer {
                    tracing::debug!(target: "remotedesk::session", "offerer ignoring remote offer");
                    return Ok(());
                }
                let sdp = signal_sdp(&envelope)?;
                peer.set_remote_description(SdpKind::Offer, sdp).await?;
            }
            SIGNAL_ANSWER => {
                if peer.role() != NegotiationRole::Offerer {
                    tracing::debug!(target: "remotedesk::session", "answerer ignoring remote answer");
                    return Ok(());
                }
                let sdp = signal_sdp(&envelope)?;
                peer.set_remote_description(SdpKind::Answer, sdp).await?;
            }
            SIGNAL_ICE => {
                let candidate = IceCandidate::from_signal_payload(&envelope.payload)?;
                peer.add_remote_candidate(candidate).await?;
            }
            other => {
                tracing::trace!(target: "remotedesk::session", kind = other, "ignoring unknown signal");
            }
        }
        Ok(())
    }

    fn handle_peer_event(&mut self, event: NegotiatorEvent) {
        match event {
            NegotiatorEvent::LocalDescription { kind, sdp } => {
                let mut payload = Map::new();
                payload.insert("sdp".into(), Value::String(sdp));
                self.send_signal(SignalEnvelope::new(kind.as_str(), payload));
            }
            NegotiatorEvent::LocalCandidate(candidate) => {
                self.send_signal(SignalEnvelope::new(SIGNAL_ICE, candidate.to_signal_payload()));
            }
            NegotiatorEvent::StateChanged(state) => {
                self.outbox.push_back(SessionEvent::StateChanged(state));
                if state == PeerConnectionState::Failed {
                    self.report(NegotiationError::ConnectionFailed.into());
                }
            }
            NegotiatorEvent::GatheringComplete => {
                self.outbox.push_back(SessionEvent::GatheringComplete)
            }
            NegotiatorEvent::DataChannelStateChanged(DataChannelState::Open) => {
                self.outbox.push_back(SessionEvent::DataChannelOpen)
            }
            NegotiatorEvent::DataChannelStateChanged(DataChannelState::Closed) => {
                self.outbox.push_back(SessionEvent::DataChannelClosed)
            }
            NegotiatorEvent::DataChannelStateChanged(_) => {}
            NegotiatorEvent::Message(data) => self.outbox.push_back(SessionEvent::Message(data)),
            NegotiatorEvent::TrackAdded(track) => {
                self.outbox.push_back(SessionEvent::TrackAdded(track))
            }
            NegotiatorEvent::CandidateRejected(err) => self.report(err.into()),
        }
    }

    fn send_signal(&mut self, envelope: SignalEnvelope) {
        if let Err(err) = self.channel.send_signal(&envelope) {
            tracing::warn!(target: "remotedesk::session", kind = %envelope.kind, error = %err, "failed to send signal");
            self.report(err.into());
        }
    }

    fn report(&mut self, err: SessionError) {
        tracing::warn!(target: "remotedesk::session", error = %err, "session error");
        self.outbox.push_back(SessionEvent::Error(err));
    }
}

async fn next_peer_event(peer: &mut Option<PeerNegotiator>) -> NegotiatorEvent {
    match peer {
        Some(peer) => peer.next_event().await,
        None => std::future::pending().await,
    }
}

fn signal_sdp(envelope: &SignalEnvelope) -> Result<&str, SessionError> {
    envelope
        .payload
        .get("sdp")
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::InvalidSignal {
            kind: envelope.kind.clone(),
            reason: "missing sdp".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::AgentEvent;
    use crate::peer::mock::{AgentCall, AgentProbe, MOCK_ANSWER_SDP, MOCK_OFFER_SDP, ScriptedAgentFactory};
    use crate::transport::{MockRemote, MockTransport, TransportError};
    use futures_util::FutureExt;
    use serde_json::json;

    const TOPIC: &str = "remote:abc123";

    struct Harness {
        session: SessionOrchestrator<MockTransport>,
        remote: MockRemote,
        probe: AgentProbe,
    }

    impl Harness {
        fn new() -> Self {
            let (transport, events, remote) = MockTransport::new();
            let (factory, probe) = ScriptedAgentFactory::new();
            let session = SessionOrchestrator::new(ChannelClient::new(transport, events), Arc::new(factory));
            Self {
                session,
                remote,
                probe,
            }
        }

        fn start(&mut self, role: NegotiationRole) {
            let credentials = RealtimeCredentials::new("https://relay.example.com", "anon-key", TOPIC);
            self.session
                .start_session(role, credentials, vec![IceServerConfig::default_stun()], Some("app-token"))
                .unwrap();
        }

        async fn joined(role: NegotiationRole) -> Self {
            let mut harness = Self::new();
            harness.start(role);
            harness.remote.open();
            assert_eq!(harness.session.next_event().await, SessionEvent::RelayConnected);
            harness.remote.push_json(&json!({
                "event": "phx_reply",
                "topic": TOPIC,
                "payload": {"status": "ok"},
                "ref": "1",
            }));
            assert_eq!(harness.session.next_event().await, SessionEvent::Joined);
            harness.settle();
            harness
        }

        /// Runs the loop until it would wait, returning what it emitted.
        fn settle(&mut self) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            while let Some(event) = self.session.next_event().now_or_never() {
                events.push(event);
            }
            events
        }

        /// Signal envelopes broadcast so far, as `{type, ...body}` objects.
        fn sent_signals(&self) -> Vec<Value> {
            self.remote
                .sent_json()
                .into_iter()
                .filter(|frame| frame["event"] == "broadcast")
                .map(|frame| frame["payload"]["payload"].clone())
                .collect()
        }

        fn receive_signal(&self, body: Value) {
            self.remote.push_json(&json!({
                "event": "broadcast",
                "topic": TOPIC,
                "payload": {"type": "broadcast", "event": "signal", "payload": body},
            }));
        }
    }

    #[tokio::test]
    async fn offerer_creates_peer_and_broadcasts_offer_after_join() {
        let harness = Harness::joined(NegotiationRole::Offerer).await;
        assert_eq!(
            harness.probe.calls(),
            vec![
                AgentCall::Create {
                    role: NegotiationRole::Offerer,
                    receive_video: true,
                },
                AgentCall::CreateDataChannel("input".into()),
                AgentCall::CreateOffer,
            ]
        );
        assert_eq!(
            harness.sent_signals(),
            vec![json!({"type": "offer", "sdp": MOCK_OFFER_SDP})]
        );
    }

    #[tokio::test]
    async fn answerer_waits_for_offer() {
        let harness = Harness::joined(NegotiationRole::Answerer).await;
        assert!(!harness.probe.calls().contains(&AgentCall::CreateOffer));
        assert!(harness.sent_signals().is_empty());
    }

    #[tokio::test]
    async fn offer_and_answer_cross_the_relay() {
        let mut offerer = Harness::joined(NegotiationRole::Offerer).await;
        let mut answerer = Harness::joined(NegotiationRole::Answerer).await;

        let offer = offerer.sent_signals().remove(0);
        answerer.receive_signal(offer);
        answerer.settle();
        assert!(answerer.probe.calls().contains(&AgentCall::SetRemoteDescription {
            kind: SdpKind::Offer,
            sdp: MOCK_OFFER_SDP.into(),
        }));
        let answer = answerer.sent_signals().remove(0);
        assert_eq!(answer, json!({"type": "answer", "sdp": MOCK_ANSWER_SDP}));

        offerer.receive_signal(answer);
        offerer.settle();
        assert!(offerer.probe.calls().contains(&AgentCall::SetRemoteDescription {
            kind: SdpKind::Answer,
            sdp: MOCK_ANSWER_SDP.into(),
        }));
    }

    #[tokio::test]
    async fn offerer_ignores_remote_offer() {
        let mut harness = Harness::joined(NegotiationRole::Offerer).await;
        harness.receive_signal(json!({"type": "offer", "sdp": "v=0 glare"}));
        assert!(harness.settle().is_empty());
        assert!(
            !harness
                .probe
                .calls()
                .iter()
                .any(|call| matches!(call, AgentCall::SetRemoteDescription { .. }))
        );
    }

    #[tokio::test]
    async fn candidates_before_offer_are_applied_after_it() {
        let mut harness = Harness::joined(NegotiationRole::Answerer).await;
        harness.receive_signal(json!({
            "type": "ice",
            "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        }));
        harness.receive_signal(json!({
            "type": "ice",
            "candidate": "candidate:2 1 udp 1 10.0.0.2 5000 typ host",
            "sdpMid": "",
            "sdpMLineIndex": -1,
        }));
        harness.settle();
        assert_eq!(harness.session.peer().unwrap().pending_candidates(), 2);

        harness.receive_signal(json!({"type": "offer", "sdp": MOCK_OFFER_SDP}));
        harness.settle();

        let applied: Vec<AgentCall> = harness
            .probe
            .calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    AgentCall::SetRemoteDescription { .. } | AgentCall::AddRemoteCandidate(_)
                )
            })
            .collect();
        assert_eq!(
            applied,
            vec![
                AgentCall::SetRemoteDescription {
                    kind: SdpKind::Offer,
                    sdp: MOCK_OFFER_SDP.into(),
                },
                AgentCall::AddRemoteCandidate(IceCandidate::new(
                    "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
                    Some("0".into()),
                    Some(0),
                )),
                AgentCall::AddRemoteCandidate(IceCandidate::new(
                    "candidate:2 1 udp 1 10.0.0.2 5000 typ host",
                    None,
                    None,
                )),
            ]
        );
    }

    #[tokio::test]
    async fn queued_candidate_rejection_surfaces_like_a_late_one() {
        let mut harness = Harness::joined(NegotiationRole::Answerer).await;
        harness.receive_signal(json!({
            "type": "ice",
            "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        }));
        harness.settle();
        harness.probe.fail_next_candidate();

        harness.receive_signal(json!({"type": "offer", "sdp": MOCK_OFFER_SDP}));
        let events = harness.settle();
        assert!(
            events.contains(&SessionEvent::Error(SessionError::Negotiation(
                NegotiationError::InvalidCandidate("scripted rejection".into())
            ))),
            "{events:?}"
        );
        assert_eq!(
            harness.sent_signals().pop().unwrap(),
            json!({"type": "answer", "sdp": MOCK_ANSWER_SDP})
        );

        harness.probe.fail_next_candidate();
        harness.receive_signal(json!({
            "type": "ice",
            "candidate": "candidate:2 1 udp 1 10.0.0.2 5000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        }));
        let events = harness.settle();
        assert_eq!(
            events,
            vec![SessionEvent::Error(SessionError::Negotiation(
                NegotiationError::InvalidCandidate("scripted rejection".into())
            ))]
        );
    }

    #[tokio::test]
    async fn local_candidates_are_trickled() {
        let mut harness = Harness::joined(NegotiationRole::Offerer).await;
        harness.probe.emit(AgentEvent::LocalCandidate(IceCandidate::new(
            "candidate:7 1 udp 2122260223 192.168.1.4 54321 typ host",
            Some("0".into()),
            Some(0),
        )));
        harness.settle();
        assert_eq!(
            harness.sent_signals().pop().unwrap(),
            json!({
                "type": "ice",
                "candidate": "candidate:7 1 udp 2122260223 192.168.1.4 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
            })
        );
    }

    #[tokio::test]
    async fn malformed_signal_surfaces_protocol_error() {
        let mut harness = Harness::joined(NegotiationRole::Answerer).await;
        harness.receive_signal(json!({"type": "offer"}));
        let events = harness.settle();
        let [SessionEvent::Error(err)] = events.as_slice() else {
            panic!("expected one error, got {events:?}");
        };
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn failed_connection_is_reported() {
        let mut harness = Harness::joined(NegotiationRole::Offerer).await;
        harness
            .probe
            .emit(AgentEvent::ConnectionState(PeerConnectionState::Failed));
        let events = harness.settle();
        assert_eq!(
            events,
            vec![
                SessionEvent::StateChanged(PeerConnectionState::Failed),
                SessionEvent::Error(SessionError::Negotiation(NegotiationError::ConnectionFailed)),
            ]
        );
        assert_eq!(
            SessionError::Negotiation(NegotiationError::ConnectionFailed).kind(),
            ErrorKind::Negotiation
        );
    }

    #[tokio::test]
    async fn signals_while_not_joined_report_not_ready() {
        let mut harness = Harness::joined(NegotiationRole::Offerer).await;
        harness
            .remote
            .push_json(&json!({"event": "phx_error", "topic": TOPIC, "payload": {}}));
        let events = harness.settle();
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Error(err)] if err.kind() == ErrorKind::Protocol
        ));
        assert_eq!(harness.session.join_state(), JoinState::Joining);

        let sent_before = harness.remote.sent().len();
        harness.probe.emit(AgentEvent::LocalCandidate(IceCandidate::new(
            "candidate:1",
            None,
            None,
        )));
        let events = harness.settle();
        assert_eq!(
            events,
            vec![SessionEvent::Error(SessionError::Channel(ChannelError::NotJoined))]
        );
        assert_eq!(events_kind(&events[0]), Some(ErrorKind::NotReady));
        assert_eq!(harness.remote.sent().len(), sent_before);
    }

    fn events_kind(event: &SessionEvent) -> Option<ErrorKind> {
        match event {
            SessionEvent::Error(err) => Some(err.kind()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn input_flows_once_channel_opens() {
        let mut harness = Harness::joined(NegotiationRole::Offerer).await;
        let event = InputEvent::Move { x: 1.0, y: 2.0 };
        assert!(!harness.session.send_input_event(&event).await);

        harness
            .probe
            .emit(AgentEvent::DataChannel(DataChannelState::Open));
        assert_eq!(harness.settle(), vec![SessionEvent::DataChannelOpen]);
        assert!(harness.session.send_input_event(&event).await);
        assert!(harness
            .probe
            .calls()
            .contains(&AgentCall::Send(event.to_bytes().unwrap())));
    }

    #[tokio::test]
    async fn end_session_closes_peer_then_relay_and_is_repeatable() {
        let mut harness = Harness::joined(NegotiationRole::Offerer).await;
        harness.session.end_session().await;
        let events = harness.settle();
        assert_eq!(
            events,
            vec![
                SessionEvent::DataChannelClosed,
                SessionEvent::StateChanged(PeerConnectionState::Closed),
                SessionEvent::Ended,
                SessionEvent::RelayDisconnected,
            ]
        );
        let calls = harness.probe.calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            &[AgentCall::CloseDataChannel, AgentCall::Close]
        );

        harness.session.end_session().await;
        assert!(harness.settle().is_empty());
        assert_eq!(harness.remote.close_calls(), 1);
        assert_eq!(harness.session.join_state(), JoinState::Disconnected);
    }

    #[tokio::test]
    async fn relay_loss_is_reported_without_restart() {
        let mut harness = Harness::joined(NegotiationRole::Offerer).await;
        harness.remote.fail(TransportError::Socket("reset".into()));
        let events = harness.settle();
        assert!(matches!(
            events.first(),
            Some(SessionEvent::Error(err)) if err.kind() == ErrorKind::Transport
        ));
        assert_eq!(events.last(), Some(&SessionEvent::RelayDisconnected));
        assert_eq!(harness.remote.requests().len(), 1);
    }

    #[tokio::test]
    async fn second_start_is_refused() {
        let mut harness = Harness::new();
        harness.start(NegotiationRole::Offerer);
        let credentials = RealtimeCredentials::new("https://relay.example.com", "anon-key", TOPIC);
        assert_eq!(
            harness
                .session
                .start_session(NegotiationRole::Answerer, credentials, Vec::new(), None),
            Err(SessionError::AlreadyStarted)
        );
    }
}

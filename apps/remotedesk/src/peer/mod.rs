//! Peer connection negotiation: offer/answer exchange, trickled candidates and
//! the input data channel.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod agent;
pub mod mock;
#[cfg(feature = "webrtc-rs")]
pub mod rtc;
pub mod state;

pub use agent::{
    AgentConfig, AgentEvent, AgentFactory, IceCandidate, IceServerConfig, NegotiationAgent,
    SdpKind, TrackInfo,
};
pub use state::{DataChannelState, PeerConnectionState};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("ice servers have not been configured")]
    NotConfigured,
    #[error("no peer connection")]
    NoPeer,
    #[error("peer connection already exists")]
    PeerExists,
    #[error("{operation} is not valid for the {role} role")]
    WrongRole {
        operation: &'static str,
        role: NegotiationRole,
    },
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("invalid ice candidate: {0}")]
    InvalidCandidate(String),
    #[error("negotiation agent error: {0}")]
    Agent(String),
    #[error("peer connection failed")]
    ConnectionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

impl NegotiationRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationRole::Offerer => "offerer",
            NegotiationRole::Answerer => "answerer",
        }
    }
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiatorEvent {
    LocalDescription { kind: SdpKind, sdp: String },
    LocalCandidate(IceCandidate),
    StateChanged(PeerConnectionState),
    GatheringComplete,
    DataChannelStateChanged(DataChannelState),
    Message(Bytes),
    TrackAdded(TrackInfo),
    /// A queued remote candidate the agent refused once the remote
    /// description was applied.
    CandidateRejected(NegotiationError),
}

/// Owns one negotiation agent at a time and turns its callbacks into
/// [`NegotiatorEvent`]s.
///
/// Remote candidates that arrive before the remote description are held back
/// and applied, in arrival order, right after the description is applied.
pub struct PeerNegotiator {
    role: NegotiationRole,
    factory: Arc<dyn AgentFactory>,
    config: Option<AgentConfig>,
    receive_video: bool,
    agent: Option<Box<dyn NegotiationAgent>>,
    agent_events: Option<mpsc::UnboundedReceiver<AgentEvent>>,
    state: PeerConnectionState,
    channel_state: DataChannelState,
    remote_description_applied: bool,
    pending_candidates: VecDeque<IceCandidate>,
    tracks: Vec<TrackInfo>,
    dropped_inputs: u64,
    outbox: VecDeque<NegotiatorEvent>,
}

impl PeerNegotiator {
    pub fn new(role: NegotiationRole, factory: Arc<dyn AgentFactory>) -> Self {
        Self {
            role,
            factory,
            config: None,
            receive_video: true,
            agent: None,
            agent_events: None,
            state: PeerConnectionState::New,
            channel_state: DataChannelState::Closed,
            remote_description_applied: false,
            pending_candidates: VecDeque::new(),
            tracks: Vec::new(),
            dropped_inputs: 0,
            outbox: VecDeque::new(),
        }
    }

    pub fn with_receive_video(mut self, receive_video: bool) -> Self {
        self.receive_video = receive_video;
        self
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> PeerConnectionState {
        self.state
    }

    pub fn data_channel_state(&self) -> DataChannelState {
        self.channel_state
    }

    pub fn has_peer(&self) -> bool {
        self.agent.is_some()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    pub fn dropped_inputs(&self) -> u64 {
        self.dropped_inputs
    }

    /// Replaces the ICE configuration used by the next [`Self::create_peer`].
    pub fn configure(&mut self, ice_servers: Vec<IceServerConfig>) {
        let mut config = AgentConfig::new(self.role, ice_servers);
        config.receive_video = self.receive_video;
        self.config = Some(config);
    }

    pub async fn create_peer(&mut self) -> Result<(), NegotiationError> {
        let config = self.config.clone().ok_or(NegotiationError::NotConfigured)?;
        if self.agent.is_some() {
            return Err(NegotiationError::PeerExists);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut agent = self.factory.create(&config, events_tx).await?;
        if let Err(err) = agent.create_data_channel(&config.data_channel_label).await {
            if let Err(close_err) = agent.close().await {
                tracing::debug!(target: "remotedesk::peer", error = %close_err, "closing half-built peer failed");
            }
            return Err(err);
        }

        tracing::info!(
            target: "remotedesk::peer",
            role = %self.role,
            ice_servers = config.ice_servers.len(),
            label = %config.data_channel_label,
            "peer connection created"
        );
        // Teardown events of the previous peer must not reach the new one.
        self.outbox.clear();
        self.agent = Some(agent);
        self.agent_events = Some(events_rx);
        self.state = PeerConnectionState::New;
        self.channel_state = DataChannelState::Connecting;
        self.remote_description_applied = false;
        Ok(())
    }

    pub async fn create_offer(&mut self) -> Result<(), NegotiationError> {
        if self.role != NegotiationRole::Offerer {
            return Err(NegotiationError::WrongRole {
                operation: "create offer",
                role: self.role,
            });
        }
        let agent = self.agent.as_mut().ok_or(NegotiationError::NoPeer)?;
        tracing::debug!(target: "remotedesk::peer", "creating offer");
        agent.create_offer().await
    }

    /// Applies the remote description, flushes queued candidates and, for a
    /// remote offer, starts the answer.
    pub async fn set_remote_description(
        &mut self,
        kind: SdpKind,
        sdp: &str,
    ) -> Result<(), NegotiationError> {
        let expected = match kind {
            SdpKind::Offer => NegotiationRole::Answerer,
            SdpKind::Answer => NegotiationRole::Offerer,
        };
        if self.role != expected {
            return Err(NegotiationError::WrongRole {
                operation: match kind {
                    SdpKind::Offer => "apply remote offer",
                    SdpKind::Answer => "apply remote answer",
                },
                role: self.role,
            });
        }
        if sdp.trim().is_empty() {
            return Err(NegotiationError::InvalidDescription(format!(
                "empty {} sdp",
                kind.as_str()
            )));
        }
        let agent = self.agent.as_mut().ok_or(NegotiationError::NoPeer)?;

        agent.set_remote_description(kind, sdp).await?;
        self.remote_description_applied = true;
        tracing::debug!(
            target: "remotedesk::peer",
            kind = kind.as_str(),
            queued = self.pending_candidates.len(),
            "remote description applied"
        );

        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(err) = agent.add_remote_candidate(&candidate).await {
                tracing::warn!(target: "remotedesk::peer", error = %err, "queued remote candidate rejected");
                self.outbox.push_back(NegotiatorEvent::CandidateRejected(err));
            }
        }

        if kind == SdpKind::Offer {
            agent.create_answer().await?;
        }
        Ok(())
    }

    /// Applies the candidate now when the remote description is in place,
    /// otherwise queues it.
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), NegotiationError> {
        if candidate.candidate.trim().is_empty() {
            tracing::debug!(target: "remotedesk::peer", "ignoring end-of-candidates marker");
            return Ok(());
        }
        match self.agent.as_mut() {
            Some(agent) if self.remote_description_applied => {
                agent.add_remote_candidate(&candidate).await
            }
            _ => {
                tracing::trace!(target: "remotedesk::peer", "queueing remote candidate");
                self.pending_candidates.push_back(candidate);
                Ok(())
            }
        }
    }

    /// Best effort: returns `false` and counts the drop unless the input data
    /// channel is open.
    pub async fn send_input_event(&mut self, data: Bytes) -> bool {
        let agent = match self.agent.as_mut() {
            Some(agent) if self.channel_state == DataChannelState::Open => agent,
            _ => {
                self.dropped_inputs += 1;
                tracing::trace!(
                    target: "remotedesk::peer",
                    channel = %self.channel_state,
                    dropped = self.dropped_inputs,
                    "dropping input event"
                );
                return false;
            }
        };
        match agent.send(data).await {
            Ok(()) => true,
            Err(err) => {
                self.dropped_inputs += 1;
                tracing::debug!(target: "remotedesk::peer", error = %err, "input send failed");
                false
            }
        }
    }

    /// Closes the data channel, then the agent, then forgets tracks and queued
    /// candidates. Safe to call repeatedly and before any peer exists.
    pub async fn close_peer(&mut self) {
        if let Some(mut agent) = self.agent.take() {
            if let Err(err) = agent.close_data_channel().await {
                tracing::debug!(target: "remotedesk::peer", error = %err, "closing data channel failed");
            }
            if let Err(err) = agent.close().await {
                tracing::debug!(target: "remotedesk::peer", error = %err, "closing peer connection failed");
            }
            tracing::info!(target: "remotedesk::peer", "peer connection closed");
        }
        self.agent_events = None;
        self.tracks.clear();
        self.pending_candidates.clear();
        self.remote_description_applied = false;

        if self.channel_state != DataChannelState::Closed {
            self.channel_state = DataChannelState::Closed;
            self.outbox
                .push_back(NegotiatorEvent::DataChannelStateChanged(DataChannelState::Closed));
        }
        if self.state != PeerConnectionState::Closed {
            self.state = PeerConnectionState::Closed;
            self.outbox
                .push_back(NegotiatorEvent::StateChanged(PeerConnectionState::Closed));
        }
    }

    /// Next notification. Pends forever while no peer exists and nothing is
    /// queued. Cancel safe.
    pub async fn next_event(&mut self) -> NegotiatorEvent {
        loop {
            if let Some(event) = self.outbox.pop_front() {
                return event;
            }
            let Some(events) = self.agent_events.as_mut() else {
                return std::future::pending().await;
            };
            match events.recv().await {
                Some(event) => {
                    if let Some(event) = self.handle_agent_event(event) {
                        return event;
                    }
                }
                None => self.agent_events = None,
            }
        }
    }

    fn handle_agent_event(&mut self, event: AgentEvent) -> Option<NegotiatorEvent> {
        match event {
            AgentEvent::LocalDescription { kind, sdp } => {
                tracing::debug!(target: "remotedesk::peer", kind = kind.as_str(), "local description ready");
                Some(NegotiatorEvent::LocalDescription { kind, sdp })
            }
            AgentEvent::LocalCandidate(candidate) => Some(NegotiatorEvent::LocalCandidate(candidate)),
            AgentEvent::ConnectionState(next) => {
                if !self.state.can_transition_to(next) {
                    if self.state != next {
                        tracing::warn!(
                            target: "remotedesk::peer",
                            from = %self.state,
                            to = %next,
                            "ignoring invalid peer state transition"
                        );
                    }
                    return None;
                }
                tracing::info!(target: "remotedesk::peer", from = %self.state, to = %next, "peer state changed");
                self.state = next;
                Some(NegotiatorEvent::StateChanged(next))
            }
            AgentEvent::GatheringComplete => {
                tracing::debug!(target: "remotedesk::peer", "ice gathering complete");
                Some(NegotiatorEvent::GatheringComplete)
            }
            AgentEvent::DataChannel(next) => {
                if self.channel_state == next {
                    return None;
                }
                tracing::debug!(target: "remotedesk::peer", from = %self.channel_state, to = %next, "data channel state changed");
                self.channel_state = next;
                Some(NegotiatorEvent::DataChannelStateChanged(next))
            }
            AgentEvent::Message(data) => Some(NegotiatorEvent::Message(data)),
            AgentEvent::Track(track) => {
                tracing::info!(target: "remotedesk::peer", id = %track.id, kind = %track.kind, "remote track added");
                self.tracks.push(track.clone());
                Some(NegotiatorEvent::TrackAdded(track))
            }
        }
    }
}

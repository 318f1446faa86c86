//! [`NegotiationAgent`] over the `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

use super::agent::{
    AgentConfig, AgentEvent, AgentFactory, IceCandidate, IceServerConfig, NegotiationAgent,
    SdpKind, TrackInfo,
};
use super::state::{DataChannelState, PeerConnectionState};
use super::{NegotiationError, NegotiationRole};

type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

#[derive(Debug, Default, Clone, Copy)]
pub struct RtcAgentFactory;

impl RtcAgentFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentFactory for RtcAgentFactory {
    async fn create(
        &self,
        config: &AgentConfig,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<Box<dyn NegotiationAgent>, NegotiationError> {
        let api = build_api()?;
        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(agent_error)?);
        let data_channel: ChannelSlot = Arc::new(Mutex::new(None));

        register_peer_handlers(&pc, &events);
        if config.role == NegotiationRole::Answerer {
            register_channel_adoption(&pc, &events, &data_channel, &config.data_channel_label);
        }
        if config.receive_video {
            pc.add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: Vec::new(),
                }),
            )
            .await
            .map_err(agent_error)?;
        }

        Ok(Box::new(RtcAgent {
            pc,
            role: config.role,
            events,
            data_channel,
        }))
    }
}

struct RtcAgent {
    pc: Arc<RTCPeerConnection>,
    role: NegotiationRole,
    events: mpsc::UnboundedSender<AgentEvent>,
    data_channel: ChannelSlot,
}

impl RtcAgent {
    fn channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.data_channel.lock().clone()
    }

    fn report_local_description(&self, kind: SdpKind, sdp: String) {
        let _ = self.events.send(AgentEvent::LocalDescription { kind, sdp });
    }
}

#[async_trait]
impl NegotiationAgent for RtcAgent {
    async fn create_data_channel(&mut self, label: &str) -> Result<(), NegotiationError> {
        if self.role == NegotiationRole::Answerer {
            tracing::debug!(target: "remotedesk::peer", label, "waiting for remote data channel");
            return Ok(());
        }
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let channel = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(agent_error)?;
        attach_channel_handlers(&channel, &self.events);
        *self.data_channel.lock() = Some(channel);
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<(), NegotiationError> {
        let offer = self.pc.create_offer(None).await.map_err(agent_error)?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(agent_error)?;
        self.report_local_description(SdpKind::Offer, sdp);
        Ok(())
    }

    async fn create_answer(&mut self) -> Result<(), NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(agent_error)?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(agent_error)?;
        self.report_local_description(SdpKind::Answer, sdp);
        Ok(())
    }

    async fn set_remote_description(&mut self, kind: SdpKind, sdp: &str) -> Result<(), NegotiationError> {
        let description = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp.to_string()),
            SdpKind::Answer => RTCSessionDescription::answer(sdp.to_string()),
        }
        .map_err(|err| NegotiationError::InvalidDescription(err.to_string()))?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|err| NegotiationError::InvalidDescription(err.to_string()))
    }

    async fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| NegotiationError::InvalidCandidate(err.to_string()))
    }

    async fn send(&mut self, data: Bytes) -> Result<(), NegotiationError> {
        let channel = self
            .channel()
            .ok_or_else(|| NegotiationError::Agent("input data channel not established".into()))?;
        let sent = match text_frame(&data) {
            Some(text) => channel.send_text(text.to_owned()).await,
            None => channel.send(&data).await,
        };
        sent.map(|_| ()).map_err(agent_error)
    }

    async fn close_data_channel(&mut self) -> Result<(), NegotiationError> {
        let channel = self.data_channel.lock().take();
        match channel {
            Some(channel) => channel.close().await.map_err(agent_error),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), NegotiationError> {
        self.pc.close().await.map_err(agent_error)
    }
}

/// Input events are JSON, so they travel as text frames; anything that is not
/// UTF-8 goes out as a binary frame.
fn text_frame(data: &Bytes) -> Option<&str> {
    std::str::from_utf8(data).ok()
}

fn build_api() -> Result<API, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(agent_error)?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine).map_err(agent_error)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn to_rtc_ice_server(server: &IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn register_peer_handlers(pc: &Arc<RTCPeerConnection>, events: &mpsc::UnboundedSender<AgentEvent>) {
    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(AgentEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    }));
                }
                Err(err) => {
                    tracing::warn!(target: "remotedesk::peer", error = %err, "failed to serialize local candidate");
                }
            }
        })
    }));

    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = state_events.clone();
        Box::pin(async move {
            tracing::debug!(target: "remotedesk::peer", ?state, "peer connection state changed");
            if let Some(state) = map_connection_state(state) {
                let _ = events.send(AgentEvent::ConnectionState(state));
            }
        })
    }));

    let gathering_events = events.clone();
    pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        let events = gathering_events.clone();
        Box::pin(async move {
            if state == RTCIceGathererState::Complete {
                let _ = events.send(AgentEvent::GatheringComplete);
            }
        })
    }));

    let track_events = events.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let events = track_events.clone();
        Box::pin(async move {
            let _ = events.send(AgentEvent::Track(TrackInfo {
                id: track.id(),
                kind: track.kind().to_string(),
                stream_id: track.stream_id(),
            }));
        })
    }));
}

/// Answerers take over the channel the offerer announces under `label`.
fn register_channel_adoption(
    pc: &Arc<RTCPeerConnection>,
    events: &mpsc::UnboundedSender<AgentEvent>,
    slot: &ChannelSlot,
    label: &str,
) {
    let events = events.clone();
    let slot = Arc::clone(slot);
    let label = label.to_string();
    pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
        let events = events.clone();
        let slot = Arc::clone(&slot);
        let label = label.clone();
        Box::pin(async move {
            if channel.label() != label {
                tracing::debug!(target: "remotedesk::peer", label = channel.label(), "ignoring unexpected data channel");
                return;
            }
            attach_channel_handlers(&channel, &events);
            *slot.lock() = Some(channel);
        })
    }));
}

fn attach_channel_handlers(channel: &Arc<RTCDataChannel>, events: &mpsc::UnboundedSender<AgentEvent>) {
    let open_events = events.clone();
    channel.on_open(Box::new(move || {
        let events = open_events.clone();
        Box::pin(async move {
            tracing::debug!(target: "remotedesk::peer", "input data channel open");
            let _ = events.send(AgentEvent::DataChannel(DataChannelState::Open));
        })
    }));

    let close_events = events.clone();
    channel.on_close(Box::new(move || {
        let events = close_events.clone();
        Box::pin(async move {
            let _ = events.send(AgentEvent::DataChannel(DataChannelState::Closed));
        })
    }));

    let message_events = events.clone();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let events = message_events.clone();
        Box::pin(async move {
            let _ = events.send(AgentEvent::Message(message.data));
        })
    }));
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn agent_error<E: std::fmt::Display>(err: E) -> NegotiationError {
    NegotiationError::Agent(err.to_string())
}

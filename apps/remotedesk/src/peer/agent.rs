//! Seam between [`PeerNegotiator`](super::PeerNegotiator) and the underlying
//! WebRTC library. Agents report everything through [`AgentEvent`]s on the
//! channel handed to [`AgentFactory::create`].

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::state::{DataChannelState, PeerConnectionState};
use super::{NegotiationError, NegotiationRole};
use crate::protocol::INPUT_CHANNEL_LABEL;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: None,
            credential: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, credential: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }

    pub fn default_stun() -> Self {
        Self::new(vec![DEFAULT_STUN_SERVER.to_string()])
    }
}

impl std::fmt::Debug for IceServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceServerConfig")
            .field("urls", &self.urls)
            .field("username", &self.username)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub role: NegotiationRole,
    pub ice_servers: Vec<IceServerConfig>,
    pub data_channel_label: String,
    /// Offer to receive one video stream from the remote host.
    pub receive_video: bool,
}

impl AgentConfig {
    pub fn new(role: NegotiationRole, ice_servers: Vec<IceServerConfig>) -> Self {
        Self {
            role,
            ice_servers,
            data_channel_label: INPUT_CHANNEL_LABEL.to_string(),
            receive_video: true,
        }
    }
}

/// One trickled ICE candidate. Absent association fields mean the agent infers
/// the media section from the candidate line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Empty `sdp_mid` and negative or out of range indexes are treated as
    /// absent.
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, sdp_mline_index: Option<i64>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.filter(|mid| !mid.is_empty()),
            sdp_mline_index: sdp_mline_index.and_then(|index| u16::try_from(index).ok()),
        }
    }

    /// Parses the body of an `ice` signal.
    pub fn from_signal_payload(payload: &Map<String, Value>) -> Result<Self, NegotiationError> {
        let candidate = payload
            .get("candidate")
            .and_then(Value::as_str)
            .ok_or_else(|| NegotiationError::InvalidCandidate("missing candidate".into()))?;
        let sdp_mid = payload
            .get("sdpMid")
            .and_then(Value::as_str)
            .map(str::to_string);
        let sdp_mline_index = payload.get("sdpMLineIndex").and_then(Value::as_i64);
        Ok(Self::new(candidate, sdp_mid, sdp_mline_index))
    }

    pub fn to_signal_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("candidate".into(), Value::String(self.candidate.clone()));
        payload.insert(
            "sdpMid".into(),
            self.sdp_mid.clone().map(Value::String).unwrap_or(Value::Null),
        );
        payload.insert(
            "sdpMLineIndex".into(),
            self.sdp_mline_index.map(Value::from).unwrap_or(Value::Null),
        );
        payload
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub kind: String,
    pub stream_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    LocalDescription { kind: SdpKind, sdp: String },
    LocalCandidate(IceCandidate),
    ConnectionState(PeerConnectionState),
    GatheringComplete,
    DataChannel(DataChannelState),
    Message(Bytes),
    Track(TrackInfo),
}

/// One peer connection plus its input data channel.
#[async_trait]
pub trait NegotiationAgent: Send {
    /// Offerers announce the channel; answerers adopt the one the remote side
    /// announces under the same label.
    async fn create_data_channel(&mut self, label: &str) -> Result<(), NegotiationError>;

    /// Creates and applies the local offer, then reports it as
    /// [`AgentEvent::LocalDescription`].
    async fn create_offer(&mut self) -> Result<(), NegotiationError>;

    async fn create_answer(&mut self) -> Result<(), NegotiationError>;

    async fn set_remote_description(&mut self, kind: SdpKind, sdp: &str) -> Result<(), NegotiationError>;

    async fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError>;

    async fn send(&mut self, data: Bytes) -> Result<(), NegotiationError>;

    async fn close_data_channel(&mut self) -> Result<(), NegotiationError>;

    async fn close(&mut self) -> Result<(), NegotiationError>;
}

#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(
        &self,
        config: &AgentConfig,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<Box<dyn NegotiationAgent>, NegotiationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sentinel_association_fields_become_absent() {
        let candidate = IceCandidate::new("candidate:1", Some(String::new()), Some(-1));
        assert_eq!(candidate.sdp_mid, None);
        assert_eq!(candidate.sdp_mline_index, None);

        let candidate = IceCandidate::new("candidate:1", Some("0".into()), Some(70_000));
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, None);
    }

    #[test]
    fn candidate_signal_payload_uses_wire_names() {
        let candidate = IceCandidate::new("candidate:1 1 udp 1 10.0.0.2 9 typ host", Some("0".into()), Some(0));
        let payload = Value::Object(candidate.to_signal_payload());
        assert_eq!(
            payload,
            json!({
                "candidate": "candidate:1 1 udp 1 10.0.0.2 9 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
            })
        );
        let parsed = IceCandidate::from_signal_payload(payload.as_object().unwrap()).unwrap();
        assert_eq!(parsed, candidate);
    }

    #[test]
    fn candidate_payload_without_candidate_is_rejected() {
        let payload = json!({"sdpMid": "0"});
        assert!(matches!(
            IceCandidate::from_signal_payload(payload.as_object().unwrap()),
            Err(NegotiationError::InvalidCandidate(_))
        ));
    }

    #[test]
    fn ice_server_debug_redacts_credential() {
        let server = IceServerConfig::new(vec!["turn:turn.example.com:3478".into()])
            .with_credentials("user", "hunter2");
        let rendered = format!("{server:?}");
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::agent::{AgentConfig, AgentEvent, AgentFactory, IceCandidate, NegotiationAgent, SdpKind};
use super::{NegotiationError, NegotiationRole};

pub const MOCK_OFFER_SDP: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
pub const MOCK_ANSWER_SDP: &str = "v=0\r\no=- 1865392215938613582 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

/// Every call a scripted agent received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCall {
    Create {
        role: NegotiationRole,
        receive_video: bool,
    },
    CreateDataChannel(String),
    CreateOffer,
    CreateAnswer,
    SetRemoteDescription {
        kind: SdpKind,
        sdp: String,
    },
    AddRemoteCandidate(IceCandidate),
    Send(Bytes),
    CloseDataChannel,
    Close,
}

#[derive(Default)]
struct ProbeState {
    calls: Vec<AgentCall>,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    agents_created: usize,
    fail_remote_description: bool,
    fail_candidate: bool,
}

/// Test-side view of the agents built by a [`ScriptedAgentFactory`].
#[derive(Clone, Default)]
pub struct AgentProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl AgentProbe {
    pub fn calls(&self) -> Vec<AgentCall> {
        self.state.lock().calls.clone()
    }

    /// Delivers `event` as if the most recently created agent raised it.
    /// Returns `false` when no agent is listening.
    pub fn emit(&self, event: AgentEvent) -> bool {
        self.state
            .lock()
            .events
            .as_ref()
            .is_some_and(|events| events.send(event).is_ok())
    }

    pub fn fail_next_remote_description(&self) {
        self.state.lock().fail_remote_description = true;
    }

    pub fn fail_next_candidate(&self) {
        self.state.lock().fail_candidate = true;
    }

    pub fn agents_created(&self) -> usize {
        self.state.lock().agents_created
    }

    fn record(&self, call: AgentCall) {
        self.state.lock().calls.push(call);
    }
}

/// Builds agents that answer immediately with canned descriptions and never
/// touch the network.
pub struct ScriptedAgentFactory {
    probe: AgentProbe,
}

impl ScriptedAgentFactory {
    pub fn new() -> (Self, AgentProbe) {
        let probe = AgentProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

#[async_trait]
impl AgentFactory for ScriptedAgentFactory {
    async fn create(
        &self,
        config: &AgentConfig,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<Box<dyn NegotiationAgent>, NegotiationError> {
        {
            let mut state = self.probe.state.lock();
            state.agents_created += 1;
            state.events = Some(events.clone());
            state.calls.push(AgentCall::Create {
                role: config.role,
                receive_video: config.receive_video,
            });
        }
        Ok(Box::new(ScriptedAgent {
            probe: self.probe.clone(),
            events,
        }))
    }
}

struct ScriptedAgent {
    probe: AgentProbe,
    events: mpsc::UnboundedSender<AgentEvent>,
}

impl ScriptedAgent {
    fn describe(&self, kind: SdpKind, sdp: &str) {
        let _ = self.events.send(AgentEvent::LocalDescription {
            kind,
            sdp: sdp.to_string(),
        });
    }
}

#[async_trait]
impl NegotiationAgent for ScriptedAgent {
    async fn create_data_channel(&mut self, label: &str) -> Result<(), NegotiationError> {
        self.probe.record(AgentCall::CreateDataChannel(label.to_string()));
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<(), NegotiationError> {
        self.probe.record(AgentCall::CreateOffer);
        self.describe(SdpKind::Offer, MOCK_OFFER_SDP);
        Ok(())
    }

    async fn create_answer(&mut self) -> Result<(), NegotiationError> {
        self.probe.record(AgentCall::CreateAnswer);
        self.describe(SdpKind::Answer, MOCK_ANSWER_SDP);
        Ok(())
    }

    async fn set_remote_description(&mut self, kind: SdpKind, sdp: &str) -> Result<(), NegotiationError> {
        self.probe.record(AgentCall::SetRemoteDescription {
            kind,
            sdp: sdp.to_string(),
        });
        let fail = std::mem::take(&mut self.probe.state.lock().fail_remote_description);
        if fail {
            return Err(NegotiationError::InvalidDescription(
                "scripted rejection".into(),
            ));
        }
        Ok(())
    }

    async fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        self.probe.record(AgentCall::AddRemoteCandidate(candidate.clone()));
        let fail = std::mem::take(&mut self.probe.state.lock().fail_candidate);
        if fail {
            return Err(NegotiationError::InvalidCandidate("scripted rejection".into()));
        }
        Ok(())
    }

    async fn send(&mut self, data: Bytes) -> Result<(), NegotiationError> {
        self.probe.record(AgentCall::Send(data));
        Ok(())
    }

    async fn close_data_channel(&mut self) -> Result<(), NegotiationError> {
        self.probe.record(AgentCall::CloseDataChannel);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), NegotiationError> {
        self.probe.record(AgentCall::Close);
        Ok(())
    }
}

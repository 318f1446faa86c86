//! Relay signaling: the channel protocol spoken over the relay socket and the
//! mapping of negotiation messages onto it.

use std::fmt;

use thiserror::Error;

use crate::transport::TransportError;

pub mod channel;
pub mod message;
pub mod relay;

pub use channel::{ChannelClient, HEARTBEAT_INTERVAL};
pub use message::{ChannelMessage, RealtimeCredentials};
pub use relay::{SIGNAL_EVENT, SignalEnvelope, SignalRelay};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("join rejected for topic {topic}: {reason}")]
    JoinRejected { topic: String, reason: String },
    #[error("not joined to realtime topic")]
    NotJoined,
    #[error("relay connection already active")]
    AlreadyConnected,
    #[error("invalid realtime credentials: {0}")]
    InvalidCredentials(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Disconnected,
    Connecting,
    Joining,
    Joined,
    Closing,
}

impl JoinState {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinState::Disconnected => "disconnected",
            JoinState::Connecting => "connecting",
            JoinState::Joining => "joining",
            JoinState::Joined => "joined",
            JoinState::Closing => "closing",
        }
    }
}

impl fmt::Display for JoinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Socket is up and the join request went out.
    Connected,
    Joined,
    SignalReceived(SignalEnvelope),
    Error(ChannelError),
    Disconnected,
}

use thiserror::Error;
use url::Url;

pub mod mock;
pub mod websocket;

pub use mock::{MockRemote, MockTransport};
pub use websocket::WebSocketTransport;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    Socket(String),
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport channel closed")]
    ChannelClosed,
}

/// Lifecycle and data notifications emitted by a [`RelayTransport`].
///
/// Every connection attempt ends with exactly one `Closed`, including failed
/// attempts, which report `Error` first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Text(String),
    Closed,
    Error(TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// One persistent duplex text connection to the relay.
///
/// Implementations never reconnect on their own; events are delivered on the
/// receiver handed out next to the transport at construction time.
pub trait RelayTransport: Send {
    fn connect(&mut self, request: ConnectRequest) -> Result<(), TransportError>;

    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Returns `false` when there was no connection to close. Safe to call
    /// repeatedly and from inside an event handler of the same connection.
    fn close(&mut self) -> bool;

    fn is_active(&self) -> bool;
}

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ConnectRequest, RelayTransport, TransportError, TransportEvent};

#[derive(Default)]
struct MockState {
    requests: Vec<ConnectRequest>,
    sent: Vec<String>,
    active: bool,
    close_calls: usize,
}

/// In-memory transport for exercising the relay protocol without a socket.
///
/// Nothing is emitted on `connect`; the paired [`MockRemote`] decides when the
/// connection comes up and what the relay says.
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub struct MockRemote {
    state: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>, MockRemote) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MockState::default()));
        let remote = MockRemote {
            state: Arc::clone(&state),
            events: events.clone(),
        };
        (Self { state, events }, events_rx, remote)
    }
}

impl RelayTransport for MockTransport {
    fn connect(&mut self, request: ConnectRequest) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.requests.push(request);
        state.active = true;
        Ok(())
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.active {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&mut self) -> bool {
        let mut state = self.state.lock();
        state.close_calls += 1;
        if !state.active {
            return false;
        }
        state.active = false;
        let _ = self.events.send(TransportEvent::Closed);
        true
    }

    fn is_active(&self) -> bool {
        self.state.lock().active
    }
}

impl MockRemote {
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Connected);
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Text(text.into()));
    }

    pub fn push_json(&self, value: &Value) {
        self.push_text(value.to_string());
    }

    /// Simulates the relay dropping the connection.
    pub fn fail(&self, error: TransportError) {
        self.state.lock().active = false;
        let _ = self.events.send(TransportEvent::Error(error));
        let _ = self.events.send(TransportEvent::Closed);
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.state.lock().requests.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Written frames decoded as JSON; frames that are not JSON are skipped.
    pub fn sent_json(&self) -> Vec<Value> {
        self.state
            .lock()
            .sent
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn take_sent_json(&self) -> Vec<Value> {
        let drained: Vec<String> = self.state.lock().sent.drain(..).collect();
        drained
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Broadcast event name that carries negotiation messages.
pub const SIGNAL_EVENT: &str = "signal";

const TYPE_KEY: &str = "type";

pub const SIGNAL_OFFER: &str = "offer";
pub const SIGNAL_ANSWER: &str = "answer";
pub const SIGNAL_ICE: &str = "ice";

/// Transport-agnostic signaling unit: a discriminator plus an opaque body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Map<String, Value>,
}

impl SignalEnvelope {
    pub fn new(kind: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Stateless mapping between [`SignalEnvelope`] and the broadcast body the
/// relay carries.
pub struct SignalRelay;

impl SignalRelay {
    /// Returns the broadcast event name and the body with the discriminator
    /// folded in.
    pub fn encode(envelope: &SignalEnvelope) -> (&'static str, Value) {
        let mut body = envelope.payload.clone();
        body.insert(TYPE_KEY.to_string(), Value::String(envelope.kind.clone()));
        (SIGNAL_EVENT, Value::Object(body))
    }

    /// Events other than [`SIGNAL_EVENT`] and bodies without a string
    /// discriminator yield `None`.
    pub fn decode(event: &str, body: &Value) -> Option<SignalEnvelope> {
        if event != SIGNAL_EVENT {
            tracing::trace!(target: "remotedesk::relay", event, "ignoring unrecognized broadcast event");
            return None;
        }
        let mut payload = body.as_object()?.clone();
        let kind = match payload.remove(TYPE_KEY)? {
            Value::String(kind) => kind,
            _ => return None,
        };
        Some(SignalEnvelope { kind, payload })
    }
}

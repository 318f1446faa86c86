use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use url::Url;

use super::ChannelError;

pub const REALTIME_PATH: &str = "/realtime/v1/websocket";
pub const PROTOCOL_VERSION: &str = "1.0.0";

pub const PHOENIX_TOPIC: &str = "phoenix";
pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_BROADCAST: &str = "broadcast";

/// Connection details for one relay topic. Copied into the channel client at
/// connect time and never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct RealtimeCredentials {
    pub endpoint: String,
    pub api_key: String,
    pub topic: String,
    pub signed_token: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

impl RealtimeCredentials {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            topic: topic.into(),
            signed_token: None,
            expires_at: None,
        }
    }

    pub fn with_signed_token(mut self, token: impl Into<String>) -> Self {
        self.signed_token = Some(token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Builds the websocket URL for the realtime endpoint, failing before any
    /// network activity when the credentials cannot work.
    pub fn websocket_url(&self) -> Result<Url, ChannelError> {
        if self.topic.trim().is_empty() {
            return Err(ChannelError::InvalidCredentials("topic is empty".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ChannelError::InvalidCredentials("api key is empty".into()));
        }

        let endpoint = self.endpoint.trim();
        let mut url = Url::parse(endpoint).map_err(|err| {
            ChannelError::InvalidCredentials(format!("invalid realtime endpoint {endpoint}: {err}"))
        })?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ChannelError::InvalidCredentials(format!(
                "realtime endpoint {endpoint} has no host"
            )));
        }
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(ChannelError::InvalidCredentials(format!(
                    "unsupported realtime endpoint scheme {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ChannelError::InvalidCredentials("invalid websocket scheme".into()))?;
        url.set_path(REALTIME_PATH);
        url.set_fragment(None);
        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("apikey", &self.api_key);
            query.append_pair("vsn", PROTOCOL_VERSION);
            if let Some(token) = self
                .signed_token
                .as_deref()
                .filter(|token| !token.trim().is_empty())
            {
                query.append_pair("token", token);
            }
        }
        Ok(url)
    }
}

impl fmt::Debug for RealtimeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeCredentials")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("topic", &self.topic)
            .field(
                "signed_token",
                &self.signed_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One relay frame: `{topic, event, payload, ref}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl ChannelMessage {
    pub fn join(topic: &str, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: Value::Object(Map::new()),
            reference: Some(reference),
        }
    }

    pub fn heartbeat(reference: String) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: Value::Object(Map::new()),
            reference: Some(reference),
        }
    }

    /// Double-wrapped broadcast: the outer frame says `broadcast`, the inner
    /// payload names the application event.
    pub fn broadcast(topic: &str, event: &str, payload: Value, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_BROADCAST.to_string(),
            payload: json!({
                "type": EVENT_BROADCAST,
                "event": event,
                "payload": payload,
            }),
            reference: Some(reference),
        }
    }

    pub fn to_text(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|err| ChannelError::Serialization(err.to_string()))
    }

    pub fn from_text(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text)
            .map_err(|err| ChannelError::Protocol(format!("malformed relay message: {err}")))
    }

    pub fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }

    /// `(event, payload)` carried inside a broadcast frame.
    pub fn broadcast_body(&self) -> Option<(&str, &Value)> {
        let event = self.payload.get("event")?.as_str()?;
        let payload = self.payload.get("payload")?;
        Some((event, payload))
    }
}

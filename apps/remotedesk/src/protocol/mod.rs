//! Messages carried on the input data channel once it is open.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const INPUT_CHANNEL_LABEL: &str = "input";

/// Remote-control input, serialized as one JSON object per data channel
/// message and discriminated by `t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum InputEvent {
    Move {
        x: f64,
        y: f64,
    },
    Click {
        x: f64,
        y: f64,
        button: i32,
    },
    Wheel {
        #[serde(rename = "deltaY")]
        delta_y: f64,
    },
    Key {
        #[serde(rename = "k")]
        key: String,
        #[serde(rename = "type")]
        action: String,
    },
}

impl InputEvent {
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

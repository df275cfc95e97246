use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Join,
    Ready,
    Offer,
    Answer,
    Ice,
    Leave,
}

/// Relay view of a signaling message. The payload is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub msg_type: SignalType,
    #[serde(default)]
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl SignalMessage {
    pub fn ready(call_id: &str) -> Self {
        Self {
            msg_type: SignalType::Ready,
            call_id: call_id.to_string(),
            from: None,
            to: None,
            payload: None,
        }
    }

    pub fn leave(call_id: &str, from: &str) -> Self {
        Self {
            msg_type: SignalType::Leave,
            call_id: call_id.to_string(),
            from: Some(from.to_string()),
            to: None,
            payload: None,
        }
    }
}

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::call::Role;
use crate::error::{CallError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Join,
    Ready,
    Offer,
    Answer,
    Ice,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// OFFER/ANSWER payload, `{"type": "offer", "sdp": "..."}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE payload in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalBody {
    Join,
    Ready,
    Offer(SessionDescription),
    Answer(SessionDescription),
    Ice(IceCandidate),
    Leave,
}

impl SignalBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            SignalBody::Join => MessageKind::Join,
            SignalBody::Ready => MessageKind::Ready,
            SignalBody::Offer(_) => MessageKind::Offer,
            SignalBody::Answer(_) => MessageKind::Answer,
            SignalBody::Ice(_) => MessageKind::Ice,
            SignalBody::Leave => MessageKind::Leave,
        }
    }
}

/// One signaling message. `from` is absent on relay-originated READY and
/// `to` is absent on broadcast-style JOIN/LEAVE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    pub call_id: String,
    pub from: Option<Role>,
    pub to: Option<Role>,
    pub body: SignalBody,
}

// flat JSON shape shared with the relay and browser peers
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(default)]
    call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

impl SignalingMessage {
    pub fn join(call_id: impl Into<String>, from: Role) -> Self {
        Self::broadcast(call_id, from, SignalBody::Join)
    }

    pub fn leave(call_id: impl Into<String>, from: Role) -> Self {
        Self::broadcast(call_id, from, SignalBody::Leave)
    }

    pub fn ready(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            from: None,
            to: None,
            body: SignalBody::Ready,
        }
    }

    pub fn offer(call_id: impl Into<String>, from: Role, sdp: SessionDescription) -> Self {
        Self::directed(call_id, from, SignalBody::Offer(sdp))
    }

    pub fn answer(call_id: impl Into<String>, from: Role, sdp: SessionDescription) -> Self {
        Self::directed(call_id, from, SignalBody::Answer(sdp))
    }

    pub fn ice(call_id: impl Into<String>, from: Role, candidate: IceCandidate) -> Self {
        Self::directed(call_id, from, SignalBody::Ice(candidate))
    }

    fn broadcast(call_id: impl Into<String>, from: Role, body: SignalBody) -> Self {
        Self {
            call_id: call_id.into(),
            from: Some(from),
            to: None,
            body,
        }
    }

    // addressed to the other role of the pair
    fn directed(call_id: impl Into<String>, from: Role, body: SignalBody) -> Self {
        Self {
            call_id: call_id.into(),
            from: Some(from),
            to: Some(from.peer()),
            body,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CallError::MalformedMessage(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CallError::MalformedMessage(e.to_string()))
    }

    fn to_wire(&self) -> std::result::Result<WireMessage, serde_json::Error> {
        let payload = match &self.body {
            SignalBody::Join | SignalBody::Ready | SignalBody::Leave => None,
            SignalBody::Offer(sdp) | SignalBody::Answer(sdp) => Some(serde_json::to_value(sdp)?),
            SignalBody::Ice(candidate) => Some(serde_json::to_value(candidate)?),
        };
        Ok(WireMessage {
            kind: self.kind(),
            call_id: self.call_id.clone(),
            from: self.from,
            to: self.to,
            payload,
        })
    }

    fn from_wire(wire: WireMessage) -> Result<Self> {
        let body = match wire.kind {
            MessageKind::Join => SignalBody::Join,
            MessageKind::Ready => SignalBody::Ready,
            MessageKind::Leave => SignalBody::Leave,
            MessageKind::Offer => SignalBody::Offer(payload_of(wire.kind, wire.payload)?),
            MessageKind::Answer => SignalBody::Answer(payload_of(wire.kind, wire.payload)?),
            MessageKind::Ice => SignalBody::Ice(payload_of(wire.kind, wire.payload)?),
        };
        Ok(Self {
            call_id: wire.call_id,
            from: wire.from,
            to: wire.to,
            body,
        })
    }
}

fn payload_of<T: serde::de::DeserializeOwned>(
    kind: MessageKind,
    payload: Option<serde_json::Value>,
) -> Result<T> {
    let value = payload
        .ok_or_else(|| CallError::MalformedMessage(format!("{:?} without payload", kind)))?;
    serde_json::from_value(value)
        .map_err(|e| CallError::MalformedMessage(format!("{:?} payload: {}", kind, e)))
}

impl Serialize for SignalingMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SignalingMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireMessage::deserialize(deserializer)?;
        Self::from_wire(wire).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn relay_ready_has_no_sender() {
        let msg = SignalingMessage::from_json(r#"{"type":"READY","callId":"call1"}"#).unwrap();
        assert_eq!(msg, SignalingMessage::ready("call1"));
        assert_eq!(msg.from, None);
    }

    #[test]
    fn offer_is_addressed_to_the_peer_role() {
        let msg = SignalingMessage::offer("call1", Role::A, SessionDescription::offer("v=0"));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "OFFER",
                "callId": "call1",
                "from": "A",
                "to": "B",
                "payload": {"type": "offer", "sdp": "v=0"}
            })
        );
    }

    #[test]
    fn join_and_leave_carry_neither_target_nor_payload() {
        for msg in [
            SignalingMessage::join("call1", Role::B),
            SignalingMessage::leave("call1", Role::B),
        ] {
            let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
            let obj = value.as_object().unwrap();
            assert!(!obj.contains_key("to"));
            assert!(!obj.contains_key("payload"));
            assert_eq!(obj["from"], "B");
        }
    }

    #[test]
    fn browser_ice_candidate_is_understood() {
        let text = r#"{
            "type": "ICE", "callId": "call1", "from": "B", "to": "A",
            "payload": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host",
                "sdpMid": "0", "sdpMLineIndex": 0, "usernameFragment": "uf"
            }
        }"#;
        let msg = SignalingMessage::from_json(text).unwrap();
        match msg.body {
            SignalBody::Ice(c) => {
                assert!(c.candidate.ends_with("typ host"));
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
                assert_eq!(c.username_fragment.as_deref(), Some("uf"));
            }
            other => panic!("unexpected body {:?}", other),
        }
        assert_eq!(msg.to, Some(Role::A));
    }

    #[test]
    fn null_sdp_mid_is_accepted() {
        let text = r#"{"type":"ICE","callId":"c","from":"A","to":"B",
            "payload":{"candidate":"candidate:2","sdpMid":null,"sdpMLineIndex":null}}"#;
        let msg = SignalingMessage::from_json(text).unwrap();
        assert_eq!(msg.body, SignalBody::Ice(IceCandidate::new("candidate:2")));
    }

    #[test]
    fn malformed_messages_are_rejected() {
        let cases = [
            "not json",
            r#"{"type":"PING","callId":"c"}"#,
            r#"{"type":"OFFER","callId":"c","from":"A","to":"B"}"#,
            r#"{"type":"ANSWER","callId":"c","from":"B","payload":{"sdp":"x"}}"#,
            r#"{"type":"JOIN","callId":"c","from":"C"}"#,
        ];
        for text in cases {
            match SignalingMessage::from_json(text) {
                Err(CallError::MalformedMessage(_)) => {}
                other => panic!("{} parsed as {:?}", text, other),
            }
        }
    }
}

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::*;

const MAX_PARTICIPANTS: usize = 2;

struct Peer {
    conn_id: String,
    tx: mpsc::Sender<String>,
}

/// Connected users and the two-seat calls they joined.
#[derive(Default)]
pub struct CallRegistry {
    // user id -> live connection
    peers: HashMap<String, Peer>,
    // call id -> participants
    calls: HashMap<String, HashSet<String>>,
}

/// A message the relay owes to `to`.
pub type Delivery = (String, SignalMessage);

impl CallRegistry {
    /// Register a connection for `user_id`. A newer connection replaces an
    /// older one; the returned id tells them apart on disconnect.
    pub fn connect(&mut self, user_id: &str, tx: mpsc::Sender<String>) -> String {
        let conn_id = xid::new().to_string();
        if self
            .peers
            .insert(user_id.to_string(), Peer { conn_id: conn_id.clone(), tx })
            .is_some()
        {
            info!("user {} reconnected, previous connection replaced", user_id);
        }
        conn_id
    }

    pub fn sender(&self, user_id: &str) -> Option<mpsc::Sender<String>> {
        self.peers.get(user_id).map(|p| p.tx.clone())
    }

    pub fn participants(&self, call_id: &str) -> usize {
        self.calls.get(call_id).map_or(0, HashSet::len)
    }

    pub fn route(&mut self, msg: SignalMessage) -> Vec<Delivery> {
        match msg.msg_type {
            SignalType::Join => self.join(msg),
            SignalType::Offer | SignalType::Answer | SignalType::Ice => self.forward(msg),
            SignalType::Leave => self.leave(msg),
            SignalType::Ready => {
                warn!("clients do not send READY, ignored");
                Vec::new()
            }
        }
    }

    fn join(&mut self, msg: SignalMessage) -> Vec<Delivery> {
        let Some(from) = msg.from else {
            warn!("JOIN without sender for call {}", msg.call_id);
            return Vec::new();
        };
        let participants = self.calls.entry(msg.call_id.clone()).or_default();
        if !participants.contains(&from) && participants.len() >= MAX_PARTICIPANTS {
            warn!("call {} is full, rejecting {}", msg.call_id, from);
            return Vec::new();
        }
        participants.insert(from.clone());
        info!("{} joined call {} ({} present)", from, msg.call_id, participants.len());

        if participants.len() < MAX_PARTICIPANTS {
            return Vec::new();
        }
        participants
            .iter()
            .map(|user| (user.clone(), SignalMessage::ready(&msg.call_id)))
            .collect()
    }

    // only between the two members of the same call
    fn forward(&self, msg: SignalMessage) -> Vec<Delivery> {
        let (Some(from), Some(to)) = (&msg.from, &msg.to) else {
            warn!("{:?} without sender or target dropped", msg.msg_type);
            return Vec::new();
        };
        let members = self.calls.get(&msg.call_id);
        if !members.is_some_and(|m| m.contains(from) && m.contains(to)) {
            warn!(
                "{:?} from {} to {} outside call {} dropped",
                msg.msg_type, from, to, msg.call_id
            );
            return Vec::new();
        }
        if !self.peers.contains_key(to) {
            warn!("{:?} target {} is not connected", msg.msg_type, to);
            return Vec::new();
        }
        vec![(to.clone(), msg)]
    }

    fn leave(&mut self, msg: SignalMessage) -> Vec<Delivery> {
        let Some(from) = msg.from.clone() else {
            return Vec::new();
        };
        let Some(participants) = self.calls.get_mut(&msg.call_id) else {
            return Vec::new();
        };
        if !participants.remove(&from) {
            return Vec::new();
        }
        info!("{} left call {}", from, msg.call_id);
        let rest: Vec<Delivery> = participants
            .iter()
            .map(|user| (user.clone(), msg.clone()))
            .collect();
        if participants.is_empty() {
            self.calls.remove(&msg.call_id);
        }
        rest
    }

    /// Drop the connection if it is still the current one for `user_id`, and
    /// leave every call the user was in.
    pub fn disconnect(&mut self, user_id: &str, conn_id: &str) -> Vec<Delivery> {
        match self.peers.get(user_id) {
            Some(peer) if peer.conn_id == conn_id => {
                self.peers.remove(user_id);
            }
            _ => {
                debug!("stale connection {} of {} closed", conn_id, user_id);
                return Vec::new();
            }
        }
        let joined: Vec<String> = self
            .calls
            .iter()
            .filter(|(_, users)| users.contains(user_id))
            .map(|(call_id, _)| call_id.clone())
            .collect();
        joined
            .into_iter()
            .flat_map(|call_id| self.leave(SignalMessage::leave(&call_id, user_id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> SignalMessage {
        serde_json::from_str(text).unwrap()
    }

    fn registry_with(users: &[&str]) -> (CallRegistry, Vec<mpsc::Receiver<String>>) {
        let mut registry = CallRegistry::default();
        let rxs = users
            .iter()
            .map(|user| {
                let (tx, rx) = mpsc::channel(8);
                registry.connect(user, tx);
                rx
            })
            .collect();
        (registry, rxs)
    }

    #[test]
    fn ready_goes_to_both_once_the_second_joins() {
        let (mut registry, _rxs) = registry_with(&["A", "B"]);
        assert!(registry
            .route(msg(r#"{"type":"JOIN","callId":"c1","from":"A"}"#))
            .is_empty());
        let mut out = registry.route(msg(r#"{"type":"JOIN","callId":"c1","from":"B"}"#));
        out.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            out,
            vec![
                ("A".to_string(), SignalMessage::ready("c1")),
                ("B".to_string(), SignalMessage::ready("c1")),
            ]
        );
    }

    #[test]
    fn third_participant_is_rejected() {
        let (mut registry, _rxs) = registry_with(&["A", "B", "C"]);
        registry.route(msg(r#"{"type":"JOIN","callId":"c1","from":"A"}"#));
        registry.route(msg(r#"{"type":"JOIN","callId":"c1","from":"B"}"#));
        assert!(registry
            .route(msg(r#"{"type":"JOIN","callId":"c1","from":"C"}"#))
            .is_empty());
        assert_eq!(registry.participants("c1"), 2);
    }

    #[test]
    fn directed_messages_follow_to() {
        let (mut registry, _rxs) = registry_with(&["A", "B"]);
        registry.route(msg(r#"{"type":"JOIN","callId":"c1","from":"A"}"#));
        registry.route(msg(r#"{"type":"JOIN","callId":"c1","from":"B"}"#));
        let offer = msg(
            r#"{"type":"OFFER","callId":"c1","from":"A","to":"B","payload":{"type":"offer","sdp":"v=0"}}"#,
        );
        assert_eq!(registry.route(offer.clone()), vec![("B".to_string(), offer)]);

        let lost = msg(r#"{"type":"ICE","callId":"c1","from":"A","to":"Z","payload":{"candidate":"x"}}"#);
        assert!(registry.route(lost).is_empty());
    }

    #[test]
    fn directed_messages_stay_inside_the_call() {
        let (mut registry, _rxs) = registry_with(&["A", "B", "C", "D"]);
        for join in [
            r#"{"type":"JOIN","callId":"c1","from":"A"}"#,
            r#"{"type":"JOIN","callId":"c1","from":"B"}"#,
            r#"{"type":"JOIN","callId":"c2","from":"C"}"#,
            r#"{"type":"JOIN","callId":"c2","from":"D"}"#,
        ] {
            registry.route(msg(join));
        }

        // C is connected but in another call
        let across = msg(r#"{"type":"ICE","callId":"c1","from":"C","to":"A","payload":{"candidate":"x"}}"#);
        assert!(registry.route(across).is_empty());
        let wrong_call = msg(r#"{"type":"ICE","callId":"c2","from":"A","to":"C","payload":{"candidate":"x"}}"#);
        assert!(registry.route(wrong_call).is_empty());
        let no_call = msg(r#"{"type":"ANSWER","callId":"c9","from":"A","to":"B","payload":{"type":"answer","sdp":"v=0"}}"#);
        assert!(registry.route(no_call).is_empty());
        let anonymous = msg(r#"{"type":"ICE","callId":"c1","to":"B","payload":{"candidate":"x"}}"#);
        assert!(registry.route(anonymous).is_empty());

        let inside = msg(r#"{"type":"ICE","callId":"c2","from":"D","to":"C","payload":{"candidate":"x"}}"#);
        assert_eq!(registry.route(inside.clone()), vec![("C".to_string(), inside)]);
    }

    #[test]
    fn leave_and_disconnect_notify_the_other_seat() {
        let (mut registry, _rxs) = registry_with(&["A", "B"]);
        registry.route(msg(r#"{"type":"JOIN","callId":"c1","from":"A"}"#));
        registry.route(msg(r#"{"type":"JOIN","callId":"c1","from":"B"}"#));

        let out = registry.route(SignalMessage::leave("c1", "A"));
        assert_eq!(out, vec![("B".to_string(), SignalMessage::leave("c1", "A"))]);
        assert_eq!(registry.participants("c1"), 1);

        registry.route(msg(r#"{"type":"JOIN","callId":"c1","from":"A"}"#));
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.connect("B", tx);
        // the replaced connection closing changes nothing
        assert!(registry.disconnect("B", "old-conn").is_empty());
        let out = registry.disconnect("B", &conn);
        assert_eq!(out, vec![("A".to_string(), SignalMessage::leave("c1", "B"))]);
        assert!(registry.sender("B").is_none());
    }
}

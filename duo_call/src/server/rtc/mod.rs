pub mod rtc_client;
pub mod traits;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{CallError, Result};
use crate::msg_center::signaling_msgs::{IceCandidate, SessionDescription};
use crate::server::data::{MediaTrack, RemoteTrack};
use crate::{debug, error, info, warn};

pub use rtc_client::WebRtcEngine;
pub use traits::PeerEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// Disconnected, failed and closed all end the Session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    ConnectionState(PeerState),
}

/// Raw counters read from the engine; the stats sampler turns two of these
/// into a `StatsSnapshot`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub round_trip_time_ms: Option<f64>,
    /// Local candidate type of the selected pair: host, srflx, prflx, relay.
    pub path_type: Option<String>,
}

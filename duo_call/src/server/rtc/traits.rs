use super::*;

/// Capability interface of the peer media/transport engine. Engine-side
/// events (local candidates, remote tracks, connection state) are delivered
/// on the `EngineEvent` receiver handed out when the engine is built.
#[async_trait]
pub trait PeerEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Attach an outgoing track. The first video track becomes the bound
    /// video sender.
    async fn add_local_track(&self, track: &MediaTrack) -> Result<()>;
    /// Swap the track bound to the video sender without renegotiation.
    async fn replace_video_track(&self, track: &MediaTrack) -> Result<()>;

    async fn get_stats(&self) -> Result<EngineStats>;
    async fn close(&self) -> Result<()>;
}

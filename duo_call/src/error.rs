use thiserror::Error;

pub type Result<T> = std::result::Result<T, CallError>;

#[derive(Debug, Error)]
pub enum CallError {
    /// Send attempted while the signaling channel is not open.
    #[error("signaling channel not open, message dropped")]
    ChannelNotReady,

    #[error("signaling channel already connected, use a fresh adapter")]
    AlreadyConnected,

    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),

    /// The peer engine refused a description or candidate.
    #[error("negotiation rejected: {0}")]
    NegotiationRejected(String),

    #[error("peer engine failure: {0}")]
    EngineFailure(String),

    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The coordinator behind a `CallHandle` has exited.
    #[error("call session is no longer running")]
    SessionClosed,

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("invalid signaling url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Engine(#[from] webrtc::Error),
}

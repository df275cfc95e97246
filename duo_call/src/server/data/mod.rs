use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Result;
use crate::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    pub fn kind(self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

struct TrackInner {
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
}

/// Handle to a locally captured track. Clones share the enabled flag and
/// the ended signal with the capture pipeline that produced it.
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    source: TrackSource,
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(source: TrackSource) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            inner: Arc::new(TrackInner {
                enabled: AtomicBool::new(true),
                ended,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn kind(&self) -> TrackKind {
        self.source.kind()
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stop capture. Idempotent; wakes every `ended()` waiter.
    pub fn stop(&self) {
        self.inner.ended.send_replace(true);
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolves once the track is stopped, locally or by the capture source.
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        // the sender lives in `inner`, which `self` keeps alive
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("enabled", &self.enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Metadata of a track received from the remote party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Camera and microphone captured together at call entry.
#[derive(Debug, Clone)]
pub struct LocalMedia {
    pub camera: MediaTrack,
    pub microphone: MediaTrack,
}

/// Device capture capability. Failures are `CallError::DeviceUnavailable`.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn capture_user_media(&self) -> Result<LocalMedia>;
    async fn capture_screen(&self) -> Result<MediaTrack>;
}

/// The user-facing rendering surface.
pub trait MediaSurface: Send + Sync {
    fn show_local(&self, track: &MediaTrack);
    fn show_remote(&self, track: &RemoteTrack);
    /// Blank both the local preview and the remote view.
    fn clear(&self);
}

/// Capture that hands out tracks without a frame source. Used by the
/// headless client, which only exercises signaling and negotiation.
#[derive(Debug, Default)]
pub struct SyntheticDevices;

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn capture_user_media(&self) -> Result<LocalMedia> {
        Ok(LocalMedia {
            camera: MediaTrack::new(TrackSource::Camera),
            microphone: MediaTrack::new(TrackSource::Microphone),
        })
    }

    async fn capture_screen(&self) -> Result<MediaTrack> {
        Ok(MediaTrack::new(TrackSource::Screen))
    }
}

#[derive(Debug, Default)]
pub struct LogSurface;

impl MediaSurface for LogSurface {
    fn show_local(&self, track: &MediaTrack) {
        info!("local preview -> {:?} {}", track.source(), track.id());
    }

    fn show_remote(&self, track: &RemoteTrack) {
        info!("remote view -> {:?} {} ({})", track.kind, track.id, track.stream_id);
    }

    fn clear(&self) {
        info!("video surfaces cleared");
    }
}

//! In-memory collaborators for coordinator and track tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use super::coordinator::{CallParts, Coordinator};
use super::{Role, Session};
use crate::error::{CallError, Result};
use crate::msg_center::msg_bus::CallHandle;
use crate::msg_center::signaling_msgs::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
use crate::server::data::{
    LocalMedia, MediaDevices, MediaSurface, MediaTrack, RemoteTrack, TrackSource,
};
use crate::server::rtc::{EngineEvent, EngineStats, PeerEngine};
use crate::server::signal_cli::{ChannelEvent, SignalingChannel};

pub const OFFER_SDP: &str = "v=0 fake-offer";
pub const ANSWER_SDP: &str = "v=0 fake-answer";

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    AddTrack(TrackSource),
    ReplaceVideo(String),
    Close,
}

#[derive(Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<EngineCall>>,
    stats: Mutex<EngineStats>,
    reject_remote: AtomicBool,
    fail_replace: AtomicBool,
    fail_add_track: AtomicBool,
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn set_stats(&self, stats: EngineStats) {
        *self.stats.lock().unwrap() = stats;
    }

    pub fn reject_remote(&self, reject: bool) {
        self.reject_remote.store(reject, Ordering::SeqCst);
    }

    pub fn fail_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::SeqCst);
    }

    pub fn fail_add_track(&self, fail: bool) {
        self.fail_add_track.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerEngine for FakeEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(EngineCall::CreateOffer);
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(EngineCall::CreateAnswer);
        Ok(SessionDescription::answer(ANSWER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(EngineCall::SetLocal(desc.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(CallError::NegotiationRejected("fake rejects".to_string()));
        }
        self.record(EngineCall::SetRemote(desc.sdp_type));
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(EngineCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_local_track(&self, track: &MediaTrack) -> Result<()> {
        if self.fail_add_track.load(Ordering::SeqCst) {
            return Err(CallError::EngineFailure("fake add track failure".to_string()));
        }
        self.record(EngineCall::AddTrack(track.source()));
        Ok(())
    }

    async fn replace_video_track(&self, track: &MediaTrack) -> Result<()> {
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(CallError::EngineFailure("fake replace failure".to_string()));
        }
        self.record(EngineCall::ReplaceVideo(track.id().to_string()));
        Ok(())
    }

    async fn get_stats(&self) -> Result<EngineStats> {
        Ok(self.stats.lock().unwrap().clone())
    }

    async fn close(&self) -> Result<()> {
        self.record(EngineCall::Close);
        Ok(())
    }
}

pub struct FakeChannel {
    sent: Mutex<Vec<SignalingMessage>>,
    open: AtomicBool,
    closed: AtomicBool,
}

impl Default for FakeChannel {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take_sent(&self) -> Vec<SignalingMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SignalingChannel for FakeChannel {
    fn send(&self, message: &SignalingMessage) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CallError::ChannelNotReady);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeDevices {
    fail_user_media: AtomicBool,
    hold_screen: AtomicBool,
    screen_gate: Notify,
    user_media: Mutex<Option<LocalMedia>>,
    screens: Mutex<Vec<MediaTrack>>,
}

impl FakeDevices {
    pub fn failing() -> Self {
        let devices = Self::default();
        devices.fail_user_media.store(true, Ordering::SeqCst);
        devices
    }

    /// Park screen captures until `release_screen`.
    pub fn hold_screen(&self) {
        self.hold_screen.store(true, Ordering::SeqCst);
    }

    pub fn release_screen(&self) {
        self.hold_screen.store(false, Ordering::SeqCst);
        self.screen_gate.notify_waiters();
    }

    pub fn user_media(&self) -> Option<LocalMedia> {
        self.user_media.lock().unwrap().clone()
    }

    pub fn screens(&self) -> Vec<MediaTrack> {
        self.screens.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn capture_user_media(&self) -> Result<LocalMedia> {
        if self.fail_user_media.load(Ordering::SeqCst) {
            return Err(CallError::DeviceUnavailable("no camera".to_string()));
        }
        let media = LocalMedia {
            camera: MediaTrack::new(TrackSource::Camera),
            microphone: MediaTrack::new(TrackSource::Microphone),
        };
        *self.user_media.lock().unwrap() = Some(media.clone());
        Ok(media)
    }

    async fn capture_screen(&self) -> Result<MediaTrack> {
        if self.hold_screen.load(Ordering::SeqCst) {
            self.screen_gate.notified().await;
        }
        let track = MediaTrack::new(TrackSource::Screen);
        self.screens.lock().unwrap().push(track.clone());
        Ok(track)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Local(TrackSource),
    Remote(String),
    Clear,
}

#[derive(Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<SurfaceEvent>>,
}

impl RecordingSurface {
    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl MediaSurface for RecordingSurface {
    fn show_local(&self, track: &MediaTrack) {
        self.events
            .lock()
            .unwrap()
            .push(SurfaceEvent::Local(track.source()));
    }

    fn show_remote(&self, track: &RemoteTrack) {
        self.events
            .lock()
            .unwrap()
            .push(SurfaceEvent::Remote(track.id.clone()));
    }

    fn clear(&self) {
        self.events.lock().unwrap().push(SurfaceEvent::Clear);
    }
}

/// A coordinator wired to fakes, plus the levers to drive it.
pub struct Harness {
    pub coordinator: Coordinator,
    pub handle: CallHandle,
    pub engine: Arc<FakeEngine>,
    pub channel: Arc<FakeChannel>,
    pub devices: Arc<FakeDevices>,
    pub surface: Arc<RecordingSurface>,
    pub channel_tx: mpsc::Sender<ChannelEvent>,
    pub engine_tx: mpsc::Sender<EngineEvent>,
}

impl Harness {
    pub fn new(role: Role) -> Self {
        Self::with_devices(role, FakeDevices::default())
    }

    pub fn with_devices(role: Role, devices: FakeDevices) -> Self {
        let engine = Arc::new(FakeEngine::default());
        let channel = Arc::new(FakeChannel::default());
        let devices = Arc::new(devices);
        let surface = Arc::new(RecordingSurface::default());
        let (channel_tx, channel_events) = mpsc::channel(64);
        let (engine_tx, engine_events) = mpsc::channel(64);

        let (coordinator, handle) = Coordinator::new(
            Session::new("call1", role),
            CallParts {
                engine: engine.clone(),
                engine_events,
                channel: channel.clone(),
                channel_events,
                devices: devices.clone(),
                surface: surface.clone(),
                stats_interval: Duration::from_secs(1),
            },
        );
        Self {
            coordinator,
            handle,
            engine,
            channel,
            devices,
            surface,
            channel_tx,
            engine_tx,
        }
    }
}

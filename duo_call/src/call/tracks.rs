use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::*;
use crate::error::Result;
use crate::msg_center::msg_bus::CallEvent;
use crate::server::data::{LocalMedia, MediaDevices, MediaSurface, MediaTrack};
use crate::server::rtc::PeerEngine;

/// Outgoing tracks of one session. The bound video track is the screen
/// track while one exists, the camera track otherwise.
#[derive(Debug)]
pub struct TrackSet {
    camera: MediaTrack,
    microphone: MediaTrack,
    screen: Option<MediaTrack>,
}

impl TrackSet {
    pub fn new(media: LocalMedia) -> Self {
        Self {
            camera: media.camera,
            microphone: media.microphone,
            screen: None,
        }
    }

    pub fn camera(&self) -> &MediaTrack {
        &self.camera
    }

    pub fn microphone(&self) -> &MediaTrack {
        &self.microphone
    }

    pub fn screen(&self) -> Option<&MediaTrack> {
        self.screen.as_ref()
    }

    pub fn active_video(&self) -> &MediaTrack {
        self.screen.as_ref().unwrap_or(&self.camera)
    }

    pub fn muted(&self) -> bool {
        !self.microphone.enabled()
    }

    pub fn camera_off(&self) -> bool {
        !self.camera.enabled()
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    fn stop_all(&self) {
        self.camera.stop();
        self.microphone.stop();
        if let Some(screen) = &self.screen {
            screen.stop();
        }
    }
}

/// Mute, camera and screen-share operations on the live peer connection.
/// Substitution goes through the video sender; it never renegotiates.
pub struct TrackController {
    tracks: Option<TrackSet>,
    engine: Arc<dyn PeerEngine>,
    devices: Arc<dyn MediaDevices>,
    surface: Arc<dyn MediaSurface>,
    events: mpsc::UnboundedSender<CallEvent>,
    // in-flight screen capture and the number it was started under
    capture: Option<(u64, JoinHandle<()>)>,
    capture_seq: u64,
    // waits for the bound screen track to end
    screen_hook: Option<JoinHandle<()>>,
}

impl TrackController {
    pub fn new(
        engine: Arc<dyn PeerEngine>,
        devices: Arc<dyn MediaDevices>,
        surface: Arc<dyn MediaSurface>,
        events: mpsc::UnboundedSender<CallEvent>,
    ) -> Self {
        Self {
            tracks: None,
            engine,
            devices,
            surface,
            events,
            capture: None,
            capture_seq: 0,
            screen_hook: None,
        }
    }

    pub fn tracks(&self) -> Option<&TrackSet> {
        self.tracks.as_ref()
    }

    pub fn muted(&self) -> bool {
        self.tracks.as_ref().is_some_and(TrackSet::muted)
    }

    pub fn camera_off(&self) -> bool {
        self.tracks.as_ref().is_some_and(TrackSet::camera_off)
    }

    pub fn screen_sharing(&self) -> bool {
        self.tracks.as_ref().is_some_and(TrackSet::screen_sharing)
    }

    /// Bind freshly captured camera and microphone to the peer connection.
    /// On failure both tracks are stopped and nothing is kept.
    pub async fn attach(&mut self, media: LocalMedia) -> Result<()> {
        if let Some(old) = self.tracks.take() {
            warn!("local media attached twice, stopping the previous tracks");
            old.stop_all();
        }
        let tracks = TrackSet::new(media);
        for track in [tracks.microphone(), tracks.camera()] {
            if let Err(e) = self.engine.add_local_track(track).await {
                tracks.stop_all();
                return Err(e);
            }
        }
        self.surface.show_local(tracks.camera());
        self.tracks = Some(tracks);
        Ok(())
    }

    pub fn toggle_mute(&mut self) {
        let Some(tracks) = &self.tracks else {
            warn!("toggle mute before local media is ready, ignored");
            return;
        };
        let mic = tracks.microphone();
        mic.set_enabled(!mic.enabled());
        info!("microphone {}", if mic.enabled() { "unmuted" } else { "muted" });
    }

    pub fn toggle_camera(&mut self) {
        let Some(tracks) = &self.tracks else {
            warn!("toggle camera before local media is ready, ignored");
            return;
        };
        if tracks.screen_sharing() {
            warn!("camera is frozen while screen sharing, toggle ignored");
            return;
        }
        let camera = tracks.camera();
        camera.set_enabled(!camera.enabled());
        info!("camera {}", if camera.enabled() { "on" } else { "off" });
    }

    /// Kick off screen capture. The result comes back as
    /// `CallEvent::ScreenCaptured`.
    pub fn start_screen_share(&mut self) {
        if self.tracks.is_none() {
            warn!("screen share before local media is ready, ignored");
            return;
        }
        if self.screen_sharing() || self.capture.is_some() {
            debug!("screen share already active or pending");
            return;
        }
        self.capture_seq += 1;
        let capture = self.capture_seq;
        let devices = Arc::clone(&self.devices);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let result = devices.capture_screen().await;
            let _ = events.send(CallEvent::ScreenCaptured { capture, result });
        });
        self.capture = Some((capture, task));
    }

    /// Bind the result of capture `capture`. Results of a capture that was
    /// cancelled in the meantime are stopped and dropped.
    pub async fn on_screen_captured(&mut self, capture: u64, result: Result<MediaTrack>) {
        match &self.capture {
            Some((pending, _)) if *pending == capture => self.capture = None,
            _ => {
                debug!("result of cancelled screen capture {} dropped", capture);
                if let Ok(track) = result {
                    track.stop();
                }
                return;
            }
        }
        let track = match result {
            Ok(track) => track,
            Err(e) => {
                error!("screen capture failed: {}", e);
                return;
            }
        };
        if self.tracks.is_none() || self.screen_sharing() {
            debug!("discarding screen track {}", track.id());
            track.stop();
            return;
        }
        if let Err(e) = self.engine.replace_video_track(&track).await {
            error!("failed to bind screen track: {}", e);
            track.stop();
            return;
        }

        self.surface.show_local(&track);
        let hook_track = track.clone();
        let events = self.events.clone();
        self.screen_hook = Some(tokio::spawn(async move {
            hook_track.ended().await;
            let _ = events.send(CallEvent::ScreenEnded(hook_track.id().to_string()));
        }));
        info!("screen share started with track {}", track.id());
        if let Some(tracks) = self.tracks.as_mut() {
            tracks.screen = Some(track);
        }
    }

    /// Capture ended outside our control, e.g. stopped from the OS.
    pub async fn on_screen_ended(&mut self, track_id: &str) {
        let current = self
            .tracks
            .as_ref()
            .and_then(TrackSet::screen)
            .map(|t| t.id() == track_id);
        if current == Some(true) {
            info!("screen capture ended externally");
            self.stop_screen_share().await;
        } else {
            debug!("stale screen end for {}", track_id);
        }
    }

    /// Swap the camera back in. If the sender refuses the camera, the screen
    /// stays bound and keeps sharing.
    pub async fn stop_screen_share(&mut self) {
        if let Some((capture, task)) = self.capture.take() {
            debug!("cancelling pending screen capture {}", capture);
            task.abort();
        }
        let Some(tracks) = self.tracks.as_mut() else {
            return;
        };
        if tracks.screen.is_none() {
            return;
        }
        if let Err(e) = self.engine.replace_video_track(&tracks.camera).await {
            error!("failed to restore camera track, still sharing: {}", e);
            return;
        }
        if let Some(hook) = self.screen_hook.take() {
            hook.abort();
        }
        self.surface.show_local(&tracks.camera);
        if let Some(screen) = tracks.screen.take() {
            screen.stop();
        }
        info!("screen share stopped");
    }

    /// Stop every local track and forget them. Pending capture is cancelled.
    pub fn release(&mut self) {
        if let Some((_, task)) = self.capture.take() {
            task.abort();
        }
        if let Some(hook) = self.screen_hook.take() {
            hook.abort();
        }
        if let Some(tracks) = self.tracks.take() {
            tracks.stop_all();
            debug!("local tracks released");
        }
    }
}

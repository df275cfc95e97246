use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, watch};

use super::*;
use crate::error::{CallError, Result};
use crate::msg_center::msg_bus::{
    CallCommand, CallEvent, CallHandle, CallStatus, DEFAULT_CHANNEL_SIZE,
};
use crate::msg_center::signaling_msgs::{
    IceCandidate, SessionDescription, SignalBody, SignalingMessage,
};
use crate::server::data::{LocalMedia, MediaDevices, MediaSurface};
use crate::server::rtc::{EngineEvent, PeerEngine, PeerState};
use crate::server::signal_cli::{ChannelEvent, SignalingChannel};

/// Collaborators injected into a coordinator.
pub struct CallParts {
    pub engine: Arc<dyn PeerEngine>,
    pub engine_events: mpsc::Receiver<EngineEvent>,
    pub channel: Arc<dyn SignalingChannel>,
    pub channel_events: mpsc::Receiver<ChannelEvent>,
    pub devices: Arc<dyn MediaDevices>,
    pub surface: Arc<dyn MediaSurface>,
    pub stats_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    LocalLeave,
    RemoteLeave,
    EngineFailure(PeerState),
}

/// Single actor driving one Session: negotiation, candidate buffering,
/// lifecycle and track substitution. Every input is handled to completion
/// before the next one is looked at.
pub struct Coordinator {
    session: Session,
    engine: Arc<dyn PeerEngine>,
    channel: Arc<dyn SignalingChannel>,
    devices: Arc<dyn MediaDevices>,
    surface: Arc<dyn MediaSurface>,

    engine_events: Option<mpsc::Receiver<EngineEvent>>,
    channel_events: Option<mpsc::Receiver<ChannelEvent>>,
    commands: Option<mpsc::Receiver<CallCommand>>,
    internal_rx: mpsc::UnboundedReceiver<CallEvent>,

    tracks: TrackController,
    stats: StatsSampler,
    status: watch::Sender<CallStatus>,

    pending_candidates: VecDeque<IceCandidate>,
    remote_description_set: bool,
    media_ready: bool,
    channel_connected: bool,
    joined: bool,
    // local media could not be set up; `run` returns it
    setup_error: Option<CallError>,
}

async fn recv_or_park<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Coordinator {
    pub fn new(session: Session, parts: CallParts) -> (Self, CallHandle) {
        let (command_tx, command_rx) = mpsc::channel(DEFAULT_CHANNEL_SIZE);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(CallStatus::default());
        let stats = StatsSampler::new(parts.stats_interval);
        let handle = CallHandle::new(command_tx, status_rx, stats.board());
        let tracks = TrackController::new(
            Arc::clone(&parts.engine),
            Arc::clone(&parts.devices),
            Arc::clone(&parts.surface),
            internal_tx,
        );

        let coordinator = Self {
            session,
            engine: parts.engine,
            channel: parts.channel,
            devices: parts.devices,
            surface: parts.surface,
            engine_events: Some(parts.engine_events),
            channel_events: Some(parts.channel_events),
            commands: Some(command_rx),
            internal_rx,
            tracks,
            stats,
            status: status_tx,
            pending_candidates: VecDeque::new(),
            remote_description_set: false,
            media_ready: false,
            channel_connected: false,
            joined: false,
            setup_error: None,
        };
        (coordinator, handle)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn pending_candidates(&self) -> impl Iterator<Item = &IceCandidate> {
        self.pending_candidates.iter()
    }

    pub fn tracks(&self) -> &TrackController {
        &self.tracks
    }

    /// Capture local media and process events until the Session ends.
    /// A failure to capture or attach local media is returned with the
    /// Session still IDLE.
    pub async fn run(mut self) -> Result<()> {
        let devices = Arc::clone(&self.devices);
        let capture = async move { devices.capture_user_media().await };
        tokio::pin!(capture);
        let mut capturing = true;

        info!(
            "session {} running as {} in call {}",
            self.session.session_id(),
            self.session.local_role(),
            self.session.call_id()
        );

        while !self.session.is_ended() {
            let event = select! {
                media = &mut capture, if capturing => {
                    capturing = false;
                    match media {
                        Ok(media) => Some(CallEvent::MediaReady(media)),
                        Err(e) => {
                            error!("local media capture failed: {}", e);
                            self.abort_setup().await;
                            return Err(e);
                        }
                    }
                }
                ev = self.internal_rx.recv() => ev,
                ev = recv_or_park(&mut self.commands) => match ev {
                    Some(cmd) => Some(CallEvent::Command(cmd)),
                    None => {
                        debug!("all call handles dropped");
                        self.commands = None;
                        None
                    }
                },
                ev = recv_or_park(&mut self.channel_events) => match ev {
                    Some(ev) => Some(CallEvent::Channel(ev)),
                    None => {
                        self.channel_events = None;
                        None
                    }
                },
                ev = recv_or_park(&mut self.engine_events) => match ev {
                    Some(ev) => Some(CallEvent::Engine(ev)),
                    None => {
                        warn!("peer engine event stream ended");
                        self.engine_events = None;
                        None
                    }
                },
            };
            if let Some(event) = event {
                self.handle_event(event).await;
            }
            if let Some(e) = self.setup_error.take() {
                return Err(e);
            }
        }
        info!("session {} finished", self.session.session_id());
        Ok(())
    }

    /// Handle one input to completion.
    pub async fn handle_event(&mut self, event: CallEvent) {
        if self.session.is_ended() {
            self.discard_after_end(event);
            return;
        }
        match event {
            CallEvent::MediaReady(media) => self.on_media_ready(media).await,
            CallEvent::Channel(ev) => self.on_channel_event(ev).await,
            CallEvent::Engine(ev) => self.on_engine_event(ev).await,
            CallEvent::ScreenCaptured { capture, result } => {
                self.tracks.on_screen_captured(capture, result).await
            }
            CallEvent::ScreenEnded(id) => self.tracks.on_screen_ended(&id).await,
            CallEvent::Command(cmd) => self.on_command(cmd).await,
        }
        self.publish_status();
    }

    fn discard_after_end(&self, event: CallEvent) {
        match event {
            CallEvent::MediaReady(media) => {
                media.camera.stop();
                media.microphone.stop();
            }
            CallEvent::ScreenCaptured {
                result: Ok(track), ..
            } => track.stop(),
            other => debug!("session ended, ignoring {:?}", other),
        }
    }

    async fn on_media_ready(&mut self, media: LocalMedia) {
        if let Err(e) = self.tracks.attach(media).await {
            error!("failed to attach local media: {}", e);
            self.abort_setup().await;
            self.setup_error = Some(e);
            return;
        }
        self.media_ready = true;
        debug!("local media ready");
        self.maybe_join();
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.channel_connected = true;
                debug!("signaling channel connected");
                self.maybe_join();
            }
            ChannelEvent::Message(msg) => self.on_signaling(msg).await,
            ChannelEvent::Closed => {
                self.channel_connected = false;
                warn!(
                    "signaling channel closed in state {:?}, further sends will be dropped",
                    self.session.state()
                );
            }
        }
    }

    // JOIN waits for both local media and the channel, in either order
    fn maybe_join(&mut self) {
        if self.joined || !self.media_ready || !self.channel_connected {
            return;
        }
        let join = SignalingMessage::join(self.session.call_id(), self.session.local_role());
        if self.send(&join) {
            self.joined = true;
            self.session.advance(CallState::Connecting);
        }
    }

    fn accepts(&self, msg: &SignalingMessage) -> bool {
        let local = self.session.local_role();
        if !msg.call_id.is_empty() && msg.call_id != self.session.call_id() {
            debug!("dropping {:?} for call {}", msg.kind(), msg.call_id);
            return false;
        }
        if msg.from == Some(local) {
            debug!("dropping echo of own {:?}", msg.kind());
            return false;
        }
        if matches!(msg.to, Some(to) if to != local) {
            debug!("dropping {:?} addressed to {:?}", msg.kind(), msg.to);
            return false;
        }
        true
    }

    async fn on_signaling(&mut self, msg: SignalingMessage) {
        if !self.accepts(&msg) {
            return;
        }
        let local = self.session.local_role();
        match msg.body {
            SignalBody::Join => debug!("{:?} joined the call", msg.from),
            SignalBody::Ready => match local {
                Role::A => self.send_offer().await,
                Role::B => debug!("ready received, waiting for offer"),
            },
            SignalBody::Offer(sdp) => match local {
                Role::B => self.answer_offer(sdp).await,
                Role::A => warn!("role A does not answer offers, ignoring"),
            },
            SignalBody::Answer(sdp) => {
                self.apply_remote_description(sdp).await;
            }
            SignalBody::Ice(candidate) => self.on_remote_candidate(candidate).await,
            SignalBody::Leave => {
                info!("remote party left");
                self.end(EndReason::RemoteLeave).await;
            }
        }
    }

    async fn send_offer(&mut self) {
        let offer = match self.engine.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                error!("create offer failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.engine.set_local_description(offer.clone()).await {
            error!("set local offer failed: {}", e);
            return;
        }
        let msg = SignalingMessage::offer(self.session.call_id(), self.session.local_role(), offer);
        self.send(&msg);
    }

    async fn answer_offer(&mut self, offer: SessionDescription) {
        if !self.apply_remote_description(offer).await {
            return;
        }
        let answer = match self.engine.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                error!("create answer failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.engine.set_local_description(answer.clone()).await {
            error!("set local answer failed: {}", e);
            return;
        }
        let msg =
            SignalingMessage::answer(self.session.call_id(), self.session.local_role(), answer);
        self.send(&msg);
    }

    // On success the queued candidates are applied right after.
    async fn apply_remote_description(&mut self, desc: SessionDescription) -> bool {
        let sdp_type = desc.sdp_type;
        if let Err(e) = self.engine.set_remote_description(desc).await {
            error!("remote {:?} rejected: {}", sdp_type, e);
            return false;
        }
        self.remote_description_set = true;
        self.drain_pending_candidates().await;
        true
    }

    async fn drain_pending_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }
        debug!("applying {} queued candidates", self.pending_candidates.len());
        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.apply_candidate(candidate).await;
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.remote_description_set {
            self.apply_candidate(candidate).await;
        } else {
            self.pending_candidates.push_back(candidate);
            debug!(
                "remote description not set, {} candidates queued",
                self.pending_candidates.len()
            );
        }
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self.engine.add_remote_candidate(candidate).await {
            error!("remote candidate rejected: {}", e);
        }
    }

    async fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                let msg = SignalingMessage::ice(
                    self.session.call_id(),
                    self.session.local_role(),
                    candidate,
                );
                self.send(&msg);
            }
            EngineEvent::RemoteTrack(track) => self.surface.show_remote(&track),
            EngineEvent::ConnectionState(PeerState::Connected) => {
                if self.session.state() == CallState::Connecting {
                    self.session.advance(CallState::Connected);
                    self.stats.start(Arc::clone(&self.engine));
                } else {
                    debug!("connected reported in {:?}, ignored", self.session.state());
                }
            }
            EngineEvent::ConnectionState(state) if state.is_terminal() => {
                warn!("peer connection {:?}, ending session", state);
                self.end(EndReason::EngineFailure(state)).await;
            }
            EngineEvent::ConnectionState(state) => debug!("peer connection {:?}", state),
        }
    }

    async fn on_command(&mut self, command: CallCommand) {
        debug!("command {:?}", command);
        match command {
            CallCommand::ToggleMute => self.tracks.toggle_mute(),
            CallCommand::ToggleCamera => self.tracks.toggle_camera(),
            CallCommand::StartScreenShare => self.tracks.start_screen_share(),
            CallCommand::StopScreenShare => self.tracks.stop_screen_share().await,
            CallCommand::Leave => self.end(EndReason::LocalLeave).await,
        }
    }

    async fn end(&mut self, reason: EndReason) {
        if !self.session.advance(CallState::Ended) {
            return;
        }
        info!("session {} ending: {:?}", self.session.session_id(), reason);
        self.stats.stop();
        if reason == EndReason::LocalLeave && self.joined {
            let leave = SignalingMessage::leave(self.session.call_id(), self.session.local_role());
            self.send(&leave);
        }
        self.tracks.release();
        self.surface.clear();
        if let Err(e) = self.engine.close().await {
            error!("closing peer engine failed: {}", e);
        }
        if !self.pending_candidates.is_empty() {
            debug!("dropping {} queued candidates", self.pending_candidates.len());
            self.pending_candidates.clear();
        }
        self.channel.close();
        self.publish_status();
    }

    // local media failure: nothing was joined, the session stays IDLE
    async fn abort_setup(&mut self) {
        self.stats.stop();
        self.tracks.release();
        if let Err(e) = self.engine.close().await {
            error!("closing peer engine failed: {}", e);
        }
        self.channel.close();
    }

    fn send(&self, msg: &SignalingMessage) -> bool {
        match self.channel.send(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!("{:?} not sent: {}", msg.kind(), e);
                false
            }
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(CallStatus {
            state: self.session.state(),
            muted: self.tracks.muted(),
            camera_off: self.tracks.camera_off(),
            screen_sharing: self.tracks.screen_sharing(),
        });
    }

    #[cfg(test)]
    pub(crate) async fn pump_internal(&mut self) {
        let event = tokio::time::timeout(Duration::from_secs(5), self.internal_rx.recv())
            .await
            .expect("no internal event")
            .expect("internal channel closed");
        self.handle_event(event).await;
    }
}

use tokio::sync::{mpsc, watch};

use super::*;
use crate::call::{CallState, StatsBoard, StatsSnapshot};
use crate::error::{CallError, Result};
use crate::server::data::{LocalMedia, MediaTrack};
use crate::server::rtc::EngineEvent;
use crate::server::signal_cli::ChannelEvent;

pub const DEFAULT_CHANNEL_SIZE: usize = 100;

/// Everything the coordinator reacts to. Sources are merged by the run loop
/// and handled strictly one at a time.
#[derive(Debug)]
pub enum CallEvent {
    Channel(ChannelEvent),
    Engine(EngineEvent),
    MediaReady(LocalMedia),
    /// Outcome of the screen capture numbered `capture`.
    ScreenCaptured {
        capture: u64,
        result: Result<MediaTrack>,
    },
    /// The screen track with this id ended outside our control.
    ScreenEnded(String),
    Command(CallCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    ToggleMute,
    ToggleCamera,
    StartScreenShare,
    StopScreenShare,
    Leave,
}

/// What a UI shows. The flags are read off the track set, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStatus {
    pub state: CallState,
    pub muted: bool,
    pub camera_off: bool,
    pub screen_sharing: bool,
}

impl Default for CallStatus {
    fn default() -> Self {
        Self {
            state: CallState::Idle,
            muted: false,
            camera_off: false,
            screen_sharing: false,
        }
    }
}

/// Cloneable control surface of one running coordinator.
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<CallCommand>,
    status: watch::Receiver<CallStatus>,
    stats: StatsBoard,
}

impl CallHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<CallCommand>,
        status: watch::Receiver<CallStatus>,
        stats: StatsBoard,
    ) -> Self {
        Self {
            commands,
            status,
            stats,
        }
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        self.send(CallCommand::ToggleMute).await
    }

    pub async fn toggle_camera(&self) -> Result<()> {
        self.send(CallCommand::ToggleCamera).await
    }

    pub async fn start_screen_share(&self) -> Result<()> {
        self.send(CallCommand::StartScreenShare).await
    }

    pub async fn stop_screen_share(&self) -> Result<()> {
        self.send(CallCommand::StopScreenShare).await
    }

    pub async fn leave(&self) -> Result<()> {
        self.send(CallCommand::Leave).await
    }

    pub fn status(&self) -> CallStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }

    /// Latest advisory stats, `None` until the first sample after CONNECTED.
    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.stats.latest()
    }

    /// Resolves once the session reaches `state` or a later one.
    pub async fn wait_for_state(&self, state: CallState) -> Result<CallStatus> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|s| s.state >= state)
            .await
            .map_err(|_| CallError::SessionClosed)?;
        Ok(*status)
    }

    async fn send(&self, command: CallCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| {
            debug!("coordinator gone, dropping {:?}", command);
            CallError::SessionClosed
        })
    }
}

use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::*;
use crate::config::RtcConfig;
use crate::msg_center::signaling_msgs::SdpType;
use crate::server::data::{TrackKind, TrackSource};

const EVENT_CHANNEL_SIZE: usize = 100;
const STREAM_ID: &str = "duo-call";

/// `PeerEngine` on top of a webrtc-rs peer connection.
pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
    video: Mutex<Option<VideoBinding>>,
    local_tracks: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
}

/// The one video sender and which local track it carries.
struct VideoBinding {
    sender: Arc<RTCRtpSender>,
    // track the sender was created with; swapped back to, never evicted
    base: String,
    bound: String,
}

impl WebRtcEngine {
    pub async fn new(cfg: &RtcConfig) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        let mut registry = Registry::new();
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        registry = register_default_interceptors(registry, &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(api.new_peer_connection(rtc_configuration(cfg)).await?);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let engine = Self {
            peer_connection,
            video: Mutex::new(None),
            local_tracks: Mutex::new(HashMap::new()),
        };
        engine.setup_pc_handlers(event_tx);
        Ok((engine, event_rx))
    }

    fn setup_pc_handlers(&self, event_tx: mpsc::Sender<EngineEvent>) {
        // trickle: every gathered candidate goes straight to the coordinator
        let candidate_tx = event_tx.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
                let tx = candidate_tx.clone();
                Box::pin(async move {
                    let Some(candidate) = c else {
                        debug!("local candidate gathering complete");
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let event = EngineEvent::LocalCandidate(from_rtc_candidate(init));
                            if tx.send(event).await.is_err() {
                                debug!("engine events receiver gone, candidate dropped");
                            }
                        }
                        Err(e) => error!("failed to serialize local candidate: {}", e),
                    }
                })
            }));

        let track_tx = event_tx.clone();
        self.peer_connection
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                let tx = track_tx.clone();
                Box::pin(async move {
                    let remote = RemoteTrack {
                        id: track.id(),
                        stream_id: track.stream_id(),
                        kind: match track.kind() {
                            RTPCodecType::Audio => TrackKind::Audio,
                            _ => TrackKind::Video,
                        },
                    };
                    info!("remote track received: {:?}", remote);
                    let _ = tx.send(EngineEvent::RemoteTrack(remote)).await;
                })
            }));

        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let tx = event_tx.clone();
                Box::pin(async move {
                    info!("peer connection state has changed: {}", s);
                    if let Some(state) = peer_state(s) {
                        let _ = tx.send(EngineEvent::ConnectionState(state)).await;
                    }
                })
            }));
    }

    async fn local_track_for(&self, track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let mut tracks = self.local_tracks.lock().await;
        tracks
            .entry(track.id().to_string())
            .or_insert_with(|| {
                Arc::new(TrackLocalStaticSample::new(
                    codec_for(track.source()),
                    track.id().to_string(),
                    STREAM_ID.to_owned(),
                ))
            })
            .clone()
    }

    // RTCP has to be read for interceptors to work; nothing else uses it
    async fn rtcp_drain(sender: Arc<RTCRtpSender>) {
        let mut buff = vec![0u8; 1500];
        while sender.read(&mut buff).await.is_ok() {}
        debug!("rtcp reader for sender finished");
    }
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        Ok(from_rtc_description(&offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(from_rtc_description(&answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn add_local_track(&self, track: &MediaTrack) -> Result<()> {
        let local = self.local_track_for(track).await;
        let rtp_sender = self
            .peer_connection
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        tokio::spawn(Self::rtcp_drain(rtp_sender.clone()));

        if track.kind() == TrackKind::Video {
            let mut video = self.video.lock().await;
            if video.is_none() {
                *video = Some(VideoBinding {
                    sender: rtp_sender,
                    base: track.id().to_string(),
                    bound: track.id().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Swap what the video sender carries. A substituted track that gets
    /// swapped out again is forgotten.
    async fn replace_video_track(&self, track: &MediaTrack) -> Result<()> {
        let mut video = self.video.lock().await;
        let Some(binding) = video.as_mut() else {
            return Err(CallError::EngineFailure(
                "no video sender to substitute on".to_string(),
            ));
        };
        let local = self.local_track_for(track).await;
        let replaced = binding
            .sender
            .replace_track(Some(local as Arc<dyn TrackLocal + Send + Sync>))
            .await;
        let evict = match replaced {
            Ok(()) => std::mem::replace(&mut binding.bound, track.id().to_string()),
            Err(_) => track.id().to_string(),
        };
        if evict != binding.base && evict != binding.bound {
            self.local_tracks.lock().await.remove(&evict);
        }
        replaced?;
        debug!("video sender now carries {:?} {}", track.source(), track.id());
        Ok(())
    }

    async fn get_stats(&self) -> Result<EngineStats> {
        let report = self.peer_connection.get_stats().await;
        let mut stats = EngineStats::default();
        let mut local_candidate_id = None;

        for (_, v) in report.reports.iter() {
            if let StatsReportType::CandidatePair(pair) = v {
                if pair.nominated {
                    stats.bytes_sent = pair.bytes_sent;
                    stats.bytes_received = pair.bytes_received;
                    stats.round_trip_time_ms = Some(pair.current_round_trip_time * 1000.0);
                    local_candidate_id = Some(pair.local_candidate_id.clone());
                }
            }
        }

        if let Some(id) = local_candidate_id {
            if let Some(StatsReportType::LocalCandidate(candidate)) = report.reports.get(&id) {
                stats.path_type = Some(candidate.candidate_type.to_string());
            }
        }
        Ok(stats)
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

fn rtc_configuration(cfg: &RtcConfig) -> RTCConfiguration {
    let ice_servers = cfg
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    let ice_transport_policy = match cfg.ice_transport_policy.to_ascii_lowercase().as_str() {
        "relay" => RTCIceTransportPolicy::Relay,
        "all" => RTCIceTransportPolicy::All,
        other => {
            warn!("unknown ice transport policy {:?}, using all", other);
            RTCIceTransportPolicy::All
        }
    };

    RTCConfiguration {
        ice_servers,
        ice_transport_policy,
        ..Default::default()
    }
}

fn codec_for(source: TrackSource) -> RTCRtpCodecCapability {
    match source.kind() {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerState::New),
        RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerState::Closed),
        _ => None,
    }
}

fn from_rtc_description(desc: &RTCSessionDescription) -> SessionDescription {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => SdpType::Answer,
    };
    SessionDescription {
        sdp_type,
        sdp: desc.sdp.clone(),
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => {
            return Err(CallError::NegotiationRejected(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    };
    Ok(rtc)
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

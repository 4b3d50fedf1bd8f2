//! webrtc-backed implementation of the media-transport capability.
//!
//! Wraps one `RTCPeerConnection` per remote peer and forwards its
//! callbacks (gathered candidates, remote tracks, connection state) into
//! the session event stream the negotiation engine consumes.

use crate::config::RoomConfig;
use crate::envelope::{CandidatePayload, SdpPayload};
use crate::error::{Error, Result};
use crate::media::{MediaTrack, TrackKind};
use crate::transport::{
    MediaEvent, MediaEvents, MediaSession, MediaSessionFactory, RemoteDescription,
    TransportHealth,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Opens webrtc-backed media sessions from a shared ICE configuration
pub struct RtcSessionFactory {
    config: RoomConfig,
}

impl RtcSessionFactory {
    pub fn new(config: RoomConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MediaSessionFactory for RtcSessionFactory {
    async fn open(&self, peer_id: &str) -> Result<(Arc<dyn MediaSession>, MediaEvents)> {
        let (session, events) = RtcMediaSession::connect(peer_id.to_string(), &self.config).await?;
        Ok((Arc::new(session) as Arc<dyn MediaSession>, events))
    }
}

/// One webrtc peer connection driven through the [`MediaSession`] trait
pub struct RtcMediaSession {
    peer_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    /// RTP senders per local track id, retained so tracks can be detached
    senders: Mutex<HashMap<String, Arc<RTCRtpSender>>>,
}

/// Map a webrtc connection state onto the capability's health signal.
/// `New` carries no information for the engine and is dropped.
fn map_health(state: RTCPeerConnectionState) -> Option<TransportHealth> {
    match state {
        RTCPeerConnectionState::Connecting => Some(TransportHealth::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportHealth::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportHealth::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportHealth::Failed),
        RTCPeerConnectionState::Closed => Some(TransportHealth::Closed),
        _ => None,
    }
}

impl RtcMediaSession {
    /// Build the peer connection and wire its callbacks into an event
    /// stream for the engine.
    #[instrument(skip(config), fields(peer_id = %peer_id))]
    pub async fn connect(peer_id: String, config: &RoomConfig) -> Result<(Self, MediaEvents)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Transport(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine)
                .map_err(|e| Error::Transport(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone().unwrap_or_default(),
                    credential: turn.credential.clone().unwrap_or_default(),
                    ..Default::default()
                }
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::Transport(format!("Failed to create peer connection: {}", e)))?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // Forward gathered candidates for trickle signaling
        let tx = events_tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(json) => {
                            let _ = tx.send(MediaEvent::CandidateGathered(CandidatePayload {
                                candidate: json.candidate,
                                sdp_mid: json.sdp_mid,
                                sdp_mline_index: json.sdp_mline_index,
                            }));
                        }
                        Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                    }
                }
            })
        }));

        // Remote media arrival
        let tx = events_tx.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                let _ = tx.send(MediaEvent::RemoteTrackAdded { kind });
            })
        }));

        // Connection health
        let tx = events_tx.clone();
        let peer = peer_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let tx = tx.clone();
                let peer = peer.clone();
                Box::pin(async move {
                    if let Some(health) = map_health(state) {
                        debug!("Peer {} transport health: {}", peer, health);
                        let _ = tx.send(MediaEvent::HealthChanged(health));
                    }
                })
            },
        ));

        Ok((
            Self {
                peer_id,
                peer_connection,
                senders: Mutex::new(HashMap::new()),
            },
            events_rx,
        ))
    }

    fn codec_capability(kind: TrackKind) -> RTCRtpCodecCapability {
        let mime_type = match kind {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        RTCRtpCodecCapability {
            mime_type: mime_type.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaSession for RtcMediaSession {
    async fn create_offer(&self) -> Result<SdpPayload> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::Transport(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Transport(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::Transport("No local description after setting offer".to_string())
            })?;

        debug!("Created SDP offer for peer {}", self.peer_id);

        Ok(SdpPayload::new(local_desc.sdp))
    }

    async fn create_answer(&self) -> Result<SdpPayload> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Transport(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Transport(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::Transport("No local description after setting answer".to_string())
            })?;

        debug!("Created SDP answer for peer {}", self.peer_id);

        Ok(SdpPayload::new(local_desc.sdp))
    }

    async fn set_remote_description(&self, desc: RemoteDescription) -> Result<()> {
        let desc = match desc {
            RemoteDescription::Offer(payload) => RTCSessionDescription::offer(payload.sdp)
                .map_err(|e| Error::Transport(format!("Failed to parse offer: {}", e)))?,
            RemoteDescription::Answer(payload) => RTCSessionDescription::answer(payload.sdp)
                .map_err(|e| Error::Transport(format!("Failed to parse answer: {}", e)))?,
        };

        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::Transport(format!("Failed to set remote description: {}", e)))?;

        debug!("Applied remote description for peer {}", self.peer_id);

        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &CandidatePayload) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::Transport(format!("Failed to add ICE candidate: {}", e)))?;

        Ok(())
    }

    async fn set_tracks(&self, tracks: &[MediaTrack]) -> Result<()> {
        let mut senders = self.senders.lock().await;

        // Detach tracks that are no longer published
        let stale: Vec<String> = senders
            .keys()
            .filter(|id| !tracks.iter().any(|t| &t.id == *id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(sender) = senders.remove(&id) {
                self.peer_connection
                    .remove_track(&sender)
                    .await
                    .map_err(|e| Error::Transport(format!("Failed to remove track: {}", e)))?;
                debug!("Detached track {} from peer {}", id, self.peer_id);
            }
        }

        // Attach newly published tracks
        for track in tracks {
            if senders.contains_key(&track.id) {
                continue;
            }
            let local = Arc::new(TrackLocalStaticSample::new(
                Self::codec_capability(track.kind),
                track.id.clone(),
                format!("roomcast-{}", self.peer_id),
            ));
            let sender = self
                .peer_connection
                .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| {
                    Error::Transport(format!("Failed to add {} track: {}", track.kind, e))
                })?;
            senders.insert(track.id.clone(), sender);
            debug!("Attached {} track {} to peer {}", track.kind, track.id, self.peer_id);
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing peer connection for peer {}", self.peer_id);

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::Transport(format!("Failed to close connection: {}", e)))?;

        Ok(())
    }
}

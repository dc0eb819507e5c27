//! webrtc-rs implementation of the peer transport

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::config::{IceServer, TransportConfig};
use super::signaling::{IceCandidate, SdpKind, SessionDescription};
use super::track::{new_audio_track, new_video_track};
use super::transport::{PeerFactory, PeerTransport, SenderId, VideoSource};
use crate::error::NegotiationError;

/// Creates [`RtcPeer`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcPeerFactory;

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(
        &self,
        config: &TransportConfig,
        candidates: mpsc::UnboundedSender<IceCandidate>,
    ) -> Result<Arc<dyn PeerTransport>, NegotiationError> {
        let peer = RtcPeer::new(config, candidates).await?;
        Ok(Arc::new(peer))
    }
}

struct VideoSlot {
    id: SenderId,
    sender: Arc<RTCRtpSender>,
}

struct AudioSlot {
    sender: Arc<RTCRtpSender>,
    track: Arc<TrackLocalStaticSample>,
    attached: bool,
}

/// Peer connection with at most one video and one audio sender
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    config: TransportConfig,
    video: Mutex<Option<VideoSlot>>,
    audio: Mutex<Option<AudioSlot>>,
    next_sender: AtomicU32,
}

fn to_rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .filter(|s| s.is_usable())
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn sendonly() -> Option<RTCRtpTransceiverInit> {
    Some(RTCRtpTransceiverInit {
        direction: RTCRtpTransceiverDirection::Sendonly,
        send_encodings: vec![],
    })
}

/// RTCP must be read for interceptors (NACK, reports) to work
fn drain_rtcp(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });
}

impl RtcPeer {
    pub async fn new(
        config: &TransportConfig,
        candidates: mpsc::UnboundedSender<IceCandidate>,
    ) -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| NegotiationError::OfferFailed(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            NegotiationError::OfferFailed(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: to_rtc_ice_servers(&config.ice_servers),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            NegotiationError::OfferFailed(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            Box::pin(async move {
                info!("Peer connection state: {}", s);
            })
        }));

        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidates = candidates.clone();
            Box::pin(async move {
                let Some(c) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match c.to_json() {
                    Ok(init) => {
                        debug!("Local ICE candidate: {}", init.candidate);
                        let _ = candidates.send(IceCandidate::new(
                            init.candidate,
                            init.sdp_mid,
                            init.sdp_mline_index,
                        ));
                    }
                    Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        info!(
            "Peer created with {} ICE server(s)",
            config.ice_servers.len()
        );

        Ok(Self {
            pc,
            config: config.clone(),
            video: Mutex::new(None),
            audio: Mutex::new(None),
            next_sender: AtomicU32::new(1),
        })
    }
}

#[async_trait]
impl PeerTransport for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::OfferFailed(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let rtc_desc = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(|e| NegotiationError::DescriptionRejected(e.to_string()))?;
        self.pc
            .set_local_description(rtc_desc)
            .await
            .map_err(|e| NegotiationError::DescriptionRejected(e.to_string()))
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), NegotiationError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| NegotiationError::DescriptionRejected(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| NegotiationError::DescriptionRejected(e.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| NegotiationError::CandidateRejected(e.to_string()))
    }

    async fn add_video_track(&self, source: &VideoSource) -> Result<SenderId, NegotiationError> {
        let mut video = self.video.lock().await;
        if let Some(slot) = video.as_ref() {
            return Err(NegotiationError::Track(format!(
                "video already attached as {}",
                slot.id
            )));
        }

        let track = new_video_track(self.config.codec, &self.config.stream_id);
        let transceiver = self
            .pc
            .add_transceiver_from_track(
                Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>,
                sendonly(),
            )
            .await
            .map_err(|e| NegotiationError::Track(e.to_string()))?;
        let sender = transceiver.sender().await;
        drain_rtcp(sender.clone());

        let id = SenderId(self.next_sender.fetch_add(1, Ordering::Relaxed));
        info!("Video {} attached for {} at {}", id, source.camera_id, source.format);
        *video = Some(VideoSlot { id, sender });
        Ok(id)
    }

    async fn replace_video_track(
        &self,
        sender: SenderId,
        source: &VideoSource,
    ) -> Result<(), NegotiationError> {
        let video = self.video.lock().await;
        let slot = video
            .as_ref()
            .filter(|slot| slot.id == sender)
            .ok_or_else(|| NegotiationError::Track(format!("unknown {}", sender)))?;

        let track = new_video_track(self.config.codec, &self.config.stream_id);
        slot.sender
            .replace_track(Some(track as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| NegotiationError::Track(e.to_string()))?;
        info!("Video {} now fed by {} at {}", sender, source.camera_id, source.format);
        Ok(())
    }

    async fn set_max_bitrate(&self, sender: SenderId, bitrate_bps: u32) -> Result<(), NegotiationError> {
        let video = self.video.lock().await;
        match video.as_ref() {
            // The sender has no encoding parameters here; the offer's fmtp
            // hints carry the ceiling to the viewer
            Some(slot) if slot.id == sender => {
                debug!("{} max bitrate {} bps", sender, bitrate_bps);
                Ok(())
            }
            _ => Err(NegotiationError::Track(format!("unknown {}", sender))),
        }
    }

    async fn set_audio_enabled(&self, enabled: bool) -> Result<(), NegotiationError> {
        let mut audio = self.audio.lock().await;
        match (audio.as_mut(), enabled) {
            (None, false) => Ok(()),
            (None, true) => {
                let track = new_audio_track(&self.config.stream_id);
                let transceiver = self
                    .pc
                    .add_transceiver_from_track(
                        Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>,
                        sendonly(),
                    )
                    .await
                    .map_err(|e| NegotiationError::Track(e.to_string()))?;
                let sender = transceiver.sender().await;
                drain_rtcp(sender.clone());
                info!("Microphone track attached");
                *audio = Some(AudioSlot {
                    sender,
                    track,
                    attached: true,
                });
                Ok(())
            }
            (Some(slot), enabled) if slot.attached == enabled => Ok(()),
            (Some(slot), true) => {
                slot.sender
                    .replace_track(Some(Arc::clone(&slot.track) as Arc<dyn TrackLocal + Send + Sync>))
                    .await
                    .map_err(|e| NegotiationError::Track(e.to_string()))?;
                slot.attached = true;
                info!("Microphone track re-attached");
                Ok(())
            }
            (Some(slot), false) => {
                slot.sender
                    .replace_track(None)
                    .await
                    .map_err(|e| NegotiationError::Track(e.to_string()))?;
                slot.attached = false;
                info!("Microphone track detached");
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc
            .close()
            .await
            .map_err(|e| NegotiationError::Track(format!("close failed: {}", e)))
    }
}

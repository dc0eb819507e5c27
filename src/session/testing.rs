//! In-memory collaborators for session tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::capture::{
    label_cameras, BackendKind, CameraDescriptor, CaptureBackend, CaptureFormat, CaptureStream, Facing,
};
use crate::error::{CaptureError, NegotiationError};
use crate::signaling::{MessageSink, OutboundMessage};
use crate::webrtc::{
    IceCandidate, PeerFactory, PeerTransport, SenderId, SessionDescription, TransportConfig, VideoSource,
};

pub const FAKE_OFFER: &str = "v=0\r\n\
o=- 1 1 IN IP4 127.0.0.1\r\n\
s=-\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 102\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 packetization-mode=1;profile-level-id=42e01f\r\n\
a=sendonly\r\n";

// ============================================================================
// Capture
// ============================================================================

#[derive(Default)]
pub struct CaptureWorld {
    pub cameras: Vec<CameraDescriptor>,
    pub formats: HashMap<String, Vec<CaptureFormat>>,
    /// Starts that fail with `FormatRejected`
    pub rejected: HashSet<(String, CaptureFormat)>,
    /// Cameras whose start fails with `DeviceBusy`
    pub busy: HashSet<String>,
    /// Every successful start, in order
    pub starts: Vec<(String, CaptureFormat)>,
    pub running: usize,
    pub max_running: usize,
    /// Stops still stop but report an error
    pub stop_fails: bool,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    pub world: Arc<Mutex<CaptureWorld>>,
}

impl FakeBackend {
    /// Back camera "0" and front camera "1"
    pub fn two_cameras() -> Self {
        let backend = Self::default();
        {
            let mut world = backend.world.lock();
            world.cameras = vec![
                CameraDescriptor::new("0", Facing::Back),
                CameraDescriptor::new("1", Facing::Front),
            ];
            label_cameras(&mut world.cameras);
            world.formats.insert(
                "0".into(),
                vec![
                    CaptureFormat::new(1280, 720, 30),
                    CaptureFormat::new(1280, 720, 15),
                    CaptureFormat::new(640, 480, 30),
                ],
            );
            world.formats.insert(
                "1".into(),
                vec![CaptureFormat::new(1280, 720, 30), CaptureFormat::new(640, 480, 30)],
            );
        }
        backend
    }

    pub fn starts(&self) -> Vec<(String, CaptureFormat)> {
        self.world.lock().starts.clone()
    }

    pub fn running(&self) -> usize {
        self.world.lock().running
    }
}

impl CaptureBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fixed
    }

    fn enumerate(&self) -> Result<Vec<CameraDescriptor>, CaptureError> {
        let world = self.world.lock();
        if world.cameras.is_empty() {
            return Err(CaptureError::NoDevices);
        }
        Ok(world.cameras.clone())
    }

    fn formats_for(&self, camera_id: &str) -> Vec<CaptureFormat> {
        self.world.lock().formats.get(camera_id).cloned().unwrap_or_default()
    }

    fn open(&self, camera_id: &str) -> Result<Box<dyn CaptureStream>, CaptureError> {
        if !self.world.lock().cameras.iter().any(|c| c.id == camera_id) {
            return Err(CaptureError::UnknownCamera(camera_id.to_string()));
        }
        Ok(Box::new(FakeStream {
            camera_id: camera_id.to_string(),
            world: self.world.clone(),
            format: None,
        }))
    }
}

pub struct FakeStream {
    camera_id: String,
    world: Arc<Mutex<CaptureWorld>>,
    format: Option<CaptureFormat>,
}

impl CaptureStream for FakeStream {
    fn camera_id(&self) -> &str {
        &self.camera_id
    }

    fn start(&mut self, format: CaptureFormat) -> Result<(), CaptureError> {
        let mut world = self.world.lock();
        if world.busy.contains(&self.camera_id) {
            return Err(CaptureError::DeviceBusy {
                camera: self.camera_id.clone(),
                reason: "in use".into(),
            });
        }
        if world.rejected.contains(&(self.camera_id.clone(), format)) {
            return Err(CaptureError::FormatRejected {
                camera: self.camera_id.clone(),
                width: format.width,
                height: format.height,
                fps: format.fps,
            });
        }
        if self.format.is_none() {
            world.running += 1;
            world.max_running = world.max_running.max(world.running);
        }
        world.starts.push((self.camera_id.clone(), format));
        self.format = Some(format);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let mut world = self.world.lock();
        if self.format.take().is_some() {
            world.running -= 1;
        }
        if world.stop_fails {
            return Err(CaptureError::Io(format!("{}: stream off failed", self.camera_id)));
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.format.is_some()
    }

    fn format(&self) -> Option<CaptureFormat> {
        self.format
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ============================================================================
// Peer
// ============================================================================

#[derive(Debug, Default)]
pub struct PeerLog {
    pub offers: usize,
    pub local: Vec<String>,
    pub answers: Vec<String>,
    pub candidates: Vec<IceCandidate>,
    pub video_senders: Vec<SenderId>,
    pub replaced: Vec<(SenderId, String)>,
    pub max_bitrate: Option<(SenderId, u32)>,
    pub audio: Option<bool>,
    pub closed: bool,
    pub fail_offer: bool,
    pub reject_answer: bool,
}

#[derive(Default)]
pub struct FakePeer {
    pub log: Mutex<PeerLog>,
}

#[async_trait]
impl PeerTransport for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let mut log = self.log.lock();
        if log.fail_offer {
            return Err(NegotiationError::OfferFailed("injected".into()));
        }
        log.offers += 1;
        Ok(SessionDescription::offer(FAKE_OFFER))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        self.log.lock().local.push(desc.sdp);
        Ok(())
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), NegotiationError> {
        let mut log = self.log.lock();
        if log.reject_answer {
            return Err(NegotiationError::DescriptionRejected("bad answer".into()));
        }
        log.answers.push(sdp.to_string());
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.log.lock().candidates.push(candidate);
        Ok(())
    }

    async fn add_video_track(&self, _source: &VideoSource) -> Result<SenderId, NegotiationError> {
        let mut log = self.log.lock();
        let id = SenderId(log.video_senders.len() as u32 + 1);
        log.video_senders.push(id);
        Ok(id)
    }

    async fn replace_video_track(&self, sender: SenderId, source: &VideoSource) -> Result<(), NegotiationError> {
        let mut log = self.log.lock();
        if !log.video_senders.contains(&sender) {
            return Err(NegotiationError::Track(format!("unknown {}", sender)));
        }
        log.replaced.push((sender, source.camera_id.clone()));
        Ok(())
    }

    async fn set_max_bitrate(&self, sender: SenderId, bitrate_bps: u32) -> Result<(), NegotiationError> {
        self.log.lock().max_bitrate = Some((sender, bitrate_bps));
        Ok(())
    }

    async fn set_audio_enabled(&self, enabled: bool) -> Result<(), NegotiationError> {
        self.log.lock().audio = Some(enabled);
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.log.lock().closed = true;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakePeerFactory {
    pub created: Arc<Mutex<Vec<(TransportConfig, Arc<FakePeer>)>>>,
    pub candidates: Arc<Mutex<Option<mpsc::UnboundedSender<IceCandidate>>>>,
}

impl FakePeerFactory {
    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recently created peer
    pub fn last(&self) -> Arc<FakePeer> {
        self.created.lock().last().map(|(_, p)| p.clone()).unwrap()
    }

    pub fn last_config(&self) -> TransportConfig {
        self.created.lock().last().map(|(c, _)| c.clone()).unwrap()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(
        &self,
        config: &TransportConfig,
        candidates: mpsc::UnboundedSender<IceCandidate>,
    ) -> Result<Arc<dyn PeerTransport>, NegotiationError> {
        let peer = Arc::new(FakePeer::default());
        self.created.lock().push((config.clone(), peer.clone()));
        *self.candidates.lock() = Some(candidates);
        Ok(peer)
    }
}

// ============================================================================
// Signaling
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn offers(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| matches!(m, OutboundMessage::Offer { .. }))
            .count()
    }
}

impl MessageSink for RecordingSink {
    fn send(&self, message: OutboundMessage) {
        self.sent.lock().push(message);
    }
}

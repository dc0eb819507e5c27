//! Session orchestrator
//!
//! Owns the applied configuration, the active capture stream and the
//! transport peer. Every mutation goes through `&mut self`, so the runner
//! task that owns the orchestrator is the only writer.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::orientation::OrientationTracker;
use super::state::{clamp_bitrate, AppliedState, SessionPhase, SessionSnapshot};
use crate::capture::{
    camera_formats, enumerate_cameras, formats_for_aspect, open_stream, pick_best_for_aspect, pick_camera,
    pick_initial_format, run_blocking, start_capture, stop_stream, AspectClass, CameraDescriptor,
    CaptureBackend, CaptureFormat, DeviceCapabilities, Facing, SharedStream,
};
use crate::config::AppConfig;
use crate::error::{AppError, CaptureError, NegotiationError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::signaling::{CapsReport, MessageSink, Orientation, OutboundMessage, RemoteConfig, SignalingEvent};
use crate::webrtc::{
    inject_video_bitrate, IceCandidate, PeerFactory, PeerTransport, SenderId, SessionDescription,
    TransportConfig, VideoSource,
};

/// Collaborators the orchestrator drives
#[derive(Clone)]
pub struct SessionDeps {
    pub backend: Arc<dyn CaptureBackend>,
    pub peers: Arc<dyn PeerFactory>,
    pub sink: Arc<dyn MessageSink>,
    pub events: Arc<EventBus>,
}

/// Startup parameters
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub transport: TransportConfig,
    pub bitrate_kbps: u32,
    pub follow_orientation: bool,
    /// Facing picked at startup and when toggling from an unknown facing
    pub default_facing: Facing,
    /// Pause before the single capture-start retry
    pub capture_retry_pause: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            transport: TransportConfig::from_stream(&config.stream),
            bitrate_kbps: clamp_bitrate(config.stream.bitrate_kbps as i64),
            follow_orientation: config.session.follow_orientation,
            default_facing: config.capture.default_facing,
            capture_retry_pause: Duration::from_millis(config.session.capture_retry_pause_ms),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

async fn open_and_start(
    backend: Arc<dyn CaptureBackend>,
    camera_id: &str,
    format: CaptureFormat,
    pause: Duration,
) -> std::result::Result<SharedStream, CaptureError> {
    let stream = open_stream(backend, camera_id).await?;
    start_capture(&stream, format, pause).await?;
    Ok(stream)
}

/// Keep the current format when the new camera has it, else take the best
/// one for the current aspect
fn format_for_switch(formats: &[CaptureFormat], current: CaptureFormat, aspect: AspectClass) -> CaptureFormat {
    if formats.contains(&current) {
        return current;
    }
    formats_for_aspect(formats, aspect)
        .first()
        .copied()
        .unwrap_or_else(|| pick_initial_format(formats))
}

fn requested_format(config: &RemoteConfig) -> Option<CaptureFormat> {
    let width = u32::try_from(config.width).ok()?;
    let height = u32::try_from(config.height).ok()?;
    let fps = u32::try_from(config.fps).ok()?;
    Some(CaptureFormat::new(width, height, fps)).filter(CaptureFormat::is_valid)
}

pub struct SessionOrchestrator {
    backend: Arc<dyn CaptureBackend>,
    peers: Arc<dyn PeerFactory>,
    sink: Arc<dyn MessageSink>,
    events: Arc<EventBus>,
    transport: TransportConfig,
    retry_pause: Duration,
    default_facing: Facing,

    applied: AppliedState,
    phase: SessionPhase,
    facing: Option<Facing>,
    cameras: Vec<CameraDescriptor>,
    /// Last format a remote config asked for
    last_requested: Option<CaptureFormat>,
    paused: bool,

    stream: Option<SharedStream>,
    peer: Option<Arc<dyn PeerTransport>>,
    video_sender: Option<SenderId>,
    candidate_tx: mpsc::UnboundedSender<IceCandidate>,
    orientation: OrientationTracker,
}

impl SessionOrchestrator {
    /// Local ICE candidates of every peer this orchestrator builds arrive on
    /// the returned receiver.
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> (Self, mpsc::UnboundedReceiver<IceCandidate>) {
        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        let applied = AppliedState {
            bitrate_kbps: settings.bitrate_kbps,
            ..AppliedState::default()
        };
        let orientation = OrientationTracker::new(
            settings.follow_orientation,
            Orientation::from_dimensions(applied.format.width, applied.format.height),
        );
        let orchestrator = Self {
            backend: deps.backend,
            peers: deps.peers,
            sink: deps.sink,
            events: deps.events,
            transport: settings.transport,
            retry_pause: settings.capture_retry_pause,
            default_facing: settings.default_facing,
            applied,
            phase: SessionPhase::Uninitialized,
            facing: None,
            cameras: Vec::new(),
            last_requested: None,
            paused: false,
            stream: None,
            peer: None,
            video_sender: None,
            candidate_tx,
            orientation,
        };
        (orchestrator, candidate_rx)
    }

    pub fn applied(&self) -> &AppliedState {
        &self.applied
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_capturing(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.lock().is_running())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            applied: self.applied.clone(),
            phase: self.phase,
            facing: self.facing,
            follow_orientation: self.orientation.is_following(),
            orientation: self.orientation.current(),
            capturing: self.is_capturing(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Pick the default camera and format, start capture, build the peer,
    /// attach video and publish capabilities.
    pub async fn init_and_start(&mut self) -> Result<()> {
        match self.phase {
            SessionPhase::Closed => return Err(AppError::SessionClosed),
            SessionPhase::Uninitialized => {}
            _ => return Ok(()),
        }

        let cameras = self.refresh_cameras().await?;
        let camera = pick_camera(&cameras, self.default_facing)
            .cloned()
            .ok_or(CaptureError::NoDevices)?;
        let format = pick_initial_format(&camera_formats(self.backend.clone(), &camera.id).await);

        let stream = match open_and_start(self.backend.clone(), &camera.id, format, self.retry_pause).await {
            Ok(stream) => stream,
            Err(e) => {
                self.capture_failed(Some(&camera.id), &e);
                return Err(e.into());
            }
        };
        self.stream = Some(stream);
        self.applied.active_camera_id = Some(camera.id.clone());
        self.applied.format = format;
        self.facing = Some(camera.facing);
        info!("Capturing from {} at {}", camera.label, format);
        self.set_phase(SessionPhase::Initialized);

        if let Err(e) = self.ensure_peer().await {
            self.negotiation_failed("peer", &e);
        }
        self.publish_caps().await;
        if self.orientation.is_following() {
            self.set_follow_orientation(true);
        }
        Ok(())
    }

    /// Stop capture (app backgrounded); the peer stays up
    pub async fn pause_capture(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stop_stream(stream).await {
                warn!("Failed to stop capture: {}", e);
            }
        }
        self.paused = true;
        info!("Capture paused");
    }

    pub async fn resume_capture(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.paused {
            return Ok(());
        }
        self.paused = false;
        self.restart_capture(self.applied.format).await?;
        info!("Capture resumed at {}", self.applied.format);
        Ok(())
    }

    /// Stop capture, close the peer and enter `Closed`
    pub async fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stop_stream(&stream).await {
                warn!("Failed to stop capture on release: {}", e);
            }
        }
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("Failed to close peer: {}", e);
            }
        }
        self.video_sender = None;
        self.set_phase(SessionPhase::Closed);
    }

    // ========================================================================
    // Negotiation
    // ========================================================================

    /// Build a send-only offer with bitrate hints, set it locally and send it
    pub async fn create_offer(&mut self) -> Result<()> {
        match self.phase {
            SessionPhase::Closed => return Err(AppError::SessionClosed),
            SessionPhase::Uninitialized => return Err(NegotiationError::NoPeer.into()),
            _ => {}
        }

        let peer = match self.ensure_peer().await {
            Ok(peer) => peer,
            Err(e) => {
                self.negotiation_failed("peer", &e);
                return Err(e.into());
            }
        };

        let previous = self.phase;
        self.set_phase(previous.on_offer());
        match self.local_offer(&peer).await {
            Ok(sdp) => {
                info!("Sending offer ({} kbps)", self.applied.bitrate_kbps);
                self.sink.send(OutboundMessage::Offer { sdp });
                Ok(())
            }
            Err(e) => {
                self.set_phase(previous);
                self.negotiation_failed("offer", &e);
                Err(e.into())
            }
        }
    }

    async fn local_offer(&self, peer: &Arc<dyn PeerTransport>) -> std::result::Result<String, NegotiationError> {
        let offer = peer.create_offer().await?;
        let sdp = inject_video_bitrate(
            &offer.sdp,
            self.applied.bitrate_kbps,
            self.transport.codec,
            self.transport.fallback_codec,
        );
        peer.set_local_description(SessionDescription::offer(sdp.clone()))
            .await?;
        Ok(sdp)
    }

    /// Apply a remote answer to whatever local offer is current
    pub async fn handle_answer(&mut self, sdp: &str) -> Result<()> {
        self.ensure_open()?;
        let Some(peer) = self.peer.clone() else {
            warn!("Answer received without a peer");
            return Err(NegotiationError::NoPeer.into());
        };
        match peer.set_remote_answer(sdp).await {
            Ok(()) => {
                self.set_phase(SessionPhase::Stable);
                Ok(())
            }
            Err(e) => {
                self.negotiation_failed("answer", &e);
                Err(e.into())
            }
        }
    }

    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.ensure_open()?;
        let Some(peer) = self.peer.clone() else {
            debug!("Dropping remote candidate: no peer");
            return Err(NegotiationError::NoPeer.into());
        };
        peer.add_remote_candidate(candidate).await.map_err(|e| {
            self.negotiation_failed("candidate", &e);
            e.into()
        })
    }

    pub fn forward_local_candidate(&self, candidate: IceCandidate) {
        self.sink.send(OutboundMessage::Ice(candidate));
    }

    /// Liveness ping, then a fresh offer
    pub async fn ensure_signaling_and_offer(&mut self) -> Result<()> {
        self.sink.send(OutboundMessage::Ping);
        self.create_offer().await
    }

    async fn ensure_peer(&mut self) -> std::result::Result<Arc<dyn PeerTransport>, NegotiationError> {
        let peer = match &self.peer {
            Some(peer) => peer.clone(),
            None => {
                let peer = self.peers.create(&self.transport, self.candidate_tx.clone()).await?;
                self.peer = Some(peer.clone());
                self.video_sender = None;
                if self.applied.mic_enabled {
                    peer.set_audio_enabled(true).await?;
                }
                peer
            }
        };

        if self.video_sender.is_none() {
            if let Some(source) = self.video_source() {
                let sender = peer.add_video_track(&source).await?;
                self.video_sender = Some(sender);
                self.push_bitrate().await;
            }
        }
        Ok(peer)
    }

    async fn rebuild_peer(&mut self) -> std::result::Result<(), NegotiationError> {
        if let Some(old) = self.peer.take() {
            if let Err(e) = old.close().await {
                warn!("Failed to close old peer: {}", e);
            }
        }
        self.video_sender = None;
        if !matches!(self.phase, SessionPhase::Uninitialized | SessionPhase::Closed) {
            self.set_phase(SessionPhase::Initialized);
        }
        self.ensure_peer().await.map(|_| ())
    }

    fn video_source(&self) -> Option<VideoSource> {
        self.applied.active_camera_id.as_ref().map(|camera_id| VideoSource {
            camera_id: camera_id.clone(),
            format: self.applied.format,
        })
    }

    /// Fresh track for the current camera on the existing sender
    async fn refresh_video_track(&mut self) {
        let (Some(peer), Some(source)) = (self.peer.clone(), self.video_source()) else {
            return;
        };
        let result = match self.video_sender {
            Some(sender) => peer.replace_video_track(sender, &source).await,
            None => match peer.add_video_track(&source).await {
                Ok(sender) => {
                    self.video_sender = Some(sender);
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };
        if let Err(e) = result {
            self.negotiation_failed("track", &e);
        }
    }

    // ========================================================================
    // Reconfiguration
    // ========================================================================

    /// Reconcile a remote config push, least disruptive step first, then
    /// renegotiate.
    pub async fn apply_config(&mut self, config: &RemoteConfig) -> Result<()> {
        self.ensure_open()?;
        if self.phase == SessionPhase::Uninitialized {
            self.init_and_start().await?;
        }

        if !config.ice_servers.is_empty() && config.ice_servers != self.transport.ice_servers {
            self.transport = self.transport.with_ice_servers(&config.ice_servers);
            info!("ICE servers changed ({}), rebuilding peer", self.transport.ice_servers.len());
            if let Err(e) = self.rebuild_peer().await {
                self.negotiation_failed("peer", &e);
            }
        }

        // 1. camera
        let mut switched = false;
        if let Some(camera_id) = self.requested_camera(config).await {
            switched = self.switch_to_device(&camera_id).await.is_ok();
        }

        // 2. resolution and frame rate
        let mut resolution_changed = false;
        match requested_format(config) {
            Some(requested) => {
                let new_input = self.last_requested != Some(requested) || switched;
                if !self.is_capturing() || (requested != self.applied.format && new_input) {
                    let previous = self.applied.format;
                    if self.restart_capture(requested).await.is_ok() {
                        resolution_changed = !previous.same_resolution(&requested);
                        self.last_requested = Some(requested);
                    }
                } else {
                    self.last_requested = Some(requested);
                }
            }
            None => warn!(
                "Ignoring invalid format {}x{}@{}",
                config.width, config.height, config.fps
            ),
        }

        // 3. bitrate
        self.set_video_bitrate_kbps(config.bitrate_kbps).await;

        // 4. microphone
        if let Err(e) = self.set_mic_enabled(config.mic_enabled).await {
            debug!("Microphone change not applied: {}", e);
        }

        // 5. aspect
        let aspect = config.aspect();
        if resolution_changed {
            self.set_aspect_label(aspect);
        } else if let Err(e) = self.set_aspect(aspect).await {
            debug!("Aspect change not applied: {}", e);
        }

        self.events.publish(SystemEvent::ConfigApplied {
            camera: self.applied.active_camera_id.clone(),
            width: self.applied.format.width,
            height: self.applied.format.height,
            fps: self.applied.format.fps,
            bitrate_kbps: self.applied.bitrate_kbps,
            mic_enabled: self.applied.mic_enabled,
            aspect: self.applied.aspect.wire_name().to_string(),
        });

        // 6. renegotiate
        self.ensure_signaling_and_offer().await
    }

    /// Camera a config asks for, when it differs from the active one
    async fn requested_camera(&mut self, config: &RemoteConfig) -> Option<String> {
        if let Some(name) = config.camera_name() {
            if !self.cameras.iter().any(|c| c.id == name) {
                if let Err(e) = self.refresh_cameras().await {
                    warn!("Camera enumeration failed: {}", e);
                }
            }
            if !self.cameras.iter().any(|c| c.id == name) {
                warn!("Ignoring unknown camera '{}'", name);
                return None;
            }
            return (self.applied.active_camera_id.as_deref() != Some(name)).then(|| name.to_string());
        }

        let facing = config.facing();
        if self.facing == Some(facing) {
            return None;
        }
        pick_camera(&self.cameras, facing)
            .map(|c| c.id.clone())
            .filter(|id| self.applied.active_camera_id.as_deref() != Some(id.as_str()))
    }

    /// Stop the current camera, start `camera_id` on a fresh pipeline and
    /// replace the outbound track in place.
    ///
    /// On failure the previous camera is restarted.
    pub async fn switch_to_device(&mut self, camera_id: &str) -> Result<()> {
        self.ensure_open()?;
        if self.applied.active_camera_id.as_deref() == Some(camera_id) && self.is_capturing() {
            return Ok(());
        }

        let camera = match self.find_camera(camera_id) {
            Some(camera) => camera,
            None => {
                if let Err(e) = self.refresh_cameras().await {
                    warn!("Camera enumeration failed: {}", e);
                }
                self.find_camera(camera_id)
                    .ok_or_else(|| CaptureError::UnknownCamera(camera_id.to_string()))?
            }
        };

        let formats = camera_formats(self.backend.clone(), camera_id).await;
        let format = format_for_switch(&formats, self.applied.format, self.applied.aspect);
        let previous_id = self.applied.active_camera_id.clone();

        let old = self.stream.take();
        if let Some(stream) = &old {
            if let Err(e) = stop_stream(stream).await {
                warn!("Failed to stop {}: {}", previous_id.as_deref().unwrap_or("previous camera"), e);
            }
        }

        match open_and_start(self.backend.clone(), camera_id, format, self.retry_pause).await {
            Ok(stream) => {
                drop(old);
                self.stream = Some(stream);
            }
            Err(e) => {
                self.capture_failed(Some(camera_id), &e);
                if let Some(stream) = old {
                    if let Err(restore) = start_capture(&stream, self.applied.format, self.retry_pause).await {
                        self.capture_failed(previous_id.as_deref(), &restore);
                    }
                    self.stream = Some(stream);
                }
                return Err(e.into());
            }
        }

        self.applied.active_camera_id = Some(camera.id.clone());
        self.applied.format = format;
        self.facing = Some(camera.facing);
        info!("Switched to {} at {}", camera.label, format);

        self.refresh_video_track().await;
        self.events.publish(SystemEvent::CameraSwitched {
            from: previous_id,
            to: camera.id.clone(),
        });
        self.publish_caps().await;
        Ok(())
    }

    /// Switch to the first camera facing `facing`
    pub async fn switch_to_facing(&mut self, facing: Facing) -> Result<()> {
        let cameras = self.refresh_cameras().await?;
        let camera = pick_camera(&cameras, facing)
            .cloned()
            .ok_or(CaptureError::NoDevices)?;
        self.switch_to_device(&camera.id).await
    }

    pub async fn toggle_facing(&mut self) -> Result<()> {
        let target = self.facing.unwrap_or(self.default_facing).opposite();
        self.switch_to_facing(target).await
    }

    /// Store the clamped bitrate and push it to the sender if there is one
    pub async fn set_video_bitrate_kbps(&mut self, kbps: i64) -> u32 {
        let clamped = clamp_bitrate(kbps);
        if clamped as i64 != kbps {
            debug!("Bitrate {} kbps clamped to {}", kbps, clamped);
        }
        self.applied.bitrate_kbps = clamped;
        self.push_bitrate().await;
        clamped
    }

    async fn push_bitrate(&self) {
        if let (Some(peer), Some(sender)) = (&self.peer, self.video_sender) {
            let bps = self.applied.bitrate_kbps.saturating_mul(1000);
            if let Err(e) = peer.set_max_bitrate(sender, bps).await {
                // The stored value still drives the next offer
                debug!("Sender bitrate not applied: {}", e);
            }
        }
    }

    pub async fn set_mic_enabled(&mut self, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        if self.applied.mic_enabled == enabled {
            return Ok(());
        }
        if let Some(peer) = self.peer.clone() {
            if let Err(e) = peer.set_audio_enabled(enabled).await {
                self.negotiation_failed("microphone", &e);
                return Err(e.into());
            }
        }
        self.applied.mic_enabled = enabled;
        info!("Microphone {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Restart capture at an operator-chosen format
    pub async fn apply_video_quality(&mut self, format: CaptureFormat) -> Result<()> {
        self.ensure_open()?;
        if !format.is_valid() {
            return Err(AppError::BadRequest(format!("invalid format {}", format)));
        }
        if format == self.applied.format && self.is_capturing() {
            return Ok(());
        }
        self.restart_capture(format).await?;
        Ok(())
    }

    /// Change the aspect and move to the best format for it
    pub async fn set_aspect(&mut self, aspect: AspectClass) -> Result<()> {
        self.ensure_open()?;
        if aspect == self.applied.aspect {
            return Ok(());
        }
        self.applied.aspect = aspect;
        let formats = self.active_formats().await;
        let best = pick_best_for_aspect(&formats, aspect, self.applied.format);
        if best != self.applied.format {
            self.restart_capture(best).await?;
        }
        Ok(())
    }

    /// Record the aspect without touching the capture format
    pub fn set_aspect_label(&mut self, aspect: AspectClass) {
        self.applied.aspect = aspect;
    }

    /// Active camera formats matching `aspect`, best first
    pub async fn formats_for_aspect(&self, aspect: AspectClass) -> Vec<CaptureFormat> {
        formats_for_aspect(&self.active_formats().await, aspect)
    }

    pub async fn list_cameras(&mut self) -> Vec<CameraDescriptor> {
        if let Err(e) = self.refresh_cameras().await {
            warn!("Camera enumeration failed: {}", e);
        }
        self.cameras.clone()
    }

    async fn active_formats(&self) -> Vec<CaptureFormat> {
        match &self.applied.active_camera_id {
            Some(id) => camera_formats(self.backend.clone(), id).await,
            None => Vec::new(),
        }
    }

    /// Stop/start the active stream at `format`; on failure the previous
    /// format is restored
    async fn restart_capture(&mut self, format: CaptureFormat) -> std::result::Result<(), CaptureError> {
        if self.paused {
            self.applied.format = format;
            return Ok(());
        }
        let camera_id = self
            .applied
            .active_camera_id
            .clone()
            .ok_or(CaptureError::NoDevices)?;
        let previous = self.applied.format;

        let result = match self.stream.clone() {
            Some(stream) => {
                if let Err(e) = stop_stream(&stream).await {
                    warn!("Failed to stop {} before restart: {}", camera_id, e);
                }
                start_capture(&stream, format, self.retry_pause).await
            }
            None => open_and_start(self.backend.clone(), &camera_id, format, self.retry_pause)
                .await
                .map(|stream| {
                    self.stream = Some(stream);
                }),
        };

        match result {
            Ok(()) => {
                self.applied.format = format;
                info!("Capture restarted at {}", format);
                Ok(())
            }
            Err(e) => {
                self.capture_failed(Some(&camera_id), &e);
                if let Some(stream) = self.stream.clone() {
                    let restored = run_blocking(move || {
                        let mut stream = stream.lock();
                        stream.start(previous)
                    })
                    .await;
                    if let Err(restore) = restored {
                        warn!("Could not restore {}: {}", previous, restore);
                    }
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Capabilities and orientation
    // ========================================================================

    /// Enumerate all cameras and send the canonical capability report
    pub async fn publish_caps(&mut self) -> DeviceCapabilities {
        if let Err(e) = self.refresh_cameras().await {
            warn!("Camera enumeration failed: {}", e);
        }
        let backend = self.backend.clone();
        let cameras = self.cameras.clone();
        let scanned = run_blocking(move || {
            Ok(DeviceCapabilities::build(cameras, |id| backend.formats_or_fallback(id)))
        })
        .await;
        let caps = match scanned {
            Ok(caps) => caps,
            Err(e) => {
                warn!("Format scan failed: {}", e);
                DeviceCapabilities::build(self.cameras.clone(), |_| vec![CaptureFormat::FALLBACK])
            }
        };
        debug!("Publishing capabilities for {} camera(s)", caps.cameras.len());
        self.sink.send(OutboundMessage::Caps(CapsReport::from(&caps)));
        caps
    }

    pub fn set_follow_orientation(&mut self, on: bool) {
        if let Some(orientation) = self.orientation.set_following(on) {
            self.send_orientation(orientation);
        }
    }

    pub fn observe_orientation(&mut self, orientation: Orientation) {
        if let Some(orientation) = self.orientation.observe(orientation) {
            self.send_orientation(orientation);
        }
    }

    fn send_orientation(&self, orientation: Orientation) {
        self.sink.send(OutboundMessage::Orientation { orientation });
        self.events.publish(SystemEvent::OrientationChanged {
            orientation: orientation.as_str().to_string(),
        });
    }

    // ========================================================================
    // Signaling events
    // ========================================================================

    /// React to one channel event; failures are logged, never propagated
    pub async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        let result = match event {
            SignalingEvent::Opened => {
                debug!("Signaling opened");
                Ok(())
            }
            SignalingEvent::Reconnected => self.on_reconnected().await,
            SignalingEvent::Closed { .. }
            | SignalingEvent::Failed { .. }
            | SignalingEvent::ReconnectScheduled { .. } => Ok(()),
            SignalingEvent::AnswerReceived(sdp) => self.handle_answer(&sdp).await,
            SignalingEvent::RemoteCandidate(candidate) => self.add_remote_candidate(candidate).await,
            SignalingEvent::ViewerReady => self.create_offer().await,
            SignalingEvent::ConfigPushed(config) => self.apply_config(&config).await,
            SignalingEvent::CapabilityRequest => {
                self.publish_caps().await;
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!("Signaling event not handled: {}", e);
        }
    }

    /// Negotiation state from the previous connection is stale
    async fn on_reconnected(&mut self) -> Result<()> {
        if matches!(self.phase, SessionPhase::Uninitialized | SessionPhase::Closed) {
            return Ok(());
        }
        self.publish_caps().await;
        self.orientation.reset_sent();
        if self.orientation.is_following() {
            self.set_follow_orientation(true);
        }
        self.ensure_signaling_and_offer().await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn refresh_cameras(&mut self) -> std::result::Result<Vec<CameraDescriptor>, CaptureError> {
        match enumerate_cameras(self.backend.clone()).await {
            Ok(cameras) => {
                self.cameras = cameras;
                Ok(self.cameras.clone())
            }
            Err(e) if self.cameras.is_empty() => Err(e),
            Err(e) => {
                warn!("Camera enumeration failed, using cached list: {}", e);
                Ok(self.cameras.clone())
            }
        }
    }

    fn find_camera(&self, camera_id: &str) -> Option<CameraDescriptor> {
        self.cameras.iter().find(|c| c.id == camera_id).cloned()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.phase == SessionPhase::Closed {
            return Err(AppError::SessionClosed);
        }
        Ok(())
    }

    fn set_phase(&mut self, to: SessionPhase) {
        if self.phase == to {
            return;
        }
        let from = self.phase;
        self.phase = to;
        debug!("Session phase {} -> {}", from, to);
        self.events.publish(SystemEvent::SessionPhaseChanged {
            from: from.name().to_string(),
            to: to.name().to_string(),
        });
    }

    fn capture_failed(&self, camera: Option<&str>, error: &CaptureError) {
        warn!("Capture failed: {}", error);
        self.events.publish(SystemEvent::CaptureFailed {
            camera: camera.map(str::to_string),
            reason: error.to_string(),
        });
    }

    fn negotiation_failed(&self, stage: &str, error: &NegotiationError) {
        warn!("Negotiation failed at {}: {}", stage, error);
        self.events.publish(SystemEvent::NegotiationFailed {
            stage: stage.to_string(),
            reason: error.to_string(),
        });
    }
}

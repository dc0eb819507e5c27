//! Owner task for the session orchestrator
//!
//! Signaling events, local ICE candidates and operator commands are all
//! serialized through one task, so capture and sender mutations never
//! interleave.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::orchestrator::SessionOrchestrator;
use super::state::SessionSnapshot;
use crate::capture::{AspectClass, CameraDescriptor, CaptureFormat, DeviceCapabilities};
use crate::error::{AppError, Result};
use crate::signaling::{Orientation, RemoteConfig, SignalingEvent};
use crate::webrtc::IceCandidate;

const COMMAND_QUEUE: usize = 32;

type Reply<T> = oneshot::Sender<T>;

/// Operator commands for the owner task
#[derive(Debug)]
pub enum SessionCommand {
    ApplyConfig(Box<RemoteConfig>, Reply<Result<()>>),
    SwitchCamera(String, Reply<Result<()>>),
    ToggleFacing(Reply<Result<()>>),
    SetBitrate(i64, Reply<u32>),
    SetMic(bool, Reply<Result<()>>),
    ApplyVideoQuality(CaptureFormat, Reply<Result<()>>),
    SetAspect(AspectClass, Reply<Result<()>>),
    SetAspectLabel(AspectClass, Reply<()>),
    SetFollowOrientation(bool, Reply<()>),
    ObserveOrientation(Orientation),
    FormatsForAspect(AspectClass, Reply<Vec<CaptureFormat>>),
    ListCameras(Reply<Vec<CameraDescriptor>>),
    PublishCaps(Reply<DeviceCapabilities>),
    Renegotiate(Reply<Result<()>>),
    PauseCapture(Reply<()>),
    ResumeCapture(Reply<Result<()>>),
    Snapshot(Reply<SessionSnapshot>),
    Shutdown(Reply<()>),
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| AppError::SessionClosed)?;
        rx.await.map_err(|_| AppError::SessionClosed)
    }

    pub async fn apply_config(&self, config: RemoteConfig) -> Result<()> {
        self.request(|tx| SessionCommand::ApplyConfig(Box::new(config), tx)).await?
    }

    pub async fn switch_camera(&self, camera_id: impl Into<String>) -> Result<()> {
        let camera_id = camera_id.into();
        self.request(|tx| SessionCommand::SwitchCamera(camera_id, tx)).await?
    }

    pub async fn toggle_facing(&self) -> Result<()> {
        self.request(SessionCommand::ToggleFacing).await?
    }

    /// Returns the clamped value actually stored
    pub async fn set_video_bitrate_kbps(&self, kbps: i64) -> Result<u32> {
        self.request(|tx| SessionCommand::SetBitrate(kbps, tx)).await
    }

    pub async fn set_mic_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|tx| SessionCommand::SetMic(enabled, tx)).await?
    }

    pub async fn apply_video_quality(&self, format: CaptureFormat) -> Result<()> {
        self.request(|tx| SessionCommand::ApplyVideoQuality(format, tx)).await?
    }

    pub async fn set_aspect(&self, aspect: AspectClass) -> Result<()> {
        self.request(|tx| SessionCommand::SetAspect(aspect, tx)).await?
    }

    pub async fn set_aspect_label(&self, aspect: AspectClass) -> Result<()> {
        self.request(|tx| SessionCommand::SetAspectLabel(aspect, tx)).await
    }

    pub async fn set_follow_orientation(&self, on: bool) -> Result<()> {
        self.request(|tx| SessionCommand::SetFollowOrientation(on, tx)).await
    }

    /// Feed a sensor reading; fire and forget
    pub fn observe_orientation(&self, orientation: Orientation) {
        if self
            .command_tx
            .try_send(SessionCommand::ObserveOrientation(orientation))
            .is_err()
        {
            debug!("Orientation reading dropped");
        }
    }

    pub async fn formats_for_aspect(&self, aspect: AspectClass) -> Result<Vec<CaptureFormat>> {
        self.request(|tx| SessionCommand::FormatsForAspect(aspect, tx)).await
    }

    pub async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        self.request(SessionCommand::ListCameras).await
    }

    pub async fn publish_caps(&self) -> Result<DeviceCapabilities> {
        self.request(SessionCommand::PublishCaps).await
    }

    /// Liveness ping plus a fresh offer
    pub async fn renegotiate(&self) -> Result<()> {
        self.request(SessionCommand::Renegotiate).await?
    }

    pub async fn pause_capture(&self) -> Result<()> {
        self.request(SessionCommand::PauseCapture).await
    }

    pub async fn resume_capture(&self) -> Result<()> {
        self.request(SessionCommand::ResumeCapture).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(SessionCommand::Snapshot).await
    }

    /// Release capture and the peer, then stop the owner task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(SessionCommand::Shutdown).await
    }
}

/// Start the owner task.
///
/// The orchestrator is initialized first; a failed init is logged and the
/// task keeps serving events and commands so a later config can retry.
pub fn spawn_session(
    orchestrator: SessionOrchestrator,
    candidates: mpsc::UnboundedReceiver<IceCandidate>,
    signaling: mpsc::UnboundedReceiver<SignalingEvent>,
) -> (SessionHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let task = tokio::spawn(run(orchestrator, candidates, signaling, command_rx));
    (SessionHandle { command_tx }, task)
}

async fn run(
    mut orch: SessionOrchestrator,
    mut candidates: mpsc::UnboundedReceiver<IceCandidate>,
    mut signaling: mpsc::UnboundedReceiver<SignalingEvent>,
    mut commands: mpsc::Receiver<SessionCommand>,
) {
    if let Err(e) = orch.init_and_start().await {
        warn!("Session init failed: {}", e);
    }

    let mut signaling_open = true;
    loop {
        tokio::select! {
            biased;

            event = signaling.recv(), if signaling_open => match event {
                Some(event) => orch.handle_signaling_event(event).await,
                None => {
                    debug!("Signaling event stream ended");
                    signaling_open = false;
                }
            },
            Some(candidate) = candidates.recv() => orch.forward_local_candidate(candidate),
            cmd = commands.recv() => match cmd {
                Some(SessionCommand::Shutdown(reply)) => {
                    orch.release().await;
                    let _ = reply.send(());
                    break;
                }
                Some(cmd) => handle_command(&mut orch, cmd).await,
                None => {
                    orch.release().await;
                    break;
                }
            },
        }
    }
    info!("Session stopped");
}

async fn handle_command(orch: &mut SessionOrchestrator, cmd: SessionCommand) {
    match cmd {
        SessionCommand::ApplyConfig(config, reply) => {
            let _ = reply.send(orch.apply_config(&config).await);
        }
        SessionCommand::SwitchCamera(camera_id, reply) => {
            let _ = reply.send(orch.switch_to_device(&camera_id).await);
        }
        SessionCommand::ToggleFacing(reply) => {
            let _ = reply.send(orch.toggle_facing().await);
        }
        SessionCommand::SetBitrate(kbps, reply) => {
            let _ = reply.send(orch.set_video_bitrate_kbps(kbps).await);
        }
        SessionCommand::SetMic(enabled, reply) => {
            let _ = reply.send(orch.set_mic_enabled(enabled).await);
        }
        SessionCommand::ApplyVideoQuality(format, reply) => {
            let _ = reply.send(orch.apply_video_quality(format).await);
        }
        SessionCommand::SetAspect(aspect, reply) => {
            let _ = reply.send(orch.set_aspect(aspect).await);
        }
        SessionCommand::SetAspectLabel(aspect, reply) => {
            orch.set_aspect_label(aspect);
            let _ = reply.send(());
        }
        SessionCommand::SetFollowOrientation(on, reply) => {
            orch.set_follow_orientation(on);
            let _ = reply.send(());
        }
        SessionCommand::ObserveOrientation(orientation) => orch.observe_orientation(orientation),
        SessionCommand::FormatsForAspect(aspect, reply) => {
            let _ = reply.send(orch.formats_for_aspect(aspect).await);
        }
        SessionCommand::ListCameras(reply) => {
            let _ = reply.send(orch.list_cameras().await);
        }
        SessionCommand::PublishCaps(reply) => {
            let _ = reply.send(orch.publish_caps().await);
        }
        SessionCommand::Renegotiate(reply) => {
            let _ = reply.send(orch.ensure_signaling_and_offer().await);
        }
        SessionCommand::PauseCapture(reply) => {
            orch.pause_capture().await;
            let _ = reply.send(());
        }
        SessionCommand::ResumeCapture(reply) => {
            let _ = reply.send(orch.resume_capture().await);
        }
        SessionCommand::Snapshot(reply) => {
            let _ = reply.send(orch.snapshot());
        }
        SessionCommand::Shutdown(reply) => {
            orch.release().await;
            let _ = reply.send(());
        }
    }
}

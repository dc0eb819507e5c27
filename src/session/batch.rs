//! Staged operator edits, committed as one unit
//!
//! Edits only touch the pending copy. `commit` re-reads the session, applies
//! every edited field that differs from what is live, in a fixed order, and
//! renegotiates once. A commit interrupted by the microphone permission
//! prompt resumes where it stopped.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::runner::SessionHandle;
use super::state::{clamp_bitrate, SessionSnapshot};
use crate::capture::{AspectClass, CaptureFormat};
use crate::error::Result;
use crate::events::{EventBus, SystemEvent};

/// What the controller needs from a running session
#[async_trait]
pub trait SessionControl: Send + Sync {
    async fn snapshot(&self) -> Result<SessionSnapshot>;
    async fn switch_camera(&self, camera_id: &str) -> Result<()>;
    async fn set_mic_enabled(&self, enabled: bool) -> Result<()>;
    async fn apply_video_quality(&self, format: CaptureFormat) -> Result<()>;
    async fn set_video_bitrate_kbps(&self, kbps: i64) -> Result<u32>;
    /// `label_only` records the aspect without re-deriving the format
    async fn set_aspect(&self, aspect: AspectClass, label_only: bool) -> Result<()>;
    async fn set_follow_orientation(&self, on: bool) -> Result<()>;
    async fn formats_for_aspect(&self, aspect: AspectClass) -> Result<Vec<CaptureFormat>>;
    async fn renegotiate(&self) -> Result<()>;
}

#[async_trait]
impl SessionControl for SessionHandle {
    async fn snapshot(&self) -> Result<SessionSnapshot> {
        SessionHandle::snapshot(self).await
    }

    async fn switch_camera(&self, camera_id: &str) -> Result<()> {
        SessionHandle::switch_camera(self, camera_id).await
    }

    async fn set_mic_enabled(&self, enabled: bool) -> Result<()> {
        SessionHandle::set_mic_enabled(self, enabled).await
    }

    async fn apply_video_quality(&self, format: CaptureFormat) -> Result<()> {
        SessionHandle::apply_video_quality(self, format).await
    }

    async fn set_video_bitrate_kbps(&self, kbps: i64) -> Result<u32> {
        SessionHandle::set_video_bitrate_kbps(self, kbps).await
    }

    async fn set_aspect(&self, aspect: AspectClass, label_only: bool) -> Result<()> {
        if label_only {
            SessionHandle::set_aspect_label(self, aspect).await
        } else {
            SessionHandle::set_aspect(self, aspect).await
        }
    }

    async fn set_follow_orientation(&self, on: bool) -> Result<()> {
        SessionHandle::set_follow_orientation(self, on).await
    }

    async fn formats_for_aspect(&self, aspect: AspectClass) -> Result<Vec<CaptureFormat>> {
        SessionHandle::formats_for_aspect(self, aspect).await
    }

    async fn renegotiate(&self) -> Result<()> {
        SessionHandle::renegotiate(self).await
    }
}

/// Runtime permission check for the microphone
pub trait PermissionGate: Send + Sync {
    fn mic_permitted(&self) -> bool;
}

/// Gate for platforms without runtime permissions
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn mic_permitted(&self) -> bool {
        true
    }
}

/// Provisional copy of the applied configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub camera_id: Option<String>,
    pub mic_enabled: bool,
    pub format: CaptureFormat,
    pub bitrate_kbps: u32,
    pub aspect: AspectClass,
    pub follow_orientation: bool,
}

impl PendingEdit {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            camera_id: snapshot.applied.active_camera_id.clone(),
            mic_enabled: snapshot.applied.mic_enabled,
            format: snapshot.applied.format,
            bitrate_kbps: snapshot.applied.bitrate_kbps,
            aspect: snapshot.applied.aspect,
            follow_orientation: snapshot.follow_orientation,
        }
    }
}

/// Fields edited since the last commit
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Touched {
    camera: bool,
    mic: bool,
    quality: bool,
    bitrate: bool,
    aspect: bool,
    follow: bool,
}

impl Touched {
    fn any(&self) -> bool {
        self.camera || self.mic || self.quality || self.bitrate || self.aspect || self.follow
    }
}

impl PendingEdit {
    /// Take live values for every field the operator has not edited
    fn refresh_untouched(&mut self, live: &PendingEdit, touched: Touched) {
        if !touched.camera {
            self.camera_id = live.camera_id.clone();
        }
        if !touched.mic {
            self.mic_enabled = live.mic_enabled;
        }
        if !touched.quality {
            self.format = live.format;
        }
        if !touched.bitrate {
            self.bitrate_kbps = live.bitrate_kbps;
        }
        if !touched.aspect {
            self.aspect = live.aspect;
        }
        if !touched.follow {
            self.follow_orientation = live.follow_orientation;
        }
    }
}

/// One applied step of a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStep {
    Camera,
    Microphone,
    Quality,
    Bitrate,
    Aspect,
    Orientation,
    Renegotiate,
}

impl CommitStep {
    pub fn name(&self) -> &'static str {
        match self {
            CommitStep::Camera => "camera",
            CommitStep::Microphone => "microphone",
            CommitStep::Quality => "quality",
            CommitStep::Bitrate => "bitrate",
            CommitStep::Aspect => "aspect",
            CommitStep::Orientation => "orientation",
            CommitStep::Renegotiate => "renegotiate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied(Vec<CommitStep>),
    /// Ask for the microphone permission, then commit again (or call
    /// `permission_denied` first)
    NeedsMicPermission,
    NothingToApply,
}

pub struct BatchController {
    control: Arc<dyn SessionControl>,
    gate: Arc<dyn PermissionGate>,
    events: Arc<EventBus>,
    /// Values in effect on the session as of the last read
    baseline: PendingEdit,
    pending: PendingEdit,
    touched: Touched,
    /// Steps applied by a commit that paused for permission
    carried: Vec<CommitStep>,
}

impl BatchController {
    /// Seed the pending edit from the session's applied state
    pub async fn open(
        control: Arc<dyn SessionControl>,
        gate: Arc<dyn PermissionGate>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let snapshot = control.snapshot().await?;
        let baseline = PendingEdit::from_snapshot(&snapshot);
        Ok(Self {
            control,
            gate,
            events,
            pending: baseline.clone(),
            baseline,
            touched: Touched::default(),
            carried: Vec::new(),
        })
    }

    pub fn pending(&self) -> &PendingEdit {
        &self.pending
    }

    pub fn is_dirty(&self) -> bool {
        self.touched.any()
    }

    pub fn select_camera(&mut self, camera_id: impl Into<String>) {
        self.pending.camera_id = Some(camera_id.into());
        self.touched.camera = true;
    }

    pub fn set_mic_enabled(&mut self, enabled: bool) {
        self.pending.mic_enabled = enabled;
        self.touched.mic = true;
    }

    pub fn select_quality(&mut self, format: CaptureFormat) {
        self.pending.format = format;
        self.touched.quality = true;
    }

    /// Stores the clamped value
    pub fn set_bitrate_kbps(&mut self, kbps: i64) {
        self.pending.bitrate_kbps = clamp_bitrate(kbps);
        self.touched.bitrate = true;
    }

    pub fn set_aspect(&mut self, aspect: AspectClass) {
        self.pending.aspect = aspect;
        self.touched.aspect = true;
    }

    pub fn set_follow_orientation(&mut self, on: bool) {
        self.pending.follow_orientation = on;
        self.touched.follow = true;
    }

    /// Quality choices for the pending aspect on the active camera
    pub async fn quality_options(&self) -> Result<Vec<CaptureFormat>> {
        self.control.formats_for_aspect(self.pending.aspect).await
    }

    /// Drop every staged edit
    pub fn discard(&mut self) {
        self.pending = self.baseline.clone();
        self.touched = Touched::default();
        self.carried.clear();
    }

    /// The permission prompt was refused: keep the microphone as it is
    pub fn permission_denied(&mut self) {
        self.pending.mic_enabled = self.baseline.mic_enabled;
        self.touched.mic = false;
    }

    /// Apply staged edits in order: camera, microphone, quality or bitrate,
    /// aspect, orientation-follow, then one renegotiation.
    ///
    /// Edited fields are compared against the session as it is now, not as
    /// it was when the batch opened. Applied steps are not repeated by a
    /// retry after an error or a permission pause.
    pub async fn commit(&mut self) -> Result<CommitOutcome> {
        if !self.touched.any() && self.carried.is_empty() {
            return Ok(CommitOutcome::NothingToApply);
        }

        self.baseline = PendingEdit::from_snapshot(&self.control.snapshot().await?);
        self.pending.refresh_untouched(&self.baseline, self.touched);

        // 1. camera
        if self.touched.camera {
            if let Some(camera_id) = self.pending.camera_id.clone() {
                if self.baseline.camera_id.as_deref() != Some(camera_id.as_str()) {
                    self.control.switch_camera(&camera_id).await?;
                    self.baseline.camera_id = Some(camera_id);
                    self.carried.push(CommitStep::Camera);
                }
            }
            self.touched.camera = false;
        }

        // 2. microphone, behind the permission gate
        if self.touched.mic {
            if self.pending.mic_enabled != self.baseline.mic_enabled {
                if self.pending.mic_enabled && !self.gate.mic_permitted() {
                    info!("Commit paused for microphone permission");
                    return Ok(CommitOutcome::NeedsMicPermission);
                }
                self.control.set_mic_enabled(self.pending.mic_enabled).await?;
                self.baseline.mic_enabled = self.pending.mic_enabled;
                self.carried.push(CommitStep::Microphone);
            }
            self.touched.mic = false;
        }

        // 3. quality, which carries the bitrate along; else bitrate alone
        let quality_changed = self.touched.quality && self.pending.format != self.baseline.format;
        if quality_changed {
            self.control.apply_video_quality(self.pending.format).await?;
            self.baseline.format = self.pending.format;
            self.touched.quality = false;
            let kbps = self
                .control
                .set_video_bitrate_kbps(self.pending.bitrate_kbps as i64)
                .await?;
            self.baseline.bitrate_kbps = kbps;
            self.touched.bitrate = false;
            self.carried.push(CommitStep::Quality);
        } else if self.touched.bitrate && self.pending.bitrate_kbps != self.baseline.bitrate_kbps {
            let kbps = self
                .control
                .set_video_bitrate_kbps(self.pending.bitrate_kbps as i64)
                .await?;
            self.baseline.bitrate_kbps = kbps;
            self.carried.push(CommitStep::Bitrate);
        }
        self.touched.quality = false;
        self.touched.bitrate = false;

        // 4. aspect; a chosen quality already fixes the format
        if self.touched.aspect && self.pending.aspect != self.baseline.aspect {
            self.control.set_aspect(self.pending.aspect, quality_changed).await?;
            self.baseline.aspect = self.pending.aspect;
            self.carried.push(CommitStep::Aspect);
        }
        self.touched.aspect = false;

        // 5. orientation follow
        if self.touched.follow && self.pending.follow_orientation != self.baseline.follow_orientation {
            self.control
                .set_follow_orientation(self.pending.follow_orientation)
                .await?;
            self.baseline.follow_orientation = self.pending.follow_orientation;
            self.carried.push(CommitStep::Orientation);
        }
        self.touched.follow = false;

        if self.carried.is_empty() {
            self.pending = self.baseline.clone();
            debug!("Commit found nothing different from the live state");
            return Ok(CommitOutcome::NothingToApply);
        }

        // 6. renegotiate once
        self.control.renegotiate().await?;
        let mut steps = std::mem::take(&mut self.carried);
        steps.push(CommitStep::Renegotiate);
        self.pending = self.baseline.clone();

        info!(
            "Committed {}",
            steps.iter().map(CommitStep::name).collect::<Vec<_>>().join(", ")
        );
        self.events.publish(SystemEvent::ControlsCommitted {
            steps: steps.iter().map(|s| s.name().to_string()).collect(),
        });
        Ok(CommitOutcome::Applied(steps))
    }
}

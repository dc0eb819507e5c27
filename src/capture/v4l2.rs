//! V4L2 capture backend
//!
//! Cameras are the `/dev/video*` nodes that report VIDEO_CAPTURE. Formats
//! are discovered through frame-size and frame-interval enumeration.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream as _;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use super::backend::{BackendKind, CaptureBackend, CaptureStream};
use super::caps::label_cameras;
use super::types::{CameraDescriptor, CaptureFormat, Facing};
use crate::error::CaptureError;
use crate::utils::LogThrottler;

/// Pixel formats we can hand to an encoder, in order of preference
const PREFERRED_FOURCCS: [&[u8; 4]; 3] = [b"MJPG", b"YUYV", b"NV12"];

/// Sizes tried when a driver reports a stepwise range
const STEPWISE_SIZES: [(u32, u32); 5] = [
    (640, 480),
    (1280, 720),
    (1440, 1080),
    (1920, 1080),
    (3840, 2160),
];

const BUFFER_COUNT: u32 = 4;
const FRAME_TIMEOUT: Duration = Duration::from_millis(500);
const START_TIMEOUT: Duration = Duration::from_secs(3);

/// Backend over the kernel's V4L2 capture devices
pub struct V4l2Backend {
    device_dir: PathBuf,
}

impl V4l2Backend {
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
        }
    }

    fn scan_nodes(&self) -> Result<Vec<PathBuf>, CaptureError> {
        let mut nodes: Vec<PathBuf> = std::fs::read_dir(&self.device_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("video"))
                    .unwrap_or(false)
            })
            .collect();
        nodes.sort();
        Ok(nodes)
    }
}

/// Guess facing from the driver's card name
fn facing_from_card(card: &str) -> Facing {
    let card = card.to_lowercase();
    if card.contains("front") || card.contains("user") {
        Facing::Front
    } else if card.contains("back") || card.contains("rear") || card.contains("world") {
        Facing::Back
    } else {
        Facing::Other
    }
}

fn pick_fourcc(device: &Device) -> Option<FourCC> {
    let available: Vec<FourCC> = device
        .enum_formats()
        .ok()?
        .into_iter()
        .map(|desc| desc.fourcc)
        .collect();
    PREFERRED_FOURCCS
        .iter()
        .map(|code| FourCC::new(code))
        .find(|fourcc| available.contains(fourcc))
}

fn enumerate_fps(device: &Device, fourcc: FourCC, width: u32, height: u32) -> Vec<u32> {
    let mut fps_list = Vec::new();
    match device.enum_frameintervals(fourcc, width, height) {
        Ok(intervals) => {
            for interval in intervals {
                match interval.interval {
                    FrameIntervalEnum::Discrete(fraction) => {
                        if fraction.numerator > 0 {
                            fps_list.push(fraction.denominator / fraction.numerator);
                        }
                    }
                    FrameIntervalEnum::Stepwise(step) => {
                        if step.max.numerator > 0 && step.min.numerator > 0 {
                            fps_list.push(step.max.denominator / step.max.numerator);
                            fps_list.push(step.min.denominator / step.min.numerator);
                        }
                    }
                }
            }
        }
        Err(e) => {
            debug!("Frame interval enumeration failed for {}x{}: {}", width, height, e);
            fps_list.push(30);
        }
    }
    fps_list.retain(|fps| *fps > 0);
    fps_list.sort_unstable();
    fps_list.dedup();
    fps_list
}

fn enumerate_formats(device: &Device, fourcc: FourCC) -> Vec<CaptureFormat> {
    let mut sizes = Vec::new();
    match device.enum_framesizes(fourcc) {
        Ok(framesizes) => {
            for size in framesizes {
                match size.size {
                    FrameSizeEnum::Discrete(d) => sizes.push((d.width, d.height)),
                    FrameSizeEnum::Stepwise(s) => {
                        sizes.extend(STEPWISE_SIZES.iter().copied().filter(|(w, h)| {
                            *w >= s.min_width
                                && *w <= s.max_width
                                && *h >= s.min_height
                                && *h <= s.max_height
                        }));
                    }
                }
            }
        }
        Err(e) => debug!("Frame size enumeration failed for {}: {}", fourcc, e),
    }

    let mut formats: Vec<CaptureFormat> = sizes
        .into_iter()
        .flat_map(|(w, h)| {
            enumerate_fps(device, fourcc, w, h)
                .into_iter()
                .map(move |fps| CaptureFormat::new(w, h, fps))
        })
        .collect();
    formats.sort_by_key(|f| (f.width, f.height, f.fps));
    formats.dedup();
    formats
}

impl CaptureBackend for V4l2Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::V4l2
    }

    fn enumerate(&self) -> Result<Vec<CameraDescriptor>, CaptureError> {
        let mut cameras = Vec::new();
        for path in self.scan_nodes()? {
            let device = match Device::with_path(&path) {
                Ok(d) => d,
                Err(e) => {
                    debug!("Failed to open {:?}: {}", path, e);
                    continue;
                }
            };
            let caps = match device.query_caps() {
                Ok(c) => c,
                Err(e) => {
                    debug!("Failed to query {:?}: {}", path, e);
                    continue;
                }
            };
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                debug!("Skipping non-capture node {:?}", path);
                continue;
            }
            let facing = facing_from_card(&caps.card);
            debug!("Found camera {:?} ({}, {})", path, caps.card, facing);
            cameras.push(CameraDescriptor::new(path.display().to_string(), facing));
        }
        label_cameras(&mut cameras);
        info!("Enumerated {} V4L2 camera(s)", cameras.len());
        Ok(cameras)
    }

    fn formats_for(&self, camera_id: &str) -> Vec<CaptureFormat> {
        let device = match Device::with_path(camera_id) {
            Ok(d) => d,
            Err(e) => {
                debug!("Cannot open {} for format query: {}", camera_id, e);
                return Vec::new();
            }
        };
        match pick_fourcc(&device) {
            Some(fourcc) => enumerate_formats(&device, fourcc),
            None => {
                warn!("{} offers no usable pixel format", camera_id);
                Vec::new()
            }
        }
    }

    fn open(&self, camera_id: &str) -> Result<Box<dyn CaptureStream>, CaptureError> {
        if !Path::new(camera_id).exists() {
            return Err(CaptureError::UnknownCamera(camera_id.to_string()));
        }
        Ok(Box::new(V4l2Stream::new(camera_id)))
    }
}

/// Streaming capture on one V4L2 node
///
/// The frame loop runs on its own thread; `start` waits (bounded) until
/// the device is configured and streaming, so format and busy errors
/// surface synchronously.
pub struct V4l2Stream {
    camera_id: String,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    format: Option<CaptureFormat>,
}

impl V4l2Stream {
    pub fn new(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
            format: None,
        }
    }
}

fn open_configured(camera_id: &str, format: CaptureFormat) -> Result<Device, CaptureError> {
    let device = Device::with_path(camera_id).map_err(|e| with_camera(e.into(), camera_id))?;
    let fourcc = pick_fourcc(&device).unwrap_or_else(|| FourCC::new(b"MJPG"));

    let requested = Format::new(format.width, format.height, fourcc);
    let actual = device
        .set_format(&requested)
        .map_err(|e| with_camera(e.into(), camera_id))?;
    if actual.width != format.width || actual.height != format.height {
        return Err(CaptureError::FormatRejected {
            camera: camera_id.to_string(),
            width: format.width,
            height: format.height,
            fps: format.fps,
        });
    }

    if let Err(e) = device.set_params(&Parameters::with_fps(format.fps)) {
        warn!("{} ignored frame rate {}: {}", camera_id, format.fps, e);
    }
    Ok(device)
}

fn with_camera(err: CaptureError, camera_id: &str) -> CaptureError {
    match err {
        CaptureError::DeviceBusy { reason, .. } => CaptureError::DeviceBusy {
            camera: camera_id.to_string(),
            reason,
        },
        other => other,
    }
}

fn frame_loop(
    camera_id: String,
    format: CaptureFormat,
    stop_flag: Arc<AtomicBool>,
    ready: std_mpsc::Sender<Result<(), CaptureError>>,
) {
    let mut device = match open_configured(&camera_id, format) {
        Ok(d) => d,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let mut stream = match MmapStream::with_buffers(&mut device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(with_camera(e.into(), &camera_id)));
            return;
        }
    };
    stream.set_timeout(FRAME_TIMEOUT);
    let _ = ready.send(Ok(()));
    info!("Capture started on {} at {}", camera_id, format);

    let throttler = LogThrottler::with_secs(5);
    let mut frames: u64 = 0;
    while !stop_flag.load(Ordering::Relaxed) {
        match stream.next() {
            Ok((_, meta)) => {
                if meta.bytesused > 0 {
                    frames += 1;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                crate::warn_throttled!(throttler, "timeout", "No frames from {}", camera_id);
            }
            Err(e) => {
                crate::warn_throttled!(throttler, "io", "Capture error on {}: {}", camera_id, e);
                if matches!(e.raw_os_error(), Some(5) | Some(6) | Some(19)) {
                    warn!("Camera {} went away", camera_id);
                    break;
                }
            }
        }
    }
    info!("Capture stopped on {} after {} frames", camera_id, frames);
}

impl CaptureStream for V4l2Stream {
    fn camera_id(&self) -> &str {
        &self.camera_id
    }

    fn start(&mut self, format: CaptureFormat) -> Result<(), CaptureError> {
        if !format.is_valid() {
            return Err(CaptureError::FormatRejected {
                camera: self.camera_id.clone(),
                width: format.width,
                height: format.height,
                fps: format.fps,
            });
        }
        self.stop()?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let camera_id = self.camera_id.clone();
        let flag = stop_flag.clone();
        let worker = std::thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || frame_loop(camera_id, format, flag, ready_tx))?;

        let outcome = ready_rx
            .recv_timeout(START_TIMEOUT)
            .unwrap_or_else(|_| {
                Err(CaptureError::DeviceBusy {
                    camera: self.camera_id.clone(),
                    reason: "timed out waiting for stream".to_string(),
                })
            });

        match outcome {
            Ok(()) => {
                self.stop_flag = stop_flag;
                self.worker = Some(worker);
                self.format = Some(format);
                Ok(())
            }
            Err(e) => {
                stop_flag.store(true, Ordering::SeqCst);
                let _ = worker.join();
                Err(e)
            }
        }
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Capture thread for {} panicked", self.camera_id);
            }
        }
        self.format = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.is_finished())
            .unwrap_or(false)
    }

    fn format(&self) -> Option<CaptureFormat> {
        self.format
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

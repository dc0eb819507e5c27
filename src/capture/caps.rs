//! Capability reports and format selection
//!
//! Everything here is pure: it takes the flat per-camera format lists a
//! backend reports and produces the canonical, deterministic views the
//! viewer UI and the orchestrator rely on.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::types::{AspectClass, CameraDescriptor, CaptureFormat, Facing};

/// One resolution with every distinct frame rate it supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatCaps {
    pub w: u32,
    pub h: u32,
    /// Ascending, no duplicates
    pub fps: Vec<u32>,
}

impl FormatCaps {
    pub fn max_fps(&self) -> u32 {
        self.fps.last().copied().unwrap_or(0)
    }

    fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }
}

/// Full capability report for all cameras
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub cameras: Vec<CameraDescriptor>,
    pub formats_by_camera: BTreeMap<String, Vec<FormatCaps>>,
}

impl DeviceCapabilities {
    /// Build a report from labelled cameras and a per-camera format lookup
    pub fn build<F>(cameras: Vec<CameraDescriptor>, mut formats_for: F) -> Self
    where
        F: FnMut(&str) -> Vec<CaptureFormat>,
    {
        let formats_by_camera = cameras
            .iter()
            .map(|cam| (cam.id.clone(), group_formats(&formats_for(&cam.id))))
            .collect();
        Self {
            cameras,
            formats_by_camera,
        }
    }
}

/// Group flat formats by resolution.
///
/// Result is sorted by descending area, then descending max fps.
pub fn group_formats(formats: &[CaptureFormat]) -> Vec<FormatCaps> {
    let mut grouped: BTreeMap<(u32, u32), Vec<u32>> = BTreeMap::new();
    for f in formats {
        grouped.entry((f.width, f.height)).or_default().push(f.fps);
    }

    let mut caps: Vec<FormatCaps> = grouped
        .into_iter()
        .map(|((w, h), mut fps)| {
            fps.sort_unstable();
            fps.dedup();
            FormatCaps { w, h, fps }
        })
        .collect();

    caps.sort_by_key(|c| (Reverse(c.area()), Reverse(c.max_fps())));
    caps
}

/// Assign human labels: "Back N (id)", "Front N (id)", "Other (id)".
///
/// N counts cameras of the same facing in enumeration order.
pub fn label_cameras(cameras: &mut [CameraDescriptor]) {
    let mut back = 0;
    let mut front = 0;
    for cam in cameras.iter_mut() {
        cam.label = match cam.facing {
            Facing::Back => {
                back += 1;
                format!("Back {} ({})", back - 1, cam.id)
            }
            Facing::Front => {
                front += 1;
                format!("Front {} ({})", front - 1, cam.id)
            }
            Facing::Other => format!("Other ({})", cam.id),
        };
    }
}

/// Formats matching `aspect`, largest area first, then highest fps
pub fn formats_for_aspect(formats: &[CaptureFormat], aspect: AspectClass) -> Vec<CaptureFormat> {
    let mut matching: Vec<CaptureFormat> = formats
        .iter()
        .filter(|f| aspect.matches(f))
        .copied()
        .collect();
    matching.sort_by_key(|f| (Reverse(f.area()), Reverse(f.fps)));
    matching.dedup();
    matching
}

/// Best format for `aspect`, or `current` when nothing matches
pub fn pick_best_for_aspect(
    formats: &[CaptureFormat],
    aspect: AspectClass,
    current: CaptureFormat,
) -> CaptureFormat {
    formats_for_aspect(formats, aspect)
        .first()
        .copied()
        .unwrap_or(current)
}

/// Highest-resolution, highest-fps format, or the fallback mode
pub fn pick_initial_format(formats: &[CaptureFormat]) -> CaptureFormat {
    pick_best_for_aspect(formats, AspectClass::AutoMax, CaptureFormat::FALLBACK)
}

/// First camera facing `facing`, else the first camera
pub fn pick_camera(cameras: &[CameraDescriptor], facing: Facing) -> Option<&CameraDescriptor> {
    cameras
        .iter()
        .find(|c| c.facing == facing)
        .or_else(|| cameras.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(w: u32, h: u32, fps: u32) -> CaptureFormat {
        CaptureFormat::new(w, h, fps)
    }

    #[test]
    fn test_group_formats_canonical_order() {
        let raw = vec![
            fmt(640, 480, 30),
            fmt(1920, 1080, 30),
            fmt(1280, 720, 60),
            fmt(1920, 1080, 24),
            fmt(1280, 720, 30),
            fmt(1920, 1080, 30),
            // Same area as 1280x720, lower max fps
            fmt(720, 1280, 30),
        ];

        let caps = group_formats(&raw);
        let shape: Vec<(u32, u32, Vec<u32>)> =
            caps.iter().map(|c| (c.w, c.h, c.fps.clone())).collect();

        assert_eq!(
            shape,
            vec![
                (1920, 1080, vec![24, 30]),
                (1280, 720, vec![30, 60]),
                (720, 1280, vec![30]),
                (640, 480, vec![30]),
            ]
        );
    }

    #[test]
    fn test_group_formats_is_order_independent() {
        let mut raw = vec![
            fmt(1280, 720, 30),
            fmt(1920, 1080, 30),
            fmt(640, 480, 15),
            fmt(640, 480, 30),
        ];
        let first = group_formats(&raw);
        raw.reverse();
        assert_eq!(first, group_formats(&raw));
    }

    #[test]
    fn test_labels() {
        let mut cams = vec![
            CameraDescriptor::new("0", Facing::Back),
            CameraDescriptor::new("1", Facing::Front),
            CameraDescriptor::new("2", Facing::Back),
            CameraDescriptor::new("usb", Facing::Other),
        ];
        label_cameras(&mut cams);
        let labels: Vec<&str> = cams.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Back 0 (0)", "Front 0 (1)", "Back 1 (2)", "Other (usb)"]);
    }

    #[test]
    fn test_formats_for_aspect_filters_and_sorts() {
        let raw = vec![
            fmt(1280, 720, 30),
            fmt(640, 480, 30),
            fmt(1920, 1080, 30),
            fmt(1280, 720, 60),
            fmt(1440, 1080, 30),
        ];
        assert_eq!(
            formats_for_aspect(&raw, AspectClass::Ratio16x9),
            vec![fmt(1920, 1080, 30), fmt(1280, 720, 60), fmt(1280, 720, 30)]
        );
        assert_eq!(
            formats_for_aspect(&raw, AspectClass::Ratio4x3),
            vec![fmt(1440, 1080, 30), fmt(640, 480, 30)]
        );
        assert!(formats_for_aspect(&raw, AspectClass::Ratio1x1).is_empty());
    }

    #[test]
    fn test_pick_best_keeps_current_without_match() {
        let raw = vec![fmt(1280, 720, 30)];
        let current = fmt(1280, 720, 30);
        assert_eq!(pick_best_for_aspect(&raw, AspectClass::Ratio1x1, current), current);
        assert_eq!(pick_initial_format(&[]), CaptureFormat::FALLBACK);
    }

    #[test]
    fn test_pick_camera_prefers_facing() {
        let cams = vec![
            CameraDescriptor::new("front0", Facing::Front),
            CameraDescriptor::new("back0", Facing::Back),
        ];
        assert_eq!(pick_camera(&cams, Facing::Back).unwrap().id, "back0");
        assert_eq!(pick_camera(&cams, Facing::Front).unwrap().id, "front0");

        let only_front = vec![CameraDescriptor::new("front0", Facing::Front)];
        assert_eq!(pick_camera(&only_front, Facing::Back).unwrap().id, "front0");
        assert!(pick_camera(&[], Facing::Back).is_none());
    }

    #[test]
    fn test_capabilities_build() {
        let cams = vec![
            CameraDescriptor::new("a", Facing::Back),
            CameraDescriptor::new("b", Facing::Front),
        ];
        let caps = DeviceCapabilities::build(cams, |id| match id {
            "a" => vec![fmt(1280, 720, 30), fmt(1920, 1080, 30)],
            _ => vec![fmt(640, 480, 30)],
        });
        assert_eq!(caps.formats_by_camera.len(), 2);
        assert_eq!(caps.formats_by_camera["a"][0].w, 1920);
        assert_eq!(caps.formats_by_camera["b"][0].h, 480);
    }
}

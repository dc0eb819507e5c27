//! Capture data model: formats, aspect classes and camera descriptors

use serde::{Deserialize, Serialize};
use std::fmt;

/// One concrete capture mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureFormat {
    /// Used when a camera reports no formats at all
    pub const FALLBACK: CaptureFormat = CaptureFormat::new(1280, 720, 30);

    pub const fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    pub fn same_resolution(&self, other: &CaptureFormat) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// A format the hardware could plausibly accept
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.fps > 0
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.fps)
    }
}

/// Aspect ratio class used to filter formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectClass {
    #[default]
    #[serde(rename = "AUTO_MAX")]
    AutoMax,
    #[serde(rename = "R16_9")]
    Ratio16x9,
    #[serde(rename = "R4_3")]
    Ratio4x3,
    #[serde(rename = "R1_1")]
    Ratio1x1,
}

impl AspectClass {
    /// Allowed absolute deviation from the target ratio
    pub const TOLERANCE: f64 = 0.02;

    pub const ALL: [AspectClass; 4] = [
        AspectClass::AutoMax,
        AspectClass::Ratio16x9,
        AspectClass::Ratio4x3,
        AspectClass::Ratio1x1,
    ];

    /// Lenient parse; unknown input means `AutoMax`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "16:9" | "R16_9" | "16_9" => AspectClass::Ratio16x9,
            "4:3" | "R4_3" | "4_3" => AspectClass::Ratio4x3,
            "1:1" | "R1_1" | "1_1" => AspectClass::Ratio1x1,
            _ => AspectClass::AutoMax,
        }
    }

    /// Target ratio, `None` for `AutoMax`
    pub fn ratio(&self) -> Option<f64> {
        match self {
            AspectClass::AutoMax => None,
            AspectClass::Ratio16x9 => Some(16.0 / 9.0),
            AspectClass::Ratio4x3 => Some(4.0 / 3.0),
            AspectClass::Ratio1x1 => Some(1.0),
        }
    }

    pub fn matches(&self, format: &CaptureFormat) -> bool {
        match self.ratio() {
            None => true,
            Some(target) => (format.ratio() - target).abs() < Self::TOLERANCE,
        }
    }

    /// Identifier used on the wire (`caps.supportedAspects`)
    pub fn wire_name(&self) -> &'static str {
        match self {
            AspectClass::AutoMax => "AUTO_MAX",
            AspectClass::Ratio16x9 => "R16_9",
            AspectClass::Ratio4x3 => "R4_3",
            AspectClass::Ratio1x1 => "R1_1",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AspectClass::AutoMax => "Auto (max)",
            AspectClass::Ratio16x9 => "16:9",
            AspectClass::Ratio4x3 => "4:3",
            AspectClass::Ratio1x1 => "1:1",
        }
    }
}

impl fmt::Display for AspectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Which way a camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
    Other,
}

impl Facing {
    /// `"front"` selects front cameras, anything else means back
    pub fn from_request(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("front") {
            Facing::Front
        } else {
            Facing::Back
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            _ => Facing::Front,
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Facing::Front => "front",
            Facing::Back => "back",
            Facing::Other => "other",
        };
        f.write_str(s)
    }
}

/// One physical capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    /// Stable identity used in all commands
    pub id: String,
    pub label: String,
    pub facing: Facing,
}

impl CameraDescriptor {
    /// Descriptor with an empty label; see [`crate::capture::label_cameras`]
    pub fn new(id: impl Into<String>, facing: Facing) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            facing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_parse_variants() {
        assert_eq!(AspectClass::parse("16:9"), AspectClass::Ratio16x9);
        assert_eq!(AspectClass::parse("r16_9"), AspectClass::Ratio16x9);
        assert_eq!(AspectClass::parse("4_3"), AspectClass::Ratio4x3);
        assert_eq!(AspectClass::parse("R1_1"), AspectClass::Ratio1x1);
        assert_eq!(AspectClass::parse("AUTO"), AspectClass::AutoMax);
        assert_eq!(AspectClass::parse("21:9"), AspectClass::AutoMax);
        assert_eq!(AspectClass::parse(""), AspectClass::AutoMax);
    }

    #[test]
    fn test_aspect_matching_tolerance() {
        let hd = CaptureFormat::new(1920, 1080, 30);
        let vga = CaptureFormat::new(640, 480, 30);
        // 1366x768 is 1.7786, within 0.02 of 16:9
        let wxga = CaptureFormat::new(1366, 768, 30);

        assert!(AspectClass::Ratio16x9.matches(&hd));
        assert!(AspectClass::Ratio16x9.matches(&wxga));
        assert!(!AspectClass::Ratio16x9.matches(&vga));
        assert!(AspectClass::Ratio4x3.matches(&vga));
        assert!(AspectClass::AutoMax.matches(&vga));
    }

    #[test]
    fn test_aspect_serde_uses_wire_names() {
        let json = serde_json::to_string(&AspectClass::Ratio4x3).unwrap();
        assert_eq!(json, "\"R4_3\"");
        for aspect in AspectClass::ALL {
            assert_eq!(
                serde_json::to_string(&aspect).unwrap(),
                format!("\"{}\"", aspect.wire_name())
            );
        }
    }

    #[test]
    fn test_facing_request() {
        assert_eq!(Facing::from_request("front"), Facing::Front);
        assert_eq!(Facing::from_request("back"), Facing::Back);
        assert_eq!(Facing::from_request("whatever"), Facing::Back);
        assert_eq!(Facing::Other.opposite(), Facing::Front);
    }
}

//! Coordination message protocol
//!
//! One JSON object per text message, discriminated by `type`. The identity
//! announcement is the exception: it is a bare `{"role": "..."}` object.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::capture::{AspectClass, DeviceCapabilities, Facing, FormatCaps};
use crate::webrtc::{IceCandidate, IceServer};

/// Inbound `type` values this device understands
pub const KNOWN_INBOUND_TYPES: [&str; 7] = [
    "browser-ready",
    "answer",
    "ice",
    "config",
    "request-caps",
    "ping",
    "pong",
];

/// Messages from the coordination endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// A viewer is ready to receive an offer
    BrowserReady,
    Answer { sdp: String },
    Ice(IceCandidate),
    Config(RemoteConfig),
    RequestCaps,
    Ping,
    Pong,
}

/// Parse one inbound text message.
///
/// Malformed text and unknown types yield `None`; neither is an error for
/// the channel.
pub fn parse_inbound(text: &str) -> Option<InboundMessage> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Dropping non-JSON signaling message: {}", e);
            return None;
        }
    };

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        debug!("Ignoring signaling message without type");
        return None;
    };
    if !KNOWN_INBOUND_TYPES.contains(&kind) {
        debug!("Ignoring unknown signaling message type: {}", kind);
        return None;
    }

    let kind = kind.to_string();
    match serde_json::from_value(value) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("Dropping malformed '{}' message: {}", kind, e);
            None
        }
    }
}

/// Remote-requested configuration carried by a `config` message.
///
/// Every field is optional on the wire and falls back to the device
/// defaults; numeric fields accept integers, floats or numeric strings, and
/// take their default when `null` or not numeric.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteConfig {
    #[serde(deserialize_with = "lenient_bool")]
    pub mic_enabled: bool,
    #[serde(deserialize_with = "lenient_width")]
    pub width: i64,
    #[serde(deserialize_with = "lenient_height")]
    pub height: i64,
    #[serde(deserialize_with = "lenient_fps")]
    pub fps: i64,
    /// Unclamped; the orchestrator clamps
    #[serde(deserialize_with = "lenient_bitrate")]
    pub bitrate_kbps: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub aspect: String,
    /// Facing preference, used when `camera_name` is absent
    #[serde(deserialize_with = "lenient_string")]
    pub camera: String,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub camera_name: Option<String>,
    #[serde(deserialize_with = "lenient_ice_servers")]
    pub ice_servers: Vec<IceServer>,
}

const DEFAULT_WIDTH: i64 = 1280;
const DEFAULT_HEIGHT: i64 = 720;
const DEFAULT_FPS: i64 = 30;
const DEFAULT_BITRATE_KBPS: i64 = 6000;

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            mic_enabled: false,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            aspect: AspectClass::AutoMax.wire_name().to_string(),
            camera: "back".to_string(),
            camera_name: None,
            ice_servers: Vec::new(),
        }
    }
}

impl RemoteConfig {
    /// Explicit camera id; empty and `"null"` mean none
    pub fn camera_name(&self) -> Option<&str> {
        self.camera_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
    }

    pub fn facing(&self) -> Facing {
        Facing::from_request(&self.camera)
    }

    pub fn aspect(&self) -> AspectClass {
        AspectClass::parse(&self.aspect)
    }
}

/// Integer, float or numeric string; anything else is `default`
fn lenient_int<'de, D: Deserializer<'de>>(d: D, default: i64) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(default),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map_or(default, |f| f.round() as i64),
        _ => default,
    })
}

fn lenient_width<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    lenient_int(d, DEFAULT_WIDTH)
}

fn lenient_height<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    lenient_int(d, DEFAULT_HEIGHT)
}

fn lenient_fps<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    lenient_int(d, DEFAULT_FPS)
}

fn lenient_bitrate<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    lenient_int(d, DEFAULT_BITRATE_KBPS)
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Entries that fail to parse or carry no url are skipped
fn lenient_ice_servers<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<IceServer>, D::Error> {
    let Value::Array(entries) = Value::deserialize(d)? else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<IceServer>(entry).ok())
        .filter(IceServer::is_usable)
        .collect())
}

/// Physical orientation label sent to the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    /// Landscape when wider than tall
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if width > height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }
}

/// Camera entry of a `caps` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsCamera {
    pub name: String,
    pub label: String,
    pub facing: Facing,
}

/// Payload of a `caps` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsReport {
    pub cameras: Vec<CapsCamera>,
    pub formats_by_camera_name: BTreeMap<String, Vec<FormatCaps>>,
    pub supported_aspects: Vec<AspectClass>,
}

impl From<&DeviceCapabilities> for CapsReport {
    fn from(caps: &DeviceCapabilities) -> Self {
        Self {
            cameras: caps
                .cameras
                .iter()
                .map(|c| CapsCamera {
                    name: c.id.clone(),
                    label: c.label.clone(),
                    facing: c.facing,
                })
                .collect(),
            formats_by_camera_name: caps.formats_by_camera.clone(),
            supported_aspects: AspectClass::ALL.to_vec(),
        }
    }
}

/// Messages this device sends
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    Offer { sdp: String },
    Ice(IceCandidate),
    Orientation { orientation: Orientation },
    Caps(CapsReport),
    Ping,
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Offer { .. } => "offer",
            OutboundMessage::Ice(_) => "ice",
            OutboundMessage::Orientation { .. } => "orientation",
            OutboundMessage::Caps(_) => "caps",
            OutboundMessage::Ping => "ping",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Identity announcement sent first on every open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleAnnouncement<'a> {
    pub role: &'a str,
}

pub fn role_announcement(role: &str) -> serde_json::Result<String> {
    serde_json::to_string(&RoleAnnouncement { role })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CameraDescriptor, CaptureFormat};
    use serde_json::json;

    #[test]
    fn test_parse_simple_messages() {
        assert_eq!(
            parse_inbound(r#"{"type":"browser-ready"}"#),
            Some(InboundMessage::BrowserReady)
        );
        assert_eq!(
            parse_inbound(r#"{"type":"answer","sdp":"v=0"}"#),
            Some(InboundMessage::Answer { sdp: "v=0".into() })
        );
        assert_eq!(
            parse_inbound(r#"{"type":"request-caps"}"#),
            Some(InboundMessage::RequestCaps)
        );
        assert_eq!(parse_inbound(r#"{"type":"pong"}"#), Some(InboundMessage::Pong));
    }

    #[test]
    fn test_parse_ice() {
        let msg = parse_inbound(
            r#"{"type":"ice","candidate":"candidate:1 1 udp 1 10.0.0.2 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        );
        match msg {
            Some(InboundMessage::Ice(c)) => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_malformed_are_dropped() {
        assert_eq!(parse_inbound(r#"{"type":"hello"}"#), None);
        assert_eq!(parse_inbound("not json"), None);
        assert_eq!(parse_inbound(r#"{"sdp":"x"}"#), None);
        // Known type, missing required field
        assert_eq!(parse_inbound(r#"{"type":"answer"}"#), None);
    }

    #[test]
    fn test_config_defaults() {
        let Some(InboundMessage::Config(cfg)) = parse_inbound(r#"{"type":"config"}"#) else {
            panic!("config expected");
        };
        assert_eq!(cfg, RemoteConfig::default());
        assert_eq!(cfg.aspect(), AspectClass::AutoMax);
        assert_eq!(cfg.facing(), Facing::Back);
        assert_eq!(cfg.camera_name(), None);
    }

    #[test]
    fn test_config_lenient_values() {
        let text = json!({
            "type": "config",
            "micEnabled": true,
            "width": 1920.0,
            "height": "1080",
            "fps": 30,
            "bitrateKbps": -5,
            "aspect": "16:9",
            "camera": "front",
            "cameraName": "null",
            "iceServers": [
                {"urls": "stun:stun.example.org:3478"},
                {"urls": ["turn:a:3478", "turn:b:3478"], "username": "u", "credential": "p"},
                {"username": "orphan"},
                "garbage"
            ]
        })
        .to_string();

        let Some(InboundMessage::Config(cfg)) = parse_inbound(&text) else {
            panic!("config expected");
        };
        assert!(cfg.mic_enabled);
        assert_eq!((cfg.width, cfg.height, cfg.fps), (1920, 1080, 30));
        assert_eq!(cfg.bitrate_kbps, -5);
        assert_eq!(cfg.aspect(), AspectClass::Ratio16x9);
        assert_eq!(cfg.facing(), Facing::Front);
        assert_eq!(cfg.camera_name(), None);
        assert_eq!(cfg.ice_servers.len(), 2);
        assert_eq!(cfg.ice_servers[1].urls.len(), 2);
    }

    #[test]
    fn test_config_null_numbers_take_defaults() {
        let text = r#"{"type":"config","width":null,"height":null,"fps":"fast","bitrateKbps":true}"#;
        let Some(InboundMessage::Config(cfg)) = parse_inbound(text) else {
            panic!("config expected");
        };
        assert_eq!((cfg.width, cfg.height, cfg.fps), (1280, 720, 30));
        assert_eq!(cfg.bitrate_kbps, 6000);
    }

    #[test]
    fn test_camera_name_present() {
        let cfg = RemoteConfig {
            camera_name: Some(" cam2 ".into()),
            ..Default::default()
        };
        assert_eq!(cfg.camera_name(), Some("cam2"));
    }

    #[test]
    fn test_outbound_shapes() {
        let offer = OutboundMessage::Offer { sdp: "v=0".into() }.to_json().unwrap();
        assert_eq!(offer, r#"{"type":"offer","sdp":"v=0"}"#);

        let ping = OutboundMessage::Ping.to_json().unwrap();
        assert_eq!(ping, r#"{"type":"ping"}"#);

        let orient = OutboundMessage::Orientation {
            orientation: Orientation::Landscape,
        }
        .to_json()
        .unwrap();
        assert_eq!(orient, r#"{"type":"orientation","orientation":"landscape"}"#);

        let ice: Value = serde_json::from_str(
            &OutboundMessage::Ice(IceCandidate::new("candidate:x", Some("0".into()), Some(0)))
                .to_json()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(ice["type"], "ice");
        assert_eq!(ice["sdpMid"], "0");
        assert_eq!(ice["sdpMLineIndex"], 0);

        assert_eq!(role_announcement("android").unwrap(), r#"{"role":"android"}"#);
    }

    #[test]
    fn test_caps_shape() {
        let mut cam = CameraDescriptor::new("0", Facing::Back);
        cam.label = "Back 1 (0)".into();
        let caps = DeviceCapabilities::build(vec![cam], |_| {
            vec![CaptureFormat::new(1280, 720, 30), CaptureFormat::new(1280, 720, 15)]
        });

        let value: Value =
            serde_json::from_str(&OutboundMessage::Caps(CapsReport::from(&caps)).to_json().unwrap())
                .unwrap();
        assert_eq!(value["type"], "caps");
        assert_eq!(value["cameras"][0], json!({"name":"0","label":"Back 1 (0)","facing":"back"}));
        assert_eq!(
            value["formatsByCameraName"]["0"],
            json!([{"w":1280,"h":720,"fps":[15,30]}])
        );
        assert_eq!(
            value["supportedAspects"],
            json!(["AUTO_MAX", "R16_9", "R4_3", "R1_1"])
        );
    }

    #[test]
    fn test_orientation_from_dimensions() {
        assert_eq!(Orientation::from_dimensions(1920, 1080), Orientation::Landscape);
        assert_eq!(Orientation::from_dimensions(1080, 1920), Orientation::Portrait);
    }
}

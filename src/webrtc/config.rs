//! Transport configuration

use serde::{Deserialize, Deserializer, Serialize};

/// One relay/traversal server descriptor
///
/// On the wire `urls` may be a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "string_or_list", default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Entries with no usable URL are dropped before reaching the peer
    pub fn is_usable(&self) -> bool {
        self.urls.iter().any(|u| !u.trim().is_empty())
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Urls {
        One(String),
        Many(Vec<String>),
        Missing(Option<()>),
    }

    let urls = match Urls::deserialize(deserializer)? {
        Urls::One(url) => vec![url],
        Urls::Many(urls) => urls,
        Urls::Missing(_) => Vec::new(),
    };
    Ok(urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect())
}

/// Video codec whose payload type carries the bitrate hints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    VP8,
}

impl VideoCodec {
    /// Parse a codec name; unrecognized names yield `None`
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "H264" | "H.264" | "AVC" => Some(VideoCodec::H264),
            "VP8" => Some(VideoCodec::VP8),
            _ => None,
        }
    }

    /// Encoding name as it appears in `a=rtpmap`
    pub fn sdp_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::VP8 => "VP8",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::VP8 => "video/VP8",
        }
    }

    pub fn sdp_fmtp(&self) -> &'static str {
        match self {
            VideoCodec::H264 => {
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            }
            VideoCodec::VP8 => "",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sdp_name())
    }
}

/// Everything needed to build a transport peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServer>,
    /// Codec of the outbound video track
    pub codec: VideoCodec,
    /// Codec tried by bitrate injection when `codec` is absent from the offer
    pub fallback_codec: VideoCodec,
    pub stream_id: String,
}

impl TransportConfig {
    pub fn from_stream(config: &crate::config::StreamConfig) -> Self {
        let codec = VideoCodec::parse(&config.codec).unwrap_or(VideoCodec::H264);
        let fallback_codec = VideoCodec::parse(&config.fallback_codec).unwrap_or(VideoCodec::VP8);
        Self {
            ice_servers: config.ice_servers.clone(),
            codec,
            fallback_codec,
            stream_id: config.stream_id.clone(),
        }
    }

    /// Same config with a remote-supplied server list (unusable entries dropped)
    pub fn with_ice_servers(&self, servers: &[IceServer]) -> Self {
        Self {
            ice_servers: servers.iter().filter(|s| s.is_usable()).cloned().collect(),
            ..self.clone()
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from_stream(&crate::config::StreamConfig::default())
    }
}

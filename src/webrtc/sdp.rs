//! Bitrate hints in session descriptions
//!
//! Grammar assumptions, all line-oriented:
//! - a codec is located by its first `a=rtpmap:<pt> <name>/<clock>` line,
//!   with `<name>` compared case-insensitively;
//! - the parameters for that payload type live on `a=fmtp:<pt> <params>`,
//!   where `<params>` is a `;`-separated list;
//! - when there is no such line, a new one goes right after the rtpmap line.
//!
//! Output lines are joined with CRLF. A trailing line break in the input is
//! preserved.

use super::config::VideoCodec;

/// Floor written as `x-google-min-bitrate`
pub const MIN_BITRATE_KBPS: u32 = 300;

const HINT_PREFIX: &str = "x-google-";

/// Write start/max/min bitrate hints for `codec`, falling back to
/// `fallback`, else return the description unchanged.
pub fn inject_video_bitrate(sdp: &str, kbps: u32, codec: VideoCodec, fallback: VideoCodec) -> String {
    inject_for_codec(sdp, kbps, codec.sdp_name())
        .or_else(|| inject_for_codec(sdp, kbps, fallback.sdp_name()))
        .unwrap_or_else(|| sdp.to_string())
}

/// Bitrate hints for one codec name; `None` when the codec is not offered.
pub fn inject_for_codec(sdp: &str, kbps: u32, codec_name: &str) -> Option<String> {
    let mut lines: Vec<String> = sdp.lines().map(str::to_string).collect();

    let (rtpmap_idx, pt) = lines.iter().enumerate().find_map(|(idx, line)| {
        let (pt, name) = parse_rtpmap(line)?;
        name.eq_ignore_ascii_case(codec_name)
            .then(|| (idx, pt.to_string()))
    })?;

    let hints = format!(
        "x-google-start-bitrate={kbps};x-google-max-bitrate={kbps};x-google-min-bitrate={MIN_BITRATE_KBPS}"
    );
    let fmtp_prefix = format!("a=fmtp:{} ", pt);

    match lines.iter().position(|l| l.starts_with(&fmtp_prefix)) {
        Some(idx) => {
            let params = &lines[idx][fmtp_prefix.len()..];
            let mut kept: Vec<&str> = params
                .split(';')
                .map(str::trim)
                .filter(|p| !p.is_empty() && !p.starts_with(HINT_PREFIX))
                .collect();
            kept.push(&hints);
            lines[idx] = format!("{}{}", fmtp_prefix, kept.join(";"));
        }
        None => lines.insert(rtpmap_idx + 1, format!("{}{}", fmtp_prefix, hints)),
    }

    let mut out = lines.join("\r\n");
    if sdp.ends_with('\n') {
        out.push_str("\r\n");
    }
    Some(out)
}

/// `a=rtpmap:96 H264/90000` -> `("96", "H264")`
fn parse_rtpmap(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("a=rtpmap:")?;
    let (pt, encoding) = rest.split_once(' ')?;
    let name = encoding.split('/').next()?;
    Some((pt.trim(), name.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 102\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n";

    #[test]
    fn test_merges_into_existing_fmtp() {
        let out = inject_video_bitrate(OFFER, 4000, VideoCodec::H264, VideoCodec::VP8);
        assert!(out.contains(
            "a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f;\
x-google-start-bitrate=4000;x-google-max-bitrate=4000;x-google-min-bitrate=300\r\n"
        ));
        // Other payload types untouched
        assert!(out.contains("a=fmtp:97 apt=96\r\n"));
        assert!(out.ends_with("\r\n"));
    }

    #[test]
    fn test_replaces_previous_hints() {
        let once = inject_video_bitrate(OFFER, 4000, VideoCodec::H264, VideoCodec::VP8);
        let twice = inject_video_bitrate(&once, 2500, VideoCodec::H264, VideoCodec::VP8);
        assert!(twice.contains("x-google-max-bitrate=2500"));
        assert!(!twice.contains("4000"));
        assert_eq!(twice.matches("x-google-start-bitrate").count(), 1);
    }

    #[test]
    fn test_inserts_fmtp_after_rtpmap() {
        let out = inject_for_codec(OFFER, 1200, "VP8").unwrap();
        let lines: Vec<&str> = out.split("\r\n").collect();
        let rtpmap = lines.iter().position(|l| *l == "a=rtpmap:96 VP8/90000").unwrap();
        assert_eq!(
            lines[rtpmap + 1],
            "a=fmtp:96 x-google-start-bitrate=1200;x-google-max-bitrate=1200;x-google-min-bitrate=300"
        );
    }

    #[test]
    fn test_falls_back_to_secondary_codec() {
        let vp8_only = "v=0\nm=video 9 RTP/AVP 96\na=rtpmap:96 vp8/90000\n";
        let out = inject_video_bitrate(vp8_only, 800, VideoCodec::H264, VideoCodec::VP8);
        assert!(out.contains("a=fmtp:96 x-google-start-bitrate=800"));
        assert!(out.starts_with("v=0\r\nm=video 9 RTP/AVP 96\r\n"));
    }

    #[test]
    fn test_unchanged_without_known_codec() {
        let audio_only = "v=0\r\nm=audio 9 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\n";
        assert_eq!(
            inject_video_bitrate(audio_only, 800, VideoCodec::H264, VideoCodec::VP8),
            audio_only
        );
    }
}

//! Outbound media tracks

use std::sync::Arc;
use uuid::Uuid;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::config::VideoCodec;

const VIDEO_CLOCK_RATE: u32 = 90000;

/// RTP codec capability for the outbound video track
pub fn video_codec_capability(codec: VideoCodec) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: codec.mime_type().to_string(),
        clock_rate: VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: codec.sdp_fmtp().to_string(),
        rtcp_feedback: vec![],
    }
}

/// RTP codec capability for the microphone track (Opus)
pub fn audio_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// Fresh video track; every camera switch gets a new one
pub fn new_video_track(codec: VideoCodec, stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        video_codec_capability(codec),
        format!("video-{}", Uuid::new_v4()),
        stream_id.to_string(),
    ))
}

pub fn new_audio_track(stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        audio_codec_capability(),
        format!("audio-{}", Uuid::new_v4()),
        stream_id.to_string(),
    ))
}

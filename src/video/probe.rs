//! Container inspection through the system `ffprobe` binary.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use tracing::debug;

use crate::video::types::FrameRate;

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    tags: Option<ProbeTags>,
}

#[derive(Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

/// Older ffprobe builds report rotation as a `rotate` tag instead of side data
#[derive(Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

impl ProbeStream {
    /// Display rotation in degrees, normalised to `0..360`
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse().ok())
            })
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360) as u32
    }
}

/// What a container holds, as far as this crate cares
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProbe {
    pub video: Option<VideoStreamInfo>,
    pub has_audio: bool,
}

/// Geometry is as displayed: ffmpeg applies the rotation tag while
/// decoding, so a quarter-turn swaps the stored width and height.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    /// Display rotation in degrees (0, 90, 180 or 270)
    pub rotation: u32,
    pub frame_rate: Option<FrameRate>,
    pub frame_count: Option<u64>,
}

/// Run ffprobe on `path`
///
/// Errors are returned as plain messages; callers wrap them in the error
/// variant that fits their phase.
pub fn probe_media(ffprobe: &str, path: &Path) -> Result<MediaProbe, String> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-count_packets",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .map_err(|e| format!("failed to run {ffprobe} (is it installed and on PATH?): {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    let probe = parse_probe_json(&output.stdout)?;
    debug!("Probed {}: {:?}", path.display(), probe);
    Ok(probe)
}

pub(crate) fn parse_probe_json(json: &[u8]) -> Result<MediaProbe, String> {
    let parsed: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| format!("ffprobe json parse failed: {e}"))?;

    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let format_duration = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| {
            let stored_width = s.width.filter(|w| *w > 0)?;
            let stored_height = s.height.filter(|h| *h > 0)?;
            let rotation = s.rotation();
            let (width, height) = if rotation % 180 == 90 {
                (stored_height, stored_width)
            } else {
                (stored_width, stored_height)
            };
            let frame_rate = s
                .r_frame_rate
                .as_deref()
                .and_then(FrameRate::parse)
                .or_else(|| s.avg_frame_rate.as_deref().and_then(FrameRate::parse));

            // Packet count is exact; nb_frames is container-declared; duration is a last resort.
            let duration = s
                .duration
                .as_deref()
                .and_then(|d| d.parse::<f64>().ok())
                .or(format_duration);
            let frame_count = s
                .nb_read_packets
                .as_deref()
                .and_then(|n| n.parse().ok())
                .or_else(|| s.nb_frames.as_deref().and_then(|n| n.parse().ok()))
                .or_else(|| {
                    let fps = frame_rate?.as_f64();
                    duration.map(|d| (d * fps).round() as u64)
                });

            Some(VideoStreamInfo {
                width,
                height,
                rotation,
                frame_rate,
                frame_count,
            })
        });

    Ok(MediaProbe { video, has_audio })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_with_audio() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "width": 640, "height": 480,
                 "r_frame_rate": "30/1", "nb_frames": "12", "nb_read_packets": "10"},
                {"codec_type": "audio", "sample_rate": "48000"}
            ],
            "format": {"duration": "0.333"}
        }"#;

        let probe = parse_probe_json(json).unwrap();
        assert!(probe.has_audio);
        let video = probe.video.unwrap();
        assert_eq!((video.width, video.height), (640, 480));
        assert_eq!(video.frame_rate, FrameRate::new(30, 1));
        assert_eq!(video.frame_count, Some(10));
    }

    #[test]
    fn test_quarter_turn_swaps_dimensions() {
        let json = br#"{
            "streams": [{
                "codec_type": "video", "width": 1920, "height": 1080, "r_frame_rate": "30/1",
                "nb_read_packets": "5",
                "side_data_list": [
                    {"side_data_type": "Display Matrix", "displaymatrix": "...", "rotation": -90}
                ]
            }]
        }"#;

        let video = parse_probe_json(json).unwrap().video.unwrap();
        assert_eq!(video.rotation, 270);
        assert_eq!((video.width, video.height), (1080, 1920));
    }

    #[test]
    fn test_rotate_tag_and_half_turn() {
        let tagged = br#"{"streams": [{"codec_type": "video", "width": 640, "height": 360,
            "tags": {"rotate": "90"}}]}"#;
        let video = parse_probe_json(tagged).unwrap().video.unwrap();
        assert_eq!(video.rotation, 90);
        assert_eq!((video.width, video.height), (360, 640));

        let upside_down = br#"{"streams": [{"codec_type": "video", "width": 640, "height": 360,
            "side_data_list": [{"rotation": 180}]}]}"#;
        let video = parse_probe_json(upside_down).unwrap().video.unwrap();
        assert_eq!(video.rotation, 180);
        assert_eq!((video.width, video.height), (640, 360));
    }

    #[test]
    fn test_frame_count_falls_back_to_duration() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 64, "height": 64, "r_frame_rate": "25/1"}],
            "format": {"duration": "2.0"}
        }"#;

        let video = parse_probe_json(json).unwrap().video.unwrap();
        assert_eq!(video.frame_count, Some(50));
    }

    #[test]
    fn test_audio_only_file_has_no_video() {
        let json = br#"{"streams": [{"codec_type": "audio"}]}"#;
        let probe = parse_probe_json(json).unwrap();
        assert!(probe.video.is_none());
        assert!(probe.has_audio);
    }

    #[test]
    fn test_zero_sized_video_is_ignored() {
        let json = br#"{"streams": [{"codec_type": "video", "width": 0, "height": 480}]}"#;
        assert!(parse_probe_json(json).unwrap().video.is_none());
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(parse_probe_json(b"not json").is_err());
    }
}

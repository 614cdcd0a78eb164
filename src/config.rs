use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    audio::MissingAudioPolicy,
    error::{ConfigError, Result},
    keying::HsvBound,
};

/// Main configuration for a chroma-key job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key color range
    pub key: KeyConfig,

    /// Decode/encode settings
    pub video: VideoConfig,

    /// Audio reattachment settings
    pub remux: RemuxConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.key.validate()?;
        self.video.validate()?;
        Ok(())
    }
}

/// HSV range treated as backdrop. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyConfig {
    pub lower: HsvBound,
    pub upper: HsvBound,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            lower: HsvBound::DEFAULT_LOWER,
            upper: HsvBound::DEFAULT_UPPER,
        }
    }
}

impl KeyConfig {
    fn validate(&self) -> Result<()> {
        for (key, bound) in [("key.lower.h", self.lower), ("key.upper.h", self.upper)] {
            if bound.h > HsvBound::MAX_HUE {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: bound.h.to_string()
                }.into());
            }
        }

        if self.lower.h > self.upper.h || self.lower.s > self.upper.s || self.lower.v > self.upper.v {
            return Err(ConfigError::InvalidValue {
                key: "key.range".to_string(),
                value: format!("{} > {}", self.lower, self.upper)
            }.into());
        }

        Ok(())
    }
}

/// Video decode/encode configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// ffmpeg executable used for decoding, encoding and muxing
    pub ffmpeg: String,

    /// ffprobe executable used for container inspection
    pub ffprobe: String,

    /// Encoder for the composited video
    pub codec: String,

    /// Output pixel format
    pub pixel_format: String,

    /// Quality setting (0-100, higher is better)
    pub quality: u8,

    /// Consecutive undecodable frames tolerated before the source is abandoned
    pub max_consecutive_decode_failures: u32,

    /// Log progress every this many frames
    pub progress_interval: u64,

    /// Where the silent intermediate video goes (process temp dir when unset)
    pub intermediate_dir: Option<PathBuf>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            quality: 85,
            max_consecutive_decode_failures: 30,
            progress_interval: 30,
            intermediate_dir: None,
        }
    }
}

impl VideoConfig {
    fn validate(&self) -> Result<()> {
        let names = [
            ("video.ffmpeg", &self.ffmpeg),
            ("video.ffprobe", &self.ffprobe),
            ("video.codec", &self.codec),
            ("video.pixel_format", &self.pixel_format),
        ];
        for (key, value) in names {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.clone()
                }.into());
            }
        }

        if self.quality > 100 {
            return Err(ConfigError::InvalidValue {
                key: "video.quality".to_string(),
                value: self.quality.to_string()
            }.into());
        }

        if self.max_consecutive_decode_failures == 0 {
            return Err(ConfigError::InvalidValue {
                key: "video.max_consecutive_decode_failures".to_string(),
                value: "0".to_string()
            }.into());
        }

        if self.progress_interval == 0 {
            return Err(ConfigError::InvalidValue {
                key: "video.progress_interval".to_string(),
                value: "0".to_string()
            }.into());
        }

        Ok(())
    }

    /// Map the 0-100 quality scale onto x264's CRF (0 best, 51 worst)
    pub fn crf(&self) -> u8 {
        (51 - ((self.quality as f32 / 100.0) * 51.0) as u8).clamp(0, 51)
    }
}

/// Audio reattachment configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemuxConfig {
    /// What to do when the source has no audio track
    pub missing_audio: MissingAudioPolicy,
}

/// The three files one job touches
#[derive(Debug, Clone, PartialEq)]
pub struct JobPaths {
    pub source: PathBuf,
    pub background: PathBuf,
    pub output: PathBuf,
}

impl JobPaths {
    pub fn new(
        source: impl Into<PathBuf>,
        background: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            background: background.into(),
            output: output.into(),
        }
    }

    /// Reject paths that would make the job overwrite one of its inputs
    pub fn validate(&self) -> Result<()> {
        if self.output == self.source || self.output == self.background {
            return Err(ConfigError::InvalidValue {
                key: "output".to_string(),
                value: self.output.display().to_string()
            }.into());
        }

        let same_file = |a: &Path, b: &Path| match (a.canonicalize(), b.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if same_file(&self.output, &self.source) || same_file(&self.output, &self.background) {
            return Err(ConfigError::InvalidValue {
                key: "output".to_string(),
                value: format!("{} is also an input", self.output.display())
            }.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.key.lower, HsvBound::new(40, 230, 200));
        assert_eq!(config.key.upper, HsvBound::new(80, 255, 255));
        assert_eq!(config.remux.missing_audio, MissingAudioPolicy::Silent);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test_config.toml");

        let mut original_config = Config::default();
        original_config.key.lower = HsvBound::new(100, 150, 60);
        original_config.key.upper = HsvBound::new(130, 255, 255);
        original_config.remux.missing_audio = MissingAudioPolicy::Fail;

        original_config.save_to_file(&file_path).unwrap();
        let loaded_config = Config::from_file(&file_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[remux]\nmissing_audio = \"fail\"\n").unwrap();

        let config = Config::from_file(&file_path).unwrap();
        assert_eq!(config.remux.missing_audio, MissingAudioPolicy::Fail);
        assert_eq!(config.key, KeyConfig::default());
        assert_eq!(config.video.codec, "libx264");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_inverted_key_range() {
        let mut config = Config::default();
        config.key.lower.s = 250;
        config.key.upper.s = 240;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hue_out_of_range() {
        let mut config = Config::default();
        config.key.upper.h = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_video_values() {
        let mut config = Config::default();
        config.video.quality = 101;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.video.codec = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.video.max_consecutive_decode_failures = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quality_to_crf() {
        let mut video = VideoConfig::default();
        video.quality = 100;
        assert_eq!(video.crf(), 0);
        video.quality = 0;
        assert_eq!(video.crf(), 51);
    }

    #[test]
    fn test_output_must_not_be_an_input() {
        assert!(JobPaths::new("in.mp4", "bg.png", "in.mp4").validate().is_err());
        assert!(JobPaths::new("in.mp4", "bg.png", "bg.png").validate().is_err());
        assert!(JobPaths::new("in.mp4", "bg.png", "out.mp4").validate().is_ok());
    }
}

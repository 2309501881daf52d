//! Engine configuration
//!
//! `EngineConfig` is what the host asks for; `DeviceParams` is what the backend
//! actually granted. Both are plain data and serialize through serde so hosts can keep
//! audio settings next to the rest of their configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_CHANNELS, DEFAULT_MAX_ACTIVE_VOICES, DEFAULT_POST_CLIP_SCALER,
    DEFAULT_SAMPLE_RATE, DEFAULT_SPEED_OF_SOUND, VOICE_COUNT, is_supported_channel_count,
};
use crate::error::{MixResult, MixerError};

/// Interpolation kernel used when a source is resampled to the mix rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplerKind {
    /// Nearest lower sample, no interpolation
    Point,
    /// Two-point linear blend
    #[default]
    Linear,
    /// Four-point Catmull-Rom spline
    CatmullRom,
}

/// Host-requested engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Soft-clip the final mix instead of hard clamping to ±1
    pub clip_roundoff: bool,

    /// Capture wave and per-channel peak data every buffer
    pub enable_visualization: bool,

    /// Leave the CPU's denormal handling flags untouched on the render thread
    pub no_fpu_register_change: bool,

    /// Resampler used for voices on the root bus
    pub resampler: ResamplerKind,

    /// Requested device sample rate in Hz
    pub sample_rate: u32,

    /// Requested device buffer size in frames
    pub buffer_size: usize,

    /// Requested speaker count (1, 2, 4, 6 or 8)
    pub channels: usize,

    /// Upper bound on voices mixed per buffer
    pub max_active_voices: usize,

    /// Gain applied after clipping
    pub post_clip_scaler: f32,

    /// Speed of sound used for Doppler and distance delay (units per second)
    pub speed_of_sound: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clip_roundoff: true,
            enable_visualization: false,
            no_fpu_register_change: false,
            resampler: ResamplerKind::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            channels: DEFAULT_CHANNELS,
            max_active_voices: DEFAULT_MAX_ACTIVE_VOICES,
            post_clip_scaler: DEFAULT_POST_CLIP_SCALER,
            speed_of_sound: DEFAULT_SPEED_OF_SOUND,
        }
    }
}

impl EngineConfig {
    pub fn with_clip_roundoff(mut self, enabled: bool) -> Self {
        self.clip_roundoff = enabled;
        self
    }

    pub fn with_visualization(mut self, enabled: bool) -> Self {
        self.enable_visualization = enabled;
        self
    }

    pub fn with_no_fpu_register_change(mut self, enabled: bool) -> Self {
        self.no_fpu_register_change = enabled;
        self
    }

    pub fn with_resampler(mut self, resampler: ResamplerKind) -> Self {
        self.resampler = resampler;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_buffer_size(mut self, frames: usize) -> Self {
        self.buffer_size = frames;
        self
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_max_active_voices(mut self, count: usize) -> Self {
        self.max_active_voices = count;
        self
    }

    pub fn with_post_clip_scaler(mut self, scaler: f32) -> Self {
        self.post_clip_scaler = scaler;
        self
    }

    /// Check ranges the mixer relies on.
    pub fn validate(&self) -> MixResult<()> {
        if !is_supported_channel_count(self.channels) {
            return Err(MixerError::InvalidConfig(format!(
                "channel count {} (expected 1, 2, 4, 6 or 8)",
                self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(MixerError::InvalidConfig("sample rate must be non-zero".into()));
        }
        if self.buffer_size == 0 {
            return Err(MixerError::InvalidConfig("buffer size must be non-zero".into()));
        }
        if self.max_active_voices == 0 || self.max_active_voices > VOICE_COUNT {
            return Err(MixerError::InvalidConfig(format!(
                "max_active_voices {} (expected 1..={VOICE_COUNT})",
                self.max_active_voices
            )));
        }
        if !self.speed_of_sound.is_finite() || self.speed_of_sound <= 0.0 {
            return Err(MixerError::InvalidConfig("speed of sound must be positive".into()));
        }
        Ok(())
    }

    /// Parse and validate a JSON document. Missing keys take their defaults.
    pub fn from_json(text: &str) -> MixResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| MixerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> MixResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| MixerError::InvalidConfig(e.to_string()))
    }

    /// Device parameters matching this request, for hosts that render without a backend.
    pub fn requested_device(&self) -> DeviceParams {
        DeviceParams {
            sample_rate: self.sample_rate,
            buffer_size: self.buffer_size,
            channels: self.channels,
        }
    }
}

/// Values actually granted by the audio backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceParams {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub channels: usize,
}

impl DeviceParams {
    pub fn new(sample_rate: u32, buffer_size: usize, channels: usize) -> Self {
        Self {
            sample_rate,
            buffer_size,
            channels,
        }
    }

    /// Length of one buffer in seconds.
    pub fn buffer_duration(&self) -> f64 {
        self.buffer_size as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_constants() {
        let config = EngineConfig::default();
        assert!(config.clip_roundoff);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.max_active_voices, 16);
        assert_eq!(config.post_clip_scaler, 0.95);
        assert_eq!(config.resampler, ResamplerKind::Linear);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "resampler": "catmull_rom", "channels": 6 }"#)
            .expect("valid config");
        assert_eq!(config.resampler, ResamplerKind::CatmullRom);
        assert_eq!(config.channels, 6);
        assert_eq!(config.buffer_size, 2048);
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::default()
            .with_clip_roundoff(false)
            .with_max_active_voices(64);
        let text = config.to_json().expect("serializes");
        assert_eq!(EngineConfig::from_json(&text).expect("parses"), config);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(EngineConfig::default().with_channels(3).validate().is_err());
        assert!(EngineConfig::default().with_buffer_size(0).validate().is_err());
        assert!(EngineConfig::default().with_max_active_voices(0).validate().is_err());
        assert!(
            EngineConfig::default()
                .with_max_active_voices(VOICE_COUNT + 1)
                .validate()
                .is_err()
        );
        assert!(matches!(
            EngineConfig::from_json(r#"{ "channels": 5 }"#),
            Err(MixerError::InvalidConfig(_))
        ));
    }
}

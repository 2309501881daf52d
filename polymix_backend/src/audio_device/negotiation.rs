use std::fmt;

use cpal::traits::DeviceTrait;
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use polymix_core::constants::{DEFAULT_BUFFER_SIZE, SUPPORTED_CHANNEL_COUNTS};
use polymix_core::{EngineConfig, MixerError};

/// Formats the mixer can render straight into, in order of preference.
const RENDER_FORMATS: [SampleFormat; 2] = [SampleFormat::F32, SampleFormat::I16];

const STANDARD_RATES: [u32; 11] = [
    8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000, 176400, 192000,
];

/// What an output device reports it can do.
#[derive(Clone, Debug)]
pub struct DeviceCapabilities {
    pub name: String,

    pub supported_sample_rates: Vec<u32>,
    pub min_sample_rate: u32,
    pub max_sample_rate: u32,
    pub default_sample_rate: u32,

    pub supported_channels: Vec<u16>,
    pub max_channels: u16,
    pub default_channels: u16,

    pub supported_sample_formats: Vec<SampleFormat>,
    pub default_sample_format: SampleFormat,
}

impl DeviceCapabilities {
    /// Collect the output configurations of `device`.
    pub fn query(device: &cpal::Device) -> NegotiationResult<Self> {
        let name = device
            .name()
            .map_err(|e| NegotiationError::DeviceQueryFailed(format!("device name: {e}")))?;
        let default_config = device
            .default_output_config()
            .map_err(|e| NegotiationError::DeviceQueryFailed(format!("default config: {e}")))?;
        let configs = device
            .supported_output_configs()
            .map_err(|e| NegotiationError::DeviceQueryFailed(format!("supported configs: {e}")))?;

        let mut caps = Self {
            name,
            supported_sample_rates: Vec::new(),
            min_sample_rate: u32::MAX,
            max_sample_rate: 0,
            default_sample_rate: default_config.sample_rate().0,
            supported_channels: Vec::new(),
            max_channels: 0,
            default_channels: default_config.channels(),
            supported_sample_formats: Vec::new(),
            default_sample_format: default_config.sample_format(),
        };

        for range in configs {
            let (min_sr, max_sr) = (range.min_sample_rate().0, range.max_sample_rate().0);
            caps.min_sample_rate = caps.min_sample_rate.min(min_sr);
            caps.max_sample_rate = caps.max_sample_rate.max(max_sr);
            caps.supported_sample_rates.extend(
                STANDARD_RATES
                    .iter()
                    .filter(|&&rate| rate >= min_sr && rate <= max_sr),
            );

            let channels = range.channels();
            if !caps.supported_channels.contains(&channels) {
                caps.supported_channels.push(channels);
            }
            caps.max_channels = caps.max_channels.max(channels);

            let format = range.sample_format();
            if !caps.supported_sample_formats.contains(&format) {
                caps.supported_sample_formats.push(format);
            }
        }

        caps.supported_sample_rates.sort_unstable();
        caps.supported_sample_rates.dedup();
        caps.supported_channels.sort_unstable();
        Ok(caps)
    }

    fn supports_rate(&self, rate: u32) -> bool {
        rate >= self.min_sample_rate && rate <= self.max_sample_rate
    }

    fn supports_channels(&self, channels: u16) -> bool {
        self.supported_channels.contains(&channels) || channels <= self.max_channels
    }
}

impl fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}ch @ {}Hz, {:?}]",
            self.name, self.default_channels, self.default_sample_rate, self.default_sample_format
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRatePriority {
    HighestQuality,
    Standard,
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPriority {
    Maximum,
    Default,
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSizePriority {
    MinimumLatency,
    Balanced,
    Default,
}

/// What the engine would like from the device.
#[derive(Debug, Clone)]
pub struct ConfigurationRequest {
    pub sample_rate: Option<u32>,
    pub sample_rate_priority: SampleRatePriority,

    pub channels: Option<u16>,
    pub channel_priority: ChannelPriority,

    pub buffer_size: Option<u32>,
    pub buffer_size_priority: BufferSizePriority,

    pub sample_format: Option<SampleFormat>,
}

impl ConfigurationRequest {
    pub fn new() -> Self {
        Self {
            sample_rate: None,
            sample_rate_priority: SampleRatePriority::Standard,
            channels: None,
            channel_priority: ChannelPriority::Default,
            buffer_size: None,
            buffer_size_priority: BufferSizePriority::Balanced,
            sample_format: None,
        }
    }

    /// Ask for the rate, buffer and layout stored in an engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new()
            .with_sample_rate(config.sample_rate)
            .with_buffer_size(config.buffer_size as u32)
            .with_channels(config.channels as u16)
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn with_sample_rate_priority(mut self, priority: SampleRatePriority) -> Self {
        self.sample_rate_priority = priority;
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_channel_priority(mut self, priority: ChannelPriority) -> Self {
        self.channel_priority = priority;
        self
    }

    pub fn with_buffer_size(mut self, size: u32) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn with_buffer_size_priority(mut self, priority: BufferSizePriority) -> Self {
        self.buffer_size_priority = priority;
        self
    }

    pub fn with_sample_format(mut self, format: SampleFormat) -> Self {
        self.sample_format = Some(format);
        self
    }

    pub fn low_latency() -> Self {
        Self::new()
            .with_sample_rate(48000)
            .with_buffer_size(256)
            .with_buffer_size_priority(BufferSizePriority::MinimumLatency)
    }
}

impl Default for ConfigurationRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct NegotiatedConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_size: BufferSize,
    pub sample_format: SampleFormat,
    pub stream_config: StreamConfig,

    pub sample_rate_matched: bool,
    pub channels_matched: bool,
    pub buffer_size_matched: bool,
}

impl NegotiatedConfig {
    /// Frames per callback to report to the mixer. Devices left on their default
    /// buffer size report the engine default.
    pub fn buffer_frames(&self) -> usize {
        match self.buffer_size {
            BufferSize::Fixed(frames) => frames as usize,
            BufferSize::Default => DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn latency_ms(&self) -> f32 {
        self.buffer_frames() as f32 / self.sample_rate as f32 * 1000.0
    }
}

impl fmt::Display for NegotiatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ch @ {}Hz, buffer: {:?}, format: {:?}",
            self.channels, self.sample_rate, self.buffer_size, self.sample_format
        )
    }
}

#[derive(Debug, Clone)]
pub enum NegotiationError {
    SampleRateNotSupported { requested: u32, available: Vec<u32> },
    ChannelsNotSupported { requested: u16, available: Vec<u16> },
    FormatNotSupported { available: Vec<SampleFormat> },
    NoCompatibleConfiguration,
    DeviceQueryFailed(String),
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SampleRateNotSupported { requested, available } => {
                write!(f, "Sample rate {requested} not supported. Available: {available:?}")
            }
            Self::ChannelsNotSupported { requested, available } => {
                write!(f, "Channel count {requested} not supported. Available: {available:?}")
            }
            Self::FormatNotSupported { available } => {
                write!(f, "No f32 or i16 output format. Available: {available:?}")
            }
            Self::NoCompatibleConfiguration => {
                write!(f, "No compatible configuration found for device")
            }
            Self::DeviceQueryFailed(msg) => write!(f, "Device query failed: {msg}"),
        }
    }
}

impl std::error::Error for NegotiationError {}

impl From<NegotiationError> for MixerError {
    fn from(err: NegotiationError) -> Self {
        MixerError::backend("cpal", err)
    }
}

pub type NegotiationResult<T> = Result<T, NegotiationError>;

/// Largest speaker layout the mixer supports that fits in `channels`.
fn mixer_layout_at_most(channels: u16) -> Option<u16> {
    SUPPORTED_CHANNEL_COUNTS
        .iter()
        .rev()
        .map(|&c| c as u16)
        .find(|&c| c <= channels)
}

pub struct ConfigNegotiator;

impl ConfigNegotiator {
    pub fn negotiate(
        caps: &DeviceCapabilities,
        request: &ConfigurationRequest,
    ) -> NegotiationResult<NegotiatedConfig> {
        let sample_rate = Self::negotiate_sample_rate(caps, request)?;
        let channels = Self::negotiate_channels(caps, request)?;
        let sample_format = Self::negotiate_sample_format(caps, request)?;
        let buffer_size = Self::negotiate_buffer_size(request);

        let buffer_size_matched = match (request.buffer_size, &buffer_size) {
            (Some(requested), BufferSize::Fixed(actual)) => requested == *actual,
            (None, _) => true,
            _ => false,
        };

        Ok(NegotiatedConfig {
            sample_rate,
            channels,
            buffer_size: buffer_size.clone(),
            sample_format,
            stream_config: StreamConfig {
                channels,
                sample_rate: SampleRate(sample_rate),
                buffer_size,
            },
            sample_rate_matched: request.sample_rate.is_none_or(|r| r == sample_rate),
            channels_matched: request.channels.is_none_or(|c| c == channels),
            buffer_size_matched,
        })
    }

    fn negotiate_sample_rate(
        caps: &DeviceCapabilities,
        request: &ConfigurationRequest,
    ) -> NegotiationResult<u32> {
        if let Some(requested) = request.sample_rate {
            if caps.supports_rate(requested) {
                return Ok(requested);
            }
            if request.sample_rate_priority == SampleRatePriority::Exact {
                return Err(NegotiationError::SampleRateNotSupported {
                    requested,
                    available: caps.supported_sample_rates.clone(),
                });
            }
        }

        match request.sample_rate_priority {
            SampleRatePriority::HighestQuality => caps
                .supported_sample_rates
                .iter()
                .max()
                .copied()
                .ok_or(NegotiationError::NoCompatibleConfiguration),
            SampleRatePriority::Standard | SampleRatePriority::Exact => {
                Ok(Self::find_best_standard_rate(caps).unwrap_or(caps.default_sample_rate))
            }
        }
    }

    fn find_best_standard_rate(caps: &DeviceCapabilities) -> Option<u32> {
        [48000, 44100, 96000, 88200]
            .into_iter()
            .find(|&rate| caps.supports_rate(rate))
    }

    /// Only layouts the mixer can pan into are ever granted.
    fn negotiate_channels(
        caps: &DeviceCapabilities,
        request: &ConfigurationRequest,
    ) -> NegotiationResult<u16> {
        let mixable = |c: u16| SUPPORTED_CHANNEL_COUNTS.contains(&(c as usize));

        if let Some(requested) = request.channels {
            if mixable(requested) && caps.supports_channels(requested) {
                return Ok(requested);
            }
            if request.channel_priority == ChannelPriority::Exact {
                return Err(NegotiationError::ChannelsNotSupported {
                    requested,
                    available: caps.supported_channels.clone(),
                });
            }
        }

        let preferred = match request.channel_priority {
            ChannelPriority::Maximum => caps.max_channels,
            ChannelPriority::Default | ChannelPriority::Exact => caps.default_channels,
        };
        mixer_layout_at_most(preferred)
            .ok_or(NegotiationError::NoCompatibleConfiguration)
    }

    fn negotiate_sample_format(
        caps: &DeviceCapabilities,
        request: &ConfigurationRequest,
    ) -> NegotiationResult<SampleFormat> {
        let supported = |format: &SampleFormat| caps.supported_sample_formats.contains(format);

        if let Some(requested) = request.sample_format {
            if RENDER_FORMATS.contains(&requested) && supported(&requested) {
                return Ok(requested);
            }
        }
        if RENDER_FORMATS.contains(&caps.default_sample_format) && supported(&caps.default_sample_format) {
            return Ok(caps.default_sample_format);
        }
        RENDER_FORMATS
            .into_iter()
            .find(supported)
            .ok_or_else(|| NegotiationError::FormatNotSupported {
                available: caps.supported_sample_formats.clone(),
            })
    }

    fn negotiate_buffer_size(request: &ConfigurationRequest) -> BufferSize {
        if let Some(frames) = request.buffer_size {
            return BufferSize::Fixed(frames);
        }
        match request.buffer_size_priority {
            BufferSizePriority::MinimumLatency => BufferSize::Fixed(128),
            BufferSizePriority::Balanced => BufferSize::Fixed(512),
            BufferSizePriority::Default => BufferSize::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_device() -> DeviceCapabilities {
        DeviceCapabilities {
            name: "Test Output".to_string(),
            supported_sample_rates: vec![44100, 48000],
            min_sample_rate: 44100,
            max_sample_rate: 48000,
            default_sample_rate: 48000,
            supported_channels: vec![2],
            max_channels: 2,
            default_channels: 2,
            supported_sample_formats: vec![SampleFormat::I16, SampleFormat::U16],
            default_sample_format: SampleFormat::U16,
        }
    }

    #[test]
    fn test_engine_request_is_honoured_when_possible() {
        let request = ConfigurationRequest::from_config(&EngineConfig::default());
        let config = ConfigNegotiator::negotiate(&stereo_device(), &request).expect("negotiable");
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.buffer_frames(), 2048);
        assert!(config.sample_rate_matched && config.channels_matched && config.buffer_size_matched);
    }

    #[test]
    fn test_only_render_formats_are_chosen() {
        let request = ConfigurationRequest::new().with_sample_format(SampleFormat::U16);
        let config = ConfigNegotiator::negotiate(&stereo_device(), &request).expect("negotiable");
        assert_eq!(config.sample_format, SampleFormat::I16);

        let mut caps = stereo_device();
        caps.supported_sample_formats = vec![SampleFormat::U8];
        assert!(matches!(
            ConfigNegotiator::negotiate(&caps, &request),
            Err(NegotiationError::FormatNotSupported { .. })
        ));
    }

    #[test]
    fn test_odd_layouts_fall_back_to_a_mixable_one() {
        let mut caps = stereo_device();
        caps.supported_channels = vec![3];
        caps.max_channels = 3;
        caps.default_channels = 3;
        let config = ConfigNegotiator::negotiate(&caps, &ConfigurationRequest::new().with_channels(3))
            .expect("negotiable");
        assert_eq!(config.channels, 2);
        assert!(!config.channels_matched);
    }

    #[test]
    fn test_exact_rate_fails_loudly() {
        let request = ConfigurationRequest::new()
            .with_sample_rate(96000)
            .with_sample_rate_priority(SampleRatePriority::Exact);
        let err = ConfigNegotiator::negotiate(&stereo_device(), &request).unwrap_err();
        assert!(matches!(err, NegotiationError::SampleRateNotSupported { requested: 96000, .. }));
        assert!(matches!(MixerError::from(err), MixerError::BackendInitFailed { .. }));
    }
}

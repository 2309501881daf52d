//! In-memory PCM source.

use std::sync::Arc;

use polymix_core::constants::is_supported_channel_count;
use polymix_core::{MixResult, MixerError};

use super::{AudioSource, Instance, SeekRequest, SourceInstance, SourceProperties};

/// Planar PCM held in memory and shared by every voice playing it.
pub struct Clip {
    props: SourceProperties,
    data: Arc<[f32]>,
    frames: usize,
}

impl Clip {
    /// `data` holds `channels` consecutive planes of equal length.
    pub fn from_planar(data: Vec<f32>, channels: usize, sample_rate: f32) -> MixResult<Self> {
        check_layout(data.len(), channels)?;
        let frames = data.len() / channels;
        Ok(Self {
            props: SourceProperties::new(sample_rate, channels),
            data: data.into(),
            frames,
        })
    }

    /// `data` is interleaved frame by frame.
    pub fn from_interleaved(data: &[f32], channels: usize, sample_rate: f32) -> MixResult<Self> {
        check_layout(data.len(), channels)?;
        let frames = data.len() / channels;
        let mut planar = vec![0.0; data.len()];
        for (i, frame) in data.chunks_exact(channels).enumerate() {
            for (c, &sample) in frame.iter().enumerate() {
                planar[c * frames + i] = sample;
            }
        }
        Self::from_planar(planar, channels, sample_rate)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Length in seconds at the native rate.
    pub fn length(&self) -> f64 {
        self.frames as f64 / self.props.base_sample_rate as f64
    }
}

fn check_layout(samples: usize, channels: usize) -> MixResult<()> {
    if !is_supported_channel_count(channels) {
        return Err(MixerError::UnsupportedFormat(format!("{channels} channel clips")));
    }
    if samples % channels != 0 {
        return Err(MixerError::UnsupportedFormat(format!(
            "{samples} samples do not split into {channels} channels"
        )));
    }
    Ok(())
}

impl AudioSource for Clip {
    fn properties(&self) -> &SourceProperties {
        &self.props
    }

    fn properties_mut(&mut self) -> &mut SourceProperties {
        &mut self.props
    }

    fn create_instance(&self) -> Instance {
        Instance::stream(ClipInstance {
            data: Arc::clone(&self.data),
            frames: self.frames,
            channels: self.props.channels,
            position: 0,
        })
    }
}

struct ClipInstance {
    data: Arc<[f32]>,
    frames: usize,
    channels: usize,
    position: usize,
}

impl SourceInstance for ClipInstance {
    fn fill(&mut self, out: &mut [f32], frames: usize, stride: usize) -> usize {
        let count = frames.min(self.frames - self.position);
        if count == 0 {
            return 0;
        }
        for channel in 0..self.channels {
            let src = channel * self.frames + self.position;
            let dst = channel * stride;
            out[dst..dst + count].copy_from_slice(&self.data[src..src + count]);
        }
        self.position += count;
        count
    }

    fn has_ended(&self) -> bool {
        self.position >= self.frames
    }

    fn rewind(&mut self) -> MixResult<()> {
        self.position = 0;
        Ok(())
    }

    fn seek(&mut self, request: SeekRequest, _scratch: &mut [f32]) -> MixResult<f64> {
        let frame = (request.target * request.sample_rate as f64).floor().max(0.0) as usize;
        self.position = frame.min(self.frames);
        Ok(request.target)
    }
}

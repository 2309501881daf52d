//! Table-driven periodic oscillator source.

use std::f32::consts::PI;
use std::sync::OnceLock;

use polymix_core::MixResult;
use polymix_core::constants::{DEFAULT_SAMPLE_RATE, is_supported_channel_count};

use super::{AudioSource, Instance, SourceInstance, SourceProperties};

const TABLE_SIZE: usize = 8192; // Power of 2 for fast masking
const TABLE_MASK: usize = TABLE_SIZE - 1;

static SINE_TABLE: OnceLock<Vec<f32>> = OnceLock::new();
static TRIANGLE_TABLE: OnceLock<Vec<f32>> = OnceLock::new();
static SAWTOOTH_TABLE: OnceLock<Vec<f32>> = OnceLock::new();
static SQUARE_TABLE: OnceLock<Vec<f32>> = OnceLock::new();

fn build_table(shape: impl Fn(f32) -> f32) -> Vec<f32> {
    (0..TABLE_SIZE)
        .map(|i| shape(i as f32 / TABLE_SIZE as f32))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveShape {
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    Square,
}

impl WaveShape {
    /// One period sampled at `TABLE_SIZE` points, built on first use.
    pub fn table(self) -> &'static [f32] {
        match self {
            WaveShape::Sine => {
                SINE_TABLE.get_or_init(|| build_table(|phase| (2.0 * PI * phase).sin()))
            }
            WaveShape::Triangle => TRIANGLE_TABLE.get_or_init(|| {
                build_table(|phase| {
                    if phase < 0.25 {
                        4.0 * phase
                    } else if phase < 0.75 {
                        2.0 - 4.0 * phase
                    } else {
                        4.0 * phase - 4.0
                    }
                })
            }),
            WaveShape::Sawtooth => SAWTOOTH_TABLE.get_or_init(|| build_table(|phase| 2.0 * phase - 1.0)),
            WaveShape::Square => {
                SQUARE_TABLE.get_or_init(|| build_table(|phase| if phase < 0.5 { 1.0 } else { -1.0 }))
            }
        }
    }

    /// Interpolated sample at `phase` in [0, 1).
    #[inline]
    pub fn sample(self, phase: f32) -> f32 {
        let table = self.table();
        // The square's edge must stay sharp; blending across it would leak a half-step.
        if self == WaveShape::Square {
            return table[(phase * TABLE_SIZE as f32) as usize & TABLE_MASK];
        }
        interpolated_lookup(table, phase)
    }
}

#[inline]
fn interpolated_lookup(table: &[f32], phase: f32) -> f32 {
    let scaled = phase * TABLE_SIZE as f32;
    let index = scaled as usize & TABLE_MASK;
    let frac = scaled - (scaled as usize as f32);
    let a = table[index];
    let b = table[(index + 1) & TABLE_MASK];
    a + frac * (b - a)
}

/// Wrap into [0, 1).
#[inline]
fn normalize_phase(phase: f32) -> f32 {
    phase - phase.floor()
}

/// Endless oscillator at a fixed frequency.
pub struct Waveform {
    props: SourceProperties,
    pub shape: WaveShape,
    pub frequency: f32,
    pub amplitude: f32,
}

impl Waveform {
    pub fn new(shape: WaveShape, frequency: f32) -> Self {
        Self {
            props: SourceProperties::new(DEFAULT_SAMPLE_RATE as f32, 1),
            shape,
            frequency,
            amplitude: 1.0,
        }
    }

    pub fn sine(frequency: f32) -> Self {
        Self::new(WaveShape::Sine, frequency)
    }

    pub fn square(frequency: f32) -> Self {
        Self::new(WaveShape::Square, frequency)
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Native rate the oscillator is generated at.
    pub fn with_sample_rate(mut self, sample_rate: f32) -> Self {
        self.props.base_sample_rate = sample_rate;
        self
    }

    /// Unsupported layouts are ignored.
    pub fn with_channels(mut self, channels: usize) -> Self {
        if is_supported_channel_count(channels) {
            self.props.channels = channels;
        }
        self
    }
}

impl AudioSource for Waveform {
    fn properties(&self) -> &SourceProperties {
        &self.props
    }

    fn properties_mut(&mut self) -> &mut SourceProperties {
        &mut self.props
    }

    fn create_instance(&self) -> Instance {
        Instance::stream(WaveformInstance {
            shape: self.shape,
            increment: self.frequency / self.props.base_sample_rate,
            amplitude: self.amplitude,
            channels: self.props.channels,
            phase: 0.0,
        })
    }
}

struct WaveformInstance {
    shape: WaveShape,
    increment: f32,
    amplitude: f32,
    channels: usize,
    phase: f32,
}

impl SourceInstance for WaveformInstance {
    fn fill(&mut self, out: &mut [f32], frames: usize, stride: usize) -> usize {
        let mut phase = self.phase;
        for i in 0..frames {
            out[i] = self.shape.sample(phase) * self.amplitude;
            phase = normalize_phase(phase + self.increment);
        }
        self.phase = phase;

        let (first, rest) = out.split_at_mut(stride.min(out.len()));
        for channel in 1..self.channels {
            let start = (channel - 1) * stride;
            rest[start..start + frames].copy_from_slice(&first[..frames]);
        }
        frames
    }

    fn has_ended(&self) -> bool {
        false
    }

    fn rewind(&mut self) -> MixResult<()> {
        self.phase = 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &Waveform, frames: usize) -> Vec<f32> {
        let Instance::Stream(mut instance) = source.create_instance() else {
            panic!("waveform must create a stream instance");
        };
        let mut out = vec![0.0; frames * source.props.channels];
        assert_eq!(instance.fill(&mut out, frames, frames), frames);
        out
    }

    #[test]
    fn test_sine_table_quarter_points() {
        assert!(WaveShape::Sine.sample(0.0).abs() < 0.001);
        assert!((WaveShape::Sine.sample(0.25) - 1.0).abs() < 0.001);
        assert!((WaveShape::Sine.sample(0.75) + 1.0).abs() < 0.001);
        assert!((WaveShape::Triangle.sample(0.25) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_square_is_exactly_bipolar() {
        let out = render(&Waveform::square(441.0).with_amplitude(0.5), 400);
        assert!(out.iter().all(|s| *s == 0.5 || *s == -0.5));
        assert_eq!(out[0], 0.5);
        assert_eq!(out[60], -0.5);
    }

    #[test]
    fn test_every_channel_carries_the_same_signal() {
        let out = render(&Waveform::sine(440.0).with_channels(2), 128);
        assert_eq!(out[..128], out[128..]);
    }

    #[test]
    fn test_unsupported_layouts_keep_previous_channels() {
        let wave = Waveform::sine(440.0).with_channels(2).with_channels(9);
        assert_eq!(wave.properties().channels, 2);
    }

    #[test]
    fn test_rewind_restarts_phase() {
        let Instance::Stream(mut instance) = Waveform::sine(1000.0).create_instance() else {
            panic!("waveform must create a stream instance");
        };
        let mut first = [0.0; 32];
        let mut again = [0.0; 32];
        instance.fill(&mut first, 32, 32);
        assert!(instance.rewind().is_ok());
        instance.fill(&mut again, 32, 32);
        assert_eq!(first, again);
    }
}

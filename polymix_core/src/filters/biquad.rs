//! Resonant biquad low/high/band-pass filter.

use std::f32::consts::PI;

use super::{Filter, FilterInstance, FilterParams, WET};
use crate::constants::{DEFAULT_SAMPLE_RATE, MAX_CHANNELS};

pub const KIND: usize = 1;
pub const FREQUENCY: usize = 2;
pub const RESONANCE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BiquadKind {
    #[default]
    LowPass,
    HighPass,
    BandPass,
}

impl BiquadKind {
    fn from_param(value: f32) -> Self {
        match value as i32 {
            1 => BiquadKind::HighPass,
            2 => BiquadKind::BandPass,
            _ => BiquadKind::LowPass,
        }
    }

    fn as_param(self) -> f32 {
        match self {
            BiquadKind::LowPass => 0.0,
            BiquadKind::HighPass => 1.0,
            BiquadKind::BandPass => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadFilter {
    pub kind: BiquadKind,
    pub frequency: f32,
    pub resonance: f32,
}

impl Default for BiquadFilter {
    fn default() -> Self {
        Self {
            kind: BiquadKind::LowPass,
            frequency: 1000.0,
            resonance: 2.0,
        }
    }
}

impl BiquadFilter {
    pub fn new(kind: BiquadKind, frequency: f32, resonance: f32) -> Self {
        Self {
            kind,
            frequency,
            resonance,
        }
    }
}

impl Filter for BiquadFilter {
    fn create_instance(&self) -> Box<dyn FilterInstance> {
        Box::new(BiquadInstance::new(self))
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["Wet", "Type", "Frequency", "Resonance"]
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Coefficients {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

pub struct BiquadInstance {
    params: FilterParams,
    state: [ChannelState; MAX_CHANNELS],
    coeffs: Coefficients,
    sample_rate: f32,
}

impl BiquadInstance {
    fn new(filter: &BiquadFilter) -> Self {
        let params = FilterParams::new(&[filter.kind.as_param(), filter.frequency, filter.resonance]);
        let mut instance = Self {
            params,
            state: [ChannelState::default(); MAX_CHANNELS],
            coeffs: Coefficients::default(),
            sample_rate: DEFAULT_SAMPLE_RATE as f32,
        };
        instance.recalculate();
        instance
    }

    fn recalculate(&mut self) {
        let omega = 2.0 * PI * self.params.value(FREQUENCY) / self.sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * self.params.value(RESONANCE));
        let scalar = 1.0 / (1.0 + alpha);

        let (a0, a1, a2) = match BiquadKind::from_param(self.params.value(KIND)) {
            BiquadKind::LowPass => {
                let a0 = 0.5 * (1.0 - cos_omega) * scalar;
                (a0, (1.0 - cos_omega) * scalar, a0)
            }
            BiquadKind::HighPass => {
                let a0 = 0.5 * (1.0 + cos_omega) * scalar;
                (a0, -(1.0 + cos_omega) * scalar, a0)
            }
            BiquadKind::BandPass => {
                let a0 = alpha * scalar;
                (a0, 0.0, -a0)
            }
        };
        self.coeffs = Coefficients {
            a0,
            a1,
            a2,
            b1: -2.0 * cos_omega * scalar,
            b2: (1.0 - alpha) * scalar,
        };
    }
}

impl FilterInstance for BiquadInstance {
    fn params(&self) -> &FilterParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut FilterParams {
        &mut self.params
    }

    fn process_channel(
        &mut self,
        samples: &mut [f32],
        sample_rate: f32,
        _time: f64,
        channel: usize,
        _channels: usize,
    ) {
        if channel == 0 {
            let changed = self.params.take_changed();
            let watched = (1 << KIND) | (1 << FREQUENCY) | (1 << RESONANCE);
            if changed & watched != 0 || sample_rate != self.sample_rate {
                self.sample_rate = sample_rate;
                self.recalculate();
            }
        }

        let Coefficients { a0, a1, a2, b1, b2 } = self.coeffs;
        let wet = self.params.value(WET);
        let s = &mut self.state[channel];

        // Two samples per iteration; the state variables swap roles instead of moving.
        let mut pairs = samples.chunks_exact_mut(2);
        for pair in &mut pairs {
            let x = pair[0];
            s.y2 = a0 * x + a1 * s.x1 + a2 * s.x2 - b1 * s.y1 - b2 * s.y2;
            pair[0] += (s.y2 - x) * wet;

            s.x2 = pair[1];
            s.y1 = a0 * s.x2 + a1 * x + a2 * s.x1 - b1 * s.y2 - b2 * s.y1;
            pair[1] += (s.y1 - pair[1]) * wet;

            s.x1 = s.x2;
            s.x2 = x;
        }

        // An odd trailing sample repeats its predecessor.
        let len = samples.len();
        if len % 2 == 1 && len > 1 {
            samples[len - 1] = samples[len - 2];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{Detached, FilterBlock, run_filter};

    fn run(filter: &BiquadFilter, input: &[f32], rate: f32) -> Vec<f32> {
        let mut instance = filter.create_instance();
        let mut samples = input.to_vec();
        let frames = samples.len();
        let mut block = FilterBlock {
            samples: &mut samples,
            frames,
            stride: frames,
            channels: 1,
            sample_rate: rate,
            time: 0.0,
        };
        run_filter(instance.as_mut(), &mut block, &Detached);
        samples
    }

    fn sine(freq: f32, rate: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * freq * i as f32 / rate).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_low_pass_attenuates_high_frequencies() {
        let filter = BiquadFilter::new(BiquadKind::LowPass, 500.0, 1.0);
        let low = run(&filter, &sine(100.0, 44_100.0, 4096), 44_100.0);
        let high = run(&filter, &sine(10_000.0, 44_100.0, 4096), 44_100.0);
        assert!(rms(&high[1024..]) < 0.1 * rms(&low[1024..]));
    }

    #[test]
    fn test_high_pass_removes_dc() {
        let filter = BiquadFilter::new(BiquadKind::HighPass, 1000.0, 1.0);
        let out = run(&filter, &vec![1.0; 4096], 44_100.0);
        assert!(out[4000].abs() < 0.01);
    }

    #[test]
    fn test_odd_block_repeats_last_sample() {
        let filter = BiquadFilter::default();
        let out = run(&filter, &[0.3, -0.2, 0.9], 44_100.0);
        assert_eq!(out[2], out[1]);
    }
}

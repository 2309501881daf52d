//! Sample-rate and bit-depth reduction.

use super::{Filter, FilterInstance, FilterParams, WET};
use crate::constants::MAX_CHANNELS;

pub const SAMPLE_RATE: usize = 1;
pub const BIT_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LofiFilter {
    pub sample_rate: f32,
    pub bit_depth: f32,
}

impl Default for LofiFilter {
    fn default() -> Self {
        Self {
            sample_rate: 4000.0,
            bit_depth: 3.0,
        }
    }
}

impl LofiFilter {
    pub fn new(sample_rate: f32, bit_depth: f32) -> Self {
        Self {
            sample_rate,
            bit_depth,
        }
    }
}

impl Filter for LofiFilter {
    fn create_instance(&self) -> Box<dyn FilterInstance> {
        Box::new(LofiInstance {
            params: FilterParams::new(&[self.sample_rate, self.bit_depth]),
            channels: [HeldSample::default(); MAX_CHANNELS],
        })
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["Wet", "Samplerate", "Bitdepth"]
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct HeldSample {
    value: f32,
    skip: f32,
}

pub struct LofiInstance {
    params: FilterParams,
    channels: [HeldSample; MAX_CHANNELS],
}

impl FilterInstance for LofiInstance {
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
        let wet = self.params.value(WET);
        let target_rate = self.params.value(SAMPLE_RATE);
        let levels = 2f32.powf(self.params.value(BIT_DEPTH));
        let held = &mut self.channels[channel];

        for sample in samples.iter_mut() {
            if held.skip <= 0.0 {
                held.skip += sample_rate / target_rate - 1.0;
                held.value = (levels * *sample).floor() / levels;
            } else {
                held.skip -= 1.0;
            }
            *sample += (held.value - *sample) * wet;
        }
    }
}

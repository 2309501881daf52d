//! Soft saturating wave shaper.

use super::{Filter, FilterInstance, FilterParams, WET};

pub const AMOUNT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WaveShaperFilter {
    /// Drive in [-1, 1]. 0 is transparent.
    pub amount: f32,
}

impl WaveShaperFilter {
    pub fn new(amount: f32) -> Self {
        Self { amount }
    }
}

impl Filter for WaveShaperFilter {
    fn create_instance(&self) -> Box<dyn FilterInstance> {
        Box::new(WaveShaperInstance {
            params: FilterParams::new(&[self.amount]),
        })
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["Wet", "Amount"]
    }
}

pub struct WaveShaperInstance {
    params: FilterParams,
}

impl FilterInstance for WaveShaperInstance {
    fn params(&self) -> &FilterParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut FilterParams {
        &mut self.params
    }

    fn process_channel(
        &mut self,
        samples: &mut [f32],
        _sample_rate: f32,
        _time: f64,
        _channel: usize,
        _channels: usize,
    ) {
        let amount = self.params.value(AMOUNT);
        let wet = self.params.value(WET);
        let k = if amount == 1.0 {
            2.0 * amount / 0.01
        } else {
            2.0 * amount / (1.0 - amount)
        };
        for sample in samples.iter_mut() {
            let dry = *sample;
            let shaped = (1.0 + k) * dry / (1.0 + k * dry.abs());
            *sample += (shaped - dry) * wet;
        }
    }
}

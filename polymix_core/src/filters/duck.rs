//! Side-chain ducking keyed on another bus's output level.

use super::{Filter, FilterBlock, FilterContext, FilterInstance, FilterParams, WET};
use crate::handle::Handle;

pub const ON_RAMP: usize = 1;
pub const OFF_RAMP: usize = 2;
pub const LEVEL: usize = 3;

/// Summed bus level above which the listened bus counts as sounding.
const SOUND_ON_THRESHOLD: f32 = 0.01;

/// Ducks whatever it is attached to while the bus behind `listen_to` is audible.
///
/// The listened bus must have visualization enabled; otherwise its level reads as
/// silence and the filter never engages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuckFilter {
    pub listen_to: Handle,
    /// Seconds to reach `level` once sound starts
    pub on_ramp: f32,
    /// Seconds to recover to unity once sound stops
    pub off_ramp: f32,
    /// Gain while ducked
    pub level: f32,
}

impl DuckFilter {
    pub fn new(listen_to: Handle) -> Self {
        Self {
            listen_to,
            on_ramp: 0.1,
            off_ramp: 0.5,
            level: 0.5,
        }
    }

    pub fn with_ramps(mut self, on_ramp: f32, off_ramp: f32) -> Self {
        self.on_ramp = on_ramp;
        self.off_ramp = off_ramp;
        self
    }

    pub fn with_level(mut self, level: f32) -> Self {
        self.level = level;
        self
    }
}

impl Filter for DuckFilter {
    fn create_instance(&self) -> Box<dyn FilterInstance> {
        Box::new(DuckInstance {
            params: FilterParams::new(&[self.on_ramp, self.off_ramp, self.level]),
            listen_to: self.listen_to,
            gain: 1.0,
        })
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["Wet", "OnRamp", "OffRamp", "Level"]
    }
}

pub struct DuckInstance {
    params: FilterParams,
    listen_to: Handle,
    gain: f32,
}

impl DuckInstance {
    fn ramp_step(&self, seconds: f32, sample_rate: f32) -> f32 {
        if seconds > 0.01 {
            (1.0 - self.params.value(LEVEL)) / (seconds * sample_rate)
        } else {
            1.0
        }
    }
}

impl FilterInstance for DuckInstance {
    fn params(&self) -> &FilterParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut FilterParams {
        &mut self.params
    }

    fn process(&mut self, block: &mut FilterBlock<'_>, ctx: &dyn FilterContext) {
        let down = self.ramp_step(self.params.value(ON_RAMP), block.sample_rate);
        let up = self.ramp_step(self.params.value(OFF_RAMP), block.sample_rate);
        let floor = self.params.value(LEVEL);
        let wet = self.params.value(WET);
        let sound_on = ctx
            .bus_level(self.listen_to)
            .is_some_and(|level| level > SOUND_ON_THRESHOLD);

        // Every channel walks the same envelope from the stored gain.
        let mut gain = self.gain;
        for channel in 0..block.channels {
            gain = self.gain;
            for sample in block.channel_mut(channel) {
                if sound_on && gain > floor {
                    gain -= down;
                }
                if !sound_on && gain < 1.0 {
                    gain += up;
                }
                gain = gain.max(floor).min(1.0);
                *sample += (*sample * gain - *sample) * wet;
            }
        }
        self.gain = gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::run_filter;

    struct Loud(f32);

    impl FilterContext for Loud {
        fn bus_level(&self, _bus: Handle) -> Option<f32> {
            Some(self.0)
        }
    }

    fn run(instance: &mut dyn FilterInstance, samples: &mut [f32], ctx: &dyn FilterContext) {
        let frames = samples.len();
        let mut block = FilterBlock {
            samples,
            frames,
            stride: frames,
            channels: 1,
            sample_rate: 1000.0,
            time: 0.0,
        };
        run_filter(instance, &mut block, ctx);
    }

    #[test]
    fn test_ducks_to_level_within_on_ramp() {
        let mut duck = DuckFilter::new(Handle::from_raw(1)).create_instance();
        // 0.1 s at 1 kHz is 100 samples.
        let mut samples = vec![1.0f32; 120];
        run(duck.as_mut(), &mut samples, &Loud(1.0));
        assert!((samples[49] - 0.75).abs() < 0.02);
        assert!((samples[110] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_silent_bus_leaves_signal_alone() {
        let mut duck = DuckFilter::new(Handle::from_raw(1)).create_instance();
        let mut samples = vec![0.8f32; 64];
        run(duck.as_mut(), &mut samples, &Loud(0.005));
        assert!(samples.iter().all(|&s| s == 0.8));
    }

    #[test]
    fn test_recovers_after_sound_stops() {
        let mut duck = DuckFilter::new(Handle::from_raw(1))
            .with_ramps(0.0, 0.0)
            .create_instance();
        let mut samples = vec![1.0f32; 4];
        run(duck.as_mut(), &mut samples, &Loud(1.0));
        assert_eq!(samples[3], 0.5);
        let mut samples = vec![1.0f32; 4];
        run(duck.as_mut(), &mut samples, &Loud(0.0));
        assert_eq!(samples[0], 1.0);
    }
}

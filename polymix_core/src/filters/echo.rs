//! Feedback delay with a one-pole smoother on the feedback tap.

use super::{Filter, FilterBlock, FilterContext, FilterInstance, FilterParams, WET};

pub const DELAY: usize = 1;
pub const DECAY: usize = 2;
pub const FILTER: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoFilter {
    /// Seconds between repeats. Fixes the delay line size on first use.
    pub delay: f32,
    /// Feedback gain per repeat
    pub decay: f32,
    /// One-pole coefficient on the feedback path; 0 leaves repeats unfiltered
    pub filter: f32,
}

impl Default for EchoFilter {
    fn default() -> Self {
        Self {
            delay: 0.3,
            decay: 0.7,
            filter: 0.0,
        }
    }
}

impl EchoFilter {
    pub fn new(delay: f32, decay: f32, filter: f32) -> Self {
        Self {
            delay,
            decay,
            filter,
        }
    }
}

impl Filter for EchoFilter {
    fn create_instance(&self) -> Box<dyn FilterInstance> {
        Box::new(EchoInstance {
            params: FilterParams::new(&[self.delay, self.decay, self.filter]),
            line: Vec::new(),
            max_length: 0,
            offset: 0,
        })
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["Wet", "Delay", "Decay", "Filter"]
    }
}

pub struct EchoInstance {
    params: FilterParams,
    /// Planar delay line, `max_length` samples per channel
    line: Vec<f32>,
    max_length: usize,
    offset: usize,
}

impl FilterInstance for EchoInstance {
    fn params(&self) -> &FilterParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut FilterParams {
        &mut self.params
    }

    fn process(&mut self, block: &mut FilterBlock<'_>, _ctx: &dyn FilterContext) {
        let wanted = (self.params.value(DELAY) * block.sample_rate).ceil().max(1.0) as usize;
        if self.line.is_empty() {
            self.max_length = wanted;
            self.line = vec![0.0; wanted * block.channels];
        }
        let channels = block.channels.min(self.line.len() / self.max_length);
        let length = wanted.min(self.max_length);
        // The delay parameter may have shrunk since the last block.
        self.offset %= length;

        let wet = self.params.value(WET);
        let decay = self.params.value(DECAY);
        let smooth = self.params.value(FILTER);

        let mut prev = (self.offset + length - 1) % length;
        for i in 0..block.frames {
            for channel in 0..channels {
                let line = &mut self.line[channel * self.max_length..];
                let sample = &mut block.samples[channel * block.stride + i];

                line[self.offset] = smooth * line[prev] + (1.0 - smooth) * line[self.offset];
                let n = *sample + line[self.offset] * decay;
                line[self.offset] = n;
                *sample += (n - *sample) * wet;
            }
            prev = self.offset;
            self.offset = (self.offset + 1) % length;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{Detached, run_filter};

    fn run(instance: &mut dyn FilterInstance, samples: &mut [f32], rate: f32) {
        let frames = samples.len();
        let mut block = FilterBlock {
            samples,
            frames,
            stride: frames,
            channels: 1,
            sample_rate: rate,
            time: 0.0,
        };
        run_filter(instance, &mut block, &Detached);
    }

    #[test]
    fn test_impulse_repeats_after_delay() {
        // 4 samples of delay at 100 Hz.
        let mut echo = EchoFilter::new(0.04, 0.5, 0.0).create_instance();
        let mut samples = [0.0f32; 12];
        samples[0] = 1.0;
        run(echo.as_mut(), &mut samples, 100.0);
        assert_eq!(samples[0], 1.0);
        assert_eq!(samples[4], 0.5);
        assert_eq!(samples[8], 0.25);
        assert_eq!(samples[3], 0.0);
    }

    #[test]
    fn test_delay_line_persists_across_blocks() {
        let mut echo = EchoFilter::new(0.04, 0.5, 0.0).create_instance();
        let mut first = [1.0f32, 0.0];
        run(echo.as_mut(), &mut first, 100.0);
        let mut second = [0.0f32; 4];
        run(echo.as_mut(), &mut second, 100.0);
        assert_eq!(second[2], 0.5);
    }

    #[test]
    fn test_zero_delay_does_not_panic() {
        let mut echo = EchoFilter::new(0.0, 0.5, 0.0).create_instance();
        let mut samples = [0.5f32; 8];
        run(echo.as_mut(), &mut samples, 44_100.0);
        assert!(samples.iter().all(|s| s.is_finite()));
    }
}

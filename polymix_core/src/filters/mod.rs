//! Filter contract and the bundled DSP filters.
//!
//! A [`Filter`] is a shareable description (cutoff, delay, ...) that spawns one
//! [`FilterInstance`] per voice or global slot. Instances own their state exclusively and
//! are driven from the render thread only, so they need `Send` but not `Sync`.
//!
//! Parameter 0 of every instance is the wet/dry mix. All parameters can be set directly,
//! ramped or oscillated; faders are evaluated once per processed block before `process`.

pub mod biquad;
pub mod duck;
pub mod echo;
pub mod lofi;
pub mod wave_shaper;

pub use biquad::{BiquadFilter, BiquadKind};
pub use duck::DuckFilter;
pub use echo::EchoFilter;
pub use lofi::LofiFilter;
pub use wave_shaper::WaveShaperFilter;

use crate::fader::{Fader, FaderStep};
use crate::handle::Handle;

/// Index of the wet/dry parameter shared by all filters.
pub const WET: usize = 0;

/// Most parameters any bundled filter exposes.
pub const MAX_FILTER_PARAMS: usize = 8;

/// Parameter vector with one fader per slot and a changed-bits mask.
#[derive(Debug, Clone)]
pub struct FilterParams {
    values: [f32; MAX_FILTER_PARAMS],
    faders: [Fader; MAX_FILTER_PARAMS],
    count: usize,
    changed: u32,
}

impl FilterParams {
    /// Build from the per-parameter defaults. The wet parameter (index 0) starts at 1.0
    /// and is not part of `extra`.
    pub fn new(extra: &[f32]) -> Self {
        let count = (extra.len() + 1).min(MAX_FILTER_PARAMS);
        let mut values = [0.0; MAX_FILTER_PARAMS];
        values[WET] = 1.0;
        for (slot, &value) in values[1..count].iter_mut().zip(extra) {
            *slot = value;
        }
        Self {
            values,
            faders: [Fader::Inactive; MAX_FILTER_PARAMS],
            count,
            changed: 0,
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Current value of parameter `index`, or `None` if out of range.
    pub fn get(&self, index: usize) -> Option<f32> {
        (index < self.count).then(|| self.values[index])
    }

    /// Value of a parameter the filter itself declared. Out-of-range reads give 0.
    #[inline]
    pub fn value(&self, index: usize) -> f32 {
        if index < self.count { self.values[index] } else { 0.0 }
    }

    pub fn set(&mut self, index: usize, value: f32) {
        if index >= self.count {
            return;
        }
        self.faders[index].clear();
        self.values[index] = value;
        self.changed |= 1 << index;
    }

    pub fn fade(&mut self, index: usize, to: f32, duration: f64, now: f64) {
        if index >= self.count || duration <= 0.0 || to == self.values[index] {
            return;
        }
        self.faders[index] = Fader::ramp(self.values[index], to, duration, now);
    }

    pub fn oscillate(&mut self, index: usize, from: f32, to: f32, period: f64, now: f64) {
        if index >= self.count || period <= 0.0 || from == to {
            return;
        }
        self.faders[index] = Fader::lfo(from, to, period, now);
    }

    /// Apply every live fader at stream time `now`.
    pub fn update(&mut self, now: f64) {
        for index in 0..self.count {
            match self.faders[index].step(now) {
                FaderStep::Idle => {}
                FaderStep::Running(v) | FaderStep::Finished(v) => {
                    self.values[index] = v;
                    self.changed |= 1 << index;
                }
            }
        }
    }

    /// Bits of parameters changed since the last call, then clears the mask.
    pub fn take_changed(&mut self) -> u32 {
        std::mem::take(&mut self.changed)
    }
}

/// A planar block handed to a filter.
pub struct FilterBlock<'a> {
    /// Channel `c` lives at `samples[c * stride..c * stride + frames]`
    pub samples: &'a mut [f32],
    pub frames: usize,
    pub stride: usize,
    pub channels: usize,
    pub sample_rate: f32,
    /// Stream time used to evaluate parameter faders
    pub time: f64,
}

impl FilterBlock<'_> {
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        let start = channel * self.stride;
        &mut self.samples[start..start + self.frames]
    }
}

/// Read access to engine state a filter may react to.
pub trait FilterContext {
    /// Sum of the latest per-channel peak levels captured by the bus behind `bus`.
    fn bus_level(&self, bus: Handle) -> Option<f32>;
}

/// Context for filters running outside an engine.
pub struct Detached;

impl FilterContext for Detached {
    fn bus_level(&self, _bus: Handle) -> Option<f32> {
        None
    }
}

/// Live filter state attached to a voice or the global chain.
pub trait FilterInstance: Send {
    fn params(&self) -> &FilterParams;
    fn params_mut(&mut self) -> &mut FilterParams;

    /// Transform the block in place. The default hands each channel to `process_channel`.
    fn process(&mut self, block: &mut FilterBlock<'_>, _ctx: &dyn FilterContext) {
        let (rate, time, channels) = (block.sample_rate, block.time, block.channels);
        for channel in 0..channels {
            self.process_channel(block.channel_mut(channel), rate, time, channel, channels);
        }
    }

    fn process_channel(
        &mut self,
        _samples: &mut [f32],
        _sample_rate: f32,
        _time: f64,
        _channel: usize,
        _channels: usize,
    ) {
    }
}

/// Advance parameter faders, then process the block.
pub fn run_filter(
    filter: &mut dyn FilterInstance,
    block: &mut FilterBlock<'_>,
    ctx: &dyn FilterContext,
) {
    filter.params_mut().update(block.time);
    filter.process(block, ctx);
}

/// Shareable filter description.
pub trait Filter: Send + Sync {
    fn create_instance(&self) -> Box<dyn FilterInstance>;

    /// Names of the parameters in index order, starting with "Wet".
    fn param_names(&self) -> &'static [&'static str];
}

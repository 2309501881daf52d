//! Sub-mixer source.
//!
//! A bus plays like any other sound, but its instance produces audio by mixing every
//! voice routed to the bus's own handle. Buses nest, forming a tree under the root.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::atomic::AtomicCell;
use polymix_core::constants::{
    DEFAULT_SAMPLE_RATE, MAX_CHANNELS, SAMPLE_GRANULARITY, VISUALIZATION_SAMPLES,
    is_supported_channel_count,
};
use polymix_core::{Filter, Handle, ResamplerKind, Vec3};

use super::{AudioSource, Instance, SourceProperties};
use crate::engine::{Mixer, PlayParams};

/// State the bus shares with its live instance and the engine.
#[derive(Debug)]
pub(crate) struct BusShared {
    pub handle: AtomicCell<Handle>,
    pub visualize: AtomicBool,
    pub resampler: AtomicCell<ResamplerKind>,
}

pub struct Bus {
    props: SourceProperties,
    shared: Arc<BusShared>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            props: SourceProperties::new(DEFAULT_SAMPLE_RATE as f32, 2),
            shared: Arc::new(BusShared {
                handle: AtomicCell::new(Handle::NULL),
                visualize: AtomicBool::new(false),
                resampler: AtomicCell::new(ResamplerKind::default()),
            }),
        }
    }

    /// Voice handle of the playing bus, null until played.
    pub fn handle(&self) -> Handle {
        self.shared.handle.load()
    }

    fn live_handle(&self, mixer: &Mixer) -> Option<Handle> {
        let handle = self.handle();
        (!handle.is_null() && mixer.is_valid_voice_handle(handle)).then_some(handle)
    }

    /// Play `source` routed into this bus. Returns null if the bus is not playing.
    pub fn play(&self, mixer: &Mixer, source: &dyn AudioSource, params: PlayParams) -> Handle {
        match self.live_handle(mixer) {
            Some(bus) => mixer.play(source, params.on_bus(bus)),
            None => Handle::NULL,
        }
    }

    pub fn play_clocked(
        &self,
        mixer: &Mixer,
        sound_time: f64,
        source: &dyn AudioSource,
        params: PlayParams,
    ) -> Handle {
        match self.live_handle(mixer) {
            Some(bus) => mixer.play_clocked(sound_time, source, params.on_bus(bus)),
            None => Handle::NULL,
        }
    }

    pub fn play_3d(
        &self,
        mixer: &Mixer,
        source: &dyn AudioSource,
        position: Vec3,
        velocity: Vec3,
        params: PlayParams,
    ) -> Handle {
        match self.live_handle(mixer) {
            Some(bus) => mixer.play_3d(source, position, velocity, params.on_bus(bus)),
            None => Handle::NULL,
        }
    }

    pub fn play_3d_clocked(
        &self,
        mixer: &Mixer,
        sound_time: f64,
        source: &dyn AudioSource,
        position: Vec3,
        velocity: Vec3,
        params: PlayParams,
    ) -> Handle {
        match self.live_handle(mixer) {
            Some(bus) => {
                mixer.play_3d_clocked(sound_time, source, position, velocity, params.on_bus(bus))
            }
            None => Handle::NULL,
        }
    }

    /// Re-route an already playing voice (or group) into this bus.
    pub fn annex_sound(&self, mixer: &Mixer, voice: Handle) {
        if let Some(bus) = self.live_handle(mixer) {
            mixer.set_voice_bus(voice, bus);
        }
    }

    /// Set filter slot `id` for future plays and replace it on the live bus voice.
    pub fn set_filter_on(&mut self, mixer: &Mixer, id: usize, filter: Option<Arc<dyn Filter>>) {
        self.set_filter(id, filter.clone());
        if let Some(bus) = self.live_handle(mixer) {
            mixer.set_voice_filter(bus, id, filter);
        }
    }

    /// Channel layout of the bus mix. Takes effect on the next play.
    pub fn set_channels(&mut self, channels: usize) {
        if is_supported_channel_count(channels) {
            self.props.channels = channels;
        }
    }

    pub fn set_visualization_enable(&self, enable: bool) {
        self.shared.visualize.store(enable, Ordering::Relaxed);
    }

    /// Sum across channels of the first 256 frames of the latest bus mix.
    pub fn wave(&self, mixer: &Mixer) -> [f32; VISUALIZATION_SAMPLES] {
        mixer
            .bus_visualization(self.handle())
            .map(|(wave, _)| wave)
            .unwrap_or([0.0; VISUALIZATION_SAMPLES])
    }

    /// Peak level of `channel` in the latest bus mix.
    pub fn approximate_volume(&self, mixer: &Mixer, channel: usize) -> f32 {
        if channel >= self.props.channels {
            return 0.0;
        }
        mixer
            .bus_visualization(self.handle())
            .map_or(0.0, |(_, peaks)| peaks[channel])
    }

    /// Voices currently routed into this bus.
    pub fn active_voice_count(&self, mixer: &Mixer) -> usize {
        match self.live_handle(mixer) {
            Some(bus) => mixer.count_bus_voices(bus),
            None => 0,
        }
    }

    pub fn resampler(&self) -> ResamplerKind {
        self.shared.resampler.load()
    }

    pub fn set_resampler(&self, resampler: ResamplerKind) {
        self.shared.resampler.store(resampler);
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for Bus {
    fn properties(&self) -> &SourceProperties {
        &self.props
    }

    fn properties_mut(&mut self) -> &mut SourceProperties {
        &mut self.props
    }

    fn create_instance(&self) -> Instance {
        Instance::Bus(BusInstance {
            shared: Arc::clone(&self.shared),
            scratch: vec![0.0; SAMPLE_GRANULARITY * MAX_CHANNELS],
            channels: self.props.channels,
            wave: [0.0; VISUALIZATION_SAMPLES],
            peaks: [0.0; MAX_CHANNELS],
        })
    }

    fn attach(&self, handle: Handle) -> Option<Handle> {
        let previous = self.shared.handle.swap(handle);
        (!previous.is_null()).then_some(previous)
    }
}

/// Live side of a bus, owned by its voice.
pub struct BusInstance {
    shared: Arc<BusShared>,
    /// Resampled output of the bus's children before they are panned in
    pub(crate) scratch: Vec<f32>,
    pub(crate) channels: usize,
    pub(crate) wave: [f32; VISUALIZATION_SAMPLES],
    pub(crate) peaks: [f32; MAX_CHANNELS],
}

impl BusInstance {
    pub(crate) fn visualize(&self) -> bool {
        self.shared.visualize.load(Ordering::Relaxed)
    }

    pub(crate) fn resampler(&self) -> ResamplerKind {
        self.shared.resampler.load()
    }

    /// Sum of the latest per-channel peaks.
    pub(crate) fn level(&self) -> f32 {
        self.peaks[..self.channels].iter().sum()
    }

    pub(crate) fn detach(&self, handle: Handle) {
        let _ = self.shared.handle.compare_exchange(handle, Handle::NULL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_reports_previous_voice() {
        let bus = Bus::new();
        let first = Handle::for_voice(3, 1);
        let second = Handle::for_voice(4, 2);
        assert_eq!(bus.attach(first), None);
        assert_eq!(bus.attach(second), Some(first));
        assert_eq!(bus.handle(), second);
    }

    #[test]
    fn test_detach_ignores_stale_handles() {
        let bus = Bus::new();
        let live = Handle::for_voice(0, 5);
        bus.attach(live);
        let Instance::Bus(instance) = bus.create_instance() else {
            panic!("bus must create a bus instance");
        };
        instance.detach(Handle::for_voice(0, 4));
        assert_eq!(bus.handle(), live);
        instance.detach(live);
        assert!(bus.handle().is_null());
    }

    #[test]
    fn test_channel_layout_is_validated() {
        let mut bus = Bus::new();
        bus.set_channels(3);
        assert_eq!(bus.properties().channels, 2);
        bus.set_channels(6);
        assert_eq!(bus.properties().channels, 6);
    }
}

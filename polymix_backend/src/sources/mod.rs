//! Sound producers.
//!
//! An [`AudioSource`] is the shareable description of a sound (sample data, oscillator
//! settings, default flags). Every `play` turns it into an [`Instance`] which the mixer
//! owns exclusively and pulls planar frames from at the source's native rate.

pub mod bus;
pub mod clip;
pub mod noise;
pub mod queue;
pub mod waveform;

pub use bus::{Bus, BusInstance};
pub use clip::Clip;
pub use noise::{Noise, NoiseKind};
pub use queue::{Queue, QueueInstance};
pub use waveform::{WaveShape, Waveform};

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use polymix_core::constants::{DEFAULT_SAMPLE_RATE, FILTERS_PER_STREAM};
use polymix_core::{Filter, Handle, MixResult, MixerError, Vec3};

/// Distance attenuation curve for 3-D voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttenuationModel {
    #[default]
    None,
    InverseDistance,
    LinearDistance,
    ExponentialDistance,
}

/// What a voice does once the 3-D pass finds it inaudible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InaudibleBehavior {
    /// Stop mixing but keep the voice around
    #[default]
    Pause,
    /// Stop the voice
    Kill,
    /// Keep advancing the source without mixing it
    KeepTicking,
}

/// Occlusion or custom gain applied before distance attenuation.
pub trait AudioCollider: Send + Sync {
    /// Gain in [0, 1] for a voice at `position` relative to the world origin.
    fn collide(&self, voice: Handle, position: Vec3, velocity: Vec3) -> f32;
}

/// Replacement for the built-in attenuation curves.
pub trait AudioAttenuator: Send + Sync {
    fn attenuate(&self, distance: f32, min_distance: f32, max_distance: f32, rolloff: f32) -> f32;
}

/// Defaults every voice of a source starts with.
pub struct SourceProperties {
    pub base_sample_rate: f32,
    pub channels: usize,
    pub volume: f32,
    pub looping: bool,
    /// Playing the source stops its previous voices first
    pub single_instance: bool,
    pub process_3d: bool,
    pub listener_relative: bool,
    /// Delay 3-D voices by their distance over the speed of sound
    pub distance_delay: bool,
    pub inaudible_behavior: InaudibleBehavior,
    pub disable_autostop: bool,
    /// Seconds to seek back to when a looping voice runs out
    pub loop_point: f64,
    pub min_distance: f32,
    pub max_distance: f32,
    pub rolloff: f32,
    pub attenuation: AttenuationModel,
    pub doppler_factor: f32,
    pub collider: Option<Arc<dyn AudioCollider>>,
    pub attenuator: Option<Arc<dyn AudioAttenuator>>,
    pub filters: [Option<Arc<dyn Filter>>; FILTERS_PER_STREAM],
    source_id: AtomicU32,
}

impl SourceProperties {
    pub fn new(base_sample_rate: f32, channels: usize) -> Self {
        Self {
            base_sample_rate,
            channels,
            volume: 1.0,
            looping: false,
            single_instance: false,
            process_3d: false,
            listener_relative: false,
            distance_delay: false,
            inaudible_behavior: InaudibleBehavior::Pause,
            disable_autostop: false,
            loop_point: 0.0,
            min_distance: 1.0,
            max_distance: 1_000_000.0,
            rolloff: 1.0,
            attenuation: AttenuationModel::None,
            doppler_factor: 1.0,
            collider: None,
            attenuator: None,
            filters: std::array::from_fn(|_| None),
            source_id: AtomicU32::new(0),
        }
    }

    /// Engine-assigned id shared by every voice of this source. 0 until first played.
    pub fn source_id(&self) -> u32 {
        self.source_id.load(Ordering::Relaxed)
    }

    pub(crate) fn assign_source_id(&self, next: &mut u32) -> u32 {
        let current = self.source_id();
        if current != 0 {
            return current;
        }
        let id = *next;
        *next = next.wrapping_add(1).max(1);
        self.source_id.store(id, Ordering::Relaxed);
        id
    }
}

impl Default for SourceProperties {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE as f32, 1)
    }
}

/// Shareable sound description.
pub trait AudioSource: Send + Sync {
    fn properties(&self) -> &SourceProperties;
    fn properties_mut(&mut self) -> &mut SourceProperties;

    /// Fresh playback state. Called outside the engine lock.
    fn create_instance(&self) -> Instance;

    /// Told the handle of a new voice of this source. Sources that track their single
    /// live voice return the one it replaces, which the engine then stops.
    fn attach(&self, _handle: Handle) -> Option<Handle> {
        None
    }

    fn set_volume(&mut self, volume: f32) {
        self.properties_mut().volume = volume;
    }

    fn set_looping(&mut self, looping: bool) {
        self.properties_mut().looping = looping;
    }

    fn set_loop_point(&mut self, seconds: f64) {
        self.properties_mut().loop_point = seconds;
    }

    fn set_single_instance(&mut self, single: bool) {
        self.properties_mut().single_instance = single;
    }

    fn set_auto_stop(&mut self, auto_stop: bool) {
        self.properties_mut().disable_autostop = !auto_stop;
    }

    fn set_inaudible_behavior(&mut self, behavior: InaudibleBehavior) {
        self.properties_mut().inaudible_behavior = behavior;
    }

    /// Attach `filter` to slot `id` of every voice played from now on.
    fn set_filter(&mut self, id: usize, filter: Option<Arc<dyn Filter>>) {
        if let Some(slot) = self.properties_mut().filters.get_mut(id) {
            *slot = filter;
        }
    }

    fn set_3d_min_max_distance(&mut self, min_distance: f32, max_distance: f32) {
        let props = self.properties_mut();
        props.min_distance = min_distance;
        props.max_distance = max_distance;
    }

    fn set_3d_attenuation(&mut self, model: AttenuationModel, rolloff: f32) {
        let props = self.properties_mut();
        props.attenuation = model;
        props.rolloff = rolloff;
    }

    fn set_3d_doppler_factor(&mut self, factor: f32) {
        self.properties_mut().doppler_factor = factor;
    }

    fn set_3d_listener_relative(&mut self, relative: bool) {
        self.properties_mut().listener_relative = relative;
    }

    fn set_3d_distance_delay(&mut self, delay: bool) {
        self.properties_mut().distance_delay = delay;
    }

    fn set_3d_collider(&mut self, collider: Option<Arc<dyn AudioCollider>>) {
        self.properties_mut().collider = collider;
    }

    fn set_3d_attenuator(&mut self, attenuator: Option<Arc<dyn AudioAttenuator>>) {
        self.properties_mut().attenuator = attenuator;
    }
}

/// Where a seek starts from and where it should land.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    /// Seconds from the start of the source
    pub target: f64,
    /// Current position in seconds
    pub position: f64,
    /// Native frame rate of the source
    pub sample_rate: f32,
    pub channels: usize,
}

/// Live playback state of one voice.
pub trait SourceInstance: Send {
    /// Write up to `frames` planar frames (channel `c` at `out[c * stride..]`) and return
    /// how many were produced. `out` holds at most `MAX_CHANNELS` planes.
    fn fill(&mut self, out: &mut [f32], frames: usize, stride: usize) -> usize;

    fn has_ended(&self) -> bool;

    fn rewind(&mut self) -> MixResult<()> {
        Err(MixerError::RewindUnsupported)
    }

    /// Move to `request.target` and return the position actually reached.
    fn seek(&mut self, request: SeekRequest, scratch: &mut [f32]) -> MixResult<f64> {
        tape_seek(self, request, scratch)
    }

    /// Source-specific telemetry. Unknown keys read as 0.
    fn info(&self, _key: u32) -> f32 {
        0.0
    }
}

/// Seek by decoding forward, rewinding first when the target lies behind.
pub fn tape_seek<S>(source: &mut S, request: SeekRequest, scratch: &mut [f32]) -> MixResult<f64>
where
    S: SourceInstance + ?Sized,
{
    let mut offset = request.target - request.position;
    if offset <= 0.0 {
        source.rewind().map_err(|_| MixerError::SeekUnsupported)?;
        offset = request.target;
    }

    let chunk = scratch.len() / request.channels.max(1);
    if chunk == 0 {
        return Err(MixerError::SeekUnsupported);
    }
    let mut discard = (request.sample_rate as f64 * offset).floor().max(0.0) as usize;
    while discard > 0 {
        let frames = chunk.min(discard);
        source.fill(scratch, frames, frames);
        discard -= frames;
    }
    Ok(request.target)
}

/// Playback state owned by a voice.
pub enum Instance {
    Stream(Box<dyn SourceInstance>),
    Bus(BusInstance),
    Queue(QueueInstance),
}

impl Instance {
    pub fn stream(instance: impl SourceInstance + 'static) -> Self {
        Instance::Stream(Box::new(instance))
    }

    pub(crate) fn has_ended(&self) -> bool {
        match self {
            Instance::Stream(s) => s.has_ended(),
            Instance::Queue(q) => q.has_ended(),
            Instance::Bus(_) => false,
        }
    }

    pub(crate) fn info(&self, key: u32) -> f32 {
        match self {
            Instance::Stream(s) => s.info(key),
            Instance::Queue(q) => q.info(key),
            Instance::Bus(_) => 0.0,
        }
    }

    /// Forget `handle` on the owning source if it still points at this voice.
    pub(crate) fn detach(&self, handle: Handle) {
        match self {
            Instance::Bus(b) => b.detach(handle),
            Instance::Queue(q) => q.detach(handle),
            Instance::Stream(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts up from 0, one step per frame.
    struct Ramp {
        next: f32,
        rewinds: usize,
    }

    impl SourceInstance for Ramp {
        fn fill(&mut self, out: &mut [f32], frames: usize, _stride: usize) -> usize {
            for sample in &mut out[..frames] {
                *sample = self.next;
                self.next += 1.0;
            }
            frames
        }

        fn has_ended(&self) -> bool {
            false
        }

        fn rewind(&mut self) -> MixResult<()> {
            self.next = 0.0;
            self.rewinds += 1;
            Ok(())
        }
    }

    struct Endless;

    impl SourceInstance for Endless {
        fn fill(&mut self, _out: &mut [f32], frames: usize, _stride: usize) -> usize {
            frames
        }

        fn has_ended(&self) -> bool {
            false
        }
    }

    fn request(target: f64, position: f64) -> SeekRequest {
        SeekRequest {
            target,
            position,
            sample_rate: 100.0,
            channels: 1,
        }
    }

    #[test]
    fn test_tape_seek_forward_discards_frames() {
        let mut ramp = Ramp { next: 0.0, rewinds: 0 };
        let mut scratch = [0.0f32; 16];
        assert_eq!(ramp.seek(request(0.5, 0.0), &mut scratch), Ok(0.5));
        assert_eq!(ramp.next, 50.0);
        assert_eq!(ramp.rewinds, 0);
    }

    #[test]
    fn test_tape_seek_backwards_rewinds() {
        let mut ramp = Ramp { next: 70.0, rewinds: 0 };
        let mut scratch = [0.0f32; 16];
        assert_eq!(ramp.seek(request(0.2, 0.7), &mut scratch), Ok(0.2));
        assert_eq!(ramp.rewinds, 1);
        assert_eq!(ramp.next, 20.0);
    }

    #[test]
    fn test_tape_seek_backwards_without_rewind_fails() {
        let mut scratch = [0.0f32; 16];
        assert_eq!(
            Endless.seek(request(0.1, 0.5), &mut scratch),
            Err(MixerError::SeekUnsupported)
        );
    }

    #[test]
    fn test_source_ids_are_assigned_once() {
        let props = SourceProperties::default();
        let mut next = 7;
        assert_eq!(props.source_id(), 0);
        assert_eq!(props.assign_source_id(&mut next), 7);
        assert_eq!(props.assign_source_id(&mut next), 7);
        assert_eq!(next, 8);
    }
}

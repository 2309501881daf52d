//! Starting voices.

use polymix_core::constants::{
    FILTERS_PER_STREAM, INAUDIBLE_VOLUME_ON_PLAY, MAX_CLOCKED_DELAY_SAMPLES,
};
use polymix_core::{FilterInstance, Handle, MixResult, MixerError, Vec3};

use super::Mixer;
use super::core::MixerCore;
use super::spatial::SpatialFrame;
use super::voice::Voice;
use crate::sources::{AudioSource, Instance};

/// Per-play overrides of the source defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayParams {
    /// Negative means "use the source's volume"
    pub volume: f32,
    pub pan: f32,
    pub paused: bool,
    /// Bus voice to mix into; null for the root
    pub bus: Handle,
}

impl Default for PlayParams {
    fn default() -> Self {
        Self {
            volume: -1.0,
            pan: 0.0,
            paused: false,
            bus: Handle::NULL,
        }
    }
}

impl PlayParams {
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    pub fn start_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn on_bus(mut self, bus: Handle) -> Self {
        self.bus = bus;
        self
    }
}

/// Delay for a clocked play at `sound_time`, anchored on the first clocked play since
/// the last render.
fn clocked_delay(core: &mut MixerCore, sound_time: f64) -> usize {
    let anchor = *core.last_clocked_time.get_or_insert(sound_time);
    let samples = ((sound_time - anchor) * core.device.sample_rate as f64).floor();
    samples.clamp(0.0, MAX_CLOCKED_DELAY_SAMPLES as f64) as usize
}

impl Mixer {
    /// Start a new voice of `source`. Returns null when every slot holds a protected voice.
    pub fn play(&self, source: &dyn AudioSource, params: PlayParams) -> Handle {
        let props = source.properties();
        if props.single_instance {
            self.stop_audio_source(source);
        }

        let instance = source.create_instance();
        let filters: [Option<Box<dyn FilterInstance>>; FILTERS_PER_STREAM] =
            std::array::from_fn(|i| props.filters[i].as_ref().map(|f| f.create_instance()));
        let voice = Box::new(Voice::new(instance, props, filters));

        let handle = self.core.lock().start_voice(voice, props, params);
        if handle.is_null() {
            return handle;
        }
        if let Some(previous) = source.attach(handle) {
            self.stop(previous);
        }
        handle
    }

    /// Play with sample-accurate offsets between calls made before the same render.
    pub fn play_clocked(&self, sound_time: f64, source: &dyn AudioSource, params: PlayParams) -> Handle {
        let handle = self.play(source, params.start_paused(true));
        let mut core = self.core.lock();
        if core.slot_of(handle).is_none() {
            return handle;
        }
        let delay = clocked_delay(&mut core, sound_time);
        core.for_each_voice(handle, |v| {
            v.delay = delay;
            v.set_paused(params.paused);
        });
        core.active_dirty = true;
        handle
    }

    /// Play non-positional audio at full volume on the first two speakers.
    pub fn play_background(&self, source: &dyn AudioSource, params: PlayParams) -> Handle {
        let handle = self.play(source, params);
        self.set_pan_absolute(handle, 1.0, 1.0);
        handle
    }

    pub fn play_3d(
        &self,
        source: &dyn AudioSource,
        position: Vec3,
        velocity: Vec3,
        params: PlayParams,
    ) -> Handle {
        self.start_3d(None, source, position, velocity, params)
    }

    pub fn play_3d_clocked(
        &self,
        sound_time: f64,
        source: &dyn AudioSource,
        position: Vec3,
        velocity: Vec3,
        params: PlayParams,
    ) -> Handle {
        self.start_3d(Some(sound_time), source, position, velocity, params)
    }

    fn start_3d(
        &self,
        sound_time: Option<f64>,
        source: &dyn AudioSource,
        position: Vec3,
        velocity: Vec3,
        params: PlayParams,
    ) -> Handle {
        let handle = self.play(source, params.start_paused(true));
        let mut core = self.core.lock();
        let Some(slot) = core.slot_of(handle) else {
            return handle;
        };

        let mut delay = sound_time.map_or(0, |t| clocked_delay(&mut core, t));
        let frame = SpatialFrame::new(core.listener, &core.speakers, core.device.channels);
        let listener_position = core.listener.position;
        let speed_of_sound = core.listener.speed_of_sound;
        let sample_rate = core.device.sample_rate as f32;

        let kill = {
            let Some(voice) = core.voices[slot].as_deref_mut() else {
                return handle;
            };
            voice.flags.process_3d = true;
            voice.spatial.position = position;
            voice.spatial.velocity = velocity;

            if source.properties().distance_delay {
                let relative = if voice.flags.listener_relative || sound_time.is_some() {
                    position
                } else {
                    position - listener_position
                };
                delay += (relative.length() / speed_of_sound * sample_rate).floor() as usize;
            }

            frame.compute(handle, &mut voice.spatial, voice.flags.listener_relative);
            voice.update_speed();
            voice.channel_volume = voice.spatial.channel_volume;
            voice.update_volume();
            voice.snap_channel_volume();

            voice.flags.inaudible = voice.overall_volume < INAUDIBLE_VOLUME_ON_PLAY;
            voice.delay = delay;
            voice.set_paused(params.paused);
            voice.flags.inaudible && voice.flags.inaudible_kill
        };
        if kill {
            core.stop_voice(slot);
        }
        core.active_dirty = true;
        handle
    }

    /// Stop every voice started from `source`.
    pub fn stop_audio_source(&self, source: &dyn AudioSource) {
        let id = source.properties().source_id();
        if id == 0 {
            return;
        }
        let mut core = self.core.lock();
        for slot in 0..core.max_used {
            if core.voices[slot].as_deref().is_some_and(|v| v.source_id == id) {
                core.stop_voice(slot);
            }
        }
    }

    /// Live voices started from `source`.
    pub fn count_audio_source(&self, source: &dyn AudioSource) -> usize {
        let id = source.properties().source_id();
        if id == 0 {
            return 0;
        }
        let core = self.core.lock();
        core.voices[..core.max_used]
            .iter()
            .flatten()
            .filter(|v| v.source_id == id)
            .count()
    }

    /// Append a stream to the queue playing on `queue`.
    pub fn enqueue(&self, queue: Handle, source: &dyn AudioSource) -> MixResult<()> {
        let instance = match source.create_instance() {
            Instance::Stream(stream) => stream,
            _ => {
                return Err(MixerError::UnsupportedFormat(
                    "only streams can be queued".into(),
                ));
            }
        };

        let mut core = self.core.lock();
        let id = source.properties().assign_source_id(&mut core.next_source_id);
        let slot = core
            .slot_of(queue)
            .ok_or(MixerError::InvalidHandle(queue.raw()))?;
        let Some(Instance::Queue(pending)) = core.voices[slot].as_deref_mut().map(|v| &mut v.instance)
        else {
            return Err(MixerError::InvalidHandle(queue.raw()));
        };
        let retired = pending.take_retired();
        let pushed = pending.push(id, instance).inspect_err(|_| {
            log::warn!("Queue {queue} is full, dropping source {id}");
        });
        drop(core);
        drop(retired);
        pushed
    }

    /// Pending entry count and the source id playing at the front.
    pub(crate) fn queue_snapshot(&self, queue: Handle) -> Option<(usize, Option<u32>)> {
        let mut core = self.core.lock();
        let slot = core.slot_of(queue)?;
        let Some(Instance::Queue(pending)) = core.voices[slot].as_deref_mut().map(|v| &mut v.instance)
        else {
            return None;
        };
        let snapshot = (pending.len(), pending.front_source());
        let retired = pending.take_retired();
        drop(core);
        drop(retired);
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{Clip, Queue, Waveform};
    use polymix_core::{DeviceParams, EngineConfig};

    fn mixer() -> Mixer {
        let mixer = Mixer::new(EngineConfig::default()).expect("valid config");
        mixer
            .postinit(DeviceParams::new(44_100, 512, 2))
            .expect("valid device");
        mixer
    }

    #[test]
    fn test_single_instance_replaces_previous_voice() {
        let mixer = mixer();
        let mut tone = Waveform::sine(440.0);
        tone.set_single_instance(true);
        let first = mixer.play(&tone, PlayParams::default());
        let second = mixer.play(&tone, PlayParams::default());
        assert!(!mixer.is_valid_voice_handle(first));
        assert!(mixer.is_valid_voice_handle(second));
        assert_eq!(mixer.count_audio_source(&tone), 1);
    }

    #[test]
    fn test_clocked_delay_is_clamped() {
        let mixer = mixer();
        let tone = Waveform::sine(440.0);
        let a = mixer.play_clocked(1.0, &tone, PlayParams::default());
        let b = mixer.play_clocked(2.0, &tone, PlayParams::default());
        let c = mixer.play_clocked(0.5, &tone, PlayParams::default());
        assert_eq!(mixer.delay_samples(a), 0);
        assert_eq!(mixer.delay_samples(b), MAX_CLOCKED_DELAY_SAMPLES);
        assert_eq!(mixer.delay_samples(c), 0);
        assert!(!mixer.pause(b));
    }

    #[test]
    fn test_volume_override() {
        let mixer = mixer();
        let mut tone = Waveform::sine(440.0);
        tone.set_volume(0.3);
        let default = mixer.play(&tone, PlayParams::default());
        let explicit = mixer.play(&tone, PlayParams::default().with_volume(0.8));
        assert_eq!(mixer.volume(default), 0.3);
        assert_eq!(mixer.volume(explicit), 0.8);
    }

    #[test]
    fn test_enqueue_requires_a_playing_queue() {
        let mixer = mixer();
        let queue = Queue::new();
        let clip = Clip::from_planar(vec![0.5; 100], 1, 44_100.0).expect("valid layout");
        assert_eq!(
            queue.play(&mixer, &clip),
            Err(MixerError::InvalidHandle(0))
        );

        mixer.play(&queue, PlayParams::default());
        assert_eq!(queue.play(&mixer, &clip), Ok(()));
        assert_eq!(queue.count(&mixer), 1);
        assert!(queue.is_currently_playing(&mixer, &clip));
    }

    #[test]
    fn test_buses_cannot_be_queued() {
        let mixer = mixer();
        let queue = Queue::new();
        mixer.play(&queue, PlayParams::default());
        let bus = crate::sources::Bus::new();
        assert!(matches!(
            queue.play(&mixer, &bus),
            Err(MixerError::UnsupportedFormat(_))
        ));
    }
}

//! Voice and engine control surface.
//!
//! Setters take a voice or a group handle and silently ignore anything that does not
//! resolve. Getters read the voice a handle resolves to (the first live member for a
//! group) and fall back to a neutral value.

use std::sync::Arc;

use polymix_core::constants::{FILTERS_PER_STREAM, MAX_CHANNELS};
use polymix_core::{
    Fader, Filter, FilterParams, Handle, MixResult, MixerError, ResamplerKind, Vec3,
};

use super::Mixer;
use super::core::MixerCore;
use super::voice::Voice;
use crate::sources::{InaudibleBehavior, Instance};

impl MixerCore {
    fn voice_or<T>(&self, handle: Handle, default: T, f: impl FnOnce(&Voice) -> T) -> T {
        self.voice(handle).map_or(default, f)
    }

    /// Parameters of filter `id` on `handle`, or of the global chain for null.
    fn filter_params(&self, handle: Handle, id: usize) -> Option<&FilterParams> {
        let slot = if handle.is_null() {
            self.global_filters.get(id)?
        } else {
            self.voice(handle)?.filters.get(id)?
        };
        slot.as_deref().map(|f| f.params())
    }

    fn for_each_filter(
        &mut self,
        handle: Handle,
        id: usize,
        mut f: impl FnMut(&mut FilterParams, f64),
    ) {
        let now = self.stream_time;
        if handle.is_null() {
            if let Some(Some(filter)) = self.global_filters.get_mut(id) {
                f(filter.params_mut(), now);
            }
            return;
        }
        self.for_each_voice(handle, |v| {
            if let Some(Some(filter)) = v.filters.get_mut(id) {
                f(filter.params_mut(), now);
            }
        });
    }
}

impl Mixer {
    fn with_voices(&self, handle: Handle, f: impl FnMut(&mut Voice)) {
        self.core.lock().for_each_voice(handle, f);
    }

    fn read_voice<T>(&self, handle: Handle, default: T, f: impl FnOnce(&Voice) -> T) -> T {
        self.core.lock().voice_or(handle, default, f)
    }

    // Setters

    pub fn set_volume(&self, handle: Handle, volume: f32) {
        let mut core = self.core.lock();
        core.for_each_voice(handle, |v| {
            v.volume_fader.clear();
            v.set_volume(volume);
        });
        core.active_dirty = true;
    }

    pub fn set_pan(&self, handle: Handle, pan: f32) {
        self.with_voices(handle, |v| {
            v.pan_fader.clear();
            v.set_pan(pan);
        });
    }

    /// Write the first two channel gains directly, cancelling any pan fade.
    pub fn set_pan_absolute(&self, handle: Handle, left: f32, right: f32) {
        self.with_voices(handle, |v| v.set_pan_absolute(left, right));
    }

    pub fn set_channel_volume(&self, handle: Handle, channel: usize, volume: f32) {
        if channel >= MAX_CHANNELS {
            return;
        }
        self.with_voices(handle, |v| v.channel_volume[channel] = volume);
    }

    /// Playback speed relative to the source's rate. Non-positive speeds are ignored.
    pub fn set_relative_play_speed(&self, handle: Handle, speed: f32) {
        if speed <= 0.0 {
            return;
        }
        self.with_voices(handle, |v| {
            v.speed_fader.clear();
            v.set_speed(speed);
        });
    }

    /// Override the native rate the voice's source is read at.
    pub fn set_sample_rate(&self, handle: Handle, sample_rate: f32) {
        if sample_rate <= 0.0 {
            return;
        }
        self.with_voices(handle, |v| {
            v.base_sample_rate = sample_rate;
            v.update_speed();
        });
    }

    pub fn set_pause(&self, handle: Handle, paused: bool) {
        let mut core = self.core.lock();
        core.for_each_voice(handle, |v| v.set_paused(paused));
        core.active_dirty = true;
    }

    pub fn set_pause_all(&self, paused: bool) {
        let mut core = self.core.lock();
        let max_used = core.max_used;
        for voice in core.voices[..max_used].iter_mut().flatten() {
            voice.set_paused(paused);
        }
        core.active_dirty = true;
    }

    /// Protected voices are never evicted to make room for new plays.
    pub fn set_protect_voice(&self, handle: Handle, protect: bool) {
        self.with_voices(handle, |v| v.flags.protected = protect);
    }

    pub fn set_looping(&self, handle: Handle, looping: bool) {
        self.with_voices(handle, |v| v.flags.looping = looping);
    }

    pub fn set_auto_stop(&self, handle: Handle, auto_stop: bool) {
        self.with_voices(handle, |v| v.flags.disable_autostop = !auto_stop);
    }

    pub fn set_loop_point(&self, handle: Handle, seconds: f64) {
        self.with_voices(handle, |v| v.loop_point = seconds);
    }

    pub fn set_inaudible_behavior(&self, handle: Handle, behavior: InaudibleBehavior) {
        let mut core = self.core.lock();
        core.for_each_voice(handle, |v| v.flags.set_inaudible_behavior(behavior));
        core.active_dirty = true;
    }

    /// Frames of silence the voice emits before its source starts.
    pub fn set_delay_samples(&self, handle: Handle, samples: usize) {
        self.with_voices(handle, |v| v.delay = samples);
    }

    /// Move a live voice under `bus`. A voice cannot be routed into itself.
    pub fn set_voice_bus(&self, handle: Handle, bus: Handle) {
        let mut core = self.core.lock();
        core.for_each_voice(handle, |v| {
            if v.handle != bus {
                v.bus = bus;
            }
        });
        core.active_dirty = true;
    }

    // Faders

    pub fn fade_volume(&self, handle: Handle, to: f32, seconds: f64) {
        if seconds <= 0.0 {
            self.set_volume(handle, to);
            return;
        }
        self.with_voices(handle, |v| {
            v.volume_fader = Fader::ramp(v.set_volume, to, seconds, v.stream_time);
        });
    }

    pub fn fade_pan(&self, handle: Handle, to: f32, seconds: f64) {
        if seconds <= 0.0 {
            self.set_pan(handle, to);
            return;
        }
        self.with_voices(handle, |v| {
            v.pan_fader = Fader::ramp(v.pan, to, seconds, v.stream_time);
        });
    }

    pub fn fade_relative_play_speed(&self, handle: Handle, to: f32, seconds: f64) {
        if seconds <= 0.0 {
            self.set_relative_play_speed(handle, to);
            return;
        }
        self.with_voices(handle, |v| {
            v.speed_fader = Fader::ramp(v.set_speed, to, seconds, v.stream_time);
        });
    }

    pub fn fade_global_volume(&self, to: f32, seconds: f64) {
        if seconds <= 0.0 {
            self.set_global_volume(to);
            return;
        }
        let mut core = self.core.lock();
        core.global_volume_fader = Fader::ramp(core.global_volume, to, seconds, core.stream_time);
    }

    pub fn oscillate_volume(&self, handle: Handle, from: f32, to: f32, period: f64) {
        if period <= 0.0 || from == to {
            self.set_volume(handle, to);
            return;
        }
        self.with_voices(handle, |v| {
            v.volume_fader = Fader::lfo(from, to, period, v.stream_time);
        });
    }

    pub fn oscillate_pan(&self, handle: Handle, from: f32, to: f32, period: f64) {
        if period <= 0.0 || from == to {
            self.set_pan(handle, to);
            return;
        }
        self.with_voices(handle, |v| {
            v.pan_fader = Fader::lfo(from, to, period, v.stream_time);
        });
    }

    pub fn oscillate_relative_play_speed(&self, handle: Handle, from: f32, to: f32, period: f64) {
        if period <= 0.0 || from == to {
            self.set_relative_play_speed(handle, to);
            return;
        }
        self.with_voices(handle, |v| {
            v.speed_fader = Fader::lfo(from, to, period, v.stream_time);
        });
    }

    pub fn oscillate_global_volume(&self, from: f32, to: f32, period: f64) {
        if period <= 0.0 || from == to {
            self.set_global_volume(to);
            return;
        }
        let mut core = self.core.lock();
        core.global_volume_fader = Fader::lfo(from, to, period, core.stream_time);
    }

    /// Pause the voice once `seconds` of its own stream time have elapsed.
    pub fn schedule_pause(&self, handle: Handle, seconds: f64) {
        if seconds <= 0.0 {
            self.set_pause(handle, true);
            return;
        }
        self.with_voices(handle, |v| {
            v.pause_scheduler = Fader::ramp(1.0, 0.0, seconds, v.stream_time);
        });
    }

    /// Stop the voice once `seconds` of its own stream time have elapsed.
    pub fn schedule_stop(&self, handle: Handle, seconds: f64) {
        if seconds <= 0.0 {
            self.stop(handle);
            return;
        }
        self.with_voices(handle, |v| {
            v.stop_scheduler = Fader::ramp(1.0, 0.0, seconds, v.stream_time);
        });
    }

    // Filters

    /// Install (or clear) filter `id` of the global chain.
    pub fn set_global_filter(&self, id: usize, filter: Option<Arc<dyn Filter>>) {
        if id >= FILTERS_PER_STREAM {
            return;
        }
        let instance = filter.map(|f| f.create_instance());
        let previous = std::mem::replace(&mut self.core.lock().global_filters[id], instance);
        drop(previous);
    }

    /// Replace filter `id` on a live voice, bus voices included.
    pub fn set_voice_filter(&self, handle: Handle, id: usize, filter: Option<Arc<dyn Filter>>) {
        if id >= FILTERS_PER_STREAM {
            return;
        }
        self.with_voices(handle, |v| {
            v.filters[id] = filter.as_ref().map(|f| f.create_instance());
        });
    }

    /// Current value of a filter parameter. A null handle addresses the global chain.
    pub fn filter_parameter(&self, handle: Handle, id: usize, param: usize) -> f32 {
        let core = self.core.lock();
        core.filter_params(handle, id)
            .and_then(|p| p.get(param))
            .unwrap_or(0.0)
    }

    pub fn set_filter_parameter(&self, handle: Handle, id: usize, param: usize, value: f32) {
        self.core
            .lock()
            .for_each_filter(handle, id, |p, _| p.set(param, value));
    }

    pub fn fade_filter_parameter(&self, handle: Handle, id: usize, param: usize, to: f32, seconds: f64) {
        if seconds <= 0.0 {
            self.set_filter_parameter(handle, id, param, to);
            return;
        }
        self.core
            .lock()
            .for_each_filter(handle, id, |p, now| p.fade(param, to, seconds, now));
    }

    pub fn oscillate_filter_parameter(
        &self,
        handle: Handle,
        id: usize,
        param: usize,
        from: f32,
        to: f32,
        period: f64,
    ) {
        if period <= 0.0 || from == to {
            self.set_filter_parameter(handle, id, param, to);
            return;
        }
        self.core
            .lock()
            .for_each_filter(handle, id, |p, now| p.oscillate(param, from, to, period, now));
    }

    // Lifecycle

    /// Move the voice to `seconds` into its source.
    ///
    /// On failure the voice keeps playing from where it was.
    pub fn seek(&self, handle: Handle, seconds: f64) -> MixResult<()> {
        let mut core = self.core.lock();
        let mut result = Err(MixerError::InvalidHandle(handle.raw()));
        core.for_each_slot(handle, |core, slot| {
            let MixerCore {
                voices,
                seek_scratch,
                ..
            } = core;
            if let Some(voice) = voices[slot].as_deref_mut() {
                let outcome = voice.seek(seconds, seek_scratch);
                if result.is_err() || outcome.is_err() {
                    result = outcome;
                }
            }
        });
        result
    }

    pub fn stop(&self, handle: Handle) {
        self.core
            .lock()
            .for_each_slot(handle, |core, slot| core.stop_voice(slot));
    }

    pub fn stop_all(&self) {
        self.core.lock().stop_all();
    }

    // Getters

    /// Volume set on the voice, before 3-D attenuation.
    pub fn volume(&self, handle: Handle) -> f32 {
        self.read_voice(handle, 0.0, |v| v.set_volume)
    }

    /// Volume after 3-D attenuation.
    pub fn overall_volume(&self, handle: Handle) -> f32 {
        self.read_voice(handle, 0.0, |v| v.overall_volume)
    }

    pub fn pan(&self, handle: Handle) -> f32 {
        self.read_voice(handle, 0.0, |v| v.pan)
    }

    /// Seconds the voice has been playing, unaffected by speed.
    pub fn voice_stream_time(&self, handle: Handle) -> f64 {
        self.read_voice(handle, 0.0, |v| v.stream_time)
    }

    /// Position in the source in seconds.
    pub fn stream_position(&self, handle: Handle) -> f64 {
        self.read_voice(handle, 0.0, |v| v.stream_position)
    }

    pub fn relative_play_speed(&self, handle: Handle) -> f32 {
        self.read_voice(handle, 1.0, |v| v.set_speed)
    }

    /// Relative speed times the Doppler factor.
    pub fn effective_play_speed(&self, handle: Handle) -> f32 {
        self.read_voice(handle, 1.0, |v| v.overall_speed)
    }

    pub fn sample_rate(&self, handle: Handle) -> f32 {
        self.read_voice(handle, 0.0, |v| v.base_sample_rate)
    }

    pub fn pause(&self, handle: Handle) -> bool {
        self.read_voice(handle, false, |v| v.flags.paused)
    }

    pub fn protect_voice(&self, handle: Handle) -> bool {
        self.read_voice(handle, false, |v| v.flags.protected)
    }

    pub fn looping(&self, handle: Handle) -> bool {
        self.read_voice(handle, false, |v| v.flags.looping)
    }

    pub fn auto_stop(&self, handle: Handle) -> bool {
        self.read_voice(handle, false, |v| !v.flags.disable_autostop)
    }

    pub fn loop_point(&self, handle: Handle) -> f64 {
        self.read_voice(handle, 0.0, |v| v.loop_point)
    }

    pub fn loop_count(&self, handle: Handle) -> u32 {
        self.read_voice(handle, 0, |v| v.loop_count)
    }

    pub fn delay_samples(&self, handle: Handle) -> usize {
        self.read_voice(handle, 0, |v| v.delay)
    }

    /// Source-defined telemetry value.
    pub fn info(&self, handle: Handle, key: u32) -> f32 {
        self.read_voice(handle, 0.0, |v| v.instance.info(key))
    }

    /// Live voices, playing or not.
    pub fn voice_count(&self) -> usize {
        let core = self.core.lock();
        core.voices[..core.max_used].iter().flatten().count()
    }

    /// Voices selected for mixing.
    pub fn active_voice_count(&self) -> usize {
        let mut core = self.core.lock();
        if core.active_dirty {
            core.calc_active_voices();
        }
        core.active_count
    }

    /// Voices routed into `bus`.
    pub fn count_bus_voices(&self, bus: Handle) -> usize {
        self.core.lock().count_bus_voices(bus)
    }

    /// Whether `handle` names a live voice. Group handles are not voices.
    pub fn is_valid_voice_handle(&self, handle: Handle) -> bool {
        !handle.is_group() && self.core.lock().slot_of(handle).is_some()
    }

    /// Visualization snapshot of a playing bus.
    pub(crate) fn bus_visualization(&self, bus: Handle) -> Option<([f32; 256], [f32; MAX_CHANNELS])> {
        let core = self.core.lock();
        match &core.voice(bus)?.instance {
            Instance::Bus(instance) => Some((instance.wave, instance.peaks)),
            _ => None,
        }
    }

    // Engine-wide

    /// Seconds rendered since the engine started.
    pub fn stream_time(&self) -> f64 {
        self.core.lock().stream_time
    }

    pub fn global_volume(&self) -> f32 {
        self.core.lock().global_volume
    }

    pub fn set_global_volume(&self, volume: f32) {
        let mut core = self.core.lock();
        core.global_volume_fader.clear();
        core.global_volume = volume;
    }

    pub fn post_clip_scaler(&self) -> f32 {
        self.core.lock().config.post_clip_scaler
    }

    pub fn set_post_clip_scaler(&self, scaler: f32) {
        self.core.lock().config.post_clip_scaler = scaler;
    }

    pub fn set_visualization_enable(&self, enable: bool) {
        self.core.lock().config.enable_visualization = enable;
    }

    pub fn main_resampler(&self) -> ResamplerKind {
        self.core.lock().config.resampler
    }

    pub fn set_main_resampler(&self, resampler: ResamplerKind) {
        self.core.lock().config.resampler = resampler;
    }

    pub fn max_active_voice_count(&self) -> usize {
        self.core.lock().max_active
    }

    /// Resize the active-voice table, reallocating the resample buffers.
    pub fn set_max_active_voice_count(&self, count: usize) -> MixResult<()> {
        self.core.lock().set_max_active_voice_count(count)
    }

    /// Direction of speaker `channel` used by the 3-D pass.
    pub fn speaker_position(&self, channel: usize) -> Option<Vec3> {
        let core = self.core.lock();
        (channel < core.device.channels).then(|| core.speakers[channel])
    }

    pub fn set_speaker_position(&self, channel: usize, position: Vec3) {
        let mut core = self.core.lock();
        if channel < core.device.channels {
            core.speakers[channel] = position;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PlayParams;
    use crate::sources::{AudioSource, Clip, Waveform};
    use polymix_core::filters::{BiquadFilter, EchoFilter};
    use polymix_core::{DeviceParams, EngineConfig};

    fn mixer() -> Mixer {
        let mixer = Mixer::new(EngineConfig::default()).expect("valid config");
        mixer
            .postinit(DeviceParams::new(44_100, 512, 2))
            .expect("valid device");
        mixer
    }

    fn render(mixer: &Mixer, frames: usize) {
        let mut out = vec![0.0f32; frames * 2];
        mixer.render_f32(&mut out);
    }

    #[test]
    fn test_setters_round_trip() {
        let mixer = mixer();
        let h = mixer.play(&Waveform::sine(440.0), PlayParams::default());
        mixer.set_volume(h, 0.25);
        mixer.set_pan(h, -0.5);
        mixer.set_relative_play_speed(h, 2.0);
        mixer.set_looping(h, true);
        mixer.set_auto_stop(h, false);
        mixer.set_protect_voice(h, true);
        mixer.set_loop_point(h, 0.75);
        assert_eq!(mixer.volume(h), 0.25);
        assert_eq!(mixer.pan(h), -0.5);
        assert_eq!(mixer.relative_play_speed(h), 2.0);
        assert!(mixer.looping(h));
        assert!(!mixer.auto_stop(h));
        assert!(mixer.protect_voice(h));
        assert_eq!(mixer.loop_point(h), 0.75);
    }

    #[test]
    fn test_invalid_handles_read_neutral_defaults() {
        let mixer = mixer();
        let bogus = Handle::for_voice(5, 3);
        mixer.set_volume(bogus, 0.5);
        assert_eq!(mixer.volume(bogus), 0.0);
        assert_eq!(mixer.relative_play_speed(bogus), 1.0);
        assert_eq!(mixer.effective_play_speed(bogus), 1.0);
        assert!(!mixer.pause(bogus));
        assert_eq!(mixer.info(bogus, 7), 0.0);
        assert_eq!(mixer.seek(bogus, 1.0), Err(MixerError::InvalidHandle(bogus.raw())));
    }

    #[test]
    fn test_non_positive_speed_is_ignored() {
        let mixer = mixer();
        let h = mixer.play(&Waveform::sine(440.0), PlayParams::default());
        mixer.set_relative_play_speed(h, 0.0);
        mixer.set_relative_play_speed(h, -1.0);
        assert_eq!(mixer.relative_play_speed(h), 1.0);
    }

    #[test]
    fn test_volume_fade_reaches_target() {
        let mixer = mixer();
        let h = mixer.play(&Waveform::sine(440.0), PlayParams::default().with_volume(1.0));
        mixer.fade_volume(h, 0.0, 0.05);
        render(&mixer, 4096);
        assert_eq!(mixer.volume(h), 0.0);
    }

    #[test]
    fn test_zero_time_fade_applies_immediately() {
        let mixer = mixer();
        let h = mixer.play(&Waveform::sine(440.0), PlayParams::default());
        mixer.fade_pan(h, 1.0, 0.0);
        assert_eq!(mixer.pan(h), 1.0);
        mixer.fade_global_volume(0.5, 0.0);
        assert_eq!(mixer.global_volume(), 0.5);
    }

    #[test]
    fn test_scheduled_stop_fires_on_buffer_boundary() {
        let mixer = mixer();
        let h = mixer.play(&Waveform::sine(440.0), PlayParams::default());
        mixer.schedule_stop(h, 0.02);
        render(&mixer, 512);
        assert!(mixer.is_valid_voice_handle(h));
        render(&mixer, 512);
        assert!(!mixer.is_valid_voice_handle(h));
    }

    #[test]
    fn test_scheduled_pause() {
        let mixer = mixer();
        let h = mixer.play(&Waveform::sine(440.0), PlayParams::default());
        mixer.schedule_pause(h, 0.01);
        render(&mixer, 1024);
        assert!(mixer.pause(h));
        assert!(mixer.is_valid_voice_handle(h));
    }

    #[test]
    fn test_seek_moves_clip_position() {
        let mixer = mixer();
        let clip = Clip::from_planar(vec![0.1; 44_100], 1, 44_100.0).expect("valid layout");
        let h = mixer.play(&clip, PlayParams::default());
        assert_eq!(mixer.seek(h, 0.5), Ok(()));
        assert_eq!(mixer.stream_position(h), 0.5);
    }

    #[test]
    fn test_filter_parameters_on_voice_and_global_chain() {
        let mixer = mixer();
        let mut tone = Waveform::sine(440.0);
        tone.set_filter(0, Some(Arc::new(BiquadFilter::default())));
        let h = mixer.play(&tone, PlayParams::default());

        mixer.set_filter_parameter(h, 0, 0, 0.5);
        assert_eq!(mixer.filter_parameter(h, 0, 0), 0.5);
        assert_eq!(mixer.filter_parameter(h, 1, 0), 0.0);

        mixer.set_global_filter(2, Some(Arc::new(EchoFilter::default())));
        mixer.set_filter_parameter(Handle::NULL, 2, 0, 0.25);
        assert_eq!(mixer.filter_parameter(Handle::NULL, 2, 0), 0.25);

        mixer.set_global_filter(FILTERS_PER_STREAM, Some(Arc::new(EchoFilter::default())));
        mixer.set_global_filter(2, None);
        assert_eq!(mixer.filter_parameter(Handle::NULL, 2, 0), 0.0);
    }

    #[test]
    fn test_filter_fade_follows_engine_clock() {
        let mixer = mixer();
        mixer.set_global_filter(0, Some(Arc::new(EchoFilter::default())));
        mixer.fade_filter_parameter(Handle::NULL, 0, 0, 0.0, 0.01);
        render(&mixer, 1024);
        assert_eq!(mixer.filter_parameter(Handle::NULL, 0, 0), 0.0);
    }

    #[test]
    fn test_stop_all_then_render_leaves_nothing_active() {
        let mixer = mixer();
        for _ in 0..4 {
            mixer.play(&Waveform::sine(440.0), PlayParams::default());
        }
        assert_eq!(mixer.active_voice_count(), 4);
        mixer.stop_all();
        render(&mixer, 512);
        assert_eq!(mixer.active_voice_count(), 0);
        assert_eq!(mixer.voice_count(), 0);
    }

    #[test]
    fn test_speaker_positions_follow_layout() {
        let mixer = mixer();
        assert!(mixer.speaker_position(1).is_some());
        assert_eq!(mixer.speaker_position(2), None);
        let up = Vec3::new(0.0, 1.0, 0.0);
        mixer.set_speaker_position(0, up);
        assert_eq!(mixer.speaker_position(0), Some(up));
    }
}

//! Voice pool state guarded by the engine mutex.
//!
//! Everything the render thread and the control surface share lives in [`MixerCore`]:
//! voice slots, the active-voice table, resample bindings, voice groups, the listener
//! and the global filter chain. The façade in `engine::Mixer` owns it behind a
//! `parking_lot::Mutex` and never hands out references that outlive the lock.

use polymix_core::constants::{
    FILTERS_PER_STREAM, MAX_CHANNELS, PLAY_INDEX_MASK, SAMPLE_GRANULARITY, VOICE_COUNT,
};
use polymix_core::{
    DeviceParams, EngineConfig, Fader, FaderStep, FilterContext, FilterInstance, Handle, Vec3,
};

use super::PlayParams;
use super::spatial::Listener;
use super::voice::{ResampleBuffers, Voice};
use crate::sources::{Instance, SourceProperties};

pub(crate) struct MixerCore {
    pub voices: Vec<Option<Box<Voice>>>,
    /// One past the highest slot that may hold a voice
    pub max_used: usize,
    pub play_index: u32,
    pub next_source_id: u32,

    /// Slots selected for mixing, tick voices first
    pub active: Vec<usize>,
    pub active_count: usize,
    pub active_dirty: bool,
    pub max_active: usize,

    /// Owner slot of every resample buffer pair
    pub bindings: Vec<Option<usize>>,
    pub pool: Vec<ResampleBuffers>,
    pub seek_scratch: Vec<f32>,

    pub groups: Vec<Option<Vec<Handle>>>,
    pub listener: Listener,
    pub speakers: [Vec3; MAX_CHANNELS],

    pub global_filters: [Option<Box<dyn FilterInstance>>; FILTERS_PER_STREAM],
    pub global_volume: f32,
    pub global_volume_fader: Fader,

    pub stream_time: f64,
    /// Anchor shared by clocked plays issued between two render calls
    pub last_clocked_time: Option<f64>,
    pub config: EngineConfig,
    pub device: DeviceParams,
}

impl MixerCore {
    pub fn new(config: EngineConfig) -> Self {
        let max_active = config.max_active_voices.clamp(1, VOICE_COUNT);
        let device = config.requested_device();
        Self {
            voices: (0..VOICE_COUNT).map(|_| None).collect(),
            max_used: 0,
            play_index: 0,
            next_source_id: 1,
            active: vec![0; VOICE_COUNT],
            active_count: 0,
            active_dirty: false,
            max_active,
            bindings: vec![None; max_active],
            pool: (0..max_active).map(|_| ResampleBuffers::new()).collect(),
            seek_scratch: vec![0.0; SAMPLE_GRANULARITY * MAX_CHANNELS],
            groups: Vec::new(),
            listener: Listener::new(config.speed_of_sound),
            speakers: [Vec3::ZERO; MAX_CHANNELS],
            global_filters: std::array::from_fn(|_| None),
            global_volume: 1.0,
            global_volume_fader: Fader::Inactive,
            stream_time: 0.0,
            last_clocked_time: None,
            config,
            device,
        }
    }

    /// Slot a handle refers to. Groups resolve to their first live member.
    pub fn slot_of(&self, handle: Handle) -> Option<usize> {
        if let Some(group) = handle.group_index() {
            let members = self.groups.get(group)?.as_ref()?;
            return members.iter().find_map(|&member| self.slot_of(member));
        }
        let slot = handle.slot()?;
        let voice = self.voices.get(slot)?.as_deref()?;
        (voice.play_index & PLAY_INDEX_MASK == handle.play_index()).then_some(slot)
    }

    pub fn voice(&self, handle: Handle) -> Option<&Voice> {
        let slot = self.slot_of(handle)?;
        self.voices[slot].as_deref()
    }

    /// Run `f` for the voice behind `handle`, or for every member of a group.
    pub fn for_each_slot(&mut self, handle: Handle, mut f: impl FnMut(&mut Self, usize)) {
        if let Some(group) = handle.group_index() {
            let Some(Some(members)) = self.groups.get(group) else {
                return;
            };
            for member in members.clone() {
                if let Some(slot) = self.slot_of(member) {
                    f(self, slot);
                }
            }
        } else if let Some(slot) = self.slot_of(handle) {
            f(self, slot);
        }
    }

    pub fn for_each_voice(&mut self, handle: Handle, mut f: impl FnMut(&mut Voice)) {
        self.for_each_slot(handle, |core, slot| {
            if let Some(voice) = core.voices[slot].as_deref_mut() {
                f(voice);
            }
        });
    }

    /// First empty slot, or the oldest unprotected voice which gets stopped to make room.
    pub fn find_free_voice(&mut self) -> Option<usize> {
        if self.max_used > 0 && self.voices[self.max_used - 1].is_none() {
            self.max_used -= 1;
        }

        if let Some(slot) = self.voices.iter().position(Option::is_none) {
            self.max_used = self.max_used.max(slot + 1);
            return Some(slot);
        }

        let (victim, play_index) = self.voices[..self.max_used]
            .iter()
            .enumerate()
            .filter_map(|(slot, voice)| {
                let voice = voice.as_deref()?;
                (!voice.flags.protected).then_some((slot, voice.play_index))
            })
            .min_by_key(|&(_, play_index)| play_index)?;
        log::debug!("Evicting voice in slot {victim} (play index {play_index})");
        self.stop_voice(victim);
        Some(victim)
    }

    /// Place a freshly built voice in the pool. Returns null if every slot is protected.
    pub fn start_voice(
        &mut self,
        mut voice: Box<Voice>,
        props: &SourceProperties,
        params: PlayParams,
    ) -> Handle {
        let Some(slot) = self.find_free_voice() else {
            log::warn!("Every voice slot is protected, dropping play request");
            return Handle::NULL;
        };

        voice.source_id = props.assign_source_id(&mut self.next_source_id);
        voice.bus = params.bus;
        voice.play_index = self.play_index;
        voice.handle = Handle::for_voice(slot, self.play_index);
        self.play_index = (self.play_index + 1) & PLAY_INDEX_MASK;

        if matches!(voice.instance, Instance::Bus(_)) {
            voice.base_sample_rate = self.device.sample_rate as f32;
        }
        voice.flags.paused = params.paused;
        voice.set_pan(params.pan);
        voice.set_volume(if params.volume < 0.0 {
            props.volume
        } else {
            params.volume
        });
        voice.set_speed(1.0);
        voice.snap_channel_volume();

        let handle = voice.handle;
        self.voices[slot] = Some(voice);
        self.active_dirty = true;
        handle
    }

    pub fn stop_voice(&mut self, slot: usize) {
        if let Some(voice) = self.voices.get_mut(slot).and_then(Option::take) {
            self.release_voice(slot, voice);
        }
    }

    /// Tear down a voice already taken out of `slot`. Stopping a bus stops its children.
    pub fn release_voice(&mut self, slot: usize, voice: Box<Voice>) {
        self.active_dirty = true;
        if let Some(binding) = voice.binding {
            if self.bindings.get(binding) == Some(&Some(slot)) {
                self.bindings[binding] = None;
            }
        }
        voice.instance.detach(voice.handle);

        if matches!(voice.instance, Instance::Bus(_)) {
            for child in 0..self.max_used {
                let routed = self.voices[child]
                    .as_deref()
                    .is_some_and(|v| v.bus == voice.handle);
                if routed {
                    self.stop_voice(child);
                }
            }
        }
    }

    pub fn stop_all(&mut self) {
        for slot in 0..self.max_used {
            self.stop_voice(slot);
        }
    }

    /// Advance per-voice clocks and evaluate every voice fader for a buffer of `dt` seconds.
    pub fn tick_faders(&mut self, dt: f64) {
        let global_fading = self.global_volume_fader.is_active();
        for slot in 0..self.max_used {
            let Some(voice) = self.voices[slot].as_deref_mut() else {
                continue;
            };
            if voice.flags.paused {
                continue;
            }

            voice.active_fader = global_fading;
            voice.stream_time += dt;
            voice.stream_position += dt * voice.overall_speed as f64;
            let now = voice.stream_time;

            if let Some(speed) = voice.speed_fader.step(now).value() {
                if speed > 0.0 {
                    voice.set_speed(speed);
                }
                voice.active_fader = true;
            }
            if let Some(volume) = voice.volume_fader.step(now).value() {
                voice.set_volume(volume);
                voice.active_fader = true;
                self.active_dirty = true;
            }
            if let Some(pan) = voice.pan_fader.step(now).value() {
                voice.set_pan(pan);
                voice.active_fader = true;
            }
            if let FaderStep::Finished(_) = voice.pause_scheduler.step(now) {
                voice.flags.paused = true;
                self.active_dirty = true;
            }
            if let FaderStep::Finished(_) = voice.stop_scheduler.step(now) {
                self.stop_voice(slot);
            }
        }
    }

    /// Voices currently routed into `bus`.
    pub fn count_bus_voices(&self, bus: Handle) -> usize {
        self.voices[..self.max_used]
            .iter()
            .flatten()
            .filter(|v| v.bus == bus)
            .count()
    }
}

impl FilterContext for MixerCore {
    fn bus_level(&self, bus: Handle) -> Option<f32> {
        match &self.voice(bus)?.instance {
            Instance::Bus(instance) => Some(instance.level()),
            _ => None,
        }
    }
}

impl Default for MixerCore {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

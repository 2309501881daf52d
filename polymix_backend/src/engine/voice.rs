//! Per-slot voice state.

use std::f32::consts::{FRAC_1_SQRT_2, PI};
use std::sync::Arc;

use polymix_core::constants::{FILTERS_PER_STREAM, MAX_CHANNELS, SAMPLE_GRANULARITY};
use polymix_core::{Fader, FilterInstance, Handle, MixResult, MixerError, Vec3};

use crate::sources::{
    AttenuationModel, AudioAttenuator, AudioCollider, InaudibleBehavior, Instance, SeekRequest,
    SourceInstance, SourceProperties,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct VoiceFlags {
    pub looping: bool,
    /// Never evicted to make room for a new voice
    pub protected: bool,
    pub paused: bool,
    pub process_3d: bool,
    pub listener_relative: bool,
    pub inaudible: bool,
    pub inaudible_kill: bool,
    pub inaudible_tick: bool,
    pub disable_autostop: bool,
}

impl VoiceFlags {
    pub fn set_inaudible_behavior(&mut self, behavior: InaudibleBehavior) {
        self.inaudible_kill = behavior == InaudibleBehavior::Kill;
        self.inaudible_tick = behavior == InaudibleBehavior::KeepTicking;
    }
}

/// Ping-pong pair of planar source blocks, `SAMPLE_GRANULARITY` frames per channel.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResampleBuffers {
    pub current: Vec<f32>,
    pub previous: Vec<f32>,
}

impl ResampleBuffers {
    pub fn new() -> Self {
        Self {
            current: vec![0.0; SAMPLE_GRANULARITY * MAX_CHANNELS],
            previous: vec![0.0; SAMPLE_GRANULARITY * MAX_CHANNELS],
        }
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.previous);
    }

    pub fn clear(&mut self) {
        self.current.fill(0.0);
        self.previous.fill(0.0);
    }
}

/// Positional parameters and the latest results of the 3-D pass.
#[derive(Clone)]
pub(crate) struct Spatial {
    pub position: Vec3,
    pub velocity: Vec3,
    pub min_distance: f32,
    pub max_distance: f32,
    pub rolloff: f32,
    pub attenuation: AttenuationModel,
    pub doppler_factor: f32,
    pub collider: Option<Arc<dyn AudioCollider>>,
    pub attenuator: Option<Arc<dyn AudioAttenuator>>,
    /// Distance attenuation times collider gain
    pub volume: f32,
    /// Playback-rate factor from relative motion
    pub doppler: f32,
    pub channel_volume: [f32; MAX_CHANNELS],
}

impl Spatial {
    pub fn from_source(props: &SourceProperties) -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            min_distance: props.min_distance,
            max_distance: props.max_distance,
            rolloff: props.rolloff,
            attenuation: props.attenuation,
            doppler_factor: props.doppler_factor,
            collider: props.collider.clone(),
            attenuator: props.attenuator.clone(),
            volume: 1.0,
            doppler: 1.0,
            channel_volume: [1.0; MAX_CHANNELS],
        }
    }
}

pub(crate) struct Voice {
    pub instance: Instance,
    pub filters: [Option<Box<dyn FilterInstance>>; FILTERS_PER_STREAM],
    pub play_index: u32,
    pub source_id: u32,
    /// Bus this voice mixes into; null for the root
    pub bus: Handle,
    pub handle: Handle,
    pub flags: VoiceFlags,
    pub channels: usize,

    pub base_sample_rate: f32,
    pub sample_rate: f32,
    pub set_speed: f32,
    pub overall_speed: f32,
    pub set_volume: f32,
    pub overall_volume: f32,
    pub pan: f32,
    pub channel_volume: [f32; MAX_CHANNELS],
    pub current_channel_volume: [f32; MAX_CHANNELS],

    pub stream_time: f64,
    pub stream_position: f64,
    /// 44.20 fixed-point read position inside the current block
    pub src_offset: u64,
    pub leftover: usize,
    pub delay: usize,
    pub loop_point: f64,
    pub loop_count: u32,

    pub volume_fader: Fader,
    pub pan_fader: Fader,
    pub speed_fader: Fader,
    pub pause_scheduler: Fader,
    pub stop_scheduler: Fader,
    pub active_fader: bool,

    /// Index of the resample buffer pair lent to this voice while it is active
    pub binding: Option<usize>,
    pub selected: bool,
    pub spatial: Spatial,
}

impl Voice {
    pub fn new(
        instance: Instance,
        props: &SourceProperties,
        filters: [Option<Box<dyn FilterInstance>>; FILTERS_PER_STREAM],
    ) -> Self {
        let mut flags = VoiceFlags {
            looping: props.looping,
            process_3d: props.process_3d,
            listener_relative: props.listener_relative,
            disable_autostop: props.disable_autostop,
            ..VoiceFlags::default()
        };
        flags.set_inaudible_behavior(props.inaudible_behavior);
        match instance {
            Instance::Bus(_) => {
                flags.protected = true;
                flags.inaudible_tick = true;
            }
            Instance::Queue(_) => flags.protected = true,
            Instance::Stream(_) => {}
        }

        Self {
            instance,
            filters,
            play_index: 0,
            source_id: 0,
            bus: Handle::NULL,
            handle: Handle::NULL,
            flags,
            channels: props.channels.clamp(1, MAX_CHANNELS),
            base_sample_rate: props.base_sample_rate,
            sample_rate: props.base_sample_rate,
            set_speed: 1.0,
            overall_speed: 1.0,
            set_volume: 1.0,
            overall_volume: 1.0,
            pan: 0.0,
            channel_volume: [1.0; MAX_CHANNELS],
            current_channel_volume: [0.0; MAX_CHANNELS],
            stream_time: 0.0,
            stream_position: 0.0,
            src_offset: 0,
            leftover: 0,
            delay: 0,
            loop_point: props.loop_point,
            loop_count: 0,
            volume_fader: Fader::Inactive,
            pan_fader: Fader::Inactive,
            speed_fader: Fader::Inactive,
            pause_scheduler: Fader::Inactive,
            stop_scheduler: Fader::Inactive,
            active_fader: false,
            binding: None,
            selected: false,
            spatial: Spatial::from_source(props),
        }
    }

    /// Equal-power pan; surround layouts keep their rear pairs on the same curve.
    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan;
        let angle = (pan + 1.0) * PI / 4.0;
        let (l, r) = (angle.cos(), angle.sin());
        let v = &mut self.channel_volume;
        v[0] = l;
        v[1] = r;
        match self.channels {
            4 => {
                v[2] = l;
                v[3] = r;
            }
            6 => {
                v[2] = FRAC_1_SQRT_2;
                v[3] = 1.0;
                v[4] = l;
                v[5] = r;
            }
            8 => {
                v[2] = FRAC_1_SQRT_2;
                v[3] = 1.0;
                v[4] = l;
                v[5] = r;
                v[6] = l;
                v[7] = r;
            }
            _ => {}
        }
    }

    pub fn set_pan_absolute(&mut self, left: f32, right: f32) {
        self.pan_fader.clear();
        let mid = (left + right) * 0.5;
        let v = &mut self.channel_volume;
        v[0] = left;
        v[1] = right;
        match self.channels {
            4 => {
                v[2] = left;
                v[3] = right;
            }
            6 => {
                v[2] = mid;
                v[3] = mid;
                v[4] = left;
                v[5] = right;
            }
            8 => {
                v[2] = mid;
                v[3] = mid;
                v[4] = left;
                v[5] = right;
                v[6] = left;
                v[7] = right;
            }
            _ => {}
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.set_volume = volume;
        self.update_volume();
    }

    pub fn update_volume(&mut self) {
        self.overall_volume = self.set_volume * self.spatial.volume;
        if self.flags.paused {
            self.snap_channel_volume();
        }
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.set_speed = speed;
        self.update_speed();
    }

    pub fn update_speed(&mut self) {
        self.overall_speed = self.spatial.doppler * self.set_speed;
        self.sample_rate = self.base_sample_rate * self.overall_speed;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.pause_scheduler.clear();
        self.flags.paused = paused;
    }

    /// Jump the gain ramp to its target so the next buffer starts without a fade-in.
    pub fn snap_channel_volume(&mut self) {
        self.current_channel_volume = self.target_channel_volume();
    }

    pub fn target_channel_volume(&self) -> [f32; MAX_CHANNELS] {
        std::array::from_fn(|k| self.channel_volume[k] * self.overall_volume)
    }

    pub fn seek(&mut self, target: f64, scratch: &mut [f32]) -> MixResult<()> {
        let request = SeekRequest {
            target,
            position: self.stream_position,
            sample_rate: self.base_sample_rate,
            channels: self.channels,
        };
        let reached = match &mut self.instance {
            Instance::Stream(stream) => stream.seek(request, scratch)?,
            Instance::Queue(queue) => queue.seek(request, scratch)?,
            Instance::Bus(_) => return Err(MixerError::SeekUnsupported),
        };
        self.stream_position = reached;
        Ok(())
    }
}

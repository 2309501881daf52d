//! Positional audio.
//!
//! The 3-D pass is host-driven: `update_3d_audio` snapshots every positional voice under
//! the lock, computes attenuation, Doppler and per-speaker gains without it, then writes
//! the results back to voices whose handles are still live.

use std::sync::Arc;

use polymix_core::constants::{INAUDIBLE_VOLUME, MAX_CHANNELS};
use polymix_core::{Handle, Mat3, Vec3};

use super::Mixer;
use super::voice::Spatial;
use crate::sources::{AttenuationModel, AudioAttenuator, AudioCollider};

/// Listener pose and the medium sound travels through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Listener {
    pub position: Vec3,
    pub at: Vec3,
    pub up: Vec3,
    pub velocity: Vec3,
    pub speed_of_sound: f32,
}

impl Listener {
    pub fn new(speed_of_sound: f32) -> Self {
        Self {
            position: Vec3::ZERO,
            at: Vec3::new(0.0, 0.0, -1.0),
            up: Vec3::new(0.0, 1.0, 0.0),
            velocity: Vec3::ZERO,
            speed_of_sound,
        }
    }
}

/// Default speaker directions for a device layout. Unused channels stay at zero.
pub(crate) fn speaker_layout(channels: usize) -> [Vec3; MAX_CHANNELS] {
    let mut speakers = [Vec3::ZERO; MAX_CHANNELS];
    let left = Vec3::new(2.0, 0.0, 1.0);
    let right = Vec3::new(-2.0, 0.0, 1.0);
    match channels {
        1 => speakers[0] = Vec3::new(0.0, 0.0, 1.0),
        2 => {
            speakers[0] = left;
            speakers[1] = right;
        }
        4 => {
            speakers[..4].copy_from_slice(&[
                left,
                right,
                Vec3::new(2.0, 0.0, -1.0),
                Vec3::new(-2.0, 0.0, -1.0),
            ]);
        }
        6 => {
            speakers[..6].copy_from_slice(&[
                left,
                right,
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::ZERO,
                Vec3::new(2.0, 0.0, -1.0),
                Vec3::new(-2.0, 0.0, -1.0),
            ]);
        }
        8 => {
            speakers.copy_from_slice(&[
                left,
                right,
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::ZERO,
                Vec3::new(2.0, 0.0, 0.0),
                Vec3::new(-2.0, 0.0, 0.0),
                Vec3::new(2.0, 0.0, -1.0),
                Vec3::new(-2.0, 0.0, -1.0),
            ]);
        }
        _ => {}
    }
    speakers
}

pub(crate) fn attenuate(
    model: AttenuationModel,
    distance: f32,
    min_distance: f32,
    max_distance: f32,
    rolloff: f32,
) -> f32 {
    let d = distance.max(min_distance).min(max_distance);
    match model {
        AttenuationModel::None => 1.0,
        AttenuationModel::InverseDistance => {
            min_distance / (min_distance + rolloff * (d - min_distance))
        }
        AttenuationModel::LinearDistance => {
            1.0 - rolloff * (d - min_distance) / (max_distance - min_distance)
        }
        AttenuationModel::ExponentialDistance => (d / min_distance).powf(-rolloff),
    }
}

/// Playback-rate factor for a source at `delta` from the listener.
pub(crate) fn doppler(
    delta: Vec3,
    source_velocity: Vec3,
    listener_velocity: Vec3,
    factor: f32,
    speed_of_sound: f32,
) -> f32 {
    let distance = delta.length();
    if distance == 0.0 {
        return 1.0;
    }
    let max_speed = speed_of_sound / factor;
    let listener_speed = (delta.dot(listener_velocity) / distance).min(max_speed);
    let source_speed = (delta.dot(source_velocity) / distance).min(max_speed);
    (speed_of_sound - factor * listener_speed) / (speed_of_sound - factor * source_speed)
}

/// Everything the math needs, copied out so it runs without the engine lock.
pub(crate) struct SpatialFrame {
    listener: Listener,
    orientation: Mat3,
    speakers: [Vec3; MAX_CHANNELS],
    channels: usize,
}

impl SpatialFrame {
    pub fn new(listener: Listener, speakers: &[Vec3; MAX_CHANNELS], channels: usize) -> Self {
        Self {
            listener,
            orientation: Mat3::look_at_rh(listener.at, listener.up),
            speakers: speakers.map(Vec3::normalize),
            channels: channels.min(MAX_CHANNELS),
        }
    }

    /// Fill in volume, Doppler and speaker gains of one voice.
    pub fn compute(&self, handle: Handle, spatial: &mut Spatial, listener_relative: bool) {
        let mut volume = match &spatial.collider {
            Some(collider) => collider.collide(handle, spatial.position, spatial.velocity),
            None => 1.0,
        };

        let mut position = spatial.position;
        if !listener_relative {
            position = position - self.listener.position;
        }
        let distance = position.length();

        volume *= match &spatial.attenuator {
            Some(attenuator) => attenuator.attenuate(
                distance,
                spatial.min_distance,
                spatial.max_distance,
                spatial.rolloff,
            ),
            None => attenuate(
                spatial.attenuation,
                distance,
                spatial.min_distance,
                spatial.max_distance,
                spatial.rolloff,
            ),
        };

        spatial.doppler = doppler(
            position,
            spatial.velocity,
            self.listener.velocity,
            spatial.doppler_factor,
            self.listener.speed_of_sound,
        );

        let direction = self.orientation.transform(position).normalize();
        spatial.channel_volume = [0.0; MAX_CHANNELS];
        for (gain, speaker) in spatial.channel_volume[..self.channels]
            .iter_mut()
            .zip(&self.speakers)
        {
            *gain = if speaker.is_zero() {
                1.0
            } else {
                (speaker.dot(direction) + 1.0) / 2.0
            };
        }
        spatial.volume = volume;
    }
}

impl Mixer {
    /// Recompute every positional voice from the current listener and source poses.
    pub fn update_3d_audio(&self) {
        let (frame, mut batch) = {
            let core = self.core.lock();
            let frame = SpatialFrame::new(core.listener, &core.speakers, core.device.channels);
            let batch: Vec<_> = core.voices[..core.max_used]
                .iter()
                .flatten()
                .filter(|v| v.flags.process_3d)
                .map(|v| (v.handle, v.flags.listener_relative, v.spatial.clone()))
                .collect();
            (frame, batch)
        };

        for (handle, listener_relative, spatial) in &mut batch {
            frame.compute(*handle, spatial, *listener_relative);
        }

        let mut core = self.core.lock();
        for (handle, _, spatial) in batch {
            let Some(slot) = core.slot_of(handle) else {
                continue;
            };
            let kill = match core.voices[slot].as_deref_mut() {
                Some(voice) => {
                    voice.spatial.volume = spatial.volume;
                    voice.spatial.doppler = spatial.doppler;
                    voice.spatial.channel_volume = spatial.channel_volume;
                    voice.channel_volume = spatial.channel_volume;
                    voice.update_speed();
                    voice.update_volume();
                    voice.flags.inaudible = voice.overall_volume < INAUDIBLE_VOLUME;
                    voice.flags.inaudible && voice.flags.inaudible_kill
                }
                None => false,
            };
            if kill {
                core.stop_voice(slot);
            }
        }
        core.active_dirty = true;
    }

    pub fn set_3d_listener_parameters(&self, position: Vec3, at: Vec3, up: Vec3, velocity: Vec3) {
        let mut core = self.core.lock();
        core.listener.position = position;
        core.listener.at = at;
        core.listener.up = up;
        core.listener.velocity = velocity;
    }

    pub fn set_3d_listener_position(&self, position: Vec3) {
        self.core.lock().listener.position = position;
    }

    pub fn set_3d_listener_at(&self, at: Vec3) {
        self.core.lock().listener.at = at;
    }

    pub fn set_3d_listener_up(&self, up: Vec3) {
        self.core.lock().listener.up = up;
    }

    pub fn set_3d_listener_velocity(&self, velocity: Vec3) {
        self.core.lock().listener.velocity = velocity;
    }

    pub fn set_3d_sound_speed(&self, speed: f32) {
        if speed > 0.0 {
            self.core.lock().listener.speed_of_sound = speed;
        }
    }

    pub fn sound_speed_3d(&self) -> f32 {
        self.core.lock().listener.speed_of_sound
    }

    pub fn set_3d_source_parameters(&self, voice: Handle, position: Vec3, velocity: Vec3) {
        self.core.lock().for_each_voice(voice, |v| {
            v.spatial.position = position;
            v.spatial.velocity = velocity;
        });
    }

    pub fn set_3d_source_position(&self, voice: Handle, position: Vec3) {
        self.core
            .lock()
            .for_each_voice(voice, |v| v.spatial.position = position);
    }

    pub fn set_3d_source_velocity(&self, voice: Handle, velocity: Vec3) {
        self.core
            .lock()
            .for_each_voice(voice, |v| v.spatial.velocity = velocity);
    }

    pub fn set_3d_source_min_max_distance(&self, voice: Handle, min_distance: f32, max_distance: f32) {
        self.core.lock().for_each_voice(voice, |v| {
            v.spatial.min_distance = min_distance;
            v.spatial.max_distance = max_distance;
        });
    }

    pub fn set_3d_source_attenuation(&self, voice: Handle, model: AttenuationModel, rolloff: f32) {
        self.core.lock().for_each_voice(voice, |v| {
            v.spatial.attenuation = model;
            v.spatial.rolloff = rolloff;
        });
    }

    pub fn set_3d_source_doppler_factor(&self, voice: Handle, factor: f32) {
        self.core
            .lock()
            .for_each_voice(voice, |v| v.spatial.doppler_factor = factor);
    }

    pub fn set_3d_source_collider(&self, voice: Handle, collider: Option<Arc<dyn AudioCollider>>) {
        self.core
            .lock()
            .for_each_voice(voice, |v| v.spatial.collider = collider.clone());
    }

    pub fn set_3d_source_attenuator(
        &self,
        voice: Handle,
        attenuator: Option<Arc<dyn AudioAttenuator>>,
    ) {
        self.core
            .lock()
            .for_each_voice(voice, |v| v.spatial.attenuator = attenuator.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attenuation_models() {
        let inverse = attenuate(AttenuationModel::InverseDistance, 10.0, 1.0, 100.0, 1.0);
        assert!((inverse - 0.1).abs() < 1e-6);
        let linear = attenuate(AttenuationModel::LinearDistance, 50.5, 1.0, 100.0, 1.0);
        assert!((linear - 0.5).abs() < 1e-6);
        let exponential = attenuate(AttenuationModel::ExponentialDistance, 4.0, 1.0, 100.0, 0.5);
        assert!((exponential - 0.5).abs() < 1e-6);
        // Closer than the minimum distance is full volume.
        assert_eq!(attenuate(AttenuationModel::InverseDistance, 0.2, 1.0, 100.0, 1.0), 1.0);
        assert_eq!(attenuate(AttenuationModel::None, 1e6, 1.0, 100.0, 1.0), 1.0);
    }

    #[test]
    fn test_doppler_with_still_bodies_is_unity() {
        let d = doppler(Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO, Vec3::ZERO, 1.0, 343.3);
        assert_eq!(d, 1.0);
        assert_eq!(doppler(Vec3::ZERO, Vec3::ZERO, Vec3::ZERO, 1.0, 343.3), 1.0);
    }

    #[test]
    fn test_doppler_uses_speed_along_line_of_sight() {
        let d = doppler(
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(30.0, 0.0, 0.0),
            Vec3::ZERO,
            1.0,
            343.3,
        );
        assert!((d - 343.3 / (343.3 - 30.0)).abs() < 1e-5);
    }

    #[test]
    fn test_speaker_gains_follow_direction() {
        let listener = Listener::new(343.3);
        let frame = SpatialFrame::new(listener, &speaker_layout(2), 2);
        let props = crate::sources::SourceProperties::default();
        let mut spatial = Spatial::from_source(&props);
        spatial.position = Vec3::new(0.0, 0.0, -5.0);
        frame.compute(Handle::NULL, &mut spatial, false);
        // Straight ahead: both speakers get the same gain.
        assert!((spatial.channel_volume[0] - spatial.channel_volume[1]).abs() < 1e-6);
        assert_eq!(spatial.channel_volume[2], 0.0);
    }

    #[test]
    fn test_lfe_speaker_has_unit_gain() {
        let frame = SpatialFrame::new(Listener::new(343.3), &speaker_layout(6), 6);
        let props = crate::sources::SourceProperties::default();
        let mut spatial = Spatial::from_source(&props);
        spatial.position = Vec3::new(3.0, 1.0, 2.0);
        frame.compute(Handle::NULL, &mut spatial, false);
        assert_eq!(spatial.channel_volume[3], 1.0);
        assert!(spatial.channel_volume[..6].iter().all(|g| (0.0..=1.0).contains(g)));
    }
}

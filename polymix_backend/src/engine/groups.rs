//! Voice groups: a handle that fans control calls out to several voices.

use polymix_core::Handle;
use polymix_core::constants::MAX_VOICE_GROUPS;

use super::Mixer;
use super::core::MixerCore;

impl MixerCore {
    /// Drop members whose voices have stopped.
    fn trim_group(&mut self, index: usize) {
        let Some(Some(mut members)) = self.groups.get_mut(index).map(Option::take) else {
            return;
        };
        members.retain(|&member| self.slot_of(member).is_some());
        self.groups[index] = Some(members);
    }
}

impl Mixer {
    /// Allocate an empty group. Returns null once every group index is taken.
    pub fn create_voice_group(&self) -> Handle {
        let mut core = self.core.lock();
        let index = match core.groups.iter().position(Option::is_none) {
            Some(index) => index,
            None if core.groups.len() < MAX_VOICE_GROUPS => {
                core.groups.push(None);
                core.groups.len() - 1
            }
            None => {
                log::warn!("All {MAX_VOICE_GROUPS} voice groups are in use");
                return Handle::NULL;
            }
        };
        core.groups[index] = Some(Vec::with_capacity(16));
        Handle::for_group(index)
    }

    pub fn destroy_voice_group(&self, group: Handle) {
        let Some(index) = group.group_index() else {
            return;
        };
        if let Some(slot) = self.core.lock().groups.get_mut(index) {
            *slot = None;
        }
    }

    /// Add a live voice to `group`. Adding twice, adding stale voices or nesting groups
    /// is ignored.
    pub fn add_voice_to_group(&self, group: Handle, voice: Handle) {
        let Some(index) = group.group_index() else {
            return;
        };
        let mut core = self.core.lock();
        if voice.is_group() || core.slot_of(voice).is_none() {
            return;
        }
        core.trim_group(index);
        if let Some(Some(members)) = core.groups.get_mut(index) {
            if !members.contains(&voice) {
                members.push(voice);
            }
        }
    }

    pub fn is_voice_group(&self, group: Handle) -> bool {
        group
            .group_index()
            .is_some_and(|index| matches!(self.core.lock().groups.get(index), Some(Some(_))))
    }

    /// True for groups without live members, and for anything that is not a group.
    pub fn is_voice_group_empty(&self, group: Handle) -> bool {
        let Some(index) = group.group_index() else {
            return true;
        };
        let mut core = self.core.lock();
        core.trim_group(index);
        !matches!(core.groups.get(index), Some(Some(members)) if !members.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{Mixer, PlayParams};
    use crate::sources::Waveform;
    use polymix_core::{DeviceParams, EngineConfig, Handle};

    fn mixer() -> Mixer {
        let mixer = Mixer::new(EngineConfig::default()).expect("valid config");
        mixer
            .postinit(DeviceParams::new(44_100, 512, 2))
            .expect("valid device");
        mixer
    }

    #[test]
    fn test_group_handles_fan_out() {
        let mixer = mixer();
        let tone = Waveform::sine(440.0);
        let group = mixer.create_voice_group();
        assert!(group.is_group());
        assert!(mixer.is_voice_group(group));
        assert!(mixer.is_voice_group_empty(group));

        let a = mixer.play(&tone, PlayParams::default());
        let b = mixer.play(&tone, PlayParams::default());
        mixer.add_voice_to_group(group, a);
        mixer.add_voice_to_group(group, b);
        mixer.add_voice_to_group(group, b);
        assert!(!mixer.is_voice_group_empty(group));

        mixer.set_volume(group, 0.2);
        assert_eq!(mixer.volume(a), 0.2);
        assert_eq!(mixer.volume(b), 0.2);
        assert!(!mixer.is_valid_voice_handle(group));

        mixer.stop(group);
        assert!(!mixer.is_valid_voice_handle(a));
        assert!(!mixer.is_valid_voice_handle(b));
        assert!(mixer.is_voice_group_empty(group));
    }

    #[test]
    fn test_destroyed_group_indices_are_reused() {
        let mixer = mixer();
        let first = mixer.create_voice_group();
        let second = mixer.create_voice_group();
        assert_ne!(first, second);
        mixer.destroy_voice_group(first);
        assert!(!mixer.is_voice_group(first));
        assert_eq!(mixer.create_voice_group(), first);
    }

    #[test]
    fn test_non_groups_are_rejected() {
        let mixer = mixer();
        let voice = mixer.play(&Waveform::sine(440.0), PlayParams::default());
        assert!(!mixer.is_voice_group(voice));
        assert!(!mixer.is_voice_group(Handle::NULL));
        assert!(mixer.is_voice_group_empty(voice));
        mixer.add_voice_to_group(voice, voice);
    }
}

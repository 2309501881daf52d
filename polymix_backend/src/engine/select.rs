//! Active-voice selection and resample buffer bindings.

use std::cmp::Ordering;

use polymix_core::constants::VOICE_COUNT;
use polymix_core::{MixResult, MixerError};

use super::core::MixerCore;
use super::voice::{ResampleBuffers, Voice};

/// Reorder `items` so its first `k` entries are the `k` smallest under `cmp`, sorted.
pub(crate) fn top_k_by<T, F>(items: &mut [T], k: usize, mut cmp: F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    let k = k.min(items.len());
    if k == 0 {
        return;
    }
    if k < items.len() {
        items.select_nth_unstable_by(k - 1, &mut cmp);
    }
    items[..k].sort_unstable_by(cmp);
}

fn priority(voices: &[Option<Box<Voice>>], slot: usize) -> (f32, u32) {
    voices[slot]
        .as_deref()
        .map_or((0.0, u32::MAX), |v| (v.overall_volume, v.play_index))
}

impl MixerCore {
    /// Rebuild the table of voices mixed this buffer.
    ///
    /// Inaudible-but-ticking voices always make the cut. The rest compete on overall
    /// volume, loudest first, older voices winning ties.
    pub fn calc_active_voices(&mut self) {
        self.active_dirty = false;

        let mut candidates = 0;
        let mut must_live = 0;
        for slot in 0..self.max_used {
            let Some(voice) = self.voices[slot].as_deref() else {
                continue;
            };
            let flags = voice.flags;
            if (!flags.inaudible && !flags.paused) || flags.inaudible_tick {
                self.active[candidates] = slot;
                if flags.inaudible_tick {
                    self.active.swap(candidates, must_live);
                    must_live += 1;
                }
                candidates += 1;
            }
        }

        if candidates > self.max_active && must_live < self.max_active {
            let keep = self.max_active - must_live;
            let voices = &self.voices;
            top_k_by(&mut self.active[must_live..candidates], keep, |&a, &b| {
                let (volume_a, index_a) = priority(voices, a);
                let (volume_b, index_b) = priority(voices, b);
                volume_b.total_cmp(&volume_a).then(index_a.cmp(&index_b))
            });
        }

        self.active_count = candidates.min(self.max_active);
        self.map_resample_buffers();
    }

    /// Lend a buffer pair to every active voice, keeping the pairs of voices that stay.
    fn map_resample_buffers(&mut self) {
        for voice in self.voices[..self.max_used].iter_mut().flatten() {
            voice.selected = false;
        }
        for i in 0..self.active_count {
            if let Some(voice) = self.voices[self.active[i]].as_deref_mut() {
                voice.selected = true;
            }
        }
        for voice in self.voices[..self.max_used].iter_mut().flatten() {
            if !voice.selected {
                voice.binding = None;
            }
        }

        for binding in 0..self.bindings.len() {
            let Some(owner) = self.bindings[binding] else {
                continue;
            };
            let kept = self.voices[owner]
                .as_deref()
                .is_some_and(|v| v.selected && v.binding == Some(binding));
            if !kept {
                self.bindings[binding] = None;
            }
        }

        let mut next_free = 0;
        for i in 0..self.active_count {
            let slot = self.active[i];
            let Some(voice) = self.voices[slot].as_deref_mut() else {
                continue;
            };
            if voice
                .binding
                .is_some_and(|b| self.bindings.get(b) == Some(&Some(slot)))
            {
                continue;
            }
            voice.binding = None;
            while next_free < self.bindings.len() && self.bindings[next_free].is_some() {
                next_free += 1;
            }
            if next_free < self.bindings.len() {
                self.bindings[next_free] = Some(slot);
                self.pool[next_free].clear();
                voice.binding = Some(next_free);
                next_free += 1;
            }
        }
    }

    /// Resize the active table. Every voice loses its binding and is re-selected.
    pub fn set_max_active_voice_count(&mut self, count: usize) -> MixResult<()> {
        if count == 0 || count > VOICE_COUNT {
            return Err(MixerError::InvalidConfig(format!(
                "max active voices must be in 1..={VOICE_COUNT}, got {count}"
            )));
        }
        self.max_active = count;
        self.bindings = vec![None; count];
        self.pool.resize_with(count, ResampleBuffers::new);
        for voice in self.voices.iter_mut().flatten() {
            voice.binding = None;
        }
        self.active_dirty = true;
        log::info!("Max active voices set to {count}");
        Ok(())
    }
}

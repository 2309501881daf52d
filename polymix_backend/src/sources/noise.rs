//! Octave-summed noise source.
//!
//! Ten "octaves" of sample-and-hold noise are layered on top of white noise; octave `j`
//! draws a new value every `2^(j+1)` frames. The per-octave weights pick the colour.

use polymix_core::MixResult;
use polymix_core::constants::DEFAULT_SAMPLE_RATE;

use super::{AudioSource, Instance, SourceInstance, SourceProperties};

const OCTAVES: usize = 10;
const SEED: u32 = 0xFADE;

/// Linear congruential generator, deterministic across runs.
#[derive(Debug, Clone)]
struct FastRng {
    state: u32,
}

impl FastRng {
    fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    #[inline]
    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1664525).wrapping_add(1013904223);
        self.state
    }

    /// Uniform in [0, 1).
    #[inline]
    fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 * (1.0 / 16_777_216.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoiseKind {
    #[default]
    White,
    Pink,
    Brownish,
    Blueish,
}

impl NoiseKind {
    fn octave_scale(self) -> [f32; OCTAVES] {
        match self {
            NoiseKind::White => [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            NoiseKind::Pink => [1.0; OCTAVES],
            NoiseKind::Brownish => std::array::from_fn(|j| (j + 1) as f32),
            NoiseKind::Blueish => std::array::from_fn(|j| (OCTAVES - j) as f32),
        }
    }
}

/// Mono noise generator.
pub struct Noise {
    props: SourceProperties,
    octave_scale: [f32; OCTAVES],
}

impl Noise {
    pub fn new(kind: NoiseKind) -> Self {
        Self {
            props: SourceProperties::new(DEFAULT_SAMPLE_RATE as f32, 1),
            octave_scale: kind.octave_scale(),
        }
    }

    pub fn set_kind(&mut self, kind: NoiseKind) {
        self.octave_scale = kind.octave_scale();
    }

    /// Custom octave weights, lowest octave first.
    pub fn set_octave_scale(&mut self, scale: [f32; OCTAVES]) {
        self.octave_scale = scale;
    }
}

impl Default for Noise {
    fn default() -> Self {
        Self::new(NoiseKind::White)
    }
}

impl AudioSource for Noise {
    fn properties(&self) -> &SourceProperties {
        &self.props
    }

    fn properties_mut(&mut self) -> &mut SourceProperties {
        &mut self.props
    }

    fn create_instance(&self) -> Instance {
        Instance::stream(NoiseInstance::new(self.octave_scale))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Octave {
    step: u32,
    value: f32,
}

struct NoiseInstance {
    rng: FastRng,
    scale: [f32; OCTAVES],
    octaves: [Octave; OCTAVES],
}

impl NoiseInstance {
    fn new(scale: [f32; OCTAVES]) -> Self {
        Self {
            rng: FastRng::new(SEED),
            scale,
            octaves: [Octave::default(); OCTAVES],
        }
    }
}

impl SourceInstance for NoiseInstance {
    fn fill(&mut self, out: &mut [f32], frames: usize, _stride: usize) -> usize {
        let total: f32 = self.scale.iter().sum();
        let norm = if total > 0.0 { 1.0 / total } else { 0.0 };

        for sample in &mut out[..frames] {
            let mut acc = self.rng.next_f32() - 0.5;
            for (j, octave) in self.octaves.iter_mut().enumerate() {
                octave.step += 1;
                if octave.step > 1 << (j + 1) {
                    octave.step = 0;
                    octave.value = self.rng.next_f32() - 0.5;
                }
                acc += octave.value * self.scale[j];
            }
            *sample = acc * norm;
        }
        frames
    }

    fn has_ended(&self) -> bool {
        false
    }

    fn rewind(&mut self) -> MixResult<()> {
        self.rng = FastRng::new(SEED);
        self.octaves = [Octave::default(); OCTAVES];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(kind: NoiseKind, frames: usize) -> Vec<f32> {
        let mut instance = NoiseInstance::new(kind.octave_scale());
        let mut out = vec![0.0; frames];
        instance.fill(&mut out, frames, frames);
        out
    }

    #[test]
    fn test_noise_is_deterministic() {
        assert_eq!(render(NoiseKind::Pink, 256), render(NoiseKind::Pink, 256));
    }

    #[test]
    fn test_noise_stays_in_range() {
        for kind in [NoiseKind::White, NoiseKind::Pink, NoiseKind::Brownish, NoiseKind::Blueish] {
            let out = render(kind, 4096);
            assert!(out.iter().all(|s| s.abs() <= 1.0), "{kind:?}");
            assert!(out.iter().any(|s| *s != 0.0), "{kind:?}");
        }
    }

    #[test]
    fn test_octave_state_carries_across_fills() {
        let mut split = NoiseInstance::new(NoiseKind::Brownish.octave_scale());
        let mut a = vec![0.0; 300];
        split.fill(&mut a[..100], 100, 100);
        split.fill(&mut a[100..], 200, 200);
        assert_eq!(a, render(NoiseKind::Brownish, 300));
    }

    #[test]
    fn test_rewind_replays_sequence() {
        let mut instance = NoiseInstance::new(NoiseKind::White.octave_scale());
        let mut first = [0.0; 64];
        let mut again = [0.0; 64];
        instance.fill(&mut first, 64, 64);
        assert!(instance.rewind().is_ok());
        instance.fill(&mut again, 64, 64);
        assert_eq!(first, again);
    }
}

//! The mixing engine.
//!
//! [`Mixer`] is the public façade. Control calls (play, stop, setters) lock the voice
//! pool with a `parking_lot::Mutex`; the render path takes the same lock only while
//! faders are evaluated and buses are mixed, then clips and interleaves from its own
//! scratch behind a `spin::Mutex` so device callbacks never wait on heap allocation.

mod control;
pub(crate) mod core;
mod groups;
pub(crate) mod mix;
mod play;
mod select;
pub(crate) mod spatial;
pub(crate) mod voice;

pub use play::PlayParams;

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use polymix_core::constants::{MAX_CHANNELS, VISUALIZATION_SAMPLES, is_supported_channel_count};
use polymix_core::dsp::{ClipParams, clip, interleave_f32, interleave_s16};
use polymix_core::filters::{FilterBlock, run_filter};
use polymix_core::{DeviceParams, EngineConfig, Handle, MixResult, MixerError};

use self::core::MixerCore;
use self::mix::{BusMix, capture_visualization};
use self::spatial::speaker_layout;

/// Smallest render chunk the scratch buffers are sized for.
const MIN_SCRATCH_FRAMES: usize = 4096;

/// Planar buffers owned by the render path.
struct RenderState {
    output: Vec<f32>,
    scratch: Vec<f32>,
    scratch_frames: usize,
    channels: usize,
}

struct Visualization {
    wave: [f32; VISUALIZATION_SAMPLES],
    peaks: [f32; MAX_CHANNELS],
}

/// Real-time polyphonic mixer.
pub struct Mixer {
    pub(crate) core: Mutex<MixerCore>,
    render: spin::Mutex<RenderState>,
    visual: spin::Mutex<Visualization>,
    initialized: AtomicBool,
}

impl Mixer {
    /// Build an engine with no device attached. Call [`Mixer::postinit`] with the granted
    /// device parameters before rendering.
    pub fn new(config: EngineConfig) -> MixResult<Self> {
        config.validate()?;
        Ok(Self {
            core: Mutex::new(MixerCore::new(config)),
            render: spin::Mutex::new(RenderState {
                output: Vec::new(),
                scratch: Vec::new(),
                scratch_frames: 0,
                channels: 0,
            }),
            visual: spin::Mutex::new(Visualization {
                wave: [0.0; VISUALIZATION_SAMPLES],
                peaks: [0.0; MAX_CHANNELS],
            }),
            initialized: AtomicBool::new(false),
        })
    }

    /// Adopt what the backend actually granted and allocate render scratch for it.
    pub fn postinit(&self, device: DeviceParams) -> MixResult<()> {
        if !is_supported_channel_count(device.channels) {
            return Err(MixerError::UnsupportedFormat(format!(
                "{} output channels",
                device.channels
            )));
        }
        if device.sample_rate == 0 || device.buffer_size == 0 {
            return Err(MixerError::UnsupportedFormat(format!(
                "{} Hz with {} frame buffers",
                device.sample_rate, device.buffer_size
            )));
        }

        let scratch_frames = device
            .buffer_size
            .next_multiple_of(16)
            .max(MIN_SCRATCH_FRAMES);
        {
            let mut render = self.render.lock();
            render.output = vec![0.0; scratch_frames * MAX_CHANNELS];
            render.scratch = vec![0.0; scratch_frames * MAX_CHANNELS];
            render.scratch_frames = scratch_frames;
            render.channels = device.channels;
        }
        {
            let mut core = self.core.lock();
            core.device = device;
            core.config.sample_rate = device.sample_rate;
            core.config.buffer_size = device.buffer_size;
            core.config.channels = device.channels;
            core.speakers = speaker_layout(device.channels);
        }
        self.initialized.store(true, Ordering::Release);
        log::info!(
            "Mixer ready: {} Hz, {} frames, {} channels",
            device.sample_rate,
            device.buffer_size,
            device.channels
        );
        Ok(())
    }

    /// Stop every voice and detach from the device. Rendering outputs silence afterwards.
    pub fn deinit(&self) {
        self.initialized.store(false, Ordering::Release);
        self.core.lock().stop_all();
        log::info!("Mixer shut down");
    }

    pub fn is_device_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Granted device parameters, or the requested ones before `postinit`.
    pub fn device(&self) -> DeviceParams {
        self.core.lock().device
    }

    /// Mix into an interleaved float buffer of `frames * channels` samples.
    pub fn render_f32(&self, out: &mut [f32]) {
        self.render_into(out, interleave_f32);
    }

    /// Mix into an interleaved signed 16-bit buffer of `frames * channels` samples.
    pub fn render_s16(&self, out: &mut [i16]) {
        self.render_into(out, interleave_s16);
    }

    fn render_into<S: Copy + Default>(
        &self,
        out: &mut [S],
        interleave: fn(&[f32], &mut [S], usize, usize, usize),
    ) {
        let mut render = self.render.lock();
        let channels = render.channels;
        if !self.is_device_initialized() || channels == 0 {
            out.fill(S::default());
            return;
        }

        let total = out.len() / channels;
        out[total * channels..].fill(S::default());

        let _denormals = DenormalGuard::new(self.core.lock().config.no_fpu_register_change);
        let mut done = 0;
        while done < total {
            let frames = (total - done).min(render.scratch_frames);
            let stride = frames.next_multiple_of(16);
            let RenderState {
                output, scratch, ..
            } = &mut *render;

            let (params, visualize) = self.mix_chunk(output, scratch, frames, stride, channels);
            clip(output, scratch, frames, stride, channels, params);
            if visualize {
                let mut visual = self.visual.lock();
                let Visualization { wave, peaks } = &mut *visual;
                capture_visualization(scratch, frames, stride, channels, wave, peaks);
            }
            interleave(scratch, &mut out[done * channels..], frames, stride, channels);
            done += frames;
        }
    }

    /// Everything that needs the engine lock: clocks, faders, bus mixing, global filters.
    fn mix_chunk(
        &self,
        output: &mut [f32],
        scratch: &mut [f32],
        frames: usize,
        stride: usize,
        channels: usize,
    ) -> (ClipParams, bool) {
        let mut core = self.core.lock();
        let sample_rate = core.device.sample_rate as f32;
        let dt = frames as f64 / sample_rate as f64;

        core.stream_time += dt;
        core.last_clocked_time = None;

        let volume_start = core.global_volume;
        let now = core.stream_time;
        if let Some(volume) = core.global_volume_fader.step(now).value() {
            core.global_volume = volume;
        }
        let volume_end = core.global_volume;

        core.tick_faders(dt);
        if core.active_dirty {
            core.calc_active_voices();
        }

        let job = BusMix {
            bus: Handle::NULL,
            frames,
            stride,
            channels,
            sample_rate,
            resampler: core.config.resampler,
        };
        core.mix_bus(output, scratch, job);

        let mut filters = std::mem::take(&mut core.global_filters);
        let mut block = FilterBlock {
            samples: output,
            frames,
            stride,
            channels,
            sample_rate,
            time: core.stream_time,
        };
        for filter in filters.iter_mut().flatten() {
            run_filter(filter.as_mut(), &mut block, &*core);
        }
        core.global_filters = filters;

        let params = ClipParams {
            volume_start,
            volume_end,
            roundoff: core.config.clip_roundoff,
            post_scale: core.config.post_clip_scaler,
        };
        (params, core.config.enable_visualization)
    }

    /// Sum across channels of the first 256 frames of the latest output buffer.
    pub fn wave(&self) -> [f32; VISUALIZATION_SAMPLES] {
        self.visual.lock().wave
    }

    /// Peak level of `channel` in the latest output buffer.
    pub fn approximate_volume(&self, channel: usize) -> f32 {
        self.visual.lock().peaks.get(channel).copied().unwrap_or(0.0)
    }
}

/// Enables flush-to-zero and denormals-are-zero for the render thread, restoring the
/// previous MXCSR state on drop.
struct DenormalGuard {
    #[cfg(target_arch = "x86_64")]
    saved: Option<u32>,
}

impl DenormalGuard {
    #[cfg(target_arch = "x86_64")]
    #[allow(deprecated)]
    fn new(keep_registers: bool) -> Self {
        use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};
        if keep_registers {
            return Self { saved: None };
        }
        // SAFETY: only the FTZ (bit 15) and DAZ (bit 6) flags of the current thread change.
        let saved = unsafe {
            let mxcsr = _mm_getcsr();
            _mm_setcsr(mxcsr | 0x8040);
            mxcsr
        };
        Self { saved: Some(saved) }
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn new(_keep_registers: bool) -> Self {
        Self {}
    }
}

#[cfg(target_arch = "x86_64")]
impl Drop for DenormalGuard {
    #[allow(deprecated)]
    fn drop(&mut self) {
        if let Some(mxcsr) = self.saved {
            // SAFETY: restores the value read in `new` on the same thread.
            unsafe { std::arch::x86_64::_mm_setcsr(mxcsr) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{Waveform, WaveShape};

    fn mixer(config: EngineConfig) -> Mixer {
        let device = DeviceParams::new(config.sample_rate, config.buffer_size, config.channels);
        let mixer = Mixer::new(config).expect("valid config");
        mixer.postinit(device).expect("valid device");
        mixer
    }

    #[test]
    fn test_uninitialized_mixer_renders_silence() {
        let mixer = Mixer::new(EngineConfig::default()).expect("valid config");
        let mut out = vec![1.0f32; 64];
        mixer.render_f32(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(!mixer.is_device_initialized());
    }

    #[test]
    fn test_postinit_rejects_odd_layouts() {
        let mixer = Mixer::new(EngineConfig::default()).expect("valid config");
        assert!(matches!(
            mixer.postinit(DeviceParams::new(48_000, 512, 3)),
            Err(MixerError::UnsupportedFormat(_))
        ));
        assert!(!mixer.is_device_initialized());
    }

    #[test]
    fn test_output_never_exceeds_post_clip_scale() {
        let mixer = mixer(EngineConfig::default().with_clip_roundoff(false));
        let loud = Waveform::new(WaveShape::Square, 220.0).with_amplitude(4.0);
        for _ in 0..8 {
            mixer.play(&loud, PlayParams::default().with_volume(1.0));
        }
        let mut out = vec![0.0f32; 2 * 1000];
        mixer.render_f32(&mut out);
        assert!(out.iter().all(|s| s.abs() <= 0.95 + 1e-6));
        assert!(out.iter().any(|s| s.abs() > 0.9));
    }

    #[test]
    fn test_long_requests_are_rendered_in_chunks() {
        let mixer = mixer(EngineConfig::default().with_buffer_size(256));
        let tone = Waveform::new(WaveShape::Sine, 440.0);
        mixer.play(&tone, PlayParams::default());
        let mut out = vec![0i16; 2 * 10_000];
        mixer.render_s16(&mut out);
        assert!(out[2 * 9_000..].iter().any(|&s| s != 0));
        assert!((mixer.stream_time() - 10_000.0 / 44_100.0).abs() < 1e-9);
    }

    #[test]
    fn test_visualization_tracks_output() {
        let mixer = mixer(EngineConfig::default().with_visualization(true));
        let tone = Waveform::new(WaveShape::Square, 100.0);
        mixer.play(&tone, PlayParams::default());
        let mut out = vec![0.0f32; 2 * 512];
        mixer.render_f32(&mut out);
        assert!(mixer.approximate_volume(0) > 0.1);
        assert!(mixer.wave().iter().any(|&s| s != 0.0));
        assert_eq!(mixer.approximate_volume(MAX_CHANNELS), 0.0);
    }
}

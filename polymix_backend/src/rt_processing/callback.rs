//! Lock-conscious realtime audio callback slot.
//!
//! The device thread renders through a [`CallbackSlot`], which holds the current
//! processor behind a `spin::Mutex`. The audio thread only ever `try_lock`s it: if a
//! control thread is swapping processors at that moment the buffer is filled with
//! silence instead of blocking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::performance::PerformanceMonitor;
use crate::engine::Mixer;

/// Anything that can fill an interleaved device buffer.
///
/// Implementations run on the audio thread and must not block.
pub trait AudioCallback: Send + 'static {
    /// Fill `output` (`frames * channels` samples) with float audio.
    fn process(&mut self, output: &mut [f32], frames: usize);

    /// Signed 16-bit variant. Defaults to silence for processors without an integer path.
    fn process_s16(&mut self, output: &mut [i16], _frames: usize) {
        output.fill(0);
    }
}

/// Hot-swappable processor plus a frame clock readable from any thread.
pub struct CallbackSlot {
    processor: Arc<Mutex<Box<dyn AudioCallback>>>,
    sample_clock: Arc<AtomicU64>,
    sample_rate: u32,
    channels: usize,
}

impl CallbackSlot {
    pub fn new(processor: Box<dyn AudioCallback>, sample_rate: u32, channels: usize) -> Self {
        Self {
            processor: Arc::new(Mutex::new(processor)),
            sample_clock: Arc::new(AtomicU64::new(0)),
            sample_rate,
            channels,
        }
    }

    /// Slot whose processor writes silence.
    pub fn silent(sample_rate: u32, channels: usize) -> Self {
        Self::new(Box::new(SilentProcessor), sample_rate, channels)
    }

    /// Replace the processor. Spins until the audio thread lets go of the old one.
    pub fn swap_processor(&self, processor: Box<dyn AudioCallback>) {
        *self.processor.lock() = processor;
    }

    /// Render float audio. Returns `false` if the processor was busy and silence was
    /// written instead.
    pub fn process_realtime(&self, output: &mut [f32]) -> bool {
        let Some(frames) = self.advance(output.len()) else {
            return false;
        };
        match self.processor.try_lock() {
            Some(mut processor) => {
                processor.process(output, frames);
                true
            }
            None => {
                output.fill(0.0);
                false
            }
        }
    }

    /// Signed 16-bit counterpart of [`CallbackSlot::process_realtime`].
    pub fn process_realtime_s16(&self, output: &mut [i16]) -> bool {
        let Some(frames) = self.advance(output.len()) else {
            return false;
        };
        match self.processor.try_lock() {
            Some(mut processor) => {
                processor.process_s16(output, frames);
                true
            }
            None => {
                output.fill(0);
                false
            }
        }
    }

    fn advance(&self, samples: usize) -> Option<usize> {
        let frames = samples / self.channels.max(1);
        if frames == 0 {
            return None;
        }
        self.sample_clock.fetch_add(frames as u64, Ordering::Relaxed);
        Some(frames)
    }

    /// Seconds of audio handed to the device so far.
    pub fn playback_time(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn frame_count(&self) -> u64 {
        self.sample_clock.load(Ordering::Relaxed)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

struct SilentProcessor;

impl AudioCallback for SilentProcessor {
    fn process(&mut self, output: &mut [f32], _frames: usize) {
        output.fill(0.0);
    }
}

/// Drives a [`Mixer`] from the device callback and times every buffer.
pub struct MixerCallback {
    mixer: Arc<Mixer>,
    monitor: Arc<PerformanceMonitor>,
}

impl MixerCallback {
    pub fn new(mixer: Arc<Mixer>, monitor: Arc<PerformanceMonitor>) -> Self {
        Self { mixer, monitor }
    }
}

impl AudioCallback for MixerCallback {
    fn process(&mut self, output: &mut [f32], frames: usize) {
        let _timing = self.monitor.scoped_callback();
        self.mixer.render_f32(output);
        self.monitor.add_frames_processed(frames as u64);
    }

    fn process_s16(&mut self, output: &mut [i16], frames: usize) {
        let _timing = self.monitor.scoped_callback();
        self.mixer.render_s16(output);
        self.monitor.add_frames_processed(frames as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PlayParams;
    use crate::sources::Waveform;
    use polymix_core::{DeviceParams, EngineConfig};

    struct Constant(f32);

    impl AudioCallback for Constant {
        fn process(&mut self, output: &mut [f32], _frames: usize) {
            output.fill(self.0);
        }
    }

    #[test]
    fn test_busy_processor_yields_silence() {
        let slot = CallbackSlot::new(Box::new(Constant(0.5)), 48_000, 2);
        let mut out = [1.0f32; 8];
        let held = slot.processor.lock();
        assert!(!slot.process_realtime(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
        drop(held);

        assert!(slot.process_realtime(&mut out));
        assert!(out.iter().all(|&s| s == 0.5));
        assert_eq!(slot.frame_count(), 8);
    }

    #[test]
    fn test_swap_processor() {
        let slot = CallbackSlot::silent(48_000, 1);
        let mut out = [1.0f32; 4];
        slot.process_realtime(&mut out);
        assert_eq!(out, [0.0; 4]);
        slot.swap_processor(Box::new(Constant(0.25)));
        slot.process_realtime(&mut out);
        assert_eq!(out, [0.25; 4]);
    }

    #[test]
    fn test_integer_path_defaults_to_silence() {
        let slot = CallbackSlot::new(Box::new(Constant(0.5)), 48_000, 2);
        let mut out = [7i16; 8];
        assert!(slot.process_realtime_s16(&mut out));
        assert_eq!(out, [0; 8]);
    }

    #[test]
    fn test_mixer_callback_renders_and_counts_frames() {
        let mixer = Arc::new(Mixer::new(EngineConfig::default()).expect("valid config"));
        mixer
            .postinit(DeviceParams::new(44_100, 256, 2))
            .expect("valid device");
        mixer.play(&Waveform::sine(440.0), PlayParams::default());

        let monitor = Arc::new(PerformanceMonitor::new(256, 44_100.0, 0.1));
        let slot = CallbackSlot::new(
            Box::new(MixerCallback::new(Arc::clone(&mixer), Arc::clone(&monitor))),
            44_100,
            2,
        );
        let mut out = vec![0.0f32; 512];
        assert!(slot.process_realtime(&mut out));
        assert!(out.iter().any(|&s| s != 0.0));

        let snapshot = monitor.snapshot(false);
        assert_eq!(snapshot.frames_processed, 256);
        assert_eq!(snapshot.callback_count, 1);
    }
}
